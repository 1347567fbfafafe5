//! Dataset collectors.
//!
//! Issues and commits refresh incrementally against the copy already on
//! disk; everything else is re-listed in full on each run.

use anyhow::Result;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashSet;

use crate::cache::DetailCache;
use crate::github::GitHub;
use crate::models::{Commit, Contributor, Issue, IssueComment, PullRequest, RepoId, RepoMeta};
use crate::paginate::{append_query, merge_by_key, since_from_cache, since_param, tag_repo};
use crate::store::{Dataset, DatasetStore};

/// Repository metadata with `full_name` renamed to `repo_name`.
/// A failed lookup yields metadata carrying only `repo_name`.
pub fn repo_meta(gh: &mut GitHub, repo: &RepoId) -> Result<RepoMeta> {
    let url = gh.repo_url(repo, "");
    let response = gh.get(&url)?;
    if !response.is_success() {
        return Ok(RepoMeta {
            repo_name: repo.full_name(),
            ..RepoMeta::default()
        });
    }

    let mut value: Value = response.json()?;
    if let Value::Object(map) = &mut value {
        let name = match map.remove("full_name") {
            Some(Value::String(full)) => full,
            _ => repo.full_name(),
        };
        map.insert("repo_name".to_string(), Value::String(name));
    }
    Ok(serde_json::from_value(value)?)
}

/// All issues (pull requests excluded), refreshed incrementally.
pub fn issues(
    gh: &mut GitHub,
    store: &DatasetStore,
    repo: &RepoId,
    lookback: chrono::Duration,
) -> Result<Vec<Issue>> {
    let base = gh.repo_url(repo, "/issues?state=all");
    let cached: Vec<Issue> = store.load_list(repo, Dataset::Issues);
    let since = since_from_cache(&cached, Issue::latest_activity, lookback);
    let url = match since {
        Some(ts) => append_query(&base, "since", &since_param(ts)),
        None => base,
    };

    let fetched: Vec<Issue> = gh.paged(&url, repo, 0)?;
    let fresh: Vec<Issue> = fetched
        .into_iter()
        .filter(|issue| !issue.is_pull_request())
        .collect();

    match since {
        None => Ok(fresh),
        Some(_) if fresh.is_empty() => {
            debug!("no issue updates for {}", repo);
            Ok(cached)
        }
        Some(_) => {
            info!("  merging {} updated issue(s) into {} cached", fresh.len(), cached.len());
            Ok(merge_by_key(cached, fresh, |issue| Some(issue.number)))
        }
    }
}

pub fn pull_requests(gh: &mut GitHub, repo: &RepoId, max_pages: usize) -> Result<Vec<PullRequest>> {
    let url = gh.repo_url(repo, "/pulls?state=all");
    gh.paged(&url, repo, max_pages)
}

pub fn contributors(gh: &mut GitHub, repo: &RepoId) -> Result<Vec<Contributor>> {
    let url = gh.repo_url(repo, "/contributors");
    gh.paged(&url, repo, 0)
}

/// Commit listing, refreshed incrementally and enriched with `files`/`stats`
/// from commit detail. Only newly fetched commits are enriched on an
/// incremental run.
pub fn commits(
    gh: &mut GitHub,
    cache: &mut DetailCache,
    store: &DatasetStore,
    repo: &RepoId,
    lookback: chrono::Duration,
    max_pages: usize,
) -> Result<Vec<Commit>> {
    let base = gh.repo_url(repo, "/commits");
    let cached: Vec<Commit> = store.load_list(repo, Dataset::Commits);
    let since = since_from_cache(&cached, Commit::timestamp, lookback);
    let url = match since {
        Some(ts) => append_query(&base, "since", &since_param(ts)),
        None => base,
    };

    let mut fetched: Vec<Commit> = gh.paged(&url, repo, max_pages)?;

    match since {
        None => {
            enrich_commits(gh, cache, repo, &mut fetched, None);
            Ok(fetched)
        }
        Some(_) if fetched.is_empty() => {
            debug!("no new commits for {}", repo);
            Ok(cached)
        }
        Some(_) => {
            let fresh: HashSet<String> = fetched.iter().map(|c| c.sha.clone()).collect();
            info!("  merging {} new commit(s) into {} cached", fresh.len(), cached.len());
            let mut merged = merge_by_key(cached, fetched, |c| {
                (!c.sha.is_empty()).then(|| c.sha.clone())
            });
            enrich_commits(gh, cache, repo, &mut merged, Some(&fresh));
            Ok(merged)
        }
    }
}

fn enrich_commits(
    gh: &mut GitHub,
    cache: &mut DetailCache,
    repo: &RepoId,
    commits: &mut [Commit],
    only: Option<&HashSet<String>>,
) {
    for commit in commits.iter_mut() {
        if commit.sha.is_empty() || only.is_some_and(|set| !set.contains(&commit.sha)) {
            continue;
        }
        match cache.commit_detail(gh, repo, &commit.sha) {
            Ok(Some(detail)) => {
                commit.files = detail.files.clone();
                commit.stats = detail.stats.clone();
            }
            Ok(None) => {}
            Err(e) => warn!("[warn] commit detail failed for {}@{}: {:#}", repo, commit.sha, e),
        }
    }
}

pub fn pr_commits(gh: &mut GitHub, repo: &RepoId, number: u64) -> Result<Vec<Commit>> {
    let url = gh.repo_url(repo, &format!("/pulls/{}/commits", number));
    gh.paged(&url, repo, 0)
}

pub fn issue_comments(gh: &mut GitHub, repo: &RepoId, number: u64) -> Result<Vec<IssueComment>> {
    let url = gh.repo_url(repo, &format!("/issues/{}/comments", number));
    gh.paged(&url, repo, 0)
}

/// Uncached commit detail. `None` for any non-2xx (422 is an unknown sha).
pub fn fetch_commit_detail(gh: &mut GitHub, repo: &RepoId, sha: &str) -> Result<Option<Commit>> {
    let url = gh.repo_url(repo, &format!("/commits/{}", sha));
    let response = gh.get(&url)?;
    if response.status == 422 {
        debug!("invalid sha {} in {}", sha, repo);
        return Ok(None);
    }
    if !response.is_success() {
        return Ok(None);
    }
    let mut value: Value = response.json()?;
    tag_repo(&mut value, repo);
    Ok(Some(serde_json::from_value(value)?))
}

/// Uncached issue or PR detail. `None` when it does not resolve.
pub fn fetch_issue_details(gh: &mut GitHub, repo: &RepoId, number: u64) -> Result<Option<Issue>> {
    let url = gh.repo_url(repo, &format!("/issues/{}", number));
    let response = gh.get(&url)?;
    if !response.is_success() {
        return Ok(None);
    }
    let mut value: Value = response.json()?;
    tag_repo(&mut value, repo);
    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_transport, MockSender, RecordingSleeper};
    use serde_json::json;
    use tempfile::TempDir;

    fn github(sender: &MockSender) -> GitHub {
        let sleeper = RecordingSleeper::new();
        GitHub::new(mock_transport(sender, &sleeper, &["a"]), "https://api.test", 100)
    }

    fn repo() -> RepoId {
        RepoId::new("octo", "widgets")
    }

    fn lookback() -> chrono::Duration {
        chrono::Duration::seconds(300)
    }

    #[test]
    fn repo_meta_renames_full_name() {
        let sender = MockSender::new();
        sender.route_json(
            "/repos/octo/widgets",
            200,
            json!({"full_name": "octo/widgets", "default_branch": "trunk", "stargazers_count": 3}),
        );
        let meta = repo_meta(&mut github(&sender), &repo()).unwrap();
        assert_eq!(meta.repo_name, "octo/widgets");
        assert_eq!(meta.branch(), "trunk");
        assert!(!meta.extra.contains_key("full_name"));
        assert_eq!(meta.extra["stargazers_count"], 3);
    }

    #[test]
    fn repo_meta_failure_keeps_name() {
        let sender = MockSender::new();
        let meta = repo_meta(&mut github(&sender), &repo()).unwrap();
        assert_eq!(meta.repo_name, "octo/widgets");
        assert_eq!(meta.branch(), "main");
    }

    #[test]
    fn first_issue_fetch_is_full_and_drops_prs() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let sender = MockSender::new();
        sender.route_json(
            "/issues?state=all",
            200,
            json!([
                {"number": 1, "title": "bug"},
                {"number": 2, "title": "pr", "pull_request": {"url": "x"}},
            ]),
        );
        let mut gh = github(&sender);

        let got = issues(&mut gh, &store, &repo(), lookback()).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].number, 1);
        assert!(!sender.requests()[0].url.contains("since="));
    }

    #[test]
    fn incremental_issue_fetch_merges_by_number() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        store
            .save(
                &repo(),
                Dataset::Issues,
                &json!([
                    {"number": 1, "title": "one", "updated_at": "2024-01-01T00:00:00Z"},
                    {"number": 2, "title": "two", "updated_at": "2024-01-05T00:00:00Z"},
                    {"number": 3, "title": "three", "updated_at": "2024-01-03T00:00:00Z"},
                ]),
            )
            .unwrap();
        let sender = MockSender::new();
        sender.route_json(
            "since=2024-01-04T23%3A55%3A00Z",
            200,
            json!([
                {"number": 2, "title": "two, edited", "updated_at": "2024-01-06T00:00:00Z"},
                {"number": 4, "title": "four", "updated_at": "2024-01-06T01:00:00Z"},
            ]),
        );
        let mut gh = github(&sender);

        let got = issues(&mut gh, &store, &repo(), lookback()).unwrap();
        let numbers: Vec<u64> = got.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![4, 2, 1, 3]);
        assert_eq!(got[1].title.as_deref(), Some("two, edited"));
        assert_eq!(got[0].repo_name, "octo/widgets");
    }

    #[test]
    fn incremental_issue_fetch_without_updates_returns_cache() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        store
            .save(&repo(), Dataset::Issues, &json!([{"number": 1, "updated_at": "2024-01-01T00:00:00Z"}]))
            .unwrap();
        let sender = MockSender::new();
        sender.route_json("/issues?state=all", 200, json!([]));
        let mut gh = github(&sender);

        let got = issues(&mut gh, &store, &repo(), lookback()).unwrap();
        assert_eq!(got.len(), 1);
        assert!(sender.requests()[0].url.contains("since="));
    }

    #[test]
    fn commits_are_enriched_with_files() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let sender = MockSender::new();
        sender.route_json(
            "/commits?per_page",
            200,
            json!([{"sha": "c1", "commit": {"message": "first"}}]),
        );
        sender.route_json(
            "/commits/c1",
            200,
            json!({"sha": "c1", "files": [{"filename": "a.rs", "status": "added"}], "stats": {"total": 3}}),
        );
        let mut gh = github(&sender);
        let mut cache = DetailCache::new();

        let got = commits(&mut gh, &mut cache, &store, &repo(), lookback(), 0).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].changed_paths(), vec!["a.rs"]);
        assert_eq!(got[0].stats.as_ref().unwrap()["total"], 3);
        assert_eq!(got[0].repo_name, "octo/widgets");
    }

    #[test]
    fn incremental_commits_enrich_only_new_shas() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        store
            .save(
                &repo(),
                Dataset::Commits,
                &json!([{"sha": "old", "commit": {"author": {"date": "2024-02-01T00:00:00Z"}}, "files": []}]),
            )
            .unwrap();
        let sender = MockSender::new();
        sender.route_json(
            "/commits?since=",
            200,
            json!([{"sha": "new", "commit": {"author": {"date": "2024-02-02T00:00:00Z"}}}]),
        );
        sender.route_json("/commits/new", 200, json!({"sha": "new", "files": [{"filename": "b.rs"}]}));
        let mut gh = github(&sender);
        let mut cache = DetailCache::new();

        let got = commits(&mut gh, &mut cache, &store, &repo(), lookback(), 3).unwrap();
        let shas: Vec<&str> = got.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["new", "old"]);
        assert_eq!(got[0].changed_paths(), vec!["b.rs"]);
        assert_eq!(sender.count_matching("/commits/old"), 0);
    }
}
