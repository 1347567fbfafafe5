//! End-to-end harvest against a scripted GitHub.

use forge_harvest::config::Config;
use forge_harvest::github::GitHub;
use forge_harvest::models::RepoId;
use forge_harvest::pipeline::{Harvester, RepoOutcome};
use forge_harvest::store::{Dataset, DatasetStore};
use forge_harvest::testing::{mock_transport, MockSender, RecordingSleeper};
use forge_harvest::transport::ApiResponse;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

fn scripted_github() -> MockSender {
    let sender = MockSender::new();
    sender.route_json(
        "/issues?state=all",
        200,
        json!([{
            "number": 1,
            "title": "Crash on empty input",
            "body": "Same as upstream other/lib#4",
            "user": {"login": "ana"},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        }]),
    );
    sender.route_json(
        "/pulls?state=all",
        200,
        json!([{
            "number": 2,
            "title": "Handle empty input",
            "body": "Fixes #1",
            "user": {"login": "bo"},
            "state": "closed",
            "created_at": "2024-01-02T00:00:00Z",
            "merged_at": "2024-01-03T00:00:00Z",
            "merge_commit_sha": "h1",
        }]),
    );
    sender.route_json(
        "/pulls/2/commits?per_page",
        200,
        json!([{"sha": "c1", "commit": {"message": "guard against empty slices"}}]),
    );
    sender.route_json("/contributors", 200, json!([{"login": "bo", "contributions": 7}]));
    sender.route_json(
        "/commits?per_page",
        200,
        json!([{
            "sha": "h1",
            "author": {"login": "bo"},
            "commit": {"message": "Merge pull request #2\n\nFixes #1",
                       "author": {"name": "Bo", "date": "2024-01-03T00:00:00Z"}},
        }]),
    );
    sender.route_json(
        "/commits/h1",
        200,
        json!({
            "sha": "h1",
            "commit": {"message": "Merge pull request #2\n\nFixes #1"},
            "files": [{"filename": "src/lib.rs", "status": "modified"}],
            "stats": {"total": 4},
        }),
    );
    sender.route_json(
        "/git/trees/main",
        200,
        json!({"tree": [{"path": "src/lib.rs", "type": "blob"}], "truncated": false}),
    );
    sender.route_json(
        "BlameByRef",
        200,
        json!({"data": {"repository": {"ref": {"name": "main", "target": {
            "__typename": "Commit",
            "oid": "h1",
            "blame": {"ranges": [
                {"startingLine": 1, "endingLine": 10,
                 "commit": {"oid": "h1", "message": "Merge pull request #2", "author": {"user": {"login": "bo"}}}},
            ]},
        }}}}}),
    );
    sender.route_json(
        "/repos/other/lib/issues/4",
        200,
        json!({"number": 4, "user": {"login": "upstream-dev"}, "html_url": "https://github.com/other/lib/issues/4"}),
    );
    sender
}

fn harvester(sender: &MockSender, sleeper: &RecordingSleeper, dir: &Path) -> Harvester {
    let gh = GitHub::new(mock_transport(sender, sleeper, &["tok"]), "https://api.test", 100);
    Harvester::new(gh, DatasetStore::new(dir), Config::default())
}

fn read(store: &DatasetStore, repo: &RepoId, dataset: Dataset) -> Value {
    let content = std::fs::read_to_string(store.path(repo, dataset)).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[test]
fn full_then_incremental_run() {
    let tmp = TempDir::new().unwrap();
    let sender = scripted_github();
    let sleeper = RecordingSleeper::new();
    let repo = RepoId::new("o", "r");
    let store = DatasetStore::new(tmp.path());

    let mut first = harvester(&sender, &sleeper, tmp.path());
    let outcomes = first.run(std::slice::from_ref(&repo));
    assert!(
        matches!(outcomes[0], RepoOutcome::Completed(_)),
        "{:?}",
        outcomes[0]
    );

    let meta = read(&store, &repo, Dataset::RepoMeta);
    assert_eq!(meta["repo_name"], "o/r");

    let commits = read(&store, &repo, Dataset::Commits);
    assert_eq!(commits[0]["files"][0]["filename"], "src/lib.rs");
    assert_eq!(commits[0]["repo_name"], "o/r");

    let pr_links = read(&store, &repo, Dataset::PrIssueLinks);
    let links = pr_links[0]["links"].as_array().unwrap();
    assert!(links.iter().all(|l| l["issue_author"] == "ana" || l["issue_number"] != 1));
    let auto_closing: Vec<&Value> = links
        .iter()
        .filter(|l| l["would_auto_close"] == true)
        .collect();
    assert!(!auto_closing.is_empty());
    assert!(links.iter().any(|l| l["reference_type"] == "merge_commit_message"));
    // #1 is a local issue, so its author needed no lookup.
    assert_eq!(sender.count_matching("/repos/o/r/issues/1"), 0);

    let commit_links = read(&store, &repo, Dataset::CommitIssueLinks);
    assert_eq!(commit_links.as_array().unwrap().len(), 1);
    assert_eq!(commit_links[0]["has_closing_kw"], true);

    let cross = read(&store, &repo, Dataset::CrossRepoLinks);
    assert_eq!(cross.as_array().unwrap().len(), 1);
    assert_eq!(cross[0]["target"]["author"], "upstream-dev");
    assert_eq!(cross[0]["reference"]["found_in"], "issue_body");

    let blame = read(&store, &repo, Dataset::Blame);
    assert_eq!(blame["head_commit_sha"], "h1");
    assert_eq!(blame["files"][0]["authors"][0]["author"], "bo");
    assert_eq!(blame["files"][0]["total_lines"], 10);

    // Second run: narrowed listings, no new commits, blame reused.
    let mut second = harvester(&sender, &sleeper, tmp.path());
    let outcomes = second.run(std::slice::from_ref(&repo));
    assert!(outcomes[0].is_completed());

    let issue_requests: Vec<String> = sender
        .requests()
        .into_iter()
        .map(|r| r.url)
        .filter(|u| u.contains("/issues?state=all"))
        .collect();
    assert_eq!(issue_requests.len(), 2);
    assert!(!issue_requests[0].contains("since="));
    assert!(issue_requests[1].contains("since=2023-12-31T23%3A55%3A00Z"));

    assert_eq!(sender.count_matching("BlameByRef"), 1);
    assert_eq!(sender.count_matching("/git/trees/"), 1);
    let commits = read(&store, &repo, Dataset::Commits);
    assert_eq!(commits.as_array().unwrap().len(), 1);
    assert!(sleeper.durations().is_empty());
}

#[test]
fn empty_repository_still_completes() {
    let tmp = TempDir::new().unwrap();
    let sender = MockSender::new();
    sender.route_json("/issues?state=all", 200, json!([]));
    sender.route_json("/pulls?state=all", 200, json!([]));
    sender.route("/contributors", ApiResponse::new(204, ""));
    sender.route_json("/commits?per_page", 200, json!([]));
    let sleeper = RecordingSleeper::new();
    let repo = RepoId::new("o", "empty");
    let store = DatasetStore::new(tmp.path());

    let mut h = harvester(&sender, &sleeper, tmp.path());
    let outcome = h.process_repo(&repo);
    let RepoOutcome::Completed(report) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(report.written(), Dataset::ALL.to_vec());
    assert_eq!(report.count(Dataset::Contributors), Some(0));
    assert_eq!(read(&store, &repo, Dataset::Contributors), json!([]));
    assert_eq!(read(&store, &repo, Dataset::CommitIssueLinks), json!([]));
    assert!(sleeper.durations().is_empty());
}
