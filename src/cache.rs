//! Run-scoped memo of single-resource lookups.
//!
//! Commit details and issue/PR details are requested repeatedly while linking
//! (the same merge commit, the same referenced issue). One [`DetailCache`] is
//! created per harvest run and passed by `&mut` to whoever needs a lookup.
//! Negative results (`404`, `410`, `422`) are cached as `None`; transport
//! failures are not cached, so a later call retries them.

use anyhow::Result;
use std::collections::HashMap;

use crate::collect;
use crate::github::GitHub;
use crate::models::{Commit, Issue, RepoId};

#[derive(Debug, Default)]
pub struct DetailCache {
    commits: HashMap<String, Option<Commit>>,
    issues: HashMap<String, Option<Issue>>,
    hits: usize,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `GET /repos/{repo}/commits/{sha}`, memoized by repository and sha.
    pub fn commit_detail(&mut self, gh: &mut GitHub, repo: &RepoId, sha: &str) -> Result<Option<&Commit>> {
        let key = format!("{}@{}", repo.key(), sha);
        if self.commits.contains_key(&key) {
            self.hits += 1;
        } else {
            let detail = collect::fetch_commit_detail(gh, repo, sha)?;
            self.commits.insert(key.clone(), detail);
        }
        Ok(self.commits.get(&key).and_then(Option::as_ref))
    }

    /// `GET /repos/{repo}/issues/{number}`, memoized case-insensitively.
    pub fn issue_details(&mut self, gh: &mut GitHub, repo: &RepoId, number: u64) -> Result<Option<&Issue>> {
        let key = format!("{}#{}", repo.key(), number);
        if self.issues.contains_key(&key) {
            self.hits += 1;
        } else {
            let detail = collect::fetch_issue_details(gh, repo, number)?;
            self.issues.insert(key.clone(), detail);
        }
        Ok(self.issues.get(&key).and_then(Option::as_ref))
    }

    pub fn commit_entries(&self) -> usize {
        self.commits.len()
    }

    pub fn issue_entries(&self) -> usize {
        self.issues.len()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_transport, MockSender, RecordingSleeper};
    use serde_json::json;

    fn github(sender: &MockSender) -> GitHub {
        let sleeper = RecordingSleeper::new();
        GitHub::new(mock_transport(sender, &sleeper, &["a"]), "https://api.test", 100)
    }

    #[test]
    fn commit_detail_is_fetched_once() {
        let sender = MockSender::new();
        sender.route_json(
            "/commits/abc",
            200,
            json!({"sha": "abc", "files": [{"filename": "src/lib.rs"}]}),
        );
        let mut gh = github(&sender);
        let mut cache = DetailCache::new();
        let repo = RepoId::new("o", "r");

        for _ in 0..3 {
            let detail = cache.commit_detail(&mut gh, &repo, "abc").unwrap().unwrap();
            assert_eq!(detail.changed_paths(), vec!["src/lib.rs"]);
            assert_eq!(detail.repo_name, "o/r");
        }
        assert_eq!(sender.request_count(), 1);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn missing_resources_are_cached_as_none() {
        let sender = MockSender::new();
        sender.route_json("/commits/bad", 422, json!({"message": "No commit found for SHA: bad"}));
        let mut gh = github(&sender);
        let mut cache = DetailCache::new();
        let repo = RepoId::new("o", "r");

        assert!(cache.commit_detail(&mut gh, &repo, "bad").unwrap().is_none());
        assert!(cache.commit_detail(&mut gh, &repo, "bad").unwrap().is_none());
        assert!(cache.issue_details(&mut gh, &repo, 9).unwrap().is_none());
        assert!(cache.issue_details(&mut gh, &RepoId::new("O", "R"), 9).unwrap().is_none());
        assert_eq!(sender.request_count(), 2);
        assert_eq!(cache.commit_entries(), 1);
        assert_eq!(cache.issue_entries(), 1);
    }
}
