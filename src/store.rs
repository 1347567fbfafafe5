//! Per-repository JSON datasets on disk.
//!
//! Layout: `{output}/{owner}_{name}/{dataset}.json`, one whole-file write per
//! dataset. Reads never fail: a missing or malformed file is an empty cache,
//! and list entries that no longer decode are skipped.

use anyhow::{Context, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::models::RepoId;

/// Every file the harvester writes for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    RepoMeta,
    Issues,
    PullRequests,
    Contributors,
    Commits,
    Blame,
    PrIssueLinks,
    CommitIssueLinks,
    CrossRepoLinks,
}

impl Dataset {
    pub const ALL: [Dataset; 9] = [
        Dataset::RepoMeta,
        Dataset::Issues,
        Dataset::PullRequests,
        Dataset::Contributors,
        Dataset::Commits,
        Dataset::Blame,
        Dataset::PrIssueLinks,
        Dataset::CommitIssueLinks,
        Dataset::CrossRepoLinks,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Dataset::RepoMeta => "repo_meta.json",
            Dataset::Issues => "issues.json",
            Dataset::PullRequests => "pull_requests.json",
            Dataset::Contributors => "contributors.json",
            Dataset::Commits => "commits.json",
            Dataset::Blame => "repo_blame.json",
            Dataset::PrIssueLinks => "prs_with_linked_issues.json",
            Dataset::CommitIssueLinks => "issues_closed_by_commits.json",
            Dataset::CrossRepoLinks => "cross_repo_links.json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Dataset::RepoMeta => "metadata",
            Dataset::Issues => "issues",
            Dataset::PullRequests => "pull requests",
            Dataset::Contributors => "contributors",
            Dataset::Commits => "commits",
            Dataset::Blame => "blame",
            Dataset::PrIssueLinks => "PR-issue links",
            Dataset::CommitIssueLinks => "commit-closes-issue links",
            Dataset::CrossRepoLinks => "cross-repo links",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repo_dir(&self, repo: &RepoId) -> PathBuf {
        self.root.join(repo.dir_name())
    }

    pub fn path(&self, repo: &RepoId, dataset: Dataset) -> PathBuf {
        self.repo_dir(repo).join(dataset.file_name())
    }

    /// Cached list for a dataset. Missing, malformed or non-array files are empty.
    pub fn load_list<T: DeserializeOwned>(&self, repo: &RepoId, dataset: Dataset) -> Vec<T> {
        let path = self.path(repo, dataset);
        let Some(Value::Array(items)) = read_json(&path) else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("[warn] dropping cached entry in {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    /// Cached document for a dataset, `None` when absent or unreadable.
    pub fn load_doc<T: DeserializeOwned>(&self, repo: &RepoId, dataset: Dataset) -> Option<T> {
        let path = self.path(repo, dataset);
        let value = read_json(&path)?;
        match serde_json::from_value(value) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("[warn] ignoring cached {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Overwrite a dataset file with pretty-printed JSON.
    pub fn save<T: Serialize + ?Sized>(&self, repo: &RepoId, dataset: Dataset, data: &T) -> Result<PathBuf> {
        let dir = self.repo_dir(repo);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        let path = dir.join(dataset.file_name());
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("[warn] ignoring malformed cache {}: {}", path.display(), e);
            None
        }
    }
}
