//! Typed records for every entity the harvester fetches or writes.
//!
//! The REST payloads carry far more fields than the harvester reads. Each
//! record names the fields the pipeline actually uses and keeps the rest in a
//! flattened `extra` map, so the JSON written to disk still carries the full
//! upstream document for the indexing side.
//!
//! Every list-shaped record has a `repo_name` field (`"owner/name"`) that is
//! stamped at fetch time by [`crate::paginate`].

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Upstream fields the harvester does not interpret.
pub type Extra = Map<String, Value>;

/// Repository identity, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Output directory name, `{owner}_{name}`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }

    /// Case-insensitive comparison key.
    pub fn key(&self) -> String {
        self.full_name().to_lowercase()
    }

    pub fn matches(&self, full_name: &str) -> bool {
        self.key() == full_name.trim().to_lowercase()
    }
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let Some((owner, name)) = raw.trim().split_once('/') else {
            bail!("expected owner/name, got '{}'", raw);
        };
        let (owner, name) = (owner.trim(), name.trim());
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("expected owner/name, got '{}'", raw);
        }
        Ok(Self::new(owner, name))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserRef {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// `GET /repos/{owner}/{repo}` with `full_name` renamed to `repo_name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoMeta {
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl RepoMeta {
    pub fn branch(&self) -> &str {
        match self.default_branch.as_deref() {
            Some(branch) if !branch.is_empty() => branch,
            _ => "main",
        }
    }
}

/// An issue, or the issue view of a pull request when `pull_request` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<Value>,
    #[serde(default)]
    pub repo_name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn author_login(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.login.as_deref())
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.updated_at)
    }

    /// Newest of `updated_at`, `closed_at`, `created_at`.
    pub fn latest_activity(&self) -> Option<DateTime<Utc>> {
        [self.updated_at, self.closed_at, self.created_at]
            .into_iter()
            .flatten()
            .max()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<bool>,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub repo_name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl PullRequest {
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some() || self.merged.unwrap_or(false)
    }

    pub fn author_login(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.login.as_deref())
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.updated_at)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GitSignature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub author: Option<GitSignature>,
    #[serde(default)]
    pub committer: Option<GitSignature>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A changed file as reported by commit detail and compare endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitFile {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_filename: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Commit listing entry. Commit detail responses share the shape and add
/// `files` and `stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    #[serde(default)]
    pub commit: CommitInfo,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<CommitFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(default)]
    pub repo_name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Commit {
    pub fn message(&self) -> &str {
        self.commit.message.as_deref().unwrap_or("")
    }

    /// Account login when GitHub matched one, else the git author name.
    pub fn author_name(&self) -> Option<&str> {
        self.author
            .as_ref()
            .and_then(|u| u.login.as_deref())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.commit
                    .author
                    .as_ref()
                    .and_then(|a| a.name.as_deref())
                    .filter(|s| !s.is_empty())
            })
    }

    /// Newest of the author and committer dates.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        [&self.commit.author, &self.commit.committer]
            .into_iter()
            .filter_map(|sig| sig.as_ref().and_then(|s| s.date))
            .max()
    }

    pub fn changed_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .flatten()
            .filter(|f| !f.filename.is_empty())
            .map(|f| f.filename.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub contributions: Option<u64>,
    #[serde(default)]
    pub repo_name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub repo_name: String,
    #[serde(flatten)]
    pub extra: Extra,
}
