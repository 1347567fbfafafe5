//! Line-authorship ("blame") summaries per file.
//!
//! # Refresh
//!
//! The blame document on disk records the head commit it was computed at.
//! When the current head matches, the cached document is returned with a new
//! timestamp and no request is made. Otherwise the compare endpoint narrows
//! the work to files changed since the recorded head, plus any file that has
//! no cached blame yet.
//!
//! GraphQL blame needs a token; without one the document carries an `error`
//! marker instead of files.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use crate::cache::DetailCache;
use crate::config::BlameConfig;
use crate::github::GitHub;
use crate::models::{Commit, CommitFile, RepoId, RepoMeta, UserRef};
use crate::store::{Dataset, DatasetStore};

pub const NO_TOKEN_ERROR: &str = "GitHub token required for GraphQL blame queries";
pub const LIST_FILES_ERROR: &str = "Failed to list repository files";

const BLAME_BY_REF: &str = r#"query BlameByRef($owner: String!, $name: String!, $qualified: String!, $path: String!) {
  repository(owner: $owner, name: $name) {
    ref(qualifiedName: $qualified) {
      name
      target {
        __typename
        ... on Commit {
          oid
          blame(path: $path) {
            ranges {
              startingLine endingLine age
              commit { oid committedDate message author { name email user { login } } }
            }
          }
        }
      }
    }
  }
}"#;

const BLAME_BY_OBJECT: &str = r#"query BlameByObject($owner: String!, $name: String!, $ref: String!, $path: String!) {
  repository(owner: $owner, name: $name) {
    object(expression: $ref) {
      __typename
      ... on Commit {
        oid
        blame(path: $path) {
          ranges {
            startingLine endingLine age
            commit { oid committedDate message author { name email user { login } } }
          }
        }
      }
    }
  }
}"#;

// ---- GraphQL response shapes ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlameRange {
    #[serde(default)]
    pub starting_line: Option<u64>,
    #[serde(default)]
    pub ending_line: Option<u64>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub commit: Option<BlameCommit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlameCommit {
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub committed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub author: Option<BlameAuthor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlameAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
}

impl BlameRange {
    /// Inclusive `(start, end)`; a missing end means a one-line range.
    fn bounds(&self) -> (u64, u64) {
        let start = self.starting_line.unwrap_or(0);
        (start, self.ending_line.unwrap_or(start))
    }

    /// First non-empty of login, name and email, else `"unknown"`.
    fn who(&self) -> String {
        let Some(author) = self.commit.as_ref().and_then(|c| c.author.as_ref()) else {
            return "unknown".to_string();
        };
        let login = author.user.as_ref().and_then(|u| u.login.as_deref());
        [login, author.name.as_deref(), author.email.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }

    /// First line of the commit message, trimmed.
    fn headline(&self) -> String {
        self.commit
            .as_ref()
            .and_then(|c| c.message.as_deref())
            .and_then(|m| m.lines().next())
            .unwrap_or("")
            .trim()
            .to_string()
    }

    fn sha(&self) -> Option<&str> {
        self.commit.as_ref().and_then(|c| c.oid.as_deref())
    }
}

/// Ranges of one file at a ref, plus the commit the ref resolved to.
#[derive(Debug, Clone, Default)]
pub struct RawBlame {
    pub root_commit_oid: Option<String>,
    pub ranges: Vec<BlameRange>,
}

// ---- Stored document ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: u64,
    pub end: u64,
    pub count: u64,
}

impl LineSpan {
    fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            count: end.saturating_add(1).saturating_sub(start),
        }
    }
}

/// The commit behind a blamed range, as found in the commit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingCommit {
    pub repo_name: String,
    pub sha: String,
    pub html_url: Option<String>,
    pub author_login: Option<String>,
    pub commit_author: Option<String>,
    pub files_changed: Vec<String>,
    pub files_changed_count: usize,
}

impl MatchingCommit {
    pub fn from_commit(commit: &Commit) -> Self {
        let files_changed = commit.changed_paths();
        Self {
            repo_name: commit.repo_name.clone(),
            sha: commit.sha.clone(),
            html_url: commit.html_url.clone(),
            author_login: commit.author.as_ref().and_then(|u| u.login.clone()),
            commit_author: commit.commit.author.as_ref().and_then(|a| a.name.clone()),
            files_changed_count: files_changed.len(),
            files_changed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlameExample {
    pub lines: LineSpan,
    pub commit_sha: Option<String>,
    pub committed_date: Option<DateTime<Utc>>,
    pub who: String,
    pub message: String,
    pub matching_commit: Option<MatchingCommit>,
}

/// One blamed range of an author, with the commit behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRange {
    #[serde(flatten)]
    pub lines: LineSpan,
    #[serde(default)]
    pub age: Option<i64>,
    pub commit_sha: Option<String>,
    pub committed_date: Option<DateTime<Utc>>,
    pub message: String,
    pub matching_commit: Option<MatchingCommit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorBlame {
    pub author: String,
    pub total_lines: u64,
    pub ranges: Vec<AuthorRange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlameSummary {
    pub total_lines: u64,
    pub ranges_count: usize,
    pub authors: Vec<AuthorBlame>,
    pub examples: Vec<BlameExample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBlame {
    pub path: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub root_commit_oid: Option<String>,
    pub ranges_count: usize,
    pub total_lines: u64,
    #[serde(default)]
    pub authors: Vec<AuthorBlame>,
    #[serde(default)]
    pub examples: Vec<BlameExample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlameDocument {
    pub repo_name: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub files: Vec<FileBlame>,
    pub generated_at: String,
    #[serde(default)]
    pub head_commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlameDocument {
    fn new(repo: &RepoId, git_ref: &str, head: Option<String>, files: Vec<FileBlame>) -> Self {
        Self {
            repo_name: repo.full_name(),
            git_ref: git_ref.to_string(),
            files,
            generated_at: timestamp_now(),
            head_commit_sha: head,
            error: None,
        }
    }

    fn failed(repo: &RepoId, git_ref: &str, head: Option<String>, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(repo, git_ref, head, Vec::new())
        }
    }

    /// Head the document was computed at. Documents written without one
    /// fall back to the first file's root commit.
    pub fn recorded_head(&self) -> Option<&str> {
        self.head_commit_sha
            .as_deref()
            .or_else(|| self.files.first().and_then(|f| f.root_commit_oid.as_deref()))
            .filter(|s| !s.is_empty())
    }
}

fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ---- Aggregation ----

/// Per-author line totals in descending order (ties keep first-seen order)
/// and the first `example_limit` ranges in API order.
///
/// `lookup` resolves a commit sha to its entry in the commit history. It runs
/// once per distinct sha and every range carries the result.
pub fn summarize<F>(ranges: &[BlameRange], example_limit: usize, mut lookup: F) -> BlameSummary
where
    F: FnMut(&str) -> Option<MatchingCommit>,
{
    let mut authors: Vec<AuthorBlame> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut resolved: HashMap<String, Option<MatchingCommit>> = HashMap::new();
    let mut examples = Vec::new();
    let mut total_lines = 0;

    for range in ranges {
        let (start, end) = range.bounds();
        let span = LineSpan::new(start, end);
        let who = range.who();
        total_lines += span.count;

        let commit_sha = range.sha().map(str::to_string);
        let matching_commit = match commit_sha.as_deref() {
            Some(sha) => {
                if !resolved.contains_key(sha) {
                    let found = lookup(sha);
                    resolved.insert(sha.to_string(), found);
                }
                resolved.get(sha).cloned().flatten()
            }
            None => None,
        };
        let entry = AuthorRange {
            lines: span,
            age: range.age,
            commit_sha,
            committed_date: range.commit.as_ref().and_then(|c| c.committed_date),
            message: range.headline(),
            matching_commit,
        };

        if examples.len() < example_limit {
            examples.push(BlameExample {
                lines: span,
                commit_sha: entry.commit_sha.clone(),
                committed_date: entry.committed_date,
                who: who.clone(),
                message: entry.message.clone(),
                matching_commit: entry.matching_commit.clone(),
            });
        }

        let slot = *index.entry(who.clone()).or_insert_with(|| {
            authors.push(AuthorBlame {
                author: who,
                total_lines: 0,
                ranges: Vec::new(),
            });
            authors.len() - 1
        });
        authors[slot].total_lines += span.count;
        authors[slot].ranges.push(entry);
    }

    authors.sort_by(|a, b| b.total_lines.cmp(&a.total_lines));

    BlameSummary {
        total_lines,
        ranges_count: ranges.len(),
        authors,
        examples,
    }
}

// ---- Remote calls ----

/// Blob paths of the tree at `branch`, in tree order.
pub fn list_repo_files(gh: &mut GitHub, repo: &RepoId, branch: &str) -> Result<Vec<String>> {
    let url = gh.repo_url(repo, &format!("/git/trees/{}?recursive=1", branch));
    let response = gh.get(&url)?;
    if !response.is_success() {
        bail!("{}: HTTP {} for {}", LIST_FILES_ERROR, response.status, url);
    }

    let tree: Value = response.json()?;
    if tree.get("truncated").and_then(Value::as_bool).unwrap_or(false) {
        warn!("[warn] file tree of {} is truncated; blame covers a partial listing", repo);
    }
    Ok(tree
        .get("tree")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("blob"))
        .filter_map(|entry| entry.get("path").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

fn qualified_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

fn commit_blame(target: Option<&Value>) -> Result<Option<RawBlame>> {
    let Some(target) = target else {
        return Ok(None);
    };
    if target.get("__typename").and_then(Value::as_str) != Some("Commit") {
        return Ok(None);
    }
    let Some(ranges) = target.pointer("/blame/ranges") else {
        return Ok(None);
    };
    Ok(Some(RawBlame {
        root_commit_oid: target.get("oid").and_then(Value::as_str).map(str::to_string),
        ranges: serde_json::from_value(ranges.clone())?,
    }))
}

/// Blame of `path` at `branch`. The qualified ref is tried first, then the
/// branch as a revision expression. `None` when neither resolves to a commit.
pub fn fetch_file_blame(gh: &mut GitHub, repo: &RepoId, branch: &str, path: &str) -> Result<Option<RawBlame>> {
    let by_ref = gh.graphql(
        BLAME_BY_REF,
        json!({
            "owner": repo.owner,
            "name": repo.name,
            "qualified": qualified_ref(branch),
            "path": path,
        }),
    );
    match by_ref {
        Ok(data) => {
            if let Some(blame) = commit_blame(data.pointer("/repository/ref/target"))? {
                return Ok(Some(blame));
            }
        }
        Err(e) => debug!("blame by ref failed for {}:{}: {:#}", repo, path, e),
    }

    let data = gh.graphql(
        BLAME_BY_OBJECT,
        json!({
            "owner": repo.owner,
            "name": repo.name,
            "ref": branch,
            "path": path,
        }),
    )?;
    commit_blame(data.pointer("/repository/object"))
}

/// Files changed between two commits. `None` when the comparison is unavailable.
pub fn changed_files_between(
    gh: &mut GitHub,
    repo: &RepoId,
    base: &str,
    head: &str,
) -> Result<Option<Vec<CommitFile>>> {
    if base == head {
        return Ok(Some(Vec::new()));
    }
    let url = gh.repo_url(repo, &format!("/compare/{}...{}", base, head));
    let response = gh.get(&url)?;
    if !response.is_success() {
        return Ok(None);
    }
    let body: Value = response.json()?;
    let files = match body.get("files") {
        Some(files) => serde_json::from_value(files.clone())?,
        None => Vec::new(),
    };
    Ok(Some(files))
}

/// Tree paths to blame: excludes applied first, then the file limit.
fn select_files(paths: Vec<String>, config: &BlameConfig) -> Result<Vec<String>> {
    let excludes = config.exclude_set()?;
    let selected = paths.into_iter().filter(|p| !excludes.is_match(p));
    Ok(if config.file_limit > 0 {
        selected.take(config.file_limit).collect()
    } else {
        selected.collect()
    })
}

/// Blame document for the repository's default branch, reusing the cached
/// document where the head commit allows it.
///
/// `commits` is the commit history, newest first; its first sha is the head.
pub fn collect_repo_blame(
    gh: &mut GitHub,
    cache: &mut DetailCache,
    store: &DatasetStore,
    repo: &RepoId,
    meta: &RepoMeta,
    commits: &[Commit],
    config: &BlameConfig,
) -> Result<BlameDocument> {
    let branch = meta.branch().to_string();
    let head = commits
        .first()
        .map(|c| c.sha.clone())
        .filter(|sha| !sha.is_empty());

    if !gh.has_credentials() {
        warn!("[warn] skipping blame for {}: no token configured", repo);
        return Ok(BlameDocument::failed(repo, &branch, head, NO_TOKEN_ERROR));
    }

    let cached: Option<BlameDocument> = store
        .load_doc::<BlameDocument>(repo, Dataset::Blame)
        .filter(|doc| doc.error.is_none());
    let cached_head = cached.as_ref().and_then(|d| d.recorded_head()).map(str::to_string);

    if let (Some(doc), Some(current)) = (&cached, &head) {
        if cached_head.as_deref() == Some(current.as_str()) {
            info!("  blame unchanged at {} ({} files)", current, doc.files.len());
            let mut doc = doc.clone();
            doc.generated_at = timestamp_now();
            doc.head_commit_sha = Some(current.clone());
            return Ok(doc);
        }
    }

    let paths = match list_repo_files(gh, repo, &branch) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("[warn] {:#}", e);
            return Ok(BlameDocument::failed(repo, &branch, head, LIST_FILES_ERROR));
        }
    };
    let desired = select_files(paths, config)?;
    let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let mut known: HashMap<String, FileBlame> = cached
        .map(|doc| doc.files)
        .unwrap_or_default()
        .into_iter()
        .filter(|f| wanted.contains(f.path.as_str()))
        .map(|f| (f.path.clone(), f))
        .collect();

    let mut stale: HashSet<String> = desired
        .iter()
        .filter(|p| !known.contains_key(p.as_str()))
        .cloned()
        .collect();

    if let (Some(base), Some(current)) = (&cached_head, &head) {
        let changes = changed_files_between(gh, repo, base, current).unwrap_or_else(|e| {
            warn!("[warn] compare {}...{} failed: {:#}", base, current, e);
            None
        });
        match changes {
            Some(changes) => {
                for change in changes {
                    match change.status.as_deref() {
                        Some("removed") => {
                            known.remove(&change.filename);
                            if let Some(prev) = &change.previous_filename {
                                known.remove(prev);
                            }
                        }
                        Some("renamed") => {
                            if let Some(prev) = &change.previous_filename {
                                known.remove(prev);
                            }
                        }
                        _ => {}
                    }
                    if wanted.contains(change.filename.as_str()) {
                        stale.insert(change.filename.clone());
                    }
                }
            }
            None => stale.extend(desired.iter().cloned()),
        }
    }

    if stale.is_empty() {
        info!("  blame up to date for {} files", known.len());
    } else {
        info!("  refreshing blame for {} of {} files", stale.len(), desired.len());
    }

    let by_sha: HashMap<&str, &Commit> = commits.iter().map(|c| (c.sha.as_str(), c)).collect();

    for path in desired.iter().filter(|p| stale.contains(p.as_str())) {
        let raw = match fetch_file_blame(gh, repo, &branch, path) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("[warn] no blame for {}:{}", repo, path);
                continue;
            }
            Err(e) => {
                warn!("[warn] blame failed for {}:{}: {:#}", repo, path, e);
                continue;
            }
        };
        if raw.ranges.is_empty() {
            warn!("[warn] empty blame for {}:{}", repo, path);
            continue;
        }

        let summary = summarize(&raw.ranges, config.example_limit, |sha| {
            if let Some(commit) = by_sha.get(sha) {
                return Some(MatchingCommit::from_commit(commit));
            }
            match cache.commit_detail(gh, repo, sha) {
                Ok(detail) => detail.map(MatchingCommit::from_commit),
                Err(e) => {
                    warn!("[warn] commit detail failed for {}@{}: {:#}", repo, sha, e);
                    None
                }
            }
        });

        known.insert(
            path.clone(),
            FileBlame {
                path: path.clone(),
                git_ref: branch.clone(),
                root_commit_oid: raw.root_commit_oid,
                ranges_count: summary.ranges_count,
                total_lines: summary.total_lines,
                authors: summary.authors,
                examples: summary.examples,
            },
        );
    }

    let files = desired
        .iter()
        .filter_map(|p| known.remove(p.as_str()))
        .collect();
    Ok(BlameDocument::new(repo, &branch, head, files))
}
