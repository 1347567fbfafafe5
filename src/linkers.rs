//! Derived relations between issues, pull requests and commits.
//!
//! - [`find_prs_with_linked_issues`]: issue references of each PR, gathered
//!   from the PR text, its commits and its merge commit.
//! - [`find_issues_closed_by_repo_commits`]: commits whose message closes an
//!   issue.
//! - [`find_cross_repo_links`]: issues and PRs mentioning `owner/repo#N` in a
//!   different repository.
//!
//! Referenced issues are resolved once per distinct target through the
//! run's [`DetailCache`], however many times they are mentioned.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::cache::DetailCache;
use crate::collect;
use crate::github::GitHub;
use crate::models::{Commit, Issue, PullRequest, RepoId};
use crate::refs::{self, IssueRef};

/// Where a PR's issue reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    PrText,
    CommitMessage,
    MergeCommitMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueLink {
    pub referenced_repo: String,
    pub issue_number: u64,
    pub reference_type: ReferenceSource,
    #[serde(rename = "has_closing_kw")]
    pub has_closing_keyword: bool,
    pub would_auto_close: bool,
    pub issue_author: Option<String>,
}

/// One PR with at least one issue reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrIssueLinks {
    pub repo_name: String,
    pub pr_number: u64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub state: Option<String>,
    pub merged: bool,
    pub links: Vec<IssueLink>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitIssueLink {
    pub repo_name: String,
    pub commit_sha: String,
    pub commit_url: Option<String>,
    pub commit_author: Option<String>,
    pub referenced_repo: String,
    pub issue_number: u64,
    pub issue_author: Option<String>,
    pub reference_type: ReferenceSource,
    #[serde(rename = "has_closing_kw")]
    pub has_closing_keyword: bool,
    pub would_auto_close: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Issue,
    PullRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoundIn {
    IssueTitle,
    IssueBody,
    IssueComment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSource {
    pub repo_name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub number: u64,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSite {
    pub found_in: FoundIn,
    pub seen_at: Option<DateTime<Utc>>,
    pub cross_ref_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkTarget {
    pub repo_name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub number: u64,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossRepoLink {
    pub source: LinkSource,
    pub reference: ReferenceSite,
    pub target: LinkTarget,
}

/// Case-insensitive `(repo, number)` identity of a referenced issue.
type TargetKey = (String, u64);

fn target_key(repo: &str, number: u64) -> TargetKey {
    (repo.to_lowercase(), number)
}

/// Resolved view of a referenced issue or PR.
#[derive(Debug, Clone, Default)]
struct TargetInfo {
    is_pull_request: bool,
    url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    author: Option<String>,
}

impl TargetInfo {
    fn from_issue(issue: &Issue) -> Self {
        Self {
            is_pull_request: issue.is_pull_request(),
            url: issue.html_url.clone(),
            created_at: issue.opened_at(),
            author: issue.author_login().map(str::to_string),
        }
    }
}

/// Look up a referenced issue. Unparseable names, missing targets and
/// transport failures all resolve to `None`.
fn resolve_target(
    gh: &mut GitHub,
    cache: &mut DetailCache,
    repo_name: &str,
    number: u64,
) -> Option<TargetInfo> {
    let target: RepoId = match repo_name.parse() {
        Ok(target) => target,
        Err(e) => {
            warn!("[warn] cannot resolve {}#{}: {}", repo_name, number, e);
            return None;
        }
    };
    match cache.issue_details(gh, &target, number) {
        Ok(details) => details.map(TargetInfo::from_issue),
        Err(e) => {
            warn!("[warn] failed to fetch issue {}#{}: {:#}", repo_name, number, e);
            None
        }
    }
}

fn pr_link(reference: &IssueRef, repo: &RepoId, source: ReferenceSource, merged: bool) -> IssueLink {
    IssueLink {
        referenced_repo: reference.repo_or(repo),
        issue_number: reference.number,
        reference_type: source,
        has_closing_keyword: reference.has_closing_keyword,
        would_auto_close: merged && reference.has_closing_keyword,
        issue_author: None,
    }
}

/// Squash merges repeat the commit messages already scanned, so the merge
/// commit is only read for short bodies or bodies that don't mention squash.
fn wants_merge_commit(pr: &PullRequest) -> bool {
    let body = pr.body.as_deref().unwrap_or("");
    body.chars().count() < 10 || !body.to_lowercase().contains("squash")
}

/// PRs referencing issues, in PR order.
///
/// `local_issues` seeds the author table for references into `repo`.
/// `max_prs > 0` restricts the scan to the newest PRs by creation time.
pub fn find_prs_with_linked_issues(
    gh: &mut GitHub,
    cache: &mut DetailCache,
    repo: &RepoId,
    prs: &[PullRequest],
    local_issues: &[Issue],
    max_prs: usize,
) -> Result<Vec<PrIssueLinks>> {
    let mut candidates: Vec<&PullRequest> = prs.iter().collect();
    if max_prs > 0 && candidates.len() > max_prs {
        candidates.sort_by_key(|pr| Reverse(pr.opened_at()));
        candidates.truncate(max_prs);
        info!(
            "  limiting PR linkage scan to {} of {} PRs (max_prs_with_linked_issues={})",
            candidates.len(),
            prs.len(),
            max_prs
        );
    }

    let mut authors: HashMap<TargetKey, Option<String>> = local_issues
        .iter()
        .map(|issue| {
            (
                target_key(&repo.full_name(), issue.number),
                issue.author_login().map(str::to_string),
            )
        })
        .collect();
    let mut pr_commits: HashMap<u64, Vec<Commit>> = HashMap::new();
    let mut found: Vec<PrIssueLinks> = Vec::new();

    for pr in candidates {
        let merged = pr.is_merged();
        let title = pr.title.as_deref().unwrap_or("");
        let body = pr.body.as_deref().unwrap_or("");
        let mut links: Vec<IssueLink> = Vec::new();

        for r in refs::extract_issue_refs(&format!("{}\n{}", title, body)) {
            links.push(pr_link(&r, repo, ReferenceSource::PrText, merged));
        }

        if !pr_commits.contains_key(&pr.number) {
            let commits = collect::pr_commits(gh, repo, pr.number).unwrap_or_else(|e| {
                warn!("[warn] commits of PR #{} unavailable: {:#}", pr.number, e);
                Vec::new()
            });
            pr_commits.insert(pr.number, commits);
        }
        for commit in pr_commits.get(&pr.number).into_iter().flatten() {
            for r in refs::extract_issue_refs(commit.message()) {
                links.push(pr_link(&r, repo, ReferenceSource::CommitMessage, merged));
            }
        }

        if let Some(sha) = pr.merge_commit_sha.as_deref().filter(|s| !s.is_empty()) {
            if wants_merge_commit(pr) {
                match cache.commit_detail(gh, repo, sha) {
                    Ok(Some(detail)) => {
                        for r in refs::extract_issue_refs(detail.message()) {
                            links.push(pr_link(&r, repo, ReferenceSource::MergeCommitMessage, merged));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("[warn] merge commit {} of PR #{} unavailable: {:#}", sha, pr.number, e),
                }
            }
        }

        if !links.is_empty() {
            found.push(PrIssueLinks {
                repo_name: repo.full_name(),
                pr_number: pr.number,
                title: pr.title.clone(),
                author: pr.author_login().map(str::to_string),
                state: pr.state.clone(),
                merged,
                links,
                url: pr.html_url.clone(),
                created_at: pr.opened_at(),
            });
        }
    }

    // Resolve each distinct target once.
    for entry in &found {
        for link in &entry.links {
            let key = target_key(&link.referenced_repo, link.issue_number);
            if authors.contains_key(&key) {
                continue;
            }
            let author = resolve_target(gh, cache, &link.referenced_repo, link.issue_number)
                .and_then(|t| t.author);
            authors.insert(key, author);
        }
    }

    for entry in &mut found {
        for link in &mut entry.links {
            link.issue_author = authors
                .get(&target_key(&link.referenced_repo, link.issue_number))
                .cloned()
                .flatten();
        }
    }

    Ok(found)
}

/// One row per (commit, closing reference). Non-closing references are dropped.
pub fn find_issues_closed_by_repo_commits(
    gh: &mut GitHub,
    cache: &mut DetailCache,
    repo: &RepoId,
    commits: &[Commit],
) -> Result<Vec<CommitIssueLink>> {
    let mut authors: HashMap<TargetKey, Option<String>> = HashMap::new();
    let mut rows = Vec::new();

    for commit in commits {
        let message = commit.message();
        if message.is_empty() {
            continue;
        }
        for r in refs::extract_issue_refs(message) {
            if !r.has_closing_keyword {
                continue;
            }
            let referenced_repo = r.repo_or(repo);
            let key = target_key(&referenced_repo, r.number);
            let issue_author = match authors.get(&key) {
                Some(author) => author.clone(),
                None => {
                    let author = resolve_target(gh, cache, &referenced_repo, r.number)
                        .and_then(|t| t.author);
                    authors.insert(key, author.clone());
                    author
                }
            };

            rows.push(CommitIssueLink {
                repo_name: repo.full_name(),
                commit_sha: commit.sha.clone(),
                commit_url: commit.html_url.clone(),
                commit_author: commit.author_name().map(str::to_string),
                referenced_repo,
                issue_number: r.number,
                issue_author,
                reference_type: ReferenceSource::CommitMessage,
                has_closing_keyword: true,
                would_auto_close: true,
            });
        }
    }

    Ok(rows)
}

/// Text of one issue-like artifact, bucketed by where it was found.
struct SourceText {
    found_in: FoundIn,
    text: String,
    seen_at: Option<DateTime<Utc>>,
}

struct SourceArtifact {
    kind: ArtifactKind,
    number: u64,
    url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    title: String,
    body: String,
}

impl SourceArtifact {
    fn from_issue(issue: &Issue) -> Self {
        Self {
            kind: ArtifactKind::Issue,
            number: issue.number,
            url: issue.html_url.clone(),
            created_at: issue.opened_at(),
            title: issue.title.clone().unwrap_or_default(),
            body: issue.body.clone().unwrap_or_default(),
        }
    }

    fn from_pull_request(pr: &PullRequest) -> Self {
        Self {
            kind: ArtifactKind::PullRequest,
            number: pr.number,
            url: pr.html_url.clone(),
            created_at: pr.opened_at(),
            title: pr.title.clone().unwrap_or_default(),
            body: pr.body.clone().unwrap_or_default(),
        }
    }
}

/// Mentions of other repositories' issues and PRs from this repository's
/// issues and PRs. Comments are scanned too when `scan_comments` is set.
pub fn find_cross_repo_links(
    gh: &mut GitHub,
    cache: &mut DetailCache,
    repo: &RepoId,
    issues: &[Issue],
    prs: &[PullRequest],
    scan_comments: bool,
) -> Result<Vec<CrossRepoLink>> {
    let sources: Vec<SourceArtifact> = issues
        .iter()
        .map(SourceArtifact::from_issue)
        .chain(prs.iter().map(SourceArtifact::from_pull_request))
        .collect();

    let mut targets: HashMap<TargetKey, Option<TargetInfo>> = HashMap::new();
    let mut links = Vec::new();
    let mut reported = 0;

    for source in &sources {
        let mut texts = vec![
            SourceText {
                found_in: FoundIn::IssueTitle,
                text: source.title.clone(),
                seen_at: source.created_at,
            },
            SourceText {
                found_in: FoundIn::IssueBody,
                text: source.body.clone(),
                seen_at: source.created_at,
            },
        ];
        if scan_comments {
            match collect::issue_comments(gh, repo, source.number) {
                Ok(comments) => texts.extend(comments.into_iter().map(|c| SourceText {
                    found_in: FoundIn::IssueComment,
                    text: c.body.unwrap_or_default(),
                    seen_at: c.created_at.or(c.updated_at).or(source.created_at),
                })),
                Err(e) => warn!("[warn] comments of #{} unavailable: {:#}", source.number, e),
            }
        }

        for bucket in texts.iter().filter(|t| !t.text.is_empty()) {
            for mention in refs::cross_repo_mentions(&bucket.text, repo) {
                let key = target_key(&mention.repo, mention.number);
                let info = match targets.get(&key) {
                    Some(info) => info.clone(),
                    None => {
                        let info = resolve_target(gh, cache, &mention.repo, mention.number);
                        targets.insert(key, info.clone());
                        info
                    }
                }
                .unwrap_or_default();

                links.push(CrossRepoLink {
                    source: LinkSource {
                        repo_name: repo.full_name(),
                        kind: source.kind,
                        number: source.number,
                        url: source.url.clone(),
                        created_at: source.created_at,
                    },
                    reference: ReferenceSite {
                        found_in: bucket.found_in,
                        seen_at: bucket.seen_at,
                        cross_ref_timestamp: bucket.seen_at,
                    },
                    target: LinkTarget {
                        repo_name: mention.repo,
                        kind: if info.is_pull_request {
                            ArtifactKind::PullRequest
                        } else {
                            ArtifactKind::Issue
                        },
                        number: mention.number,
                        url: info.url,
                        created_at: info.created_at,
                        author: info.author,
                    },
                });
            }
        }

        if links.len() >= reported + 50 {
            reported = links.len();
            info!("  found {} cross-repo references so far...", reported);
        }
    }

    Ok(links)
}
