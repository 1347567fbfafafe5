//! Per-repository orchestration.
//!
//! Repositories are processed one after another. Within a repository the
//! datasets are produced in a fixed order and each is written to disk as
//! soon as it is ready:
//!
//! metadata → issues → pull requests → contributors → commits → blame →
//! PR-issue links → commit-closes-issue links → cross-repo links
//!
//! A failure stops that repository only. Files already written stay on disk
//! and are reported in [`RepoOutcome::Failed`].

use anyhow::{Context, Result};
use log::{error, info};
use serde::Serialize;

use crate::blame;
use crate::cache::DetailCache;
use crate::collect;
use crate::config::Config;
use crate::github::GitHub;
use crate::linkers;
use crate::models::RepoId;
use crate::store::{Dataset, DatasetStore};

/// Records written per dataset for one repository.
#[derive(Debug, Clone)]
pub struct RepoReport {
    pub repo: RepoId,
    pub counts: Vec<(Dataset, usize)>,
}

impl RepoReport {
    pub fn count(&self, dataset: Dataset) -> Option<usize> {
        self.counts
            .iter()
            .find(|(d, _)| *d == dataset)
            .map(|(_, n)| *n)
    }

    pub fn written(&self) -> Vec<Dataset> {
        self.counts.iter().map(|(d, _)| *d).collect()
    }
}

#[derive(Debug)]
pub enum RepoOutcome {
    Completed(RepoReport),
    Failed {
        repo: RepoId,
        reason: String,
        written: Vec<Dataset>,
    },
}

impl RepoOutcome {
    pub fn repo(&self) -> &RepoId {
        match self {
            RepoOutcome::Completed(report) => &report.repo,
            RepoOutcome::Failed { repo, .. } => repo,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RepoOutcome::Completed(_))
    }
}

pub struct Harvester {
    gh: GitHub,
    cache: DetailCache,
    store: DatasetStore,
    config: Config,
}

impl Harvester {
    pub fn new(gh: GitHub, store: DatasetStore, config: Config) -> Self {
        Self {
            gh,
            cache: DetailCache::new(),
            store,
            config,
        }
    }

    pub fn from_config(config: Config, tokens: Vec<String>) -> Result<Self> {
        let gh = GitHub::from_config(&config, tokens)?;
        let store = DatasetStore::new(&config.output.dir);
        Ok(Self::new(gh, store, config))
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub fn cache(&self) -> &DetailCache {
        &self.cache
    }

    /// Process every repository in order. One outcome per repository.
    pub fn run(&mut self, repos: &[RepoId]) -> Vec<RepoOutcome> {
        let total = repos.len();
        repos
            .iter()
            .enumerate()
            .map(|(i, repo)| {
                info!("[{}/{}] {}", i + 1, total, repo);
                self.process_repo(repo)
            })
            .collect()
    }

    pub fn process_repo(&mut self, repo: &RepoId) -> RepoOutcome {
        let mut report = RepoReport {
            repo: repo.clone(),
            counts: Vec::new(),
        };
        match self.harvest(repo, &mut report) {
            Ok(()) => RepoOutcome::Completed(report),
            Err(e) => {
                error!("[error] {} failed: {:#}", repo, e);
                RepoOutcome::Failed {
                    repo: repo.clone(),
                    reason: format!("{:#}", e),
                    written: report.written(),
                }
            }
        }
    }

    fn save<T: Serialize + ?Sized>(
        &self,
        report: &mut RepoReport,
        dataset: Dataset,
        data: &T,
        count: usize,
    ) -> Result<()> {
        let path = self.store.save(&report.repo, dataset, data)?;
        info!("  saved {} {} -> {}", count, dataset, path.display());
        report.counts.push((dataset, count));
        Ok(())
    }

    fn harvest(&mut self, repo: &RepoId, report: &mut RepoReport) -> Result<()> {
        let lookback = self.config.collect.lookback();

        let meta = collect::repo_meta(&mut self.gh, repo).context("fetching repository metadata")?;
        self.save(report, Dataset::RepoMeta, &meta, 1)?;

        let issues = collect::issues(&mut self.gh, &self.store, repo, lookback).context("fetching issues")?;
        self.save(report, Dataset::Issues, &issues, issues.len())?;

        let prs = collect::pull_requests(&mut self.gh, repo, self.config.collect.max_pages_prs)
            .context("fetching pull requests")?;
        self.save(report, Dataset::PullRequests, &prs, prs.len())?;

        let contributors = collect::contributors(&mut self.gh, repo).context("fetching contributors")?;
        self.save(report, Dataset::Contributors, &contributors, contributors.len())?;

        let commits = collect::commits(
            &mut self.gh,
            &mut self.cache,
            &self.store,
            repo,
            lookback,
            self.config.collect.max_pages_commits,
        )
        .context("fetching commits")?;
        self.save(report, Dataset::Commits, &commits, commits.len())?;

        let blame_doc = blame::collect_repo_blame(
            &mut self.gh,
            &mut self.cache,
            &self.store,
            repo,
            &meta,
            &commits,
            &self.config.blame,
        )
        .context("collecting blame")?;
        self.save(report, Dataset::Blame, &blame_doc, blame_doc.files.len())?;

        let pr_links = linkers::find_prs_with_linked_issues(
            &mut self.gh,
            &mut self.cache,
            repo,
            &prs,
            &issues,
            self.config.collect.max_prs_with_linked_issues,
        )
        .context("linking pull requests to issues")?;
        self.save(report, Dataset::PrIssueLinks, &pr_links, pr_links.len())?;

        let commit_links =
            linkers::find_issues_closed_by_repo_commits(&mut self.gh, &mut self.cache, repo, &commits)
                .context("linking commits to issues")?;
        self.save(report, Dataset::CommitIssueLinks, &commit_links, commit_links.len())?;

        let cross_links = linkers::find_cross_repo_links(
            &mut self.gh,
            &mut self.cache,
            repo,
            &issues,
            &prs,
            self.config.collect.scan_comments,
        )
        .context("finding cross-repo links")?;
        self.save(report, Dataset::CrossRepoLinks, &cross_links, cross_links.len())?;

        Ok(())
    }
}
