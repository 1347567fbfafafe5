//! Harvester configuration.
//!
//! Settings come from a TOML file (default `./config/harvest.toml`) and a
//! handful of numeric environment overrides that mirror the knobs operators
//! already tune on long-running harvests.
//!
//! ```toml
//! repos = ["rust-lang/cargo", "tokio-rs/tokio"]
//!
//! [output]
//! dir = "./output"
//!
//! [github]
//! per_page = 100
//! timeout_secs = 90
//!
//! [retry]
//! max_wait_on_403_secs = 180
//! exhausted_wait_secs = 3600
//!
//! [collect]
//! max_pages_commits = 3
//! incremental_lookback_secs = 300
//!
//! [blame]
//! example_limit = 5
//! file_limit = 50
//! exclude_globs = ["**/*.lock"]
//! ```
//!
//! A missing file is not an error: every field has a default, so the
//! harvester can run from environment variables and CLI arguments alone.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::RepoId;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub blame: BlameConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Inline tokens. Prefer `GITHUB_TOKENS` or a secrets file.
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub secrets_file: Option<PathBuf>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            graphql_url: default_graphql_url(),
            user_agent: default_user_agent(),
            per_page: default_per_page(),
            timeout_secs: default_timeout_secs(),
            tokens: Vec::new(),
            secrets_file: None,
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}
fn default_user_agent() -> String {
    "forge-harvest/0.1".to_string()
}
fn default_per_page() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Attempts per request. When unset, derived from the token count.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,
    #[serde(default = "default_max_wait_on_403_secs")]
    pub max_wait_on_403_secs: u64,
    #[serde(default = "default_exhausted_wait_secs")]
    pub exhausted_wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            backoff_base_secs: default_backoff_base_secs(),
            max_wait_on_403_secs: default_max_wait_on_403_secs(),
            exhausted_wait_secs: default_exhausted_wait_secs(),
        }
    }
}

impl RetryConfig {
    /// Effective attempt budget: the configured value (at least 6), else
    /// `max(6, 2 * tokens)`.
    pub fn effective_max_retries(&self, token_count: usize) -> u32 {
        match self.max_retries {
            Some(n) if n > 0 => n.max(6),
            _ => 6u32.max(2 * token_count as u32),
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_base_secs.max(0.0))
    }

    pub fn max_wait_on_403(&self) -> Duration {
        Duration::from_secs(self.max_wait_on_403_secs)
    }

    pub fn exhausted_wait(&self) -> Duration {
        Duration::from_secs(self.exhausted_wait_secs)
    }
}

fn default_backoff_base_secs() -> f64 {
    2.0
}
fn default_max_wait_on_403_secs() -> u64 {
    180
}
fn default_exhausted_wait_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectConfig {
    /// Page cap for the commit listing (0 = unlimited).
    #[serde(default = "default_max_pages_commits")]
    pub max_pages_commits: usize,
    /// Page cap for the pull request listing (0 = unlimited).
    #[serde(default)]
    pub max_pages_prs: usize,
    /// Newest PRs scanned for issue links (0 = all).
    #[serde(default = "default_max_prs_with_linked_issues")]
    pub max_prs_with_linked_issues: usize,
    #[serde(default = "default_incremental_lookback_secs")]
    pub incremental_lookback_secs: u64,
    /// Also scan issue comments for cross-repository mentions.
    #[serde(default)]
    pub scan_comments: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            max_pages_commits: default_max_pages_commits(),
            max_pages_prs: 0,
            max_prs_with_linked_issues: default_max_prs_with_linked_issues(),
            incremental_lookback_secs: default_incremental_lookback_secs(),
            scan_comments: false,
        }
    }
}

impl CollectConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.incremental_lookback_secs as i64)
    }
}

fn default_max_pages_commits() -> usize {
    3
}
fn default_max_prs_with_linked_issues() -> usize {
    100
}
fn default_incremental_lookback_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlameConfig {
    #[serde(default = "default_example_limit")]
    pub example_limit: usize,
    /// First N tree paths are blamed (0 = unlimited).
    #[serde(default = "default_file_limit")]
    pub file_limit: usize,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for BlameConfig {
    fn default() -> Self {
        Self {
            example_limit: default_example_limit(),
            file_limit: default_file_limit(),
            exclude_globs: Vec::new(),
        }
    }
}

impl BlameConfig {
    /// Compiled `exclude_globs`.
    pub fn exclude_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude_globs {
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("Invalid pattern in blame.exclude_globs: '{}'", pattern))?,
            );
        }
        Ok(builder.build()?)
    }
}

fn default_example_limit() -> usize {
    5
}
fn default_file_limit() -> usize {
    50
}

impl Config {
    /// Apply the numeric environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| -> Result<Option<u64>> {
            match lookup(name) {
                Some(raw) if !raw.trim().is_empty() => {
                    let value = raw.trim().parse::<u64>().with_context(|| {
                        format!("Environment variable {} must be a non-negative integer, got '{}'", name, raw)
                    })?;
                    Ok(Some(value))
                }
                _ => Ok(None),
            }
        };

        if let Some(v) = read("MAX_PAGES_COMMITS")? {
            self.collect.max_pages_commits = v as usize;
        }
        if let Some(v) = read("MAX_PAGES_PRS")? {
            self.collect.max_pages_prs = v as usize;
        }
        if let Some(v) = read("MAX_PRS_WITH_LINKED_ISSUES")? {
            self.collect.max_prs_with_linked_issues = v as usize;
        }
        if let Some(v) = read("INCREMENTAL_LOOKBACK_SEC")? {
            self.collect.incremental_lookback_secs = v;
        }
        if let Some(v) = read("MAX_WAIT_ON_403")? {
            self.retry.max_wait_on_403_secs = v;
        }
        if let Some(v) = read("RATE_LIMIT_TOKEN_RESET_WAIT_SEC")? {
            self.retry.exhausted_wait_secs = v;
        }
        if let Some(v) = read("BLAME_EXAMPLE_LIMIT")? {
            self.blame.example_limit = v as usize;
        }
        if let Some(v) = read("BLAME_FILE_LIMIT")? {
            self.blame.file_limit = v as usize;
        }
        Ok(())
    }

    /// Parse the configured `repos` list.
    pub fn repo_ids(&self) -> Result<Vec<RepoId>> {
        self.repos
            .iter()
            .map(|raw| raw.parse::<RepoId>())
            .collect()
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the file when present, fall back to defaults otherwise, then apply
/// environment overrides.
pub fn load_or_default(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        log::debug!("config file {} not found, using defaults", path.display());
        Config::default()
    };
    config.apply_env_overrides()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.github.per_page == 0 || config.github.per_page > 100 {
        bail!("github.per_page must be in [1, 100]");
    }
    if config.github.timeout_secs == 0 {
        bail!("github.timeout_secs must be > 0");
    }
    if config.retry.backoff_base_secs < 0.0 {
        bail!("retry.backoff_base_secs must be >= 0");
    }
    for raw in &config.repos {
        raw.parse::<RepoId>()
            .with_context(|| format!("Invalid entry in repos: '{}'", raw))?;
    }
    config.blame.exclude_set()?;
    Ok(())
}
