//! GitHub credential handling.
//!
//! [`CredentialRotator`] owns the ordered token list and the cursor that
//! selects the active token. The transport asks it to rotate on auth failures
//! and on rate limiting; the rotator remembers where a run of rate-limit
//! rotations started so it can report when every token has been tried.
//!
//! Tokens are read, first non-empty source wins, from:
//!
//! 1. `GITHUB_TOKENS` (comma separated)
//! 2. `github.tokens` in the config file
//! 3. a local secrets file, `{"github_tokens": ["..."]}`, at
//!    `github.secrets_file`, `$LOCAL_SECRETS_FILE`, or `./local_secrets.json`

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Result of a rate-limit rotation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Switched to a token that has not been tried in this run.
    Rotated,
    /// Every token has been tried (or there is nothing to rotate to).
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct CredentialRotator {
    tokens: Vec<String>,
    cursor: usize,
    /// Cursor position when the current run of rate-limit rotations began.
    run_start: Option<usize>,
}

impl CredentialRotator {
    pub fn new(tokens: Vec<String>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            tokens,
            cursor: 0,
            run_start: None,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.tokens.get(self.cursor).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// 1-based position of the active token, for log lines.
    pub fn position(&self) -> usize {
        self.cursor + 1
    }

    /// Advance to the next token. Returns false when there is no other token.
    pub fn rotate(&mut self) -> bool {
        if self.tokens.len() <= 1 {
            return false;
        }
        self.cursor = (self.cursor + 1) % self.tokens.len();
        true
    }

    /// Rotate because the active token is rate limited.
    ///
    /// Reports [`Rotation::Exhausted`] once the cursor wraps back to the token
    /// that started the current run, and clears the run so the next rate limit
    /// after the caller's wait starts a fresh cycle.
    pub fn rotate_on_rate_limit(&mut self) -> Rotation {
        if self.tokens.len() <= 1 {
            self.run_start = None;
            return Rotation::Exhausted;
        }
        let start = *self.run_start.get_or_insert(self.cursor);
        self.rotate();
        if self.cursor == start {
            self.run_start = None;
            Rotation::Exhausted
        } else {
            Rotation::Rotated
        }
    }

    /// Forget any in-progress rotation run.
    pub fn settle(&mut self) {
        self.run_start = None;
    }
}

#[derive(Debug, Default, Deserialize)]
struct LocalSecrets {
    #[serde(default)]
    github_tokens: Vec<String>,
}

/// Resolve tokens from the environment, the config, then the secrets file.
pub fn load_tokens(config: &Config) -> Vec<String> {
    load_tokens_from(config, |name| std::env::var(name).ok())
}

pub fn load_tokens_from<F>(config: &Config, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("GITHUB_TOKENS") {
        let tokens = split_tokens(&raw);
        if !tokens.is_empty() {
            return tokens;
        }
    }

    let inline: Vec<String> = config
        .github
        .tokens
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if !inline.is_empty() {
        return inline;
    }

    let path = config
        .github
        .secrets_file
        .clone()
        .or_else(|| lookup("LOCAL_SECRETS_FILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("local_secrets.json"));
    read_secrets_file(&path)
}

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Missing or malformed secrets files yield no tokens.
fn read_secrets_file(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<LocalSecrets>(&content) {
        Ok(secrets) => secrets
            .github_tokens
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Err(e) => {
            log::warn!("[warn] ignoring malformed secrets file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
