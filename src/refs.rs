//! Issue reference extraction from free text.
//!
//! Recognizes bare `#123` and cross-repository `owner/repo#123` references,
//! optionally preceded by a closing keyword (`close[sd]`, `fix(e)[sd]`,
//! `resolve[sd]`). Closing keywords are sentence scoped: if a sentence
//! contains one anywhere, every reference in that sentence is closing.
//!
//! Sentences end at a newline, or at `.`, `!` or `?` followed by whitespace.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::models::RepoId;

static ISSUE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?P<kw>close[sd]?|fixe?[sd]?|resolve[sd]?)\s*[:\-\x{2013}\x{2014}]*\s+)?(?:(?P<full>[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)#(?P<num1>\d+)|#(?P<num2>\d+))",
    )
    .expect("issue reference pattern")
});

static CLOSING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(close[sd]?|fixe?[sd]?|resolve[sd]?)\b").expect("closing keyword pattern")
});

static CROSS_REPO_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)#(\d+)").expect("cross-repo pattern")
});

/// One reference found in text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRef {
    /// `owner/repo` when written out; `None` for a bare `#N`.
    pub target_repo: Option<String>,
    pub number: u64,
    pub has_closing_keyword: bool,
}

impl IssueRef {
    /// Target repository, defaulting to `current` for bare references.
    pub fn repo_or(&self, current: &RepoId) -> String {
        self.target_repo
            .clone()
            .unwrap_or_else(|| current.full_name())
    }
}

/// A cross-repository mention, `owner/repo#N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMention {
    pub repo: String,
    pub number: u64,
}

pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let end = i + c.len_utf8();
        match c {
            '\n' => {
                sentences.push(&text[start..end]);
                start = end;
            }
            '.' | '!' | '?' => {
                let mut next_start = end;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_whitespace() {
                        break;
                    }
                    next_start = j + d.len_utf8();
                    chars.next();
                }
                if next_start > end {
                    sentences.push(&text[start..end]);
                    start = next_start;
                }
            }
            _ => {}
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences.retain(|s| !s.trim().is_empty());
    sentences
}

pub fn has_closing_keyword(text: &str) -> bool {
    CLOSING_KEYWORD.is_match(text)
}

/// Every issue reference in `text`, in order of appearance.
pub fn extract_issue_refs(text: &str) -> Vec<IssueRef> {
    let mut refs = Vec::new();
    for sentence in split_sentences(text) {
        let sentence_closes = has_closing_keyword(sentence);
        for caps in ISSUE_REF.captures_iter(sentence) {
            let Some(number) = caps
                .name("num1")
                .or_else(|| caps.name("num2"))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            else {
                continue;
            };
            refs.push(IssueRef {
                target_repo: caps.name("full").map(|m| m.as_str().to_string()),
                number,
                has_closing_keyword: sentence_closes || caps.name("kw").is_some(),
            });
        }
    }
    refs
}

/// `owner/repo#N` mentions in `text`, excluding those pointing at `current`.
pub fn cross_repo_mentions(text: &str, current: &RepoId) -> Vec<RepoMention> {
    CROSS_REPO_REF
        .captures_iter(text)
        .filter_map(|caps| {
            let repo = caps.get(1)?.as_str().trim().to_string();
            let number = caps.get(2)?.as_str().parse::<u64>().ok()?;
            (!current.matches(&repo)).then_some(RepoMention { repo, number })
        })
        .collect()
}
