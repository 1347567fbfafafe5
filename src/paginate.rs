//! Paginated REST listings and incremental refresh helpers.
//!
//! [`paged_get`] walks a listing with `per_page`/`page` query parameters,
//! following a `Link: <...>; rel="next"` header instead when the API supplies
//! one. It stops on a short page, an empty or non-2xx page, or the page cap,
//! and stamps every item with `repo_name` before decoding it.
//!
//! Incremental refresh works in two steps: [`since_from_cache`] narrows the
//! next fetch to items touched after the newest cached timestamp (minus a
//! lookback window), and [`merge_by_key`] folds the narrowed result back into
//! the cache.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::hash::Hash;

use crate::models::RepoId;
use crate::transport::{ApiResponse, Transport};

/// Fetch every page of a listing. `max_pages == 0` means no cap.
pub fn paged_get<T: DeserializeOwned>(
    transport: &mut Transport,
    url: &str,
    repo: &RepoId,
    per_page: usize,
    max_pages: usize,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut page = 1usize;
    let mut page_url = with_page_params(url, page, per_page);

    loop {
        let response = transport.get(&page_url)?;
        if !response.is_success() {
            debug!("stopping pagination at page {} of {}: HTTP {}", page, url, response.status);
            break;
        }
        if response.status == 204 || response.body.trim().is_empty() {
            debug!("no content at page {} of {}", page, url);
            break;
        }

        let items = match response.json::<Value>().with_context(|| format!("page {} of {}", page, url))? {
            Value::Array(items) => items,
            other => {
                warn!("[warn] expected a JSON array from {}, got {}", page_url, type_name(&other));
                break;
            }
        };

        let count = items.len();
        for mut item in items {
            tag_repo(&mut item, repo);
            match serde_json::from_value::<T>(item) {
                Ok(record) => out.push(record),
                Err(e) => warn!("[warn] skipping malformed item from {}: {}", page_url, e),
            }
        }

        if count < per_page || (max_pages > 0 && page >= max_pages) {
            break;
        }
        page += 1;
        page_url = next_link(&response).unwrap_or_else(|| with_page_params(url, page, per_page));
    }

    Ok(out)
}

/// Set `repo_name` on a JSON object, replacing any upstream value.
pub fn tag_repo(item: &mut Value, repo: &RepoId) {
    if let Value::Object(map) = item {
        map.insert("repo_name".to_string(), Value::String(repo.full_name()));
    }
}

fn with_page_params(url: &str, page: usize, per_page: usize) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}per_page={}&page={}", url, sep, per_page, page)
}

/// The `rel="next"` target of a `Link` header.
pub fn next_link(response: &ApiResponse) -> Option<String> {
    let header = response.header("link")?;
    header.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|s| s.trim().eq_ignore_ascii_case("rel=\"next\""));
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Newest timestamp in the cache minus `lookback`, or `None` when the cache
/// is empty or carries no timestamps.
pub fn since_from_cache<T, F>(
    cached: &[T],
    timestamp: F,
    lookback: chrono::Duration,
) -> Option<DateTime<Utc>>
where
    F: Fn(&T) -> Option<DateTime<Utc>>,
{
    cached.iter().filter_map(timestamp).max().map(|ts| ts - lookback)
}

/// GitHub `since` value, URL-encoded.
pub fn since_param(since: DateTime<Utc>) -> String {
    since
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
        .replace(':', "%3A")
}

pub fn append_query(url: &str, key: &str, value: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, sep, key, value)
}

/// Fold `fresh` into `cached` by natural key.
///
/// Every fresh item replaces its cached counterpart and moves to the front,
/// in fetch order, so the last fresh item ends up first. Cached items without
/// a key are dropped, as are fresh items without one.
pub fn merge_by_key<T, K, F>(cached: Vec<T>, fresh: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> Option<K>,
{
    let mut order: Vec<K> = Vec::with_capacity(cached.len() + fresh.len());
    let mut by_key: HashMap<K, T> = HashMap::with_capacity(cached.len() + fresh.len());

    for item in cached {
        if let Some(k) = key(&item) {
            if !by_key.contains_key(&k) {
                order.push(k.clone());
            }
            by_key.insert(k, item);
        }
    }

    for item in fresh {
        let Some(k) = key(&item) else { continue };
        order.retain(|existing| existing != &k);
        order.insert(0, k.clone());
        by_key.insert(k, item);
    }

    order.into_iter().filter_map(|k| by_key.remove(&k)).collect()
}
