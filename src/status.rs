//! Summary of harvested data on disk.
//!
//! Used by `harvest status` to show, per repository directory, how many
//! records each dataset file holds and which head commit the blame document
//! was computed at.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

use crate::config::Config;
use crate::store::Dataset;

/// What one `{owner}_{name}` directory contains.
#[derive(Debug, Clone)]
pub struct RepoStatus {
    pub dir_name: String,
    /// Record count per dataset file present.
    pub counts: Vec<(Dataset, usize)>,
    pub blame_head: Option<String>,
    pub blame_error: Option<String>,
}

/// Records in a dataset file: list length, blame file count, or one for a
/// document.
fn record_count(dataset: Dataset, value: &Value) -> usize {
    match (dataset, value) {
        (_, Value::Array(items)) => items.len(),
        (Dataset::Blame, doc) => doc
            .get("files")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        _ => 1,
    }
}

fn read_value(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn repo_status(dir: &Path) -> RepoStatus {
    let mut status = RepoStatus {
        dir_name: dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        counts: Vec::new(),
        blame_head: None,
        blame_error: None,
    };

    for dataset in Dataset::ALL {
        let Some(value) = read_value(&dir.join(dataset.file_name())) else {
            continue;
        };
        if dataset == Dataset::Blame {
            let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
            status.blame_head = field("head_commit_sha");
            status.blame_error = field("error");
        }
        status.counts.push((dataset, record_count(dataset, &value)));
    }
    status
}

/// Status of every repository directory under `root`, sorted by name.
pub fn collect_status(root: &Path) -> Result<Vec<RepoStatus>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read output directory: {}", root.display()))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs.iter().map(|d| repo_status(d)).collect())
}

/// Run the status command: scan the output directory and print a summary.
pub fn run_status(config: &Config) -> Result<()> {
    let root = &config.output.dir;
    let repos = collect_status(root)?;

    println!("Harvest status: {}", root.display());
    println!();

    if repos.is_empty() {
        println!("  (no repositories harvested yet)");
        return Ok(());
    }

    for repo in &repos {
        println!("  {}", repo.dir_name);
        for (dataset, count) in &repo.counts {
            println!("    {:<28} {}", dataset.file_name(), count);
        }
        match (&repo.blame_head, &repo.blame_error) {
            (_, Some(err)) => println!("    blame: {}", err),
            (Some(head), None) => println!("    blame head: {}", head),
            (None, None) => {}
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RepoId;
    use crate::store::DatasetStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn counts_records_per_dataset() {
        let tmp = TempDir::new().unwrap();
        let store = DatasetStore::new(tmp.path());
        let repo = RepoId::new("octo", "widgets");
        store.save(&repo, Dataset::RepoMeta, &json!({"repo_name": "octo/widgets"})).unwrap();
        store.save(&repo, Dataset::Issues, &json!([{"number": 1}, {"number": 2}])).unwrap();
        store
            .save(
                &repo,
                Dataset::Blame,
                &json!({"head_commit_sha": "abc", "files": [{"path": "a.rs"}]}),
            )
            .unwrap();

        let all = collect_status(tmp.path()).unwrap();
        assert_eq!(all.len(), 1);
        let status = &all[0];
        assert_eq!(status.dir_name, "octo_widgets");
        assert_eq!(
            status.counts,
            vec![(Dataset::RepoMeta, 1), (Dataset::Issues, 2), (Dataset::Blame, 1)]
        );
        assert_eq!(status.blame_head.as_deref(), Some("abc"));
        assert!(status.blame_error.is_none());
    }

    #[test]
    fn missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(collect_status(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
