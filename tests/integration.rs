use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn harvest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvest");
    path
}

fn setup_test_env(repos: &[&str]) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let repo_list: Vec<String> = repos.iter().map(|r| format!("\"{}\"", r)).collect();
    let config_content = format!(
        r#"repos = [{}]

[output]
dir = "{}/output"

[github]
api_url = "http://127.0.0.1:9"
secrets_file = "{}/no_secrets.json"
"#,
        repo_list.join(", "),
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("harvest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_harvest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("GITHUB_TOKENS")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_refs_prints_json_lines() {
    let (_tmp, config_path) = setup_test_env(&[]);

    let (stdout, stderr, success) = run_harvest(
        &config_path,
        &["refs", "Fixes #1 and references #2. See acme/tools#3"],
    );
    assert!(success, "refs failed: stdout={}, stderr={}", stdout, stderr);

    let refs: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(refs.len(), 3);
    assert_eq!(refs[0]["number"], 1);
    assert_eq!(refs[1]["has_closing_keyword"], true);
    assert_eq!(refs[2]["target_repo"], "acme/tools");
    assert_eq!(refs[2]["has_closing_keyword"], false);
}

#[test]
fn test_refs_reads_stdin() {
    let (_tmp, config_path) = setup_test_env(&[]);

    let mut child = Command::new(harvest_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("refs")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"resolves #42\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"number\":42"));
    assert!(stdout.contains("\"has_closing_keyword\":true"));
}

#[test]
fn test_run_without_repos_fails() {
    let (_tmp, config_path) = setup_test_env(&[]);

    let (_, stderr, success) = run_harvest(&config_path, &["run"]);
    assert!(!success);
    assert!(stderr.contains("No repositories specified"));
}

#[test]
fn test_run_rejects_malformed_repo() {
    let (_tmp, config_path) = setup_test_env(&[]);

    let (_, stderr, success) = run_harvest(&config_path, &["run", "not-a-repo"]);
    assert!(!success);
    assert!(stderr.contains("owner/name"));
}

#[test]
fn test_status_empty_output() {
    let (_tmp, config_path) = setup_test_env(&["octo/widgets"]);

    let (stdout, stderr, success) = run_harvest(&config_path, &["status"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("no repositories harvested yet"));
}

#[test]
fn test_status_lists_datasets() {
    let (tmp, config_path) = setup_test_env(&["octo/widgets"]);

    let repo_dir = tmp.path().join("output").join("octo_widgets");
    fs::create_dir_all(&repo_dir).unwrap();
    fs::write(repo_dir.join("issues.json"), r#"[{"number": 1}, {"number": 2}]"#).unwrap();
    fs::write(
        repo_dir.join("repo_blame.json"),
        r#"{"head_commit_sha": "abc123", "files": []}"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_harvest(&config_path, &["status"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("octo_widgets"));
    assert!(stdout.contains("issues.json"));
    assert!(stdout.contains("blame head: abc123"));
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("absent.toml");

    // Defaults load fine but list no repositories.
    let (_, stderr, success) = run_harvest(&missing, &["run"]);
    assert!(!success);
    assert!(stderr.contains("No repositories specified"), "stderr={}", stderr);
    assert!(!stderr.contains("Failed to read config file"));
}
