//! # Forge Harvest CLI (`harvest`)
//!
//! Harvests issues, pull requests, commits, contributors and blame summaries
//! for a list of GitHub repositories and derives issue/PR/commit links.
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest run [OWNER/NAME ...]` | Harvest the given (or configured) repositories |
//! | `harvest refs [TEXT]` | Print the issue references found in TEXT (or stdin) |
//! | `harvest status` | Summarize what is on disk per repository |
//!
//! ## Examples
//!
//! ```bash
//! # Harvest everything listed under `repos` in the config file
//! GITHUB_TOKENS=ghp_a,ghp_b harvest run
//!
//! # One repository, custom output directory
//! harvest run rust-lang/rust --output ./data
//!
//! # Check which references a commit message produces
//! git log -1 --format=%B | harvest refs
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

use forge_harvest::config;
use forge_harvest::credentials;
use forge_harvest::models::RepoId;
use forge_harvest::pipeline::{Harvester, RepoOutcome};
use forge_harvest::refs;
use forge_harvest::status;

/// Forge Harvest CLI: incremental GitHub activity harvester.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Harvest GitHub issues, pull requests, commits and blame, and link them together",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest repositories.
    ///
    /// Datasets are written to `{output}/{owner}_{name}/` as they complete.
    /// A failing repository is reported and the run moves on.
    Run {
        /// Repositories as `owner/name`. Defaults to `repos` from the config.
        repos: Vec<String>,

        /// Output directory, overriding `[output] dir`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Extract issue references from text and print them as JSON lines.
    ///
    /// Reads stdin when TEXT is omitted. Makes no network calls.
    Refs {
        text: Option<String>,
    },

    /// Show dataset record counts and blame heads per repository directory.
    Status,
}

fn main() -> Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Refs { text } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            for reference in refs::extract_issue_refs(&text) {
                println!("{}", serde_json::to_string(&reference)?);
            }
        }
        Commands::Status => {
            let cfg = config::load_or_default(&cli.config)?;
            status::run_status(&cfg)?;
        }
        Commands::Run { repos, output } => {
            let mut cfg = config::load_or_default(&cli.config)?;
            if let Some(dir) = output {
                cfg.output.dir = dir;
            }
            let targets: Vec<RepoId> = if repos.is_empty() {
                cfg.repo_ids()?
            } else {
                repos
                    .iter()
                    .map(|raw| raw.parse())
                    .collect::<Result<_>>()?
            };
            if targets.is_empty() {
                bail!("No repositories specified. Pass OWNER/NAME or set `repos` in the config file.");
            }

            let tokens = credentials::load_tokens(&cfg);
            if tokens.is_empty() {
                log::warn!("[warn] no GitHub tokens configured; requests are unauthenticated and blame is skipped");
            }
            let mut harvester = Harvester::from_config(cfg, tokens)?;
            let outcomes = harvester.run(&targets);

            println!("harvest");
            for outcome in &outcomes {
                match outcome {
                    RepoOutcome::Completed(report) => {
                        let summary: Vec<String> = report
                            .counts
                            .iter()
                            .map(|(dataset, n)| format!("{} {}", n, dataset))
                            .collect();
                        println!("  {}: ok ({})", report.repo, summary.join(", "));
                    }
                    RepoOutcome::Failed {
                        repo,
                        reason,
                        written,
                    } => {
                        println!(
                            "  {}: failed after {} dataset(s): {}",
                            repo,
                            written.len(),
                            reason
                        );
                    }
                }
            }
            let failed = outcomes.iter().filter(|o| !o.is_completed()).count();
            println!("  completed: {}/{}", outcomes.len() - failed, outcomes.len());
            let cache = harvester.cache();
            println!(
                "  cache: {} commit(s), {} issue(s), {} hit(s)",
                cache.commit_entries(),
                cache.issue_entries(),
                cache.hits()
            );
        }
    }

    Ok(())
}
