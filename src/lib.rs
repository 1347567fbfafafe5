//! # Forge Harvest
//!
//! Incremental harvester of GitHub repository activity.
//!
//! For each configured repository it collects metadata, issues, pull
//! requests, contributors, commits (with changed files) and per-file blame
//! summaries. It then derives three link datasets: PRs referencing issues,
//! commits closing issues, and mentions of other repositories' issues. Every
//! dataset is written as JSON under `{output}/{owner}_{name}/`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────┐   ┌────────────┐
//! │  Transport  │──▶│ Collectors/Blame │──▶│ Linkers  │──▶│  Pipeline  │──▶ JSON files
//! │ REST+GraphQL│   │  (+ DetailCache) │   │  (refs)  │   │ per repo   │
//! └─────────────┘   └──────────────────┘   └──────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GITHUB_TOKENS=ghp_one,ghp_two
//! harvest run octo/widgets          # harvest one repository
//! harvest status                    # what's on disk
//! harvest refs "Fixes #12"          # debug reference extraction
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides |
//! | [`credentials`] | Token loading and rotation |
//! | [`transport`] | Retrying REST/GraphQL client |
//! | [`models`] | Typed GitHub records |
//! | [`paginate`] | Paged listings and incremental merge |
//! | [`github`] | Repository endpoint facade |
//! | [`store`] | Dataset files on disk |
//! | [`cache`] | Run-scoped detail cache |
//! | [`collect`] | Dataset collectors |
//! | [`blame`] | Blame retrieval and summaries |
//! | [`refs`] | Issue reference extraction |
//! | [`linkers`] | PR, commit and cross-repo links |
//! | [`pipeline`] | Per-repository orchestration |
//! | [`status`] | On-disk summary |

pub mod blame;
pub mod cache;
pub mod collect;
pub mod config;
pub mod credentials;
pub mod github;
pub mod linkers;
pub mod models;
pub mod paginate;
pub mod pipeline;
pub mod refs;
pub mod status;
pub mod store;
pub mod transport;

#[doc(hidden)]
pub mod testing;
