//! # Labshift Migration Engine
//!
//! This crate moves GitLab projects from one instance to another, placing
//! each one under an extra root group on the destination.
//!
//! ## Features
//!
//! - **Namespace remapping**: `group/sub/project` becomes `root/group/sub/project`
//! - **Idempotent provisioning**: groups and projects are looked up before they are created
//! - **Mirror transfer**: every branch and tag is cloned and pushed, all or nothing
//! - **Export/import transfer**: project bundles are exported, downloaded and imported
//!   under a deadline
//! - **Issue reconciliation**: open source issues are linked to their copies and closed
//! - **Progress tracking**: per-phase progress reporting with an optional console bar
//!
//! ## Example
//!
//! ```rust,ignore
//! use labshift_migrate::{HostConfig, MigrationConfig, Migrator, TransferMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrationConfig::new(
//!         HostConfig::new("https://gitlab-ce.example.com", "glpat-source"),
//!         HostConfig::new("https://gitlab-ee.example.com", "glpat-dest"),
//!         "migrated",
//!     )?
//!     .with_mode(TransferMode::ExportImport);
//!
//!     let migrator = Migrator::from_config(config)?;
//!     let report = migrator.run(&["team/service".to_string()]).await;
//!
//!     report.print_summary();
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod api;
pub mod ci_include;
pub mod client;
pub mod config;
pub mod error;
pub mod mirror;
pub mod orchestrator;
pub mod poll;
pub mod progress;
pub mod provision;
pub mod reconcile;
pub mod report;
pub mod resolver;
pub mod transfer;
pub mod types;

// Re-export main types
pub use api::{ExportArchive, GitLabApi};
pub use client::GitLabClient;
pub use config::{HostConfig, IncludeRewrite, MigrationConfig, PartialConfig, Secret};
pub use error::{ErrorCategory, MigrationError, PollPhase, Result, TransferError};
pub use mirror::{GitMirror, MirrorClone, PushReport, RepositoryMirror};
pub use orchestrator::Migrator;
pub use poll::{Clock, PollPolicy, TokioClock};
pub use progress::{
    ConsoleProgressReporter, MigrationPhase, MigrationProgress, ProgressCallback, ProgressUpdate,
};
pub use provision::{Hierarchy, ProjectPolicy, Provisioner};
pub use reconcile::{
    FallbackMatcher, IidMatcher, IssueMatcher, IssueReconciler, MatchResult, ReconcileReport,
    TitleCreatedMatcher,
};
pub use report::{ErrorInfo, MigrationResult, ProjectOutcome, RunReport};
pub use resolver::{parse_project_list, resolve};
pub use transfer::{ExportImportState, TransferDriver, TransferJob, TransferOutcome};
pub use types::*;

/// Version of the migration engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
