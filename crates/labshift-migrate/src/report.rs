//! Per-project results and the run summary.

use crate::error::{ErrorCategory, MigrationError};
use crate::types::{LevelOutcome, LevelReport, TransferStatus};

use chrono::{DateTime, Utc};
use console::Style;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Final state of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectOutcome {
    /// Content is on the destination.
    Succeeded,
    /// A fatal error stopped the project.
    #[default]
    Failed,
    /// The project was never started.
    Skipped,
}

impl std::fmt::Display for ProjectOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why a project failed or was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error category.
    pub category: ErrorCategory,
    /// Error message.
    pub message: String,
}

impl ErrorInfo {
    /// Describe `error`, falling back to `category` for transport errors.
    pub fn from_error(error: &MigrationError, category: ErrorCategory) -> Self {
        Self {
            category: error.category().unwrap_or(category),
            message: error.to_string(),
        }
    }
}

/// Outcome record for one input line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationResult {
    /// The input line as given.
    pub project: String,
    /// Resolved destination path, if resolution succeeded.
    pub destination: Option<String>,
    /// Outcome per namespace level, outermost first.
    pub levels: Vec<LevelReport>,
    /// Transfer status.
    pub transfer: TransferStatus,
    /// Refs pushed in mirror mode.
    pub refs_pushed: usize,
    /// Source issues linked and closed.
    pub issues_reconciled: usize,
    /// Source issues left open.
    pub issues_unreconciled: usize,
    /// Source issues whose comment or close failed.
    pub issues_failed: usize,
    /// Whether the CI file was rewritten.
    pub ci_rewritten: bool,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
    /// Fatal error or skip reason.
    pub error: Option<ErrorInfo>,
    /// Final state.
    pub outcome: ProjectOutcome,
    /// When work on the project started.
    pub started_at: Option<DateTime<Utc>>,
    /// When work on the project ended.
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationResult {
    /// Start a result for `project`.
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// A project that was never started.
    pub fn skipped(
        project: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(project);
        result.outcome = ProjectOutcome::Skipped;
        result.error = Some(ErrorInfo {
            category,
            message: message.into(),
        });
        result.complete();
        result
    }

    /// Record a fatal error.
    pub fn fail(&mut self, error: &MigrationError, category: ErrorCategory) {
        self.outcome = ProjectOutcome::Failed;
        self.error = Some(ErrorInfo::from_error(error, category));
        self.complete();
    }

    /// Record success.
    pub fn succeed(&mut self) {
        self.outcome = ProjectOutcome::Succeeded;
        self.error = None;
        self.complete();
    }

    /// Add a warning.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Stamp the completion time.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }
}

/// Aggregate of a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// One entry per input line, in input order.
    pub results: Vec<MigrationResult>,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run ended.
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Append a project result.
    pub fn push(&mut self, result: MigrationResult) {
        self.results.push(result);
    }

    /// Mark the run as complete.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    fn count(&self, outcome: ProjectOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Number of projects that succeeded.
    pub fn succeeded(&self) -> usize {
        self.count(ProjectOutcome::Succeeded)
    }

    /// Number of projects that failed.
    pub fn failed(&self) -> usize {
        self.count(ProjectOutcome::Failed)
    }

    /// Number of projects that were skipped.
    pub fn skipped(&self) -> usize {
        self.count(ProjectOutcome::Skipped)
    }

    /// Results of failed projects.
    pub fn failures(&self) -> impl Iterator<Item = &MigrationResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == ProjectOutcome::Failed)
    }

    /// Whether no project failed.
    pub fn is_successful(&self) -> bool {
        self.failed() == 0
    }

    /// Process exit status for this run.
    pub fn exit_code(&self) -> i32 {
        if self.is_successful() {
            0
        } else {
            1
        }
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render the textual summary.
    pub fn render_summary(&self, color: bool) -> String {
        let ok = Style::new().green().bold().force_styling(color);
        let bad = Style::new().red().bold().force_styling(color);
        let dim = Style::new().dim().force_styling(color);
        let mut out = String::new();

        let _ = writeln!(out, "\n=== Migration Summary ===\n");
        for result in &self.results {
            let mark = match result.outcome {
                ProjectOutcome::Succeeded => ok.apply_to("✓"),
                ProjectOutcome::Failed => bad.apply_to("✗"),
                ProjectOutcome::Skipped => dim.apply_to("-"),
            };
            let target = result.destination.as_deref().unwrap_or(&result.project);
            let _ = writeln!(out, "{mark} {target} [{}]", result.outcome);

            for level in &result.levels {
                let kind = if level.is_project { "project" } else { "group" };
                let _ = writeln!(out, "    {kind:<8} {:<40} {}", level.path, level.outcome);
            }
            if result.transfer != TransferStatus::NotStarted {
                let _ = writeln!(out, "    transfer: {}", result.transfer);
            }
            if result.refs_pushed > 0 {
                let _ = writeln!(out, "    refs pushed: {}", result.refs_pushed);
            }
            if result.issues_reconciled + result.issues_unreconciled + result.issues_failed > 0 {
                let _ = writeln!(
                    out,
                    "    issues: {} reconciled, {} unreconciled, {} failed",
                    result.issues_reconciled, result.issues_unreconciled, result.issues_failed
                );
            }
            if result.ci_rewritten {
                let _ = writeln!(out, "    CI includes rewritten");
            }
            for warning in &result.warnings {
                let _ = writeln!(out, "    warning: {warning}");
            }
            if let Some(error) = &result.error {
                let _ = writeln!(out, "    [{}] {}", error.category, error.message);
            }
        }

        let failures: Vec<&MigrationResult> = self.failures().collect();
        if !failures.is_empty() {
            let _ = writeln!(out, "\nFailed projects ({}):", failures.len());
            for result in failures {
                let category = result
                    .error
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), |e| e.category.to_string());
                let _ = writeln!(out, "  {} ({category})", result.project);
            }
        }

        let _ = writeln!(
            out,
            "\nSucceeded: {}  Failed: {}  Skipped: {}",
            self.succeeded(),
            self.failed(),
            self.skipped()
        );
        let status = if self.is_successful() {
            ok.apply_to("SUCCESS")
        } else {
            bad.apply_to("FAILED")
        };
        let _ = writeln!(out, "Overall Status: {status}");
        out
    }

    /// Print the summary to stdout.
    pub fn print_summary(&self) {
        let color = console::colors_enabled();
        print!("{}", self.render_summary(color));
    }
}

/// Count namespace levels by outcome.
pub fn level_counts(levels: &[LevelReport]) -> (usize, usize) {
    let created = levels
        .iter()
        .filter(|l| l.outcome == LevelOutcome::Created)
        .count();
    let existed = levels
        .iter()
        .filter(|l| l.outcome == LevelOutcome::Existed)
        .count();
    (created, existed)
}
