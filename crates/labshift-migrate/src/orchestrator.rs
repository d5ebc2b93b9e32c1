//! Drives projects through resolve, provision, transfer and reconcile.
//!
//! Projects run strictly one after another. Whatever goes wrong inside a
//! project ends up in its [`MigrationResult`]; the run always continues
//! with the next line.

use crate::api::GitLabApi;
use crate::ci_include::update_ci_includes;
use crate::client::GitLabClient;
use crate::config::MigrationConfig;
use crate::error::{ErrorCategory, MigrationError, Result, TransferError};
use crate::mirror::{GitMirror, RepositoryMirror};
use crate::poll::{Clock, TokioClock};
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::provision::{ProjectPolicy, Provisioner};
use crate::reconcile::{FallbackMatcher, IssueMatcher, IssueReconciler};
use crate::report::{level_counts, MigrationResult, RunReport};
use crate::resolver::resolve;
use crate::transfer::{TransferDriver, TransferJob};
use crate::types::{DestinationPath, Project, TransferMode};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A fatal project error tagged with the phase it surfaced in.
type PhaseError = (ErrorCategory, MigrationError);

fn during(category: ErrorCategory) -> impl FnOnce(MigrationError) -> PhaseError {
    move |e| (category, e)
}

/// Migrates a list of projects between two GitLab instances.
pub struct Migrator {
    config: MigrationConfig,
    source: Arc<dyn GitLabApi>,
    destination: Arc<dyn GitLabApi>,
    mirror: Arc<dyn RepositoryMirror>,
    clock: Arc<dyn Clock>,
    matcher: Arc<dyn IssueMatcher>,
    progress: MigrationProgress,
    cancelled: Arc<AtomicBool>,
}

impl Migrator {
    /// Create a migrator over explicit collaborators.
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn GitLabApi>,
        destination: Arc<dyn GitLabApi>,
        mirror: Arc<dyn RepositoryMirror>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
            mirror,
            clock: Arc::new(TokioClock),
            matcher: Arc::new(FallbackMatcher::default()),
            progress: MigrationProgress::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a migrator talking to the configured instances over HTTP and
    /// mirroring through `git`.
    pub fn from_config(config: MigrationConfig) -> Result<Self> {
        let source = GitLabClient::new(&config.source, config.http_timeout)?;
        let destination = GitLabClient::new(&config.destination, config.http_timeout)?;
        let mirror = GitMirror::new(
            config.git_binary.clone(),
            config.source.token.clone(),
            config.destination.token.clone(),
        );
        Ok(Self::new(
            config,
            Arc::new(source),
            Arc::new(destination),
            Arc::new(mirror),
        ))
    }

    /// Replace the clock that times export and import polling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the issue matching strategy.
    pub fn with_matcher(mut self, matcher: Arc<dyn IssueMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Set a progress tracker.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Stop before the next project once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Migrate every line in order.
    pub async fn run(&self, lines: &[String]) -> RunReport {
        let mut report = RunReport::new();
        info!(
            projects = lines.len(),
            mode = %self.config.mode,
            root_group = %self.config.root_group,
            "Starting migration run"
        );

        for (index, line) in lines.iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                warn!(remaining = lines.len() - index, "Interrupted, skipping remaining projects");
                for rest in &lines[index..] {
                    report.push(MigrationResult::skipped(
                        rest.trim(),
                        ErrorCategory::Interrupted,
                        "run interrupted before the project started",
                    ));
                }
                break;
            }
            report.push(self.migrate_project(line).await);
        }

        report.complete();
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Migration run finished"
        );
        report
    }

    /// Migrate one input line end to end.
    pub async fn migrate_project(&self, line: &str) -> MigrationResult {
        let line = line.trim();
        self.progress.start_project(line);

        let dest = match resolve(line, &self.config.root_group) {
            Ok(dest) => dest,
            Err(e) => {
                warn!(line, error = %e, "Skipping invalid project line");
                let category = e.category().unwrap_or(ErrorCategory::InvalidPath);
                return MigrationResult::skipped(line, category, e.to_string());
            }
        };

        info!(source = %dest.source(), destination = %dest, "Migrating project");
        let mut result = MigrationResult::new(line);
        result.destination = Some(dest.full_path());

        match self.run_pipeline(&dest, &mut result).await {
            Ok(()) => {
                result.succeed();
                info!(destination = %dest, transfer = %result.transfer, "Project migrated");
            }
            Err((category, e)) => {
                error!(destination = %dest, %category, error = %e, "Project failed");
                result.fail(&e, category);
            }
        }

        self.progress.set_phase(MigrationPhase::Complete, 1);
        result
    }

    async fn run_pipeline(
        &self,
        dest: &DestinationPath,
        result: &mut MigrationResult,
    ) -> std::result::Result<(), PhaseError> {
        let mode = self.config.mode;

        // a missing source must not leave an empty destination project behind
        let source_path = dest.source().full_path();
        let source = self
            .source
            .find_project(&source_path)
            .await
            .map_err(during(ErrorCategory::Transfer))?
            .ok_or_else(|| {
                (
                    ErrorCategory::Transfer,
                    MigrationError::from(TransferError::SourceNotFound(source_path.clone())),
                )
            })?;

        self.progress.set_phase(MigrationPhase::Provisioning, dest.len() as u64);
        let policy = match mode {
            TransferMode::Mirror => ProjectPolicy::Ensure,
            TransferMode::ExportImport => ProjectPolicy::LookupOnly,
        };
        let hierarchy = Provisioner::new(self.destination.as_ref())
            .ensure_hierarchy(dest, policy)
            .await
            .map_err(during(ErrorCategory::Provision))?;
        result.levels = hierarchy.levels.clone();
        let (created, existed) = level_counts(&hierarchy.levels);
        info!(destination = %dest, created, existed, "Namespace ready");

        let driver = TransferDriver::new(
            self.source.as_ref(),
            self.destination.as_ref(),
            self.mirror.as_ref(),
            self.clock.as_ref(),
            self.config.poll,
        )
        .with_progress(&self.progress);
        let mut job = TransferJob::new(source.id, mode);

        let transferred = match mode {
            TransferMode::Mirror => match hierarchy.project.as_ref() {
                Some(target) => driver.mirror(&mut job, &source, target).await,
                None => Err(TransferError::MissingProject(dest.full_path()).into()),
            },
            TransferMode::ExportImport => {
                driver
                    .export_import(&mut job, &source, dest, hierarchy.project.as_ref())
                    .await
            }
        };
        result.transfer = job.status;
        let outcome = transferred.map_err(during(ErrorCategory::Transfer))?;
        result.refs_pushed = outcome.refs_pushed;

        if mode == TransferMode::ExportImport && outcome.status.is_success() {
            self.post_import(&source, &outcome.destination, result).await;
        }
        Ok(())
    }

    /// CI rewrite and issue reconciliation; failures here are warnings.
    async fn post_import(
        &self,
        source: &Project,
        destination: &Project,
        result: &mut MigrationResult,
    ) {
        if let Some(rule) = &self.config.include_rewrite {
            self.progress.set_phase(MigrationPhase::RewritingCi, 1);
            match update_ci_includes(self.destination.as_ref(), destination, rule).await {
                Ok(changed) => result.ci_rewritten = changed,
                Err(e) => {
                    warn!(
                        project = %destination.path_with_namespace,
                        error = %e,
                        "CI include rewrite failed"
                    );
                    result.add_warning(format!("CI include rewrite failed: {e}"));
                }
            }
        }

        self.progress.set_phase(MigrationPhase::ReconcilingIssues, 1);
        let reconciler = IssueReconciler::new(self.source.as_ref(), self.destination.as_ref())
            .with_matcher(self.matcher.clone());
        match reconciler.reconcile(source, destination).await {
            Ok(report) => {
                result.issues_reconciled = report.reconciled;
                result.issues_unreconciled = report.unreconciled;
                result.issues_failed = report.failed;
                if report.failed > 0 {
                    result.add_warning(format!(
                        "{} issue(s) could not be commented or closed",
                        report.failed
                    ));
                }
            }
            Err(e) => {
                warn!(
                    project = %source.path_with_namespace,
                    error = %e,
                    "Issue reconciliation failed"
                );
                result.add_warning(format!("issue reconciliation failed: {e}"));
            }
        }
    }
}
