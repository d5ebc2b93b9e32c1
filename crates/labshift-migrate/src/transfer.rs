//! Content transfer between instances.
//!
//! Mirror mode clones every ref from the source and pushes every branch
//! and tag to the destination. Export-import mode drives this state
//! machine per project:
//!
//! ```text
//! Idle -> ExportRequested -> ExportPolling -> ExportReady
//!      -> ImportRequested -> ImportPolling -> Done
//! Idle -> SkippedImport                  (destination project exists)
//! any non-terminal state -> Failed
//! ```

use crate::api::GitLabApi;
use crate::error::{MigrationError, PollPhase, Result, TransferError};
use crate::mirror::RepositoryMirror;
use crate::poll::{poll_until_terminal, PollOutcome, PollPolicy, Clock};
use crate::progress::{MigrationPhase, MigrationProgress};
use crate::types::{
    DestinationPath, ExportToken, ImportToken, Project, TransferMode, TransferStatus,
};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// States of an export-import transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportImportState {
    Idle,
    ExportRequested,
    ExportPolling,
    ExportReady,
    ImportRequested,
    ImportPolling,
    Done,
    SkippedImport,
    Failed,
}

impl ExportImportState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::SkippedImport | Self::Failed)
    }
}

/// One in-flight content move.
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Source project id.
    pub source_project_id: u64,
    /// Destination project id, once known.
    pub destination_project_id: Option<u64>,
    /// Transfer mode.
    pub mode: TransferMode,
    /// Coarse status.
    pub status: TransferStatus,
    /// Export token, once requested.
    pub export_token: Option<ExportToken>,
    /// Import token, once requested.
    pub import_token: Option<ImportToken>,
    /// Time spent waiting across all polling phases.
    pub elapsed_wait: Duration,
    state: ExportImportState,
    history: Vec<ExportImportState>,
}

impl TransferJob {
    /// Create a job that has not started yet.
    pub fn new(source_project_id: u64, mode: TransferMode) -> Self {
        Self {
            source_project_id,
            destination_project_id: None,
            mode,
            status: TransferStatus::NotStarted,
            export_token: None,
            import_token: None,
            elapsed_wait: Duration::ZERO,
            state: ExportImportState::Idle,
            history: vec![ExportImportState::Idle],
        }
    }

    /// Current export-import state.
    pub fn state(&self) -> ExportImportState {
        self.state
    }

    /// Every state the job has been in, in order.
    pub fn history(&self) -> &[ExportImportState] {
        &self.history
    }

    fn transition(&mut self, next: ExportImportState) {
        debug_assert!(
            !self.state.is_terminal(),
            "transition out of terminal state {:?}",
            self.state
        );
        debug!(from = ?self.state, to = ?next, source = self.source_project_id, "Transfer state");
        self.state = next;
        self.history.push(next);
        self.status = match next {
            ExportImportState::Done => TransferStatus::Succeeded,
            ExportImportState::SkippedImport => TransferStatus::SkippedImport,
            ExportImportState::Failed => TransferStatus::Failed,
            _ => TransferStatus::InProgress,
        };
    }

    fn fail(&mut self) {
        match self.mode {
            TransferMode::Mirror => self.status = TransferStatus::Failed,
            TransferMode::ExportImport if !self.state.is_terminal() => {
                self.transition(ExportImportState::Failed)
            }
            TransferMode::ExportImport => {}
        }
    }
}

/// What a successful transfer produced.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// Terminal status; `Succeeded` or `SkippedImport`.
    pub status: TransferStatus,
    /// The destination project holding the content.
    pub destination: Project,
    /// Refs pushed (mirror mode).
    pub refs_pushed: usize,
}

/// Moves project content using the configured mode.
pub struct TransferDriver<'a> {
    source: &'a dyn GitLabApi,
    destination: &'a dyn GitLabApi,
    mirror: &'a dyn RepositoryMirror,
    clock: &'a dyn Clock,
    poll: PollPolicy,
    progress: Option<&'a MigrationProgress>,
}

impl<'a> TransferDriver<'a> {
    /// Create a driver.
    pub fn new(
        source: &'a dyn GitLabApi,
        destination: &'a dyn GitLabApi,
        mirror: &'a dyn RepositoryMirror,
        clock: &'a dyn Clock,
        poll: PollPolicy,
    ) -> Self {
        Self {
            source,
            destination,
            mirror,
            clock,
            poll,
            progress: None,
        }
    }

    /// Report phases to `progress`.
    pub fn with_progress(mut self, progress: &'a MigrationProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn phase(&self, phase: MigrationPhase) {
        if let Some(progress) = self.progress {
            progress.set_phase(phase, 1);
        }
    }

    /// Clone every ref from `source` and push it to `destination`.
    ///
    /// Fails if any ref is rejected, even when others landed.
    pub async fn mirror(
        &self,
        job: &mut TransferJob,
        source: &Project,
        destination: &Project,
    ) -> Result<TransferOutcome> {
        job.status = TransferStatus::InProgress;
        job.destination_project_id = Some(destination.id);

        let result = self.run_mirror(source, destination).await;
        match &result {
            Ok(_) => job.status = TransferStatus::Succeeded,
            Err(_) => job.fail(),
        }
        result
    }

    async fn run_mirror(&self, source: &Project, destination: &Project) -> Result<TransferOutcome> {
        self.phase(MigrationPhase::Cloning);
        let clone = self.mirror.clone_all_refs(source).await?;
        info!(
            project = %source.path_with_namespace,
            branches = clone.branch_count(),
            tags = clone.tag_count(),
            "Cloned source repository"
        );

        self.phase(MigrationPhase::Pushing);
        let report = self.mirror.push_all_refs(&clone, destination).await?;
        if !report.is_complete() {
            let failed_refs = report.rejected();
            return Err(TransferError::PushFailed {
                reason: format!(
                    "destination rejected {} of {} refs",
                    failed_refs.len(),
                    report.updates.len()
                ),
                failed_refs,
            }
            .into());
        }

        info!(
            project = %destination.path_with_namespace,
            refs = report.pushed(),
            "Pushed all refs"
        );
        Ok(TransferOutcome {
            status: TransferStatus::Succeeded,
            destination: destination.clone(),
            refs_pushed: report.pushed(),
        })
    }

    /// Export `source` and import it at `dest`, unless `existing` is set.
    pub async fn export_import(
        &self,
        job: &mut TransferJob,
        source: &Project,
        dest: &DestinationPath,
        existing: Option<&Project>,
    ) -> Result<TransferOutcome> {
        if let Some(project) = existing {
            info!(project = %dest, "Project already exists on destination, skipping import");
            job.destination_project_id = Some(project.id);
            job.transition(ExportImportState::SkippedImport);
            return Ok(TransferOutcome {
                status: TransferStatus::SkippedImport,
                destination: project.clone(),
                refs_pushed: 0,
            });
        }

        let result = self.run_export_import(job, source, dest).await;
        if result.is_err() {
            job.fail();
        }
        result
    }

    async fn run_export_import(
        &self,
        job: &mut TransferJob,
        source: &Project,
        dest: &DestinationPath,
    ) -> Result<TransferOutcome> {
        self.phase(MigrationPhase::Exporting);
        info!(project = %source.path_with_namespace, "Exporting project from source");
        let export = self.source.request_export(source.id).await?;
        job.export_token = Some(export);
        job.transition(ExportImportState::ExportRequested);

        job.transition(ExportImportState::ExportPolling);
        let polled = poll_until_terminal(PollPhase::Export, self.poll, self.clock, || {
            self.source.poll_export(&export)
        })
        .await;
        let polled = track_wait(job, polled)?;
        job.transition(ExportImportState::ExportReady);
        debug!(polls = polled.polls, "Export ready");

        self.phase(MigrationPhase::Downloading);
        let archive = self.source.download_export(&export).await?;
        debug!(bytes = archive.size(), "Export downloaded");

        self.phase(MigrationPhase::Importing);
        info!(project = %dest, "Importing project to destination");
        let ticket = self
            .destination
            .request_import(&dest.namespace(), dest.project_name(), &archive)
            .await?;
        drop(archive);
        job.transition(ExportImportState::ImportRequested);

        let project_id = match ticket.project_id {
            Some(id) => id,
            None => self
                .destination
                .find_project(&dest.full_path())
                .await?
                .ok_or_else(|| TransferError::MissingProject(dest.full_path()))?
                .id,
        };
        let import = ImportToken(project_id);
        job.destination_project_id = Some(project_id);
        job.import_token = Some(import);

        job.transition(ExportImportState::ImportPolling);
        let polled = poll_until_terminal(PollPhase::Import, self.poll, self.clock, || {
            self.destination.poll_import(&import)
        })
        .await;
        track_wait(job, polled)?;

        let project = self
            .destination
            .get_project(project_id)
            .await?
            .ok_or_else(|| TransferError::MissingProject(dest.full_path()))?;
        job.transition(ExportImportState::Done);
        info!(project = %dest, "Import finished");

        Ok(TransferOutcome {
            status: TransferStatus::Succeeded,
            destination: project,
            refs_pushed: 0,
        })
    }
}

/// Add the waited time of a polling phase to the job, including timeouts.
fn track_wait(
    job: &mut TransferJob,
    polled: Result<PollOutcome>,
) -> Result<PollOutcome> {
    match &polled {
        Ok(outcome) => job.elapsed_wait += outcome.waited,
        Err(MigrationError::Transfer(TransferError::Timeout { waited, .. })) => {
            job.elapsed_wait += *waited
        }
        Err(_) => {}
    }
    polled
}
