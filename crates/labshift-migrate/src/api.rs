//! Capability surface the engine needs from a GitLab instance.

use crate::error::Result;
use crate::types::{
    ExportToken, Group, ImportTicket, ImportToken, Issue, IssueRef, IssueScope, Note, PollStatus,
    Project, RepositoryFile,
};

use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// An export bundle downloaded to a temporary file.
///
/// The file is removed when the archive is dropped.
#[derive(Debug)]
pub struct ExportArchive {
    file: NamedTempFile,
    size: u64,
}

impl ExportArchive {
    /// Wrap an already-written temporary file.
    pub fn new(file: NamedTempFile, size: u64) -> Self {
        Self { file, size }
    }

    /// Write `bytes` into a fresh temporary archive.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("labshift-export-")
            .suffix(".tar.gz")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self::new(file, bytes.len() as u64))
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Operations against one GitLab instance.
///
/// Lookups return `Ok(None)` when the entity does not exist. Mutations
/// surface API failures as [`crate::MigrationError::Api`] so callers can
/// classify conflicts and transient errors.
#[async_trait]
pub trait GitLabApi: Send + Sync {
    /// Instance base URL, used for logging.
    fn base_url(&self) -> &str;

    /// Look up a group by full path.
    async fn find_group(&self, full_path: &str) -> Result<Option<Group>>;

    /// Create a group; top-level when `parent_id` is `None`.
    async fn create_group(&self, parent_id: Option<u64>, name: &str) -> Result<Group>;

    /// Look up a project by full path.
    async fn find_project(&self, full_path: &str) -> Result<Option<Project>>;

    /// Fetch a project by id.
    async fn get_project(&self, id: u64) -> Result<Option<Project>>;

    /// Create an empty project inside a group.
    async fn create_project(&self, group_id: u64, name: &str) -> Result<Project>;

    /// Schedule an export of a project.
    async fn request_export(&self, project_id: u64) -> Result<ExportToken>;

    /// Check on a scheduled export.
    async fn poll_export(&self, token: &ExportToken) -> Result<PollStatus>;

    /// Download a finished export.
    async fn download_export(&self, token: &ExportToken) -> Result<ExportArchive>;

    /// Submit an export bundle as a new project under `namespace`.
    async fn request_import(
        &self,
        namespace: &str,
        name: &str,
        archive: &ExportArchive,
    ) -> Result<ImportTicket>;

    /// Check on a submitted import.
    async fn poll_import(&self, token: &ImportToken) -> Result<PollStatus>;

    /// List issues of a project, ordered by IID.
    async fn list_issues(&self, project_id: u64, scope: IssueScope) -> Result<Vec<Issue>>;

    /// List open issues of a project.
    async fn list_open_issues(&self, project_id: u64) -> Result<Vec<Issue>> {
        self.list_issues(project_id, IssueScope::Opened).await
    }

    /// List the notes on an issue, oldest first.
    async fn list_issue_notes(&self, issue: &IssueRef) -> Result<Vec<Note>>;

    /// Add a comment to an issue.
    async fn comment_issue(&self, issue: &IssueRef, body: &str) -> Result<()>;

    /// Close an issue.
    async fn close_issue(&self, issue: &IssueRef) -> Result<()>;

    /// Fetch a repository file at `git_ref`.
    async fn get_file(
        &self,
        project_id: u64,
        file_path: &str,
        git_ref: &str,
    ) -> Result<Option<RepositoryFile>>;

    /// Commit new content for an existing file.
    async fn update_file(
        &self,
        project_id: u64,
        file_path: &str,
        branch: &str,
        content: &str,
        commit_message: &str,
    ) -> Result<()>;
}
