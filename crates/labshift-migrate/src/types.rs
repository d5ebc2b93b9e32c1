//! Common types for migration operations.

use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};

/// Source-control suffix stripped from the last path segment.
const GIT_SUFFIX: &str = ".git";

/// A project path on the source instance, e.g. `group/subgroup/project`.
///
/// Always holds at least one segment and no segment contains `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectPath(Vec<String>);

impl ProjectPath {
    /// Parse a single input line into a project path.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_suffix(GIT_SUFFIX).unwrap_or(trimmed);

        let segments: Vec<String> = trimmed
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if segments.is_empty() {
            return Err(MigrationError::InvalidPath(raw.to_string()));
        }

        Ok(Self(segments))
    }

    /// Path segments, outermost group first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The project's own name (last segment).
    pub fn name(&self) -> &str {
        // parse() guarantees at least one segment
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Slash-joined path as used by the source API.
    pub fn full_path(&self) -> String {
        self.0.join("/")
    }
}

impl std::fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

/// A project path with the destination root group inserted in front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationPath {
    root: String,
    project: ProjectPath,
}

impl DestinationPath {
    pub(crate) fn new(root: String, project: ProjectPath) -> Self {
        Self { root, project }
    }

    /// The configured root group.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The original source path.
    pub fn source(&self) -> &ProjectPath {
        &self.project
    }

    /// All segments: root group, source groups, project name.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.root.as_str())
            .chain(self.project.segments().iter().map(String::as_str))
    }

    /// Number of segments; always one more than the source path.
    pub fn len(&self) -> usize {
        self.project.len() + 1
    }

    /// Always `false`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Group segments, i.e. every segment but the project name.
    pub fn group_segments(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.segments().collect();
        segments.pop();
        segments
    }

    /// Full path of the deepest group the project lives in.
    pub fn namespace(&self) -> String {
        self.group_segments().join("/")
    }

    /// The project's name on the destination.
    pub fn project_name(&self) -> &str {
        self.project.name()
    }

    /// Full destination path including the project name.
    pub fn full_path(&self) -> String {
        self.segments().collect::<Vec<_>>().join("/")
    }

    /// One node per group level, outermost first.
    pub fn group_nodes(&self) -> Vec<NamespaceNode> {
        let mut nodes: Vec<NamespaceNode> = Vec::new();
        for name in self.group_segments() {
            let parent_path = nodes.last().map(|n| n.full_path.clone());
            let full_path = match &parent_path {
                Some(parent) => format!("{parent}/{name}"),
                None => name.to_string(),
            };
            nodes.push(NamespaceNode {
                full_path,
                name: name.to_string(),
                parent_path,
            });
        }
        nodes
    }
}

impl std::fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

/// A group level on the destination, which may or may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceNode {
    /// Full slash-joined path.
    pub full_path: String,
    /// Last path segment.
    pub name: String,
    /// Full path of the parent group; `None` for the top level.
    pub parent_path: Option<String>,
}

/// Whether a namespace level had to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LevelOutcome {
    /// Found on the destination.
    Existed,
    /// Created by this run.
    Created,
    /// Not present and intentionally left for the import to create.
    Absent,
}

impl std::fmt::Display for LevelOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Existed => write!(f, "already existed"),
            Self::Created => write!(f, "created"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// A namespace level and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelReport {
    /// Full path of the group or project.
    pub path: String,
    /// Whether this is the project level.
    pub is_project: bool,
    /// Outcome.
    pub outcome: LevelOutcome,
}

/// How project content is moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Clone all refs from the source and push them to the destination.
    Mirror,
    /// Export a bundle from the source and import it on the destination.
    #[default]
    ExportImport,
}

impl std::str::FromStr for TransferMode {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mirror" => Ok(Self::Mirror),
            "export-import" | "export_import" | "export" => Ok(Self::ExportImport),
            other => Err(MigrationError::InvalidConfig(format!(
                "unknown transfer mode {other:?} (expected mirror or export-import)"
            ))),
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mirror => write!(f, "mirror"),
            Self::ExportImport => write!(f, "export-import"),
        }
    }
}

/// Lifecycle of a content transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStatus {
    /// Not attempted.
    #[default]
    NotStarted,
    /// Running.
    InProgress,
    /// Content landed on the destination.
    Succeeded,
    /// Destination project already existed; import was not attempted.
    SkippedImport,
    /// Terminal failure.
    Failed,
}

impl TransferStatus {
    /// Whether the destination can be treated as holding the content.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::SkippedImport)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::InProgress => write!(f, "in progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::SkippedImport => write!(f, "skipped import (already present)"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// GitLab group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Numeric id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Full slash-joined path.
    pub full_path: String,
}

/// GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Numeric id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Full slash-joined path.
    pub path_with_namespace: String,
    /// HTTPS clone URL.
    #[serde(default)]
    pub http_url_to_repo: String,
    /// Default branch, if the repository is not empty.
    #[serde(default)]
    pub default_branch: Option<String>,
    /// Web URL.
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Issue state filter for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueScope {
    /// Open issues only.
    Opened,
    /// Open and closed issues.
    All,
}

impl IssueScope {
    /// Query parameter value.
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::All => "all",
        }
    }
}

/// GitLab issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Instance-wide id.
    pub id: u64,
    /// Project-scoped number.
    pub iid: u64,
    /// Owning project id.
    pub project_id: u64,
    /// Title.
    pub title: String,
    /// `opened` or `closed`.
    pub state: String,
    /// Creation timestamp as reported by the API.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Web URL.
    #[serde(default)]
    pub web_url: Option<String>,
}

impl Issue {
    /// Reference for comment and close calls.
    pub fn reference(&self) -> IssueRef {
        IssueRef {
            project_id: self.project_id,
            iid: self.iid,
        }
    }

    /// Whether the issue is still open.
    pub fn is_open(&self) -> bool {
        self.state == "opened"
    }
}

/// Addresses one issue within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    /// Project id.
    pub project_id: u64,
    /// Project-scoped issue number.
    pub iid: u64,
}

impl std::fmt::Display for IssueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.project_id, self.iid)
    }
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Note id.
    pub id: u64,
    /// Markdown body.
    pub body: String,
}

/// A source issue paired with its destination counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLink {
    /// Issue on the source instance.
    pub source: IssueRef,
    /// Issue on the destination instance.
    pub destination: IssueRef,
    /// Web URL of the destination issue.
    pub destination_url: String,
}

/// A file fetched from a repository through the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFile {
    /// Path within the repository.
    pub file_path: String,
    /// Encoding of `content`, normally `base64`.
    pub encoding: String,
    /// Encoded content.
    pub content: String,
}

/// Handle for an export running on the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportToken(pub u64);

/// Handle for an import running on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportToken(pub u64);

/// What the destination returned when an import was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTicket {
    /// Project id created for the import, when reported.
    pub project_id: Option<u64>,
}

/// Status of a polled asynchronous job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Still running, or not yet visible.
    Pending,
    /// Completed successfully.
    Finished,
    /// Completed with an error.
    Failed(String),
}
