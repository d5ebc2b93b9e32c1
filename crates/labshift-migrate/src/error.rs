//! Error types for migration operations.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A project line had no usable path segments.
    #[error("Invalid project path {0:?}")]
    InvalidPath(String),

    /// A group or project could not be created on the destination.
    #[error("Provisioning failed for {path}: {reason}")]
    Provision {
        /// Full path of the namespace level being created.
        path: String,
        /// Underlying cause.
        reason: String,
    },

    /// Content transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A single issue could not be linked or closed.
    #[error("Issue reconciliation failed for #{iid}: {reason}")]
    Reconciliation {
        /// Source issue IID.
        iid: u64,
        /// Underlying cause.
        reason: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The GitLab API answered with a non-success status.
    #[error("API request {method} {path} failed with status {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// HTTP method.
        method: String,
        /// API path (relative to `/api/v4`).
        path: String,
        /// Response body, as text.
        body: String,
    },

    /// Content returned by the API could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures while moving content between instances.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The source project does not exist.
    #[error("Source project not found: {0}")]
    SourceNotFound(String),

    /// The destination project could not be located after import.
    #[error("Destination project missing: {0}")]
    MissingProject(String),

    /// `git clone` failed.
    #[error("Git clone failed: {0}")]
    CloneFailed(String),

    /// `git push` failed for at least one ref.
    #[error("Git push failed ({} refs rejected): {reason}", .failed_refs.len())]
    PushFailed {
        /// Refs the destination rejected.
        failed_refs: Vec<String>,
        /// Summary of the failure.
        reason: String,
    },

    /// The source reported a failed export.
    #[error("Export failed: {0}")]
    ExportFailed(String),

    /// The destination reported a failed import.
    #[error("Import failed: {0}")]
    ImportFailed(String),

    /// A polling phase ran past its deadline.
    #[error("{phase} timed out after {}s", .waited.as_secs())]
    Timeout {
        /// Which polling phase expired.
        phase: PollPhase,
        /// Time waited before giving up.
        waited: Duration,
    },
}

/// An asynchronous phase that is polled to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollPhase {
    /// Waiting for the source export.
    Export,
    /// Waiting for the destination import.
    Import,
}

impl std::fmt::Display for PollPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Export => write!(f, "Export"),
            Self::Import => write!(f, "Import"),
        }
    }
}

/// Coarse error classification used in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Bad input line.
    InvalidPath,
    /// Namespace or project creation failure.
    Provision,
    /// Clone, push, export or import failure.
    Transfer,
    /// Per-issue reconciliation failure.
    Reconciliation,
    /// Configuration problem.
    Config,
    /// Run stopped before the project started.
    Interrupted,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath => write!(f, "invalid-path"),
            Self::Provision => write!(f, "provision"),
            Self::Transfer => write!(f, "transfer"),
            Self::Reconciliation => write!(f, "reconciliation"),
            Self::Config => write!(f, "config"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl MigrationError {
    /// Build an API error from its parts.
    pub fn api(status: u16, method: &str, path: &str, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            method: method.to_string(),
            path: path.to_string(),
            body: body.into(),
        }
    }

    /// Category of this error, if it is intrinsic to the error kind.
    ///
    /// Transport-level errors (`Api`, `Network`, `Io`, ...) carry no category
    /// of their own; the orchestrator attributes them to the phase they
    /// surfaced in.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::InvalidPath(_) => Some(ErrorCategory::InvalidPath),
            Self::Provision { .. } => Some(ErrorCategory::Provision),
            Self::Transfer(_) => Some(ErrorCategory::Transfer),
            Self::Reconciliation { .. } => Some(ErrorCategory::Reconciliation),
            Self::InvalidConfig(_) => Some(ErrorCategory::Config),
            _ => None,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Network(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the request failed because the entity already exists.
    ///
    /// GitLab answers duplicate group and project paths with `400` and a
    /// "has already been taken" message rather than `409`.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Api { status: 409, .. } => true,
            Self::Api {
                status: 400, body, ..
            } => body.contains("already been taken") || body.contains("already exists"),
            _ => false,
        }
    }

    /// Whether the API reported the entity as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
