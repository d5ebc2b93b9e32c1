//! Migration configuration.
//!
//! [`MigrationConfig`] is the immutable value handed to the orchestrator.
//! It is assembled from one or more [`PartialConfig`] layers (YAML file,
//! environment, command-line flags), later layers overriding earlier ones.

use crate::error::{MigrationError, Result};
use crate::poll::PollPolicy;
use crate::types::TransferMode;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default include directory rewritten by the CI include pass.
pub const DEFAULT_INCLUDE_DIR: &str = "infra/";

/// Default timeout for a single HTTP request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// A credential that never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw credential.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Connection details for one GitLab instance.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Base URL without trailing slash, e.g. `https://gitlab.example.com`.
    pub base_url: String,
    /// Personal access token.
    pub token: Secret,
}

impl HostConfig {
    /// Create a host config, normalizing the base URL.
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            token: Secret::new(token),
        }
    }
}

/// Prefix rewrite applied to CI include paths after an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRewrite {
    /// Prefix inserted before `directory`; always ends in `/`.
    pub prefix: String,
    /// Include directory to rewrite, e.g. `infra/`.
    pub directory: String,
}

impl IncludeRewrite {
    /// Create a rewrite rule, normalizing both parts to end in `/`.
    pub fn new(prefix: &str, directory: &str) -> Self {
        Self {
            prefix: with_trailing_slash(prefix.trim()),
            directory: with_trailing_slash(directory.trim()),
        }
    }
}

/// Immutable configuration for a migration run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Instance projects are read from.
    pub source: HostConfig,
    /// Instance projects are created on.
    pub destination: HostConfig,
    /// Group inserted ahead of every source path.
    pub root_group: String,
    /// How content is moved.
    pub mode: TransferMode,
    /// CI include rewrite (export-import mode only).
    pub include_rewrite: Option<IncludeRewrite>,
    /// Polling cadence and deadline for export/import phases.
    pub poll: PollPolicy,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// `git` executable used for mirror transfers.
    pub git_binary: String,
}

impl MigrationConfig {
    /// Create a configuration with defaults for everything but the endpoints.
    pub fn new(source: HostConfig, destination: HostConfig, root_group: &str) -> Result<Self> {
        Ok(Self {
            source,
            destination,
            root_group: normalize_root_group(root_group)?,
            mode: TransferMode::default(),
            include_rewrite: None,
            poll: PollPolicy::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            git_binary: "git".to_string(),
        })
    }

    /// Set the transfer mode.
    pub fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the CI include rewrite.
    pub fn with_include_rewrite(mut self, rewrite: IncludeRewrite) -> Self {
        self.include_rewrite = Some(rewrite);
        self
    }

    /// Set the polling policy.
    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }
}

/// One configuration layer; every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub source_url: Option<String>,
    pub source_token: Option<String>,
    pub dest_url: Option<String>,
    pub dest_token: Option<String>,
    pub root_group: Option<String>,
    pub mode: Option<String>,
    pub include_prefix: Option<String>,
    pub include_dir: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub max_wait_minutes: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub git_binary: Option<String>,
}

impl PartialConfig {
    /// Load a layer from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse a layer from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| MigrationError::InvalidConfig(format!("config file: {e}")))
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: PartialConfig) -> Self {
        Self {
            source_url: other.source_url.or(self.source_url),
            source_token: other.source_token.or(self.source_token),
            dest_url: other.dest_url.or(self.dest_url),
            dest_token: other.dest_token.or(self.dest_token),
            root_group: other.root_group.or(self.root_group),
            mode: other.mode.or(self.mode),
            include_prefix: other.include_prefix.or(self.include_prefix),
            include_dir: other.include_dir.or(self.include_dir),
            poll_interval_secs: other.poll_interval_secs.or(self.poll_interval_secs),
            max_wait_minutes: other.max_wait_minutes.or(self.max_wait_minutes),
            http_timeout_secs: other.http_timeout_secs.or(self.http_timeout_secs),
            git_binary: other.git_binary.or(self.git_binary),
        }
    }

    /// Validate and build the final configuration.
    pub fn build(self) -> Result<MigrationConfig> {
        let source = HostConfig::new(
            &required(self.source_url, "source_url")?,
            required(self.source_token, "source_token")?,
        );
        let destination = HostConfig::new(
            &required(self.dest_url, "dest_url")?,
            required(self.dest_token, "dest_token")?,
        );
        let root_group = required(self.root_group, "root_group")?;

        let mut config = MigrationConfig::new(source, destination, &root_group)?;

        if let Some(mode) = self.mode {
            config.mode = mode.parse()?;
        }

        if let Some(prefix) = self.include_prefix.filter(|p| !p.trim().is_empty()) {
            let directory = self
                .include_dir
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_INCLUDE_DIR.to_string());
            config.include_rewrite = Some(IncludeRewrite::new(&prefix, &directory));
        }

        let mut poll = PollPolicy::default();
        if let Some(secs) = self.poll_interval_secs {
            if secs == 0 {
                return Err(MigrationError::InvalidConfig(
                    "poll_interval_secs must be greater than zero".to_string(),
                ));
            }
            poll.interval = Duration::from_secs(secs);
        }
        if let Some(minutes) = self.max_wait_minutes {
            let secs = minutes.checked_mul(60).ok_or_else(|| {
                MigrationError::InvalidConfig(format!("max_wait_minutes {minutes} is too large"))
            })?;
            poll.max_wait = Duration::from_secs(secs);
        }
        config.poll = poll;

        if let Some(secs) = self.http_timeout_secs {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(git) = self.git_binary {
            config.git_binary = git;
        }

        Ok(config)
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MigrationError::InvalidConfig(format!("missing required setting {key}")))
}

/// Add `https://` when no scheme is given and drop trailing slashes.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim();
    let url = if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    url.trim_end_matches('/').to_string()
}

/// Strip whitespace and slashes from the root group name.
pub fn normalize_root_group(root_group: &str) -> Result<String> {
    let root = root_group.trim().trim_matches('/');
    if root.is_empty() {
        return Err(MigrationError::InvalidConfig(
            "root_group cannot be empty after stripping slashes".to_string(),
        ));
    }
    Ok(root.to_string())
}

fn with_trailing_slash(value: &str) -> String {
    if value.is_empty() || value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}
