//! Idempotent creation of the destination namespace hierarchy.
//!
//! Every level is looked up before it is created. A create that fails
//! because the entity appeared in the meantime (another run racing on a
//! shared ancestor group) is resolved by looking it up again and reporting
//! it as already existing. Any other creation failure is returned as
//! [`MigrationError::Provision`] and is never retried.

use crate::api::GitLabApi;
use crate::error::{MigrationError, Result};
use crate::types::{DestinationPath, Group, LevelOutcome, LevelReport, Project};

use tracing::{debug, info, warn};

/// What to do with the project level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectPolicy {
    /// Create the project if it is missing.
    Ensure,
    /// Only look it up; the import will create it.
    LookupOnly,
}

/// Result of provisioning a destination path.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    /// Outcome per level, outermost group first, project last.
    pub levels: Vec<LevelReport>,
    /// The deepest group, which holds the project.
    pub group: Group,
    /// The project, unless it is absent under [`ProjectPolicy::LookupOnly`].
    pub project: Option<Project>,
}

impl Hierarchy {
    /// Outcome of the project level.
    pub fn project_outcome(&self) -> LevelOutcome {
        self.levels
            .last()
            .map_or(LevelOutcome::Absent, |level| level.outcome)
    }
}

/// Ensures groups and projects exist on the destination.
pub struct Provisioner<'a> {
    api: &'a dyn GitLabApi,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner against the destination API.
    pub fn new(api: &'a dyn GitLabApi) -> Self {
        Self { api }
    }

    /// Ensure every group level of `dest` exists, then handle the project.
    pub async fn ensure_hierarchy(
        &self,
        dest: &DestinationPath,
        policy: ProjectPolicy,
    ) -> Result<Hierarchy> {
        let mut levels = Vec::with_capacity(dest.len());
        let mut parent: Option<Group> = None;

        for node in dest.group_nodes() {
            let parent_id = parent.as_ref().map(|g| g.id);
            let (group, outcome) = self.ensure_group(&node.full_path, &node.name, parent_id).await?;
            log_level(&node.full_path, outcome, "Group");
            levels.push(LevelReport {
                path: node.full_path,
                is_project: false,
                outcome,
            });
            parent = Some(group);
        }

        let group = parent.ok_or_else(|| MigrationError::Provision {
            path: dest.full_path(),
            reason: "destination path has no group level".to_string(),
        })?;

        let project_path = dest.full_path();
        let (project, outcome) = match policy {
            ProjectPolicy::Ensure => {
                let (project, outcome) = self
                    .ensure_project(&project_path, dest.project_name(), group.id)
                    .await?;
                (Some(project), outcome)
            }
            ProjectPolicy::LookupOnly => match self.api.find_project(&project_path).await? {
                Some(project) => (Some(project), LevelOutcome::Existed),
                None => (None, LevelOutcome::Absent),
            },
        };
        log_level(&project_path, outcome, "Project");
        levels.push(LevelReport {
            path: project_path,
            is_project: true,
            outcome,
        });

        Ok(Hierarchy {
            levels,
            group,
            project,
        })
    }

    /// Look up a group, creating it under `parent_id` when absent.
    pub async fn ensure_group(
        &self,
        full_path: &str,
        name: &str,
        parent_id: Option<u64>,
    ) -> Result<(Group, LevelOutcome)> {
        if let Some(group) = self.api.find_group(full_path).await? {
            return Ok((group, LevelOutcome::Existed));
        }

        match self.api.create_group(parent_id, name).await {
            Ok(group) => Ok((group, LevelOutcome::Created)),
            Err(e) if e.is_conflict() => {
                warn!(path = %full_path, "Group appeared concurrently, looking it up again");
                match self.api.find_group(full_path).await? {
                    Some(group) => Ok((group, LevelOutcome::Existed)),
                    None => Err(provision_error(full_path, e)),
                }
            }
            Err(e) => Err(provision_error(full_path, e)),
        }
    }

    /// Look up a project, creating it inside `group_id` when absent.
    pub async fn ensure_project(
        &self,
        full_path: &str,
        name: &str,
        group_id: u64,
    ) -> Result<(Project, LevelOutcome)> {
        if let Some(project) = self.api.find_project(full_path).await? {
            return Ok((project, LevelOutcome::Existed));
        }

        match self.api.create_project(group_id, name).await {
            Ok(project) => Ok((project, LevelOutcome::Created)),
            Err(e) if e.is_conflict() => {
                warn!(path = %full_path, "Project appeared concurrently, looking it up again");
                match self.api.find_project(full_path).await? {
                    Some(project) => Ok((project, LevelOutcome::Existed)),
                    None => Err(provision_error(full_path, e)),
                }
            }
            Err(e) => Err(provision_error(full_path, e)),
        }
    }
}

fn provision_error(path: &str, cause: MigrationError) -> MigrationError {
    MigrationError::Provision {
        path: path.to_string(),
        reason: cause.to_string(),
    }
}

fn log_level(path: &str, outcome: LevelOutcome, kind: &str) {
    match outcome {
        LevelOutcome::Created => info!(path = %path, "{kind} created"),
        LevelOutcome::Existed => info!(path = %path, "{kind} already exists"),
        LevelOutcome::Absent => debug!(path = %path, "{kind} absent"),
    }
}
