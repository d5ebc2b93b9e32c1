//! Namespace remapping from source paths to destination paths.

use crate::error::{MigrationError, Result};
use crate::types::{DestinationPath, ProjectPath};

/// Marker for comment lines in a project list.
const COMMENT_PREFIX: char = '#';

/// Map a raw project path onto the destination by prepending `root_group`.
///
/// `root.group/a/b/proj.git` under `new-root` becomes
/// `new-root/root.group/a/b/proj`.
pub fn resolve(raw_path: &str, root_group: &str) -> Result<DestinationPath> {
    let root = root_group.trim().trim_matches('/');
    if root.is_empty() || root.contains('/') {
        return Err(MigrationError::InvalidConfig(format!(
            "root group {root_group:?} must be a single non-empty segment"
        )));
    }

    let project = ProjectPath::parse(raw_path)?;
    Ok(DestinationPath::new(root.to_string(), project))
}

/// Extract project lines from a list file, skipping blanks and `#` comments.
pub fn parse_project_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_PREFIX))
        .map(str::to_string)
        .collect()
}
