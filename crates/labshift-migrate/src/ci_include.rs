//! Rewriting of `include:` paths in `.gitlab-ci.yml` after an import.
//!
//! Imported pipelines often include shared templates from a directory that
//! moved under a new prefix on the destination. Inside `include:` blocks,
//! every occurrence of the include directory gets the prefix unless it
//! already has it.

use crate::api::GitLabApi;
use crate::config::IncludeRewrite;
use crate::error::{MigrationError, Result};
use crate::types::Project;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use tracing::{debug, info};

/// Pipeline definition file.
pub const CI_FILE: &str = ".gitlab-ci.yml";

/// Commit message used when the file is rewritten.
pub const COMMIT_MESSAGE: &str = "Update .gitlab-ci.yml include paths";

/// Branch used when the project reports none.
const FALLBACK_BRANCH: &str = "main";

/// Prefix include paths in `text` according to `rule`.
///
/// An `include:` block is the `include:` line itself plus every following
/// line that is blank or indented deeper than it.
pub fn rewrite_includes(text: &str, rule: &IncludeRewrite) -> String {
    if rule.directory.is_empty() || !text.contains("include") || !text.contains(&rule.directory) {
        return text.to_string();
    }
    let pattern = match Regex::new(&regex::escape(&rule.directory)) {
        Ok(pattern) => pattern,
        Err(_) => return text.to_string(),
    };

    let mut out = Vec::new();
    let mut include_indent: Option<usize> = None;

    for line in text.lines() {
        let stripped = line.trim_start();
        let indent = line.len() - stripped.len();

        let in_block = if stripped.starts_with("include:") {
            include_indent = Some(indent);
            true
        } else {
            match include_indent {
                Some(block) if !stripped.is_empty() && indent <= block => {
                    include_indent = None;
                    false
                }
                Some(_) => true,
                None => false,
            }
        };

        if in_block {
            out.push(prefix_line(line, &pattern, &rule.prefix));
        } else {
            out.push(line.to_string());
        }
    }

    let mut result = out.join("\n");
    if text.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn prefix_line(line: &str, pattern: &Regex, prefix: &str) -> String {
    let mut result = String::with_capacity(line.len() + prefix.len());
    let mut last = 0;
    for found in pattern.find_iter(line) {
        result.push_str(&line[last..found.start()]);
        if !line[..found.start()].ends_with(prefix) {
            result.push_str(prefix);
        }
        result.push_str(found.as_str());
        last = found.end();
    }
    result.push_str(&line[last..]);
    result
}

/// Rewrite the CI file of `project` on the destination.
///
/// Returns whether a commit was made. A project without a CI file is left
/// alone.
pub async fn update_ci_includes(
    api: &dyn GitLabApi,
    project: &Project,
    rule: &IncludeRewrite,
) -> Result<bool> {
    let branch = project
        .default_branch
        .as_deref()
        .filter(|b| !b.is_empty())
        .unwrap_or(FALLBACK_BRANCH);

    let Some(file) = api.get_file(project.id, CI_FILE, branch).await? else {
        debug!(project = %project.path_with_namespace, "No CI file");
        return Ok(false);
    };

    let text = decode_content(&file.content)?;
    let updated = rewrite_includes(&text, rule);
    if updated == text {
        debug!(project = %project.path_with_namespace, "No CI include updates needed");
        return Ok(false);
    }

    api.update_file(project.id, CI_FILE, branch, &updated, COMMIT_MESSAGE)
        .await?;
    info!(project = %project.path_with_namespace, branch, "Updated CI include paths");
    Ok(true)
}

fn decode_content(content: &str) -> Result<String> {
    // the API wraps long base64 payloads
    let compact: String = content.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| MigrationError::Decode(format!("failed to decode {CI_FILE}: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| MigrationError::Decode(format!("{CI_FILE} is not UTF-8: {e}")))
}
