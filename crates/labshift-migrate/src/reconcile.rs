//! Closing source issues that now live on the destination.
//!
//! Each open source issue is paired with its destination counterpart by an
//! [`IssueMatcher`]. A matched pair gets a `Migrated to: <url>` comment on
//! the source issue, which is then closed. Unmatched and ambiguous issues
//! stay open and are counted as unreconciled. Destination issues are only
//! ever read.

use crate::api::GitLabApi;
use crate::error::{MigrationError, Result};
use crate::types::{Issue, IssueLink, IssueScope, Project};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of the cross-link comment posted on source issues.
pub const MIGRATED_NOTE_PREFIX: &str = "Migrated to: ";

/// Outcome of matching one source issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult<'a> {
    /// Exactly one destination issue matches.
    Matched(&'a Issue),
    /// More than one destination issue matches.
    Ambiguous(usize),
    /// No destination issue matches.
    Unmatched,
}

impl<'a> MatchResult<'a> {
    fn from_candidates(mut candidates: impl Iterator<Item = &'a Issue>) -> Self {
        match (candidates.next(), candidates.next()) {
            (None, _) => Self::Unmatched,
            (Some(issue), None) => Self::Matched(issue),
            (Some(_), Some(_)) => Self::Ambiguous(2 + candidates.count()),
        }
    }
}

/// Strategy for pairing a source issue with a destination issue.
pub trait IssueMatcher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Find the counterpart of `source` among `candidates`.
    fn find<'a>(&self, source: &Issue, candidates: &'a [Issue]) -> MatchResult<'a>;
}

/// Matches on the project-scoped issue number, which an import preserves.
#[derive(Debug, Clone, Copy, Default)]
pub struct IidMatcher;

impl IssueMatcher for IidMatcher {
    fn name(&self) -> &str {
        "iid"
    }

    fn find<'a>(&self, source: &Issue, candidates: &'a [Issue]) -> MatchResult<'a> {
        MatchResult::from_candidates(candidates.iter().filter(|c| c.iid == source.iid))
    }
}

/// Matches on exact title plus creation timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleCreatedMatcher;

impl IssueMatcher for TitleCreatedMatcher {
    fn name(&self) -> &str {
        "title+created_at"
    }

    fn find<'a>(&self, source: &Issue, candidates: &'a [Issue]) -> MatchResult<'a> {
        let Some(created_at) = source.created_at.as_deref() else {
            return MatchResult::Unmatched;
        };
        if source.title.is_empty() {
            return MatchResult::Unmatched;
        }
        MatchResult::from_candidates(candidates.iter().filter(|c| {
            c.title == source.title && c.created_at.as_deref() == Some(created_at)
        }))
    }
}

/// Tries each strategy in order until one gives a definite answer.
///
/// An ambiguous answer stops the search.
pub struct FallbackMatcher {
    strategies: Vec<Box<dyn IssueMatcher>>,
}

impl FallbackMatcher {
    /// Build from strategies in priority order.
    pub fn new(strategies: Vec<Box<dyn IssueMatcher>>) -> Self {
        Self { strategies }
    }
}

impl Default for FallbackMatcher {
    fn default() -> Self {
        Self::new(vec![Box::new(IidMatcher), Box::new(TitleCreatedMatcher)])
    }
}

impl IssueMatcher for FallbackMatcher {
    fn name(&self) -> &str {
        "fallback"
    }

    fn find<'a>(&self, source: &Issue, candidates: &'a [Issue]) -> MatchResult<'a> {
        for strategy in &self.strategies {
            match strategy.find(source, candidates) {
                MatchResult::Unmatched => continue,
                definite => {
                    debug!(iid = source.iid, strategy = strategy.name(), "Match decided");
                    return definite;
                }
            }
        }
        MatchResult::Unmatched
    }
}

/// Counts produced by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Source issues linked and closed.
    pub reconciled: usize,
    /// Source issues left open: unmatched, ambiguous, or without a link target.
    pub unreconciled: usize,
    /// Source issues whose comment or close call failed.
    pub failed: usize,
    /// Pairs that were linked.
    pub links: Vec<IssueLink>,
}

/// Links and closes source issues after an import.
pub struct IssueReconciler<'a> {
    source: &'a dyn GitLabApi,
    destination: &'a dyn GitLabApi,
    matcher: Arc<dyn IssueMatcher>,
}

impl<'a> IssueReconciler<'a> {
    /// Create a reconciler with the default matching strategy.
    pub fn new(source: &'a dyn GitLabApi, destination: &'a dyn GitLabApi) -> Self {
        Self {
            source,
            destination,
            matcher: Arc::new(FallbackMatcher::default()),
        }
    }

    /// Use a different matching strategy.
    pub fn with_matcher(mut self, matcher: Arc<dyn IssueMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Reconcile the open issues of `source_project` against `dest_project`.
    ///
    /// Listing failures are returned; per-issue failures are counted.
    pub async fn reconcile(
        &self,
        source_project: &Project,
        dest_project: &Project,
    ) -> Result<ReconcileReport> {
        let source_issues = self.source.list_open_issues(source_project.id).await?;
        let dest_issues = self
            .destination
            .list_issues(dest_project.id, IssueScope::All)
            .await?;

        let dest_open = dest_issues.iter().filter(|i| i.is_open()).count();
        if dest_open != source_issues.len() {
            warn!(
                project = %dest_project.path_with_namespace,
                source_open = source_issues.len(),
                destination_open = dest_open,
                "Open issue count mismatch"
            );
        }

        let mut report = ReconcileReport::default();
        for issue in &source_issues {
            let counterpart = match self.matcher.find(issue, &dest_issues) {
                MatchResult::Matched(counterpart) => counterpart,
                MatchResult::Ambiguous(count) => {
                    warn!(
                        iid = issue.iid,
                        candidates = count,
                        "Ambiguous issue match, leaving open"
                    );
                    report.unreconciled += 1;
                    continue;
                }
                MatchResult::Unmatched => {
                    warn!(iid = issue.iid, "No destination issue found, leaving open");
                    report.unreconciled += 1;
                    continue;
                }
            };

            let Some(url) = counterpart.web_url.as_deref().filter(|u| !u.is_empty()) else {
                warn!(iid = issue.iid, "Destination issue has no web URL, leaving open");
                report.unreconciled += 1;
                continue;
            };

            match self.link_and_close(issue, url).await {
                Ok(()) => {
                    debug!(iid = issue.iid, url, "Closed source issue");
                    report.reconciled += 1;
                    report.links.push(IssueLink {
                        source: issue.reference(),
                        destination: counterpart.reference(),
                        destination_url: url.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Issue reconciliation failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            project = %source_project.path_with_namespace,
            reconciled = report.reconciled,
            unreconciled = report.unreconciled,
            failed = report.failed,
            "Issue reconciliation finished"
        );
        Ok(report)
    }

    async fn link_and_close(&self, issue: &Issue, url: &str) -> Result<()> {
        let reference = issue.reference();
        let note = migrated_note(url);
        let wrap = |e: MigrationError| MigrationError::Reconciliation {
            iid: issue.iid,
            reason: e.to_string(),
        };

        let notes = self.source.list_issue_notes(&reference).await.map_err(wrap)?;
        if notes.iter().any(|n| n.body.trim() == note) {
            debug!(iid = issue.iid, "Migration note already present");
        } else {
            self.source
                .comment_issue(&reference, &note)
                .await
                .map_err(wrap)?;
        }

        self.source.close_issue(&reference).await.map_err(wrap)
    }
}

/// Comment body linking a source issue to its destination counterpart.
pub fn migrated_note(url: &str) -> String {
    format!("{MIGRATED_NOTE_PREFIX}{url}")
}
