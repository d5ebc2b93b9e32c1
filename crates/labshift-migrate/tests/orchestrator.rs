//! End-to-end runs of the migrator over in-memory instances.

mod common;

use common::{config, FakeGitLab, FakeMirror, ManualClock};
use labshift_migrate::{
    ci_include, ErrorCategory, IncludeRewrite, LevelOutcome, MigrationPhase, MigrationProgress,
    Migrator, PollPolicy, PollStatus, ProjectOutcome, TransferMode, TransferStatus,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    source: Arc<FakeGitLab>,
    dest: Arc<FakeGitLab>,
    mirror: Arc<FakeMirror>,
}

impl Harness {
    fn new() -> Self {
        Self {
            source: Arc::new(FakeGitLab::new("https://ce.example.com")),
            dest: Arc::new(FakeGitLab::new("https://ee.example.com")),
            mirror: Arc::new(FakeMirror::standard()),
        }
    }

    fn migrator(&self, mode: TransferMode, root_group: &str) -> Migrator {
        let config = config(root_group)
            .with_mode(mode)
            .with_poll(PollPolicy::new(Duration::from_secs(5), Duration::from_secs(20)));
        Migrator::new(
            config,
            self.source.clone(),
            self.dest.clone(),
            self.mirror.clone(),
        )
        .with_clock(Arc::new(ManualClock::default()))
    }
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_mirror_scenario_creates_everything() {
    let h = Harness::new();
    h.source.add_project("root-group/sub-group/project");
    let migrator = h.migrator(TransferMode::Mirror, "root-groupB");

    let report = migrator
        .run(&lines(&["root-group/sub-group/project.git"]))
        .await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.exit_code(), 0);
    let result = &report.results[0];
    assert_eq!(
        result.destination.as_deref(),
        Some("root-groupB/root-group/sub-group/project")
    );
    assert!(result.levels.iter().all(|l| l.outcome == LevelOutcome::Created));
    assert_eq!(result.levels.len(), 4);
    assert_eq!(result.transfer, TransferStatus::Succeeded);
    assert_eq!(result.refs_pushed, 3);
    assert_eq!(
        *h.mirror.pushes.lock(),
        vec!["root-groupB/root-group/sub-group/project".to_string()]
    );
}

#[tokio::test]
async fn test_mirror_rerun_reports_existing_and_pushes_again() {
    let h = Harness::new();
    h.source.add_project("root-group/sub-group/project");
    let migrator = h.migrator(TransferMode::Mirror, "root-groupB");
    let input = lines(&["root-group/sub-group/project.git"]);

    migrator.run(&input).await;
    let groups = h.dest.group_count();
    let second = migrator.run(&input).await;

    let result = &second.results[0];
    assert_eq!(result.outcome, ProjectOutcome::Succeeded);
    assert!(result.levels.iter().all(|l| l.outcome == LevelOutcome::Existed));
    assert_eq!(h.dest.group_count(), groups);
    assert_eq!(h.dest.project_count(), 1);
    assert_eq!(h.mirror.pushes.lock().len(), 2);
}

#[tokio::test]
async fn test_partial_push_does_not_abort_run() {
    let h = Harness::new();
    h.source.add_project("team/app");
    h.source.add_project("team/lib");
    h.mirror.reject("refs/heads/feature-x");
    let migrator = h.migrator(TransferMode::Mirror, "migrated");

    let report = migrator.run(&lines(&["team/app", "team/lib"])).await;

    // every project pushes the same refs, so both fail; the run still visits both
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.exit_code(), 1);
    let error = report.results[0].error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::Transfer);
    assert_eq!(report.results[0].transfer, TransferStatus::Failed);
    assert_eq!(h.mirror.pushes.lock().len(), 2);
}

#[tokio::test]
async fn test_missing_source_project_fails_and_run_continues() {
    let h = Harness::new();
    h.source.add_project("team/app");
    let migrator = h.migrator(TransferMode::Mirror, "migrated");

    let report = migrator.run(&lines(&["team/ghost", "team/app"])).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 1);
    let failed = &report.results[0];
    assert_eq!(failed.outcome, ProjectOutcome::Failed);
    let error = failed.error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::Transfer);
    assert!(error.message.contains("team/ghost"));
    assert!(failed.levels.is_empty());
    assert!(h.dest.project_by_path("migrated/team/ghost").is_none());
}

#[tokio::test]
async fn test_invalid_line_is_skipped() {
    let h = Harness::new();
    h.source.add_project("team/app");
    let migrator = h.migrator(TransferMode::Mirror, "migrated");

    let report = migrator.run(&lines(&[" / .git", "team/app"])).await;

    assert_eq!(report.skipped(), 1);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.results[0].error.as_ref().unwrap().category,
        ErrorCategory::InvalidPath
    );
}

#[tokio::test]
async fn test_provision_failure_is_categorized() {
    let h = Harness::new();
    h.source.add_project("team/app");
    h.dest.forbid("migrated");
    let migrator = h.migrator(TransferMode::Mirror, "migrated");

    let report = migrator.run(&lines(&["team/app"])).await;

    let result = &report.results[0];
    assert_eq!(result.outcome, ProjectOutcome::Failed);
    assert_eq!(result.error.as_ref().unwrap().category, ErrorCategory::Provision);
    assert_eq!(result.transfer, TransferStatus::NotStarted);
    assert!(h.mirror.pushes.lock().is_empty());
}

#[tokio::test]
async fn test_export_import_then_reconcile() {
    let h = Harness::new();
    let from = h.source.add_project("team/app");
    h.source.add_issue(&from, 1, "Login broken", "opened", Some("2024-01-01T00:00:00Z"));
    h.source.add_issue(&from, 2, "Missing", "opened", Some("2024-01-02T00:00:00Z"));
    h.dest.on_import_create_issue(1, "Login broken", "opened", Some("2024-01-01T00:00:00Z"));
    h.source.script_export(vec![Ok(PollStatus::Pending), Ok(PollStatus::Finished)]);
    h.dest.script_import(vec![Ok(PollStatus::Pending), Ok(PollStatus::Finished)]);
    let migrator = h.migrator(TransferMode::ExportImport, "migrated");

    let report = migrator.run(&lines(&["team/app"])).await;

    let result = &report.results[0];
    assert_eq!(result.outcome, ProjectOutcome::Succeeded);
    assert_eq!(result.transfer, TransferStatus::Succeeded);
    assert_eq!(result.levels.last().unwrap().outcome, LevelOutcome::Absent);
    assert_eq!(result.issues_reconciled, 1);
    assert_eq!(result.issues_unreconciled, 1);
    assert!(h.dest.project_by_path("migrated/team/app").is_some());
    assert!(!h.source.issue(from.id, 1).unwrap().is_open());
    assert!(h.source.issue(from.id, 2).unwrap().is_open());
}

#[tokio::test]
async fn test_existing_destination_skips_import_but_reconciles() {
    let h = Harness::new();
    let from = h.source.add_project("team/app");
    h.source.add_issue(&from, 1, "Login broken", "opened", None);
    let to = h.dest.add_project("migrated/team/app");
    h.dest.add_issue(&to, 1, "Login broken", "opened", None);
    let migrator = h.migrator(TransferMode::ExportImport, "migrated");

    let report = migrator.run(&lines(&["team/app"])).await;

    let result = &report.results[0];
    assert_eq!(result.outcome, ProjectOutcome::Succeeded);
    assert_eq!(result.transfer, TransferStatus::SkippedImport);
    assert_eq!(result.issues_reconciled, 1);
    assert_eq!(h.dest.imports.load(Ordering::SeqCst), 0);
    assert_eq!(h.source.export_polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_import_timeout_fails_project() {
    let h = Harness::new();
    h.source.add_project("team/app");
    h.source.add_project("team/other");
    h.dest
        .script_import((0..5).map(|_| Ok(PollStatus::Pending)).collect());
    let migrator = h.migrator(TransferMode::ExportImport, "migrated");

    let report = migrator.run(&lines(&["team/app", "team/other"])).await;

    let first = &report.results[0];
    assert_eq!(first.outcome, ProjectOutcome::Failed);
    assert_eq!(first.transfer, TransferStatus::Failed);
    assert!(first.error.as_ref().unwrap().message.contains("timed out after 20s"));
    // the script is exhausted, so the next import finishes at once
    assert_eq!(report.results[1].outcome, ProjectOutcome::Succeeded);
}

#[tokio::test]
async fn test_ci_includes_rewritten_after_import() {
    let h = Harness::new();
    h.source.add_project("team/app");
    let to = h.dest.add_project("migrated/team/app");
    h.dest.set_file(&to, ".gitlab-ci.yml", "include:\n  - local: infra/build.yml\n");
    let config = config("migrated")
        .with_mode(TransferMode::ExportImport)
        .with_include_rewrite(IncludeRewrite::new("platform", "infra"));
    let migrator = Migrator::new(config, h.source.clone(), h.dest.clone(), h.mirror.clone());

    let report = migrator.run(&lines(&["team/app"])).await;

    assert!(report.results[0].ci_rewritten);
    assert_eq!(
        h.dest.file(to.id, ".gitlab-ci.yml").unwrap(),
        "include:\n  - local: platform/infra/build.yml\n"
    );
    let commits = h.dest.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].2, "main");
    assert_eq!(commits[0].3, ci_include::COMMIT_MESSAGE);
}

#[tokio::test]
async fn test_interrupt_skips_remaining_projects() {
    let h = Harness::new();
    h.source.add_project("team/app");
    let flag = Arc::new(AtomicBool::new(true));
    let migrator = h
        .migrator(TransferMode::Mirror, "migrated")
        .with_cancellation(flag.clone());

    let report = migrator.run(&lines(&["team/app", "team/lib"])).await;

    assert_eq!(report.skipped(), 2);
    assert_eq!(report.exit_code(), 0);
    assert!(report
        .results
        .iter()
        .all(|r| r.error.as_ref().unwrap().category == ErrorCategory::Interrupted));
    assert!(h.mirror.pushes.lock().is_empty());
}

#[tokio::test]
async fn test_progress_reports_each_project() {
    let h = Harness::new();
    h.source.add_project("team/app");
    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = phases.clone();
    let progress = MigrationProgress::with_callback(Box::new(move |update| {
        sink.lock().push(update.phase);
    }));
    let migrator = h
        .migrator(TransferMode::Mirror, "migrated")
        .with_progress(progress);

    migrator.run(&lines(&["team/app"])).await;

    let phases = phases.lock();
    assert_eq!(phases.first(), Some(&MigrationPhase::Resolving));
    assert!(phases.contains(&MigrationPhase::Pushing));
    assert_eq!(phases.last(), Some(&MigrationPhase::Complete));
}
