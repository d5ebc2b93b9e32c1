//! CLI command implementations.

use crate::{MigrateArgs, PlanArgs, SettingsArgs};
use anyhow::{bail, Context, Result};
use labshift_migrate::{
    parse_project_list, resolve, ConsoleProgressReporter, MigrationConfig, MigrationProgress,
    Migrator, PartialConfig, RunReport,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit status when the configuration or the project list is unusable.
pub const SETUP_FAILURE: i32 = 2;

/// Exit status after a second interrupt.
const ABORTED: i32 = 130;

impl SettingsArgs {
    fn to_partial(&self) -> PartialConfig {
        PartialConfig {
            source_url: self.source_url.clone(),
            source_token: self.source_token.clone(),
            dest_url: self.dest_url.clone(),
            dest_token: self.dest_token.clone(),
            root_group: self.root_group.clone(),
            mode: self.mode.clone(),
            include_prefix: self.include_prefix.clone(),
            include_dir: self.include_dir.clone(),
            poll_interval_secs: self.poll_interval_secs,
            max_wait_minutes: self.max_wait_minutes,
            ..PartialConfig::default()
        }
    }
}

/// Build the run configuration: the YAML file first, then environment and flags on top.
pub fn load_config(settings: &SettingsArgs) -> Result<MigrationConfig> {
    let file = match &settings.config {
        Some(path) => PartialConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => PartialConfig::default(),
    };

    file.merge(settings.to_partial())
        .build()
        .context("invalid configuration")
}

/// Read and filter the projects file.
pub fn read_projects(path: Option<&Path>) -> Result<Vec<String>> {
    let path =
        path.context("no projects file given (use --projects-file or GITLAB_PROJECTS_FILE)")?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read projects file {}", path.display()))?;

    let lines = parse_project_list(&text);
    if lines.is_empty() {
        bail!("projects file {} lists no projects", path.display());
    }
    Ok(lines)
}

/// Migrate every listed project and return the process exit status.
pub async fn migrate(args: MigrateArgs) -> Result<i32> {
    let config = load_config(&args.settings)?;
    let lines = read_projects(args.projects_file.as_deref())?;

    tracing::info!(
        projects = lines.len(),
        mode = %config.mode,
        root_group = %config.root_group,
        source = %config.source.base_url,
        destination = %config.destination.base_url,
        "Starting migration"
    );

    let cancelled = Arc::new(AtomicBool::new(false));
    watch_interrupts(cancelled.clone());

    let mut migrator = Migrator::from_config(config)
        .context("failed to set up API clients")?
        .with_cancellation(cancelled);

    let reporter = args
        .progress
        .then(|| ConsoleProgressReporter::new(lines.len() as u64));
    if let Some(reporter) = &reporter {
        migrator = migrator.with_progress(MigrationProgress::with_callback(reporter.callback()));
    }

    let report = migrator.run(&lines).await;

    if let Some(reporter) = &reporter {
        reporter.finish("done");
    }
    report.print_summary();

    let mut code = report.exit_code();
    if let Some(path) = &args.report_json {
        match write_report(&report, path) {
            Ok(()) => println!("Report written to {}", path.display()),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to write JSON report");
                code = code.max(1);
            }
        }
    }

    Ok(code)
}

/// The first Ctrl-C stops the run after the current project; the second exits at once.
fn watch_interrupts(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received, finishing the current project");
        eprintln!("Interrupted: finishing the current project (press Ctrl-C again to abort)");
        flag.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Aborted");
            std::process::exit(ABORTED);
        }
    });
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = report.to_json()?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Print where each listed project would land.
pub fn plan(args: &PlanArgs) -> Result<i32> {
    let root_group = args
        .root_group
        .as_deref()
        .context("no root group given (use --root-group or GITLAB_DEST_ROOT_GROUP)")?;
    let lines = read_projects(args.projects_file.as_deref())?;

    let mut invalid = 0;
    for line in &lines {
        match resolve(line, root_group) {
            Ok(destination) => println!("{line} -> {}", destination.full_path()),
            Err(e @ labshift_migrate::MigrationError::InvalidConfig(_)) => return Err(e.into()),
            Err(e) => {
                invalid += 1;
                println!("{line} -> skipped ({e})");
            }
        }
    }

    println!();
    println!("{} project(s), {invalid} invalid", lines.len());
    Ok(0)
}
