//! Progress reporting for migration runs.

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::fmt;

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Emitted every time a project enters a new phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Input line of the project being migrated.
    pub project: Option<String>,
    /// Phase just entered.
    pub phase: MigrationPhase,
    /// Units of work in the phase (namespace levels while provisioning, otherwise 1).
    pub total: u64,
    /// Projects finished so far in this run.
    pub projects_done: u64,
}

/// Phases of one project's migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationPhase {
    #[default]
    Resolving,
    Provisioning,
    Cloning,
    Pushing,
    Exporting,
    Downloading,
    Importing,
    RewritingCi,
    ReconcilingIssues,
    Complete,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Resolving => "resolving destination",
            Self::Provisioning => "provisioning namespace",
            Self::Cloning => "cloning source",
            Self::Pushing => "pushing refs",
            Self::Exporting => "waiting for export",
            Self::Downloading => "downloading export",
            Self::Importing => "waiting for import",
            Self::RewritingCi => "rewriting CI includes",
            Self::ReconcilingIssues => "reconciling issues",
            Self::Complete => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    project: Option<String>,
    phase: MigrationPhase,
    total: u64,
    projects_done: u64,
}

/// Tracks where a run is and forwards each phase change to an optional callback.
#[derive(Default)]
pub struct MigrationProgress {
    state: Mutex<Snapshot>,
    callback: Option<ProgressCallback>,
}

impl MigrationProgress {
    /// Tracker without a callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that reports every phase change to `callback`.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            state: Mutex::default(),
            callback: Some(callback),
        }
    }

    /// Begin a new project.
    pub fn start_project(&self, project: &str) {
        self.state.lock().project = Some(project.to_string());
        self.set_phase(MigrationPhase::Resolving, 1);
    }

    /// Enter `phase` for the current project.
    pub fn set_phase(&self, phase: MigrationPhase, total: u64) {
        let update = {
            let mut state = self.state.lock();
            state.phase = phase;
            state.total = total;
            if phase == MigrationPhase::Complete {
                state.projects_done += 1;
            }
            ProgressUpdate {
                project: state.project.clone(),
                phase,
                total,
                projects_done: state.projects_done,
            }
        };

        // lock released before calling out
        if let Some(callback) = &self.callback {
            callback(update);
        }
    }

    /// Phase of the current project.
    pub fn current_phase(&self) -> MigrationPhase {
        self.state.lock().phase
    }

    /// Projects that reached [`MigrationPhase::Complete`].
    pub fn projects_done(&self) -> u64 {
        self.state.lock().projects_done
    }
}

/// Terminal progress bar with one tick per project.
pub struct ConsoleProgressReporter {
    bar: ProgressBar,
}

impl ConsoleProgressReporter {
    /// Bar sized for a run of `projects`.
    pub fn new(projects: u64) -> Self {
        let bar = ProgressBar::new(projects);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} {elapsed_precise:.dim} [{bar:30.cyan/blue}] {pos}/{len} \
             {prefix:.bold} {wide_msg}",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    /// Callback that drives the bar; pass it to [`MigrationProgress::with_callback`].
    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Box::new(move |update: ProgressUpdate| {
            if let Some(project) = update.project {
                bar.set_prefix(project);
            }
            bar.set_position(update.projects_done);
            bar.set_message(update.phase.to_string());
        })
    }

    /// Stop the spinner and leave `message` on the line.
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}
