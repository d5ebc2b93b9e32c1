//! Labshift CLI - migrate projects between GitLab instances.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Labshift - copy GitLab projects into a root group on another instance
#[derive(Parser, Debug)]
#[command(name = "labshift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate every project listed in the projects file
    Migrate(MigrateArgs),

    /// Print the destination path of every listed project without contacting either instance
    Plan(PlanArgs),

    /// Show version information
    Version,
}

/// Connection and behaviour settings shared with the YAML config file.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// YAML config file; flags and environment variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Source instance URL
    #[arg(long, env = "GITLAB_SOURCE_URL")]
    pub source_url: Option<String>,

    /// Source instance access token
    #[arg(long, env = "GITLAB_SOURCE_TOKEN", hide_env_values = true)]
    pub source_token: Option<String>,

    /// Destination instance URL
    #[arg(long, env = "GITLAB_DEST_URL")]
    pub dest_url: Option<String>,

    /// Destination instance access token
    #[arg(long, env = "GITLAB_DEST_TOKEN", hide_env_values = true)]
    pub dest_token: Option<String>,

    /// Group on the destination that receives every project
    #[arg(long, env = "GITLAB_DEST_ROOT_GROUP")]
    pub root_group: Option<String>,

    /// Transfer mode: mirror or export-import
    #[arg(long, env = "GITLAB_TRANSFER_MODE")]
    pub mode: Option<String>,

    /// Prefix inserted in front of CI include paths after import
    #[arg(long, env = "GITLAB_INCLUDE_PREFIX")]
    pub include_prefix: Option<String>,

    /// Include directory that gets the prefix
    #[arg(long, env = "GITLAB_INCLUDE_DIR")]
    pub include_dir: Option<String>,

    /// Seconds between export/import status polls
    #[arg(long, env = "GITLAB_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Minutes to wait for an export or import before giving up
    #[arg(long, env = "GITLAB_MAX_WAIT_MINUTES")]
    pub max_wait_minutes: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// File with one source project path per line
    #[arg(short = 'f', long, env = "GITLAB_PROJECTS_FILE")]
    pub projects_file: Option<PathBuf>,

    /// Also write the run report as JSON to this path
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// File with one source project path per line
    #[arg(short = 'f', long, env = "GITLAB_PROJECTS_FILE")]
    pub projects_file: Option<PathBuf>,

    /// Group on the destination that receives every project
    #[arg(long, env = "GITLAB_DEST_ROOT_GROUP")]
    pub root_group: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("labshift={log_level}").into()),
    );
    match cli.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    let result = match cli.command {
        Commands::Migrate(args) => commands::migrate(args).await,
        Commands::Plan(args) => commands::plan(&args),
        Commands::Version => {
            println!(
                "labshift {} (engine {})",
                env!("CARGO_PKG_VERSION"),
                labshift_migrate::VERSION
            );
            Ok(0)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(commands::SETUP_FAILURE);
        }
    }
}
