//! reportsmith CLI: turn a research topic into a critiqued, assembled report.

mod commands;
mod progress;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// reportsmith: plan, research, draft, critique and assemble a report
#[derive(Parser, Debug)]
#[command(name = "reportsmith", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Workspace directory (holds `.reportsmith/config.toml`)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Generate a full report for a topic
    Run(RunArgs),
    /// Print the outline the planner produces for a topic
    Plan {
        /// Research topic
        topic: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Research topic
    pub topic: String,

    /// Minimum critique score (1-10) that accepts a section
    #[arg(long)]
    pub threshold: Option<u8>,

    /// Extra drafting attempts per section after the first
    #[arg(long)]
    pub max_revisions: Option<u32>,

    /// Abort the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Skip the LLM editor pass and emit the plain assembled report
    #[arg(long)]
    pub no_polish: bool,

    /// Directory for run artifacts
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "reportsmith", "reportsmith")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "reportsmith.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref(), cli.quiet).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "reportsmith",
            "run",
            "Quantum error correction",
            "--threshold",
            "7",
            "--max-revisions",
            "1",
            "--timeout",
            "600",
            "--no-polish",
            "-o",
            "out",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.topic, "Quantum error correction");
                assert_eq!(args.threshold, Some(7));
                assert_eq!(args.max_revisions, Some(1));
                assert_eq!(args.timeout, Some(600));
                assert!(args.no_polish);
                assert_eq!(args.output, Some(PathBuf::from("out")));
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["reportsmith", "plan", "Rust", "-vv", "--config", "c.toml"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.command, Commands::Plan { ref topic } if topic == "Rust"));
    }

    #[test]
    fn test_cli_config_actions() {
        let cli = Cli::try_parse_from(["reportsmith", "config", "init"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init
            }
        ));
    }

    #[test]
    fn test_cli_requires_subcommand_and_topic() {
        assert!(Cli::try_parse_from(["reportsmith"]).is_err());
        assert!(Cli::try_parse_from(["reportsmith", "run"]).is_err());
    }
}
