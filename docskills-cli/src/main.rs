//! docskills - install library documentation as skills for AI coding agents
//!
//! Thin entry point: parses arguments, sets up logging and hands the
//! command to [`skills_cli`].

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use docskills_core::Settings;

mod skills_cli;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "docskills",
    about = "Install llms.txt documentation as skills for AI coding agents",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: skills_cli::SkillsCommand,

    /// Set log level (RUST_LOG takes precedence)
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    log_json: bool,

    /// Project root (defaults to the current directory)
    #[clap(long, global = true)]
    project_dir: Option<PathBuf>,
}

fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    // Logs go to stderr; stdout is reserved for command output
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.log_json);

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Error: cannot determine the current directory: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let settings = Settings::from_env();
    tracing::debug!(
        registry = %settings.registry_url,
        cache = %settings.cache_dir.display(),
        telemetry = settings.telemetry_enabled,
        "settings"
    );

    match cli.command.execute(&project_dir, &settings).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
