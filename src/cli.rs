//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "stagecuter",
    version,
    about = "Run a layered transformation pipeline on a fixed interval.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline config (TOML).
    ///
    /// Default: `Pipeline.toml` in the current working directory. A missing
    /// default file is an error; all sections inside it are optional.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Execute a single run now and exit (non-zero unless it succeeded).
    #[arg(long)]
    pub once: bool,

    /// With `--once`, print the finished run as JSON instead of a report.
    #[arg(long, requires = "once")]
    pub json: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAGECUTER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate config and print the task graph without running anything.
    #[arg(long, conflicts_with = "once")]
    pub dry_run: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
