// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `qrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "qrun",
    version,
    about = "Run batches of OS processes from a durable tasks file.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Qrun.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Path to the tasks file; overrides the config.
    #[arg(long, value_name = "PATH")]
    pub file: Option<String>,

    /// Most children in flight at once; overrides the config.
    #[arg(long, value_name = "N")]
    pub max_tasks: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `QRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Run every queued task in the file to completion.
    Run {
        /// Print a live percentage to stderr.
        #[arg(long)]
        progress: bool,
    },
    /// Append a task, given as FIELD=VALUE pairs (e.g. `command='sleep 1'`).
    Add {
        #[arg(value_name = "FIELD=VALUE", required = true)]
        fields: Vec<String>,
    },
    /// Print tasks from the file.
    List {
        /// Only tasks in this status.
        #[arg(long, value_name = "STATUS")]
        status: Option<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
