// src/cli.rs

//! CLI argument parsing using `clap` (derive feature).

use clap::{Parser, ValueEnum};

/// Command-line arguments for `shadowdog`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "shadowdog",
    version,
    about = "Incremental artifact build daemon driven by filesystem events.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (JSON).
    ///
    /// Default: `shadowdog.json` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "shadowdog.json")]
    pub config: String,

    /// Keep running after the initial generation, watching the configured
    /// inputs and serving the RPC endpoint.
    #[arg(long)]
    pub watch: bool,

    /// Parse + validate, print the task tree and cache keys, but don't
    /// execute any commands.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SHADOWDOG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
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
