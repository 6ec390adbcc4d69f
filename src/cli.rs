// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `relayvisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "relayvisor",
    version,
    about = "Supervise the phantom proxy worker and follow its output.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `RELAYVISOR_CONFIG`, then `Relayvisor.toml` in the current
    /// working directory if present, then built-in defaults.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RELAYVISOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start the worker and follow its output until Ctrl-C.
    Run {
        /// Remote server, passed to the worker as `-server HOST:PORT`.
        #[arg(long, value_name = "HOST:PORT")]
        server: Option<String>,

        /// Extra worker arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Read JSON control commands from stdin, one per line.
    Serve,

    /// Locate the worker binary and print where it was found.
    Resolve,

    /// Check a `HOST:PORT` server address.
    CheckAddress {
        address: String,
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
