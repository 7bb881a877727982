// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "keypool-proxy", version, about = "Rotating key-pool HTTP proxy")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Override the listen port from the configuration.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Log filter, e.g. `info` or `keypool_proxy=debug`.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load and validate the configuration, then exit.
    Validate,
}
