//! CLI module for Narracut
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

/// Narracut narration-to-video pipeline
///
/// Turns a timed narration script, a subtitle track and a source video into
/// a captioned short-form video.
#[derive(Parser, Debug)]
#[command(name = "narracut")]
#[command(about = "Narracut - narration scripts to captioned short-form video")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (defaults to ./narracut.toml when present)
    #[arg(long, global = true, env = "NARRACUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline and write the final video
    Run(args::RunArgs),
    /// Parse a script and list its segments
    Parse(args::ParseArgs),
    /// Wipe the artifact cache
    Clean(args::CleanArgs),
    /// Print the effective configuration as TOML
    Config,
}
