//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ResumeCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Node-graph pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline-runner")]
#[command(author = "Pipeline Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Run node-graph pipelines with pause/resume and checkpoints", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Store checkpoints as JSON files under this directory instead of SQLite
    #[arg(long, global = true)]
    pub checkpoint_dir: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Resume paused runs from the latest checkpoint
    Resume(ResumeCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show stored checkpoints
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
