//! CLI command definitions

use clap::Args;
use serde_json::Value;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Run input as JSON (bare words are taken as strings)
    #[arg(short, long)]
    pub input: Option<String>,

    /// Initial context entries (key=value, value parsed as JSON when possible)
    #[arg(long, value_parser = parse_key_value)]
    pub context: Vec<(String, String)>,

    /// Run id (defaults to a fresh UUID)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Pause after every node
    #[arg(long)]
    pub single_step: bool,

    /// Don't save a checkpoint when the run stops unfinished
    #[arg(long)]
    pub no_history: bool,
}

/// Resume paused runs from the latest checkpoint of a pipeline
#[derive(Debug, Args, Clone)]
pub struct ResumeCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Read the checkpoint from this JSON file instead of the store
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Only resume this run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Keep pausing after every node
    #[arg(long)]
    pub single_step: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show stored checkpoints
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent checkpoints to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Parse a command-line value as JSON, falling back to a plain string
pub fn parse_json_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
