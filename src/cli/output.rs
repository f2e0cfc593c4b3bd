//! CLI output formatting

use crate::{
    core::{RunState, RunStatus, TraceEntry, TraceStatus},
    execution::ExecutionEvent,
    persistence::CheckpointSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "| ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a spinner shown while a run is driven
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Paused => style("PAUSED").blue().to_string(),
        RunStatus::Success => style("SUCCESS").green().to_string(),
        RunStatus::Exception => style("EXCEPTION").red().to_string(),
    }
}

/// Format a JSON value on one line
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format one trace entry
pub fn format_trace_entry(entry: &TraceEntry) -> String {
    let icon = match entry.status {
        TraceStatus::Success => CHECK,
        TraceStatus::Skipped => SKIP,
        TraceStatus::Failed => CROSS,
    };
    let label = format!("{} ({})", entry.node_id, entry.node_name);

    match entry.status {
        TraceStatus::Failed => format!("{}{}: {}", icon, style(label).red(), style(&entry.message).dim()),
        TraceStatus::Skipped => format!("{}{}", icon, style(label).dim()),
        TraceStatus::Success => format!("{}{}", icon, style(label).green()),
    }
}

/// Format the final state of a run
pub fn format_run(state: &RunState) -> String {
    let mut lines = vec![format!(
        "Run {} - {}",
        style(&state.run_id).dim(),
        format_status(state.status)
    )];

    match state.status {
        RunStatus::Success => {
            if let Some(output) = &state.output {
                lines.push(format!("  Output: {}", style(format_value(output)).cyan()));
            }
        }
        RunStatus::Paused | RunStatus::Running => {
            if let Some(node) = &state.current_node_id {
                let waiting = if state.awaiting_completion {
                    " (waiting for an asynchronous result)"
                } else {
                    ""
                };
                lines.push(format!("  Next node: {}{}", style(node).cyan(), waiting));
            }
        }
        RunStatus::Exception => {}
    }

    if !state.context.is_empty() {
        lines.push(format!("  Context: {}", style(state.context.to_value()).dim()));
    }
    lines.join("\n")
}

/// Format checkpoint summary for display
pub fn format_checkpoint_summary(summary: &CheckpointSummary) -> String {
    let icon = if summary.paused_runs > 0 { PAUSE } else { INFO };
    format!(
        "{}{} - {} - {} - {} run(s), {} paused",
        icon,
        style(&summary.checkpoint_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        style(summary.saved_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(summary.run_count).cyan(),
        summary.paused_runs
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::RunStarted { pipeline, run_id } => Some(format!(
            "{}Starting pipeline {} ({})",
            ROCKET,
            style(pipeline).bold(),
            style(run_id).dim()
        )),
        ExecutionEvent::NodeStarted { .. } => None,
        ExecutionEvent::NodeFinished {
            node_id,
            node_name,
            status,
            message,
            next_node,
            ..
        } => {
            let entry = TraceEntry::new(node_id, node_name, *status, message.clone());
            let line = format_trace_entry(&entry);
            Some(match next_node {
                Some(next) => format!("{} → {}", line, style(next).cyan()),
                None => line,
            })
        }
        ExecutionEvent::RunPaused { run_id, node_id, .. } => Some(format!(
            "{}Run {} paused before {}",
            PAUSE,
            style(run_id).dim(),
            style(node_id.as_deref().unwrap_or("-")).cyan()
        )),
        ExecutionEvent::RunCompleted { run_id, status, .. } => Some(format!(
            "{}Run {} finished: {}",
            INFO,
            style(run_id).dim(),
            format_status(*status)
        )),
    }
}
