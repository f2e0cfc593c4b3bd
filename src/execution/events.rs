//! Execution events delivered to observers

use crate::core::{Context, RunStatus, TraceStatus};
use serde_json::Value;
use std::sync::Arc;

/// Events that can occur while a pipeline runs
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        pipeline: String,
        run_id: String,
    },
    NodeStarted {
        pipeline: String,
        run_id: String,
        node_id: String,
        node_name: String,
    },
    NodeFinished {
        pipeline: String,
        run_id: String,
        node_id: String,
        node_name: String,
        status: TraceStatus,
        /// Error text for failures, empty otherwise
        message: String,
        next_node: Option<String>,
    },
    RunPaused {
        pipeline: String,
        run_id: String,
        node_id: Option<String>,
    },
    /// Fired once a run driven in asynchronous mode reaches a terminal status
    RunCompleted {
        pipeline: String,
        run_id: String,
        status: RunStatus,
        context: Context,
        output: Option<Value>,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::NodeStarted { run_id, .. }
            | ExecutionEvent::NodeFinished { run_id, .. }
            | ExecutionEvent::RunPaused { run_id, .. }
            | ExecutionEvent::RunCompleted { run_id, .. } => run_id,
        }
    }
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;
