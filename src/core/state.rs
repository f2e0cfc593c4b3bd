//! Run state models

use crate::core::context::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is advancing (or suspended on an asynchronous processor)
    Running,
    /// Run stopped between two nodes and waits for `resume`
    Paused,
    /// Run reached the end of the graph
    Success,
    /// Run ended on an unhandled node failure
    Exception,
}

impl RunStatus {
    /// Check if the run can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Exception)
    }

    /// Check if the run is still tracked by checkpoints
    pub fn is_live(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Paused)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Success => "success",
            RunStatus::Exception => "exception",
        };
        f.write_str(label)
    }
}

/// Outcome of one node attempt, as recorded in the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceStatus {
    /// Processor (or nested pipeline) produced an output
    Success,
    /// Predealer closed the gate; the previous value passed through
    Skipped,
    /// Processor, predealer or router raised an error
    Failed,
}

/// One entry of a run trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node_id: String,
    pub node_name: String,
    pub status: TraceStatus,
    /// Error text for failures, empty otherwise
    #[serde(default)]
    pub message: String,
    pub at: DateTime<Utc>,
}

impl TraceEntry {
    pub fn new(node_id: &str, node_name: &str, status: TraceStatus, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            status,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Mutable record of a single execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,

    pub status: RunStatus,

    /// Node about to execute, or the last executed one once the run stopped
    pub current_node_id: Option<String>,

    /// Value handed to the node about to execute
    pub input: Value,

    /// Shared across every node of this run
    pub context: Context,

    /// Last processor output; the final result once the run succeeded
    pub output: Option<Value>,

    pub trace: Vec<TraceEntry>,

    /// Pause after every node
    #[serde(default)]
    pub single_step: bool,

    /// Suspended on an asynchronous processor
    #[serde(default)]
    pub awaiting_completion: bool,
}

impl RunState {
    /// Create a new run positioned on its entry node
    pub fn new(run_id: String, entry_node: &str, input: Value, single_step: bool) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            current_node_id: Some(entry_node.to_string()),
            input,
            context: Context::new(),
            output: None,
            trace: Vec::new(),
            single_step,
            awaiting_completion: false,
        }
    }

    /// Mark the run as successfully finished
    pub fn succeed(&mut self) {
        self.status = RunStatus::Success;
        self.awaiting_completion = false;
    }

    /// Mark the run as failed; a failed run has no output
    pub fn fail(&mut self) {
        self.status = RunStatus::Exception;
        self.output = None;
        self.awaiting_completion = false;
    }

    /// Node ids in the order they were attempted
    pub fn visited_nodes(&self) -> Vec<String> {
        self.trace.iter().map(|e| e.node_id.clone()).collect()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            status: self.status,
            output: self.output.clone(),
        }
    }
}

/// What `start`/`resume`/`complete` hand back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub output: Option<Value>,
}

impl RunSnapshot {
    /// Output of a successful run, `None` otherwise
    pub fn result(&self) -> Option<&Value> {
        match self.status {
            RunStatus::Success => self.output.as_ref(),
            _ => None,
        }
    }
}
