//! Engine error types

use crate::core::{BehaviorKind, RunStatus};
use thiserror::Error;

/// Errors reported by the engine itself, as opposed to node failures
///
/// Node failures never surface here: they are routed or end the run with
/// [`RunStatus::Exception`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Node '{node_id}' not found in pipeline '{pipeline}'")]
    NodeNotFound { pipeline: String, node_id: String },

    #[error("No {kind} registered under the name '{name}'")]
    BehaviorNotFound { kind: BehaviorKind, name: String },

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Run '{0}' already exists and has not finished")]
    DuplicateRun(String),

    #[error("Cannot {operation} run '{run_id}' while it is {status}")]
    InvalidState {
        run_id: String,
        status: RunStatus,
        operation: &'static str,
    },

    #[error("Run '{0}' is not waiting for an asynchronous result")]
    NotAwaitingCompletion(String),

    #[error("Run '{0}' is already being driven")]
    RunBusy(String),

    #[error("Checkpoint does not match pipeline: {0}")]
    CheckpointMismatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::InvalidConfig(format!("{:#}", err))
    }
}
