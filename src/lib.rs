//! pipeline-runner - a node-graph pipeline engine with pause/resume,
//! sub-pipelines and portable checkpoints

pub mod behavior;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use behavior::{NodeCall, NodeError, NodeRegistry, Output, Predealer, Processor, Router};
pub use crate::core::config::{NodeConfig, PipelineConfig};
pub use crate::core::{BehaviorKind, Context, PipelineDefinition, RunSnapshot, RunState, RunStatus, TraceEntry, TraceStatus};
pub use execution::{Checkpoint, EngineError, ExecutionEvent, ExecutionMode, Pipeline};
pub use persistence::{CheckpointStore, CheckpointSummary, FileCheckpointStore, InMemoryCheckpointStore};
