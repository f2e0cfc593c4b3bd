//! Pipeline execution engine

pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod subpipeline;

pub use checkpoint::{Checkpoint, NestedCheckpoint, RunCheckpoint, CHECKPOINT_VERSION};
pub use engine::{BoxFuture, ExecutionMode, Pipeline};
pub use error::EngineError;
pub use events::{EventHandler, ExecutionEvent};
pub use subpipeline::{NestedRun, SubPipelineAdapter};
