//! Sub-pipeline nodes
//!
//! A sub-pipeline node drives a nested [`Pipeline`] with the node input and
//! uses the nested result as its own output. Nested runs are cached per outer
//! run so a paused or suspended nested run can be re-entered.

use crate::{
    behavior::NodeError,
    core::{PipelineDefinition, RunState, RunStatus, TraceStatus},
    execution::{
        engine::{Attempt, Completion, NodeOutcome},
        EngineError, Pipeline,
    },
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A nested run owned by one outer run
#[derive(Debug, Clone)]
pub struct NestedRun {
    pub pipeline: Pipeline,
    pub run_id: String,
}

/// Drives the nested pipeline of one sub-pipeline node
pub struct SubPipelineAdapter {
    node_id: String,
    definition: Arc<PipelineDefinition>,
    /// Outer run id -> nested run
    runs: Mutex<HashMap<String, NestedRun>>,
}

impl SubPipelineAdapter {
    pub fn new(node_id: &str, definition: Arc<PipelineDefinition>) -> Self {
        Self {
            node_id: node_id.to_string(),
            definition,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn definition(&self) -> &Arc<PipelineDefinition> {
        &self.definition
    }

    /// Nested run currently attached to `outer_run_id`
    pub async fn cached(&self, outer_run_id: &str) -> Option<NestedRun> {
        self.runs.lock().await.get(outer_run_id).cloned()
    }

    pub async fn forget(&self, outer_run_id: &str) -> Option<NestedRun> {
        self.runs.lock().await.remove(outer_run_id)
    }

    /// Attach a nested run restored from a checkpoint
    pub(crate) async fn adopt(&self, outer_run_id: &str, nested: NestedRun) {
        self.runs.lock().await.insert(outer_run_id.to_string(), nested);
    }

    /// Fresh nested engine reporting back to `outer_run_id`
    pub(crate) fn spawn_engine(&self, outer: &Pipeline, outer_run_id: &str) -> Result<Pipeline, EngineError> {
        outer.nested(self.definition.clone(), outer_run_id, &self.node_id)
    }

    /// Run (or re-enter) the nested pipeline for `outer_run_id`
    pub(crate) async fn execute(
        &self,
        outer: &Pipeline,
        outer_run_id: &str,
        input: Value,
    ) -> Result<Attempt, EngineError> {
        // The nested run may report back before this step returns
        outer.expect_completion(outer_run_id).await;

        let nested = match self.cached(outer_run_id).await {
            Some(nested) => nested,
            None => {
                let nested = NestedRun {
                    pipeline: self.spawn_engine(outer, outer_run_id)?,
                    run_id: nested_run_id(outer_run_id, &self.node_id),
                };
                self.adopt(outer_run_id, nested.clone()).await;
                debug!(
                    "Node {} starting nested run {} of '{}'",
                    self.node_id,
                    nested.run_id,
                    self.definition.name
                );
                if let Err(err) = nested.pipeline.start(input, Some(nested.run_id.clone()), false).await {
                    return Ok(self.abandon(outer_run_id, err).await);
                }
                return self.settle(outer_run_id, &nested).await;
            }
        };

        if nested.pipeline.status(&nested.run_id).await? == RunStatus::Paused {
            debug!("Node {} resuming nested run {}", self.node_id, nested.run_id);
            if let Err(err) = nested.pipeline.resume(&nested.run_id).await {
                return Ok(self.abandon(outer_run_id, err).await);
            }
        }
        self.settle(outer_run_id, &nested).await
    }

    async fn settle(&self, outer_run_id: &str, nested: &NestedRun) -> Result<Attempt, EngineError> {
        let state = nested.pipeline.state(&nested.run_id).await?;
        Ok(match completion_for(&state) {
            Some(Completion::Finished(outcome)) => {
                self.forget(outer_run_id).await;
                Attempt::Done(outcome)
            }
            Some(Completion::Paused) => Attempt::Paused,
            None => Attempt::Deferred,
        })
    }

    /// A nested engine error fails the outer node
    async fn abandon(&self, outer_run_id: &str, err: EngineError) -> Attempt {
        self.forget(outer_run_id).await;
        Attempt::Done(NodeOutcome::Failed(NodeError::new(format!(
            "Sub-pipeline '{}' error: {}",
            self.definition.name, err
        ))))
    }
}

/// Run id of the nested run driven for `outer_run_id` by node `node_id`
pub fn nested_run_id(outer_run_id: &str, node_id: &str) -> String {
    format!("{}/{}", outer_run_id, node_id)
}

/// What a settled nested run means for the outer node; `None` while the
/// nested run is still waiting on an asynchronous step
pub(crate) fn completion_for(state: &RunState) -> Option<Completion> {
    match state.status {
        RunStatus::Success => Some(Completion::Finished(NodeOutcome::Output(
            state.output.clone().unwrap_or(Value::Null),
        ))),
        RunStatus::Exception => {
            let message = state
                .trace
                .iter()
                .rev()
                .find(|entry| entry.status == TraceStatus::Failed)
                .map(|entry| format!("Sub-pipeline failed at node {}: {}", entry.node_id, entry.message))
                .unwrap_or_else(|| "Sub-pipeline failed".to_string());
            Some(Completion::Finished(NodeOutcome::Failed(NodeError::new(message))))
        }
        RunStatus::Paused => Some(Completion::Paused),
        RunStatus::Running => None,
    }
}
