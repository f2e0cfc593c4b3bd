//! Portable checkpoints of the live runs of a pipeline
//!
//! A checkpoint holds every running or paused run, including the nested runs
//! of sub-pipeline nodes, as plain serde data. Restored runs come back
//! paused on the node they were about to execute, so a node that was in
//! flight when the checkpoint was taken runs again after `resume`.

use crate::{
    core::{PipelineDefinition, RunState},
    execution::{engine::BoxFuture, subpipeline::NestedRun, EngineError, Pipeline},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Snapshot of every live run of one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,

    /// Pipeline name (informational)
    pub pipeline: String,

    pub saved_at: DateTime<Utc>,

    /// Sorted node ids of the pipeline the checkpoint was taken from
    pub node_ids: Vec<String>,

    pub runs: Vec<RunCheckpoint>,
}

/// One run plus the nested runs of its sub-pipeline nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub state: RunState,

    /// Sub-pipeline node id -> nested run
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_pipelines: BTreeMap<String, NestedCheckpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedCheckpoint {
    pub run_id: String,
    pub checkpoint: Checkpoint,
}

impl Checkpoint {
    pub fn run(&self, run_id: &str) -> Option<&RunCheckpoint> {
        self.runs.iter().find(|run| run.state.run_id == run_id)
    }

    pub fn run_ids(&self) -> Vec<&str> {
        self.runs.iter().map(|run| run.state.run_id.as_str()).collect()
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the checkpoint as pretty JSON
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Check that this checkpoint can be restored onto `definition`
    pub fn verify(&self, definition: &PipelineDefinition) -> Result<(), EngineError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(EngineError::CheckpointMismatch(format!(
                "unsupported version {} (expected {})",
                self.version, CHECKPOINT_VERSION
            )));
        }

        if self.node_ids != definition.node_ids() {
            return Err(EngineError::CheckpointMismatch(format!(
                "pipeline '{}' has nodes {:?}, checkpoint of '{}' has {:?}",
                definition.name,
                definition.node_ids(),
                self.pipeline,
                self.node_ids
            )));
        }

        let mut seen = HashSet::new();
        for run in &self.runs {
            if !seen.insert(run.state.run_id.as_str()) {
                return Err(EngineError::CheckpointMismatch(format!(
                    "run '{}' appears more than once",
                    run.state.run_id
                )));
            }

            if let Some(current) = &run.state.current_node_id {
                if !definition.contains(current) {
                    return Err(EngineError::CheckpointMismatch(format!(
                        "run '{}' is positioned on unknown node '{}'",
                        run.state.run_id, current
                    )));
                }
            }

            for (node_id, nested) in &run.sub_pipelines {
                let nested_definition = definition
                    .node(node_id)
                    .and_then(|node| node.sub_pipeline())
                    .ok_or_else(|| {
                        EngineError::CheckpointMismatch(format!(
                            "run '{}' has a nested run for '{}', which is not a sub-pipeline node",
                            run.state.run_id, node_id
                        ))
                    })?;
                nested.checkpoint.verify(nested_definition)?;
                if nested.checkpoint.run(&nested.run_id).is_none() {
                    return Err(EngineError::CheckpointMismatch(format!(
                        "nested run '{}' missing from its checkpoint",
                        nested.run_id
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Pipeline {
    /// Capture every running or paused run
    pub fn save_checkpoint(&self) -> BoxFuture<'_, Checkpoint> {
        Box::pin(async move {
            let mut runs = Vec::new();
            for state in self.live_runs().await {
                let mut sub_pipelines = BTreeMap::new();
                for (node_id, adapter) in self.sub_pipelines() {
                    let Some(nested) = adapter.cached(&state.run_id).await else {
                        continue;
                    };
                    let checkpoint = nested.pipeline.save_checkpoint().await;
                    if checkpoint.run(&nested.run_id).is_some() {
                        sub_pipelines.insert(
                            node_id.clone(),
                            NestedCheckpoint {
                                run_id: nested.run_id,
                                checkpoint,
                            },
                        );
                    }
                }
                runs.push(RunCheckpoint { state, sub_pipelines });
            }

            Checkpoint {
                version: CHECKPOINT_VERSION,
                pipeline: self.name().to_string(),
                saved_at: Utc::now(),
                node_ids: self.definition().node_ids(),
                runs,
            }
        })
    }

    /// Restore the runs of a checkpoint, returning their ids
    ///
    /// The checkpoint is verified before anything is registered; a run id
    /// that is still live on this pipeline is rejected with `DuplicateRun`,
    /// one whose driver has not let go yet with `RunBusy`.
    pub fn load_checkpoint<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> BoxFuture<'a, Result<Vec<String>, EngineError>> {
        Box::pin(async move {
            checkpoint.verify(self.definition())?;
            for run in &checkpoint.runs {
                self.check_replaceable(&run.state.run_id).await?;
            }

            let mut restored = Vec::new();
            for run in &checkpoint.runs {
                let run_id = &run.state.run_id;
                for (node_id, nested) in &run.sub_pipelines {
                    let adapter = self.sub_pipelines().get(node_id).ok_or_else(|| {
                        EngineError::CheckpointMismatch(format!("'{}' is not a sub-pipeline node", node_id))
                    })?;
                    let pipeline = adapter.spawn_engine(self, run_id)?;
                    pipeline.load_checkpoint(&nested.checkpoint).await?;
                    adapter
                        .adopt(
                            run_id,
                            NestedRun {
                                pipeline,
                                run_id: nested.run_id.clone(),
                            },
                        )
                        .await;
                }
                self.restore_run(run.state.clone()).await?;
                restored.push(run_id.clone());
            }

            info!(
                "Restored {} run(s) of pipeline '{}' from checkpoint",
                restored.len(),
                self.name()
            );
            Ok(restored)
        })
    }
}
