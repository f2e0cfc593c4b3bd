//! Persistence layer for pipeline checkpoints

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteCheckpointStore;

use crate::core::RunStatus;
use crate::execution::Checkpoint;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Summary of a stored checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Unique checkpoint ID
    pub checkpoint_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// When the checkpoint was taken
    pub saved_at: DateTime<Utc>,

    /// Number of live runs captured
    pub run_count: usize,

    /// Number of captured runs that were paused
    pub paused_runs: usize,
}

impl CheckpointSummary {
    pub fn for_checkpoint(checkpoint_id: Uuid, checkpoint: &Checkpoint) -> Self {
        Self {
            checkpoint_id,
            pipeline_name: checkpoint.pipeline.clone(),
            saved_at: checkpoint.saved_at,
            run_count: checkpoint.runs.len(),
            paused_runs: checkpoint
                .runs
                .iter()
                .filter(|run| run.state.status == RunStatus::Paused)
                .count(),
        }
    }
}

/// Trait for checkpoint stores
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint under a fresh ID
    async fn save(&self, checkpoint: &Checkpoint) -> Result<CheckpointSummary>;

    /// Load a checkpoint by ID
    async fn load(&self, checkpoint_id: Uuid) -> Result<Option<Checkpoint>>;

    /// Most recent checkpoint of a pipeline
    async fn load_latest(&self, pipeline_name: &str) -> Result<Option<Checkpoint>>;

    /// Checkpoints of a pipeline, newest first
    async fn list(&self, pipeline_name: &str) -> Result<Vec<CheckpointSummary>>;

    /// All pipeline names with at least one checkpoint
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory checkpoint store (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: tokio::sync::RwLock<HashMap<Uuid, (CheckpointSummary, Checkpoint)>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<CheckpointSummary> {
        let summary = CheckpointSummary::for_checkpoint(Uuid::new_v4(), checkpoint);
        self.checkpoints
            .write()
            .await
            .insert(summary.checkpoint_id, (summary.clone(), checkpoint.clone()));
        Ok(summary)
    }

    async fn load(&self, checkpoint_id: Uuid) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(&checkpoint_id).map(|(_, cp)| cp.clone()))
    }

    async fn load_latest(&self, pipeline_name: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .values()
            .filter(|(summary, _)| summary.pipeline_name == pipeline_name)
            .max_by_key(|(summary, _)| summary.saved_at)
            .map(|(_, cp)| cp.clone()))
    }

    async fn list(&self, pipeline_name: &str) -> Result<Vec<CheckpointSummary>> {
        let checkpoints = self.checkpoints.read().await;
        let mut result: Vec<CheckpointSummary> = checkpoints
            .values()
            .filter(|(summary, _)| summary.pipeline_name == pipeline_name)
            .map(|(summary, _)| summary.clone())
            .collect();
        result.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let checkpoints = self.checkpoints.read().await;
        let mut names: Vec<String> = checkpoints
            .values()
            .map(|(summary, _)| summary.pipeline_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Checkpoints as pretty JSON files, one directory per pipeline
///
/// Layout: `<root>/<pipeline>/<checkpoint id>.json`
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create checkpoint directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Create store under the local data directory
    pub fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(data_dir.join("pipeline-runner").join("checkpoints"))
    }

    fn pipeline_dir(&self, pipeline_name: &str) -> PathBuf {
        let safe: String = pipeline_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }

    async fn read(path: &Path) -> Result<Checkpoint> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Checkpoint {} is corrupted", path.display()))
    }

    async fn entries(&self, pipeline_name: &str) -> Result<Vec<(CheckpointSummary, PathBuf)>> {
        let dir = self.pipeline_dir(pipeline_name);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut entries = Self::entries_in(&dir).await?;
        entries.retain(|(summary, _)| summary.pipeline_name == pipeline_name);
        Ok(entries)
    }

    /// Checkpoints in one directory, newest first
    async fn entries_in(dir: &Path) -> Result<Vec<(CheckpointSummary, PathBuf)>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            else {
                continue;
            };
            let checkpoint = Self::read(&path).await?;
            entries.push((CheckpointSummary::for_checkpoint(id, &checkpoint), path));
        }
        entries.sort_by(|a, b| b.0.saved_at.cmp(&a.0.saved_at));
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<CheckpointSummary> {
        let summary = CheckpointSummary::for_checkpoint(Uuid::new_v4(), checkpoint);
        let dir = self.pipeline_dir(&checkpoint.pipeline);
        tokio::fs::create_dir_all(&dir).await?;

        let json = checkpoint.to_json()?;
        tokio::fs::write(dir.join(format!("{}.json", summary.checkpoint_id)), json)
            .await
            .context("Failed to write checkpoint")?;
        Ok(summary)
    }

    async fn load(&self, checkpoint_id: Uuid) -> Result<Option<Checkpoint>> {
        for pipeline in self.list_pipelines().await? {
            let path = self.pipeline_dir(&pipeline).join(format!("{}.json", checkpoint_id));
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(Self::read(&path).await?));
            }
        }
        Ok(None)
    }

    async fn load_latest(&self, pipeline_name: &str) -> Result<Option<Checkpoint>> {
        match self.entries(pipeline_name).await?.into_iter().next() {
            Some((_, path)) => Ok(Some(Self::read(&path).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, pipeline_name: &str) -> Result<Vec<CheckpointSummary>> {
        Ok(self
            .entries(pipeline_name)
            .await?
            .into_iter()
            .map(|(summary, _)| summary)
            .collect())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            // Directory names are sanitized; the checkpoints carry the real names
            for (summary, _) in Self::entries_in(&entry.path()).await? {
                names.push(summary.pipeline_name);
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
