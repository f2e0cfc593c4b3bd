//! SQLite-based checkpoint store

use crate::execution::Checkpoint;
use crate::persistence::{CheckpointStore, CheckpointSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite checkpoint store
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let url = if db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", db_path)
        };
        let pool = SqlitePool::connect(&url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("pipeline-runner");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("checkpoints.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                run_count INTEGER NOT NULL DEFAULT 0,
                paused_runs INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_pipeline ON checkpoints(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_checkpoints_saved_at ON checkpoints(saved_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary(row: &SqliteRow) -> Result<CheckpointSummary> {
        Ok(CheckpointSummary {
            checkpoint_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            saved_at: Self::from_naive(row.get("saved_at")),
            run_count: row.get::<i64, _>("run_count") as usize,
            paused_runs: row.get::<i64, _>("paused_runs") as usize,
        })
    }

    fn body(row: &SqliteRow) -> Result<Checkpoint> {
        let body: String = row.get("body");
        Ok(Checkpoint::from_json(&body)?)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<CheckpointSummary> {
        let summary = CheckpointSummary::for_checkpoint(Uuid::new_v4(), checkpoint);

        sqlx::query(
            r#"
            INSERT INTO checkpoints
            (id, pipeline_name, saved_at, run_count, paused_runs, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(summary.checkpoint_id.to_string())
        .bind(&summary.pipeline_name)
        .bind(Self::to_naive(summary.saved_at))
        .bind(summary.run_count as i64)
        .bind(summary.paused_runs as i64)
        .bind(checkpoint.to_json()?)
        .execute(&self.pool)
        .await
        .context("Failed to save checkpoint")?;

        Ok(summary)
    }

    async fn load(&self, checkpoint_id: Uuid) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT body FROM checkpoints WHERE id = ?1")
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load checkpoint")?;

        row.as_ref().map(Self::body).transpose()
    }

    async fn load_latest(&self, pipeline_name: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT body
            FROM checkpoints
            WHERE pipeline_name = ?1
            ORDER BY saved_at DESC
            LIMIT 1
            "#,
        )
        .bind(pipeline_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest checkpoint")?;

        row.as_ref().map(Self::body).transpose()
    }

    async fn list(&self, pipeline_name: &str) -> Result<Vec<CheckpointSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pipeline_name, saved_at, run_count, paused_runs
            FROM checkpoints
            WHERE pipeline_name = ?1
            ORDER BY saved_at DESC
            "#,
        )
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list checkpoints")?;

        rows.iter().map(Self::summary).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM checkpoints
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}
