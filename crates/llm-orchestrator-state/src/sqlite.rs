use async_trait::async_trait;
use llm_orchestrator_core::{CheckpointError, CheckpointStore, RunState};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::time::Duration;

type Result<T> = std::result::Result<T, CheckpointError>;

/// SQLite-backed checkpoint store, keyed by run id. Intended for local
/// development, single-node deployments, and tests — `in_memory()`
/// gives each store its own private database.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `workflow_checkpoints` table if absent. Safe to call
    /// on every startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                run_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_checkpoints_updated_at ON workflow_checkpoints(updated_at DESC)")
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, run_id: &str, state: &RunState) -> Result<()> {
        let payload = serde_json::to_string(state)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (run_id, state, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(run_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            "#,
        )
        .bind(run_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunState> {
        let row = sqlx::query("SELECT state FROM workflow_checkpoints WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let payload: String = row.get("state");
                Ok(serde_json::from_str(&payload)?)
            }
            None => Err(CheckpointError::NotFound(run_id.to_string())),
        }
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM workflow_checkpoints WHERE run_id = ?1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(())
    }
}
