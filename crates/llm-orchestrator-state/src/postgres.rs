use async_trait::async_trait;
use llm_orchestrator_core::{CheckpointError, CheckpointStore, RunState};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

type Result<T> = std::result::Result<T, CheckpointError>;

/// PostgreSQL-backed checkpoint store, keyed by run id.
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `workflow_checkpoints` table if absent. Safe to call
    /// on every startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                run_id TEXT PRIMARY KEY,
                state JSONB NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
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
impl CheckpointStore for PostgresCheckpointStore {
    async fn save(&self, run_id: &str, state: &RunState) -> Result<()> {
        let payload = serde_json::to_value(state)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (run_id, state, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (run_id) DO UPDATE SET state = EXCLUDED.state, updated_at = now()
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
        let row = sqlx::query("SELECT state FROM workflow_checkpoints WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row.get("state");
                Ok(serde_json::from_value(payload)?)
            }
            None => Err(CheckpointError::NotFound(run_id.to_string())),
        }
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM workflow_checkpoints WHERE run_id = $1")
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
