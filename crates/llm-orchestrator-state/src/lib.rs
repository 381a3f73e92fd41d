// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sqlx`-backed [`CheckpointStore`](llm_orchestrator_core::CheckpointStore)
//! implementations for the workflow orchestrator (spec §4.6, §6).
//!
//! A pooled connection, an explicit `migrate()` step run once at
//! startup, and `CheckpointError::Backend` wrapping every driver error
//! so callers never see `sqlx::Error` directly. Two backends are
//! provided — Postgres for production deployments, SQLite for local
//! development and tests — sharing the same table shape and queries
//! modulo placeholder syntax.

mod postgres;
mod sqlite;

pub use postgres::PostgresCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

#[cfg(test)]
mod tests {
    use super::*;
    use llm_orchestrator_core::{CheckpointStore, RunState};
    use std::collections::HashMap;

    #[tokio::test]
    async fn sqlite_store_round_trips_a_checkpoint() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();

        let state = RunState::new(HashMap::new());
        store.save("run-1", &state).await.unwrap();
        let loaded = store.load("run-1").await.unwrap();
        assert_eq!(loaded.inputs, state.inputs);
    }

    #[tokio::test]
    async fn sqlite_store_overwrites_existing_checkpoint() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();

        let mut inputs = HashMap::new();
        inputs.insert("who".to_string(), serde_json::json!("first"));
        store.save("run-1", &RunState::new(inputs)).await.unwrap();

        let mut inputs = HashMap::new();
        inputs.insert("who".to_string(), serde_json::json!("second"));
        store.save("run-1", &RunState::new(inputs)).await.unwrap();

        let loaded = store.load("run-1").await.unwrap();
        assert_eq!(loaded.inputs.get("who"), Some(&serde_json::json!("second")));
    }

    #[tokio::test]
    async fn sqlite_store_delete_then_load_not_found() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();

        let state = RunState::new(HashMap::new());
        store.save("run-1", &state).await.unwrap();
        store.delete("run-1").await.unwrap();

        let result = store.load("run-1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sqlite_store_health_check_succeeds() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_store_load_missing_run_is_not_found() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let result = store.load("ghost").await;
        assert!(matches!(result, Err(llm_orchestrator_core::CheckpointError::NotFound(_))));
    }
}
