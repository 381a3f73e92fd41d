// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Checkpoint persistence for run state (spec §4.6, §6): lets a
//! long-running or self-looping workflow survive process restarts
//! between step completions.
//!
//! Async, `Send + Sync`, one error enum distinguishing storage-backend
//! failure classes from "not found". A concrete `sqlx`-backed
//! implementation lives in `llm-orchestrator-state`.

use crate::context::RunState;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no checkpoint found for run '{0}'")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Persists and restores a run's state keyed by run id. A step commits
/// a checkpoint after every completed node so a restart resumes from
/// the last successfully applied `StateUpdate` rather than from
/// scratch (§4.6).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, run_id: &str, state: &RunState) -> Result<()>;
    async fn load(&self, run_id: &str) -> Result<RunState>;
    async fn delete(&self, run_id: &str) -> Result<()>;
    async fn health_check(&self) -> Result<()>;

    /// Returns up to `limit` prior snapshots for a run, most recent
    /// first (spec §6's `history(thread_id, limit)`). This crate's
    /// backends keep only the latest snapshot per run id (a resume only
    /// ever needs the latest one, per §4.6), so the default returns that
    /// single snapshot — or none if the run was never checkpointed.
    /// A backend that retains multiple generations overrides this.
    async fn history(&self, run_id: &str, limit: usize) -> Result<Vec<RunState>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        match self.load(run_id).await {
            Ok(state) => Ok(vec![state]),
            Err(CheckpointError::NotFound(_)) => Ok(Vec::new()),
            Err(other) => Err(other),
        }
    }
}

/// In-memory store used by default and in tests; not durable across
/// process restarts, but satisfies the same trait as a durable backend
/// so the executor does not special-case "no persistence configured".
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    runs: parking_lot::RwLock<std::collections::HashMap<String, RunState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, run_id: &str, state: &RunState) -> Result<()> {
        self.runs.write().insert(run_id.to_string(), state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<RunState> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(run_id.to_string()))
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        self.runs.write().remove(run_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
