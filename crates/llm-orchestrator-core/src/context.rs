// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run state and the commutative reducers that merge concurrent writes
//! (spec §3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Execution status for a step (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Validation,
}

/// A single recorded attempt at a model candidate during failover (§4.2,
/// §4.4), kept in step metadata for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAttempt {
    pub model: String,
    pub error: Option<String>,
    pub retryable: bool,
}

/// Per-step metadata: tokens, model used, attempt history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetadata {
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub attempted_models: Vec<ModelAttempt>,
    #[serde(default)]
    pub skip_reason: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

/// Entry in the run state's `steps` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub loop_iteration: u32,
    #[serde(default)]
    pub metadata: StepMetadata,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl StepState {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            outputs: HashMap::new(),
            error: None,
            loop_iteration: 0,
            metadata: StepMetadata::default(),
            started_at: None,
            ended_at: None,
            duration_ms: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        let mut metadata = StepMetadata::default();
        metadata.skip_reason = Some(reason.into());
        Self {
            status: StepStatus::Skipped,
            outputs: HashMap::new(),
            error: None,
            loop_iteration: 0,
            metadata,
            started_at: None,
            ended_at: Some(Utc::now()),
            duration_ms: Some(0),
        }
    }
}

/// A chat message in the run's append-only message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// The append-only / merge-only run state that flows through every node
/// (spec §3, §4.7). Field-level reducers:
///
/// | field | reducer |
/// |---|---|
/// | messages | concatenation |
/// | context | shallow merge, last writer per key wins |
/// | inputs | shallow merge, set once at start |
/// | outputs | shallow merge |
/// | steps | per-key replace |
/// | current_step | last-non-empty wins |
/// | errors | concatenation |
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub steps: HashMap<String, StepState>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// A partial update produced by one node's execution. Merged into the
/// shared `RunState` at a single atomic point per node completion
/// (§4.6, §4.7). Every field's merge is commutative and associative, so
/// two partial updates from concurrently completed nodes can be applied
/// in either order with the same result (modulo the documented
/// last-writer-wins tie for `context`/`current_step`).
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub context: HashMap<String, Value>,
    pub outputs: HashMap<String, Value>,
    pub step: Option<(String, StepState)>,
    pub current_step: Option<String>,
    pub errors: Vec<String>,
}

impl RunState {
    pub fn new(inputs: HashMap<String, Value>) -> Self {
        Self {
            inputs,
            ..Default::default()
        }
    }

    /// Seeds run state the way the runner façade does at start-of-run
    /// (§4.9 step 4): the user's input map into `inputs`, and the run id
    /// into `context.workflow_run_id` so expressions and prompts can
    /// reference the run they're executing within.
    pub fn seeded(inputs: HashMap<String, Value>, run_id: &str) -> Self {
        let mut state = Self::new(inputs);
        state
            .context
            .insert("workflow_run_id".to_string(), Value::String(run_id.to_string()));
        state
    }

    /// Applies a partial update using the reducers of §4.7. Safe to call
    /// from a single writer holding the run-state lock; concurrent
    /// updates are commutative so any application order is valid.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        for (key, value) in update.context {
            self.context.insert(key, value);
        }
        for (key, value) in update.outputs {
            self.outputs.insert(key, value);
        }
        if let Some((name, state)) = update.step {
            self.steps.insert(name, state);
        }
        if let Some(step) = update.current_step {
            self.current_step = Some(step);
        }
        self.errors.extend(update.errors);
    }

    /// A root view exposing `inputs`, `steps.<name>.{status,outputs}`, and
    /// `context.<key>` to the expression evaluator (§4.1).
    pub fn as_root_view(&self) -> Value {
        let steps: serde_json::Map<String, Value> = self
            .steps
            .iter()
            .map(|(name, state)| {
                let status = match state.status {
                    StepStatus::Pending => "pending",
                    StepStatus::Running => "running",
                    StepStatus::Success => "success",
                    StepStatus::Failed => "failed",
                    StepStatus::Skipped => "skipped",
                    StepStatus::Validation => "validation",
                };
                let outputs = serde_json::to_value(&state.outputs).unwrap_or(Value::Null);
                (
                    name.clone(),
                    serde_json::json!({ "status": status, "outputs": outputs }),
                )
            })
            .collect();

        serde_json::json!({
            "inputs": self.inputs,
            "steps": Value::Object(steps),
            "context": self.context,
        })
    }
}
