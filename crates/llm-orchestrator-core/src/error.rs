// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the workflow engine (spec §7).

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the orchestrator core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed workflow config, missing required input, bad enum, unknown
    /// dependency, weights that don't sum to 1, undeclared criteria.
    #[error("validation error: {0}")]
    Validation(String),

    /// Empty step list, cycle (excluding sanctioned self-loops), missing
    /// dependency.
    #[error("compile error: {0}")]
    Compile(String),

    /// A step referenced in `depends_on` does not exist.
    #[error("step '{step}' depends on missing step '{missing_dep}'")]
    MissingDependency { step: String, missing_dep: String },

    /// A non-self-loop cycle was detected while compiling the graph.
    #[error("cycle detected in workflow graph: {0}")]
    CycleDetected(String),

    /// Unknown step referenced at runtime.
    #[error("step not found: {0}")]
    StepNotFound(String),

    /// All model candidates failed for a step.
    #[error("All model attempts failed (last model={last_model}: {last_error})")]
    AllCandidatesFailed {
        last_model: String,
        last_error: String,
    },

    /// A required environment variable for a model override had no
    /// fallback and was unset.
    #[error("model override references unset environment variable '{0}' with no fallback")]
    UnresolvedModelOverride(String),

    /// A step timed out.
    #[error("step '{step}' timed out after {duration:?}")]
    Timeout { step: String, duration: Duration },

    /// The run was cancelled.
    #[error("workflow run cancelled")]
    Cancelled,

    /// Wraps an arbitrary provider/tool error surfaced from outside the
    /// engine's own taxonomy.
    #[error("{0}")]
    Other(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OrchestratorError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
