// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core workflow orchestration engine for declarative multi-model LLM
//! agent pipelines.

pub mod checkpoint;
pub mod context;
pub mod dag;
pub mod error;
pub mod evaluation;
pub mod executor;
pub mod expr;
pub mod memory;
pub mod models;
pub mod providers;
pub mod runner;
pub mod step;
pub mod tools;
pub mod trace;
pub mod workflow;

pub use checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore};
pub use context::{Message, RunState, StateUpdate, StepState, StepStatus};
pub use dag::Dag;
pub use error::{OrchestratorError, Result};
pub use evaluation::evaluate_run;
pub use evaluation::judge::{calibrate, CalibrationFixture, CalibrationReport};
pub use evaluation::scoring::ScoreReport;
pub use executor::{WorkflowExecutor, WorkflowResult};
pub use models::{ModelRegistry, Tier};
pub use runner::{ResolvedRun, RunStatus, Runner, RunnerConfig};
pub use step::{ProviderRegistry, StepCompiler};
pub use tools::{Tool, ToolRegistry, ToolResult, ToolSchema};
pub use trace::{CanonicalEvent, TraceEmitter, TraceSink};
pub use workflow::WorkflowConfig;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
