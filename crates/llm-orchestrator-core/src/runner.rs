// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runner façade (spec §4.9): the single entry point a caller uses to
//! go from a YAML workflow name plus raw inputs to resolved outputs.
//!
//! Ported from `original_source/agentic-workflows-v2/src/agentic_v2/workflows/runner.py`'s
//! `WorkflowRunner`: cached YAML load + cached DAG compile (here,
//! `dashmap` replaces the source's implicit single-process memoization),
//! input validation with default/enum checks, execution, and output
//! resolution via the expression evaluator (`_resolve_outputs`).

use crate::context::StepStatus;
use crate::dag::Dag;
use crate::error::{OrchestratorError, Result};
use crate::executor::{WorkflowExecutor, WorkflowResult};
use crate::expr;
use crate::workflow::{InputSpec, WorkflowConfig};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Runner-wide tunables, analogous to `WorkflowRunner.__init__`'s
/// keyword arguments.
#[derive(Clone)]
pub struct RunnerConfig {
    pub max_concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { max_concurrency: 10 }
    }
}

/// Caches parsed+validated `WorkflowConfig`s and their compiled `Dag`s
/// by workflow name, so repeated runs of the same workflow skip
/// re-parsing YAML and re-running cycle detection.
#[derive(Default)]
struct CompileCache {
    configs: DashMap<String, Arc<WorkflowConfig>>,
    dags: DashMap<String, Arc<Dag>>,
}

pub struct Runner {
    executor: Arc<WorkflowExecutor>,
    config: RunnerConfig,
    cache: CompileCache,
}

impl Runner {
    pub fn new(executor: Arc<WorkflowExecutor>, config: RunnerConfig) -> Self {
        Self {
            executor,
            config,
            cache: CompileCache::default(),
        }
    }

    /// Parses, validates, and compiles a workflow (or returns the
    /// cached result for a name already seen).
    pub fn load(&self, name: &str, yaml: &str) -> Result<(Arc<WorkflowConfig>, Arc<Dag>)> {
        if let (Some(config), Some(dag)) = (self.cache.configs.get(name), self.cache.dags.get(name)) {
            return Ok((config.clone(), dag.clone()));
        }

        let parsed: WorkflowConfig = serde_yaml::from_str(yaml)?;
        parsed.validate()?;
        let dag = Dag::compile(&parsed)?;

        let config = Arc::new(parsed);
        let dag = Arc::new(dag);
        self.cache.configs.insert(name.to_string(), config.clone());
        self.cache.dags.insert(name.to_string(), dag.clone());
        Ok((config, dag))
    }

    /// Validates supplied inputs against the workflow's declared input
    /// schema: applies defaults, rejects values outside a declared
    /// `enum`, and collects every missing-required-input error before
    /// failing (§4.9 mirrors `_validate_inputs`'s all-errors-at-once
    /// behavior rather than failing on the first one).
    pub fn validate_inputs(
        &self,
        config: &WorkflowConfig,
        supplied: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>> {
        let mut validated = HashMap::new();
        let mut errors = Vec::new();

        for (name, spec) in &config.inputs {
            match (supplied.get(name), spec) {
                (Some(value), InputSpec::Full { r#enum: Some(allowed), .. }) => {
                    if !allowed.contains(value) {
                        errors.push(format!("input '{}' must be one of {:?}, got {:?}", name, allowed, value));
                    }
                    validated.insert(name.clone(), value.clone());
                }
                (Some(value), _) => {
                    validated.insert(name.clone(), value.clone());
                }
                (None, InputSpec::Full { default: Some(default), .. }) => {
                    validated.insert(name.clone(), default.clone());
                }
                (None, InputSpec::Scalar(default)) => {
                    validated.insert(name.clone(), default.clone());
                }
                (None, InputSpec::Full { required: true, .. }) => {
                    errors.push(format!("missing required input '{}'", name));
                }
                (None, _) => {}
            }
        }

        if !errors.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "validation failed for workflow '{}': {}",
                config.name,
                errors.join("; ")
            )));
        }

        Ok(validated)
    }

    /// Loads, validates, executes, and resolves outputs for a named
    /// workflow in one call — the primary high-level API (§4.9).
    pub async fn run(&self, name: &str, yaml: &str, inputs: HashMap<String, Value>) -> Result<ResolvedRun> {
        let (config, dag) = self.load(name, yaml)?;
        let validated = self.validate_inputs(&config, inputs)?;

        let executor = Arc::clone(&self.executor);
        let mut run_result = executor
            .as_ref()
            .execute(&config, &dag, validated)
            .await?;

        let (outputs, unresolved_required) = self.resolve_outputs(&config, &run_result);
        // Merge the resolved workflow-level outputs into `state.outputs`
        // (§4.7's "outputs: shallow merge" reducer) so anything that reads
        // the final run state directly — the evaluation pipeline's hard
        // gates in particular — sees them, not just `ResolvedRun.outputs`.
        run_result.state.apply(crate::context::StateUpdate {
            outputs: outputs.clone(),
            ..Default::default()
        });
        let (step_tokens, step_models) = aggregate_step_usage(&run_result);
        let status = resolve_run_status(&run_result, &unresolved_required);

        Ok(ResolvedRun {
            status,
            errors: run_result.state.errors.clone(),
            elapsed_seconds: run_result.elapsed_seconds,
            unresolved_required,
            step_tokens,
            step_models,
            run_result,
            outputs,
        })
    }

    /// Maps every declared workflow output to a value resolved from the
    /// final run state's root view. A required (non-`optional`) output
    /// that resolves to `null` is returned in the second element for the
    /// caller to surface as a warning, mirroring `_resolve_outputs`'s
    /// `unresolved_required_outputs` bookkeeping without raising.
    fn resolve_outputs(&self, config: &WorkflowConfig, run_result: &WorkflowResult) -> (HashMap<String, Value>, Vec<String>) {
        let root_view = run_result.state.as_root_view();
        let mut outputs = HashMap::new();
        let mut unresolved_required = Vec::new();
        for (name, spec) in &config.outputs {
            let expression = spec.expression();
            if expression.is_empty() {
                continue;
            }
            let value = expr::resolve(&root_view, expression);
            if value.is_null() && !spec.is_optional() {
                unresolved_required.push(name.clone());
            }
            outputs.insert(name.clone(), value);
        }
        unresolved_required.sort();
        (outputs, unresolved_required)
    }
}

/// Derives the caller-facing tri-state status (§3) from the engine's
/// internal success/failed verdict plus cascaded skips and unresolved
/// required outputs: a genuine step failure is always `failed`; a clean
/// run with every required output resolved is `success`; anything else
/// (a skipped step, or a missing required output) is `partial`.
fn resolve_run_status(run_result: &WorkflowResult, unresolved_required: &[String]) -> RunStatus {
    if run_result.overall_status == StepStatus::Failed {
        return RunStatus::Failed;
    }
    let any_skipped = run_result.state.steps.values().any(|s| s.status == StepStatus::Skipped);
    if any_skipped || !unresolved_required.is_empty() {
        return RunStatus::Partial;
    }
    RunStatus::Success
}

/// Collects each step's token usage and model-used, as recorded by the
/// step compiler, into caller-facing maps (§3's "token counts per step,
/// model used per step").
fn aggregate_step_usage(run_result: &WorkflowResult) -> (HashMap<String, u64>, HashMap<String, String>) {
    let mut tokens = HashMap::new();
    let mut models = HashMap::new();
    for (name, step) in &run_result.state.steps {
        if let Some(used) = step.metadata.tokens_used {
            tokens.insert(name.clone(), used);
        }
        if let Some(model) = &step.metadata.model_used {
            models.insert(name.clone(), model.clone());
        }
    }
    (tokens, models)
}

/// Terminal workflow status (§3): `Failed` if any step genuinely failed,
/// `Partial` if the run completed without a hard failure but some step
/// was skipped or a required output never resolved, `Success` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// Final result of a runner-mediated execution: the raw `WorkflowResult`
/// plus the resolved, caller-facing output map and the summary fields
/// spec §3's "Workflow result" entity names (tri-state status, error
/// list, elapsed time, per-step token/model usage, unresolved required
/// outputs).
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub run_result: WorkflowResult,
    pub outputs: HashMap<String, Value>,
    pub status: RunStatus,
    pub errors: Vec<String>,
    pub elapsed_seconds: f64,
    pub unresolved_required: Vec<String>,
    pub step_tokens: HashMap<String, u64>,
    pub step_models: HashMap<String, String>,
}

impl RunnerConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}
