// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dynamic parallel DAG executor (spec §4.6).
//!
//! Ported from `original_source/agentic-workflows-v2/src/agentic_v2/engine/dag_executor.py`'s
//! `DAGExecutor.execute`: the `asyncio.create_task` + `asyncio.wait(...,
//! return_when=FIRST_COMPLETED)` loop becomes `tokio::spawn` futures
//! collected in a `FuturesUnordered`, bounded by a `tokio::sync::Semaphore`
//! in place of the source's bare `max_concurrency` counter. `ready`/
//! `running`/`completed`/`skipped` bookkeeping, `mark_skipped`, and
//! `cascade_skip`'s breadth-first walk over dependents are kept as
//! named methods with the same behavior, extended with the gate
//! (`when`) and bounded self-loop (`loop_until`/`loop_max`) handling the
//! source splits across `step.py` and the workflow YAML layer.

use crate::checkpoint::CheckpointStore;
use crate::context::{RunState, StateUpdate, StepState, StepStatus};
use crate::dag::Dag;
use crate::error::{OrchestratorError, Result};
use crate::expr;
use crate::step::StepCompiler;
use crate::trace::{CanonicalEvent, TraceEmitter};
use crate::workflow::{StepConfig, WorkflowConfig};
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// The final outcome of a workflow run. `overall_status` is the
/// engine's own success/failed verdict; the caller-facing tri-state
/// `{success, partial, failed}` status (§3) additionally folds in
/// cascaded skips and unresolved required outputs, and is computed by
/// `Runner::run` once outputs are resolved.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub run_id: String,
    pub workflow_name: String,
    pub overall_status: StepStatus,
    pub state: RunState,
    pub elapsed_seconds: f64,
}

/// One node's execution outcome, ready to be folded into the shared
/// `RunState` via a `StateUpdate` (§4.7).
struct NodeResult {
    name: String,
    status: StepStatus,
    update: StateUpdate,
    requeue: bool,
}

/// Executes a compiled DAG against a step compiler, with dynamic
/// scheduling, conditional fan-out, cascading skip, bounded
/// self-loops, and per-node checkpointing.
pub struct WorkflowExecutor {
    compiler: Arc<StepCompiler>,
    checkpoints: Arc<dyn CheckpointStore>,
    trace: TraceEmitter,
    max_concurrency: usize,
}

impl WorkflowExecutor {
    pub fn new(compiler: Arc<StepCompiler>, checkpoints: Arc<dyn CheckpointStore>, trace: TraceEmitter) -> Self {
        Self {
            compiler,
            checkpoints,
            trace,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub async fn execute(
        &self,
        config: &WorkflowConfig,
        dag: &Dag,
        inputs: HashMap<String, Value>,
    ) -> Result<WorkflowResult> {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let steps_by_name: HashMap<&str, &StepConfig> =
            config.steps.iter().map(|s| (s.name.as_str(), s)).collect();

        self.trace
            .emit(CanonicalEvent::WorkflowStart {
                run_id: run_id.clone(),
                workflow: config.name.clone(),
                timestamp: Utc::now(),
            })
            .await;

        let state = Arc::new(Mutex::new(RunState::seeded(inputs, &run_id)));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let mut in_degree: HashMap<String, usize> = dag
            .step_names()
            .map(|name| (name.to_string(), dag.dependencies_of(name).len()))
            .collect();
        let mut ready: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| name.clone())
            .collect();
        let mut running: HashSet<String> = HashSet::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut overall_status = StepStatus::Running;

        let mut in_flight = FuturesUnordered::new();

        loop {
            while let Some(name) = ready.pop_front() {
                if running.len() >= self.max_concurrency {
                    ready.push_front(name);
                    break;
                }
                if completed.contains(&name) || skipped.contains(&name) {
                    continue;
                }
                running.insert(name.clone());
                let step = steps_by_name[name.as_str()].clone();
                let is_self_loop = dag.is_self_loop(&name);
                let task = self.spawn_step(
                    step,
                    is_self_loop,
                    Arc::clone(&state),
                    Arc::clone(&semaphore),
                    run_id.clone(),
                );
                in_flight.push(task);
            }

            if in_flight.is_empty() {
                let remaining: Vec<String> = dag
                    .step_names()
                    .filter(|name| !completed.contains(*name) && !skipped.contains(*name))
                    .map(|s| s.to_string())
                    .collect();
                for name in remaining {
                    self.mark_skipped(&state, &mut completed, &mut skipped, &name, "unmet dependencies", &run_id)
                        .await;
                }
                break;
            }

            let Some(joined) = in_flight.next().await else {
                break;
            };
            let node_result = match joined {
                Ok(inner) => inner?,
                Err(join_error) => {
                    return Err(OrchestratorError::other(format!(
                        "step task panicked: {}",
                        join_error
                    )))
                }
            };
            running.remove(&node_result.name);

            {
                let mut guard = state.lock().await;
                guard.apply(node_result.update);
                if let Err(error) = self.checkpoints.save(&run_id, &guard).await {
                    tracing::warn!(%error, run_id = %run_id, "failed to persist checkpoint");
                }
            }

            if node_result.requeue {
                // Self-loop not yet satisfied: re-queue the same step
                // now that its incremented loop_iteration is committed.
                ready.push_back(node_result.name.clone());
                continue;
            }

            completed.insert(node_result.name.clone());

            let (status_str, duration_ms, outputs) = {
                let guard = state.lock().await;
                let step_state = guard.steps.get(&node_result.name);
                (
                    step_state.map(|s| status_label(s.status)).unwrap_or("unknown").to_string(),
                    step_state.and_then(|s| s.duration_ms),
                    step_state.map(|s| serde_json::to_value(&s.outputs).unwrap_or(Value::Null)),
                )
            };

            self.trace
                .emit(CanonicalEvent::StepComplete {
                    run_id: run_id.clone(),
                    step: node_result.name.clone(),
                    status: status_str,
                    duration_ms,
                    timestamp: Utc::now(),
                    outputs,
                })
                .await;

            match node_result.status {
                StepStatus::Failed => {
                    overall_status = StepStatus::Failed;
                    self.cascade_skip(dag, &state, &mut completed, &mut skipped, &node_result.name, "dependency failed", &run_id)
                        .await;
                }
                StepStatus::Skipped => {
                    // Gate-skipped: its dependents are NOT eagerly cascaded.
                    // They stay un-readied (their in-degree is never
                    // decremented below) and are caught by the final
                    // "unmet dependencies" sweep once nothing remains ready.
                }
                _ => {
                    for dependent in dag.dependents_of(&node_result.name) {
                        if completed.contains(&dependent) || skipped.contains(&dependent) {
                            continue;
                        }
                        let degree = in_degree.get_mut(&dependent).unwrap();
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            ready.push_back(dependent);
                        }
                    }
                }
            }

            if completed.len() + skipped.len() >= dag.len() && in_flight.is_empty() && ready.is_empty() {
                break;
            }
        }

        if overall_status == StepStatus::Running {
            overall_status = StepStatus::Success;
        }

        self.trace
            .emit(CanonicalEvent::WorkflowEnd {
                run_id: run_id.clone(),
                status: status_label(overall_status).to_string(),
                timestamp: Utc::now(),
            })
            .await;

        let final_state = state.lock().await.clone();
        Ok(WorkflowResult {
            run_id,
            workflow_name: config.name.clone(),
            overall_status,
            state: final_state,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        })
    }

    fn spawn_step(
        &self,
        step: StepConfig,
        is_self_loop: bool,
        state: Arc<Mutex<RunState>>,
        semaphore: Arc<Semaphore>,
        run_id: String,
    ) -> tokio::task::JoinHandle<Result<NodeResult>> {
        let compiler = Arc::clone(&self.compiler);
        let trace = self.trace.clone();
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| OrchestratorError::other("scheduler semaphore closed"))?;

            let root_view = { state.lock().await.as_root_view() };

            if let Some(gate) = &step.when {
                if !expr::evaluate_bool(&root_view, gate) {
                    let step_state = StepState::skipped("when condition false");
                    return Ok(NodeResult {
                        name: step.name.clone(),
                        status: StepStatus::Skipped,
                        update: StateUpdate {
                            step: Some((step.name.clone(), step_state)),
                            current_step: Some(step.name.clone()),
                            ..Default::default()
                        },
                        requeue: false,
                    });
                }
            }

            trace
                .emit(CanonicalEvent::StepStart {
                    run_id: run_id.clone(),
                    step: step.name.clone(),
                    timestamp: Utc::now(),
                })
                .await;

            let started_at = Utc::now();
            let prior_iteration = {
                state
                    .lock()
                    .await
                    .steps
                    .get(&step.name)
                    .map(|s| s.loop_iteration)
                    .unwrap_or(0)
            };

            // Resolve the step-local input bag from its declared source
            // expressions (§4.4 step 1): passed to the tool/prompt, and
            // merged into the shared context so downstream steps can
            // read it back via `context.<key>`.
            let resolved_inputs = resolve_step_inputs(&step, &root_view);
            let context_update = resolved_inputs_as_context(&resolved_inputs);

            let (tier, role) = step.tier_and_role()?;
            let step_future = async {
                if tier == 0 {
                    compiler.run_deterministic(&step, role, resolved_inputs.clone()).await
                } else {
                    let template = step.prompt_file.as_deref().unwrap_or(DEFAULT_PROMPT_TEMPLATE);
                    let prompt_context = build_prompt_context(&step, &resolved_inputs, &root_view);
                    compiler
                        .run_llm(&step, crate::models::Tier(tier), template, &prompt_context)
                        .await
                }
            };
            let run_result = match step.timeout_seconds {
                Some(seconds) => {
                    match tokio::time::timeout(std::time::Duration::from_secs(seconds), step_future).await {
                        Ok(result) => result,
                        Err(_) => Err(OrchestratorError::Timeout {
                            step: step.name.clone(),
                            duration: std::time::Duration::from_secs(seconds),
                        }),
                    }
                }
                None => step_future.await,
            };

            let ended_at = Utc::now();
            let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;

            match run_result {
                Ok(outcome) => {
                    let outputs: HashMap<String, Value> = match &outcome.raw_output {
                        Value::Object(map) => map.clone().into_iter().collect(),
                        other => {
                            let mut m = HashMap::new();
                            m.insert("result".to_string(), other.clone());
                            m
                        }
                    };

                    let mapped_outputs = mapped_outputs_as_context(&step, &outputs, &root_view);
                    let mut context_update = context_update;
                    context_update.extend(mapped_outputs);

                    let current_iteration = prior_iteration + 1;
                    let mut step_state = StepState::pending();
                    step_state.status = StepStatus::Success;
                    step_state.outputs = outputs;
                    step_state.loop_iteration = current_iteration;
                    step_state.started_at = Some(started_at);
                    step_state.ended_at = Some(ended_at);
                    step_state.duration_ms = Some(duration_ms);
                    step_state.metadata.tokens_used = outcome.tokens_used;
                    step_state.metadata.model_used = outcome.model_used.clone();
                    step_state.metadata.attempted_models = outcome.attempted_models;

                    if is_self_loop {
                        let mut scratch = state.lock().await.clone();
                        scratch.apply(StateUpdate {
                            step: Some((step.name.clone(), step_state.clone())),
                            ..Default::default()
                        });
                        let satisfied = step
                            .loop_until
                            .as_deref()
                            .map(|expr_str| expr::evaluate_bool(&scratch.as_root_view(), expr_str))
                            .unwrap_or(true);
                        let max_iterations = step.loop_max.unwrap_or(1);
                        if !satisfied && current_iteration < max_iterations {
                            return Ok(NodeResult {
                                name: step.name.clone(),
                                status: StepStatus::Running,
                                update: StateUpdate {
                                    step: Some((step.name.clone(), step_state)),
                                    current_step: Some(step.name.clone()),
                                    context: context_update,
                                    ..Default::default()
                                },
                                requeue: true,
                            });
                        }
                    }

                    Ok(NodeResult {
                        name: step.name.clone(),
                        status: StepStatus::Success,
                        update: StateUpdate {
                            step: Some((step.name.clone(), step_state)),
                            current_step: Some(step.name.clone()),
                            context: context_update,
                            ..Default::default()
                        },
                        requeue: false,
                    })
                }
                Err(error) => {
                    let mut step_state = StepState::pending();
                    step_state.status = StepStatus::Failed;
                    step_state.error = Some(error.to_string());
                    step_state.started_at = Some(started_at);
                    step_state.ended_at = Some(ended_at);
                    step_state.duration_ms = Some(duration_ms);

                    Ok(NodeResult {
                        name: step.name.clone(),
                        status: StepStatus::Failed,
                        update: StateUpdate {
                            step: Some((step.name.clone(), step_state)),
                            current_step: Some(step.name.clone()),
                            errors: vec![format!("{}: {}", step.name, error)],
                            context: context_update,
                            ..Default::default()
                        },
                        requeue: false,
                    })
                }
            }
        })
    }

    async fn mark_skipped(
        &self,
        state: &Arc<Mutex<RunState>>,
        completed: &mut HashSet<String>,
        skipped: &mut HashSet<String>,
        name: &str,
        reason: &str,
        run_id: &str,
    ) {
        if completed.contains(name) || skipped.contains(name) {
            return;
        }
        {
            let mut guard = state.lock().await;
            guard.apply(StateUpdate {
                step: Some((name.to_string(), StepState::skipped(reason))),
                ..Default::default()
            });
        }
        completed.insert(name.to_string());
        skipped.insert(name.to_string());

        self.trace
            .emit(CanonicalEvent::StepComplete {
                run_id: run_id.to_string(),
                step: name.to_string(),
                status: "skipped".to_string(),
                duration_ms: Some(0),
                timestamp: Utc::now(),
                outputs: None,
            })
            .await;
    }

    /// Breadth-first propagation of a skip to every not-yet-terminal
    /// dependent, mirroring `DAGExecutor.cascade_skip`.
    async fn cascade_skip(
        &self,
        dag: &Dag,
        state: &Arc<Mutex<RunState>>,
        completed: &mut HashSet<String>,
        skipped: &mut HashSet<String>,
        start: &str,
        reason: &str,
        run_id: &str,
    ) {
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start.to_string());
        while let Some(current) = queue.pop_front() {
            for dependent in dag.dependents_of(&current) {
                if completed.contains(&dependent) || skipped.contains(&dependent) {
                    continue;
                }
                self.mark_skipped(state, completed, skipped, &dependent, reason, run_id).await;
                queue.push_back(dependent);
            }
        }
    }
}

/// Default task-description template used when a step declares no
/// `prompt_file` (§4.4 step 2): step name, description, resolved inputs
/// pretty-printed, and the output keys the model must return.
const DEFAULT_PROMPT_TEMPLATE: &str = "Step: {{step_name}}{{#if step_description}} — {{step_description}}{{/if}}\n\nInputs:\n{{json resolved_inputs}}\n{{#if output_keys}}\nReturn a JSON object with exactly these keys: {{#each output_keys}}{{this}}{{#unless @last}}, {{/unless}}{{/each}}\n{{/if}}";

/// Resolves a step's local `inputs` mapping (step-local name → source
/// expression) against the live root view (§4.4 step 1).
fn resolve_step_inputs(step: &StepConfig, root_view: &Value) -> Value {
    let mut resolved = serde_json::Map::with_capacity(step.inputs.len());
    for (local_name, source_expr) in &step.inputs {
        resolved.insert(local_name.clone(), expr::resolve(root_view, source_expr));
    }
    Value::Object(resolved)
}

/// Converts a resolved input bag into the shared-context update so
/// downstream steps can read it back via `context.<key>`.
fn resolved_inputs_as_context(resolved_inputs: &Value) -> HashMap<String, Value> {
    match resolved_inputs {
        Value::Object(map) => map.clone().into_iter().collect(),
        _ => HashMap::new(),
    }
}

/// Maps a completed step's declared outputs (step-local name → context
/// key) into the shared-context update (§3, §4.4 step 6). This is the
/// second of the two passes spec.md §9's Open Question asks about: the
/// first pass (`resolved_inputs_as_context`) runs before the step body,
/// this one after. A declared output name that collides with an
/// existing context key is allowed — last writer wins per §4.7 — but
/// logged, since it usually means two steps were meant to write
/// different context keys and one `outputs` mapping is misconfigured.
fn mapped_outputs_as_context(
    step: &StepConfig,
    outputs: &HashMap<String, Value>,
    root_view: &Value,
) -> HashMap<String, Value> {
    let existing_context = root_view.get("context").and_then(Value::as_object);
    let mut mapped = HashMap::with_capacity(step.outputs.len());
    for (local_name, context_key) in &step.outputs {
        let Some(value) = outputs.get(local_name) else {
            continue;
        };
        if let Some(existing) = existing_context.and_then(|ctx| ctx.get(context_key)) {
            if existing != value {
                tracing::warn!(
                    step = %step.name,
                    context_key = %context_key,
                    "step output collides with an existing context key; last writer wins"
                );
            }
        }
        mapped.insert(context_key.clone(), value.clone());
    }
    mapped
}

/// Assembles the handlebars render context for a tier ≥ 1 step's
/// prompt: the live root view plus the task-description fields
/// (§4.4 step 2).
fn build_prompt_context(step: &StepConfig, resolved_inputs: &Value, root_view: &Value) -> Value {
    let mut merged = root_view.clone();
    if let Value::Object(ref mut map) = merged {
        map.insert("step_name".to_string(), Value::String(step.name.clone()));
        map.insert(
            "step_description".to_string(),
            step.description.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert("resolved_inputs".to_string(), resolved_inputs.clone());
        let output_keys: Vec<Value> = step.outputs.keys().cloned().map(Value::String).collect();
        map.insert("output_keys".to_string(), Value::Array(output_keys));
    }
    merged
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Success => "success",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
        StepStatus::Validation => "validation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::models::ModelRegistry;
    use crate::step::ProviderRegistry;
    use crate::tools::{Tool, ToolRegistry, ToolResult};
    use crate::workflow::StepConfig;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "returns its params unchanged"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({})
        }
        async fn execute(&self, params: Value) -> std::result::Result<ToolResult, String> {
            Ok(ToolResult::ok(params))
        }
    }

    fn step(name: &str, deps: &[&str]) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            agent: "tier0_noop".to_string(),
            description: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            inputs: Map::new(),
            outputs: Map::new(),
            when: None,
            loop_until: None,
            loop_max: None,
            tools: None,
            prompt_file: None,
            model_override: None,
            timeout_seconds: None,
        }
    }

    fn config(steps: Vec<StepConfig>) -> WorkflowConfig {
        WorkflowConfig {
            name: "w".into(),
            version: "1".into(),
            description: None,
            experimental: false,
            inputs: Map::new(),
            outputs: Map::new(),
            steps,
            evaluation: None,
            capabilities: None,
        }
    }

    fn executor() -> WorkflowExecutor {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(NoopTool));
        let compiler = Arc::new(StepCompiler::new(ModelRegistry::default(), ProviderRegistry::new(), tools));
        WorkflowExecutor::new(compiler, Arc::new(InMemoryCheckpointStore::new()), TraceEmitter::new())
    }

    #[tokio::test]
    async fn linear_workflow_completes_successfully() {
        let cfg = config(vec![step("a", &[]), step("b", &["a"])]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = executor().execute(&cfg, &dag, Map::new()).await.unwrap();
        assert_eq!(result.overall_status, StepStatus::Success);
        assert_eq!(result.state.steps.len(), 2);
    }

    #[tokio::test]
    async fn failed_step_cascades_skip_to_dependents() {
        struct FailingTool;
        #[async_trait]
        impl Tool for FailingTool {
            fn name(&self) -> &str {
                "failing"
            }
            fn description(&self) -> &str {
                "always fails"
            }
            fn parameters(&self) -> Value {
                serde_json::json!({})
            }
            async fn execute(&self, _params: Value) -> std::result::Result<ToolResult, String> {
                Err("boom".to_string())
            }
        }

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(FailingTool));
        let compiler = Arc::new(StepCompiler::new(ModelRegistry::default(), ProviderRegistry::new(), tools));
        let exec = WorkflowExecutor::new(compiler, Arc::new(InMemoryCheckpointStore::new()), TraceEmitter::new());

        let mut a = step("a", &[]);
        a.agent = "tier0_failing".to_string();
        let cfg = config(vec![a, step("b", &["a"]), step("c", &["b"])]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = exec.execute(&cfg, &dag, Map::new()).await.unwrap();

        assert_eq!(result.overall_status, StepStatus::Failed);
        assert_eq!(result.state.steps["a"].status, StepStatus::Failed);
        assert_eq!(result.state.steps["b"].status, StepStatus::Skipped);
        assert_eq!(result.state.steps["c"].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn when_gate_skips_step_without_failing_run() {
        let mut gated = step("gated", &[]);
        gated.when = Some("false".to_string());
        let cfg = config(vec![gated]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = executor().execute(&cfg, &dag, Map::new()).await.unwrap();
        assert_eq!(result.state.steps["gated"].status, StepStatus::Skipped);
        assert_eq!(
            result.state.steps["gated"].metadata.skip_reason.as_deref(),
            Some("when condition false")
        );
    }

    #[tokio::test]
    async fn conditional_branch_skip_cascades_to_joint_dependent() {
        let mut b = step("b", &["a"]);
        b.when = Some("false".to_string());
        let cfg = config(vec![step("a", &[]), b, step("c", &["a"]), step("d", &["b", "c"])]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = executor().execute(&cfg, &dag, Map::new()).await.unwrap();

        assert_eq!(result.state.steps["b"].status, StepStatus::Skipped);
        assert_eq!(result.state.steps["c"].status, StepStatus::Success);
        assert_eq!(result.state.steps["d"].status, StepStatus::Skipped);
        assert_eq!(
            result.state.steps["b"].metadata.skip_reason.as_deref(),
            Some("when condition false")
        );
        assert_eq!(
            result.state.steps["d"].metadata.skip_reason.as_deref(),
            Some("unmet dependencies")
        );
    }

    #[tokio::test]
    async fn step_local_inputs_resolve_into_tool_params_and_context() {
        let mut a = step("a", &[]);
        a.inputs.insert("who".to_string(), "'world'".to_string());
        let cfg = config(vec![a]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = executor().execute(&cfg, &dag, Map::new()).await.unwrap();

        assert_eq!(
            result.state.context.get("who"),
            Some(&Value::String("world".to_string()))
        );
        assert_eq!(
            result.state.steps["a"].outputs.get("who"),
            Some(&Value::String("world".to_string()))
        );
    }

    #[tokio::test]
    async fn declared_step_outputs_map_into_shared_context() {
        let mut a = step("a", &[]);
        a.inputs.insert("x".to_string(), "1".to_string());
        a.outputs.insert("x".to_string(), "renamed_x".to_string());
        let cfg = config(vec![a]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = executor().execute(&cfg, &dag, Map::new()).await.unwrap();

        assert_eq!(result.state.steps["a"].outputs.get("x"), Some(&Value::from(1)));
        assert_eq!(result.state.context.get("renamed_x"), Some(&Value::from(1)));
    }

    #[tokio::test]
    async fn bounded_self_loop_terminates_at_loop_max() {
        let mut looped = step("reviewer", &["reviewer"]);
        looped.agent = "tier0_noop".to_string();
        looped.loop_until = Some("false".to_string());
        looped.loop_max = Some(3);
        let cfg = config(vec![looped]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = executor().execute(&cfg, &dag, Map::new()).await.unwrap();

        assert_eq!(result.state.steps["reviewer"].status, StepStatus::Success);
        assert_eq!(result.state.steps["reviewer"].loop_iteration, 3);
    }

    #[tokio::test]
    async fn self_loop_exits_as_soon_as_condition_is_satisfied() {
        struct CountingTool {
            calls: std::sync::atomic::AtomicU32,
        }

        #[async_trait]
        impl Tool for CountingTool {
            fn name(&self) -> &str {
                "counter"
            }
            fn description(&self) -> &str {
                "reports done=true from its second call onward"
            }
            fn parameters(&self) -> Value {
                serde_json::json!({})
            }
            async fn execute(&self, _params: Value) -> std::result::Result<ToolResult, String> {
                let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                Ok(ToolResult::ok(serde_json::json!({ "done": n >= 2 })))
            }
        }

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool {
            calls: std::sync::atomic::AtomicU32::new(0),
        }));
        let compiler = Arc::new(StepCompiler::new(ModelRegistry::default(), ProviderRegistry::new(), tools));
        let exec = WorkflowExecutor::new(compiler, Arc::new(InMemoryCheckpointStore::new()), TraceEmitter::new());

        let mut looped = step("refine", &["refine"]);
        looped.agent = "tier0_counter".to_string();
        looped.loop_until = Some("${steps.refine.outputs.done} == true".to_string());
        looped.loop_max = Some(5);
        let cfg = config(vec![looped]);
        let dag = Dag::compile(&cfg).unwrap();
        let result = exec.execute(&cfg, &dag, Map::new()).await.unwrap();

        assert_eq!(result.state.steps["refine"].status, StepStatus::Success);
        assert_eq!(result.state.steps["refine"].loop_iteration, 2);
    }
}
