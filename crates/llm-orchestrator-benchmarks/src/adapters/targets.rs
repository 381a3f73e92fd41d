// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Benchmark target implementations for LLM Orchestrator operations.
//!
//! This module contains concrete implementations of the BenchTarget trait,
//! each measuring a specific orchestration operation.

use super::BenchTarget;
use crate::benchmarks::result::BenchmarkResult;
use async_trait::async_trait;
use llm_orchestrator_core::{
    evaluate_run,
    workflow::{EvaluationSpec, CriterionSpec, StepConfig, WorkflowConfig},
    Dag, ModelRegistry, RunState, StepStatus, Tier,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;

fn deterministic_step(name: &str, depends_on: Vec<String>) -> StepConfig {
    StepConfig {
        name: name.to_string(),
        agent: "tier0_tool".to_string(),
        description: None,
        depends_on,
        inputs: HashMap::new(),
        outputs: HashMap::new(),
        when: None,
        loop_until: None,
        loop_max: None,
        tools: None,
        prompt_file: None,
        model_override: None,
        timeout_seconds: None,
    }
}

fn test_workflow(step_count: usize) -> WorkflowConfig {
    let mut steps = Vec::with_capacity(step_count);
    for i in 0..step_count {
        let depends_on = if i > 0 {
            vec![format!("step_{}", i - 1)]
        } else {
            vec![]
        };
        steps.push(deterministic_step(&format!("step_{}", i), depends_on));
    }

    WorkflowConfig {
        name: "dag_benchmark_workflow".to_string(),
        version: "1.0".to_string(),
        description: Some("Benchmark workflow for DAG construction".to_string()),
        experimental: false,
        inputs: HashMap::new(),
        outputs: HashMap::new(),
        steps,
        evaluation: None,
        capabilities: None,
    }
}

// ============================================================================
// Workflow DAG Construction Benchmark
// ============================================================================

/// Benchmark target for measuring DAG construction performance.
///
/// This benchmark measures the time to build a Directed Acyclic Graph
/// from a workflow definition, including cycle detection.
pub struct WorkflowDagConstructionBenchmark {
    iterations: usize,
}

impl WorkflowDagConstructionBenchmark {
    pub fn new() -> Self {
        Self { iterations: 100 }
    }
}

impl Default for WorkflowDagConstructionBenchmark {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BenchTarget for WorkflowDagConstructionBenchmark {
    fn id(&self) -> &str {
        "workflow_dag_construction"
    }

    fn description(&self) -> &str {
        "Measures DAG construction and cycle detection performance"
    }

    async fn run(&self) -> BenchmarkResult {
        let workflow_small = test_workflow(10);
        let workflow_medium = test_workflow(50);
        let workflow_large = test_workflow(100);

        let start_small = Instant::now();
        for _ in 0..self.iterations {
            let _ = Dag::compile(&workflow_small);
        }
        let duration_small = start_small.elapsed();

        let start_medium = Instant::now();
        for _ in 0..self.iterations {
            let _ = Dag::compile(&workflow_medium);
        }
        let duration_medium = start_medium.elapsed();

        let start_large = Instant::now();
        for _ in 0..self.iterations {
            let _ = Dag::compile(&workflow_large);
        }
        let duration_large = start_large.elapsed();

        let total_duration = duration_small + duration_medium + duration_large;
        let ops_per_sec = (self.iterations * 3) as f64 / total_duration.as_secs_f64();

        BenchmarkResult::new(
            self.id(),
            json!({
                "duration_ms": total_duration.as_secs_f64() * 1000.0,
                "iterations": self.iterations * 3,
                "ops_per_sec": ops_per_sec,
                "small_workflow": {
                    "steps": 10,
                    "duration_ms": duration_small.as_secs_f64() * 1000.0,
                    "avg_ms": duration_small.as_secs_f64() * 1000.0 / self.iterations as f64
                },
                "medium_workflow": {
                    "steps": 50,
                    "duration_ms": duration_medium.as_secs_f64() * 1000.0,
                    "avg_ms": duration_medium.as_secs_f64() * 1000.0 / self.iterations as f64
                },
                "large_workflow": {
                    "steps": 100,
                    "duration_ms": duration_large.as_secs_f64() * 1000.0,
                    "avg_ms": duration_large.as_secs_f64() * 1000.0 / self.iterations as f64
                }
            }),
        )
    }
}

// ============================================================================
// Workflow Validation Benchmark
// ============================================================================

/// Benchmark target for measuring workflow schema validation performance.
pub struct WorkflowValidationBenchmark {
    iterations: usize,
}

impl WorkflowValidationBenchmark {
    pub fn new() -> Self {
        Self { iterations: 1000 }
    }

    fn create_valid_workflow() -> WorkflowConfig {
        let mut step1 = deterministic_step("step1", vec![]);
        step1.agent = "tier1_reviewer".to_string();
        step1.prompt_file = Some("Hello {{ inputs.name }}".to_string());

        let step2 = deterministic_step("step2", vec!["step1".to_string()]);

        WorkflowConfig {
            name: "validation_test".to_string(),
            version: "1.0".to_string(),
            description: Some("Test workflow for validation".to_string()),
            experimental: false,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            steps: vec![step1, step2],
            evaluation: None,
            capabilities: None,
        }
    }
}

impl Default for WorkflowValidationBenchmark {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BenchTarget for WorkflowValidationBenchmark {
    fn id(&self) -> &str {
        "workflow_validation"
    }

    fn description(&self) -> &str {
        "Measures workflow schema validation performance"
    }

    async fn run(&self) -> BenchmarkResult {
        let workflow = Self::create_valid_workflow();

        let start = Instant::now();
        let mut success_count = 0;

        for _ in 0..self.iterations {
            if workflow.validate().is_ok() {
                success_count += 1;
            }
        }

        let duration = start.elapsed();
        let ops_per_sec = self.iterations as f64 / duration.as_secs_f64();

        BenchmarkResult::new(
            self.id(),
            json!({
                "duration_ms": duration.as_secs_f64() * 1000.0,
                "iterations": self.iterations,
                "ops_per_sec": ops_per_sec,
                "success_rate": success_count as f64 / self.iterations as f64,
                "avg_validation_us": duration.as_micros() as f64 / self.iterations as f64
            }),
        )
    }
}

// ============================================================================
// Parallel Step Coordination Benchmark
// ============================================================================

/// Benchmark target for measuring parallel pipeline coordination overhead.
///
/// This measures the overhead of coordinating parallel task execution
/// using DashMap and Tokio synchronization primitives, as used by the
/// executor's bounded work-stealing scheduler.
pub struct ParallelStepCoordinationBenchmark {
    iterations: usize,
}

impl ParallelStepCoordinationBenchmark {
    pub fn new() -> Self {
        Self { iterations: 100 }
    }
}

impl Default for ParallelStepCoordinationBenchmark {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BenchTarget for ParallelStepCoordinationBenchmark {
    fn id(&self) -> &str {
        "parallel_step_coordination"
    }

    fn description(&self) -> &str {
        "Measures parallel pipeline coordination overhead using DashMap"
    }

    async fn run(&self) -> BenchmarkResult {
        use dashmap::DashMap;
        use std::sync::Arc;
        use tokio::sync::Notify;

        let step_count = 20;
        let total_ops = self.iterations * step_count;

        let start = Instant::now();

        for _ in 0..self.iterations {
            let status_map: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
            let notify = Arc::new(Notify::new());

            let mut handles = Vec::new();

            for i in 0..step_count {
                let map = status_map.clone();
                let n = notify.clone();

                handles.push(tokio::spawn(async move {
                    map.insert(format!("step_{}", i), "pending".to_string());
                    map.insert(format!("step_{}", i), "running".to_string());

                    tokio::task::yield_now().await;

                    map.insert(format!("step_{}", i), "completed".to_string());
                    n.notify_waiters();
                }));
            }

            for handle in handles {
                let _ = handle.await;
            }
        }

        let duration = start.elapsed();
        let ops_per_sec = total_ops as f64 / duration.as_secs_f64();

        BenchmarkResult::new(
            self.id(),
            json!({
                "duration_ms": duration.as_secs_f64() * 1000.0,
                "iterations": self.iterations,
                "ops_per_sec": ops_per_sec,
                "parallel_steps_per_iteration": step_count,
                "total_step_operations": total_ops,
                "avg_coordination_overhead_us": duration.as_micros() as f64 / self.iterations as f64
            }),
        )
    }
}

// ============================================================================
// Context Template Rendering Benchmark
// ============================================================================

/// Benchmark target for measuring Handlebars prompt-template rendering
/// performance, mirroring the step compiler's own rendering path.
pub struct ContextTemplateRenderingBenchmark {
    iterations: usize,
}

impl ContextTemplateRenderingBenchmark {
    pub fn new() -> Self {
        Self { iterations: 1000 }
    }
}

impl Default for ContextTemplateRenderingBenchmark {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BenchTarget for ContextTemplateRenderingBenchmark {
    fn id(&self) -> &str {
        "context_template_rendering"
    }

    fn description(&self) -> &str {
        "Measures Handlebars template rendering performance against run-state context"
    }

    async fn run(&self) -> BenchmarkResult {
        let mut inputs: HashMap<String, Value> = HashMap::new();
        inputs.insert("name".to_string(), json!("World"));
        inputs.insert("count".to_string(), json!(42));
        inputs.insert("items".to_string(), json!(["apple", "banana", "cherry"]));
        inputs.insert(
            "nested".to_string(),
            json!({ "key1": "value1", "key2": "value2" }),
        );

        let state = RunState::new(inputs);
        let context = state.as_root_view();

        let handlebars = handlebars::Handlebars::new();

        let templates = vec![
            ("simple", "Hello {{ inputs.name }}!"),
            ("multiple", "{{ inputs.name }} has {{ inputs.count }} items"),
            ("nested_access", "Key1 is {{ inputs.nested.key1 }}"),
        ];

        let start = Instant::now();
        let mut render_count = 0;

        for _ in 0..self.iterations {
            for (_, template) in &templates {
                if handlebars.render_template(template, &context).is_ok() {
                    render_count += 1;
                }
            }
        }

        let duration = start.elapsed();
        let total_renders = self.iterations * templates.len();
        let ops_per_sec = total_renders as f64 / duration.as_secs_f64();

        BenchmarkResult::new(
            self.id(),
            json!({
                "duration_ms": duration.as_secs_f64() * 1000.0,
                "iterations": self.iterations,
                "templates_tested": templates.len(),
                "total_renders": total_renders,
                "successful_renders": render_count,
                "ops_per_sec": ops_per_sec,
                "avg_render_us": duration.as_micros() as f64 / total_renders as f64
            }),
        )
    }
}

// ============================================================================
// Multi-Model Routing Benchmark
// ============================================================================

/// Benchmark target for measuring multi-model/provider routing performance.
///
/// This measures the overhead of the model registry's candidate-chain
/// resolution (override -> tier-env-override -> probed availability)
/// across every tier.
pub struct MultiModelRoutingBenchmark {
    iterations: usize,
}

impl MultiModelRoutingBenchmark {
    pub fn new() -> Self {
        Self { iterations: 2000 }
    }
}

impl Default for MultiModelRoutingBenchmark {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BenchTarget for MultiModelRoutingBenchmark {
    fn id(&self) -> &str {
        "multi_model_routing"
    }

    fn description(&self) -> &str {
        "Measures model registry candidate-chain resolution performance"
    }

    async fn run(&self) -> BenchmarkResult {
        let registry = ModelRegistry::default();
        let tiers = [Tier(1), Tier(2), Tier(3), Tier(4), Tier(5)];

        let start = Instant::now();
        let mut resolved = 0;
        let mut failed = 0;

        for _ in 0..self.iterations {
            for tier in tiers {
                match registry.resolve_candidates(tier, None) {
                    Ok(candidates) if !candidates.is_empty() => resolved += 1,
                    _ => failed += 1,
                }
            }
        }

        let duration = start.elapsed();
        let total_lookups = self.iterations * tiers.len();
        let ops_per_sec = total_lookups as f64 / duration.as_secs_f64();

        BenchmarkResult::new(
            self.id(),
            json!({
                "duration_ms": duration.as_secs_f64() * 1000.0,
                "iterations": self.iterations,
                "total_lookups": total_lookups,
                "ops_per_sec": ops_per_sec,
                "resolved": resolved,
                "failed": failed,
                "avg_lookup_us": duration.as_micros() as f64 / total_lookups as f64,
                "tiers_tested": tiers.len()
            }),
        )
    }
}

// ============================================================================
// Evaluation Scoring Benchmark
// ============================================================================

/// Benchmark target for measuring the evaluation pipeline's scoring
/// overhead: objective formulas, hard gates, and critical-floor grade
/// capping over a fixed rubric.
pub struct EvaluationScoringBenchmark {
    iterations: usize,
}

impl EvaluationScoringBenchmark {
    pub fn new() -> Self {
        Self { iterations: 500 }
    }

    fn rubric() -> EvaluationSpec {
        let mut weights = HashMap::new();
        weights.insert("correctness".to_string(), 0.6);
        weights.insert("efficiency".to_string(), 0.4);

        EvaluationSpec {
            rubric_id: Some("bench-rubric".to_string()),
            scoring_profile: None,
            weights,
            criteria: vec![
                CriterionSpec {
                    name: "correctness".to_string(),
                    definition: "output matches expected behavior".to_string(),
                    weight: Some(0.6),
                    critical_floor: Some(0.5),
                    scale: None,
                    evidence_required: false,
                    formula_id: Some("likert_1_5".to_string()),
                },
                CriterionSpec {
                    name: "efficiency".to_string(),
                    definition: "resource usage stays within budget".to_string(),
                    weight: Some(0.4),
                    critical_floor: None,
                    scale: None,
                    evidence_required: false,
                    formula_id: Some("likert_1_5".to_string()),
                },
            ],
        }
    }
}

impl Default for EvaluationScoringBenchmark {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BenchTarget for EvaluationScoringBenchmark {
    fn id(&self) -> &str {
        "evaluation_scoring"
    }

    fn description(&self) -> &str {
        "Measures evaluation pipeline scoring overhead (hard gates, grade capping)"
    }

    async fn run(&self) -> BenchmarkResult {
        let spec = Self::rubric();
        let mut state = RunState::new(HashMap::new());
        let mut final_step = llm_orchestrator_core::StepState::pending();
        final_step.status = StepStatus::Success;
        state.steps.insert("final".to_string(), final_step);

        let start = Instant::now();
        let mut passed = 0;

        for _ in 0..self.iterations {
            if let Ok(report) = evaluate_run(&spec, &state, &[], true, None, 0.8, Some(0.8), 70.0) {
                if report.passed {
                    passed += 1;
                }
            }
        }

        let duration = start.elapsed();
        let ops_per_sec = self.iterations as f64 / duration.as_secs_f64();

        BenchmarkResult::new(
            self.id(),
            json!({
                "duration_ms": duration.as_secs_f64() * 1000.0,
                "iterations": self.iterations,
                "ops_per_sec": ops_per_sec,
                "passed": passed,
                "pass_rate": passed as f64 / self.iterations as f64,
                "avg_scoring_us": duration.as_micros() as f64 / self.iterations as f64
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dag_construction_benchmark() {
        let benchmark = WorkflowDagConstructionBenchmark::new();
        let result = benchmark.run().await;

        assert_eq!(result.target_id, "workflow_dag_construction");
        assert!(result.duration_ms().is_some());
    }

    #[tokio::test]
    async fn test_validation_benchmark() {
        let benchmark = WorkflowValidationBenchmark::new();
        let result = benchmark.run().await;

        assert_eq!(result.target_id, "workflow_validation");
        assert!(result.ops_per_sec().is_some());
    }

    #[tokio::test]
    async fn test_parallel_coordination_benchmark() {
        let benchmark = ParallelStepCoordinationBenchmark::new();
        let result = benchmark.run().await;

        assert_eq!(result.target_id, "parallel_step_coordination");
        assert!(result.metrics.get("parallel_steps_per_iteration").is_some());
    }

    #[tokio::test]
    async fn test_template_rendering_benchmark() {
        let benchmark = ContextTemplateRenderingBenchmark::new();
        let result = benchmark.run().await;

        assert_eq!(result.target_id, "context_template_rendering");
        assert!(result.metrics.get("successful_renders").is_some());
    }

    #[tokio::test]
    async fn test_multi_model_routing_benchmark() {
        let benchmark = MultiModelRoutingBenchmark::new();
        let result = benchmark.run().await;

        assert_eq!(result.target_id, "multi_model_routing");
        assert!(result.metrics.get("resolved").is_some());
    }

    #[tokio::test]
    async fn test_evaluation_scoring_benchmark() {
        let benchmark = EvaluationScoringBenchmark::new();
        let result = benchmark.run().await;

        assert_eq!(result.target_id, "evaluation_scoring");
        assert!(result.metrics.get("pass_rate").is_some());
    }
}
