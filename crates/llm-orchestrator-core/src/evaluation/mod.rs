// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Evaluation pipeline (spec §4.10): normalizes raw criterion scores,
//! validates and de-biases LLM-judge output, and composes the three
//! score layers into a final grade with hard gates and critical floors.
//!
//! Grounded on
//! `original_source/agentic-workflows-v2/agentic_v2/evaluation/normalization.py`,
//! `.../server/judge.py`, and `.../server/evaluation_scoring.py`.

pub mod judge;
pub mod normalization;
pub mod objective;
pub mod scoring;

use crate::context::RunState;
use crate::error::{OrchestratorError, Result};
use crate::workflow::{CriterionSpec, EvaluationSpec};
use normalization::{normalize_score, FormulaParams, RawScore};
use scoring::{CriterionScore, HardGates, ScoreLayers, ScoreReport};

/// Computes a criterion's raw objective score from the run state
/// (`objective::compute_raw_score`, on `[0, 100]`) and normalizes it
/// through the criterion's declared formula (defaulting to `zero_one`
/// when unspecified, matching `_resolve_rubric`'s fallback). The raw
/// score is divided by 100 first, mirroring
/// `score_workflow_result_impl`'s unconditional `raw_score / 100.0`
/// before calling into the formula registry.
fn resolve_criterion(
    spec: &CriterionSpec,
    state: &RunState,
    expected_output: Option<&str>,
    run_succeeded: bool,
) -> Result<f64> {
    let raw = objective::compute_raw_score(&spec.name, state, expected_output, run_succeeded);
    let formula_id = spec.formula_id.as_deref().unwrap_or("zero_one");
    normalize_score(&RawScore::Number(raw / 100.0), formula_id, &FormulaParams::default())
}

/// Evaluates a completed run against its workflow's declared rubric:
/// computes every criterion's objective raw score straight from the run
/// state (§4.10.1's built-in `correctness`/`code_quality`/`efficiency`/
/// `documentation` formulas, `objective::compute_raw_score`), normalizes
/// it, runs hard gates against the final run state, and composes a
/// final `ScoreReport`.
///
/// `expected_output` is the dataset sample's expected text (if any), fed
/// into the `correctness` formula's token-overlap term. `advisory_score`
/// is a precomputed `[0, 1]` heuristic layer (text similarity /
/// efficiency); `judge_score` is the optional LLM-judge layer's
/// normalized verdict.
pub fn evaluate_run(
    spec: &EvaluationSpec,
    state: &RunState,
    required_outputs: &[String],
    run_succeeded: bool,
    expected_output: Option<&str>,
    advisory_score: f64,
    judge_score: Option<f64>,
    pass_threshold: f64,
) -> Result<ScoreReport> {
    if spec.criteria.is_empty() {
        return Err(OrchestratorError::validation(
            "evaluation spec has no criteria to score",
        ));
    }

    let mut criteria = Vec::with_capacity(spec.criteria.len());
    for criterion_spec in &spec.criteria {
        let normalized = resolve_criterion(criterion_spec, state, expected_output, run_succeeded)?;
        let weight = criterion_spec
            .weight
            .or_else(|| spec.weights.get(&criterion_spec.name).copied())
            .unwrap_or(0.0);
        criteria.push(CriterionScore {
            criterion: criterion_spec.name.clone(),
            normalized_score: normalized,
            weight,
            critical_floor: criterion_spec.critical_floor,
        });
    }

    let hard_gates = HardGates::evaluate(state, required_outputs, run_succeeded);
    let layers = ScoreLayers {
        objective: 0.0, // recomputed from `criteria` inside `score_run`
        judge: judge_score,
        advisory: advisory_score,
    };

    Ok(scoring::score_run(&criteria, layers, hard_gates, pass_threshold))
}
