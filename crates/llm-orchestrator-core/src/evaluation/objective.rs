// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Objective-layer raw score computation (spec §4.10.1), ported from
//! `original_source/agentic-workflows-v2/agentic_v2/server/evaluation_scoring.py`'s
//! `_compute_criterion_score` and `_text_overlap_score`. Every formula
//! here returns a raw score on `[0, 100]`; `evaluate_run` divides by 100
//! before handing it to the criterion's normalization formula, mirroring
//! `score_workflow_result_impl`'s `normalize_score(raw_score / 100.0, ...)`.

use crate::context::{RunState, StepStatus};
use std::collections::HashSet;

fn clamp(value: f64) -> f64 {
    value.max(0.0).min(100.0)
}

/// Lowercased alphanumeric-or-underscore tokens longer than two
/// characters, matching `_tokenize`'s `[A-Za-z0-9_]+` regex plus its
/// `len(token) > 2` filter.
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| token.len() > 2)
        .map(|token| token.to_string())
        .collect()
}

/// Fraction of the expected text's tokens also present in the generated
/// text, scaled to `[0, 100]` (`_text_overlap_score`).
fn text_overlap_score(expected: &str, generated: &str) -> f64 {
    let expected_tokens = tokenize(expected);
    if expected_tokens.is_empty() {
        return 0.0;
    }
    let generated_tokens = tokenize(generated);
    let overlap = expected_tokens.intersection(&generated_tokens).count();
    (overlap as f64 / expected_tokens.len() as f64) * 100.0
}

/// Run-level aggregates the criterion formulas need, read off `RunState`
/// in place of `WorkflowResult`'s `success_rate`/`total_retries`/
/// `total_duration_ms` fields (which this engine doesn't carry on the
/// state object itself).
struct RunAggregates {
    success_rate: f64,
    total_steps: usize,
    failed_steps: usize,
    retries: u32,
    duration_ms: u64,
    is_success: bool,
    is_failed: bool,
}

fn aggregate(state: &RunState, run_succeeded: bool) -> RunAggregates {
    let total_steps = state.steps.len().max(1);
    let failed_steps = state
        .steps
        .values()
        .filter(|s| s.status == StepStatus::Failed)
        .count();
    // Every attempted model beyond the first one recorded for a step is a
    // failover retry (§4.4 step 4).
    let retries: u32 = state
        .steps
        .values()
        .map(|s| (s.metadata.attempted_models.len() as u32).saturating_sub(1))
        .sum();
    let duration_ms: u64 = state.steps.values().filter_map(|s| s.duration_ms).sum();

    RunAggregates {
        success_rate: if run_succeeded { 100.0 } else { 0.0 },
        total_steps,
        failed_steps,
        retries,
        duration_ms,
        is_success: run_succeeded,
        is_failed: !run_succeeded,
    }
}

/// Renders the run's resolved outputs (falling back to every step's
/// merged outputs when the workflow-level map is empty) as compact JSON,
/// standing in for `_output_text`'s `json.dumps(final_output)`.
fn output_text(state: &RunState) -> String {
    if !state.outputs.is_empty() {
        return serde_json::to_string(&state.outputs).unwrap_or_default();
    }
    let mut merged = serde_json::Map::new();
    for step in state.steps.values() {
        for (key, value) in &step.outputs {
            merged.insert(key.clone(), value.clone());
        }
    }
    serde_json::to_string(&merged).unwrap_or_default()
}

fn output_key_count(state: &RunState) -> usize {
    if !state.outputs.is_empty() {
        return state.outputs.len();
    }
    let mut keys = HashSet::new();
    for step in state.steps.values() {
        keys.extend(step.outputs.keys().cloned());
    }
    keys.len()
}

/// Computes one criterion's raw (0-100) objective score from the run
/// state, mirroring `_compute_criterion_score`'s four built-in formulas
/// plus its success-rate fallback for unrecognized criterion names.
pub fn compute_raw_score(
    criterion: &str,
    state: &RunState,
    expected_output: Option<&str>,
    run_succeeded: bool,
) -> f64 {
    let agg = aggregate(state, run_succeeded);
    let generated = output_text(state);

    match criterion {
        "correctness" => {
            let overlap = match expected_output {
                Some(expected) if !expected.is_empty() => text_overlap_score(expected, &generated),
                _ => agg.success_rate,
            };
            let mut blended = (agg.success_rate * 0.7) + (overlap * 0.3);
            if agg.is_failed {
                blended *= 0.75;
            }
            clamp(blended)
        }
        "code_quality" => {
            let failure_penalty = (agg.failed_steps as f64 / agg.total_steps as f64) * 45.0;
            let retry_penalty = (agg.retries as f64 * 4.0).min(20.0);
            let status_bonus = if agg.is_success { 8.0 } else { -12.0 };
            clamp(78.0 - failure_penalty - retry_penalty + status_bonus)
        }
        "efficiency" => {
            let seconds = agg.duration_ms as f64 / 1000.0;
            let duration_penalty = (seconds * 1.5).min(55.0);
            let retry_penalty = (agg.retries as f64 * 5.0).min(20.0);
            clamp(100.0 - duration_penalty - retry_penalty)
        }
        "documentation" => {
            if generated.is_empty() {
                return 20.0;
            }
            let chars = generated.len() as f64;
            let key_count = output_key_count(state) as f64;
            let richness = (chars / 120.0).min(45.0) + (key_count * 6.0).min(30.0);
            let mut base = 30.0 + richness;
            if agg.is_failed {
                base -= 15.0;
            }
            clamp(base)
        }
        _ => clamp(agg.success_rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{StepMetadata, StepState};
    use serde_json::Value;

    fn state_with_steps(statuses: &[StepStatus]) -> RunState {
        let mut state = RunState::default();
        for (i, status) in statuses.iter().enumerate() {
            let mut step = StepState::pending();
            step.status = *status;
            state.steps.insert(format!("step{}", i), step);
        }
        state
    }

    #[test]
    fn correctness_blends_success_rate_and_overlap() {
        let mut state = state_with_steps(&[StepStatus::Success]);
        state.outputs.insert("summary".to_string(), Value::String("the quick brown fox".to_string()));
        // Generated JSON text contains {summary, the, quick, brown, fox};
        // 4 of the 5 expected tokens (all but "extra") appear in it.
        let score = compute_raw_score("correctness", &state, Some("the quick brown fox extra"), true);
        // success_rate=100 * 0.7 = 70; overlap = 4/5 tokens * 100 = 80 * 0.3 = 24
        assert!((score - 94.0).abs() < 1e-9);
    }

    #[test]
    fn correctness_with_no_expected_output_falls_back_to_success_rate() {
        let state = state_with_steps(&[StepStatus::Success]);
        let score = compute_raw_score("correctness", &state, None, true);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn correctness_penalizes_failed_runs() {
        let state = state_with_steps(&[StepStatus::Failed]);
        let score = compute_raw_score("correctness", &state, None, false);
        // success_rate=0, overlap falls back to success_rate=0, blended=0, *0.75 still 0
        assert_eq!(score, 0.0);
    }

    #[test]
    fn code_quality_penalizes_failures_and_retries() {
        let mut state = state_with_steps(&[StepStatus::Success, StepStatus::Failed]);
        let mut retried = state.steps.get("step0").unwrap().clone();
        retried.metadata = StepMetadata {
            attempted_models: vec![
                crate::context::ModelAttempt { model: "a".into(), error: Some("x".into()), retryable: true },
                crate::context::ModelAttempt { model: "b".into(), error: None, retryable: true },
            ],
            ..Default::default()
        };
        state.steps.insert("step0".to_string(), retried);

        let score = compute_raw_score("code_quality", &state, None, false);
        // failure_penalty = (1/2)*45 = 22.5; retry_penalty = min(1*4,20)=4; status_bonus=-12
        // 78 - 22.5 - 4 - 12 = 39.5
        assert!((score - 39.5).abs() < 1e-9);
    }

    #[test]
    fn efficiency_penalizes_long_duration() {
        let mut state = state_with_steps(&[StepStatus::Success]);
        let mut step = state.steps.get("step0").unwrap().clone();
        step.duration_ms = Some(10_000);
        state.steps.insert("step0".to_string(), step);

        let score = compute_raw_score("efficiency", &state, None, true);
        // seconds=10, duration_penalty=min(15,55)=15, retry_penalty=0
        assert!((score - 85.0).abs() < 1e-9);
    }

    #[test]
    fn documentation_scores_empty_output_low() {
        let state = RunState::default();
        assert_eq!(compute_raw_score("documentation", &state, None, true), 20.0);
    }

    #[test]
    fn documentation_rewards_richer_output() {
        let mut state = state_with_steps(&[StepStatus::Success]);
        state.outputs.insert("summary".to_string(), Value::String("a".repeat(200)));
        state.outputs.insert("notes".to_string(), Value::String("more detail".to_string()));
        let score = compute_raw_score("documentation", &state, None, true);
        assert!(score > 30.0);
    }

    #[test]
    fn unknown_criterion_falls_back_to_success_rate() {
        let state = state_with_steps(&[StepStatus::Success]);
        assert_eq!(compute_raw_score("custom_thing", &state, None, true), 100.0);
    }
}
