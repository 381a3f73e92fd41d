// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Three-layer scoring composition, hard gates, and critical floors
//! (spec §4.10), ported from
//! `original_source/agentic-workflows-v2/agentic_v2/server/evaluation_scoring.py`.
//!
//! A run's final grade blends three independent layers: the objective
//! layer (weighted, normalized criterion scores), the optional judge
//! layer (an LLM's holistic verdict), and an advisory layer (similarity
//! and efficiency heuristics that inform but never gate the grade).
//! Two criteria carry implicit critical floors regardless of the
//! rubric's own `critical_floor` declarations: `correctness` at 0.70
//! and `safety`/`validation`/`code_quality` at 0.80.

use super::normalization::clamp01;
use crate::context::{RunState, StepStatus};
use std::collections::HashMap;

/// One criterion's contribution to the objective layer.
#[derive(Debug, Clone)]
pub struct CriterionScore {
    pub criterion: String,
    pub normalized_score: f64,
    pub weight: f64,
    pub critical_floor: Option<f64>,
}

/// Pass/fail flags that must all hold before a run can be graded above
/// F, independent of its numeric score.
#[derive(Debug, Clone, Copy)]
pub struct HardGates {
    pub required_outputs_present: bool,
    pub overall_status_success: bool,
    pub no_critical_step_failures: bool,
}

impl HardGates {
    pub fn all_passed(&self) -> bool {
        self.required_outputs_present && self.overall_status_success && self.no_critical_step_failures
    }

    pub fn failures(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.required_outputs_present {
            failed.push("required_outputs_present");
        }
        if !self.overall_status_success {
            failed.push("overall_status_success");
        }
        if !self.no_critical_step_failures {
            failed.push("no_critical_step_failures");
        }
        failed
    }

    /// Evaluates hard gates against a completed run: every declared
    /// required output must be present and non-null, the overall run
    /// must have succeeded, and no step may be in the `Failed` state
    /// (a cascaded `Skipped` step does not itself violate this gate —
    /// only a genuine execution failure does).
    pub fn evaluate(state: &RunState, required_outputs: &[String], run_succeeded: bool) -> Self {
        let required_outputs_present = required_outputs.iter().all(|name| {
            state
                .outputs
                .get(name)
                .map(|v| !v.is_null())
                .unwrap_or(false)
        });
        let no_critical_step_failures = state
            .steps
            .values()
            .all(|step| step.status != StepStatus::Failed);

        Self {
            required_outputs_present,
            overall_status_success: run_succeeded,
            no_critical_step_failures,
        }
    }
}

/// A criterion whose normalized score fell below its floor.
#[derive(Debug, Clone)]
pub struct FloorViolation {
    pub criterion: String,
    pub floor: f64,
    pub normalized_score: f64,
}

/// Implicit floors applied regardless of the rubric's own declarations
/// (§4.10): correctness must clear 0.70; whichever of
/// safety/validation/code_quality is present must clear 0.80.
fn implicit_floor_violations(scores: &HashMap<String, f64>) -> Vec<FloorViolation> {
    let mut violations = Vec::new();

    for key in ["correctness", "correctness_rubric"] {
        if let Some(&value) = scores.get(key) {
            if value < 0.70 {
                violations.push(FloorViolation {
                    criterion: key.to_string(),
                    floor: 0.70,
                    normalized_score: value,
                });
            }
            break;
        }
    }

    for key in ["safety_validation", "validation", "safety", "code_quality"] {
        if let Some(&value) = scores.get(key) {
            if value < 0.80 {
                violations.push(FloorViolation {
                    criterion: key.to_string(),
                    floor: 0.80,
                    normalized_score: value,
                });
            }
            break;
        }
    }

    violations
}

/// Letter grade on a 0-100 scale (§4.10's `_grade`).
pub fn grade(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 80.0 {
        "B"
    } else if score >= 70.0 {
        "C"
    } else if score >= 60.0 {
        "D"
    } else {
        "F"
    }
}

/// The three independently-computed layer scores, each on `[0, 1]`.
/// `judge` is `None` when no judge was configured for the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreLayers {
    pub objective: f64,
    pub judge: Option<f64>,
    pub advisory: f64,
}

/// Blends the three layers into a single `[0, 1]` hybrid score, using
/// default component weights (objective 0.60, judge 0.25, advisory
/// 0.15) renormalized over whichever layers are actually present —
/// ported from `_compose_hybrid_score`.
pub fn compose_hybrid_score(layers: ScoreLayers) -> (f64, HashMap<&'static str, f64>) {
    let mut active: Vec<(&'static str, f64, f64)> = vec![
        ("objective", layers.objective, 0.60),
        ("advisory", layers.advisory, 0.15),
    ];
    if let Some(judge) = layers.judge {
        active.push(("judge", judge, 0.25));
    }

    let weight_sum: f64 = active.iter().map(|(_, _, w)| w).sum();
    if weight_sum <= 0.0 {
        let mut weights = HashMap::new();
        weights.insert("objective", 1.0);
        return (layers.objective, weights);
    }

    let weighted: f64 = active.iter().map(|(_, v, w)| v * w).sum();
    let weights = active.into_iter().map(|(name, _, w)| (name, w)).collect();
    (clamp01(weighted / weight_sum), weights)
}

/// Final, composed verdict for a scored run.
#[derive(Debug, Clone)]
pub struct ScoreReport {
    pub weighted_score: f64,
    pub grade: String,
    pub grade_capped: bool,
    pub passed: bool,
    pub hard_gates: HardGates,
    pub floor_violations: Vec<FloorViolation>,
}

/// Composes criterion scores, hard gates, and layer blending into a
/// final grade and pass/fail verdict (§4.10's `score_workflow_result_impl`
/// core, minus the request/response plumbing that has no orchestration
/// counterpart). Critical floor violations cap an otherwise-passing
/// grade at D; a failed hard gate forces F outright.
pub fn score_run(
    criteria: &[CriterionScore],
    layers: ScoreLayers,
    hard_gates: HardGates,
    pass_threshold: f64,
) -> ScoreReport {
    let total_weight: f64 = criteria.iter().map(|c| c.weight).sum();
    let total_weight = if total_weight > 0.0 { total_weight } else { 1.0 };

    let mut normalized_scores = HashMap::new();
    for c in criteria {
        normalized_scores.insert(c.criterion.clone(), c.normalized_score);
    }

    let objective_weighted: f64 = criteria
        .iter()
        .map(|c| c.normalized_score * c.weight)
        .sum::<f64>()
        / total_weight;

    let layers = ScoreLayers {
        objective: objective_weighted,
        ..layers
    };
    let (hybrid, _active_weights) = compose_hybrid_score(layers);
    let weighted_score = hybrid * 100.0;

    let mut floor_violations = implicit_floor_violations(&normalized_scores);
    let declared_seen: std::collections::HashSet<String> =
        floor_violations.iter().map(|v| v.criterion.clone()).collect();
    for c in criteria {
        if declared_seen.contains(&c.criterion) {
            continue;
        }
        if let Some(floor) = c.critical_floor {
            if c.normalized_score < floor {
                floor_violations.push(FloorViolation {
                    criterion: c.criterion.clone(),
                    floor,
                    normalized_score: c.normalized_score,
                });
            }
        }
    }

    let mut computed_grade = grade(weighted_score).to_string();
    let no_floor_violations = floor_violations.is_empty();
    let mut grade_capped = false;

    if !no_floor_violations && matches!(computed_grade.as_str(), "A" | "B" | "C") {
        computed_grade = "D".to_string();
        grade_capped = true;
    }

    if !hard_gates.all_passed() {
        computed_grade = "F".to_string();
        grade_capped = false;
    }

    let passed = weighted_score >= pass_threshold && no_floor_violations && hard_gates.all_passed();

    ScoreReport {
        weighted_score,
        grade: computed_grade,
        grade_capped,
        passed,
        hard_gates,
        floor_violations,
    }
}
