// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Normalization formula registry (spec §4.10), ported verbatim from
//! `original_source/agentic-workflows-v2/agentic_v2/evaluation/normalization.py`.
//! Every transform maps a raw criterion score onto the canonical `[0, 1]`
//! normalized range; `adjust_for_sample_size` then pulls a
//! low-sample-count normalized score toward a neutral prior.

use crate::error::{OrchestratorError, Result};

/// Clamps to the canonical normalized range.
pub fn clamp01(value: f64) -> f64 {
    value.max(0.0).min(1.0)
}

/// Parameters a formula may need beyond the raw score. `lower_is_better`
/// needs `slo_good`/`slo_bad`; `pairwise` needs `wins`/`losses`/`ties`.
#[derive(Debug, Clone, Default)]
pub struct FormulaParams {
    pub slo_good: Option<f64>,
    pub slo_bad: Option<f64>,
    pub wins: Option<f64>,
    pub losses: Option<f64>,
    pub ties: Option<f64>,
}

/// A raw score: either a single number, or a wins/losses/ties triple
/// for `pairwise`.
#[derive(Debug, Clone)]
pub enum RawScore {
    Number(f64),
    Pairwise { wins: f64, losses: f64, ties: f64 },
}

fn binary(raw: f64) -> Result<f64> {
    if raw == 0.0 || raw == 1.0 {
        Ok(raw)
    } else {
        Err(OrchestratorError::validation(
            "binary normalization expects raw value 0 or 1",
        ))
    }
}

fn likert_1_5(raw: f64) -> f64 {
    clamp01((raw - 1.0) / 4.0)
}

fn likert_neg2_2(raw: f64) -> f64 {
    clamp01((raw + 2.0) / 4.0)
}

fn lower_is_better(raw: f64, params: &FormulaParams) -> Result<f64> {
    let (Some(slo_good), Some(slo_bad)) = (params.slo_good, params.slo_bad) else {
        return Err(OrchestratorError::validation(
            "lower_is_better requires slo_good and slo_bad",
        ));
    };
    let denominator = slo_bad - slo_good;
    if denominator == 0.0 {
        return Err(OrchestratorError::validation(
            "lower_is_better requires slo_bad != slo_good",
        ));
    }
    Ok(clamp01((slo_bad - raw) / denominator))
}

fn zero_one(raw: f64) -> f64 {
    clamp01(raw)
}

fn pairwise(wins: f64, losses: f64, ties: f64) -> f64 {
    let total = wins + losses + ties;
    if total <= 0.0 {
        return 0.0;
    }
    clamp01((wins + 0.5 * ties) / total)
}

/// Registered normalization formula identifiers (§4.10): `binary`,
/// `likert_1_5`, `likert_neg2_2`, `lower_is_better`, `zero_one`,
/// `pairwise`.
pub fn is_registered_formula(formula_id: &str) -> bool {
    matches!(
        formula_id,
        "binary" | "likert_1_5" | "likert_neg2_2" | "lower_is_better" | "zero_one" | "pairwise"
    )
}

pub fn list_formula_ids() -> Vec<&'static str> {
    let mut ids = vec!["binary", "likert_1_5", "likert_neg2_2", "lower_is_better", "pairwise", "zero_one"];
    ids.sort_unstable();
    ids
}

/// Normalizes a raw criterion score using a registered formula.
pub fn normalize_score(raw: &RawScore, formula_id: &str, params: &FormulaParams) -> Result<f64> {
    match (formula_id, raw) {
        ("binary", RawScore::Number(n)) => binary(*n),
        ("likert_1_5", RawScore::Number(n)) => Ok(likert_1_5(*n)),
        ("likert_neg2_2", RawScore::Number(n)) => Ok(likert_neg2_2(*n)),
        ("lower_is_better", RawScore::Number(n)) => lower_is_better(*n, params),
        ("zero_one", RawScore::Number(n)) => Ok(zero_one(*n)),
        ("pairwise", RawScore::Pairwise { wins, losses, ties }) => Ok(pairwise(*wins, *losses, *ties)),
        ("pairwise", RawScore::Number(n)) => Ok(clamp01(*n)),
        (unknown, _) => Err(OrchestratorError::validation(format!(
            "unknown normalization formula '{}'. Available: {}",
            unknown,
            list_formula_ids().join(", ")
        ))),
    }
}

/// Reliability adjustment for small sample counts: pulls a normalized
/// score toward `prior` in proportion to how few samples `n` support
/// it, converging to `norm` as `n` grows relative to `k` (§4.10's
/// canonical formula, `k=20.0`, `prior=0.5` by default).
pub fn adjust_for_sample_size(norm: f64, n: u64, prior: f64, k: f64) -> f64 {
    let numerator = (n as f64) * norm + k * prior;
    let denominator = (n as f64) + k;
    if denominator <= 0.0 {
        return clamp01(norm);
    }
    clamp01(numerator / denominator)
}

/// Convenience wrapper for the default prior/k used throughout the
/// scoring pipeline.
pub fn adjust_for_sample_size_default(norm: f64, n: u64) -> f64 {
    adjust_for_sample_size(norm, n, 0.5, 20.0)
}
