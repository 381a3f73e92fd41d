// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM-judge structured output handling (spec §4.10), ported from
//! `original_source/agentic-workflows-v2/agentic_v2/server/judge.py`:
//! extracting a JSON object from a judge's free-form response,
//! validating it against the expected criterion set, deterministically
//! shuffling criterion presentation order to reduce position bias, and
//! checking swapped-order consistency to catch judges that just agree
//! with whichever answer came first.

use crate::error::{OrchestratorError, Result};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Extracts the first JSON object from a judge's raw text response:
/// strips whitespace, parses directly if it starts with `{`, else
/// searches for a `{...}` span with `regex`'s DOTALL-equivalent mode
/// (ported from `_extract_first_json_object`).
pub fn extract_first_json_object(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Ok(value);
        }
    }

    let pattern = Regex::new(r"(?s)\{.*\}").expect("static regex is valid");
    let candidate = pattern
        .find(trimmed)
        .ok_or_else(|| OrchestratorError::other("judge response contains no JSON object"))?;

    serde_json::from_str(candidate.as_str())
        .map_err(|e| OrchestratorError::other(format!("judge JSON object failed to parse: {}", e)))
}

/// One criterion entry in a judge's structured output.
#[derive(Debug, Clone)]
pub struct JudgedCriterion {
    pub name: String,
    pub score: f64,
    pub evidence: String,
}

/// Validates a judge's parsed payload: `criteria` must be a non-empty
/// array, each entry must carry a non-empty string `name`, a numeric
/// `score`, and an `evidence` string — ported from
/// `validate_judge_structured_output`.
pub fn validate_judge_structured_output(
    payload: &Value,
    expected_criteria: &[String],
) -> Result<Vec<JudgedCriterion>> {
    let criteria = payload
        .get("criteria")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OrchestratorError::validation("judge payload missing non-empty 'criteria' array"))?;

    let mut judged = Vec::with_capacity(criteria.len());
    for entry in criteria {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| OrchestratorError::validation("judge criterion missing non-empty 'name'"))?;
        let score = entry
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| OrchestratorError::validation(format!("judge criterion '{}' missing numeric 'score'", name)))?;
        let evidence = entry
            .get("evidence")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        judged.push(JudgedCriterion {
            name: name.to_string(),
            score,
            evidence,
        });
    }

    if !expected_criteria.is_empty() {
        let seen: std::collections::HashSet<&str> = judged.iter().map(|j| j.name.as_str()).collect();
        let missing: Vec<&str> = expected_criteria
            .iter()
            .map(String::as_str)
            .filter(|name| !seen.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "judge payload missing criteria: {}",
                missing.join(", ")
            )));
        }
    }

    Ok(judged)
}

/// Deterministic seed derived from the ordered parts, used to shuffle
/// criterion presentation order without a process-level RNG — ported
/// from `_stable_seed`: sha256 of the `||`-joined parts, first 8 hex
/// characters read as an integer.
pub fn stable_seed(parts: &[&str]) -> u32 {
    let joined = parts.join("||");
    let digest = Sha256::digest(joined.as_bytes());
    let hex = format!("{:x}", digest);
    u32::from_str_radix(&hex[..8], 16).expect("hex digest prefix is always valid")
}

/// Deterministically permutes `items` using `stable_seed(parts)` as a
/// Fisher-Yates source, so the same `parts` always yield the same
/// order (reproducible across re-runs and across swapped-order checks).
pub fn stable_shuffle<T>(items: &mut [T], parts: &[&str]) {
    let mut state = stable_seed(parts) as u64;
    let len = items.len();
    for i in (1..len).rev() {
        // xorshift64: cheap, deterministic, and good enough for shuffling
        // a handful of criteria into a stable but non-identity order.
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

/// Maximum allowed score delta between a judge's original-order and
/// swapped-order verdicts before the comparison is flagged inconsistent.
pub const MAX_SWAP_DELTA: f64 = 1.0;

/// Compares a judge's score for the same criterion under original and
/// swapped candidate order; `true` means the judge is self-consistent
/// (ported from `check_swapped_order_consistency`).
pub fn check_swapped_order_consistency(original_score: f64, swapped_score: f64) -> bool {
    (original_score - swapped_score).abs() <= MAX_SWAP_DELTA
}

/// One labeled fixture: a criterion's judge-assigned score against the
/// human rater's score for the same candidate output.
#[derive(Debug, Clone)]
pub struct CalibrationFixture {
    pub criterion: String,
    pub judged_score: f64,
    pub human_score: f64,
}

/// Judge drift against a human-labeled fixture set, ported from
/// `evaluate_calibration_set`: mean absolute error across every labeled
/// criterion, with a pass/fail verdict against `tolerance`.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub samples: usize,
    pub mae: f64,
    pub within_tolerance: bool,
    pub tolerance: f64,
}

/// Computes judge calibration drift. `fixtures` is expected to already
/// pair each fixture's judge-assigned score with its human label — the
/// live judge call that produces `judged_score` is the caller's
/// responsibility (§4.10's judge layer), keeping this a pure function
/// over already-collected scores.
pub fn calibrate(fixtures: &[CalibrationFixture], tolerance: f64) -> CalibrationReport {
    if fixtures.is_empty() {
        return CalibrationReport {
            samples: 0,
            mae: 0.0,
            within_tolerance: true,
            tolerance,
        };
    }

    let total: f64 = fixtures
        .iter()
        .map(|f| (f.judged_score - f.human_score).abs())
        .sum();
    let mae = ((total / fixtures.len() as f64) * 10_000.0).round() / 10_000.0;

    CalibrationReport {
        samples: fixtures.len(),
        mae,
        within_tolerance: mae <= tolerance,
        tolerance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_direct_json_object() {
        let value = extract_first_json_object(r#"{"criteria": []}"#).unwrap();
        assert!(value.get("criteria").is_some());
    }

    #[test]
    fn extracts_embedded_json_object() {
        let text = "The judge reasons as follows...\n{\"criteria\": [{\"name\": \"correctness\", \"score\": 4, \"evidence\": \"ok\"}]}\nend of response";
        let value = extract_first_json_object(text).unwrap();
        assert_eq!(value["criteria"][0]["name"], "correctness");
    }

    #[test]
    fn rejects_response_with_no_json() {
        assert!(extract_first_json_object("no json here").is_err());
    }

    #[test]
    fn validates_well_formed_payload() {
        let payload = json!({
            "criteria": [
                {"name": "correctness", "score": 4, "evidence": "matches spec"},
                {"name": "clarity", "score": 5, "evidence": "well organized"}
            ]
        });
        let expected = vec!["correctness".to_string(), "clarity".to_string()];
        let judged = validate_judge_structured_output(&payload, &expected).unwrap();
        assert_eq!(judged.len(), 2);
        assert_eq!(judged[0].score, 4.0);
    }

    #[test]
    fn rejects_payload_missing_expected_criterion() {
        let payload = json!({
            "criteria": [{"name": "correctness", "score": 4, "evidence": "ok"}]
        });
        let expected = vec!["correctness".to_string(), "safety".to_string()];
        assert!(validate_judge_structured_output(&payload, &expected).is_err());
    }

    #[test]
    fn rejects_empty_criteria_array() {
        let payload = json!({"criteria": []});
        assert!(validate_judge_structured_output(&payload, &[]).is_err());
    }

    #[test]
    fn stable_seed_is_deterministic() {
        let a = stable_seed(&["run-1", "candidate-a", "candidate-b"]);
        let b = stable_seed(&["run-1", "candidate-a", "candidate-b"]);
        assert_eq!(a, b);
    }

    #[test]
    fn stable_seed_differs_for_different_parts() {
        let a = stable_seed(&["run-1", "candidate-a", "candidate-b"]);
        let b = stable_seed(&["run-2", "candidate-a", "candidate-b"]);
        assert_ne!(a, b);
    }

    #[test]
    fn stable_shuffle_is_reproducible() {
        let mut first = vec!["correctness", "clarity", "safety", "efficiency"];
        let mut second = first.clone();
        stable_shuffle(&mut first, &["run-1"]);
        stable_shuffle(&mut second, &["run-1"]);
        assert_eq!(first, second);
    }

    #[test]
    fn swapped_order_consistency_within_tolerance() {
        assert!(check_swapped_order_consistency(4.0, 3.2));
        assert!(!check_swapped_order_consistency(4.0, 2.0));
    }

    #[test]
    fn calibrate_computes_mean_absolute_error() {
        let fixtures = vec![
            CalibrationFixture { criterion: "correctness".into(), judged_score: 4.0, human_score: 4.0 },
            CalibrationFixture { criterion: "correctness".into(), judged_score: 3.0, human_score: 4.0 },
        ];
        let report = calibrate(&fixtures, 0.5);
        assert_eq!(report.samples, 2);
        assert_eq!(report.mae, 0.5);
        assert!(report.within_tolerance);
    }

    #[test]
    fn calibrate_flags_drift_outside_tolerance() {
        let fixtures = vec![CalibrationFixture {
            criterion: "safety".into(),
            judged_score: 5.0,
            human_score: 2.0,
        }];
        let report = calibrate(&fixtures, 0.5);
        assert!(!report.within_tolerance);
    }

    #[test]
    fn calibrate_empty_fixtures_trivially_passes() {
        let report = calibrate(&[], 0.5);
        assert_eq!(report.samples, 0);
        assert!(report.within_tolerance);
    }
}
