// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Markdown report generation for benchmark results.

use super::result::BenchmarkResult;

/// Renders a human-readable markdown report from a set of benchmark
/// results: one table row per target, with duration/throughput pulled
/// out of each result's free-form `metrics` object when present.
pub fn generate_markdown_report(results: &[BenchmarkResult]) -> String {
    let mut report = String::new();
    report.push_str("# Benchmark Results\n\n");

    if results.is_empty() {
        report.push_str("No benchmark results recorded.\n");
        return report;
    }

    let generated_at = results
        .iter()
        .map(|r| r.timestamp)
        .max()
        .expect("non-empty results");
    report.push_str(&format!("Generated: {}\n\n", generated_at.to_rfc3339()));

    report.push_str("| Target | Duration (ms) | Iterations | Ops/sec |\n");
    report.push_str("|---|---|---|---|\n");

    for result in results {
        let duration = result
            .duration_ms()
            .map(|d| format!("{:.3}", d))
            .unwrap_or_else(|| "-".to_string());
        let iterations = result
            .iterations()
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string());
        let ops_per_sec = result
            .ops_per_sec()
            .map(|o| format!("{:.1}", o))
            .unwrap_or_else(|| "-".to_string());

        report.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            result.target_id, duration, iterations, ops_per_sec
        ));
    }

    report.push_str("\n## Raw Metrics\n\n");
    for result in results {
        report.push_str(&format!("### {}\n\n", result.target_id));
        report.push_str("```json\n");
        report.push_str(&serde_json::to_string_pretty(&result.metrics).unwrap_or_default());
        report.push_str("\n```\n\n");
    }

    report
}
