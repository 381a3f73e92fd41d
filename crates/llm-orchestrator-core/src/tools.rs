// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool registry (spec §4.3).
//!
//! Ported from `original_source/agentic-workflows-v2/src/agentic_v2/tools/{base,registry}.py`:
//! `BaseTool`/`ToolSchema`/`ToolResult` become `Tool`/`ToolSchema`/`ToolResult`,
//! and `ToolRegistry`'s manual-registration + tier-filtered lookup is kept
//! as-is (auto-discovery via `pkgutil` has no Rust analogue; tools are
//! registered explicitly at startup instead).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Describes a tool for agent/step-compiler consumption (JSON-schema
/// style parameter description, not a full JSON Schema document).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub returns: String,
    pub tier: u8,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Standardized result from tool execution.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            execution_time_ms: 0.0,
            tool_name: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            execution_time_ms: 0.0,
            tool_name: String::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A tool callable by a step. Tier 0: no LLM needed (file ops,
/// transforms, deterministic lookups) — the only tier a `tier0_*` step
/// may use (§4.4). Tiers 1-3 describe an expected model capability for
/// tool-assisted steps, informational only; the registry does not
/// enforce it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    fn returns(&self) -> &str {
        "ToolResult with success status and data"
    }

    fn tier(&self) -> u8 {
        0
    }

    fn examples(&self) -> Vec<String> {
        Vec::new()
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            returns: self.returns().to_string(),
            tier: self.tier(),
            examples: self.examples(),
        }
    }

    /// Executes the tool. Implementations should return `Err` rather than
    /// panic; the `call` wrapper maps it onto `ToolResult::err`.
    async fn execute(&self, params: Value) -> Result<ToolResult, String>;
}

/// Timed wrapper mirroring `BaseTool.__call__`: records execution time
/// and stamps the tool name onto the result regardless of outcome.
pub async fn call(tool: &dyn Tool, params: Value) -> ToolResult {
    let start = Instant::now();
    let mut result = match tool.execute(params).await {
        Ok(result) => result,
        Err(error) => ToolResult::err(error),
    };
    result.execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    result.tool_name = tool.name().to_string();
    result
}

/// Registry for manually-registered tools, with tier-filtered lookup
/// (§4.3).
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Lists tools allowed for a tier: cumulative, not exact-match — a
    /// higher tier sees every tool declared at its tier or below (§4.3).
    pub fn list(&self, tier: Option<u8>) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<_> = self.tools.values().cloned().collect();
        if let Some(tier) = tier {
            tools.retain(|t| t.tier() <= tier);
        }
        tools
    }

    pub fn schemas(&self, tier: Option<u8>) -> Vec<ToolSchema> {
        self.list(tier).iter().map(|t| t.schema()).collect()
    }

    /// Returns only the subset of registered tools named in `names`, in
    /// the order requested (§4.4: a step's `tools:` list is filtered
    /// against the full registry).
    pub fn subset(&self, names: &[String]) -> Vec<Arc<dyn Tool>> {
        names.iter().filter_map(|name| self.get(name)).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}
