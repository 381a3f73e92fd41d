// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step compiler (spec §4.4).
//!
//! Tier-0 steps resolve to a deterministic tool lookup with a no-op
//! default when the tool is unregistered. Tier-1..5 steps iterate model
//! candidates from the registry (§4.2), rendering `prompt_file` through
//! `handlebars` against the run's root view, and parsing the model's
//! text response as JSON with the three-stage fallback ported from
//! `original_source/agentic-workflows-v2/agentic_v2/langchain/graph.py::_parse_json_dict_from_text`:
//! whole-string parse, then fenced ```json code block, then the
//! substring between the first `{` and the last `}`.

use crate::context::ModelAttempt;
use crate::error::{OrchestratorError, Result};
use crate::memory::ConversationCache;
use crate::models::{classify_error, ErrorClass, ModelRegistry, Tier};
use crate::providers::{CompletionRequest, LLMProvider, ProviderError};
use crate::tools::{self, ToolRegistry};
use crate::workflow::StepConfig;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Extracts a JSON object from free-form model text, trying progressively
/// looser strategies. Returns `None` if nothing parses.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let raw = text.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    if let Ok(fence) = Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```") {
        for captures in fence.captures_iter(raw) {
            if let Some(candidate) = captures.get(1) {
                if let Ok(value) = serde_json::from_str::<Value>(candidate.as_str()) {
                    if value.is_object() {
                        return Some(value);
                    }
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&raw[start..=end]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// The outcome of running a single step to completion (one candidate
/// attempt chain for LLM steps, a single tool call for tier-0 steps).
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub raw_output: Value,
    pub model_used: Option<String>,
    pub tokens_used: Option<u64>,
    pub attempted_models: Vec<ModelAttempt>,
}

/// Registered chat-model providers, keyed by provider id (`openai`,
/// `anthropic`, `github`, `gemini`, `ollama`).
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LLMProvider>> {
        self.providers.get(id).cloned()
    }
}

/// Compiles and executes individual steps against the model/tool
/// registries.
pub struct StepCompiler {
    pub models: ModelRegistry,
    pub providers: ProviderRegistry,
    pub tools: ToolRegistry,
    memory: ConversationCache,
}

impl StepCompiler {
    pub fn new(models: ModelRegistry, providers: ProviderRegistry, tools: ToolRegistry) -> Self {
        Self {
            models,
            providers,
            tools,
            memory: ConversationCache::new(),
        }
    }

    /// Renders a step's `prompt_file` template contents against the root
    /// view of run state plus the step's resolved inputs.
    fn render_prompt(&self, template: &str, context: &Value) -> Result<String> {
        let mut handlebars = handlebars::Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars
            .render_template(template, context)
            .map_err(|e| OrchestratorError::other(format!("prompt render failed: {}", e)))
    }

    /// Executes a tier-0 deterministic step: looks up a tool named after
    /// the step's role (the part of `agent` after `tier0_`), calling it
    /// with the step's resolved inputs. An unregistered tool is a no-op
    /// that succeeds with empty outputs, matching the "registry lookup,
    /// no-op default" behavior (§4.4) — a workflow author can declare a
    /// step whose tool ships later without breaking compilation.
    pub async fn run_deterministic(&self, step: &StepConfig, role: &str, inputs: Value) -> Result<StepOutcome> {
        match self.tools.get(role) {
            Some(tool) => {
                let result = tools::call(tool.as_ref(), inputs).await;
                if result.success {
                    Ok(StepOutcome {
                        raw_output: result.data,
                        ..Default::default()
                    })
                } else {
                    Err(OrchestratorError::other(format!(
                        "step '{}': tool '{}' failed: {}",
                        step.name,
                        role,
                        result.error.unwrap_or_default()
                    )))
                }
            }
            None => Ok(StepOutcome::default()),
        }
    }

    /// Executes a tier-1..5 LLM step: builds the candidate chain,
    /// renders the prompt, and walks candidates in order until one
    /// succeeds. A transient failure advances to the next candidate; a
    /// permanent failure also advances (the spec does not distinguish
    /// "fail the whole step" from "try the next candidate" — only
    /// exhausting every candidate fails the step, §4.2).
    pub async fn run_llm(
        &self,
        step: &StepConfig,
        tier: Tier,
        prompt_template: &str,
        prompt_context: &Value,
    ) -> Result<StepOutcome> {
        let candidates = self.models.resolve_candidates(tier, step.model_override.as_deref())?;
        if candidates.is_empty() {
            return Err(OrchestratorError::other(format!(
                "step '{}': no model candidates available for tier {}",
                step.name, tier.0
            )));
        }

        let rendered = self.render_prompt(prompt_template, prompt_context)?;
        let prompt = if step.is_self_loop() {
            self.memory.with_memory(&step.name, |memory| {
                let context_block = memory.as_context_block();
                memory.add_user(rendered.clone());
                if context_block.is_empty() {
                    rendered.clone()
                } else {
                    format!("{}\n\n{}", context_block, rendered)
                }
            })
        } else {
            rendered
        };
        let mut attempted = Vec::new();

        // §4.4 step 3: bind the step's declared tool subset (if any) onto
        // the chat model so tool-calling steps can be told what's
        // available, the same way `run_deterministic` looks tools up by
        // name for tier-0 steps.
        let tool_schemas = step
            .tools
            .as_ref()
            .map(|names| self.tools.subset(names).iter().map(|t| t.schema()).collect())
            .unwrap_or_default();

        for candidate in &candidates {
            let Some(provider) = self.providers.get(&candidate.provider) else {
                attempted.push(ModelAttempt {
                    model: candidate.id(),
                    error: Some("provider not registered".to_string()),
                    retryable: true,
                });
                continue;
            };

            let request = CompletionRequest {
                model: candidate.model.clone(),
                prompt: prompt.clone(),
                system: None,
                temperature: None,
                max_tokens: None,
                tools: tool_schemas.clone(),
                extra: HashMap::new(),
            };

            match provider.complete(request).await {
                Ok(response) => {
                    if step.is_self_loop() {
                        self.memory.with_memory(&step.name, |memory| memory.add_assistant(response.text.clone()));
                    }
                    // §4.4 step 5: merge whatever parsed cleanly, but always
                    // keep the unparsed text under `raw_response` regardless
                    // of whether parsing succeeded or fell through every
                    // fallback stage.
                    let mut fields = extract_json_object(&response.text)
                        .and_then(|v| match v {
                            Value::Object(map) => Some(map),
                            _ => None,
                        })
                        .unwrap_or_default();
                    fields.insert("raw_response".to_string(), Value::String(response.text.clone()));
                    let parsed = Value::Object(fields);
                    return Ok(StepOutcome {
                        raw_output: parsed,
                        model_used: Some(candidate.id()),
                        tokens_used: response.tokens_used.map(|t| t as u64),
                        attempted_models: attempted,
                    });
                }
                Err(error) => {
                    let (status, message) = classify_provider_error(&error);
                    let class = classify_error(status, &message);
                    attempted.push(ModelAttempt {
                        model: candidate.id(),
                        error: Some(message),
                        retryable: matches!(class, ErrorClass::Transient),
                    });
                }
            }
        }

        let last = attempted.last().cloned();
        Err(OrchestratorError::AllCandidatesFailed {
            last_model: last.as_ref().map(|a| a.model.clone()).unwrap_or_default(),
            last_error: last
                .and_then(|a| a.error)
                .unwrap_or_else(|| "no candidates attempted".to_string()),
        })
    }
}

/// Handlebars helper pretty-printing its single argument as JSON, used
/// by the default task-description prompt to render resolved inputs.
fn json_helper(
    h: &handlebars::Helper,
    _: &handlebars::Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|p| p.value()).cloned().unwrap_or(Value::Null);
    let rendered = serde_json::to_string_pretty(&value).unwrap_or_else(|_| "null".to_string());
    out.write(&rendered)?;
    Ok(())
}

fn classify_provider_error(error: &ProviderError) -> (Option<u16>, String) {
    match error {
        ProviderError::RateLimitExceeded => (Some(429), error.to_string()),
        ProviderError::Timeout => (Some(408), error.to_string()),
        ProviderError::HttpError(msg) => (None, msg.clone()),
        ProviderError::AuthError(msg) => (Some(401), msg.clone()),
        ProviderError::InvalidRequest(msg) => (Some(400), msg.clone()),
        ProviderError::ProviderSpecific(msg) => (None, msg.clone()),
        ProviderError::SerializationError(msg) => (None, msg.clone()),
        ProviderError::Unknown(msg) => (None, msg.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_raw_json() {
        let value = extract_json_object(r#"{"approved": true}"#).unwrap();
        assert_eq!(value["approved"], Value::Bool(true));
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Here is my answer:\n```json\n{\"approved\": false}\n```\nThanks.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["approved"], Value::Bool(false));
    }

    #[test]
    fn extracts_braces_substring_as_last_resort() {
        let text = "Sure, the result is {\"approved\": true} — let me know if you need more.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["approved"], Value::Bool(true));
    }

    #[test]
    fn returns_none_for_unparseable_text() {
        assert!(extract_json_object("no json here at all").is_none());
    }

    #[test]
    fn returns_none_for_empty_text() {
        assert!(extract_json_object("   ").is_none());
    }

    struct EchoProvider;

    #[async_trait::async_trait]
    impl LLMProvider for EchoProvider {
        async fn complete(&self, request: CompletionRequest) -> std::result::Result<crate::providers::CompletionResponse, ProviderError> {
            Ok(crate::providers::CompletionResponse {
                text: format!("{{\"echo\": \"{}\"}}", request.prompt.len()),
                model: request.model,
                tokens_used: Some(1),
                tool_calls: Vec::new(),
                finish_reason: "stop".to_string(),
                metadata: HashMap::new(),
            })
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct CapturingProvider {
        requests: std::sync::Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait::async_trait]
    impl LLMProvider for CapturingProvider {
        async fn complete(&self, request: CompletionRequest) -> std::result::Result<crate::providers::CompletionResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(crate::providers::CompletionResponse {
                text: "{}".to_string(),
                model: request.model,
                tokens_used: Some(1),
                tool_calls: Vec::new(),
                finish_reason: "stop".to_string(),
                metadata: HashMap::new(),
            })
        }

        fn name(&self) -> &str {
            "capturing"
        }
    }

    struct NoopTool;

    #[async_trait::async_trait]
    impl crate::tools::Tool for NoopTool {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "looks something up"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({})
        }
        async fn execute(&self, _params: Value) -> std::result::Result<crate::tools::ToolResult, String> {
            Ok(crate::tools::ToolResult::ok(Value::Null))
        }
    }

    #[tokio::test]
    async fn run_llm_binds_steps_declared_tool_subset_onto_the_request() {
        let provider = std::sync::Arc::new(CapturingProvider { requests: std::sync::Mutex::new(Vec::new()) });
        let mut providers = ProviderRegistry::new();
        providers.register("capturing", provider.clone());

        let mut tools = ToolRegistry::new();
        tools.register(std::sync::Arc::new(NoopTool));

        let compiler = StepCompiler::new(ModelRegistry::default(), providers, tools);

        let mut step = self_loop_step();
        step.depends_on = Vec::new();
        step.loop_until = None;
        step.loop_max = None;
        step.model_override = Some("capturing/model-1".to_string());
        step.tools = Some(vec!["lookup".to_string(), "ghost".to_string()]);

        compiler.run_llm(&step, Tier(1), "do the thing", &Value::Null).await.unwrap();

        let sent = provider.requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tools.len(), 1);
        assert_eq!(sent[0].tools[0].name, "lookup");
    }

    fn self_loop_step() -> StepConfig {
        StepConfig {
            name: "reviewer".to_string(),
            agent: "tier1_review".to_string(),
            description: None,
            depends_on: vec!["reviewer".to_string()],
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            when: None,
            loop_until: Some("${steps.reviewer.outputs.approved}".to_string()),
            loop_max: Some(3),
            tools: None,
            prompt_file: None,
            model_override: Some("echo/echo-1".to_string()),
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn self_loop_step_accumulates_conversation_memory_across_calls() {
        let mut providers = ProviderRegistry::new();
        providers.register("echo", std::sync::Arc::new(EchoProvider));
        let compiler = StepCompiler::new(ModelRegistry::default(), providers, ToolRegistry::new());

        let step = self_loop_step();
        let first = compiler.run_llm(&step, Tier(1), "iteration one", &Value::Null).await.unwrap();
        let second = compiler.run_llm(&step, Tier(1), "iteration two", &Value::Null).await.unwrap();

        // The second call's rendered prompt includes the first call's
        // exchange, so the echoed length grows between iterations.
        let first_len = first.raw_output["echo"].as_str().unwrap().parse::<usize>().unwrap();
        let second_len = second.raw_output["echo"].as_str().unwrap().parse::<usize>().unwrap();
        assert!(second_len > first_len);
    }

    struct UnparseableProvider;

    #[async_trait::async_trait]
    impl LLMProvider for UnparseableProvider {
        async fn complete(&self, request: CompletionRequest) -> std::result::Result<crate::providers::CompletionResponse, ProviderError> {
            Ok(crate::providers::CompletionResponse {
                text: "no json anywhere in this reply".to_string(),
                model: request.model,
                tokens_used: Some(1),
                tool_calls: Vec::new(),
                finish_reason: "stop".to_string(),
                metadata: HashMap::new(),
            })
        }

        fn name(&self) -> &str {
            "unparseable"
        }
    }

    #[tokio::test]
    async fn raw_response_is_preserved_on_parse_success() {
        let mut providers = ProviderRegistry::new();
        providers.register("echo", std::sync::Arc::new(EchoProvider));
        let compiler = StepCompiler::new(ModelRegistry::default(), providers, ToolRegistry::new());

        let mut step = self_loop_step();
        step.depends_on = Vec::new();
        step.loop_until = None;
        step.loop_max = None;

        let outcome = compiler.run_llm(&step, Tier(1), "hi", &Value::Null).await.unwrap();
        assert_eq!(outcome.raw_output["echo"], Value::String("2".to_string()));
        assert!(outcome.raw_output["raw_response"].as_str().unwrap().contains("\"echo\""));
    }

    #[tokio::test]
    async fn raw_response_is_preserved_on_parse_failure() {
        let mut providers = ProviderRegistry::new();
        providers.register("unparseable", std::sync::Arc::new(UnparseableProvider));
        let compiler = StepCompiler::new(ModelRegistry::default(), providers, ToolRegistry::new());

        let mut step = self_loop_step();
        step.depends_on = Vec::new();
        step.loop_until = None;
        step.loop_max = None;
        step.model_override = Some("unparseable/model-1".to_string());

        let outcome = compiler.run_llm(&step, Tier(1), "hi", &Value::Null).await.unwrap();
        assert_eq!(
            outcome.raw_output["raw_response"],
            Value::String("no json anywhere in this reply".to_string())
        );
        assert!(outcome.raw_output.as_object().unwrap().len() == 1);
    }
}
