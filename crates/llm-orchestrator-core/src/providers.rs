// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider trait definitions.

use crate::tools::ToolSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// LLM provider trait.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Get provider name.
    fn name(&self) -> &str;

    /// Check if provider is healthy.
    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// A single tool invocation requested by the model in lieu of (or
/// alongside) text content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id for this call, echoed back when the tool
    /// result is threaded into a follow-up turn.
    pub id: String,
    /// Name of the tool to invoke, matched against `ToolRegistry`.
    pub name: String,
    /// Arguments the model supplied, as parsed JSON.
    pub arguments: serde_json::Value,
}

/// Completion request. Mirrors the chat-model contract (§6): a model
/// id, a one-shot user message (with optional system prompt), optional
/// bound tool schemas, and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model name.
    pub model: String,

    /// Prompt or messages.
    pub prompt: String,

    /// System prompt (optional).
    pub system: Option<String>,

    /// Temperature (0.0 - 2.0).
    pub temperature: Option<f32>,

    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,

    /// Tool schemas bound to this call (§4.4 step 3's "chat model +
    /// bound tool subset"). Empty when the step has no tools declared.
    #[serde(default)]
    pub tools: Vec<ToolSchema>,

    /// Additional parameters.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text.
    pub text: String,

    /// Model used.
    pub model: String,

    /// Tokens used.
    pub tokens_used: Option<u32>,

    /// Tool calls the model requested instead of, or alongside, `text`.
    /// Empty when the model returned plain text or no tools were bound.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Provider-reported reason generation stopped (e.g. `"stop"`,
    /// `"tool_calls"`, `"max_tokens"`). Empty string when the provider
    /// didn't report one.
    #[serde(default)]
    pub finish_reason: String,

    /// Additional metadata.
    #[serde(flatten)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Provider error.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Authentication error.
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-specific error.
    #[error("Provider error: {0}")]
    ProviderSpecific(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Timeout error.
    #[error("Request timed out")]
    Timeout,

    /// Unknown error.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
