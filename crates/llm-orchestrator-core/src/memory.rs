// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-step conversation memory for bounded self-loops (spec §4.5.6,
//! §4.4's "build or reuse a cached agent").
//!
//! Ported from `original_source/agentic-workflows-v2/src/agentic_v2/agents/base.py`'s
//! `ConversationMemory`: a sliding window of messages that auto-
//! summarizes and trims once a message-count or estimated-token budget
//! is exceeded, so a self-looping step's prompt doesn't grow
//! unboundedly across iterations.

use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_MAX_MESSAGES: usize = 50;
const DEFAULT_MAX_TOKENS: usize = 8000;
const DEFAULT_MAX_SUMMARIES: usize = 5;
const SUMMARY_PREVIEW_CHARS: usize = 160;
const SUMMARY_MAX_LINES: usize = 30;

#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

/// A sliding-window conversation history with automatic summarize-and-
/// trim, keyed per step by [`ConversationCache`].
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    messages: Vec<ConversationMessage>,
    summaries: Vec<String>,
    max_messages: usize,
    max_tokens: usize,
    max_summaries: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            summaries: Vec::new(),
            max_messages: DEFAULT_MAX_MESSAGES,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_summaries: DEFAULT_MAX_SUMMARIES,
        }
    }
}

impl ConversationMemory {
    /// Estimated token count for a string: ~4 characters per token,
    /// matching `estimate_tokens`'s heuristic fallback (no tokenizer
    /// dependency is pulled in for an estimate used only to decide when
    /// to trim).
    fn estimate_tokens(text: &str) -> usize {
        if text.is_empty() {
            0
        } else {
            (text.len() / 4).max(1)
        }
    }

    fn total_tokens(&self) -> usize {
        let message_tokens: usize = self.messages.iter().map(|m| Self::estimate_tokens(&m.content)).sum();
        let summary_tokens: usize = self.summaries.iter().map(|s| Self::estimate_tokens(s)).sum();
        message_tokens + summary_tokens
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add("user", content);
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add("assistant", content);
    }

    fn add(&mut self, role: &str, content: impl Into<String>) {
        self.messages.push(ConversationMessage {
            role: role.to_string(),
            content: content.into(),
        });
        if self.messages.len() > self.max_messages || self.total_tokens() > self.max_tokens {
            self.summarize_and_trim();
        }
    }

    fn preview(text: &str) -> String {
        let cleaned: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.chars().count() <= SUMMARY_PREVIEW_CHARS {
            cleaned
        } else {
            let truncated: String = cleaned.chars().take(SUMMARY_PREVIEW_CHARS.saturating_sub(3)).collect();
            format!("{}...", truncated)
        }
    }

    fn build_summary(to_summarize: &[ConversationMessage]) -> String {
        if to_summarize.is_empty() {
            return String::new();
        }
        let mut lines: Vec<String> = to_summarize
            .iter()
            .map(|m| format!("{}: {}", m.role, Self::preview(&m.content)))
            .collect();

        let header = format!("[Summary of {} messages]", to_summarize.len());
        if lines.len() > SUMMARY_MAX_LINES {
            let omitted = lines.len() - SUMMARY_MAX_LINES;
            lines.truncate(SUMMARY_MAX_LINES);
            lines.push(format!("... ({} more omitted) ...", omitted));
        }
        format!("{}\n{}", header, lines.join("\n"))
    }

    fn compact_summaries(&mut self) {
        if self.summaries.len() > self.max_summaries {
            let drop = self.summaries.len() - self.max_summaries;
            self.summaries.drain(0..drop);
        }
        let half_budget = self.max_tokens / 2;
        while !self.summaries.is_empty()
            && self.summaries.iter().map(|s| Self::estimate_tokens(s)).sum::<usize>() > half_budget
        {
            self.summaries.remove(0);
        }
    }

    /// Summarizes the older half of the window and keeps the newer half
    /// verbatim, matching `_summarize_and_trim`'s halving strategy.
    fn summarize_and_trim(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        let split = self.messages.len() / 2;
        let older: Vec<ConversationMessage> = self.messages.drain(0..split).collect();
        let summary = Self::build_summary(&older);
        if !summary.is_empty() {
            self.summaries.push(summary);
        }
        self.compact_summaries();
    }

    /// Renders the accumulated summaries plus live window as a single
    /// text block suitable for prepending to a rendered prompt.
    pub fn as_context_block(&self) -> String {
        let mut parts = Vec::new();
        if !self.summaries.is_empty() {
            parts.push(format!("Previous conversation summary:\n{}", self.summaries.join("\n\n")));
        }
        for message in &self.messages {
            parts.push(format!("{}: {}", message.role, message.content));
        }
        parts.join("\n\n")
    }
}

/// Per-step conversation memories, keyed by step name, shared across a
/// run's loop iterations. A fresh run should use a fresh cache — it is
/// not meant to outlive a single workflow execution.
#[derive(Default)]
pub struct ConversationCache {
    memories: Mutex<HashMap<String, ConversationMemory>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the step's memory, creating an empty one on
    /// first use, and returns `f`'s result.
    pub fn with_memory<T>(&self, step_name: &str, f: impl FnOnce(&mut ConversationMemory) -> T) -> T {
        let mut guard = self.memories.lock().expect("conversation cache mutex poisoned");
        let memory = guard.entry(step_name.to_string()).or_default();
        f(memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_accumulates_turns_across_calls() {
        let mut memory = ConversationMemory::default();
        memory.add_user("draft a plan");
        memory.add_assistant("here is a plan");
        let block = memory.as_context_block();
        assert!(block.contains("draft a plan"));
        assert!(block.contains("here is a plan"));
    }

    #[test]
    fn exceeding_max_messages_triggers_summarization() {
        let mut memory = ConversationMemory {
            max_messages: 4,
            ..Default::default()
        };
        for i in 0..10 {
            memory.add_user(format!("message {}", i));
        }
        assert!(!memory.summaries.is_empty());
        assert!(memory.messages.len() < 10);
    }

    #[test]
    fn summaries_are_bounded_by_max_summaries() {
        let mut memory = ConversationMemory {
            max_messages: 2,
            max_summaries: 1,
            ..Default::default()
        };
        for round in 0..5 {
            memory.add_user(format!("round {} user", round));
            memory.add_assistant(format!("round {} assistant", round));
        }
        assert!(memory.summaries.len() <= 1);
    }

    #[test]
    fn cache_persists_memory_between_lookups() {
        let cache = ConversationCache::new();
        cache.with_memory("reviewer", |m| m.add_user("first pass"));
        let block = cache.with_memory("reviewer", |m| m.as_context_block());
        assert!(block.contains("first pass"));
    }

    #[test]
    fn cache_isolates_memory_per_step() {
        let cache = ConversationCache::new();
        cache.with_memory("a", |m| m.add_user("only in a"));
        let block_b = cache.with_memory("b", |m| m.as_context_block());
        assert!(block_b.is_empty());
    }
}
