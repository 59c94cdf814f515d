//! Context window selection
//!
//! Chooses which part of the stored history is sent to the model with the
//! next user message. The window is a suffix of the history bounded by a
//! message count and a token budget, and never begins mid tool exchange.

use crate::memory::store::ConversationHistory;
use crate::models::{ChatMessage, MessageRole};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_messages: usize,
    pub max_context_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: 40,
            max_context_tokens: 12_000,
        }
    }
}

pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new() -> Self {
        Self {
            config: ContextConfig::default(),
        }
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn usage_percent(&self, history: &ConversationHistory) -> f32 {
        (history.total_tokens() as f32 / self.config.max_context_tokens as f32) * 100.0
    }

    /// Messages to replay before the new user message, oldest first.
    pub fn select_window(&self, history: &ConversationHistory) -> Vec<ChatMessage> {
        let mut tokens = 0usize;
        let mut taken = 0usize;

        for message in history.messages().rev() {
            let cost = message.token_estimate();
            if taken == self.config.max_messages || tokens + cost > self.config.max_context_tokens {
                break;
            }
            tokens += cost;
            taken += 1;
        }

        let window = drop_unpaired_tool_messages(history.recent_messages(taken));
        debug!(
            available = history.message_count(),
            selected = window.len(),
            tokens,
            "Context window selected"
        );
        window
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove tool results whose call is outside the window and assistant
/// tool-call messages whose results are not all present, then make sure the
/// window does not open on a tool result.
fn drop_unpaired_tool_messages(window: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let call_ids: HashSet<&str> = window
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.as_str()))
        .collect();
    let answered: HashSet<&str> = window
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();

    let keep: Vec<bool> = window
        .iter()
        .map(|m| match m.role {
            MessageRole::Tool => m
                .tool_call_id
                .as_deref()
                .is_some_and(|id| call_ids.contains(id)),
            MessageRole::Assistant if m.has_tool_calls() => {
                m.tool_calls.iter().all(|c| answered.contains(c.id.as_str()))
            }
            _ => true,
        })
        .collect();

    // An orphaned call message drags its (now unpaired) results with it.
    let dropped_calls: HashSet<String> = window
        .iter()
        .zip(&keep)
        .filter(|(m, kept)| !**kept && m.has_tool_calls())
        .flat_map(|(m, _)| m.tool_calls.iter().map(|c| c.id.clone()))
        .collect();

    let result: Vec<ChatMessage> = window
        .into_iter()
        .zip(keep)
        .filter(|(m, kept)| {
            *kept
                && !m
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| dropped_calls.contains(id))
        })
        .map(|(m, _)| m)
        .collect();

    let leading_tools = result
        .iter()
        .take_while(|m| m.role == MessageRole::Tool)
        .count();
    result.into_iter().skip(leading_tools).collect()
}
