//! Incremental assembly of a streamed chat completion
//!
//! OpenAI streams `data: {chunk}` lines. Content arrives as text deltas;
//! tool calls arrive as fragments keyed by `index` (id and name once,
//! arguments split across many chunks).

use super::{Completion, TokenUsage};
use crate::error::AssistantError;
use crate::models::{ChatMessage, ToolCall};
use crate::Result;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    calls: BTreeMap<usize, PartialCall>,
    usage: Option<TokenUsage>,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one SSE line. Returns the content delta carried by the line, if any.
    pub fn push_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(None);
        }

        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            AssistantError::Llm(format!("Malformed stream chunk: {}", e))
        })?;

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        let mut emitted = String::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                self.content.push_str(&text);
                emitted.push_str(&text);
            }
            for fragment in choice.delta.tool_calls {
                let entry = self.calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    entry.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }

        Ok((!emitted.is_empty()).then_some(emitted))
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(self) -> Completion {
        let tool_calls = self
            .calls
            .into_values()
            .map(|call| ToolCall {
                id: call.id,
                name: call.name,
                arguments: parse_arguments(&call.arguments),
            })
            .collect();

        Completion {
            message: ChatMessage::assistant_with_calls(self.content, tool_calls),
            usage: self.usage,
        }
    }
}

/// Parse model-produced argument JSON. Invalid JSON is kept verbatim as a
/// string so the tool can reject it with a useful message.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_deltas() {
        let mut acc = StreamAccumulator::new();
        let d1 = acc
            .push_line(r#"data: {"choices":[{"delta":{"role":"assistant","content":"Hola"}}]}"#)
            .unwrap();
        let d2 = acc
            .push_line(r#"data: {"choices":[{"delta":{"content":" mundo"}}]}"#)
            .unwrap();
        assert_eq!(d1.as_deref(), Some("Hola"));
        assert_eq!(d2.as_deref(), Some(" mundo"));

        acc.push_line("data: [DONE]").unwrap();
        assert!(acc.is_done());

        let completion = acc.finish();
        assert_eq!(completion.message.content, "Hola mundo");
        assert!(completion.message.tool_calls.is_empty());
    }

    #[test]
    fn test_tool_call_fragments_are_merged_by_index() {
        let mut acc = StreamAccumulator::new();
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"ask_stock_agent","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","type":"function","function":{"name":"ask_weather_agent","arguments":"{\"request\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"request\":\"AAPL\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"\"Paris\"}"}}]}}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        ];
        for line in lines {
            assert!(acc.push_line(line).unwrap().is_none());
        }

        let completion = acc.finish();
        let calls = &completion.message.tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, json!({ "request": "AAPL" }));
        assert_eq!(calls[1].name, "ask_weather_agent");
        assert_eq!(calls[1].arguments, json!({ "request": "Paris" }));
        assert_eq!(completion.usage.map(|u| u.total_tokens), Some(15));
    }

    #[test]
    fn test_ignores_comments_and_blank_lines() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.push_line(": keep-alive").unwrap().is_none());
        assert!(acc.push_line("").unwrap().is_none());
        assert!(acc.push_line("data: {not json").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments(r#"{"ticker":"MSFT"}"#), json!({ "ticker": "MSFT" }));
        assert_eq!(parse_arguments("{broken"), json!("{broken"));
    }
}
