//! Post-answer sanity checks
//!
//! Compares the final answer against what the tools actually returned in
//! the same run. Findings are logged as warnings; the answer is never
//! rewritten.

use super::middleware::{AgentMiddleware, ModelCall, RunContext};
use crate::models::{ChatMessage, MessageRole};
use crate::tools::knowledge::KnowledgeResults;
use crate::tools::{TOOL_KNOWLEDGE, TOOL_STOCK, TOOL_WEATHER};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

const TEMPERATURE_TOLERANCE: f64 = 1.0;
const PRICE_TOLERANCE: f64 = 0.01;

lazy_static! {
    static ref TEMPERATURE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(\d+(?:\.\d+)?)\s*°?c").expect("Invalid regex pattern"),
        Regex::new(r"(\d+(?:\.\d+)?)\s*°?f").expect("Invalid regex pattern"),
        Regex::new(r"temperature\s*(?:is|of)?\s*(\d+(?:\.\d+)?)").expect("Invalid regex pattern"),
    ];

    static ref PRICE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"\$(\d+(?:\.\d+)?)").expect("Invalid regex pattern"),
        Regex::new(r"price\s*(?:is|of)?\s*\$?(\d+(?:\.\d+)?)").expect("Invalid regex pattern"),
        Regex::new(r"(\d+(?:\.\d+)?)\s*(?:usd|dollars?)").expect("Invalid regex pattern"),
    ];
}

const CITATION_INDICATORS: [&str; 8] = [
    "source",
    "fuente",
    "according to",
    "según",
    "documento",
    "document",
    "page",
    "página",
];

const TITLE_INDICATORS: [&str; 6] = [
    "historia de veramoney",
    "regulacion fintech",
    "regulacion bancaria",
    "veramoney history",
    "fintech regulation",
    "banking regulation",
];

/// A number in the answer that disagrees with the tool result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub expected: f64,
    pub found: f64,
}

/// Latest tool message content per tool name within the run.
fn tool_results<'a>(turn: &'a [ChatMessage], names: &[&str]) -> HashMap<&'a str, &'a str> {
    turn.iter()
        .filter(|m| m.role == MessageRole::Tool)
        .filter_map(|m| {
            let name = m.name.as_deref()?;
            names.contains(&name).then_some((name, m.content.as_str()))
        })
        .collect()
}

fn json_number(content: &str, fields: &[&str]) -> Option<f64> {
    let value: Value = serde_json::from_str(content).ok()?;
    fields.iter().find_map(|f| value.get(*f).and_then(Value::as_f64))
}

fn first_number(patterns: &[Regex], text: &str) -> Option<f64> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// `response` must already be lowercase.
pub fn check_weather(response: &str, tool_result: &str) -> Option<Mismatch> {
    if !response.contains("weather") && !response.contains("temperature") {
        return None;
    }
    let expected = json_number(tool_result, &["temperature_celsius", "temperature"])?;
    let found = first_number(&TEMPERATURE_PATTERNS, response)?;
    ((found - expected).abs() > TEMPERATURE_TOLERANCE).then_some(Mismatch { expected, found })
}

/// `response` must already be lowercase.
pub fn check_stock(response: &str, tool_result: &str) -> Option<Mismatch> {
    if !response.contains("stock") && !response.contains("price") {
        return None;
    }
    let expected = json_number(tool_result, &["price"])?;
    let found = first_number(&PRICE_PATTERNS, response)?;
    ((found - expected).abs() > PRICE_TOLERANCE).then_some(Mismatch { expected, found })
}

/// Flags weather and stock figures that do not match the tool output.
pub struct OutputGuardrails;

#[async_trait::async_trait]
impl AgentMiddleware for OutputGuardrails {
    fn name(&self) -> &'static str {
        "output_guardrails"
    }

    async fn after_model(&self, ctx: &RunContext, call: &ModelCall<'_>) {
        let content = &call.completion.message.content;
        if !call.is_final() || content.is_empty() {
            return;
        }
        let response = content.to_lowercase();

        for (tool, result) in tool_results(call.turn, &[TOOL_WEATHER, TOOL_STOCK]) {
            match tool {
                TOOL_WEATHER => {
                    if let Some(m) = check_weather(&response, result) {
                        warn!(
                            agent = %ctx.agent,
                            expected_temp = m.expected,
                            found_temp = m.found,
                            "Potential weather hallucination"
                        );
                    }
                }
                TOOL_STOCK => {
                    if let Some(m) = check_stock(&response, result) {
                        warn!(
                            agent = %ctx.agent,
                            expected_price = m.expected,
                            found_price = m.found,
                            "Potential stock price hallucination"
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

//
// ================= Knowledge =================
//

#[derive(Debug, Default, PartialEq)]
pub struct CitationReport {
    pub missing_citation: bool,
    pub unknown_titles: Vec<String>,
}

impl CitationReport {
    pub fn is_clean(&self) -> bool {
        !self.missing_citation && self.unknown_titles.is_empty()
    }
}

/// `response` must already be lowercase.
pub fn check_citations(response: &str, results: &[KnowledgeResults]) -> CitationReport {
    let has_chunks = results.iter().any(|r| !r.chunks.is_empty());
    let missing_citation = has_chunks && !CITATION_INDICATORS.iter().any(|i| response.contains(i));

    let retrieved: BTreeSet<String> = results
        .iter()
        .flat_map(|r| r.chunks.iter())
        .map(|c| c.document_title.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let unknown_titles = if retrieved.is_empty() {
        Vec::new()
    } else {
        TITLE_INDICATORS
            .iter()
            .filter(|title| response.contains(*title))
            .filter(|title| {
                !retrieved
                    .iter()
                    .any(|known| known.contains(*title) || title.contains(known.as_str()))
            })
            .map(|title| title.to_string())
            .collect()
    };

    CitationReport {
        missing_citation,
        unknown_titles,
    }
}

/// Checks that knowledge answers cite what was actually retrieved.
pub struct KnowledgeGuardrails;

#[async_trait::async_trait]
impl AgentMiddleware for KnowledgeGuardrails {
    fn name(&self) -> &'static str {
        "knowledge_guardrails"
    }

    async fn after_model(&self, ctx: &RunContext, call: &ModelCall<'_>) {
        let content = &call.completion.message.content;
        if !call.is_final() || content.is_empty() {
            return;
        }

        let results: Vec<KnowledgeResults> = call
            .turn
            .iter()
            .filter(|m| m.role == MessageRole::Tool && m.name.as_deref() == Some(TOOL_KNOWLEDGE))
            .filter_map(|m| serde_json::from_str(&m.content).ok())
            .collect();
        if results.is_empty() {
            return;
        }

        let report = check_citations(&content.to_lowercase(), &results);
        if report.missing_citation {
            warn!(agent = %ctx.agent, response_len = content.len(), "Knowledge answer has no citation");
        }
        for title in &report.unknown_titles {
            warn!(agent = %ctx.agent, title = %title, "Knowledge answer cites a document that was not retrieved");
        }
    }
}
