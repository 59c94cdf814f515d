//! Expected-tool inference
//!
//! Labels an opening message with the tools it is likely to need, so the
//! evaluation dataset can later be compared against what the agent
//! actually called.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedTool {
    Weather,
    Stock,
    Knowledge,
}

impl ExpectedTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedTool::Weather => "weather",
            ExpectedTool::Stock => "stock",
            ExpectedTool::Knowledge => "knowledge",
        }
    }
}

/// Static keyword lists, English and Spanish
const WEATHER_KEYWORDS: &[&str] = &["weather", "temperature", "clima", "temperatura"];
const STOCK_KEYWORDS: &[&str] = &["stock", "price", "acción", "precio"];
const KNOWLEDGE_KEYWORDS: &[&str] = &["vera", "fintech", "regulation", "bank"];

const RULES: [(ExpectedTool, &[&str]); 3] = [
    (ExpectedTool::Weather, WEATHER_KEYWORDS),
    (ExpectedTool::Stock, STOCK_KEYWORDS),
    (ExpectedTool::Knowledge, KNOWLEDGE_KEYWORDS),
];

pub const UNKNOWN_TOOL: &str = "unknown";

pub fn infer_tools(message: &str) -> Vec<ExpectedTool> {
    let lower = message.to_lowercase();
    RULES
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(tool, _)| *tool)
        .collect()
}

/// Tool labels for the dataset; `["unknown"]` when nothing matches.
pub fn expected_tools(message: &str) -> Vec<String> {
    let tools = infer_tools(message);
    if tools.is_empty() {
        return vec![UNKNOWN_TOOL.to_string()];
    }
    tools.iter().map(|t| t.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_domain() {
        let cases = vec![
            ("What's the weather in Montevideo?", "weather"),
            ("¿Cuál es la temperatura en Madrid?", "weather"),
            ("AAPL stock today", "stock"),
            ("Precio de la acción de Tesla", "stock"),
            ("Tell me about Vera's history", "knowledge"),
            ("Which fintech rules apply to me?", "knowledge"),
        ];

        for (message, expected) in cases {
            assert_eq!(expected_tools(message), vec![expected.to_string()], "{}", message);
        }
    }

    #[test]
    fn test_multiple_domains_keep_order() {
        assert_eq!(
            expected_tools("Weather in NYC and the AAPL price, plus bank regulation"),
            vec!["weather", "stock", "knowledge"]
        );
    }

    #[test]
    fn test_unknown() {
        assert_eq!(expected_tools("hola!"), vec!["unknown"]);
        assert!(infer_tools("").is_empty());
    }
}
