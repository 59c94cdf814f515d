//! Stock quotes via Alpaca market data snapshots

use super::{Tool, TOOL_STOCK};
use crate::models::{ToolInput, ToolOutput};
use crate::retry::RetryPolicy;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const ALPACA_DATA_BASE_URL: &str = "https://data.alpaca.markets/v2";
pub const ALPACA_SANDBOX_BASE_URL: &str = "https://data.sandbox.alpaca.markets/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));
const MAX_TICKER_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum StockError {
    #[error("Alpaca credentials are not configured")]
    NotConfigured,
    #[error("invalid ticker: {0}")]
    InvalidTicker(String),
    #[error("market data returned {0}")]
    Status(StatusCode),
    #[error("market data request timed out")]
    Timeout,
    #[error("market data request failed: {0}")]
    Transport(reqwest::Error),
    #[error("unexpected snapshot payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for StockError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StockError::Timeout
        } else {
            StockError::Transport(e)
        }
    }
}

/// Latest trade plus previous close for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub ticker: String,
    pub price: f64,
    pub previous_close: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockQuote {
    pub ticker: String,
    pub price: f64,
    pub currency: String,
    pub timestamp: String,
    pub change: String,
    pub change_percent: String,
}

impl StockQuote {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let change = snapshot.price - snapshot.previous_close;
        let change_percent = if snapshot.previous_close == 0.0 {
            0.0
        } else {
            change / snapshot.previous_close * 100.0
        };

        Self {
            ticker: snapshot.ticker.clone(),
            price: snapshot.price,
            currency: "USD".to_string(),
            timestamp: snapshot.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            change: signed(change, ""),
            change_percent: signed(change_percent, "%"),
        }
    }
}

fn signed(value: f64, suffix: &str) -> String {
    if value >= 0.0 {
        format!("+{:.2}{}", value, suffix)
    } else {
        format!("{:.2}{}", value, suffix)
    }
}

/// Trim, uppercase and validate a ticker symbol.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let ticker = raw.trim().to_uppercase();
    let valid = !ticker.is_empty()
        && ticker.len() <= MAX_TICKER_LEN
        && ticker.chars().all(|c| c.is_ascii_uppercase());
    valid.then_some(ticker)
}

/// Reusable Alpaca market data client (connection-pooled)
#[derive(Clone)]
pub struct AlpacaClient {
    client: Client,
    credentials: Option<(String, String)>,
    base_url: String,
}

impl AlpacaClient {
    pub fn new(api_key: Option<String>, secret_key: Option<String>, use_sandbox: bool) -> Result<Self> {
        let base_url = if use_sandbox {
            ALPACA_SANDBOX_BASE_URL
        } else {
            ALPACA_DATA_BASE_URL
        };
        Self::with_base_url(api_key, secret_key, base_url)
    }

    pub fn with_base_url(api_key: Option<String>, secret_key: Option<String>, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(20)
            .connect_timeout(Duration::from_secs(5))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let credentials = match (api_key, secret_key) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => Some((key, secret)),
            _ => None,
        };

        Ok(Self {
            client,
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub async fn snapshot(&self, ticker: &str) -> std::result::Result<Snapshot, StockError> {
        let (key, secret) = self.credentials.as_ref().ok_or(StockError::NotConfigured)?;
        let url = format!("{}/stocks/snapshots", self.base_url);

        let response = RETRY
            .run(
                "alpaca",
                |e: &reqwest::Error| e.is_timeout(),
                || {
                    self.client
                        .get(&url)
                        .header("APCA-API-KEY-ID", key)
                        .header("APCA-API-SECRET-KEY", secret)
                        .header("Accept", "application/json")
                        .query(&[("symbols", ticker)])
                        .send()
                },
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StockError::Status(status));
        }

        let mut body: HashMap<String, SymbolSnapshot> = response.json().await?;
        let data = body
            .remove(ticker)
            .ok_or_else(|| StockError::InvalidTicker(ticker.to_string()))?;
        let trade = data
            .latest_trade
            .ok_or_else(|| StockError::InvalidTicker(ticker.to_string()))?;
        let previous_close = data
            .prev_day
            .and_then(|bar| bar.c)
            .ok_or_else(|| StockError::InvalidTicker(ticker.to_string()))?;

        Ok(Snapshot {
            ticker: ticker.to_string(),
            price: trade.p,
            previous_close,
            timestamp: parse_trade_time(&trade.t)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SymbolSnapshot {
    #[serde(rename = "latestTrade", default)]
    latest_trade: Option<Trade>,
    #[serde(rename = "prevDay", default)]
    prev_day: Option<DailyBar>,
}

#[derive(Debug, Deserialize)]
struct Trade {
    p: f64,
    t: Value,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(default)]
    c: Option<f64>,
}

/// Trade timestamps come as RFC 3339 strings or integer nanoseconds.
fn parse_trade_time(raw: &Value) -> std::result::Result<DateTime<Utc>, StockError> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StockError::Payload(format!("bad trade timestamp '{}': {}", s, e))),
        Value::Number(n) => n
            .as_i64()
            .map(|nanos| Utc.timestamp_nanos(nanos))
            .ok_or_else(|| StockError::Payload(format!("bad trade timestamp {}", n))),
        other => Err(StockError::Payload(format!("bad trade timestamp {}", other))),
    }
}

// =============================
// Tool
// =============================

pub struct StockTool {
    client: AlpacaClient,
}

impl StockTool {
    pub fn new(client: AlpacaClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Tool for StockTool {
    fn name(&self) -> &'static str {
        TOOL_STOCK
    }

    fn description(&self) -> &'static str {
        "Get current stock price for a ticker symbol. Returns price in USD, change from previous close, and timestamp."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": {
                    "type": "string",
                    "description": "Stock ticker symbol (e.g., AAPL, GOOGL)",
                    "minLength": 1,
                    "maxLength": MAX_TICKER_LEN
                }
            },
            "required": ["ticker"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let raw = input.str_param("ticker").unwrap_or_default();
        let Some(ticker) = normalize_ticker(raw) else {
            return Ok(ToolOutput::error(format!("Invalid ticker: {}", raw.trim())));
        };

        if !self.client.is_configured() {
            return Ok(ToolOutput::error(
                "Stock tool not configured. Set ALPACA_API_KEY and ALPACA_SECRET_KEY environment variables.",
            ));
        }

        match self.client.snapshot(&ticker).await {
            Ok(snapshot) => {
                let quote = StockQuote::from_snapshot(&snapshot);
                info!(ticker = %quote.ticker, price = quote.price, "Stock quote retrieved");
                ToolOutput::json(&quote)
            }
            Err(error) => {
                warn!(ticker = %ticker, "Stock lookup failed: {}", error);
                Ok(error_output(&error, &ticker))
            }
        }
    }
}

fn error_output(error: &StockError, ticker: &str) -> ToolOutput {
    match error {
        StockError::NotConfigured => ToolOutput::error(
            "Stock tool not configured. Set ALPACA_API_KEY and ALPACA_SECRET_KEY environment variables.",
        ),
        StockError::InvalidTicker(_) => ToolOutput::error(format!("Invalid ticker: {}", ticker)),
        StockError::Status(status) => {
            ToolOutput::error(format!("Stock service error: {}", status.as_u16()))
        }
        StockError::Timeout => ToolOutput::error("Stock service unavailable. Please try again."),
        StockError::Transport(_) | StockError::Payload(_) => {
            ToolOutput::error("Failed to retrieve stock data.")
        }
    }
}
