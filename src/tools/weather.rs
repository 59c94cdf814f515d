//! Current weather via WeatherAPI.com

use super::{Tool, TOOL_WEATHER};
use crate::error::AssistantError;
use crate::models::{ToolInput, ToolOutput};
use crate::retry::RetryPolicy;
use crate::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const WEATHERAPI_BASE_URL: &str = "https://api.weatherapi.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));

const ERROR_LOCATION_NOT_FOUND: i64 = 1006;
const ERROR_INVALID_API_KEY: i64 = 2006;
const ERROR_QUOTA_EXCEEDED: i64 = 2007;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather client is not configured")]
    NotConfigured,
    #[error("location not found: {0}")]
    CityNotFound(String),
    #[error("invalid API key")]
    InvalidKey,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("weather service returned {0}")]
    Status(StatusCode),
    #[error("weather request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Normalized current conditions returned to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub country: String,
    pub region: String,
    pub temperature_celsius: f64,
    pub feels_like_celsius: f64,
    pub humidity_percent: i64,
    pub conditions: String,
    pub wind_speed_kph: f64,
    pub visibility_km: f64,
    pub timestamp: i64,
}

/// Reusable WeatherAPI.com client (connection-pooled)
#[derive(Clone)]
pub struct WeatherApiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl WeatherApiClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(api_key, WEATHERAPI_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(20)
            .connect_timeout(Duration::from_secs(5))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn current(&self, city_name: &str, country_code: Option<&str>) -> std::result::Result<WeatherReport, WeatherError> {
        let api_key = self.api_key.as_deref().ok_or(WeatherError::NotConfigured)?;
        let query = location_query(city_name, country_code);
        let url = format!("{}/current.json", self.base_url);

        let response = RETRY
            .run(
                "weatherapi",
                |e: &reqwest::Error| e.is_timeout(),
                || {
                    self.client
                        .get(&url)
                        .header("Accept", "application/json")
                        .query(&[("key", api_key), ("q", query.as_str()), ("aqi", "no")])
                        .send()
                },
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(classify_error(status, &body, &query));
        }

        let body: CurrentResponse = response.json().await?;
        Ok(body.into_report())
    }
}

fn location_query(city_name: &str, country_code: Option<&str>) -> String {
    match country_code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(cc) => format!("{},{}", city_name, cc),
        None => city_name.to_string(),
    }
}

fn classify_error(status: StatusCode, body: &Value, query: &str) -> WeatherError {
    match body.pointer("/error/code").and_then(Value::as_i64) {
        Some(ERROR_LOCATION_NOT_FOUND) => WeatherError::CityNotFound(query.to_string()),
        Some(ERROR_INVALID_API_KEY) => WeatherError::InvalidKey,
        Some(ERROR_QUOTA_EXCEEDED) => WeatherError::QuotaExceeded,
        _ => WeatherError::Status(status),
    }
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    location: Location,
    current: Current,
}

#[derive(Debug, Deserialize)]
struct Location {
    name: String,
    #[serde(default)]
    region: String,
    country: String,
}

#[derive(Debug, Deserialize)]
struct Current {
    last_updated_epoch: i64,
    temp_c: f64,
    feelslike_c: f64,
    humidity: i64,
    condition: Condition,
    wind_kph: f64,
    vis_km: f64,
}

#[derive(Debug, Deserialize)]
struct Condition {
    text: String,
}

impl CurrentResponse {
    fn into_report(self) -> WeatherReport {
        WeatherReport {
            city: self.location.name,
            country: self.location.country,
            region: self.location.region,
            temperature_celsius: self.current.temp_c,
            feels_like_celsius: self.current.feelslike_c,
            humidity_percent: self.current.humidity,
            conditions: self.current.condition.text,
            wind_speed_kph: self.current.wind_kph,
            visibility_km: self.current.vis_km,
            timestamp: self.current.last_updated_epoch,
        }
    }
}

// =============================
// Tool
// =============================

pub struct WeatherTool {
    client: WeatherApiClient,
}

impl WeatherTool {
    pub fn new(client: WeatherApiClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        TOOL_WEATHER
    }

    fn description(&self) -> &'static str {
        "Get current weather information for a city. Returns temperature, humidity, conditions, and wind speed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city_name": { "type": "string", "description": "Name of the city to get weather for" },
                "country_code": { "type": "string", "description": "ISO 3166 country code to disambiguate city names" }
            },
            "required": ["city_name"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let city_name = input
            .str_param("city_name")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AssistantError::InvalidToolInput("city_name is required".to_string()))?;
        let country_code = input.str_param("country_code");

        if !self.client.is_configured() {
            return Ok(ToolOutput::error(
                "Weather tool is not configured. Please set WEATHERAPI_KEY environment variable.",
            ));
        }

        match self.client.current(city_name, country_code).await {
            Ok(report) => {
                info!(city = %report.city, temperature = report.temperature_celsius, "Weather retrieved");
                ToolOutput::json(&report)
            }
            Err(error) => {
                warn!(city = city_name, "Weather lookup failed: {}", error);
                Ok(error_output(&error, city_name, country_code))
            }
        }
    }
}

fn error_output(error: &WeatherError, city_name: &str, country_code: Option<&str>) -> ToolOutput {
    match error {
        WeatherError::NotConfigured => ToolOutput::error(
            "Weather tool is not configured. Please set WEATHERAPI_KEY environment variable.",
        ),
        WeatherError::CityNotFound(_) => {
            let shown = match country_code.filter(|c| !c.is_empty()) {
                Some(cc) => format!("{}, {}", city_name, cc),
                None => city_name.to_string(),
            };
            ToolOutput::error_with_code(format!("City '{}' not found.", shown), "CITY_NOT_FOUND")
        }
        WeatherError::InvalidKey => {
            ToolOutput::error_with_code("Invalid WeatherAPI.com API key.", "INVALID_KEY")
        }
        WeatherError::QuotaExceeded => ToolOutput::error_with_code(
            "WeatherAPI.com quota exceeded. Please try again later.",
            "QUOTA_EXCEEDED",
        ),
        WeatherError::Status(status) => ToolOutput::error_with_code(
            format!("Weather service error: {}", status.as_u16()),
            "HTTP_ERROR",
        ),
        WeatherError::Transport(_) => ToolOutput::error("Failed to retrieve weather data."),
    }
}
