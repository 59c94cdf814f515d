//! Service configuration
//!
//! Settings are read once at startup from the environment (after `.env`
//! is loaded). `from_lookup` exists so tests can feed a map instead of
//! mutating process-wide env vars.

use crate::error::AssistantError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SERVICE_NAME: &str = "veramoney-api";
pub const SERVICE_VERSION: &str = "0.1.0";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_LANGFUSE_HOST: &str = "http://localhost:3000";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppStage {
    Development,
    Qa,
    Production,
}

impl FromStr for AppStage {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(AppStage::Development),
            "qa" => Ok(AppStage::Qa),
            "production" | "prod" => Ok(AppStage::Production),
            other => Err(AssistantError::Config(format!(
                "ENVIRONMENT must be development, qa or production (got '{}')",
                other
            ))),
        }
    }
}

impl fmt::Display for AppStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppStage::Development => write!(f, "development"),
            AppStage::Qa => write!(f, "qa"),
            AppStage::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_stage: AppStage,
    pub log_level: String,
    pub app_port: u16,

    // API surface
    pub api_key: String,
    pub cors_origins: Vec<String>,
    pub rate_limit_per_minute: u32,

    // OpenAI
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub agent_model: String,
    pub worker_model: String,
    pub openai_embedding_model: String,
    pub agent_timeout_seconds: u64,
    pub worker_timeout_seconds: u64,
    pub worker_max_iterations: usize,

    // Tools
    pub weatherapi_key: Option<String>,
    pub alpaca_api_key: Option<String>,
    pub alpaca_secret_key: Option<String>,
    pub alpaca_use_sandbox: bool,

    // Memory
    pub postgres_url: Option<String>,

    // RAG
    pub chroma_host: String,
    pub chroma_port: u16,
    pub rag_collection_name: String,
    pub rag_retrieval_k: usize,

    // Langfuse
    pub langfuse_public_key: Option<String>,
    pub langfuse_secret_key: Option<String>,
    pub langfuse_host: String,
    pub langfuse_environment: String,
}

impl Settings {
    /// Load `.env` (if present) and read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let app_stage = match get("ENVIRONMENT") {
            Some(raw) => raw.parse()?,
            None => AppStage::Development,
        };

        let api_key = get("API_KEY")
            .ok_or_else(|| AssistantError::Config("API_KEY is required".to_string()))?;
        let openai_api_key = get("OPENAI_API_KEY")
            .ok_or_else(|| AssistantError::Config("OPENAI_API_KEY is required".to_string()))?;

        let rate_limit_per_minute: u32 = parse_or(get("RATE_LIMIT_PER_MINUTE"), "RATE_LIMIT_PER_MINUTE", 60)?;
        if rate_limit_per_minute == 0 {
            return Err(AssistantError::Config(
                "RATE_LIMIT_PER_MINUTE must be greater than zero".to_string(),
            ));
        }

        let agent_model = get("AGENT_MODEL")
            .or_else(|| get("OPENAI_MODEL"))
            .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());

        let postgres_url = get("POSTGRES_URL")
            .or_else(|| get("DATABASE_URL"))
            .or_else(|| postgres_url_from_parts(&get));

        Ok(Self {
            app_stage,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            app_port: parse_or(get("APP_PORT").or_else(|| get("PORT")), "APP_PORT", 8000)?,

            api_key,
            cors_origins: parse_origins(get("CORS_ORIGINS").as_deref().unwrap_or_default()),
            rate_limit_per_minute,

            openai_api_key,
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            worker_model: get("WORKER_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            agent_model,
            openai_embedding_model: get("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            agent_timeout_seconds: parse_or(get("AGENT_TIMEOUT_SECONDS"), "AGENT_TIMEOUT_SECONDS", 30)?,
            worker_timeout_seconds: parse_or(get("WORKER_TIMEOUT_SECONDS"), "WORKER_TIMEOUT_SECONDS", 20)?,
            worker_max_iterations: parse_or(get("WORKER_MAX_ITERATIONS"), "WORKER_MAX_ITERATIONS", 5)?,

            weatherapi_key: get("WEATHERAPI_KEY"),
            alpaca_api_key: get("ALPACA_API_KEY"),
            alpaca_secret_key: get("ALPACA_SECRET_KEY"),
            alpaca_use_sandbox: parse_bool(get("ALPACA_USE_SANDBOX")),

            postgres_url,

            chroma_host: get("CHROMA_HOST").unwrap_or_else(|| "localhost".to_string()),
            chroma_port: parse_or(get("CHROMA_PORT"), "CHROMA_PORT", 8000)?,
            rag_collection_name: get("RAG_COLLECTION_NAME")
                .unwrap_or_else(|| "veramoney_knowledge".to_string()),
            rag_retrieval_k: parse_or(get("RAG_RETRIEVAL_K"), "RAG_RETRIEVAL_K", 4)?,

            langfuse_public_key: get("LANGFUSE_PUBLIC_KEY"),
            langfuse_secret_key: get("LANGFUSE_SECRET_KEY"),
            langfuse_host: get("LANGFUSE_HOST")
                .unwrap_or_else(|| DEFAULT_LANGFUSE_HOST.to_string())
                .trim_end_matches('/')
                .to_string(),
            langfuse_environment: get("LANGFUSE_ENVIRONMENT")
                .unwrap_or_else(|| app_stage.to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_stage == AppStage::Production
    }

    pub fn is_development(&self) -> bool {
        self.app_stage == AppStage::Development
    }

    pub fn langfuse_enabled(&self) -> bool {
        self.langfuse_public_key.is_some() && self.langfuse_secret_key.is_some()
    }

    pub fn chroma_url(&self) -> String {
        format!("http://{}:{}", self.chroma_host, self.chroma_port)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| AssistantError::Config(format!("{} has an invalid value: '{}'", key, value))),
        None => Ok(default),
    }
}

fn parse_bool(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::to_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn postgres_url_from_parts(get: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let host = get("POSTGRES_MEMORY_HOST")?;
    let port = get("POSTGRES_MEMORY_PORT").unwrap_or_else(|| "5432".to_string());
    let user = get("POSTGRES_MEMORY_USER").unwrap_or_else(|| "postgres".to_string());
    let password = get("POSTGRES_MEMORY_PASSWORD").unwrap_or_default();
    let database = get("POSTGRES_MEMORY_DB").unwrap_or_else(|| "postgres".to_string());

    Some(format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, database
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    pub(crate) fn test_settings() -> Settings {
        settings_from(&[("API_KEY", "test-key"), ("OPENAI_API_KEY", "sk-test")])
            .expect("minimal settings")
    }

    #[test]
    fn test_defaults() {
        let settings = test_settings();
        assert_eq!(settings.app_stage, AppStage::Development);
        assert_eq!(settings.app_port, 8000);
        assert_eq!(settings.rate_limit_per_minute, 60);
        assert_eq!(settings.agent_model, "gpt-4o-mini");
        assert_eq!(settings.worker_model, "gpt-4o-mini");
        assert_eq!(settings.openai_embedding_model, "text-embedding-3-small");
        assert_eq!(settings.langfuse_host, "http://localhost:3000");
        assert_eq!(settings.langfuse_environment, "development");
        assert!(settings.cors_origins.is_empty());
        assert!(settings.postgres_url.is_none());
        assert!(!settings.langfuse_enabled());
    }

    #[test]
    fn test_required_keys() {
        let err = settings_from(&[("OPENAI_API_KEY", "sk")]).unwrap_err();
        assert!(err.to_string().contains("API_KEY"));

        let err = settings_from(&[("API_KEY", "k")]).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_cors_origins_are_trimmed() {
        let settings = settings_from(&[
            ("API_KEY", "k"),
            ("OPENAI_API_KEY", "sk"),
            ("CORS_ORIGINS", " http://a.test , ,http://b.test"),
        ])
        .unwrap();
        assert_eq!(settings.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_stage_and_models() {
        let settings = settings_from(&[
            ("API_KEY", "k"),
            ("OPENAI_API_KEY", "sk"),
            ("ENVIRONMENT", "Production"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("WORKER_MODEL", "gpt-4o-mini"),
            ("ALPACA_USE_SANDBOX", "true"),
        ])
        .unwrap();
        assert!(settings.is_production());
        assert_eq!(settings.agent_model, "gpt-4o");
        assert_eq!(settings.worker_model, "gpt-4o-mini");
        assert!(settings.alpaca_use_sandbox);
        assert_eq!(settings.langfuse_environment, "production");

        let err = settings_from(&[("API_KEY", "k"), ("OPENAI_API_KEY", "sk"), ("ENVIRONMENT", "staging")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = settings_from(&[("API_KEY", "k"), ("OPENAI_API_KEY", "sk"), ("APP_PORT", "eighty")]);
        assert!(err.is_err());

        let err = settings_from(&[("API_KEY", "k"), ("OPENAI_API_KEY", "sk"), ("RATE_LIMIT_PER_MINUTE", "0")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_postgres_url_from_parts() {
        let settings = settings_from(&[
            ("API_KEY", "k"),
            ("OPENAI_API_KEY", "sk"),
            ("POSTGRES_MEMORY_HOST", "db"),
            ("POSTGRES_MEMORY_USER", "vera"),
            ("POSTGRES_MEMORY_PASSWORD", "secret"),
            ("POSTGRES_MEMORY_DB", "memory"),
        ])
        .unwrap();
        assert_eq!(
            settings.postgres_url.as_deref(),
            Some("postgres://vera:secret@db:5432/memory")
        );
    }
}
