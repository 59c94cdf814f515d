//! Langfuse lifecycle
//!
//! Langfuse is optional. Missing keys, rejected credentials or an
//! unreachable host all leave it disabled; startup never fails because of
//! it.

use super::client::{AuthCheck, LangfuseClient};
use super::trace::{TraceInfo, TraceRecorder};
use crate::config::Settings;
use crate::retry::RetryPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const INIT_RETRY: RetryPolicy = RetryPolicy::fixed(3, Duration::from_secs(5));

pub struct LangfuseManager {
    client: Option<LangfuseClient>,
    environment: String,
    enabled: AtomicBool,
    retry: RetryPolicy,
}

impl LangfuseManager {
    pub fn new(settings: &Settings) -> Self {
        let client = match (&settings.langfuse_public_key, &settings.langfuse_secret_key) {
            (Some(public_key), Some(secret_key)) => {
                match LangfuseClient::new(&settings.langfuse_host, public_key.as_str(), secret_key.as_str()) {
                    Ok(client) => Some(client),
                    Err(e) => {
                        warn!("Failed to build Langfuse client: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            client,
            environment: settings.langfuse_environment.clone(),
            enabled: AtomicBool::new(false),
            retry: INIT_RETRY,
        }
    }

    /// A manager that never traces.
    pub fn disabled(environment: &str) -> Self {
        Self {
            client: None,
            environment: environment.to_string(),
            enabled: AtomicBool::new(false),
            retry: INIT_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Verify credentials and enable tracing. Returns whether Langfuse is enabled.
    pub async fn initialize(&self) -> bool {
        let Some(client) = &self.client else {
            debug!("Langfuse not configured: missing keys");
            return false;
        };

        let check = self
            .retry
            .run("langfuse_auth", |_: &reqwest::Error| true, || client.check_auth())
            .await;

        let enabled = match check {
            Ok(AuthCheck::Authorized) => {
                info!(
                    host = client.host(),
                    environment = %self.environment,
                    "Langfuse client initialized"
                );
                true
            }
            Ok(AuthCheck::Unauthorized) => {
                warn!(
                    host = client.host(),
                    public_key_prefix = %client.public_key_prefix(),
                    "Langfuse credentials rejected"
                );
                false
            }
            Ok(AuthCheck::Unexpected(status)) => {
                warn!(host = client.host(), %status, "Langfuse auth check returned unexpected status");
                false
            }
            Err(e) => {
                warn!(
                    attempts = self.retry.max_attempts,
                    "Langfuse init failed, observability disabled: {}",
                    e
                );
                false
            }
        };

        self.enabled.store(enabled, Ordering::SeqCst);
        enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// The client, only once initialization succeeded.
    pub fn client(&self) -> Option<&LangfuseClient> {
        if self.is_enabled() {
            self.client.as_ref()
        } else {
            None
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// A fresh per-request trace, when enabled.
    pub fn start_trace(&self, info: TraceInfo) -> Option<Arc<TraceRecorder>> {
        let client = self.client()?;
        Some(Arc::new(TraceRecorder::new(client.clone(), &self.environment, info)))
    }
}
