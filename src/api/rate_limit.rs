//! Per-client rate limiting
//!
//! Clients are identified by API key when one is sent, by remote address
//! otherwise.

use super::auth::API_KEY_HEADER;
use super::error::ApiError;
use super::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How often idle client entries are dropped.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
/// Tracked clients above which a check also prunes.
const MAX_TRACKED_CLIENTS: usize = 10_000;

pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

pub fn build_limiter(per_minute: u32) -> KeyedLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
    RateLimiter::keyed(quota)
}

/// Drop clients whose quota has fully replenished. Returns how many went.
pub fn prune(limiter: &KeyedLimiter) -> usize {
    let before = limiter.len();
    limiter.retain_recent();
    limiter.shrink_to_fit();
    before.saturating_sub(limiter.len())
}

pub fn spawn_pruner(limiter: Arc<KeyedLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = prune(&limiter);
            if removed > 0 {
                debug!(removed, tracked = limiter.len(), "Pruned rate limiter");
            }
        }
    })
}

pub fn rate_limit_key(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return format!("apikey:{}", key);
    }
    match remote {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = rate_limit_key(request.headers(), remote);

    if state.limiter.len() > MAX_TRACKED_CLIENTS {
        prune(&state.limiter);
    }

    if state.limiter.check_key(&key).is_err() {
        let client = key.split(':').next().unwrap_or_default();
        warn!(client_kind = client, path = %request.uri().path(), "Rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_key_prefers_api_key() {
        let mut headers = HeaderMap::new();
        let addr: SocketAddr = "10.0.0.7:5555".parse().unwrap();
        assert_eq!(rate_limit_key(&headers, Some(addr)), "ip:10.0.0.7");
        assert_eq!(rate_limit_key(&headers, None), "ip:unknown");

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(rate_limit_key(&headers, Some(addr)), "apikey:abc");
    }

    #[test]
    fn test_limiter_is_keyed() {
        let limiter = build_limiter(2);
        let a = "apikey:a".to_string();
        let b = "apikey:b".to_string();
        tokio_test::assert_ok!(limiter.check_key(&a));
        tokio_test::assert_ok!(limiter.check_key(&a));
        tokio_test::assert_err!(limiter.check_key(&a));
        tokio_test::assert_ok!(limiter.check_key(&b));
    }

    #[tokio::test]
    async fn test_prune_drops_idle_clients() {
        // one cell per millisecond, so entries go idle almost immediately
        let limiter = build_limiter(60_000);
        for i in 0..1_000 {
            tokio_test::assert_ok!(limiter.check_key(&format!("apikey:bogus-{}", i)));
        }
        assert_eq!(limiter.len(), 1_000);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(prune(&limiter), 1_000);
        assert_eq!(limiter.len(), 0);
    }

    #[tokio::test]
    async fn test_pruner_task_shrinks_limiter() {
        let limiter = Arc::new(build_limiter(60_000));
        for i in 0..100 {
            tokio_test::assert_ok!(limiter.check_key(&format!("ip:10.0.0.{}", i)));
        }
        let task = spawn_pruner(limiter.clone(), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(limiter.len(), 0);
        task.abort();
    }
}
