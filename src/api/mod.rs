//! HTTP API
//!
//! `GET /health`, `POST /chat` (SSE) and `POST /chat/complete` (JSON).
//! Chat routes require the `X-API-Key` header and are rate limited per
//! client.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod rate_limit;
pub mod schemas;
pub mod sessions;

pub use error::{ApiError, ApiResult};
pub use schemas::{ChatCompleteResponse, ChatRequest, HealthResponse};

use crate::agent::SupervisorFactory;
use crate::config::Settings;
use crate::memory::ContextManager;
use crate::observability::DatasetManager;
use crate::Result;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use rate_limit::KeyedLimiter;
use sessions::SessionLocks;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub factory: Arc<SupervisorFactory>,
    pub datasets: Arc<DatasetManager>,
    pub context: Arc<ContextManager>,
    pub limiter: Arc<KeyedLimiter>,
    pub sessions: Arc<SessionLocks>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, factory: Arc<SupervisorFactory>, datasets: Arc<DatasetManager>) -> Self {
        let limiter = Arc::new(rate_limit::build_limiter(settings.rate_limit_per_minute));
        Self {
            settings,
            factory,
            datasets,
            context: Arc::new(ContextManager::new()),
            limiter,
            sessions: Arc::new(SessionLocks::new()),
        }
    }
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(auth::API_KEY_HEADER)])
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router {
    let chat = Router::new()
        .route("/chat", post(handlers::chat_stream))
        .route("/chat/complete", post(handlers::chat_complete))
        .route_layer(from_fn_with_state(state.clone(), auth::require_api_key))
        .route_layer(from_fn_with_state(state.clone(), rate_limit::enforce));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(chat)
        .layer(from_fn_with_state(state.clone(), headers::security_headers))
        .layer(cors_layer(&state.settings))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CatchPanicLayer::custom(error::panic_response))
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let port = state.settings.app_port;
    let pruner = rate_limit::spawn_pruner(state.limiter.clone(), rate_limit::PRUNE_INTERVAL);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pruner.abort();
    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{settings_from, test_settings};
    use crate::models::ChatMessage;
    use crate::observability::{LangfuseManager, PromptManager};
    use crate::test_support::{tool_call, ScriptedModel};
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SESSION: &str = "550e8400-e29b-41d4-a716-446655440000";

    struct Harness {
        router: Router,
        state: AppState,
        supervisor: Arc<ScriptedModel>,
    }

    fn harness(settings: Settings, supervisor: Vec<ChatMessage>, worker: Vec<ChatMessage>) -> Harness {
        let settings = Arc::new(settings);
        let supervisor = Arc::new(ScriptedModel::new(supervisor));
        let langfuse = Arc::new(LangfuseManager::disabled("development"));
        let prompts = Arc::new(PromptManager::new(langfuse.clone(), "gpt-4o-mini"));
        let factory = SupervisorFactory::new(
            settings.clone(),
            supervisor.clone(),
            Arc::new(ScriptedModel::new(worker)),
            ToolRegistry::new(),
            langfuse.clone(),
            prompts,
        );
        let state = AppState::new(settings, Arc::new(factory), Arc::new(DatasetManager::new(langfuse)));
        Harness {
            router: create_router(state.clone()),
            state,
            supervisor,
        }
    }

    fn chat_request(path: &str, body: Value, api_key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn text_body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(test_settings(), vec![], vec![]);
        let response = h
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers().get("strict-transport-security").is_none());
        assert_eq!(
            json_body(response).await,
            json!({ "status": "healthy", "service": "veramoney-api", "version": "0.1.0" })
        );
    }

    #[tokio::test]
    async fn test_hsts_in_production() {
        let settings = settings_from(&[("API_KEY", "k"), ("OPENAI_API_KEY", "sk"), ("ENVIRONMENT", "production")]).unwrap();
        let h = harness(settings, vec![], vec![]);
        let response = h
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers()["strict-transport-security"],
            "max-age=31536000; includeSubDomains"
        );
    }

    #[tokio::test]
    async fn test_auth_and_validation() {
        let h = harness(test_settings(), vec![], vec![]);
        let body = json!({ "message": "hola", "session_id": SESSION });

        let response = h
            .router
            .clone()
            .oneshot(chat_request("/chat/complete", body.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["detail"], "Invalid or missing API key");

        let response = h
            .router
            .clone()
            .oneshot(chat_request("/chat", body, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bad_session = json!({ "message": "hola", "session_id": "abc" });
        let response = h
            .router
            .clone()
            .oneshot(chat_request("/chat/complete", bad_session, Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["detail"], "session_id must be a valid UUID");

        let empty = json!({ "message": "", "session_id": SESSION });
        let response = h
            .router
            .clone()
            .oneshot(chat_request("/chat", empty, Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let missing_field = json!({ "message": "hola" });
        let response = h
            .router
            .oneshot(chat_request("/chat/complete", missing_field, Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let settings = settings_from(&[("API_KEY", "k"), ("OPENAI_API_KEY", "sk"), ("RATE_LIMIT_PER_MINUTE", "1")]).unwrap();
        let h = harness(settings, vec![], vec![]);
        let body = json!({ "message": "", "session_id": SESSION });

        let first = h
            .router
            .clone()
            .oneshot(chat_request("/chat/complete", body.clone(), Some("k")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::BAD_REQUEST);

        let second = h
            .router
            .clone()
            .oneshot(chat_request("/chat/complete", body, Some("k")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(second).await["detail"], "Rate limit exceeded");

        // health is never limited
        let health = h
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_complete_persists_and_dedups() {
        let repeated = json!({ "request": "weather in Montevideo" });
        let h = harness(
            test_settings(),
            vec![
                ChatMessage::assistant_with_calls(
                    "",
                    vec![
                        tool_call("c1", "ask_weather_agent", repeated.clone()),
                        tool_call("c2", "ask_weather_agent", repeated.clone()),
                    ],
                ),
                ChatMessage::assistant("It's sunny in Montevideo."),
                ChatMessage::assistant("You're welcome!"),
            ],
            vec![
                ChatMessage::assistant("Status: success | Location: Montevideo, Uruguay"),
                ChatMessage::assistant("Status: success | Location: Montevideo, Uruguay"),
            ],
        );

        let body = json!({ "message": "Weather in Montevideo?", "session_id": SESSION });
        let response = h
            .router
            .clone()
            .oneshot(chat_request("/chat/complete", body, Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["response"], "It's sunny in Montevideo.");
        assert_eq!(
            body["tool_calls"],
            json!([{ "tool": "ask_weather_agent", "input": repeated }])
        );

        let session = Uuid::parse_str(SESSION).unwrap();
        let memory = h.state.factory.memory().await.unwrap();
        assert_eq!(memory.load(session).await.unwrap().message_count(), 5);

        let body = json!({ "message": "Thanks", "session_id": SESSION });
        let response = h
            .router
            .oneshot(chat_request("/chat/complete", body, Some("test-key")))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["response"], "You're welcome!");
        assert!(body["tool_calls"].is_null());

        // system + five stored messages + new user message
        let requests = h.supervisor.requests();
        assert_eq!(requests[2].len(), 7);
        assert_eq!(memory.load(session).await.unwrap().message_count(), 7);
    }

    #[tokio::test]
    async fn test_chat_complete_empty_answer_and_failure() {
        let h = harness(test_settings(), vec![ChatMessage::assistant("")], vec![]);
        let body = json!({ "message": "hola", "session_id": SESSION });

        let response = h
            .router
            .clone()
            .oneshot(chat_request("/chat/complete", body.clone(), Some("test-key")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["response"], "No response generated.");

        // script exhausted
        let response = h
            .router
            .oneshot(chat_request("/chat/complete", body, Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["detail"], "Internal server error");
    }

    #[tokio::test]
    async fn test_concurrent_turns_keep_both_exchanges() {
        let h = harness(
            test_settings(),
            vec![ChatMessage::assistant("First answer."), ChatMessage::assistant("Second answer.")],
            vec![],
        );
        let first = json!({ "message": "Hola", "session_id": SESSION });
        let second = json!({ "message": "Chau", "session_id": SESSION });

        let (a, b) = tokio::join!(
            h.router.clone().oneshot(chat_request("/chat/complete", first, Some("test-key"))),
            h.router.clone().oneshot(chat_request("/chat/complete", second, Some("test-key"))),
        );
        assert_eq!(a.unwrap().status(), StatusCode::OK);
        assert_eq!(b.unwrap().status(), StatusCode::OK);

        // the later turn saw the earlier one: system + user + assistant + user
        let requests = h.supervisor.requests();
        assert_eq!(requests[1].len(), 4);

        let session = Uuid::parse_str(SESSION).unwrap();
        let memory = h.state.factory.memory().await.unwrap();
        assert_eq!(memory.load(session).await.unwrap().message_count(), 4);
        assert_eq!(h.state.sessions.tracked(), 1);
    }

    #[tokio::test]
    async fn test_chat_stream_events() {
        let h = harness(
            test_settings(),
            vec![
                ChatMessage::assistant_with_calls(
                    "",
                    vec![tool_call("c1", "ask_stock_agent", json!({ "request": "AAPL price" }))],
                ),
                ChatMessage::assistant("AAPL trades at $190.50."),
            ],
            vec![ChatMessage::assistant("Status: success | Ticker: AAPL | Price: $190.50")],
        );

        let body = json!({ "message": "AAPL?", "session_id": SESSION });
        let response = h
            .router
            .oneshot(chat_request("/chat", body, Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let text = text_body(response).await;
        let order: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(order, vec!["tool_call", "tool_result", "token", "done"]);
        assert!(text.contains(r#"data: {"content":"AAPL trades at $190.50."}"#));
    }

    #[tokio::test]
    async fn test_chat_stream_error_event() {
        let h = harness(test_settings(), vec![], vec![]);
        let body = json!({ "message": "hola", "session_id": SESSION });
        let response = h
            .router
            .oneshot(chat_request("/chat", body, Some("test-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let text = text_body(response).await;
        assert!(text.contains("event: error"));
        assert!(text.contains(r#"{"message":"An error occurred during processing"}"#));
        assert!(!text.contains("event: done"));
    }
}
