mod rate_limit;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Json, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use concourse_core::{IntentScore, Slot};
use concourse_engine::{Edge, Node};
use concourse_handlers::{build_runtime, Runtime, RuntimeConfig};
use concourse_observability::{AppMetrics, MetricsSnapshot};
use concourse_storage::{record_turn, HistoryRepository, Store};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use crate::rate_limit::IpRateLimiter;

pub const DEFAULT_API_KEY: &str = "dev-concourse-key";
const MAX_TEXT_LEN: usize = 2_000;
const MAX_CONVERSATION_ID_LEN: usize = 128;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// Server settings. Collaborator settings live in `runtime`.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub api_key: String,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub database_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub runtime: RuntimeConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 120,
            database_url: None,
            allowed_origins: vec!["http://localhost:5500".to_string()],
            runtime: RuntimeConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind: env::var("CONCOURSE_BIND").unwrap_or(defaults.bind),
            api_key: env::var("CONCOURSE_API_KEY").unwrap_or(defaults.api_key),
            rate_limit_window: env::var("CONCOURSE_RATE_LIMIT_WINDOW_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: env::var("CONCOURSE_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|max| *max > 0)
                .unwrap_or(defaults.rate_limit_max),
            database_url: env::var("CONCOURSE_DATABASE_URL")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            allowed_origins: env::var("CONCOURSE_ALLOWED_ORIGINS")
                .map(|value| parse_origins(&value))
                .unwrap_or(defaults.allowed_origins),
            runtime: RuntimeConfig::from_env(),
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<Runtime>,
    pub store: Arc<Store>,
    pub metrics: Arc<AppMetrics>,
    pub api_key: Arc<str>,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub max_messages: usize,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    conversation_id: Option<String>,
    text: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    conversation_id: String,
    intent: Option<String>,
    rephrased_query: Option<String>,
    top_intents: Vec<IntentScore>,
    slots: Vec<Slot>,
    response: String,
    path: Vec<Node>,
}

#[derive(Debug, Serialize)]
struct HealthCapabilities {
    classifier: &'static str,
    chat_model: Option<String>,
    intent_verification: bool,
    parking_status: bool,
    storage: &'static str,
    docs_loaded: usize,
    collections: Vec<String>,
    handlers: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: MetricsSnapshot,
    capabilities: HealthCapabilities,
}

#[derive(Debug, Serialize)]
struct GraphResponse {
    entry: Node,
    edges: Vec<Edge>,
}

pub async fn build_state(config: ApiConfig) -> Result<ApiState> {
    let metrics = AppMetrics::shared();
    let max_messages = config.runtime.history_turns;
    let runtime = build_runtime(config.runtime, metrics.clone())?;

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url)
            .await
            .context("failed to open conversation store")?,
        None => Store::memory(),
    };

    Ok(ApiState {
        runtime: Arc::new(runtime),
        store: Arc::new(store),
        metrics,
        api_key: Arc::from(config.api_key),
        limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins),
        max_messages,
    })
}

pub async fn build_app(config: ApiConfig) -> Result<Router> {
    let state = build_state(config).await?;
    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/graph", get(graph))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

/// Purges expired conversations and idle rate-limit entries on a fixed interval.
pub fn spawn_maintenance(state: &ApiState) -> tokio::task::JoinHandle<()> {
    let store = state.store.clone();
    let limiter = state.limiter.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired(chrono::Utc::now()).await {
                Ok(purged) if purged > 0 => info!(purged, "expired conversations purged"),
                Ok(_) => {}
                Err(error) => warn!(error = %error, "conversation purge failed"),
            }
            limiter.prune();
        }
    })
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let runtime = &state.runtime;
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
        capabilities: HealthCapabilities {
            classifier: runtime.classifier_model,
            chat_model: runtime.chat_model.clone(),
            intent_verification: runtime.chat_model.is_some(),
            parking_status: runtime.config.service_key.is_some(),
            storage: state.store.backend(),
            docs_loaded: runtime.retrieval.docs_loaded,
            collections: runtime.retrieval.collections.clone(),
            handlers: runtime.graph.registry().len(),
        },
    };
    (StatusCode::OK, Json(payload))
}

async fn chat(State(state): State<ApiState>, Json(request): Json<ChatRequest>) -> Response {
    let text = request.text.trim();
    if text.is_empty() || text.chars().count() > MAX_TEXT_LEN {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_text",
            "text must be between 1 and 2000 characters",
        );
    }

    let conversation_id = match request.conversation_id.as_deref().map(str::trim) {
        Some(id) if id.is_empty() || id.len() > MAX_CONVERSATION_ID_LEN => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_conversation_id",
                "conversation_id must be between 1 and 128 characters",
            );
        }
        Some(id) => id.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };

    let history = match state.store.load(&conversation_id).await {
        Ok(conversation) => conversation
            .map(|conversation| conversation.messages)
            .unwrap_or_default(),
        Err(error) => {
            warn!(error = %error, conversation_id = %conversation_id, "history load failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "conversation history is unavailable",
            );
        }
    };

    let outcome = state.runtime.graph.run_turn(text, history).await;
    let reply = outcome.response().to_string();

    if let Err(error) = record_turn(
        state.store.as_ref(),
        &conversation_id,
        text,
        &reply,
        state.max_messages,
    )
    .await
    {
        warn!(error = %error, conversation_id = %conversation_id, "history write failed");
    }

    let turn = outcome.state;
    let payload = ChatResponse {
        conversation_id,
        intent: turn.intent().map(|label| label.as_str().to_string()),
        rephrased_query: turn.rephrased_query().map(ToString::to_string),
        top_intents: turn.top_k_intents_and_probs().to_vec(),
        slots: turn.slots().to_vec(),
        response: reply,
        path: outcome.path,
    };
    (StatusCode::OK, Json(payload)).into_response()
}

async fn graph(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = GraphResponse {
        entry: Node::ClassifyIntent,
        edges: state.runtime.graph.edges(),
    };
    (StatusCode::OK, Json(payload))
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "message": message
        })),
    )
        .into_response()
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key != state.api_key.as_ref() {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid x-api-key",
        );
    }

    next.run(request).await
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded for this IP",
        );
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}
