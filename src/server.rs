//! Public HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Rate limit | Description |
//! |--------|------|------|-----------|-------------|
//! | `POST` | `/insert` | required | 20/min | Store content, audit on chain |
//! | `POST` | `/search` | required | 30/min | Principal-scoped semantic search |
//! | `POST` | `/chat` | required | 10/min | Memory-conditioned LLM reply |
//! | `GET`  | `/health` | no | — | Component statuses |
//! | `GET`  | `/stats` | no | — | Live on-chain totals |
//! | `GET`  | `/monad/stats` | no | — | Cache statistics |
//! | `GET`  | `/monad/trending` | no | — | Tag frequency ranking |
//! | `GET`  | `/monad/recent` | no | — | Most recent audit records |
//! | `POST` | `/monad/search` | no | — | Query the cached audit log |
//! | `POST` | `/monad/refresh` | required | 5/min | Force a cache refresh |
//!
//! # Error Contract
//!
//! Every error response is `{"detail": "...", "kind": "Kind...", "backend"?: "..."}`.
//! This module is the only place error kinds map to HTTP status codes.

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::admission::{self, Endpoint, RateLimiter, MAX_BODY_BYTES};
use crate::cache::MonadCache;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::kinic::KinicClient;
use crate::llm::AnthropicClient;
use crate::models::{
    ChainStatsResponse, ChatRequest, HealthResponse, InsertRequest, MonadSearchRequest,
    MonadSearchResponse, RefreshResponse, SearchRequest,
};
use crate::monad::{ChainLog, MonadLogger};
use crate::pipeline::Pipeline;

/// Timeout for the health probe against the chain RPC.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Bounds for cache query endpoints.
const MONAD_SEARCH_LIMIT_MAX: usize = 100;
const MONAD_SEARCH_LIMIT_DEFAULT: usize = 50;
const TRENDING_LIMIT_DEFAULT: usize = 10;
const RECENT_LIMIT_DEFAULT: usize = 20;

/// Shared application state, constructed once at startup and cloned into
/// every handler. No module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub pipeline: Arc<Pipeline>,
    pub cache: Arc<MonadCache>,
    pub limiter: Arc<RateLimiter>,
    pub chain: Arc<dyn ChainLog>,
}

// ============ Error translation ============

/// Wire shape of every error response.
#[derive(serde::Serialize)]
struct ErrorBody {
    detail: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<&'static str>,
}

/// Newtype that carries a [`GatewayError`] out of a handler.
pub struct AppError(pub GatewayError);

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError(err)
    }
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::RemoteUnavailable { .. }
        | GatewayError::RemoteRejected { .. }
        | GatewayError::InsufficientFunds(_)
        | GatewayError::Reverted(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "internal error surfaced to client");
        }
        let body = ErrorBody {
            detail: self.0.to_string(),
            kind: self.0.kind(),
            backend: self.0.backend(),
        };
        (status, Json(body)).into_response()
    }
}

// ============ Admission middleware ============

/// API-key gate, body bound, and per-endpoint rate limiting, applied before
/// any handler runs. Validation errors never reach a backend.
async fn admission_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(length) = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if length > MAX_BODY_BYTES as u64 {
            return AppError(GatewayError::PayloadTooLarge(format!(
                "request body exceeds {} bytes",
                MAX_BODY_BYTES
            )))
            .into_response();
        }
    }

    if let Some(endpoint) = Endpoint::classify(request.uri().path()) {
        let configured = state.config.server.api_key();
        if configured.is_some() {
            let provided = request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok());
            if !admission::api_key_ok(configured, provided) {
                let detail = if provided.is_none() {
                    "Missing API key. Include the X-API-Key header."
                } else {
                    "Invalid API key."
                };
                return AppError(GatewayError::Unauthorized(detail.into())).into_response();
            }
        }

        if !state.limiter.check(addr.ip(), endpoint) {
            return AppError(GatewayError::RateLimited(
                "rate limit exceeded for this endpoint; retry later".into(),
            ))
            .into_response();
        }
    }

    next.run(request).await
}

fn cors_layer(config: &GatewayConfig) -> anyhow::Result<CorsLayer> {
    let origins = &config.server.allowed_origins;
    let layer = if origins.iter().any(|o| o == "*") {
        // validate() already rejected this combination under auth.
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Result<Vec<HeaderValue>, _> =
            origins.iter().map(|o| o.parse::<HeaderValue>()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed?))
            .allow_methods(Any)
            .allow_headers(Any)
    };
    Ok(layer)
}

// ============ Router ============

pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config)?;

    Ok(Router::new()
        .route("/", get(handle_root))
        .route("/insert", post(handle_insert))
        .route("/search", post(handle_search))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/monad/stats", get(handle_monad_stats))
        .route("/monad/trending", get(handle_monad_trending))
        .route("/monad/recent", get(handle_monad_recent))
        .route("/monad/search", post(handle_monad_search))
        .route("/monad/refresh", post(handle_monad_refresh))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state))
}

/// Build real clients from the config, start the cache refresh loop, and
/// serve until terminated.
pub async fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    config.validate_for_serve()?;

    let kinic = Arc::new(KinicClient::new(&config.canister)?);
    let monad: Arc<dyn ChainLog> = Arc::new(MonadLogger::new(&config.chain)?);
    let llm = Arc::new(AnthropicClient::new(&config.llm)?);

    let pipeline = Arc::new(Pipeline::new(kinic, monad.clone(), llm));
    let cache = Arc::new(MonadCache::new(monad.clone()));
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));

    let state = AppState {
        config: Arc::new(config),
        pipeline,
        cache: cache.clone(),
        limiter,
        chain: monad,
    };

    // Background projection refresh; the first tick fires immediately and
    // doubles as the initial sync.
    let refresh_interval = state.config.cache.refresh_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(refresh_interval));
        loop {
            interval.tick().await;
            match cache.refresh().await {
                Ok(added) if added > 0 => info!(added, "cache refresh pulled new records"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "background cache refresh failed"),
            }
        }
    });

    let bind = state.config.server.bind.clone();
    let app = router(state)?;
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("memory gateway listening on http://{bind}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============ Handlers ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "Memory Gateway",
        "status": "running",
        "endpoints": {
            "insert": "POST /insert",
            "search": "POST /search",
            "chat": "POST /chat",
            "health": "GET /health",
            "stats": "GET /stats",
            "monad_stats": "GET /monad/stats",
            "monad_trending": "GET /monad/trending",
            "monad_recent": "GET /monad/recent",
            "monad_search": "POST /monad/search",
            "monad_refresh": "POST /monad/refresh",
        },
    }))
}

async fn handle_insert(
    State(state): State<AppState>,
    Json(request): Json<InsertRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.pipeline.insert(&request).await?;
    Ok(Json(response))
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.pipeline.search(&request).await?;
    Ok(Json(response))
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.pipeline.chat(&request).await?;
    Ok(Json(response))
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let chain_ok = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, state.chain.health())
        .await
        .map(|probe| probe.is_ok())
        .unwrap_or(false);

    let body = HealthResponse {
        status: if chain_ok { "healthy" } else { "degraded" }.into(),
        vector: "connected".into(),
        chain: if chain_ok { "connected" } else { "disconnected" }.into(),
        canister: state.config.canister.canister_id.clone(),
    };
    let status = if chain_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn handle_stats(State(state): State<AppState>) -> Response {
    match state.chain.total().await {
        Ok(total) => Json(ChainStatsResponse {
            total_memories_on_chain: total,
            contract_address: state.chain.contract_address(),
            agent_address: state.chain.signer_address(),
        })
        .into_response(),
        Err(e) => {
            // The stats surface reports availability, not gateway failure.
            let body = ErrorBody {
                detail: e.to_string(),
                kind: e.kind(),
                backend: e.backend(),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

async fn handle_monad_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats().await)
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn handle_monad_trending(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(TRENDING_LIMIT_DEFAULT).max(1);
    Json(state.cache.trending_tags(limit).await)
}

async fn handle_monad_recent(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(RECENT_LIMIT_DEFAULT).max(1);
    let results = state.cache.recent(limit, None).await;
    Json(MonadSearchResponse {
        num_results: results.len(),
        results,
        source: "cache".into(),
    })
}

async fn handle_monad_search(
    State(state): State<AppState>,
    Json(request): Json<MonadSearchRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(op) = request.op_type {
        if op > 1 {
            return Err(GatewayError::bad_request("op_type must be 0 or 1").into());
        }
    }
    let limit = request
        .limit
        .unwrap_or(MONAD_SEARCH_LIMIT_DEFAULT)
        .clamp(1, MONAD_SEARCH_LIMIT_MAX);

    let results = if let Some(tags) = request.tags.as_deref().filter(|s| !s.trim().is_empty()) {
        state
            .cache
            .search_by_tags(tags.trim(), limit, request.op_type)
            .await
    } else if let Some(title) = request.title.as_deref().filter(|s| !s.trim().is_empty()) {
        state
            .cache
            .search_by_title(title.trim(), limit, request.op_type)
            .await
    } else if let Some(summary) = request.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        state
            .cache
            .search_by_summary(summary.trim(), limit, request.op_type)
            .await
    } else {
        return Err(
            GatewayError::bad_request("provide at least one of: tags, title, summary").into(),
        );
    };

    Ok(Json(MonadSearchResponse {
        num_results: results.len(),
        results,
        source: "cache".into(),
    }))
}

async fn handle_monad_refresh(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let added = state.cache.refresh().await?;
    Ok(Json(RefreshResponse {
        synced: true,
        added,
    }))
}
