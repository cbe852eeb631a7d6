mod config;
mod http;
mod idempotency;
mod ingest;
mod jobs;
mod keepa;
mod metrics;
mod models;
mod quota;
mod security;
mod sink;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::IngestConfig;
use idempotency::IdempotencyStore;
use ingest::pipeline::Ingestor;
use jobs::{RunInfo, RunQueue};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, RunRequest};
use quota::clock::SystemClock;
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = IngestConfig::load()?;
    let client = keepa::KeepaClient::from_env()?;
    let sink = sink::ConfiguredSink::from_env();
    let ingestor = Ingestor::new(client, sink, Arc::new(config), Arc::new(SystemClock));
    let (queue, _worker) = RunQueue::spawn(ingestor);
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        queue: queue.clone(),
        idempotency: IdempotencyStore::from_env(),
        prometheus_handle,
    };
    let app = router(state, AuthState::from_env())
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "ingest.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(queue))
        .await?;
    Ok(())
}

/// Ctrl+C cancels the active run so it can persist what it has.
async fn shutdown_signal(queue: RunQueue) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "ingest.api", "unable to listen for shutdown: {err}");
        return;
    }
    info!(target = "ingest.api", "shutdown requested");
    queue.cancel_active().await;
}

#[derive(Clone)]
struct AppState {
    queue: RunQueue,
    idempotency: IdempotencyStore,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState, auth: AuthState) -> Router {
    let protected = Router::new()
        .route("/runs", post(create_run))
        .route("/runs/cancel", post(cancel_run))
        .route("/runs/{id}", get(get_run))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
}

/// Health check. `GET /health`, no auth.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "keepa-ingest-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct RunCreated {
    run_id: Uuid,
    /// True when an earlier request with the same idempotency key created it.
    replayed: bool,
}

/// Enqueue an ingestion run.
///
/// - Method: `POST`
/// - Path: `/runs`
/// - Auth: `Authorization: Bearer <key>` or `X-Ingest-Key: <key>`
/// - Body: optional `RunRequest`
/// - Response: `202` with the run id
async fn create_run(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RunCreated>), AppError> {
    crate::metrics::inc_requests("/runs");
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| AppError::BadRequest(err.to_string()))?
    };
    if request.item_cap == Some(0) {
        return Err(AppError::BadRequest("item_cap must be positive".into()));
    }

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(key) = &idempotency_key
        && let Some(run_id) = state.idempotency.get(key).await
    {
        return Ok((
            StatusCode::ACCEPTED,
            Json(RunCreated {
                run_id,
                replayed: true,
            }),
        ));
    }

    let run_id = state.queue.enqueue(request).await.map_err(AppError::Queue)?;
    if let Some(key) = &idempotency_key {
        state.idempotency.put(key, run_id).await;
    }
    info!(
        target = "ingest.api",
        caller = %context.caller,
        api_key = %context.api_key_id,
        %run_id,
        "run triggered"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(RunCreated {
            run_id,
            replayed: false,
        }),
    ))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunInfo>, AppError> {
    crate::metrics::inc_requests("/runs/{id}");
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Err(AppError::BadRequest("invalid_run_id".into()));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

async fn cancel_run(State(state): State<AppState>) -> Json<serde_json::Value> {
    crate::metrics::inc_requests("/runs/cancel");
    let cancelled = state.queue.cancel_active().await;
    Json(json!({ "cancelled": cancelled }))
}

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound,
    Queue(ApiError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: "invalid_request".into(),
                    detail: Some(detail),
                },
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: "not_found".into(),
                    detail: None,
                },
            ),
            AppError::Queue(err) => (StatusCode::SERVICE_UNAVAILABLE, err),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
