//! Health & status API endpoints
//!
//! - GET /health  - simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status  - swap queue counts and uptime
//! - GET /swaps   - recent swap records, optionally filtered by status

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

use crate::db::{self, Swap, SwapStatus};
use crate::metrics;

#[derive(Clone)]
struct AppState {
    db: PgPool,
    started: Instant,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    queues: QueueStatus,
}

#[derive(Serialize)]
struct QueueStatus {
    unsigned: i64,
    signed: i64,
    submitted: i64,
    confirmed: i64,
    failed: i64,
    retry: i64,
}

#[derive(Deserialize)]
struct SwapsQuery {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Start the API server.
pub async fn start_api_server(addr: SocketAddr, db: PgPool) -> Result<()> {
    let state = AppState {
        db,
        started: Instant::now(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .route("/swaps", get(swaps))
        .with_state(state);

    info!(%addr, "API server started");
    metrics::UP.set(1.0);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "encode failure").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let count = |status: SwapStatus| {
        let db = state.db.clone();
        async move {
            let count = db::count_swaps_by_status(&db, status).await.unwrap_or(0);
            metrics::SWAPS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(count as f64);
            count
        }
    };

    let queues = QueueStatus {
        unsigned: count(SwapStatus::Unsigned).await,
        signed: count(SwapStatus::Signed).await,
        submitted: count(SwapStatus::Submitted).await,
        confirmed: count(SwapStatus::Confirmed).await,
        failed: count(SwapStatus::Failed).await,
        retry: count(SwapStatus::Retry).await,
    };

    Json(StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        queues,
    })
}

async fn swaps(
    State(state): State<AppState>,
    Query(query): Query<SwapsQuery>,
) -> Result<Json<Vec<Swap>>, StatusCode> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(SwapStatus::parse(raw).ok_or(StatusCode::BAD_REQUEST)?),
    };

    let limit = query.limit.clamp(1, 500);
    let swaps = db::recent_swaps(&state.db, status, limit)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(swaps))
}
