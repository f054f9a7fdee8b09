use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::db::{self, DbPool};

pub fn routes() -> Router<Arc<DbPool>> {
    Router::new()
        .route("/health", get(readiness_check))
        .route("/health/live", get(liveness_check))
}

/// Basic liveness probe
async fn liveness_check() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Readiness probe: the ledger is useless without its datastore
async fn readiness_check(State(db_pool): State<Arc<DbPool>>) -> impl IntoResponse {
    let start = Instant::now();
    let database = db::check_connection(db_pool.as_ref()).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let (status, database) = match database {
        Ok(()) => (
            StatusCode::OK,
            json!({ "status": "up", "latency_ms": latency_ms }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "status": "down", "message": e.to_string() }),
        ),
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "up" } else { "down" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "details": { "database": database },
        })),
    )
}
