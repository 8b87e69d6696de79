/// Health check endpoints
///
/// `/health` is the plain liveness answer; `/health/ready` additionally
/// checks the database so a load balancer can pull an instance whose
/// store is unreachable.
use crate::{context::AppContext, db};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use std::time::Instant;

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/ready", get(readiness_probe))
}

/// Basic health check
pub async fn health_basic() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: 200 when the database answers, 503 otherwise
pub async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> (StatusCode, Json<serde_json::Value>) {
    let start = Instant::now();

    match db::test_connection(&ctx.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "version": env!("CARGO_PKG_VERSION"),
                "database": {
                    "status": "healthy",
                    "responseTimeMs": start.elapsed().as_millis() as u64,
                    "poolSize": ctx.db.size(),
                }
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness_probe_failed: database check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unavailable",
                    "version": env!("CARGO_PKG_VERSION"),
                    "database": { "status": "unhealthy" }
                })),
            )
        }
    }
}
