use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{debug, error};

use crate::health::HealthChecker;

pub fn router(checker: HealthChecker) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .with_state(checker)
}

async fn root() -> &'static str {
    "Welcome to QPesaPay Gateway API"
}

/// 503 with the component breakdown when a hard dependency is down
async fn health(State(checker): State<HealthChecker>) -> Response {
    let status = checker.check_health().await;
    if status.is_healthy() {
        debug!(status = ?status.status, "Health check passed");
        (StatusCode::OK, Json(status)).into_response()
    } else {
        error!("❌ Health check failed - service unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}

async fn liveness() -> &'static str {
    "OK"
}
