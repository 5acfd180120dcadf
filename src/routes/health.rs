// ============================================================================
// Health and Metrics Routes
// ============================================================================
//
// Endpoints:
// - GET /health - Health check (account store)
// - GET /metrics - Prometheus metrics
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::metrics;

/// GET /health
pub async fn health_check(
    State(app_context): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, AppError> {
    match app_context.store.ping().await {
        Ok(()) => Ok((StatusCode::OK, Json(json!({ "status": "ok" })))),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            ))
        }
    }
}

/// GET /metrics
/// Prometheus metrics endpoint
pub async fn metrics() -> Result<impl IntoResponse, AppError> {
    match metrics::gather_metrics() {
        Ok(metrics_data) => Ok((
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            metrics_data,
        )),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain")],
                "Internal Server Error".to_string(),
            ))
        }
    }
}
