//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};

#[derive(Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    /// Absent when running without PostgreSQL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_latency_ms: Option<u64>,
}

/// GET /api/v1/health
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, db_latency_ms?}}
/// - Unhealthy: 503 + {code: 5001, msg: "unavailable"}
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let db_latency_ms = match &state.db {
        Some(db) => match db.health_check().await {
            Ok(latency) => Some(latency.as_millis() as u64),
            Err(e) => {
                tracing::error!(error = %e, "PostgreSQL health check failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse {
                        code: error_codes::SERVICE_UNAVAILABLE,
                        msg: "unavailable".to_string(),
                        data: None,
                    }),
                );
            }
        },
        None => None,
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            db_latency_ms,
        })),
    )
}
