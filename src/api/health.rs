//! Service endpoints outside `/api/v1`
//!
//! - GET /health - Liveness plus a database ping
//! - GET / - Welcome message

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::api::middleware::AppState;
use crate::api::responses::ApiResponse;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: String,
    pub database: &'static str,
}

#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub message: String,
    pub version: String,
    pub docs: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_check))
}

/// A failed ping reports `degraded` with 503
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, code, database) = match state.pool.ping().await {
        Ok(()) => ("healthy", StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!("Health check database ping failed: {:#}", e);
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    let body = HealthResponse {
        status,
        service: state.config.app.name.clone(),
        version: state.config.app.version.clone(),
        database,
    };
    (code, Json(body))
}

async fn welcome(State(state): State<AppState>) -> ApiResponse<WelcomeResponse> {
    ApiResponse::ok(WelcomeResponse {
        message: format!("Welcome to {}", state.config.app.name),
        version: state.config.app.version.clone(),
        docs: "/api/v1",
    })
}
