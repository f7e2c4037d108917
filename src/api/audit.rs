//! Audit log API endpoint
//!
//! - GET /api/v1/audit-logs - Newest-first audit entries (superuser)

use axum::{extract::State, routing::get, Router};

use crate::api::common::ApiQuery;
use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::ApiResponse;
use crate::models::{AuditLog, AuditLogFilter, Page, QueryParams};

pub fn admin_router() -> Router<AppState> {
    Router::new().route("/", get(list_audit_logs))
}

async fn list_audit_logs(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueryParams>,
    ApiQuery(filter): ApiQuery<AuditLogFilter>,
) -> Result<ApiResponse<Page<AuditLog>>, ApiError> {
    Ok(ApiResponse::ok(state.audit_service.list(&params, &filter).await?))
}
