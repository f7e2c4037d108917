//! Tag API endpoints
//!
//! - GET /api/v1/tags - List tags with live post counts
//! - GET /api/v1/tags/{id} - Get tag
//! - POST /api/v1/tags - Create tag (superuser)
//! - PUT /api/v1/tags/{id} - Update tag (superuser)
//! - DELETE /api/v1/tags/{id} - Delete tag (superuser)

use axum::{
    extract::State,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::common::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::ApiResponse;
use crate::models::{
    AuditAction, CreateTagInput, Page, QueryParams, Tag, TagWithCount, UpdateTagInput,
};
use crate::services::ClientInfo;

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTagRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tags))
        .route("/{id}", get(get_tag))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_tag))
        .route("/{id}", put(update_tag).delete(delete_tag))
}

async fn list_tags(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> Result<ApiResponse<Page<TagWithCount>>, ApiError> {
    Ok(ApiResponse::ok(state.tag_service.list(&params).await?))
}

async fn get_tag(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<Tag>, ApiError> {
    Ok(ApiResponse::ok(state.tag_service.get(id).await?))
}

async fn create_tag(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiJson(body): ApiJson<CreateTagRequest>,
) -> Result<ApiResponse<Tag>, ApiError> {
    let tag = state
        .tag_service
        .create(CreateTagInput {
            name: body.name,
            description: body.description,
            color: body.color,
        })
        .await?;

    state
        .audit_service
        .record(Some(user.id), AuditAction::Create, "tag", tag.id, None, &client)
        .await;
    Ok(ApiResponse::created(tag))
}

async fn update_tag(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateTagRequest>,
) -> Result<ApiResponse<Tag>, ApiError> {
    let tag = state
        .tag_service
        .update(
            id,
            UpdateTagInput {
                name: body.name,
                description: body.description,
                color: body.color,
            },
        )
        .await?;

    state
        .audit_service
        .record(Some(user.id), AuditAction::Update, "tag", id, None, &client)
        .await;
    Ok(ApiResponse::ok(tag))
}

async fn delete_tag(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<()>, ApiError> {
    state.tag_service.delete(id).await?;
    state
        .audit_service
        .record(Some(user.id), AuditAction::Delete, "tag", id, None, &client)
        .await;
    Ok(ApiResponse::message("Tag deleted successfully"))
}
