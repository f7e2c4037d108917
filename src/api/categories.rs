//! Category API endpoints
//!
//! Reads are public; writes require a superuser.

use axum::{
    extract::State,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::common::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::ApiResponse;
use crate::models::{AuditAction, Category, Page, QueryParams, UpdateCategoryInput};
use crate::services::{ClientInfo, CreateCategoryData};

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_categories))
        .route("/{id}", get(get_category))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_category))
        .route("/{id}", put(update_category).delete(delete_category))
}

/// GET /api/v1/categories
async fn list_categories(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> Result<ApiResponse<Page<Category>>, ApiError> {
    Ok(ApiResponse::ok(state.category_service.list(&params).await?))
}

/// GET /api/v1/categories/{id}
async fn get_category(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<Category>, ApiError> {
    Ok(ApiResponse::ok(state.category_service.get(id).await?))
}

/// POST /api/v1/categories
async fn create_category(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiJson(body): ApiJson<CreateCategoryRequest>,
) -> Result<ApiResponse<Category>, ApiError> {
    let category = state
        .category_service
        .create(CreateCategoryData {
            name: body.name,
            slug: body.slug,
            description: body.description,
        })
        .await?;

    state
        .audit_service
        .record(
            Some(user.id),
            AuditAction::Create,
            "category",
            category.id,
            Some(json!({ "slug": category.slug })),
            &client,
        )
        .await;
    Ok(ApiResponse::created(category))
}

/// PUT /api/v1/categories/{id}
async fn update_category(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateCategoryRequest>,
) -> Result<ApiResponse<Category>, ApiError> {
    let category = state
        .category_service
        .update(
            id,
            UpdateCategoryInput {
                name: body.name,
                slug: body.slug,
                description: body.description,
                is_active: body.is_active,
            },
        )
        .await?;

    state
        .audit_service
        .record(Some(user.id), AuditAction::Update, "category", id, None, &client)
        .await;
    Ok(ApiResponse::ok(category))
}

/// DELETE /api/v1/categories/{id}
async fn delete_category(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<()>, ApiError> {
    state.category_service.delete(id).await?;
    state
        .audit_service
        .record(Some(user.id), AuditAction::Delete, "category", id, None, &client)
        .await;
    Ok(ApiResponse::message("Category deleted successfully"))
}
