//! Authentication API endpoints
//!
//! Handles HTTP requests for user authentication:
//! - POST /api/v1/auth/register - User registration
//! - POST /api/v1/auth/login - Exchange credentials for an access token
//! - GET /api/v1/auth/me - Get current user
//! - PUT /api/v1/auth/me - Update current user
//! - GET /api/v1/auth/users - List users
//! - GET /api/v1/auth/users/{id} - Get a user
//! - DELETE /api/v1/auth/users/{id} - Delete a user (superuser)

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::common::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, TokenResponse, UserResponse};
use crate::models::{AuditAction, Page, QueryParams, UserFilter};
use crate::services::{ClientInfo, LoginInput, RegisterInput, UpdateProfileInput};

/// Request body for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub password: String,
}

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Partial profile update; absent fields stay unchanged
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_current_user).put(update_current_user))
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user))
}

/// Build superuser auth routes
pub fn admin_router() -> Router<AppState> {
    Router::new().route("/users/{id}", axum::routing::delete(delete_user))
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    client: ClientInfo,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let user = state
        .user_service
        .register(RegisterInput {
            email: body.email,
            username: body.username,
            full_name: body.full_name,
            password: body.password,
        })
        .await?;

    state
        .audit_service
        .record(
            Some(user.id),
            AuditAction::Register,
            "user",
            user.id,
            Some(json!({ "username": user.username })),
            &client,
        )
        .await;

    Ok(ApiResponse::created(user.into()).with_message("User registered successfully"))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<ApiResponse<TokenResponse>, ApiError> {
    let outcome = state
        .user_service
        .login(LoginInput {
            email: body.email,
            password: body.password,
        })
        .await?;

    state
        .audit_service
        .record(
            Some(outcome.user.id),
            AuditAction::Login,
            "user",
            outcome.user.id,
            None,
            &client,
        )
        .await;

    Ok(ApiResponse::ok(outcome.into()))
}

/// GET /api/v1/auth/me
async fn get_current_user(
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResponse<UserResponse> {
    ApiResponse::ok(user.into())
}

/// PUT /api/v1/auth/me
async fn update_current_user(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiJson(body): ApiJson<UpdateProfileRequest>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let password_changed = body.password.is_some();
    let updated = state
        .user_service
        .update_profile(
            user.id,
            UpdateProfileInput {
                email: body.email,
                username: body.username,
                full_name: body.full_name,
                password: body.password,
            },
        )
        .await?;

    state
        .audit_service
        .record(
            Some(user.id),
            AuditAction::Update,
            "user",
            user.id,
            Some(json!({ "password_changed": password_changed })),
            &client,
        )
        .await;

    Ok(ApiResponse::ok(updated.into()))
}

/// GET /api/v1/auth/users
async fn list_users(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueryParams>,
    ApiQuery(filter): ApiQuery<UserFilter>,
) -> Result<ApiResponse<Page<UserResponse>>, ApiError> {
    let page = state.user_service.list_users(&params, &filter).await?;
    Ok(ApiResponse::ok(page.map(UserResponse::from)))
}

/// GET /api/v1/auth/users/{id}
async fn get_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let user = state.user_service.get_user(id).await?;
    Ok(ApiResponse::ok(user.into()))
}

/// DELETE /api/v1/auth/users/{id}
async fn delete_user(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<()>, ApiError> {
    state.user_service.delete_user(&actor, id).await?;
    state
        .audit_service
        .record(Some(actor.id), AuditAction::Delete, "user", id, None, &client)
        .await;
    Ok(ApiResponse::message("User deleted successfully"))
}
