//! Post API endpoints
//!
//! Every route requires authentication:
//! - GET /api/v1/posts - List posts visible to the caller
//! - POST /api/v1/posts - Create post
//! - GET /api/v1/posts/my/posts - List the caller's own posts
//! - GET /api/v1/posts/{id} - Get post with tags
//! - PUT /api/v1/posts/{id} - Update post (author or superuser)
//! - DELETE /api/v1/posts/{id} - Delete post (author or superuser)

use axum::{extract::State, routing::get, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::common::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::ApiResponse;
use crate::models::{AuditAction, Page, Post, PostFilter, PostWithTags, QueryParams};
use crate::services::{ClientInfo, CreatePostData, UpdatePostData};

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    pub slug: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub is_published: Option<bool>,
    pub tag_ids: Option<Vec<Uuid>>,
}

/// Build the post router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/my/posts", get(list_my_posts))
        .route("/{id}", get(get_post).put(update_post).delete(delete_post))
}

/// GET /api/v1/posts
async fn list_posts(
    State(state): State<AppState>,
    AuthenticatedUser(viewer): AuthenticatedUser,
    ApiQuery(params): ApiQuery<QueryParams>,
    ApiQuery(filter): ApiQuery<PostFilter>,
) -> Result<ApiResponse<Page<Post>>, ApiError> {
    let page = state.post_service.list(&viewer, &params, &filter).await?;
    Ok(ApiResponse::ok(page))
}

/// GET /api/v1/posts/my/posts
async fn list_my_posts(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(params): ApiQuery<QueryParams>,
    ApiQuery(filter): ApiQuery<PostFilter>,
) -> Result<ApiResponse<Page<Post>>, ApiError> {
    let page = state.post_service.list_own(&user, &params, &filter).await?;
    Ok(ApiResponse::ok(page))
}

/// POST /api/v1/posts
async fn create_post(
    State(state): State<AppState>,
    AuthenticatedUser(author): AuthenticatedUser,
    client: ClientInfo,
    ApiJson(body): ApiJson<CreatePostRequest>,
) -> Result<ApiResponse<PostWithTags>, ApiError> {
    let post = state
        .post_service
        .create(
            &author,
            CreatePostData {
                title: body.title,
                content: body.content,
                slug: body.slug,
                summary: body.summary,
                is_published: body.is_published,
                tag_ids: body.tag_ids,
            },
        )
        .await?;

    state
        .audit_service
        .record(
            Some(author.id),
            AuditAction::Create,
            "post",
            post.post.id,
            Some(json!({ "slug": post.post.slug })),
            &client,
        )
        .await;

    Ok(ApiResponse::created(post))
}

/// GET /api/v1/posts/{id}
async fn get_post(
    State(state): State<AppState>,
    AuthenticatedUser(viewer): AuthenticatedUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<PostWithTags>, ApiError> {
    let post = state.post_service.get(&viewer, id).await?;
    Ok(ApiResponse::ok(post))
}

/// PUT /api/v1/posts/{id}
async fn update_post(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdatePostRequest>,
) -> Result<ApiResponse<PostWithTags>, ApiError> {
    let post = state
        .post_service
        .update(
            &actor,
            id,
            UpdatePostData {
                title: body.title,
                content: body.content,
                slug: body.slug,
                summary: body.summary,
                is_published: body.is_published,
                tag_ids: body.tag_ids,
            },
        )
        .await?;

    state
        .audit_service
        .record(Some(actor.id), AuditAction::Update, "post", id, None, &client)
        .await;

    Ok(ApiResponse::ok(post))
}

/// DELETE /api/v1/posts/{id}
async fn delete_post(
    State(state): State<AppState>,
    AuthenticatedUser(actor): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<()>, ApiError> {
    state.post_service.delete(&actor, id).await?;
    state
        .audit_service
        .record(Some(actor.id), AuditAction::Delete, "post", id, None, &client)
        .await;
    Ok(ApiResponse::message("Post deleted successfully"))
}
