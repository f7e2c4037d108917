//! Product API endpoints
//!
//! Reads are public; writes require a superuser. The list accepts
//! `category_id`, `is_active`, `min_price`, `max_price` and `in_stock`
//! alongside the usual paging parameters.

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
use crate::models::{
    AuditAction, CreateProductInput, Page, Product, ProductFilter, QueryParams,
    UpdateProductInput,
};
use crate::services::ClientInfo;

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub category_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/{id}", get(get_product))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product))
        .route("/{id}", put(update_product).delete(delete_product))
}

/// GET /api/v1/products
async fn list_products(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<QueryParams>,
    ApiQuery(filter): ApiQuery<ProductFilter>,
) -> Result<ApiResponse<Page<Product>>, ApiError> {
    Ok(ApiResponse::ok(state.product_service.list(&params, &filter).await?))
}

/// GET /api/v1/products/{id}
async fn get_product(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<Product>, ApiError> {
    Ok(ApiResponse::ok(state.product_service.get(id).await?))
}

/// POST /api/v1/products
async fn create_product(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiJson(body): ApiJson<CreateProductRequest>,
) -> Result<ApiResponse<Product>, ApiError> {
    let product = state
        .product_service
        .create(CreateProductInput {
            name: body.name,
            sku: body.sku,
            description: body.description,
            price: body.price,
            stock: body.stock,
            category_id: body.category_id,
        })
        .await?;

    state
        .audit_service
        .record(
            Some(user.id),
            AuditAction::Create,
            "product",
            product.id,
            Some(json!({ "sku": product.sku })),
            &client,
        )
        .await;
    Ok(ApiResponse::created(product))
}

/// PUT /api/v1/products/{id}
async fn update_product(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateProductRequest>,
) -> Result<ApiResponse<Product>, ApiError> {
    let product = state
        .product_service
        .update(
            id,
            UpdateProductInput {
                name: body.name,
                sku: body.sku,
                description: body.description,
                price: body.price,
                stock: body.stock,
                category_id: body.category_id,
                is_active: body.is_active,
            },
        )
        .await?;

    state
        .audit_service
        .record(Some(user.id), AuditAction::Update, "product", id, None, &client)
        .await;
    Ok(ApiResponse::ok(product))
}

/// DELETE /api/v1/products/{id}
async fn delete_product(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    client: ClientInfo,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<ApiResponse<()>, ApiError> {
    state.product_service.delete(id).await?;
    state
        .audit_service
        .record(Some(user.id), AuditAction::Delete, "product", id, None, &client)
        .await;
    Ok(ApiResponse::message("Product deleted successfully"))
}
