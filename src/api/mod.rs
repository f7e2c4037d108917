//! API layer - HTTP handlers and routing
//!
//! All business endpoints live under `/api/v1`:
//! - Auth and user endpoints
//! - Post endpoints
//! - Tag, category and product endpoints
//! - Audit log endpoint
//!
//! `/health` and `/` sit at the root.

pub mod audit;
pub mod auth;
pub mod categories;
pub mod common;
pub mod health;
pub mod middleware;
pub mod posts;
pub mod products;
pub mod responses;
pub mod tags;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::CorsConfig;

pub use middleware::{ApiError, AppState, AuthenticatedUser};
pub use responses::ApiResponse;

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Superuser routes
    let admin_routes = Router::new()
        .nest("/auth", auth::admin_router())
        .nest("/tags", tags::admin_router())
        .nest("/categories", categories::admin_router())
        .nest("/products", products::admin_router())
        .nest("/audit-logs", audit::admin_router())
        .route_layer(axum_middleware::from_fn(middleware::require_superuser))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need auth but not superuser)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/posts", posts::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .nest("/auth", auth::public_router())
        .nest("/tags", tags::public_router())
        .nest("/categories", categories::public_router())
        .nest("/products", products::public_router())
        .merge(admin_routes)
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .merge(health::router())
        .nest("/api/v1", build_api_router(state.clone()))
        .fallback(middleware::not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum_middleware::from_fn(middleware::request_log))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::RETRY_AFTER]);

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
