//! API middleware
//!
//! Contains middleware for:
//! - Authentication (Bearer access token validation)
//! - Authorization (superuser checks)
//! - Per-client request rate limiting
//! - Request logging with an `X-Process-Time` header
//!
//! Also home to [`ApiError`], the error envelope every handler returns.

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::Cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxAuditLogRepository, SqlxCategoryRepository, SqlxPostRepository, SqlxProductRepository,
    SqlxTagRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    AuditService, AuditServiceError, CategoryService, CategoryServiceError, ClientInfo,
    LoginRateLimiter, PostService, PostServiceError, ProductService, ProductServiceError,
    RequestRateLimiter, TagService, TagServiceError, TokenService, UserService,
    UserServiceError,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub cache: Arc<Cache>,
    pub user_service: Arc<UserService>,
    pub post_service: Arc<PostService>,
    pub tag_service: Arc<TagService>,
    pub category_service: Arc<CategoryService>,
    pub product_service: Arc<ProductService>,
    pub audit_service: Arc<AuditService>,
    pub request_limiter: Arc<RequestRateLimiter>,
    pub login_limiter: Arc<LoginRateLimiter>,
}

impl AppState {
    /// Wire repositories and services over a migrated pool
    pub fn new(config: Config, pool: DynDatabasePool, cache: Arc<Cache>) -> Self {
        let login_limiter = Arc::new(LoginRateLimiter::new());
        let request_limiter = Arc::new(RequestRateLimiter::new(
            config.app.rate_limit_requests,
            config.app.rate_limit_window,
        ));

        let tag_repo = SqlxTagRepository::boxed(pool.clone());
        let category_repo = SqlxCategoryRepository::boxed(pool.clone());

        let user_service = UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            cache.clone(),
            TokenService::new(&config.security),
            login_limiter.clone(),
        );
        let post_service = PostService::new(
            SqlxPostRepository::boxed(pool.clone()),
            tag_repo.clone(),
            cache.clone(),
        );
        let tag_service = TagService::new(tag_repo, cache.clone());
        let product_service = ProductService::new(
            SqlxProductRepository::boxed(pool.clone()),
            category_repo.clone(),
            cache.clone(),
        );
        let category_service = CategoryService::new(category_repo, cache.clone());
        let audit_service = AuditService::new(SqlxAuditLogRepository::boxed(pool.clone()));

        Self {
            pool,
            config: Arc::new(config),
            cache,
            user_service: Arc::new(user_service),
            post_service: Arc::new(post_service),
            tag_service: Arc::new(tag_service),
            category_service: Arc::new(category_service),
            product_service: Arc::new(product_service),
            audit_service: Arc::new(audit_service),
            request_limiter,
            login_limiter,
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::authentication("Authentication required"))
    }
}

// ============================================================================
// Error envelope
// ============================================================================

/// Error returned by handlers and middleware, rendered as
/// `{error, message, details?, timestamp}`
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

/// Wire shape of [`ApiError`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// HTTP status for an error code. Unknown codes are server errors.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "VALIDATION_ERROR" => StatusCode::UNPROCESSABLE_ENTITY,
        "BAD_REQUEST" => StatusCode::BAD_REQUEST,
        "AUTHENTICATION_ERROR" | "TOKEN_EXPIRED" | "TOKEN_INVALID" | "INVALID_CREDENTIALS" => {
            StatusCode::UNAUTHORIZED
        }
        "AUTHORIZATION_ERROR" | "ACCESS_DENIED" | "NOT_AUTHOR" => StatusCode::FORBIDDEN,
        "NOT_FOUND" | "POST_NOT_FOUND" | "USER_NOT_FOUND" => StatusCode::NOT_FOUND,
        "CONFLICT" | "USER_ALREADY_EXISTS" | "SLUG_ALREADY_EXISTS" => StatusCode::CONFLICT,
        "RATE_LIMIT_EXCEEDED" => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new("AUTHENTICATION_ERROR", message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new("AUTHORIZATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: u64) -> Self {
        Self::new("RATE_LIMIT_EXCEEDED", message)
            .with_details(serde_json::json!({ "retry_after_seconds": retry_after }))
    }

    /// Log the cause and hide it behind a generic message
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {:#}", err);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        status_for_code(self.code)
    }

    fn retry_after(&self) -> Option<u64> {
        self.details
            .as_ref()?
            .get("retry_after_seconds")?
            .as_u64()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();
        let body = ErrorBody {
            error: self.code.to_string(),
            message: self.message,
            details: self.details,
            timestamp: Utc::now(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after.filter(|_| status == StatusCode::TOO_MANY_REQUESTS) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        let message = err.to_string();
        match err {
            UserServiceError::Validation(_) | UserServiceError::Pagination(_) => {
                ApiError::validation(message)
            }
            UserServiceError::EmailTaken | UserServiceError::UsernameTaken => {
                ApiError::new("USER_ALREADY_EXISTS", message)
            }
            UserServiceError::InvalidCredentials => ApiError::new("INVALID_CREDENTIALS", message),
            UserServiceError::TooManyAttempts { retry_after } => ApiError::rate_limited(
                "Too many failed login attempts, try again later",
                retry_after,
            ),
            UserServiceError::TokenExpired => ApiError::new("TOKEN_EXPIRED", message),
            UserServiceError::TokenInvalid => ApiError::new("TOKEN_INVALID", message),
            UserServiceError::Inactive => ApiError::authentication(message),
            UserServiceError::NotFound => ApiError::new("USER_NOT_FOUND", message),
            UserServiceError::CannotDeleteSelf => ApiError::bad_request(message),
            UserServiceError::Internal(e) => ApiError::internal(e),
        }
    }
}

impl From<PostServiceError> for ApiError {
    fn from(err: PostServiceError) -> Self {
        let message = err.to_string();
        match err {
            PostServiceError::Validation(_) | PostServiceError::Pagination(_) => {
                ApiError::validation(message)
            }
            PostServiceError::NotFound => ApiError::new("POST_NOT_FOUND", message),
            PostServiceError::SlugTaken => ApiError::new("SLUG_ALREADY_EXISTS", message),
            PostServiceError::TagNotFound(_) => ApiError::not_found(message),
            PostServiceError::AccessDenied => ApiError::new("ACCESS_DENIED", message),
            PostServiceError::NotAuthor => ApiError::new("NOT_AUTHOR", message),
            PostServiceError::Internal(e) => ApiError::internal(e),
        }
    }
}

impl From<TagServiceError> for ApiError {
    fn from(err: TagServiceError) -> Self {
        let message = err.to_string();
        match err {
            TagServiceError::Validation(_) | TagServiceError::Pagination(_) => {
                ApiError::validation(message)
            }
            TagServiceError::NotFound => ApiError::not_found(message),
            TagServiceError::NameTaken(_) => ApiError::conflict(message),
            TagServiceError::Internal(e) => ApiError::internal(e),
        }
    }
}

impl From<CategoryServiceError> for ApiError {
    fn from(err: CategoryServiceError) -> Self {
        let message = err.to_string();
        match err {
            CategoryServiceError::Validation(_) | CategoryServiceError::Pagination(_) => {
                ApiError::validation(message)
            }
            CategoryServiceError::NotFound => ApiError::not_found(message),
            CategoryServiceError::NameTaken(_) => ApiError::conflict(message),
            CategoryServiceError::SlugTaken(_) => ApiError::new("SLUG_ALREADY_EXISTS", message),
            CategoryServiceError::Internal(e) => ApiError::internal(e),
        }
    }
}

impl From<ProductServiceError> for ApiError {
    fn from(err: ProductServiceError) -> Self {
        let message = err.to_string();
        match err {
            ProductServiceError::Validation(_) | ProductServiceError::Pagination(_) => {
                ApiError::validation(message)
            }
            ProductServiceError::NotFound | ProductServiceError::CategoryNotFound => {
                ApiError::not_found(message)
            }
            ProductServiceError::SkuTaken(_) => ApiError::conflict(message),
            ProductServiceError::Internal(e) => ApiError::internal(e),
        }
    }
}

impl From<AuditServiceError> for ApiError {
    fn from(err: AuditServiceError) -> Self {
        match err {
            AuditServiceError::Pagination(e) => ApiError::validation(e.to_string()),
            AuditServiceError::Internal(e) => ApiError::internal(e),
        }
    }
}

// ============================================================================
// Client identification
// ============================================================================

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer. Falls back to the unspecified address when none is known.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    let forwarded: Option<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real_ip = || -> Option<IpAddr> {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn peer_addr(parts_extensions: &axum::http::Extensions) -> Option<SocketAddr> {
    parts_extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = client_ip(&parts.headers, peer_addr(&parts.extensions));
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ClientInfo {
            ip_address: (!ip.is_unspecified()).then(|| ip.to_string()),
            user_agent,
        })
    }
}

/// Extract the Bearer token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

// ============================================================================
// Middleware
// ============================================================================

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::authentication("Not authenticated"))?
        .to_string();

    let user = state.user_service.authenticate(&token).await?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Superuser authorization middleware; runs after [`require_auth`]
pub async fn require_superuser(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::authentication("Authentication required"))?;

    if !user.0.is_superuser {
        return Err(ApiError::authorization("Superuser privileges required"));
    }

    Ok(next.run(request).await)
}

/// Per-client request limit. `/health` is never counted.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let ip = client_ip(request.headers(), peer_addr(request.extensions()));
    if let Err(retry_after) = state.request_limiter.check(ip).await {
        tracing::warn!(client = %ip, retry_after, "Rate limit exceeded");
        return Err(ApiError::rate_limited(
            "Too many requests, please slow down",
            retry_after,
        ));
    }

    Ok(next.run(request).await)
}

/// Request log middleware
///
/// Logs method, path, status and duration, and reports the duration in
/// seconds through `X-Process-Time`.
pub async fn request_log(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    tracing::info!(
        %method,
        path = %path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
        response.headers_mut().insert("x-process-time", value);
    }
    response
}

/// Fallback for unmatched routes
pub async fn not_found() -> ApiError {
    ApiError::not_found("The requested resource was not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_extract_bearer_token() {
        let map = headers(&[("authorization", "Bearer abc.def")]);
        assert_eq!(extract_bearer_token(&map), Some("abc.def"));
    }

    #[test]
    fn test_extract_bearer_token_rejects_other_schemes() {
        assert_eq!(extract_bearer_token(&headers(&[("authorization", "Basic xyz")])), None);
        assert_eq!(extract_bearer_token(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();

        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&map, Some(peer)), "203.0.113.7".parse::<IpAddr>().unwrap());

        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&map, Some(peer)), "198.51.100.2".parse::<IpAddr>().unwrap());

        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), peer.ip());
        assert!(client_ip(&HeaderMap::new(), None).is_unspecified());
    }

    #[test]
    fn test_status_table() {
        assert_eq!(status_for_code("VALIDATION_ERROR"), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for_code("TOKEN_EXPIRED"), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for_code("NOT_AUTHOR"), StatusCode::FORBIDDEN);
        assert_eq!(status_for_code("USER_NOT_FOUND"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("SLUG_ALREADY_EXISTS"), StatusCode::CONFLICT);
        assert_eq!(status_for_code("RATE_LIMIT_EXCEEDED"), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for_code("SOMETHING_ELSE"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::rate_limited("slow down", 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err: ApiError = PostServiceError::Internal(anyhow::anyhow!("db exploded")).into();
        assert_eq!(err.code, "INTERNAL_ERROR");
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn test_service_error_mapping() {
        let err: ApiError = UserServiceError::EmailTaken.into();
        assert_eq!(err.code, "USER_ALREADY_EXISTS");
        assert_eq!(err.message, "Email already registered");

        let err: ApiError = UserServiceError::TooManyAttempts { retry_after: 30 }.into();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);

        let err: ApiError = PostServiceError::NotFound.into();
        assert_eq!(err.code, "POST_NOT_FOUND");

        let err: ApiError = TagServiceError::NameTaken("rust".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
