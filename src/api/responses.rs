//! Shared API response types
//!
//! Every successful response is wrapped in [`ApiResponse`]:
//! `{data, success, message?, timestamp}`. Lists carry a `Page<T>` as data.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::User;
use crate::services::LoginOutcome;

/// Success envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    status: StatusCode,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data,
            success: true,
            message: None,
            timestamp: Utc::now(),
            status: StatusCode::OK,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(data)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    /// `{data: null, message}` for operations with nothing to return
    pub fn message(message: impl Into<String>) -> Self {
        Self::ok(()).with_message(message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

// ============================================================================
// Auth Response Types
// ============================================================================

/// Public view of a user; the password hash never leaves the service
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            full_name: user.full_name,
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            is_verified: user.is_verified,
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

impl From<LoginOutcome> for TokenResponse {
    fn from(outcome: LoginOutcome) -> Self {
        Self {
            access_token: outcome.access_token,
            token_type: "bearer".to_string(),
            expires_in: outcome.expires_in,
            user: outcome.user.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_user;

    #[test]
    fn test_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::ok(vec![1, 2])).unwrap();
        assert_eq!(value["data"], serde_json::json!([1, 2]));
        assert_eq!(value["success"], true);
        assert!(value.get("message").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_message_envelope_has_null_data() {
        let value = serde_json::to_value(ApiResponse::message("Post deleted")).unwrap();
        assert!(value["data"].is_null());
        assert_eq!(value["message"], "Post deleted");
    }

    #[test]
    fn test_created_status() {
        let response = ApiResponse::created("x").into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_user_response_omits_hash() {
        let value = serde_json::to_value(UserResponse::from(sample_user(false))).unwrap();
        assert!(value.get("hashed_password").is_none());
        assert!(value.get("email").is_some());
    }
}
