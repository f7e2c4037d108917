//! User model
//!
//! Registered accounts. Regular users manage their own posts; superusers
//! can manage everyone's content plus the tag and catalog data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User entity.
///
/// The password hash is skipped when serializing so a cached or logged
/// user never carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: Uuid,
    /// Email address (unique, stored lowercase)
    pub email: String,
    /// Username (unique)
    pub username: String,
    /// Optional display name
    pub full_name: Option<String>,
    /// Argon2id PHC string
    #[serde(skip_serializing, default)]
    pub hashed_password: String,
    /// Inactive users cannot authenticate
    pub is_active: bool,
    /// Superusers bypass ownership checks
    pub is_superuser: bool,
    pub is_verified: bool,
    /// Last successful login
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft delete flag
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether this user may modify a record owned by `owner_id`
    pub fn can_manage(&self, owner_id: Uuid) -> bool {
        self.is_superuser || self.id == owner_id
    }

    /// Active and not soft-deleted
    pub fn can_authenticate(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

/// Data needed to insert a user (password already hashed)
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub hashed_password: String,
    pub is_superuser: bool,
}

/// Partial update; `None` leaves the column unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateUserInput {
    pub email: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub hashed_password: Option<String>,
}

impl UpdateUserInput {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.username.is_none()
            && self.full_name.is_none()
            && self.hashed_password.is_none()
    }
}

/// Filters accepted by the user listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[cfg(test)]
pub(crate) fn sample_user(is_superuser: bool) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: "sample@example.com".to_string(),
        username: "sample".to_string(),
        full_name: None,
        hashed_password: "hash".to_string(),
        is_active: true,
        is_superuser,
        is_verified: false,
        last_login: None,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_manage_own_records_only() {
        let user = sample_user(false);
        assert!(user.can_manage(user.id));
        assert!(!user.can_manage(Uuid::new_v4()));
    }

    #[test]
    fn test_superuser_can_manage_anything() {
        let admin = sample_user(true);
        assert!(admin.can_manage(Uuid::new_v4()));
    }

    #[test]
    fn test_can_authenticate() {
        let mut user = sample_user(false);
        assert!(user.can_authenticate());
        user.is_active = false;
        assert!(!user.can_authenticate());
        user.is_active = true;
        user.is_deleted = true;
        assert!(!user.can_authenticate());
    }

    #[test]
    fn test_serialization_omits_password_hash() {
        let user = sample_user(false);
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("hashed_password").is_none());

        let back: User = serde_json::from_value(json).unwrap();
        assert_eq!(back.hashed_password, "");
        assert_eq!(back.id, user.id);
    }

    #[test]
    fn test_update_input_is_empty() {
        assert!(UpdateUserInput::default().is_empty());
        let input = UpdateUserInput {
            full_name: Some("New".to_string()),
            ..Default::default()
        };
        assert!(!input.is_empty());
    }
}
