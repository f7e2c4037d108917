//! User service
//!
//! Registration, login, token authentication and profile management.
//!
//! - The first account registered becomes a superuser so a fresh install
//!   can manage tags and the catalog.
//! - Emails are stored lowercase; login looks them up the same way.
//! - Authenticated users are cached under `user:{id}`. The cached copy never
//!   carries the password hash, so writes always reload from the database.

use crate::cache::{self, Cache, CacheKeyBuilder};
use crate::db::repositories::{is_unique_violation, UserRepository};
use crate::models::{CreateUserInput, Page, PaginationError, QueryParams, User, UserFilter};
use crate::services::password::{hash_password, verify_password};
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::token::{TokenError, TokenService};
use crate::services::validation::{self, FULL_NAME_MAX_LEN};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Pagination(#[from] PaginationError),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Too many failed login attempts")]
    TooManyAttempts { retry_after: u64 },

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    /// Token was valid but its user is gone or disabled
    #[error("User not found or inactive")]
    Inactive,

    #[error("User not found")]
    NotFound,

    #[error("You cannot delete your own account")]
    CannotDeleteSelf,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for UserServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => UserServiceError::TokenExpired,
            TokenError::Invalid => UserServiceError::TokenInvalid,
            TokenError::Signing(msg) => UserServiceError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// Partial profile update; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct UpdateProfileInput {
    pub email: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
}

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    pub expires_in: i64,
    pub user: User,
}

pub struct UserService {
    repo: Arc<dyn UserRepository>,
    cache: Arc<Cache>,
    tokens: TokenService,
    login_limiter: Arc<LoginRateLimiter>,
}

impl UserService {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        cache: Arc<Cache>,
        tokens: TokenService,
        login_limiter: Arc<LoginRateLimiter>,
    ) -> Self {
        Self {
            repo,
            cache,
            tokens,
            login_limiter,
        }
    }

    /// Register a new account
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let email = input.email.trim().to_lowercase();
        validation::email(&email).map_err(UserServiceError::Validation)?;
        validation::username(&input.username).map_err(UserServiceError::Validation)?;
        validation::optional_max_len("Full name", input.full_name.as_deref(), FULL_NAME_MAX_LEN)
            .map_err(UserServiceError::Validation)?;
        validation::password_strength(&input.password).map_err(UserServiceError::Validation)?;

        if self.repo.exists_by_email(&email, None).await? {
            return Err(UserServiceError::EmailTaken);
        }
        if self.repo.exists_by_username(&input.username, None).await? {
            return Err(UserServiceError::UsernameTaken);
        }

        let hashed_password = hash_password(&input.password)?;
        let user = match self
            .repo
            .create_promoting_first(&CreateUserInput {
                email: email.clone(),
                username: input.username,
                full_name: input.full_name,
                hashed_password,
                is_superuser: false,
            })
            .await
        {
            Ok(user) => user,
            Err(e) => return Err(self.conflict_or_internal(e, &email, None).await),
        };

        tracing::info!(user_id = %user.id, superuser = user.is_superuser, "User registered: {}", user.username);
        Ok(user)
    }

    /// Check credentials and issue an access token
    pub async fn login(&self, input: LoginInput) -> Result<LoginOutcome, UserServiceError> {
        let email = input.email.trim().to_lowercase();

        if let Err(retry_after) = self.login_limiter.check(&email).await {
            tracing::warn!("Login throttled for {}", email);
            return Err(UserServiceError::TooManyAttempts { retry_after });
        }

        let user = match self.repo.get_by_email(&email).await? {
            Some(user) if user.can_authenticate() => user,
            _ => {
                tracing::warn!("Login failed for unknown or inactive account: {}", email);
                self.login_limiter.record_failed_attempt(&email).await;
                return Err(UserServiceError::InvalidCredentials);
            }
        };

        if !verify_password(&input.password, &user.hashed_password)? {
            tracing::warn!("Invalid password for {}", email);
            self.login_limiter.record_failed_attempt(&email).await;
            return Err(UserServiceError::InvalidCredentials);
        }

        self.login_limiter.clear(&email).await;

        let now = Utc::now();
        self.repo.update_last_login(user.id, now).await?;
        cache::invalidate(&self.cache, &[&CacheKeyBuilder::user(user.id)]).await;

        let access_token = self.tokens.create_access_token(&user)?;
        tracing::info!(user_id = %user.id, "User logged in");

        Ok(LoginOutcome {
            access_token,
            expires_in: self.tokens.expires_in(),
            user: User {
                last_login: Some(now),
                ..user
            },
        })
    }

    /// Resolve a bearer token to a live, active user
    pub async fn authenticate(&self, token: &str) -> Result<User, UserServiceError> {
        let claims = self.tokens.decode_access_token(token)?;
        let user_id = claims.user_id()?;

        let user = match self.cached_user(user_id).await? {
            Some(user) => user,
            None => return Err(UserServiceError::Inactive),
        };
        if !user.can_authenticate() {
            return Err(UserServiceError::Inactive);
        }
        Ok(user)
    }

    /// Turn a UNIQUE index rejection into the taken-email or taken-username
    /// error. Both columns are unique, so the email is rechecked to tell
    /// them apart.
    async fn conflict_or_internal(
        &self,
        err: anyhow::Error,
        email: &str,
        exclude: Option<Uuid>,
    ) -> UserServiceError {
        if !is_unique_violation(&err) {
            return err.into();
        }
        match self.repo.exists_by_email(email, exclude).await {
            Ok(true) => UserServiceError::EmailTaken,
            Ok(false) => UserServiceError::UsernameTaken,
            Err(e) => e.into(),
        }
    }

    async fn cached_user(&self, id: Uuid) -> Result<Option<User>, UserServiceError> {
        let key = CacheKeyBuilder::user(id);
        if let Some(user) = cache::get_or_log::<User>(&self.cache, &key).await {
            return Ok(Some(user));
        }

        let user = self.repo.get_by_id(id).await?;
        if let Some(ref user) = user {
            cache::set_or_log(&self.cache, &key, user, self.cache.default_ttl()).await;
        }
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, UserServiceError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or(UserServiceError::NotFound)
    }

    pub async fn list_users(
        &self,
        params: &QueryParams,
        filter: &UserFilter,
    ) -> Result<Page<User>, UserServiceError> {
        params.validate()?;
        Ok(self.repo.list(params, filter).await?)
    }

    /// Apply a partial profile update for `user_id`
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self.get_user(user_id).await?;

        if let Some(email) = input.email {
            let email = email.trim().to_lowercase();
            validation::email(&email).map_err(UserServiceError::Validation)?;
            if email != user.email && self.repo.exists_by_email(&email, Some(user.id)).await? {
                return Err(UserServiceError::EmailTaken);
            }
            user.email = email;
        }

        if let Some(username) = input.username {
            validation::username(&username).map_err(UserServiceError::Validation)?;
            if username != user.username
                && self.repo.exists_by_username(&username, Some(user.id)).await?
            {
                return Err(UserServiceError::UsernameTaken);
            }
            user.username = username;
        }

        if let Some(full_name) = input.full_name {
            validation::max_len("Full name", &full_name, FULL_NAME_MAX_LEN)
                .map_err(UserServiceError::Validation)?;
            user.full_name = Some(full_name);
        }

        if let Some(password) = input.password {
            validation::password_strength(&password).map_err(UserServiceError::Validation)?;
            user.hashed_password = hash_password(&password)?;
        }

        let updated = match self.repo.update(&user).await {
            Ok(updated) => updated,
            Err(e) => return Err(self.conflict_or_internal(e, &user.email, Some(user.id)).await),
        };
        cache::invalidate(&self.cache, &[&CacheKeyBuilder::user(user_id)]).await;

        tracing::info!(user_id = %user_id, "Profile updated");
        Ok(updated)
    }

    /// Soft delete another account. Deleting an already deleted user succeeds.
    pub async fn delete_user(&self, actor: &User, id: Uuid) -> Result<(), UserServiceError> {
        if actor.id == id {
            return Err(UserServiceError::CannotDeleteSelf);
        }

        let user = self
            .repo
            .find_by_id_with_deleted(id)
            .await?
            .ok_or(UserServiceError::NotFound)?;
        if user.is_deleted {
            return Ok(());
        }

        self.repo.soft_delete(id).await?;
        cache::invalidate(&self.cache, &[&CacheKeyBuilder::user(id)]).await;

        tracing::info!(user_id = %id, actor = %actor.id, "User deleted");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::config::{CacheConfig, SecurityConfig};
    use crate::db::repositories::SqlxUserRepository;
    use crate::db::{create_test_pool, migrations, DynDatabasePool};

    pub(crate) async fn setup_user_service() -> (DynDatabasePool, UserService) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let cache = create_cache(&CacheConfig::default()).await.unwrap();
        let service = UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            cache,
            TokenService::new(&SecurityConfig::default()),
            Arc::new(LoginRateLimiter::new()),
        );
        (pool, service)
    }

    pub(crate) fn register_input(name: &str) -> RegisterInput {
        RegisterInput {
            email: format!("{}@Example.com", name),
            username: name.to_string(),
            full_name: None,
            password: "Secret123".to_string(),
        }
    }

    fn login_input(name: &str, password: &str) -> LoginInput {
        LoginInput {
            email: format!("{}@example.com", name),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_first_user_is_superuser() {
        let (_pool, service) = setup_user_service().await;

        let first = service.register(register_input("alice")).await.unwrap();
        let second = service.register(register_input("bob")).await.unwrap();

        assert!(first.is_superuser);
        assert!(!second.is_superuser);
        assert_eq!(first.email, "alice@example.com");
        assert!(first.hashed_password.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn test_concurrent_first_registrations_promote_one_superuser() {
        let (_pool, service) = setup_user_service().await;

        let (alpha, beta) = tokio::join!(
            service.register(register_input("alpha")),
            service.register(register_input("beta")),
        );
        let (alpha, beta) = (alpha.unwrap(), beta.unwrap());

        assert!(alpha.is_superuser ^ beta.is_superuser);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_registration_is_a_conflict() {
        let (_pool, service) = setup_user_service().await;

        let mut same_email = register_input("alice2");
        same_email.email = "alice@example.com".to_string();
        let (a, b) = tokio::join!(
            service.register(register_input("alice")),
            service.register(same_email),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(UserServiceError::EmailTaken))));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let (_pool, service) = setup_user_service().await;
        service.register(register_input("alice")).await.unwrap();

        let mut same_email = register_input("alice2");
        same_email.email = "ALICE@example.com".to_string();
        assert!(matches!(
            service.register(same_email).await,
            Err(UserServiceError::EmailTaken)
        ));

        let mut same_name = register_input("alice");
        same_name.email = "other@example.com".to_string();
        assert!(matches!(
            service.register(same_name).await,
            Err(UserServiceError::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let (_pool, service) = setup_user_service().await;

        let mut weak = register_input("alice");
        weak.password = "password".to_string();
        assert!(matches!(service.register(weak).await, Err(UserServiceError::Validation(_))));

        let mut bad_email = register_input("alice");
        bad_email.email = "nope".to_string();
        assert!(matches!(
            service.register(bad_email).await,
            Err(UserServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_and_authenticate() {
        let (_pool, service) = setup_user_service().await;
        let user = service.register(register_input("alice")).await.unwrap();

        let outcome = service.login(login_input("ALICE", "Secret123")).await.unwrap();
        assert_eq!(outcome.expires_in, 1800);
        assert!(outcome.user.last_login.is_some());

        let authed = service.authenticate(&outcome.access_token).await.unwrap();
        assert_eq!(authed.id, user.id);

        assert!(matches!(
            service.authenticate("garbage").await,
            Err(UserServiceError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_login_wrong_password_and_unknown_email() {
        let (_pool, service) = setup_user_service().await;
        service.register(register_input("alice")).await.unwrap();

        assert!(matches!(
            service.login(login_input("alice", "Wrong1234")).await,
            Err(UserServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            service.login(login_input("nobody", "Secret123")).await,
            Err(UserServiceError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_login_throttled_after_repeated_failures() {
        let (_pool, service) = setup_user_service().await;
        service.register(register_input("alice")).await.unwrap();

        for _ in 0..5 {
            let _ = service.login(login_input("alice", "Wrong1234")).await;
        }
        assert!(matches!(
            service.login(login_input("alice", "Secret123")).await,
            Err(UserServiceError::TooManyAttempts { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_profile_keeps_password_and_checks_uniqueness() {
        let (_pool, service) = setup_user_service().await;
        let alice = service.register(register_input("alice")).await.unwrap();
        service.register(register_input("bob")).await.unwrap();

        // Warm the cache with a hash-less copy
        let token = service.login(login_input("alice", "Secret123")).await.unwrap().access_token;
        service.authenticate(&token).await.unwrap();

        let updated = service
            .update_profile(
                alice.id,
                UpdateProfileInput {
                    full_name: Some("Alice Liddell".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Alice Liddell"));
        assert!(service.login(login_input("alice", "Secret123")).await.is_ok());

        let taken = service
            .update_profile(
                alice.id,
                UpdateProfileInput {
                    username: Some("bob".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(UserServiceError::UsernameTaken)));

        service
            .update_profile(
                alice.id,
                UpdateProfileInput {
                    password: Some("NewSecret456".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(service.login(login_input("alice", "NewSecret456")).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_user_is_idempotent_and_blocks_login() {
        let (_pool, service) = setup_user_service().await;
        let admin = service.register(register_input("admin")).await.unwrap();
        let bob = service.register(register_input("bob")).await.unwrap();
        let token = service.login(login_input("bob", "Secret123")).await.unwrap().access_token;

        service.delete_user(&admin, bob.id).await.unwrap();
        service.delete_user(&admin, bob.id).await.unwrap();

        assert!(matches!(service.get_user(bob.id).await, Err(UserServiceError::NotFound)));
        assert!(matches!(
            service.authenticate(&token).await,
            Err(UserServiceError::Inactive)
        ));
        assert!(matches!(
            service.delete_user(&admin, admin.id).await,
            Err(UserServiceError::CannotDeleteSelf)
        ));
        assert!(matches!(
            service.delete_user(&admin, Uuid::new_v4()).await,
            Err(UserServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_users_validates_params() {
        let (_pool, service) = setup_user_service().await;
        let result = service
            .list_users(&QueryParams::new(1, 101), &UserFilter::default())
            .await;
        assert!(matches!(result, Err(UserServiceError::Pagination(_))));
    }
}
