//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::query::{fetch_page_mysql, fetch_page_sqlite, ListQuery};
use crate::db::DynDatabasePool;
use crate::models::{CreateUserInput, Page, QueryParams, User, UserFilter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::parse_uuid;

const USER_COLUMNS: &str = "id, email, username, full_name, hashed_password, is_active, \
     is_superuser, is_verified, last_login, created_at, updated_at, is_deleted, deleted_at";

pub const USER_SEARCH_COLUMNS: &[&str] = &["email", "username", "full_name"];
pub const USER_SORT_COLUMNS: &[&str] = &["created_at", "updated_at", "email", "username", "last_login"];

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, input: &CreateUserInput) -> Result<User>;

    /// Create a user who is a superuser only when the table was empty.
    ///
    /// The emptiness check runs inside the INSERT itself, so concurrent
    /// registrations cannot both see an empty table. `input.is_superuser`
    /// is ignored.
    async fn create_promoting_first(&self, input: &CreateUserInput) -> Result<User>;

    /// Get a live user by ID
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Get a user by ID, soft-deleted or not
    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<User>>;

    /// Get a live user by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Whether the email is taken by any row other than `exclude`
    async fn exists_by_email(&self, email: &str, exclude: Option<Uuid>) -> Result<bool>;

    /// Whether the username is taken by any row other than `exclude`
    async fn exists_by_username(&self, username: &str, exclude: Option<Uuid>) -> Result<bool>;

    /// Persist every mutable column and bump `updated_at`
    async fn update(&self, user: &User) -> Result<User>;

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Soft delete; returns false when the user was not live
    async fn soft_delete(&self, id: Uuid) -> Result<bool>;

    /// List live users
    async fn list(&self, params: &QueryParams, filter: &UserFilter) -> Result<Page<User>>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

fn list_query(params: &QueryParams, filter: &UserFilter) -> ListQuery {
    ListQuery::new("users", USER_COLUMNS)
        .sortable(USER_SORT_COLUMNS)
        .filter_opt("is_active", filter.is_active)
        .filter_opt("is_superuser", filter.is_superuser)
        .paginate(params, USER_SEARCH_COLUMNS)
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, input: &CreateUserInput) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(sqlite(&self.pool)?, input, false).await,
            DatabaseDriver::Mysql => create_user_mysql(mysql(&self.pool)?, input, false).await,
        }
    }

    async fn create_promoting_first(&self, input: &CreateUserInput) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(sqlite(&self.pool)?, input, true).await,
            DatabaseDriver::Mysql => create_user_mysql(mysql(&self.pool)?, input, true).await,
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_id_sqlite(sqlite(&self.pool)?, id, false).await,
            DatabaseDriver::Mysql => get_user_by_id_mysql(mysql(&self.pool)?, id, false).await,
        }
    }

    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_id_sqlite(sqlite(&self.pool)?, id, true).await,
            DatabaseDriver::Mysql => get_user_by_id_mysql(mysql(&self.pool)?, id, true).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_user_by_email_sqlite(sqlite(&self.pool)?, email).await,
            DatabaseDriver::Mysql => get_user_by_email_mysql(mysql(&self.pool)?, email).await,
        }
    }

    async fn exists_by_email(&self, email: &str, exclude: Option<Uuid>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM users WHERE email = ? AND id <> ?";
        let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(email)
                .bind(&exclude)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check email")?
                .try_get::<i64, _>(0)?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(email)
                .bind(&exclude)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check email")?
                .try_get::<i64, _>(0)?,
        };
        Ok(count > 0)
    }

    async fn exists_by_username(&self, username: &str, exclude: Option<Uuid>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM users WHERE username = ? AND id <> ?";
        let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(username)
                .bind(&exclude)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check username")?
                .try_get::<i64, _>(0)?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(username)
                .bind(&exclude)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check username")?
                .try_get::<i64, _>(0)?,
        };
        Ok(count > 0)
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_user_sqlite(sqlite(&self.pool)?, user).await,
            DatabaseDriver::Mysql => update_user_mysql(mysql(&self.pool)?, user).await,
        }
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let sql = "UPDATE users SET last_login = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(sql)
                    .bind(at)
                    .bind(id.to_string())
                    .execute(sqlite(&self.pool)?)
                    .await
                    .context("Failed to update last login")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(sql)
                    .bind(at)
                    .bind(id.to_string())
                    .execute(mysql(&self.pool)?)
                    .await
                    .context("Failed to update last login")?;
            }
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let sql = "UPDATE users SET is_deleted = 1, deleted_at = ?, updated_at = ? \
                   WHERE id = ? AND is_deleted = 0";
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to delete user")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to delete user")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list(&self, params: &QueryParams, filter: &UserFilter) -> Result<Page<User>> {
        let query = list_query(params, filter).build();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_page_sqlite(sqlite(&self.pool)?, &query, row_to_user_sqlite).await
            }
            DatabaseDriver::Mysql => {
                fetch_page_mysql(mysql(&self.pool)?, &query, row_to_user_mysql).await
            }
        }
    }
}

fn new_user(input: &CreateUserInput) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: input.email.clone(),
        username: input.username.clone(),
        full_name: input.full_name.clone(),
        hashed_password: input.hashed_password.clone(),
        is_active: true,
        is_superuser: input.is_superuser,
        is_verified: false,
        last_login: None,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

const INSERT_USER: &str = r#"
    INSERT INTO users (id, email, username, full_name, hashed_password, is_active,
                       is_superuser, is_verified, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const INSERT_USER_PROMOTING_FIRST: &str = r#"
    INSERT INTO users (id, email, username, full_name, hashed_password, is_active,
                       is_superuser, is_verified, created_at, updated_at)
    SELECT ?, ?, ?, ?, ?, ?, NOT EXISTS (SELECT 1 FROM users), ?, ?, ?
"#;

const SELECT_IS_SUPERUSER: &str = "SELECT is_superuser FROM users WHERE id = ?";

const UPDATE_USER: &str = r#"
    UPDATE users
    SET email = ?, username = ?, full_name = ?, hashed_password = ?,
        is_active = ?, is_superuser = ?, is_verified = ?, updated_at = ?
    WHERE id = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(
    pool: &SqlitePool,
    input: &CreateUserInput,
    promote_first: bool,
) -> Result<User> {
    let mut user = new_user(input);

    let sql = if promote_first { INSERT_USER_PROMOTING_FIRST } else { INSERT_USER };
    let mut query = sqlx::query(sql)
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.hashed_password)
        .bind(user.is_active);
    if !promote_first {
        query = query.bind(user.is_superuser);
    }
    query
        .bind(user.is_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    if promote_first {
        user.is_superuser = sqlx::query_scalar(SELECT_IS_SUPERUSER)
            .bind(user.id.to_string())
            .fetch_one(pool)
            .await
            .context("Failed to read superuser flag")?;
    }

    Ok(user)
}

async fn get_user_by_id_sqlite(pool: &SqlitePool, id: Uuid, with_deleted: bool) -> Result<Option<User>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS)
    } else {
        format!("SELECT {} FROM users WHERE id = ? AND is_deleted = 0", USER_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn get_user_by_email_sqlite(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE email = ? AND is_deleted = 0", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by email")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(UPDATE_USER)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.hashed_password)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(user.is_verified)
        .bind(now)
        .bind(user.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update user")?;

    Ok(User {
        updated_at: now,
        ..user.clone()
    })
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        full_name: row.try_get("full_name")?,
        hashed_password: row.try_get("hashed_password")?,
        is_active: row.try_get("is_active")?,
        is_superuser: row.try_get("is_superuser")?,
        is_verified: row.try_get("is_verified")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(
    pool: &MySqlPool,
    input: &CreateUserInput,
    promote_first: bool,
) -> Result<User> {
    let mut user = new_user(input);

    let sql = if promote_first { INSERT_USER_PROMOTING_FIRST } else { INSERT_USER };
    let mut query = sqlx::query(sql)
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.hashed_password)
        .bind(user.is_active);
    if !promote_first {
        query = query.bind(user.is_superuser);
    }
    query
        .bind(user.is_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    if promote_first {
        user.is_superuser = sqlx::query_scalar(SELECT_IS_SUPERUSER)
            .bind(user.id.to_string())
            .fetch_one(pool)
            .await
            .context("Failed to read superuser flag")?;
    }

    Ok(user)
}

async fn get_user_by_id_mysql(pool: &MySqlPool, id: Uuid, with_deleted: bool) -> Result<Option<User>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS)
    } else {
        format!("SELECT {} FROM users WHERE id = ? AND is_deleted = 0", USER_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn get_user_by_email_mysql(pool: &MySqlPool, email: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE email = ? AND is_deleted = 0", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by email")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(UPDATE_USER)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.hashed_password)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(user.is_verified)
        .bind(now)
        .bind(user.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update user")?;

    Ok(User {
        updated_at: now,
        ..user.clone()
    })
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        full_name: row.try_get("full_name")?,
        hashed_password: row.try_get("hashed_password")?,
        is_active: row.try_get("is_active")?,
        is_superuser: row.try_get("is_superuser")?,
        is_verified: row.try_get("is_verified")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> (DynDatabasePool, SqlxUserRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxUserRepository::new(pool.clone());
        (pool, repo)
    }

    fn input(username: &str, email: &str) -> CreateUserInput {
        CreateUserInput {
            email: email.to_string(),
            username: username.to_string(),
            full_name: Some("Test User".to_string()),
            hashed_password: "hash".to_string(),
            is_superuser: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let (_pool, repo) = setup_test_repo().await;
        let created = repo.create(&input("alice", "alice@example.com")).await.unwrap();

        assert!(created.is_active);
        assert!(!created.is_deleted);
        assert_eq!(created.created_at, created.updated_at);

        let found = repo.get_by_id(created.id).await.unwrap().expect("User not found");
        assert_eq!(found.username, "alice");
        assert_eq!(found.hashed_password, "hash");
        assert_eq!(found.full_name.as_deref(), Some("Test User"));
    }

    #[tokio::test]
    async fn test_create_promoting_first_only_promotes_into_empty_table() {
        let (_pool, repo) = setup_test_repo().await;

        let first = repo
            .create_promoting_first(&input("alice", "alice@example.com"))
            .await
            .unwrap();
        assert!(first.is_superuser);

        let mut second_input = input("bob", "bob@example.com");
        second_input.is_superuser = true;
        let second = repo.create_promoting_first(&second_input).await.unwrap();
        assert!(!second.is_superuser);

        let stored = repo.get_by_id(second.id).await.unwrap().unwrap();
        assert!(!stored.is_superuser);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_unique_violation() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&input("alice", "alice@example.com")).await.unwrap();

        let err = repo
            .create(&input("alice2", "alice@example.com"))
            .await
            .unwrap_err();
        assert!(super::super::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_get_by_email() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&input("alice", "alice@example.com")).await.unwrap();

        assert!(repo.get_by_email("alice@example.com").await.unwrap().is_some());
        assert!(repo.get_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exists_checks_exclude_self() {
        let (_pool, repo) = setup_test_repo().await;
        let user = repo.create(&input("alice", "alice@example.com")).await.unwrap();

        assert!(repo.exists_by_email("alice@example.com", None).await.unwrap());
        assert!(!repo.exists_by_email("alice@example.com", Some(user.id)).await.unwrap());
        assert!(repo.exists_by_username("alice", None).await.unwrap());
        assert!(!repo.exists_by_username("bob", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_soft_delete_is_idempotent_and_hides_user() {
        let (_pool, repo) = setup_test_repo().await;
        let user = repo.create(&input("alice", "alice@example.com")).await.unwrap();

        assert!(repo.soft_delete(user.id).await.unwrap());
        assert!(!repo.soft_delete(user.id).await.unwrap());

        assert!(repo.get_by_id(user.id).await.unwrap().is_none());
        assert!(repo.get_by_email("alice@example.com").await.unwrap().is_none());

        let deleted = repo.find_by_id_with_deleted(user.id).await.unwrap().unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.deleted_at.is_some());

        // The email stays reserved
        assert!(repo.exists_by_email("alice@example.com", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_user() {
        let (_pool, repo) = setup_test_repo().await;
        let mut user = repo.create(&input("alice", "alice@example.com")).await.unwrap();

        user.full_name = Some("Alice Liddell".to_string());
        let updated = repo.update(&user).await.unwrap();
        assert!(updated.updated_at >= user.created_at);

        let found = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(found.full_name.as_deref(), Some("Alice Liddell"));
    }

    #[tokio::test]
    async fn test_update_last_login() {
        let (_pool, repo) = setup_test_repo().await;
        let user = repo.create(&input("alice", "alice@example.com")).await.unwrap();

        repo.update_last_login(user.id, Utc::now()).await.unwrap();
        let found = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert!(found.last_login.is_some());
    }

    #[tokio::test]
    async fn test_list_users_with_search_and_filter() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&input("alice", "alice@example.com")).await.unwrap();
        repo.create(&input("bob", "bob@example.com")).await.unwrap();
        let mut admin_input = input("carol", "carol@example.com");
        admin_input.is_superuser = true;
        repo.create(&admin_input).await.unwrap();

        let page = repo
            .list(&QueryParams::new(1, 10), &UserFilter::default())
            .await
            .unwrap();
        assert_eq!(page.meta.total, 3);

        let page = repo
            .list(&QueryParams::new(1, 10).with_search("BOB"), &UserFilter::default())
            .await
            .unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.items[0].username, "bob");

        let filter = UserFilter {
            is_superuser: Some(true),
            ..Default::default()
        };
        let page = repo.list(&QueryParams::new(1, 10), &filter).await.unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.items[0].username, "carol");
    }

    #[tokio::test]
    async fn test_list_respects_page_size() {
        let (_pool, repo) = setup_test_repo().await;
        for i in 0..5 {
            repo.create(&input(&format!("user{}", i), &format!("u{}@example.com", i)))
                .await
                .unwrap();
        }

        let page = repo
            .list(&QueryParams::new(2, 2), &UserFilter::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.meta.total, 5);
        assert_eq!(page.meta.pages, 3);
    }
}
