//! Category repository
//!
//! Database operations for product categories.
//!
//! This module provides:
//! - `CategoryRepository` trait defining the interface for category data access
//! - `SqlxCategoryRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::query::{fetch_page_mysql, fetch_page_sqlite, ListQuery};
use crate::db::DynDatabasePool;
use crate::models::{Category, CreateCategoryInput, Page, QueryParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::parse_uuid;

const CATEGORY_COLUMNS: &str =
    "id, name, slug, description, is_active, created_at, updated_at, is_deleted, deleted_at";

pub const CATEGORY_SEARCH_COLUMNS: &[&str] = &["name", "description"];
pub const CATEGORY_SORT_COLUMNS: &[&str] = &["name", "created_at"];

/// Category repository trait
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Create a new category
    async fn create(&self, input: &CreateCategoryInput) -> Result<Category>;

    /// Get a live category by ID
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Category>>;

    /// Get a category by ID, soft-deleted or not
    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Category>>;

    /// Check if a category name is taken by any row other than `exclude`
    async fn exists_by_name(&self, name: &str, exclude: Option<Uuid>) -> Result<bool>;

    /// Check if a category slug is taken by any row other than `exclude`
    async fn exists_by_slug(&self, slug: &str, exclude: Option<Uuid>) -> Result<bool>;

    /// Update a category
    async fn update(&self, category: &Category) -> Result<Category>;

    /// Soft delete; returns false when the category was not live
    async fn soft_delete(&self, id: Uuid) -> Result<bool>;

    /// List live categories
    async fn list(&self, params: &QueryParams) -> Result<Page<Category>>;
}

/// SQLx-based category repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxCategoryRepository {
    pool: DynDatabasePool,
}

impl SqlxCategoryRepository {
    /// Create a new SQLx category repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CategoryRepository> {
        Arc::new(Self::new(pool))
    }

    async fn exists_by(&self, sql: &str, value: &str, exclude: Option<Uuid>) -> Result<bool> {
        let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(value)
                .bind(&exclude)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check category uniqueness")?
                .try_get::<i64, _>(0)?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(value)
                .bind(&exclude)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check category uniqueness")?
                .try_get::<i64, _>(0)?,
        };
        Ok(count > 0)
    }
}

#[async_trait]
impl CategoryRepository for SqlxCategoryRepository {
    async fn create(&self, input: &CreateCategoryInput) -> Result<Category> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_category_sqlite(sqlite(&self.pool)?, input).await,
            DatabaseDriver::Mysql => create_category_mysql(mysql(&self.pool)?, input).await,
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Category>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_category_by_id_sqlite(sqlite(&self.pool)?, id, false).await,
            DatabaseDriver::Mysql => get_category_by_id_mysql(mysql(&self.pool)?, id, false).await,
        }
    }

    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Category>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_category_by_id_sqlite(sqlite(&self.pool)?, id, true).await,
            DatabaseDriver::Mysql => get_category_by_id_mysql(mysql(&self.pool)?, id, true).await,
        }
    }

    async fn exists_by_name(&self, name: &str, exclude: Option<Uuid>) -> Result<bool> {
        self.exists_by("SELECT COUNT(*) FROM categories WHERE name = ? AND id <> ?", name, exclude)
            .await
    }

    async fn exists_by_slug(&self, slug: &str, exclude: Option<Uuid>) -> Result<bool> {
        self.exists_by("SELECT COUNT(*) FROM categories WHERE slug = ? AND id <> ?", slug, exclude)
            .await
    }

    async fn update(&self, category: &Category) -> Result<Category> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_category_sqlite(sqlite(&self.pool)?, category).await,
            DatabaseDriver::Mysql => update_category_mysql(mysql(&self.pool)?, category).await,
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let sql = "UPDATE categories SET is_deleted = 1, deleted_at = ?, updated_at = ? \
                   WHERE id = ? AND is_deleted = 0";
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to delete category")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to delete category")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list(&self, params: &QueryParams) -> Result<Page<Category>> {
        let query = ListQuery::new("categories", CATEGORY_COLUMNS)
            .sortable(CATEGORY_SORT_COLUMNS)
            .paginate(params, CATEGORY_SEARCH_COLUMNS)
            .build();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_page_sqlite(sqlite(&self.pool)?, &query, row_to_category_sqlite).await
            }
            DatabaseDriver::Mysql => {
                fetch_page_mysql(mysql(&self.pool)?, &query, row_to_category_mysql).await
            }
        }
    }
}

fn new_category(input: &CreateCategoryInput) -> Category {
    let now = Utc::now();
    Category {
        id: Uuid::new_v4(),
        name: input.name.clone(),
        slug: input.slug.clone(),
        description: input.description.clone(),
        is_active: true,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

const INSERT_CATEGORY: &str = r#"
    INSERT INTO categories (id, name, slug, description, is_active, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_CATEGORY: &str = r#"
    UPDATE categories
    SET name = ?, slug = ?, description = ?, is_active = ?, updated_at = ?
    WHERE id = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_category_sqlite(pool: &SqlitePool, input: &CreateCategoryInput) -> Result<Category> {
    let category = new_category(input);

    sqlx::query(INSERT_CATEGORY)
        .bind(category.id.to_string())
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.is_active)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(pool)
        .await
        .context("Failed to create category")?;

    Ok(category)
}

async fn get_category_by_id_sqlite(
    pool: &SqlitePool,
    id: Uuid,
    with_deleted: bool,
) -> Result<Option<Category>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS)
    } else {
        format!("SELECT {} FROM categories WHERE id = ? AND is_deleted = 0", CATEGORY_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get category by ID")?;

    row.as_ref().map(row_to_category_sqlite).transpose()
}

async fn update_category_sqlite(pool: &SqlitePool, category: &Category) -> Result<Category> {
    let now = Utc::now();

    sqlx::query(UPDATE_CATEGORY)
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.is_active)
        .bind(now)
        .bind(category.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update category")?;

    Ok(Category {
        updated_at: now,
        ..category.clone()
    })
}

fn row_to_category_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Category> {
    Ok(Category {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_category_mysql(pool: &MySqlPool, input: &CreateCategoryInput) -> Result<Category> {
    let category = new_category(input);

    sqlx::query(INSERT_CATEGORY)
        .bind(category.id.to_string())
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.is_active)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(pool)
        .await
        .context("Failed to create category")?;

    Ok(category)
}

async fn get_category_by_id_mysql(
    pool: &MySqlPool,
    id: Uuid,
    with_deleted: bool,
) -> Result<Option<Category>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS)
    } else {
        format!("SELECT {} FROM categories WHERE id = ? AND is_deleted = 0", CATEGORY_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get category by ID")?;

    row.as_ref().map(row_to_category_mysql).transpose()
}

async fn update_category_mysql(pool: &MySqlPool, category: &Category) -> Result<Category> {
    let now = Utc::now();

    sqlx::query(UPDATE_CATEGORY)
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.is_active)
        .bind(now)
        .bind(category.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update category")?;

    Ok(Category {
        updated_at: now,
        ..category.clone()
    })
}

fn row_to_category_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Category> {
    Ok(Category {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
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

    async fn setup_test_repo() -> (DynDatabasePool, SqlxCategoryRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxCategoryRepository::new(pool.clone());
        (pool, repo)
    }

    fn input(name: &str, slug: &str) -> CreateCategoryInput {
        CreateCategoryInput {
            name: name.to_string(),
            slug: slug.to_string(),
            description: Some(format!("All about {}", name)),
        }
    }

    #[tokio::test]
    async fn test_create_category() {
        let (_pool, repo) = setup_test_repo().await;
        let created = repo.create(&input("Books", "books")).await.unwrap();

        assert!(created.is_active);
        let found = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.slug, "books");
        assert_eq!(found.description.as_deref(), Some("All about Books"));
    }

    #[tokio::test]
    async fn test_exists_by_name_and_slug() {
        let (_pool, repo) = setup_test_repo().await;
        let created = repo.create(&input("Books", "books")).await.unwrap();

        assert!(repo.exists_by_name("Books", None).await.unwrap());
        assert!(repo.exists_by_slug("books", None).await.unwrap());
        assert!(!repo.exists_by_slug("books", Some(created.id)).await.unwrap());
        assert!(!repo.exists_by_name("Music", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_category() {
        let (_pool, repo) = setup_test_repo().await;
        let mut category = repo.create(&input("Books", "books")).await.unwrap();

        category.is_active = false;
        category.name = "Old Books".to_string();
        repo.update(&category).await.unwrap();

        let found = repo.get_by_id(category.id).await.unwrap().unwrap();
        assert!(!found.is_active);
        assert_eq!(found.name, "Old Books");
    }

    #[tokio::test]
    async fn test_soft_delete_category() {
        let (_pool, repo) = setup_test_repo().await;
        let category = repo.create(&input("Books", "books")).await.unwrap();

        assert!(repo.soft_delete(category.id).await.unwrap());
        assert!(!repo.soft_delete(category.id).await.unwrap());
        assert!(repo.get_by_id(category.id).await.unwrap().is_none());

        let page = repo.list(&QueryParams::default()).await.unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&input("Music", "music")).await.unwrap();
        repo.create(&input("Books", "books")).await.unwrap();

        let params = QueryParams::default().with_sort("name", crate::models::SortOrder::Asc);
        let page = repo.list(&params).await.unwrap();
        let names: Vec<_> = page.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Books", "Music"]);
    }
}
