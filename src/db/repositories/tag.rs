//! Tag repository
//!
//! Database operations for tags and the `post_tags` association table.
//!
//! This module provides:
//! - `TagRepository` trait defining the interface for tag data access
//! - `SqlxTagRepository` implementing the trait for SQLite and MySQL

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::query::{fetch_page_mysql, fetch_page_sqlite, ListQuery};
use crate::db::DynDatabasePool;
use crate::models::{CreateTagInput, Page, QueryParams, Tag, TagWithCount};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::parse_uuid;

const TAG_COLUMNS: &str = "id, name, description, color, created_at, updated_at, is_deleted, deleted_at";

const TAG_WITH_COUNT_COLUMNS: &str = "id, name, description, color, created_at, updated_at, \
     is_deleted, deleted_at, \
     (SELECT COUNT(*) FROM post_tags pt JOIN posts p ON p.id = pt.post_id \
      WHERE pt.tag_id = tags.id AND p.is_deleted = 0) AS post_count";

pub const TAG_SEARCH_COLUMNS: &[&str] = &["name", "description"];
pub const TAG_SORT_COLUMNS: &[&str] = &["name", "created_at", "updated_at"];

/// Tag repository trait
#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn create(&self, input: &CreateTagInput) -> Result<Tag>;

    /// Get a live tag by ID
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tag>>;

    /// Get a tag by ID, soft-deleted or not
    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Tag>>;

    /// Whether the name is taken by any row other than `exclude`
    async fn exists_by_name(&self, name: &str, exclude: Option<Uuid>) -> Result<bool>;

    async fn update(&self, tag: &Tag) -> Result<Tag>;

    /// Soft delete and detach from every post; returns false when the tag
    /// was not live
    async fn soft_delete(&self, id: Uuid) -> Result<bool>;

    /// Number of live posts carrying the tag
    async fn count_posts(&self, id: Uuid) -> Result<i64>;

    /// List live tags with their post counts
    async fn list(&self, params: &QueryParams) -> Result<Page<TagWithCount>>;

    /// Live tags attached to a post, by name
    async fn get_by_post_id(&self, post_id: Uuid) -> Result<Vec<Tag>>;

    /// Replace the tags attached to a post
    async fn set_for_post(&self, post_id: Uuid, tag_ids: &[Uuid]) -> Result<()>;
}

/// SQLx-based tag repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxTagRepository {
    pool: DynDatabasePool,
}

impl SqlxTagRepository {
    /// Create a new SQLx tag repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TagRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn create(&self, input: &CreateTagInput) -> Result<Tag> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_tag_sqlite(sqlite(&self.pool)?, input).await,
            DatabaseDriver::Mysql => create_tag_mysql(mysql(&self.pool)?, input).await,
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_tag_by_id_sqlite(sqlite(&self.pool)?, id, false).await,
            DatabaseDriver::Mysql => get_tag_by_id_mysql(mysql(&self.pool)?, id, false).await,
        }
    }

    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_tag_by_id_sqlite(sqlite(&self.pool)?, id, true).await,
            DatabaseDriver::Mysql => get_tag_by_id_mysql(mysql(&self.pool)?, id, true).await,
        }
    }

    async fn exists_by_name(&self, name: &str, exclude: Option<Uuid>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM tags WHERE name = ? AND id <> ?";
        let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(name)
                .bind(&exclude)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check tag name")?
                .try_get::<i64, _>(0)?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(name)
                .bind(&exclude)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check tag name")?
                .try_get::<i64, _>(0)?,
        };
        Ok(count > 0)
    }

    async fn update(&self, tag: &Tag) -> Result<Tag> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_tag_sqlite(sqlite(&self.pool)?, tag).await,
            DatabaseDriver::Mysql => update_tag_mysql(mysql(&self.pool)?, tag).await,
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_tag_sqlite(sqlite(&self.pool)?, id).await,
            DatabaseDriver::Mysql => delete_tag_mysql(mysql(&self.pool)?, id).await,
        }
    }

    async fn count_posts(&self, id: Uuid) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM post_tags pt JOIN posts p ON p.id = pt.post_id \
                   WHERE pt.tag_id = ? AND p.is_deleted = 0";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id.to_string())
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to count tag posts")?
                .try_get::<i64, _>(0)?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id.to_string())
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to count tag posts")?
                .try_get::<i64, _>(0)?,
        };
        Ok(count)
    }

    async fn list(&self, params: &QueryParams) -> Result<Page<TagWithCount>> {
        let query = ListQuery::new("tags", TAG_WITH_COUNT_COLUMNS)
            .sortable(TAG_SORT_COLUMNS)
            .paginate(params, TAG_SEARCH_COLUMNS)
            .build();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_page_sqlite(sqlite(&self.pool)?, &query, |row| {
                    Ok(TagWithCount {
                        tag: row_to_tag_sqlite(row)?,
                        post_count: row.try_get("post_count")?,
                    })
                })
                .await
            }
            DatabaseDriver::Mysql => {
                fetch_page_mysql(mysql(&self.pool)?, &query, |row| {
                    Ok(TagWithCount {
                        tag: row_to_tag_mysql(row)?,
                        post_count: row.try_get("post_count")?,
                    })
                })
                .await
            }
        }
    }

    async fn get_by_post_id(&self, post_id: Uuid) -> Result<Vec<Tag>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_tags_by_post_sqlite(sqlite(&self.pool)?, post_id).await,
            DatabaseDriver::Mysql => get_tags_by_post_mysql(mysql(&self.pool)?, post_id).await,
        }
    }

    async fn set_for_post(&self, post_id: Uuid, tag_ids: &[Uuid]) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => set_post_tags_sqlite(sqlite(&self.pool)?, post_id, tag_ids).await,
            DatabaseDriver::Mysql => set_post_tags_mysql(mysql(&self.pool)?, post_id, tag_ids).await,
        }
    }
}

fn new_tag(input: &CreateTagInput) -> Tag {
    let now = Utc::now();
    Tag {
        id: Uuid::new_v4(),
        name: input.name.clone(),
        description: input.description.clone(),
        color: input.color.clone(),
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

const INSERT_TAG: &str = r#"
    INSERT INTO tags (id, name, description, color, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const UPDATE_TAG: &str = r#"
    UPDATE tags SET name = ?, description = ?, color = ?, updated_at = ?
    WHERE id = ?
"#;

const SOFT_DELETE_TAG: &str =
    "UPDATE tags SET is_deleted = 1, deleted_at = ?, updated_at = ? WHERE id = ? AND is_deleted = 0";

// Duplicate ids would violate the (post_id, tag_id) primary key
fn unique_ids(tag_ids: &[Uuid]) -> Vec<Uuid> {
    let mut ids = tag_ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_tag_sqlite(pool: &SqlitePool, input: &CreateTagInput) -> Result<Tag> {
    let tag = new_tag(input);

    sqlx::query(INSERT_TAG)
        .bind(tag.id.to_string())
        .bind(&tag.name)
        .bind(&tag.description)
        .bind(&tag.color)
        .bind(tag.created_at)
        .bind(tag.updated_at)
        .execute(pool)
        .await
        .context("Failed to create tag")?;

    Ok(tag)
}

async fn get_tag_by_id_sqlite(pool: &SqlitePool, id: Uuid, with_deleted: bool) -> Result<Option<Tag>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM tags WHERE id = ?", TAG_COLUMNS)
    } else {
        format!("SELECT {} FROM tags WHERE id = ? AND is_deleted = 0", TAG_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get tag by ID")?;

    row.as_ref().map(row_to_tag_sqlite).transpose()
}

async fn update_tag_sqlite(pool: &SqlitePool, tag: &Tag) -> Result<Tag> {
    let now = Utc::now();

    sqlx::query(UPDATE_TAG)
        .bind(&tag.name)
        .bind(&tag.description)
        .bind(&tag.color)
        .bind(now)
        .bind(tag.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update tag")?;

    Ok(Tag {
        updated_at: now,
        ..tag.clone()
    })
}

async fn delete_tag_sqlite(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let affected = sqlx::query(SOFT_DELETE_TAG)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to delete tag")?
        .rows_affected();

    sqlx::query("DELETE FROM post_tags WHERE tag_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to detach tag from posts")?;

    tx.commit().await?;
    Ok(affected > 0)
}

async fn get_tags_by_post_sqlite(pool: &SqlitePool, post_id: Uuid) -> Result<Vec<Tag>> {
    let rows = sqlx::query(
        r#"
        SELECT t.id, t.name, t.description, t.color, t.created_at, t.updated_at,
               t.is_deleted, t.deleted_at
        FROM tags t
        INNER JOIN post_tags pt ON t.id = pt.tag_id
        WHERE pt.post_id = ? AND t.is_deleted = 0
        ORDER BY t.name
        "#,
    )
    .bind(post_id.to_string())
    .fetch_all(pool)
    .await
    .context("Failed to get tags for post")?;

    rows.iter().map(row_to_tag_sqlite).collect()
}

async fn set_post_tags_sqlite(pool: &SqlitePool, post_id: Uuid, tag_ids: &[Uuid]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(post_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to clear post tags")?;

    for tag_id in unique_ids(tag_ids) {
        sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(post_id.to_string())
            .bind(tag_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to attach tag to post")?;
    }

    tx.commit().await?;
    Ok(())
}

fn row_to_tag_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        color: row.try_get("color")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_tag_mysql(pool: &MySqlPool, input: &CreateTagInput) -> Result<Tag> {
    let tag = new_tag(input);

    sqlx::query(INSERT_TAG)
        .bind(tag.id.to_string())
        .bind(&tag.name)
        .bind(&tag.description)
        .bind(&tag.color)
        .bind(tag.created_at)
        .bind(tag.updated_at)
        .execute(pool)
        .await
        .context("Failed to create tag")?;

    Ok(tag)
}

async fn get_tag_by_id_mysql(pool: &MySqlPool, id: Uuid, with_deleted: bool) -> Result<Option<Tag>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM tags WHERE id = ?", TAG_COLUMNS)
    } else {
        format!("SELECT {} FROM tags WHERE id = ? AND is_deleted = 0", TAG_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get tag by ID")?;

    row.as_ref().map(row_to_tag_mysql).transpose()
}

async fn update_tag_mysql(pool: &MySqlPool, tag: &Tag) -> Result<Tag> {
    let now = Utc::now();

    sqlx::query(UPDATE_TAG)
        .bind(&tag.name)
        .bind(&tag.description)
        .bind(&tag.color)
        .bind(now)
        .bind(tag.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update tag")?;

    Ok(Tag {
        updated_at: now,
        ..tag.clone()
    })
}

async fn delete_tag_mysql(pool: &MySqlPool, id: Uuid) -> Result<bool> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let affected = sqlx::query(SOFT_DELETE_TAG)
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to delete tag")?
        .rows_affected();

    sqlx::query("DELETE FROM post_tags WHERE tag_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to detach tag from posts")?;

    tx.commit().await?;
    Ok(affected > 0)
}

async fn get_tags_by_post_mysql(pool: &MySqlPool, post_id: Uuid) -> Result<Vec<Tag>> {
    let rows = sqlx::query(
        r#"
        SELECT t.id, t.name, t.description, t.color, t.created_at, t.updated_at,
               t.is_deleted, t.deleted_at
        FROM tags t
        INNER JOIN post_tags pt ON t.id = pt.tag_id
        WHERE pt.post_id = ? AND t.is_deleted = 0
        ORDER BY t.name
        "#,
    )
    .bind(post_id.to_string())
    .fetch_all(pool)
    .await
    .context("Failed to get tags for post")?;

    rows.iter().map(row_to_tag_mysql).collect()
}

async fn set_post_tags_mysql(pool: &MySqlPool, post_id: Uuid, tag_ids: &[Uuid]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(post_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to clear post tags")?;

    for tag_id in unique_ids(tag_ids) {
        sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(post_id.to_string())
            .bind(tag_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to attach tag to post")?;
    }

    tx.commit().await?;
    Ok(())
}

fn row_to_tag_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Tag> {
    Ok(Tag {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        color: row.try_get("color")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{PostRepository, SqlxPostRepository, SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{CreatePostInput, CreateUserInput, Post};

    async fn setup_test_repo() -> (DynDatabasePool, SqlxTagRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxTagRepository::new(pool.clone());
        (pool, repo)
    }

    fn input(name: &str) -> CreateTagInput {
        CreateTagInput {
            name: name.to_string(),
            description: None,
            color: Some("#FF8800".to_string()),
        }
    }

    async fn create_post(pool: &DynDatabasePool, slug: &str) -> Post {
        let users = SqlxUserRepository::new(pool.clone());
        let author = match users.get_by_email("author@example.com").await.unwrap() {
            Some(user) => user,
            None => users
                .create(&CreateUserInput {
                    email: "author@example.com".to_string(),
                    username: "author".to_string(),
                    full_name: None,
                    hashed_password: "hash".to_string(),
                    is_superuser: false,
                })
                .await
                .unwrap(),
        };
        SqlxPostRepository::new(pool.clone())
            .create(&CreatePostInput {
                title: slug.to_string(),
                content: "Body".to_string(),
                slug: slug.to_string(),
                summary: None,
                is_published: true,
                author_id: author.id,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_tag() {
        let (_pool, repo) = setup_test_repo().await;
        let tag = repo.create(&input("rust")).await.unwrap();

        let found = repo.get_by_id(tag.id).await.unwrap().unwrap();
        assert_eq!(found.name, "rust");
        assert_eq!(found.color.as_deref(), Some("#FF8800"));
    }

    #[tokio::test]
    async fn test_exists_by_name() {
        let (_pool, repo) = setup_test_repo().await;
        let tag = repo.create(&input("rust")).await.unwrap();

        assert!(repo.exists_by_name("rust", None).await.unwrap());
        assert!(!repo.exists_by_name("rust", Some(tag.id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_for_post_replaces_tags() {
        let (pool, repo) = setup_test_repo().await;
        let post = create_post(&pool, "first").await;
        let rust = repo.create(&input("rust")).await.unwrap();
        let web = repo.create(&input("web")).await.unwrap();

        repo.set_for_post(post.id, &[rust.id, web.id, rust.id]).await.unwrap();
        let tags = repo.get_by_post_id(post.id).await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "rust");

        repo.set_for_post(post.id, &[web.id]).await.unwrap();
        let tags = repo.get_by_post_id(post.id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "web");
    }

    #[tokio::test]
    async fn test_list_includes_live_post_counts() {
        let (pool, repo) = setup_test_repo().await;
        let rust = repo.create(&input("rust")).await.unwrap();
        repo.create(&input("web")).await.unwrap();

        let first = create_post(&pool, "first").await;
        let second = create_post(&pool, "second").await;
        repo.set_for_post(first.id, &[rust.id]).await.unwrap();
        repo.set_for_post(second.id, &[rust.id]).await.unwrap();
        SqlxPostRepository::new(pool.clone())
            .soft_delete(second.id)
            .await
            .unwrap();

        let page = repo.list(&QueryParams::default()).await.unwrap();
        assert_eq!(page.meta.total, 2);
        let rust_count = page
            .items
            .iter()
            .find(|t| t.tag.name == "rust")
            .map(|t| t.post_count);
        assert_eq!(rust_count, Some(1));
        assert_eq!(repo.count_posts(rust.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_detaches_posts() {
        let (pool, repo) = setup_test_repo().await;
        let post = create_post(&pool, "first").await;
        let tag = repo.create(&input("rust")).await.unwrap();
        repo.set_for_post(post.id, &[tag.id]).await.unwrap();

        assert!(repo.soft_delete(tag.id).await.unwrap());
        assert!(!repo.soft_delete(tag.id).await.unwrap());

        assert!(repo.get_by_id(tag.id).await.unwrap().is_none());
        assert!(repo.get_by_post_id(post.id).await.unwrap().is_empty());
        assert!(repo.find_by_id_with_deleted(tag.id).await.unwrap().unwrap().is_deleted);
    }
}
