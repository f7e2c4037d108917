//! Post repository
//!
//! Database operations for posts. Tag associations live in the tag
//! repository.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::query::{fetch_page_mysql, fetch_page_sqlite, Condition, ListQuery, SqlValue};
use crate::db::DynDatabasePool;
use crate::models::{CreatePostInput, Page, Post, PostFilter, QueryParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::parse_uuid;

const POST_COLUMNS: &str = "id, title, content, slug, summary, is_published, published_at, \
     author_id, created_at, updated_at, is_deleted, deleted_at";

pub const POST_SEARCH_COLUMNS: &[&str] = &["title", "content", "summary"];
pub const POST_SORT_COLUMNS: &[&str] = &["created_at", "updated_at", "published_at", "title"];

/// Post repository trait
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Create a new post; `published_at` is set when created published
    async fn create(&self, input: &CreatePostInput) -> Result<Post>;

    /// Get a live post by ID
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Post>>;

    /// Get a post by ID, soft-deleted or not
    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Post>>;

    /// Whether the slug is taken by any row other than `exclude`
    async fn exists_by_slug(&self, slug: &str, exclude: Option<Uuid>) -> Result<bool>;

    /// Persist every mutable column and bump `updated_at`
    async fn update(&self, post: &Post) -> Result<Post>;

    /// Soft delete; returns false when the post was not live
    async fn soft_delete(&self, id: Uuid) -> Result<bool>;

    /// List live posts.
    ///
    /// With `viewer` set, only published posts and the viewer's own drafts
    /// are returned.
    async fn list(
        &self,
        params: &QueryParams,
        filter: &PostFilter,
        viewer: Option<Uuid>,
    ) -> Result<Page<Post>>;
}

/// SQLx-based post repository implementation
pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

fn list_query(params: &QueryParams, filter: &PostFilter, viewer: Option<Uuid>) -> ListQuery {
    let mut query = ListQuery::new("posts", POST_COLUMNS)
        .sortable(POST_SORT_COLUMNS)
        .filter_opt("is_published", filter.is_published)
        .filter_opt("author_id", filter.author_id);

    if let Some(tag_id) = filter.tag_id {
        query = query.filter(Condition::Raw(
            "id IN (SELECT post_id FROM post_tags WHERE tag_id = ?)",
            vec![SqlValue::from(tag_id)],
        ));
    }

    if let Some(viewer) = viewer {
        query = query.filter(Condition::Any(vec![
            Condition::Eq("is_published", SqlValue::Bool(true)),
            Condition::Eq("author_id", SqlValue::from(viewer)),
        ]));
    }

    query.paginate(params, POST_SEARCH_COLUMNS)
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, input: &CreatePostInput) -> Result<Post> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_post_sqlite(sqlite(&self.pool)?, input).await,
            DatabaseDriver::Mysql => create_post_mysql(mysql(&self.pool)?, input).await,
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_post_by_id_sqlite(sqlite(&self.pool)?, id, false).await,
            DatabaseDriver::Mysql => get_post_by_id_mysql(mysql(&self.pool)?, id, false).await,
        }
    }

    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Post>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_post_by_id_sqlite(sqlite(&self.pool)?, id, true).await,
            DatabaseDriver::Mysql => get_post_by_id_mysql(mysql(&self.pool)?, id, true).await,
        }
    }

    async fn exists_by_slug(&self, slug: &str, exclude: Option<Uuid>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM posts WHERE slug = ? AND id <> ?";
        let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(slug)
                .bind(&exclude)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check slug")?
                .try_get::<i64, _>(0)?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(slug)
                .bind(&exclude)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check slug")?
                .try_get::<i64, _>(0)?,
        };
        Ok(count > 0)
    }

    async fn update(&self, post: &Post) -> Result<Post> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_post_sqlite(sqlite(&self.pool)?, post).await,
            DatabaseDriver::Mysql => update_post_mysql(mysql(&self.pool)?, post).await,
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let sql = "UPDATE posts SET is_deleted = 1, deleted_at = ?, updated_at = ? \
                   WHERE id = ? AND is_deleted = 0";
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to delete post")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to delete post")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list(
        &self,
        params: &QueryParams,
        filter: &PostFilter,
        viewer: Option<Uuid>,
    ) -> Result<Page<Post>> {
        let query = list_query(params, filter, viewer).build();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_page_sqlite(sqlite(&self.pool)?, &query, row_to_post_sqlite).await
            }
            DatabaseDriver::Mysql => {
                fetch_page_mysql(mysql(&self.pool)?, &query, row_to_post_mysql).await
            }
        }
    }
}

fn new_post(input: &CreatePostInput) -> Post {
    let now = Utc::now();
    Post {
        id: Uuid::new_v4(),
        title: input.title.clone(),
        content: input.content.clone(),
        slug: input.slug.clone(),
        summary: input.summary.clone(),
        is_published: input.is_published,
        published_at: input.is_published.then_some(now),
        author_id: input.author_id,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

const INSERT_POST: &str = r#"
    INSERT INTO posts (id, title, content, slug, summary, is_published, published_at,
                       author_id, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_POST: &str = r#"
    UPDATE posts
    SET title = ?, content = ?, slug = ?, summary = ?, is_published = ?,
        published_at = ?, updated_at = ?
    WHERE id = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_post_sqlite(pool: &SqlitePool, input: &CreatePostInput) -> Result<Post> {
    let post = new_post(input);

    sqlx::query(INSERT_POST)
        .bind(post.id.to_string())
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.slug)
        .bind(&post.summary)
        .bind(post.is_published)
        .bind(post.published_at)
        .bind(post.author_id.to_string())
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(pool)
        .await
        .context("Failed to create post")?;

    Ok(post)
}

async fn get_post_by_id_sqlite(pool: &SqlitePool, id: Uuid, with_deleted: bool) -> Result<Option<Post>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS)
    } else {
        format!("SELECT {} FROM posts WHERE id = ? AND is_deleted = 0", POST_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    row.as_ref().map(row_to_post_sqlite).transpose()
}

async fn update_post_sqlite(pool: &SqlitePool, post: &Post) -> Result<Post> {
    let now = Utc::now();

    sqlx::query(UPDATE_POST)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.slug)
        .bind(&post.summary)
        .bind(post.is_published)
        .bind(post.published_at)
        .bind(now)
        .bind(post.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update post")?;

    Ok(Post {
        updated_at: now,
        ..post.clone()
    })
}

fn row_to_post_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    Ok(Post {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        slug: row.try_get("slug")?,
        summary: row.try_get("summary")?,
        is_published: row.try_get("is_published")?,
        published_at: row.try_get("published_at")?,
        author_id: parse_uuid(&row.try_get::<String, _>("author_id")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_post_mysql(pool: &MySqlPool, input: &CreatePostInput) -> Result<Post> {
    let post = new_post(input);

    sqlx::query(INSERT_POST)
        .bind(post.id.to_string())
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.slug)
        .bind(&post.summary)
        .bind(post.is_published)
        .bind(post.published_at)
        .bind(post.author_id.to_string())
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(pool)
        .await
        .context("Failed to create post")?;

    Ok(post)
}

async fn get_post_by_id_mysql(pool: &MySqlPool, id: Uuid, with_deleted: bool) -> Result<Option<Post>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS)
    } else {
        format!("SELECT {} FROM posts WHERE id = ? AND is_deleted = 0", POST_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get post by ID")?;

    row.as_ref().map(row_to_post_mysql).transpose()
}

async fn update_post_mysql(pool: &MySqlPool, post: &Post) -> Result<Post> {
    let now = Utc::now();

    sqlx::query(UPDATE_POST)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.slug)
        .bind(&post.summary)
        .bind(post.is_published)
        .bind(post.published_at)
        .bind(now)
        .bind(post.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update post")?;

    Ok(Post {
        updated_at: now,
        ..post.clone()
    })
}

fn row_to_post_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Post> {
    Ok(Post {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        slug: row.try_get("slug")?,
        summary: row.try_get("summary")?,
        is_published: row.try_get("is_published")?,
        published_at: row.try_get("published_at")?,
        author_id: parse_uuid(&row.try_get::<String, _>("author_id")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::CreateUserInput;

    async fn setup_test_repo() -> (DynDatabasePool, SqlxPostRepository, Uuid) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let author = SqlxUserRepository::new(pool.clone())
            .create(&CreateUserInput {
                email: "author@example.com".to_string(),
                username: "author".to_string(),
                full_name: None,
                hashed_password: "hash".to_string(),
                is_superuser: false,
            })
            .await
            .expect("Failed to create author");

        let repo = SqlxPostRepository::new(pool.clone());
        (pool, repo, author.id)
    }

    fn input(author_id: Uuid, title: &str, published: bool) -> CreatePostInput {
        CreatePostInput {
            title: title.to_string(),
            content: format!("Content of {}", title),
            slug: title.to_lowercase().replace(' ', "-"),
            summary: None,
            is_published: published,
            author_id,
        }
    }

    #[tokio::test]
    async fn test_create_post_sets_published_at() {
        let (_pool, repo, author) = setup_test_repo().await;

        let draft = repo.create(&input(author, "Draft Post", false)).await.unwrap();
        assert!(draft.published_at.is_none());

        let live = repo.create(&input(author, "Live Post", true)).await.unwrap();
        assert!(live.published_at.is_some());

        let found = repo.get_by_id(live.id).await.unwrap().unwrap();
        assert_eq!(found.slug, "live-post");
        assert_eq!(found.author_id, author);
    }

    #[tokio::test]
    async fn test_exists_by_slug() {
        let (_pool, repo, author) = setup_test_repo().await;
        let post = repo.create(&input(author, "Hello", true)).await.unwrap();

        assert!(repo.exists_by_slug("hello", None).await.unwrap());
        assert!(!repo.exists_by_slug("hello", Some(post.id)).await.unwrap());
        assert!(!repo.exists_by_slug("other", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_post() {
        let (_pool, repo, author) = setup_test_repo().await;
        let mut post = repo.create(&input(author, "Hello", false)).await.unwrap();

        post.title = "Hello Again".to_string();
        post.is_published = true;
        post.published_at = Some(Utc::now());
        repo.update(&post).await.unwrap();

        let found = repo.get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Hello Again");
        assert!(found.is_published);
        assert!(found.published_at.is_some());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_post() {
        let (_pool, repo, author) = setup_test_repo().await;
        let post = repo.create(&input(author, "Hello", true)).await.unwrap();

        assert!(repo.soft_delete(post.id).await.unwrap());
        assert!(!repo.soft_delete(post.id).await.unwrap());
        assert!(repo.get_by_id(post.id).await.unwrap().is_none());
        assert!(repo.find_by_id_with_deleted(post.id).await.unwrap().is_some());

        let page = repo
            .list(&QueryParams::default(), &PostFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(page.meta.total, 0);
    }

    #[tokio::test]
    async fn test_list_visibility_for_viewer() {
        let (_pool, repo, author) = setup_test_repo().await;
        repo.create(&input(author, "Published", true)).await.unwrap();
        repo.create(&input(author, "Draft", false)).await.unwrap();

        let everything = repo
            .list(&QueryParams::default(), &PostFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(everything.meta.total, 2);

        let stranger = repo
            .list(&QueryParams::default(), &PostFilter::default(), Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(stranger.meta.total, 1);
        assert!(stranger.items[0].is_published);

        let own = repo
            .list(&QueryParams::default(), &PostFilter::default(), Some(author))
            .await
            .unwrap();
        assert_eq!(own.meta.total, 2);
    }

    #[tokio::test]
    async fn test_list_filters_and_sort() {
        let (_pool, repo, author) = setup_test_repo().await;
        repo.create(&input(author, "Banana", true)).await.unwrap();
        repo.create(&input(author, "Apple", true)).await.unwrap();
        repo.create(&input(author, "Cherry", false)).await.unwrap();

        let filter = PostFilter {
            is_published: Some(true),
            ..Default::default()
        };
        let params = QueryParams::default().with_sort("title", crate::models::SortOrder::Asc);
        let page = repo.list(&params, &filter, None).await.unwrap();

        let titles: Vec<_> = page.items.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Apple", "Banana"]);
    }

    #[tokio::test]
    async fn test_list_search_is_case_insensitive() {
        let (_pool, repo, author) = setup_test_repo().await;
        repo.create(&input(author, "Learning Rust", true)).await.unwrap();
        repo.create(&input(author, "Gardening", true)).await.unwrap();

        let params = QueryParams::default().with_search("rUsT");
        let page = repo.list(&params, &PostFilter::default(), None).await.unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.items[0].title, "Learning Rust");
    }
}
