//! Post service
//!
//! Business rules for posts:
//! - slugs are unique and generated from the title when omitted
//! - `published_at` follows the `is_published` flag
//! - drafts are visible to their author and superusers only
//! - only the author or a superuser may change or delete a post
//!
//! Details are cached under `post:{id}` and list pages under
//! `posts:list:...`; every write drops the affected keys.

use crate::cache::{self, Cache, CacheKeyBuilder};
use crate::db::repositories::{is_unique_violation, PostRepository, TagRepository};
use crate::models::{
    CreatePostInput, Page, PaginationError, Post, PostFilter, PostWithTags, QueryParams, User,
    CONTENT_MAX_LEN, SLUG_MAX_LEN, SUMMARY_MAX_LEN, TITLE_MAX_LEN,
};
use crate::services::validation::{self, generate_slug};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on numbered variants tried for a generated slug
const MAX_SLUG_ATTEMPTS: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum PostServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Pagination(#[from] PaginationError),

    #[error("Post not found")]
    NotFound,

    #[error("Slug already exists")]
    SlugTaken,

    #[error("Tag not found: {0}")]
    TagNotFound(Uuid),

    /// Draft requested by someone other than its author
    #[error("You do not have access to this post")]
    AccessDenied,

    #[error("You are not the author of this post")]
    NotAuthor,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct CreatePostData {
    pub title: String,
    pub content: String,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub is_published: bool,
    pub tag_ids: Vec<Uuid>,
}

/// Partial update; `tag_ids` replaces the tag set when present
#[derive(Debug, Clone, Default)]
pub struct UpdatePostData {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub is_published: Option<bool>,
    pub tag_ids: Option<Vec<Uuid>>,
}

pub struct PostService {
    posts: Arc<dyn PostRepository>,
    tags: Arc<dyn TagRepository>,
    cache: Arc<Cache>,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        tags: Arc<dyn TagRepository>,
        cache: Arc<Cache>,
    ) -> Self {
        Self { posts, tags, cache }
    }

    pub async fn create(
        &self,
        author: &User,
        data: CreatePostData,
    ) -> Result<PostWithTags, PostServiceError> {
        validate_title(&data.title)?;
        validate_content(&data.content)?;
        validate_summary(data.summary.as_deref())?;

        let slug = match data.slug {
            Some(slug) => {
                validation::slug(&slug, SLUG_MAX_LEN).map_err(PostServiceError::Validation)?;
                if self.posts.exists_by_slug(&slug, None).await? {
                    return Err(PostServiceError::SlugTaken);
                }
                slug
            }
            None => self.unique_slug(&data.title).await?,
        };

        self.ensure_tags_exist(&data.tag_ids).await?;

        let post = self
            .posts
            .create(&CreatePostInput {
                title: data.title,
                content: data.content,
                slug,
                summary: data.summary,
                is_published: data.is_published,
                author_id: author.id,
            })
            .await
            .map_err(slug_conflict)?;

        if !data.tag_ids.is_empty() {
            self.tags.set_for_post(post.id, &data.tag_ids).await?;
        }
        cache::invalidate(&self.cache, &[CacheKeyBuilder::posts_list_pattern()]).await;

        tracing::info!(post_id = %post.id, author = %author.username, "Post created: {}", post.title);
        self.with_tags(post).await
    }

    /// Fetch a post the viewer is allowed to read
    pub async fn get(&self, viewer: &User, id: Uuid) -> Result<PostWithTags, PostServiceError> {
        let key = CacheKeyBuilder::post(id);
        let detail = match cache::get_or_log::<PostWithTags>(&self.cache, &key).await {
            Some(detail) => detail,
            None => {
                let post = self.posts.get_by_id(id).await?.ok_or(PostServiceError::NotFound)?;
                let detail = self.with_tags(post).await?;
                cache::set_or_log(&self.cache, &key, &detail, self.cache.default_ttl()).await;
                detail
            }
        };

        if !detail.post.is_visible_to(viewer.id, viewer.is_superuser) {
            return Err(PostServiceError::AccessDenied);
        }
        Ok(detail)
    }

    /// List posts visible to `viewer`
    pub async fn list(
        &self,
        viewer: &User,
        params: &QueryParams,
        filter: &PostFilter,
    ) -> Result<Page<Post>, PostServiceError> {
        params.validate()?;

        let restrict_to = (!viewer.is_superuser).then_some(viewer.id);
        let key = list_cache_key(params, filter, restrict_to);
        if let Some(page) = cache::get_or_log::<Page<Post>>(&self.cache, &key).await {
            return Ok(page);
        }

        let page = self.posts.list(params, filter, restrict_to).await?;
        cache::set_or_log(&self.cache, &key, &page, self.cache.default_ttl()).await;
        Ok(page)
    }

    /// The caller's own posts, drafts included
    pub async fn list_own(
        &self,
        user: &User,
        params: &QueryParams,
        filter: &PostFilter,
    ) -> Result<Page<Post>, PostServiceError> {
        params.validate()?;
        let filter = PostFilter {
            author_id: Some(user.id),
            ..filter.clone()
        };
        Ok(self.posts.list(params, &filter, None).await?)
    }

    pub async fn update(
        &self,
        actor: &User,
        id: Uuid,
        data: UpdatePostData,
    ) -> Result<PostWithTags, PostServiceError> {
        let mut post = self.posts.get_by_id(id).await?.ok_or(PostServiceError::NotFound)?;
        if !actor.can_manage(post.author_id) {
            return Err(PostServiceError::NotAuthor);
        }

        if let Some(title) = data.title {
            validate_title(&title)?;
            post.title = title;
        }
        if let Some(content) = data.content {
            validate_content(&content)?;
            post.content = content;
        }
        if let Some(summary) = data.summary {
            validate_summary(Some(&summary))?;
            post.summary = Some(summary);
        }
        if let Some(slug) = data.slug {
            if slug != post.slug {
                validation::slug(&slug, SLUG_MAX_LEN).map_err(PostServiceError::Validation)?;
                if self.posts.exists_by_slug(&slug, Some(post.id)).await? {
                    return Err(PostServiceError::SlugTaken);
                }
                post.slug = slug;
            }
        }
        if let Some(is_published) = data.is_published {
            match (post.is_published, is_published) {
                (false, true) => post.published_at = Some(Utc::now()),
                (true, false) => post.published_at = None,
                _ => {}
            }
            post.is_published = is_published;
        }
        if let Some(ref tag_ids) = data.tag_ids {
            self.ensure_tags_exist(tag_ids).await?;
        }

        let post = self.posts.update(&post).await.map_err(slug_conflict)?;
        if let Some(tag_ids) = data.tag_ids {
            self.tags.set_for_post(post.id, &tag_ids).await?;
        }
        self.invalidate(id).await;

        tracing::info!(post_id = %id, actor = %actor.username, "Post updated");
        self.with_tags(post).await
    }

    /// Soft delete. A post that is already deleted reports success; one that
    /// never existed is `NotFound`.
    pub async fn delete(&self, actor: &User, id: Uuid) -> Result<(), PostServiceError> {
        let post = self
            .posts
            .find_by_id_with_deleted(id)
            .await?
            .ok_or(PostServiceError::NotFound)?;
        if !actor.can_manage(post.author_id) {
            return Err(PostServiceError::NotAuthor);
        }
        if post.is_deleted {
            return Ok(());
        }

        self.posts.soft_delete(id).await?;
        self.invalidate(id).await;

        tracing::info!(post_id = %id, actor = %actor.username, "Post deleted");
        Ok(())
    }

    async fn invalidate(&self, id: Uuid) {
        cache::invalidate(
            &self.cache,
            &[CacheKeyBuilder::post(id).as_str(), CacheKeyBuilder::posts_list_pattern()],
        )
        .await;
    }

    async fn with_tags(&self, post: Post) -> Result<PostWithTags, PostServiceError> {
        let tags = self.tags.get_by_post_id(post.id).await?;
        Ok(PostWithTags { post, tags })
    }

    async fn ensure_tags_exist(&self, tag_ids: &[Uuid]) -> Result<(), PostServiceError> {
        for id in tag_ids {
            if self.tags.get_by_id(*id).await?.is_none() {
                return Err(PostServiceError::TagNotFound(*id));
            }
        }
        Ok(())
    }

    /// Slug from the title, numbered (`-2`, `-3`, ...) until it is free
    async fn unique_slug(&self, title: &str) -> Result<String, PostServiceError> {
        let base = generate_slug(title, SLUG_MAX_LEN - 4, "post");
        if !self.posts.exists_by_slug(&base, None).await? {
            return Ok(base);
        }
        for n in 2..=MAX_SLUG_ATTEMPTS {
            let candidate = format!("{}-{}", base, n);
            if !self.posts.exists_by_slug(&candidate, None).await? {
                return Ok(candidate);
            }
        }
        Err(PostServiceError::SlugTaken)
    }
}

fn list_cache_key(params: &QueryParams, filter: &PostFilter, viewer: Option<Uuid>) -> String {
    let mut kwargs = filter.cache_kwargs();
    if let Some(search) = params.search_term() {
        kwargs.push(("search", search.to_lowercase()));
    }
    if let Some(ref sort_by) = params.sort_by {
        kwargs.push(("sort_by", sort_by.clone()));
    }
    kwargs.push(("sort_order", params.sort_order.to_string()));
    kwargs.push((
        "viewer",
        viewer.map_or_else(|| "all".to_string(), |id| id.to_string()),
    ));
    CacheKeyBuilder::posts_list(params.page, params.size, &kwargs)
}

/// Slugs are the only user-chosen unique column on posts
fn slug_conflict(err: anyhow::Error) -> PostServiceError {
    if is_unique_violation(&err) {
        PostServiceError::SlugTaken
    } else {
        PostServiceError::Internal(err)
    }
}

fn validate_title(title: &str) -> Result<(), PostServiceError> {
    validation::required_text("Title", title, TITLE_MAX_LEN).map_err(PostServiceError::Validation)
}

fn validate_content(content: &str) -> Result<(), PostServiceError> {
    validation::required_text("Content", content, CONTENT_MAX_LEN)
        .map_err(PostServiceError::Validation)
}

fn validate_summary(summary: Option<&str>) -> Result<(), PostServiceError> {
    validation::optional_max_len("Summary", summary, SUMMARY_MAX_LEN)
        .map_err(PostServiceError::Validation)
}
