//! Post model
//!
//! This module provides:
//! - `Post` entity, authored by a user and optionally published
//! - Input types for creating and updating posts
//! - `PostFilter` for list queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tag::Tag;

pub const TITLE_MAX_LEN: usize = 200;
pub const CONTENT_MAX_LEN: usize = 10_000;
pub const SUMMARY_MAX_LEN: usize = 500;
pub const SLUG_MAX_LEN: usize = 200;

/// Post entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    /// Unique identifier
    pub id: Uuid,
    /// Post title
    pub title: String,
    /// Body text
    pub content: String,
    /// URL-friendly unique slug
    pub slug: String,
    /// Optional short summary
    pub summary: Option<String>,
    /// Publication flag
    pub is_published: bool,
    /// Set when the post becomes published, cleared when unpublished
    pub published_at: Option<DateTime<Utc>>,
    /// Author user ID
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Whether `viewer` may read this post.
    ///
    /// Published posts are visible to everyone; drafts only to their
    /// author and superusers.
    pub fn is_visible_to(&self, viewer_id: Uuid, viewer_is_superuser: bool) -> bool {
        self.is_published || viewer_is_superuser || self.author_id == viewer_id
    }
}

/// Post detail with its live tags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostWithTags {
    #[serde(flatten)]
    pub post: Post,
    pub tags: Vec<Tag>,
}

/// Input for creating a new post
#[derive(Debug, Clone)]
pub struct CreatePostInput {
    pub title: String,
    pub content: String,
    pub slug: String,
    pub summary: Option<String>,
    pub is_published: bool,
    pub author_id: Uuid,
}

/// Input for updating an existing post
#[derive(Debug, Clone, Default)]
pub struct UpdatePostInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub is_published: Option<bool>,
}

/// List filters on top of the shared query parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostFilter {
    pub is_published: Option<bool>,
    pub author_id: Option<Uuid>,
    pub tag_id: Option<Uuid>,
}

impl PostFilter {
    /// Keyword parts used when building list cache keys
    pub fn cache_kwargs(&self) -> Vec<(&'static str, String)> {
        let mut kwargs = Vec::new();
        if let Some(published) = self.is_published {
            kwargs.push(("is_published", published.to_string()));
        }
        if let Some(author_id) = self.author_id {
            kwargs.push(("author_id", author_id.to_string()));
        }
        if let Some(tag_id) = self.tag_id {
            kwargs.push(("tag_id", tag_id.to_string()));
        }
        kwargs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(author_id: Uuid) -> Post {
        let now = Utc::now();
        Post {
            id: Uuid::new_v4(),
            title: "Draft".to_string(),
            content: "Body".to_string(),
            slug: "draft".to_string(),
            summary: None,
            is_published: false,
            published_at: None,
            author_id,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn test_draft_visibility() {
        let author = Uuid::new_v4();
        let post = draft(author);

        assert!(post.is_visible_to(author, false));
        assert!(post.is_visible_to(Uuid::new_v4(), true));
        assert!(!post.is_visible_to(Uuid::new_v4(), false));
    }

    #[test]
    fn test_published_is_visible_to_everyone() {
        let mut post = draft(Uuid::new_v4());
        post.is_published = true;
        assert!(post.is_visible_to(Uuid::new_v4(), false));
    }

    #[test]
    fn test_cache_kwargs_only_includes_set_filters() {
        let filter = PostFilter {
            is_published: Some(true),
            ..Default::default()
        };
        assert_eq!(filter.cache_kwargs(), vec![("is_published", "true".to_string())]);
        assert!(PostFilter::default().cache_kwargs().is_empty());
    }
}
