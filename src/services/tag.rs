//! Tag service
//!
//! Tags are managed by superusers and attached to posts through the post
//! service. Renaming or deleting a tag changes cached post details, so those
//! writes drop every `post:*` and `posts:list:*` entry.

use crate::cache::{self, Cache, CacheKeyBuilder};
use crate::db::repositories::{is_unique_violation, TagRepository};
use crate::models::{
    CreateTagInput, Page, PaginationError, QueryParams, Tag, TagWithCount, UpdateTagInput,
    TAG_NAME_MAX_LEN,
};
use crate::services::validation;
use std::sync::Arc;
use uuid::Uuid;

pub const TAG_DESCRIPTION_MAX_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Pagination(#[from] PaginationError),

    #[error("Tag not found")]
    NotFound,

    #[error("Tag name already exists: {0}")]
    NameTaken(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct TagService {
    repo: Arc<dyn TagRepository>,
    cache: Arc<Cache>,
}

impl TagService {
    pub fn new(repo: Arc<dyn TagRepository>, cache: Arc<Cache>) -> Self {
        Self { repo, cache }
    }

    pub async fn list(&self, params: &QueryParams) -> Result<Page<TagWithCount>, TagServiceError> {
        params.validate()?;
        Ok(self.repo.list(params).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Tag, TagServiceError> {
        self.repo.get_by_id(id).await?.ok_or(TagServiceError::NotFound)
    }

    pub async fn create(&self, input: CreateTagInput) -> Result<Tag, TagServiceError> {
        validate_name(&input.name)?;
        validate_description(input.description.as_deref())?;
        validate_color(input.color.as_deref())?;

        if self.repo.exists_by_name(&input.name, None).await? {
            return Err(TagServiceError::NameTaken(input.name));
        }

        let tag = self
            .repo
            .create(&input)
            .await
            .map_err(|e| name_conflict(e, &input.name))?;
        tracing::info!(tag_id = %tag.id, "Tag created: {}", tag.name);
        Ok(tag)
    }

    pub async fn update(&self, id: Uuid, input: UpdateTagInput) -> Result<Tag, TagServiceError> {
        let mut tag = self.get(id).await?;

        if let Some(name) = input.name {
            validate_name(&name)?;
            if name != tag.name && self.repo.exists_by_name(&name, Some(id)).await? {
                return Err(TagServiceError::NameTaken(name));
            }
            tag.name = name;
        }
        if let Some(description) = input.description {
            validate_description(Some(&description))?;
            tag.description = Some(description);
        }
        if let Some(color) = input.color {
            validate_color(Some(&color))?;
            tag.color = Some(color);
        }

        let tag = self
            .repo
            .update(&tag)
            .await
            .map_err(|e| name_conflict(e, &tag.name))?;
        self.invalidate_posts().await;
        Ok(tag)
    }

    /// Soft delete and detach from posts. Repeating it succeeds.
    pub async fn delete(&self, id: Uuid) -> Result<(), TagServiceError> {
        let tag = self
            .repo
            .find_by_id_with_deleted(id)
            .await?
            .ok_or(TagServiceError::NotFound)?;
        if tag.is_deleted {
            return Ok(());
        }

        self.repo.soft_delete(id).await?;
        self.invalidate_posts().await;
        tracing::info!(tag_id = %id, "Tag deleted: {}", tag.name);
        Ok(())
    }

    async fn invalidate_posts(&self) {
        cache::invalidate(&self.cache, &["post:*", CacheKeyBuilder::posts_list_pattern()]).await;
    }
}

fn name_conflict(err: anyhow::Error, name: &str) -> TagServiceError {
    if is_unique_violation(&err) {
        TagServiceError::NameTaken(name.to_string())
    } else {
        TagServiceError::Internal(err)
    }
}

fn validate_name(name: &str) -> Result<(), TagServiceError> {
    validation::required_text("Tag name", name, TAG_NAME_MAX_LEN)
        .map_err(TagServiceError::Validation)
}

fn validate_description(description: Option<&str>) -> Result<(), TagServiceError> {
    validation::optional_max_len("Description", description, TAG_DESCRIPTION_MAX_LEN)
        .map_err(TagServiceError::Validation)
}

fn validate_color(color: Option<&str>) -> Result<(), TagServiceError> {
    color
        .map_or(Ok(()), validation::color)
        .map_err(TagServiceError::Validation)
}
