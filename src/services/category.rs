//! Category service
//!
//! Implements business logic for product categories:
//! - Create, read, update, delete categories
//! - Name and slug uniqueness validation
//! - Slug generation from name
//!
//! Deleting a category leaves products pointing at it; the category simply
//! stops being readable.

use crate::cache::{self, Cache, CacheKeyBuilder};
use crate::db::repositories::{is_unique_violation, CategoryRepository};
use crate::models::{
    Category, CreateCategoryInput, Page, PaginationError, QueryParams, UpdateCategoryInput,
    CATEGORY_NAME_MAX_LEN,
};
use crate::services::validation::{self, generate_slug};
use std::sync::Arc;
use uuid::Uuid;

pub const CATEGORY_SLUG_MAX_LEN: usize = 100;

/// Error types for category service operations
#[derive(Debug, thiserror::Error)]
pub enum CategoryServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Pagination(#[from] PaginationError),

    #[error("Category not found")]
    NotFound,

    #[error("Category name already exists: {0}")]
    NameTaken(String),

    #[error("Category slug already exists: {0}")]
    SlugTaken(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// New category; the slug is derived from the name when omitted
#[derive(Debug, Clone, Default)]
pub struct CreateCategoryData {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
}

pub struct CategoryService {
    repo: Arc<dyn CategoryRepository>,
    cache: Arc<Cache>,
}

impl CategoryService {
    pub fn new(repo: Arc<dyn CategoryRepository>, cache: Arc<Cache>) -> Self {
        Self { repo, cache }
    }

    pub async fn list(&self, params: &QueryParams) -> Result<Page<Category>, CategoryServiceError> {
        params.validate()?;
        Ok(self.repo.list(params).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Category, CategoryServiceError> {
        let key = CacheKeyBuilder::category(id);
        if let Some(category) = cache::get_or_log::<Category>(&self.cache, &key).await {
            return Ok(category);
        }

        let category = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(CategoryServiceError::NotFound)?;
        cache::set_or_log(&self.cache, &key, &category, self.cache.default_ttl()).await;
        Ok(category)
    }

    pub async fn create(&self, data: CreateCategoryData) -> Result<Category, CategoryServiceError> {
        validate_name(&data.name)?;

        let slug = data
            .slug
            .unwrap_or_else(|| generate_slug(&data.name, CATEGORY_SLUG_MAX_LEN, "category"));
        validate_slug(&slug)?;

        if self.repo.exists_by_name(&data.name, None).await? {
            return Err(CategoryServiceError::NameTaken(data.name));
        }
        if self.repo.exists_by_slug(&slug, None).await? {
            return Err(CategoryServiceError::SlugTaken(slug));
        }

        let input = CreateCategoryInput {
            name: data.name,
            slug,
            description: data.description,
        };
        let category = match self.repo.create(&input).await {
            Ok(category) => category,
            Err(e) => return Err(self.conflict_or_internal(e, &input.name, &input.slug, None).await),
        };

        tracing::info!(category_id = %category.id, "Category created: {}", category.name);
        Ok(category)
    }

    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateCategoryInput,
    ) -> Result<Category, CategoryServiceError> {
        let mut category = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(CategoryServiceError::NotFound)?;

        if let Some(name) = input.name {
            validate_name(&name)?;
            if name != category.name && self.repo.exists_by_name(&name, Some(id)).await? {
                return Err(CategoryServiceError::NameTaken(name));
            }
            category.name = name;
        }
        if let Some(slug) = input.slug {
            validate_slug(&slug)?;
            if slug != category.slug && self.repo.exists_by_slug(&slug, Some(id)).await? {
                return Err(CategoryServiceError::SlugTaken(slug));
            }
            category.slug = slug;
        }
        if let Some(description) = input.description {
            category.description = Some(description);
        }
        if let Some(is_active) = input.is_active {
            category.is_active = is_active;
        }

        let category = match self.repo.update(&category).await {
            Ok(updated) => updated,
            Err(e) => {
                return Err(self
                    .conflict_or_internal(e, &category.name, &category.slug, Some(id))
                    .await)
            }
        };
        cache::invalidate(&self.cache, &[&CacheKeyBuilder::category(id)]).await;
        Ok(category)
    }

    /// Soft delete. Repeating it succeeds.
    pub async fn delete(&self, id: Uuid) -> Result<(), CategoryServiceError> {
        let category = self
            .repo
            .find_by_id_with_deleted(id)
            .await?
            .ok_or(CategoryServiceError::NotFound)?;
        if category.is_deleted {
            return Ok(());
        }

        self.repo.soft_delete(id).await?;
        cache::invalidate(&self.cache, &[&CacheKeyBuilder::category(id)]).await;
        tracing::info!(category_id = %id, "Category deleted: {}", category.name);
        Ok(())
    }

    /// Name and slug are both unique; recheck the name to report which one
    /// a rejected write collided on
    async fn conflict_or_internal(
        &self,
        err: anyhow::Error,
        name: &str,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> CategoryServiceError {
        if !is_unique_violation(&err) {
            return err.into();
        }
        match self.repo.exists_by_name(name, exclude).await {
            Ok(true) => CategoryServiceError::NameTaken(name.to_string()),
            Ok(false) => CategoryServiceError::SlugTaken(slug.to_string()),
            Err(e) => e.into(),
        }
    }
}

fn validate_name(name: &str) -> Result<(), CategoryServiceError> {
    validation::required_text("Category name", name, CATEGORY_NAME_MAX_LEN)
        .map_err(CategoryServiceError::Validation)
}

fn validate_slug(slug: &str) -> Result<(), CategoryServiceError> {
    validation::slug(slug, CATEGORY_SLUG_MAX_LEN).map_err(CategoryServiceError::Validation)
}
