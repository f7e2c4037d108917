//! Product service
//!
//! SKUs are unique across live and deleted products. A product may point at
//! a category, which must be live when it is assigned.

use crate::cache::{self, Cache, CacheKeyBuilder};
use crate::db::repositories::{is_unique_violation, CategoryRepository, ProductRepository};
use crate::models::{
    CreateProductInput, Page, PaginationError, Product, ProductFilter, QueryParams,
    UpdateProductInput, PRODUCT_NAME_MAX_LEN, SKU_MAX_LEN,
};
use crate::services::validation;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ProductServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Pagination(#[from] PaginationError),

    #[error("Product not found")]
    NotFound,

    #[error("Category not found")]
    CategoryNotFound,

    #[error("SKU already exists: {0}")]
    SkuTaken(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct ProductService {
    products: Arc<dyn ProductRepository>,
    categories: Arc<dyn CategoryRepository>,
    cache: Arc<Cache>,
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        categories: Arc<dyn CategoryRepository>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            products,
            categories,
            cache,
        }
    }

    pub async fn list(
        &self,
        params: &QueryParams,
        filter: &ProductFilter,
    ) -> Result<Page<Product>, ProductServiceError> {
        params.validate()?;
        if let (Some(min), Some(max)) = (filter.min_price, filter.max_price) {
            if min > max {
                return Err(ProductServiceError::Validation(
                    "min_price must not exceed max_price".to_string(),
                ));
            }
        }
        Ok(self.products.list(params, filter).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Product, ProductServiceError> {
        let key = CacheKeyBuilder::product(id);
        if let Some(product) = cache::get_or_log::<Product>(&self.cache, &key).await {
            return Ok(product);
        }

        let product = self
            .products
            .get_by_id(id)
            .await?
            .ok_or(ProductServiceError::NotFound)?;
        cache::set_or_log(&self.cache, &key, &product, self.cache.default_ttl()).await;
        Ok(product)
    }

    pub async fn create(&self, input: CreateProductInput) -> Result<Product, ProductServiceError> {
        validate_name(&input.name)?;
        validate_sku(&input.sku)?;
        validate_price(input.price)?;
        validate_stock(input.stock)?;

        if self.products.exists_by_sku(&input.sku, None).await? {
            return Err(ProductServiceError::SkuTaken(input.sku));
        }
        if let Some(category_id) = input.category_id {
            self.ensure_category(category_id).await?;
        }

        let product = self
            .products
            .create(&input)
            .await
            .map_err(|e| sku_conflict(e, &input.sku))?;
        tracing::info!(product_id = %product.id, sku = %product.sku, "Product created");
        Ok(product)
    }

    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateProductInput,
    ) -> Result<Product, ProductServiceError> {
        let mut product = self
            .products
            .get_by_id(id)
            .await?
            .ok_or(ProductServiceError::NotFound)?;

        if let Some(name) = input.name {
            validate_name(&name)?;
            product.name = name;
        }
        if let Some(sku) = input.sku {
            validate_sku(&sku)?;
            if sku != product.sku && self.products.exists_by_sku(&sku, Some(id)).await? {
                return Err(ProductServiceError::SkuTaken(sku));
            }
            product.sku = sku;
        }
        if let Some(description) = input.description {
            product.description = Some(description);
        }
        if let Some(price) = input.price {
            validate_price(price)?;
            product.price = price;
        }
        if let Some(stock) = input.stock {
            validate_stock(stock)?;
            product.stock = stock;
        }
        if let Some(category_id) = input.category_id {
            if product.category_id != Some(category_id) {
                self.ensure_category(category_id).await?;
            }
            product.category_id = Some(category_id);
        }
        if let Some(is_active) = input.is_active {
            product.is_active = is_active;
        }

        let product = self
            .products
            .update(&product)
            .await
            .map_err(|e| sku_conflict(e, &product.sku))?;
        cache::invalidate(&self.cache, &[&CacheKeyBuilder::product(id)]).await;
        Ok(product)
    }

    /// Soft delete. Repeating it succeeds.
    pub async fn delete(&self, id: Uuid) -> Result<(), ProductServiceError> {
        let product = self
            .products
            .find_by_id_with_deleted(id)
            .await?
            .ok_or(ProductServiceError::NotFound)?;
        if product.is_deleted {
            return Ok(());
        }

        self.products.soft_delete(id).await?;
        cache::invalidate(&self.cache, &[&CacheKeyBuilder::product(id)]).await;
        tracing::info!(product_id = %id, sku = %product.sku, "Product deleted");
        Ok(())
    }

    async fn ensure_category(&self, id: Uuid) -> Result<(), ProductServiceError> {
        match self.categories.get_by_id(id).await? {
            Some(_) => Ok(()),
            None => Err(ProductServiceError::CategoryNotFound),
        }
    }
}

fn sku_conflict(err: anyhow::Error, sku: &str) -> ProductServiceError {
    if is_unique_violation(&err) {
        ProductServiceError::SkuTaken(sku.to_string())
    } else {
        ProductServiceError::Internal(err)
    }
}

fn validate_name(name: &str) -> Result<(), ProductServiceError> {
    validation::required_text("Product name", name, PRODUCT_NAME_MAX_LEN)
        .map_err(ProductServiceError::Validation)
}

fn validate_sku(sku: &str) -> Result<(), ProductServiceError> {
    validation::required_text("SKU", sku, SKU_MAX_LEN).map_err(ProductServiceError::Validation)
}

fn validate_price(price: f64) -> Result<(), ProductServiceError> {
    validation::non_negative_price(price).map_err(ProductServiceError::Validation)
}

fn validate_stock(stock: i64) -> Result<(), ProductServiceError> {
    validation::non_negative_stock(stock).map_err(ProductServiceError::Validation)
}
