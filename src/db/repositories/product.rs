//! Product repository

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::query::{fetch_page_mysql, fetch_page_sqlite, Condition, ListQuery, SqlValue};
use crate::db::DynDatabasePool;
use crate::models::{CreateProductInput, Page, Product, ProductFilter, QueryParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::{parse_opt_uuid, parse_uuid};

const PRODUCT_COLUMNS: &str = "id, name, sku, description, price, stock, category_id, \
     is_active, created_at, updated_at, is_deleted, deleted_at";

pub const PRODUCT_SEARCH_COLUMNS: &[&str] = &["name", "description", "sku"];
pub const PRODUCT_SORT_COLUMNS: &[&str] = &["name", "price", "stock", "created_at", "updated_at"];

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn create(&self, input: &CreateProductInput) -> Result<Product>;

    /// Get a live product by ID
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Product>>;

    /// Get a product by ID, soft-deleted or not
    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Product>>;

    /// Whether the SKU is taken by any row other than `exclude`
    async fn exists_by_sku(&self, sku: &str, exclude: Option<Uuid>) -> Result<bool>;

    async fn update(&self, product: &Product) -> Result<Product>;

    /// Soft delete; returns false when the product was not live
    async fn soft_delete(&self, id: Uuid) -> Result<bool>;

    async fn list(&self, params: &QueryParams, filter: &ProductFilter) -> Result<Page<Product>>;
}

pub struct SqlxProductRepository {
    pool: DynDatabasePool,
}

impl SqlxProductRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ProductRepository> {
        Arc::new(Self::new(pool))
    }
}

fn list_query(params: &QueryParams, filter: &ProductFilter) -> ListQuery {
    let mut query = ListQuery::new("products", PRODUCT_COLUMNS)
        .sortable(PRODUCT_SORT_COLUMNS)
        .filter_opt("category_id", filter.category_id)
        .filter_opt("is_active", filter.is_active)
        .filter_range("price", filter.min_price, filter.max_price);

    query = match filter.in_stock {
        Some(true) => query.filter(Condition::Gte("stock", SqlValue::Int(1))),
        Some(false) => query.filter(Condition::Lte("stock", SqlValue::Int(0))),
        None => query,
    };

    query.paginate(params, PRODUCT_SEARCH_COLUMNS)
}

#[async_trait]
impl ProductRepository for SqlxProductRepository {
    async fn create(&self, input: &CreateProductInput) -> Result<Product> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_product_sqlite(sqlite(&self.pool)?, input).await,
            DatabaseDriver::Mysql => create_product_mysql(mysql(&self.pool)?, input).await,
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Product>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_product_by_id_sqlite(sqlite(&self.pool)?, id, false).await,
            DatabaseDriver::Mysql => get_product_by_id_mysql(mysql(&self.pool)?, id, false).await,
        }
    }

    async fn find_by_id_with_deleted(&self, id: Uuid) -> Result<Option<Product>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_product_by_id_sqlite(sqlite(&self.pool)?, id, true).await,
            DatabaseDriver::Mysql => get_product_by_id_mysql(mysql(&self.pool)?, id, true).await,
        }
    }

    async fn exists_by_sku(&self, sku: &str, exclude: Option<Uuid>) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM products WHERE sku = ? AND id <> ?";
        let exclude = exclude.map(|id| id.to_string()).unwrap_or_default();
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(sku)
                .bind(&exclude)
                .fetch_one(sqlite(&self.pool)?)
                .await
                .context("Failed to check SKU")?
                .try_get::<i64, _>(0)?,
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(sku)
                .bind(&exclude)
                .fetch_one(mysql(&self.pool)?)
                .await
                .context("Failed to check SKU")?
                .try_get::<i64, _>(0)?,
        };
        Ok(count > 0)
    }

    async fn update(&self, product: &Product) -> Result<Product> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_product_sqlite(sqlite(&self.pool)?, product).await,
            DatabaseDriver::Mysql => update_product_mysql(mysql(&self.pool)?, product).await,
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool> {
        let sql = "UPDATE products SET is_deleted = 1, deleted_at = ?, updated_at = ? \
                   WHERE id = ? AND is_deleted = 0";
        let now = Utc::now();
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(sqlite(&self.pool)?)
                .await
                .context("Failed to delete product")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(mysql(&self.pool)?)
                .await
                .context("Failed to delete product")?
                .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn list(&self, params: &QueryParams, filter: &ProductFilter) -> Result<Page<Product>> {
        let query = list_query(params, filter).build();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_page_sqlite(sqlite(&self.pool)?, &query, row_to_product_sqlite).await
            }
            DatabaseDriver::Mysql => {
                fetch_page_mysql(mysql(&self.pool)?, &query, row_to_product_mysql).await
            }
        }
    }
}

fn new_product(input: &CreateProductInput) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::new_v4(),
        name: input.name.clone(),
        sku: input.sku.clone(),
        description: input.description.clone(),
        price: input.price,
        stock: input.stock,
        category_id: input.category_id,
        is_active: true,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        deleted_at: None,
    }
}

const INSERT_PRODUCT: &str = r#"
    INSERT INTO products (id, name, sku, description, price, stock, category_id,
                          is_active, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_PRODUCT: &str = r#"
    UPDATE products
    SET name = ?, sku = ?, description = ?, price = ?, stock = ?, category_id = ?,
        is_active = ?, updated_at = ?
    WHERE id = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_product_sqlite(pool: &SqlitePool, input: &CreateProductInput) -> Result<Product> {
    let product = new_product(input);

    sqlx::query(INSERT_PRODUCT)
        .bind(product.id.to_string())
        .bind(&product.name)
        .bind(&product.sku)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.category_id.map(|id| id.to_string()))
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(pool)
        .await
        .context("Failed to create product")?;

    Ok(product)
}

async fn get_product_by_id_sqlite(
    pool: &SqlitePool,
    id: Uuid,
    with_deleted: bool,
) -> Result<Option<Product>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS)
    } else {
        format!("SELECT {} FROM products WHERE id = ? AND is_deleted = 0", PRODUCT_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get product by ID")?;

    row.as_ref().map(row_to_product_sqlite).transpose()
}

async fn update_product_sqlite(pool: &SqlitePool, product: &Product) -> Result<Product> {
    let now = Utc::now();

    sqlx::query(UPDATE_PRODUCT)
        .bind(&product.name)
        .bind(&product.sku)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.category_id.map(|id| id.to_string()))
        .bind(product.is_active)
        .bind(now)
        .bind(product.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update product")?;

    Ok(Product {
        updated_at: now,
        ..product.clone()
    })
}

fn row_to_product_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Product> {
    Ok(Product {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        stock: row.try_get("stock")?,
        category_id: parse_opt_uuid(row.try_get("category_id")?)?,
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

async fn create_product_mysql(pool: &MySqlPool, input: &CreateProductInput) -> Result<Product> {
    let product = new_product(input);

    sqlx::query(INSERT_PRODUCT)
        .bind(product.id.to_string())
        .bind(&product.name)
        .bind(&product.sku)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.category_id.map(|id| id.to_string()))
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(pool)
        .await
        .context("Failed to create product")?;

    Ok(product)
}

async fn get_product_by_id_mysql(
    pool: &MySqlPool,
    id: Uuid,
    with_deleted: bool,
) -> Result<Option<Product>> {
    let sql = if with_deleted {
        format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS)
    } else {
        format!("SELECT {} FROM products WHERE id = ? AND is_deleted = 0", PRODUCT_COLUMNS)
    };
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get product by ID")?;

    row.as_ref().map(row_to_product_mysql).transpose()
}

async fn update_product_mysql(pool: &MySqlPool, product: &Product) -> Result<Product> {
    let now = Utc::now();

    sqlx::query(UPDATE_PRODUCT)
        .bind(&product.name)
        .bind(&product.sku)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.category_id.map(|id| id.to_string()))
        .bind(product.is_active)
        .bind(now)
        .bind(product.id.to_string())
        .execute(pool)
        .await
        .context("Failed to update product")?;

    Ok(Product {
        updated_at: now,
        ..product.clone()
    })
}

fn row_to_product_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Product> {
    Ok(Product {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        stock: row.try_get("stock")?,
        category_id: parse_opt_uuid(row.try_get("category_id")?)?,
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
    use crate::db::repositories::{CategoryRepository, SqlxCategoryRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{CreateCategoryInput, SortOrder};

    async fn setup_test_repo() -> (DynDatabasePool, SqlxProductRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxProductRepository::new(pool.clone());
        (pool, repo)
    }

    fn input(name: &str, sku: &str, price: f64, stock: i64) -> CreateProductInput {
        CreateProductInput {
            name: name.to_string(),
            sku: sku.to_string(),
            description: None,
            price,
            stock,
            category_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_product_with_category() {
        let (pool, repo) = setup_test_repo().await;
        let category = SqlxCategoryRepository::new(pool.clone())
            .create(&CreateCategoryInput {
                name: "Tools".to_string(),
                slug: "tools".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let mut product_input = input("Hammer", "HAM-1", 12.5, 3);
        product_input.category_id = Some(category.id);
        let product = repo.create(&product_input).await.unwrap();

        let found = repo.get_by_id(product.id).await.unwrap().unwrap();
        assert_eq!(found.category_id, Some(category.id));
        assert_eq!(found.price, 12.5);
        assert_eq!(found.stock, 3);
    }

    #[tokio::test]
    async fn test_unknown_category_is_rejected_by_store() {
        let (_pool, repo) = setup_test_repo().await;
        let mut product_input = input("Hammer", "HAM-1", 12.5, 3);
        product_input.category_id = Some(Uuid::new_v4());
        assert!(repo.create(&product_input).await.is_err());
    }

    #[tokio::test]
    async fn test_exists_by_sku() {
        let (_pool, repo) = setup_test_repo().await;
        let product = repo.create(&input("Hammer", "HAM-1", 1.0, 1)).await.unwrap();

        assert!(repo.exists_by_sku("HAM-1", None).await.unwrap());
        assert!(!repo.exists_by_sku("HAM-1", Some(product.id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_price_range_and_stock_filters() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&input("Cheap", "C-1", 5.0, 0)).await.unwrap();
        repo.create(&input("Mid", "M-1", 50.0, 10)).await.unwrap();
        repo.create(&input("Pricey", "P-1", 500.0, 2)).await.unwrap();

        let filter = ProductFilter {
            min_price: Some(10.0),
            max_price: Some(100.0),
            ..Default::default()
        };
        let page = repo.list(&QueryParams::default(), &filter).await.unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.items[0].name, "Mid");

        let filter = ProductFilter {
            in_stock: Some(true),
            ..Default::default()
        };
        let page = repo.list(&QueryParams::default(), &filter).await.unwrap();
        assert_eq!(page.meta.total, 2);

        let filter = ProductFilter {
            in_stock: Some(false),
            ..Default::default()
        };
        let page = repo.list(&QueryParams::default(), &filter).await.unwrap();
        assert_eq!(page.items[0].name, "Cheap");
    }

    #[tokio::test]
    async fn test_list_sort_by_price() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&input("B", "B-1", 20.0, 1)).await.unwrap();
        repo.create(&input("A", "A-1", 10.0, 1)).await.unwrap();
        repo.create(&input("C", "C-1", 30.0, 1)).await.unwrap();

        let params = QueryParams::default().with_sort("price", SortOrder::Asc);
        let page = repo.list(&params, &ProductFilter::default()).await.unwrap();
        let prices: Vec<f64> = page.items.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn test_search_matches_sku() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&input("Hammer", "HAM-1", 1.0, 1)).await.unwrap();
        repo.create(&input("Saw", "SAW-1", 1.0, 1)).await.unwrap();

        let params = QueryParams::default().with_search("ham-");
        let page = repo.list(&params, &ProductFilter::default()).await.unwrap();
        assert_eq!(page.meta.total, 1);
    }

    #[tokio::test]
    async fn test_soft_delete_product() {
        let (_pool, repo) = setup_test_repo().await;
        let product = repo.create(&input("Hammer", "HAM-1", 1.0, 1)).await.unwrap();

        assert!(repo.soft_delete(product.id).await.unwrap());
        assert!(!repo.soft_delete(product.id).await.unwrap());
        assert!(repo.get_by_id(product.id).await.unwrap().is_none());
    }
}
