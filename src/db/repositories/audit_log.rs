//! Audit log repository
//!
//! Append-only store of security relevant actions. Rows are never updated
//! or deleted through this interface.

use crate::config::DatabaseDriver;
use crate::db::pool::{mysql, sqlite};
use crate::db::query::{fetch_page_mysql, fetch_page_sqlite, ListQuery};
use crate::db::DynDatabasePool;
use crate::models::{AuditLog, AuditLogFilter, CreateAuditLogInput, Page, QueryParams, SortOrder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::{parse_opt_uuid, parse_uuid};

const AUDIT_LOG_COLUMNS: &str =
    "id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, created_at";

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    /// Append an entry
    async fn create(&self, input: &CreateAuditLogInput) -> Result<AuditLog>;

    /// List entries, newest first
    async fn list(&self, params: &QueryParams, filter: &AuditLogFilter) -> Result<Page<AuditLog>>;
}

pub struct SqlxAuditLogRepository {
    pool: DynDatabasePool,
}

impl SqlxAuditLogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AuditLogRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AuditLogRepository for SqlxAuditLogRepository {
    async fn create(&self, input: &CreateAuditLogInput) -> Result<AuditLog> {
        let entry = AuditLog {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            action: input.action.clone(),
            resource_type: input.resource_type.clone(),
            resource_id: input.resource_id.clone(),
            details: input.details.clone(),
            ip_address: input.ip_address.clone(),
            user_agent: input.user_agent.clone(),
            created_at: Utc::now(),
        };
        let details = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize audit details")?;

        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                insert_audit_log_sqlite(sqlite(&self.pool)?, &entry, details).await?
            }
            DatabaseDriver::Mysql => {
                insert_audit_log_mysql(mysql(&self.pool)?, &entry, details).await?
            }
        }
        Ok(entry)
    }

    async fn list(&self, params: &QueryParams, filter: &AuditLogFilter) -> Result<Page<AuditLog>> {
        let query = ListQuery::new("audit_logs", AUDIT_LOG_COLUMNS)
            .filter_opt("user_id", filter.user_id)
            .filter_opt("action", filter.action.clone())
            .filter_opt("resource_type", filter.resource_type.clone())
            .paginate(params, &[])
            .sort(None, SortOrder::Desc)
            .build();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_page_sqlite(sqlite(&self.pool)?, &query, row_to_audit_log_sqlite).await
            }
            DatabaseDriver::Mysql => {
                fetch_page_mysql(mysql(&self.pool)?, &query, row_to_audit_log_mysql).await
            }
        }
    }
}

const INSERT_AUDIT_LOG: &str = r#"
    INSERT INTO audit_logs (id, user_id, action, resource_type, resource_id, details,
                            ip_address, user_agent, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

fn parse_details(raw: Option<String>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).context("Invalid audit details JSON"))
        .transpose()
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn insert_audit_log_sqlite(
    pool: &SqlitePool,
    entry: &AuditLog,
    details: Option<String>,
) -> Result<()> {
    sqlx::query(INSERT_AUDIT_LOG)
        .bind(entry.id.to_string())
        .bind(entry.user_id.map(|id| id.to_string()))
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(pool)
        .await
        .context("Failed to insert audit log")?;
    Ok(())
}

fn row_to_audit_log_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<AuditLog> {
    Ok(AuditLog {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_opt_uuid(row.try_get("user_id")?)?,
        action: row.try_get("action")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        details: parse_details(row.try_get("details")?)?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn insert_audit_log_mysql(
    pool: &MySqlPool,
    entry: &AuditLog,
    details: Option<String>,
) -> Result<()> {
    sqlx::query(INSERT_AUDIT_LOG)
        .bind(entry.id.to_string())
        .bind(entry.user_id.map(|id| id.to_string()))
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(pool)
        .await
        .context("Failed to insert audit log")?;
    Ok(())
}

fn row_to_audit_log_mysql(row: &sqlx::mysql::MySqlRow) -> Result<AuditLog> {
    Ok(AuditLog {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        user_id: parse_opt_uuid(row.try_get("user_id")?)?,
        action: row.try_get("action")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        details: parse_details(row.try_get("details")?)?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use serde_json::json;

    async fn setup_test_repo() -> SqlxAuditLogRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxAuditLogRepository::new(pool)
    }

    fn entry(action: &str, resource_type: &str, user_id: Option<Uuid>) -> CreateAuditLogInput {
        CreateAuditLogInput {
            user_id,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: Uuid::new_v4().to_string(),
            details: Some(json!({ "title": "Hello" })),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_roundtrips_details() {
        let repo = setup_test_repo().await;
        let created = repo.create(&entry("create", "post", None)).await.unwrap();

        let page = repo
            .list(&QueryParams::default(), &AuditLogFilter::default())
            .await
            .unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.items[0].id, created.id);
        assert_eq!(page.items[0].details, Some(json!({ "title": "Hello" })));
        assert_eq!(page.items[0].ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_list_filters_by_user_and_action() {
        let repo = setup_test_repo().await;
        let user_id = Uuid::new_v4();
        repo.create(&entry("login", "user", Some(user_id))).await.unwrap();
        repo.create(&entry("create", "post", Some(user_id))).await.unwrap();
        repo.create(&entry("create", "post", None)).await.unwrap();

        let filter = AuditLogFilter {
            user_id: Some(user_id),
            ..Default::default()
        };
        let page = repo.list(&QueryParams::default(), &filter).await.unwrap();
        assert_eq!(page.meta.total, 2);

        let filter = AuditLogFilter {
            action: Some("create".to_string()),
            ..Default::default()
        };
        let page = repo.list(&QueryParams::default(), &filter).await.unwrap();
        assert_eq!(page.meta.total, 2);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let repo = setup_test_repo().await;
        let first = repo.create(&entry("create", "post", None)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = repo.create(&entry("update", "post", None)).await.unwrap();

        let page = repo
            .list(&QueryParams::default(), &AuditLogFilter::default())
            .await
            .unwrap();
        assert_eq!(page.items[0].id, second.id);
        assert_eq!(page.items[1].id, first.id);
    }
}
