//! Audit service
//!
//! Records who did what to which resource. Writing an entry never fails the
//! request that triggered it; errors are logged and dropped.

use crate::db::repositories::AuditLogRepository;
use crate::models::{
    AuditAction, AuditLog, AuditLogFilter, CreateAuditLogInput, Page, PaginationError, QueryParams,
};
use std::sync::Arc;
use uuid::Uuid;

/// Request origin attached to audit entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditServiceError {
    #[error("{0}")]
    Pagination(#[from] PaginationError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct AuditService {
    repo: Arc<dyn AuditLogRepository>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        actor: Option<Uuid>,
        action: AuditAction,
        resource_type: &str,
        resource_id: impl ToString,
        details: Option<serde_json::Value>,
        client: &ClientInfo,
    ) {
        let input = CreateAuditLogInput {
            user_id: actor,
            action: action.as_str().to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        };

        if let Err(e) = self.repo.create(&input).await {
            tracing::error!(
                action = %action,
                resource_type,
                resource_id = %input.resource_id,
                "Failed to write audit log: {:#}",
                e
            );
        }
    }

    pub async fn list(
        &self,
        params: &QueryParams,
        filter: &AuditLogFilter,
    ) -> Result<Page<AuditLog>, AuditServiceError> {
        params.validate()?;
        Ok(self.repo.list(params, filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxAuditLogRepository;
    use crate::db::{create_test_pool, migrations};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingRepo;

    #[async_trait]
    impl AuditLogRepository for FailingRepo {
        async fn create(&self, _input: &CreateAuditLogInput) -> anyhow::Result<AuditLog> {
            anyhow::bail!("database is gone")
        }

        async fn list(
            &self,
            _params: &QueryParams,
            _filter: &AuditLogFilter,
        ) -> anyhow::Result<Page<AuditLog>> {
            anyhow::bail!("database is gone")
        }
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let service = AuditService::new(SqlxAuditLogRepository::boxed(pool));
        let actor = Uuid::new_v4();
        let client = ClientInfo {
            ip_address: Some("192.168.1.5".to_string()),
            user_agent: Some("curl/8.0".to_string()),
        };

        service
            .record(Some(actor), AuditAction::Create, "post", actor, Some(json!({"x": 1})), &client)
            .await;

        let page = service
            .list(&QueryParams::default(), &AuditLogFilter::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].action, "create");
        assert_eq!(page.items[0].user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn test_record_swallows_errors() {
        let service = AuditService::new(Arc::new(FailingRepo));
        service
            .record(None, AuditAction::Login, "user", "x", None, &ClientInfo::default())
            .await;
    }

    #[tokio::test]
    async fn test_list_validates_params() {
        let service = AuditService::new(Arc::new(FailingRepo));
        let result = service
            .list(&QueryParams::new(0, 10), &AuditLogFilter::default())
            .await;
        assert!(matches!(result, Err(AuditServiceError::Pagination(_))));
    }
}
