//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles CRUD operations for a specific entity and reads
//! only live rows unless a method says otherwise.

pub mod audit_log;
pub mod category;
pub mod post;
pub mod product;
pub mod tag;
pub mod user;

use anyhow::{Context, Result};
use uuid::Uuid;

pub use audit_log::{AuditLogRepository, SqlxAuditLogRepository};
pub use category::{CategoryRepository, SqlxCategoryRepository};
pub use post::{PostRepository, SqlxPostRepository};
pub use product::{ProductRepository, SqlxProductRepository};
pub use tag::{SqlxTagRepository, TagRepository};
pub use user::{SqlxUserRepository, UserRepository};

/// Parse a UUID column value
pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid UUID in database: {}", value))
}

pub(crate) fn parse_opt_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

/// Whether a repository error was raised by a UNIQUE index.
///
/// Services pre-check uniqueness for friendly messages, but two concurrent
/// writers can both pass that check; the index then rejects the loser.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}
