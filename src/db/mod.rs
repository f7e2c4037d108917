//! Database layer
//!
//! Supports two drivers behind one [`DatabasePool`] trait:
//! - SQLite (default, file or in-memory)
//! - MySQL
//!
//! The driver is selected by `database.driver` in the configuration.
//! Repositories match on [`DatabasePool::driver`] and run the same SQL on
//! whichever pool is active.
//!
//! # Usage
//!
//! ```ignore
//! use crud_starter::config::DatabaseConfig;
//! use crud_starter::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod query;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
pub use query::{BuiltQuery, Condition, ListQuery, SqlValue};
