//! crud-starter - a starter template for CRUD-style HTTP APIs
//!
//! This library provides users with token authentication, posts and tags,
//! a small product catalog and an audit log, served over axum with a
//! SQLite or MySQL store and an in-memory or Redis cache.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
