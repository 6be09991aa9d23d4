//! Database layer
//!
//! Storage for the portal. It supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The driver is selected from configuration.
//!
//! # Architecture
//!
//! Application code only sees the `DatabasePool` trait. Repositories ask the
//! pool for its [`Backend`] and run the dialect-specific query.
//!
//! # Usage
//!
//! ```ignore
//! use homer_hub::config::DatabaseConfig;
//! use homer_hub::db::{create_pool, migrations};
//!
//! let config = DatabaseConfig::default();
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, Backend, DatabasePool, DynDatabasePool, SqlxDatabase};
