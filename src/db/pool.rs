//! Connection pools
//!
//! One [`SqlxDatabase`] value wraps whichever sqlx pool the configured driver
//! calls for. Callers hold it as a [`DynDatabasePool`] and only reach the
//! concrete pool through [`Backend`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{DatabaseConfig, DatabaseDriver};

const SQLITE_MAX_CONNECTIONS: u32 = 8;
const MYSQL_MAX_CONNECTIONS: u32 = 20;

/// Borrowed handle to the concrete pool; repositories match on it to pick a
/// dialect.
#[derive(Clone, Copy)]
pub enum Backend<'a> {
    Sqlite(&'a SqlitePool),
    Mysql(&'a MySqlPool),
}

#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run a statement that returns no rows, yielding rows affected
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Round-trip a trivial query
    async fn ping(&self) -> Result<()>;

    async fn close(&self);

    fn driver(&self) -> DatabaseDriver;

    fn backend(&self) -> Backend<'_>;
}

pub type DynDatabasePool = Arc<dyn DatabasePool>;

pub enum SqlxDatabase {
    Sqlite(SqlitePool),
    Mysql(MySqlPool),
}

impl SqlxDatabase {
    /// Open a SQLite database, creating the file and its parent directories.
    ///
    /// Accepts a bare path, a `sqlite:` URL, or `:memory:`.
    pub async fn sqlite(url: &str) -> Result<Self> {
        let target = url.strip_prefix("sqlite:").unwrap_or(url);
        let in_memory = target == ":memory:";

        if !in_memory {
            let file = target.split('?').next().unwrap_or(target);
            if let Some(dir) = Path::new(file).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Cannot create database directory {}", dir.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", target))
            .with_context(|| format!("Invalid SQLite location: {}", url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(SQLITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("Cannot open SQLite database {}", url))?;

        Ok(Self::Sqlite(pool))
    }

    /// Connect to MySQL; the `mysql://` scheme may be omitted
    pub async fn mysql(url: &str) -> Result<Self> {
        let url = if url.starts_with("mysql://") {
            url.to_string()
        } else {
            format!("mysql://{}", url)
        };
        let options = MySqlConnectOptions::from_str(&url).context("Invalid MySQL URL")?;

        let pool = MySqlPoolOptions::new()
            .max_connections(MYSQL_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context("Cannot connect to MySQL")?;

        Ok(Self::Mysql(pool))
    }
}

#[async_trait]
impl DatabasePool for SqlxDatabase {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let done = match self {
            Self::Sqlite(p) => sqlx::query(sql).execute(p).await.map(|r| r.rows_affected()),
            Self::Mysql(p) => sqlx::query(sql).execute(p).await.map(|r| r.rows_affected()),
        };
        done.with_context(|| format!("Statement failed: {}", sql))
    }

    async fn ping(&self) -> Result<()> {
        let pinged = match self {
            Self::Sqlite(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            Self::Mysql(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
        };
        pinged.context("Database ping failed")
    }

    async fn close(&self) {
        match self {
            Self::Sqlite(p) => p.close().await,
            Self::Mysql(p) => p.close().await,
        }
    }

    fn driver(&self) -> DatabaseDriver {
        match self {
            Self::Sqlite(_) => DatabaseDriver::Sqlite,
            Self::Mysql(_) => DatabaseDriver::Mysql,
        }
    }

    fn backend(&self) -> Backend<'_> {
        match self {
            Self::Sqlite(p) => Backend::Sqlite(p),
            Self::Mysql(p) => Backend::Mysql(p),
        }
    }
}

/// Open the pool the configuration asks for
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    let db = match config.driver {
        DatabaseDriver::Sqlite => SqlxDatabase::sqlite(&config.url).await?,
        DatabaseDriver::Mysql => SqlxDatabase::mysql(&config.url).await?,
    };
    Ok(Arc::new(db))
}

/// Private in-memory SQLite database; each call gets a fresh one
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    Ok(Arc::new(SqlxDatabase::sqlite(":memory:").await?))
}
