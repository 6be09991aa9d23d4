//! Login log repository
//!
//! Security audit trail of login attempts.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{LoginAttempt, LoginLog};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

/// Login log repository trait
#[async_trait]
pub trait LoginLogRepository: Send + Sync {
    async fn record(&self, attempt: &LoginAttempt) -> Result<()>;

    /// Most recent attempts first
    async fn list_recent(&self, limit: i64) -> Result<Vec<LoginLog>>;
}

/// SQLx-based login log repository implementation
pub struct SqlxLoginLogRepository {
    pool: DynDatabasePool,
}

impl SqlxLoginLogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LoginLogRepository> {
        Arc::new(Self::new(pool))
    }
}

const INSERT_LOG: &str = r#"
    INSERT INTO login_logs (email, ip_address, user_agent, success, failure_reason, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const SELECT_RECENT: &str = r#"
    SELECT id, email, ip_address, user_agent, success, failure_reason, created_at
    FROM login_logs
    ORDER BY created_at DESC, id DESC
    LIMIT ?
"#;

#[async_trait]
impl LoginLogRepository for SqlxLoginLogRepository {
    async fn record(&self, attempt: &LoginAttempt) -> Result<()> {
        let now = Utc::now();
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_LOG)
                .bind(&attempt.email)
                .bind(&attempt.ip_address)
                .bind(&attempt.user_agent)
                .bind(attempt.success)
                .bind(&attempt.failure_reason)
                .bind(now)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(INSERT_LOG)
                .bind(&attempt.email)
                .bind(&attempt.ip_address)
                .bind(&attempt.user_agent)
                .bind(attempt.success)
                .bind(&attempt.failure_reason)
                .bind(now)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to record login attempt")
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<LoginLog>> {
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(SELECT_RECENT)
                    .bind(limit)
                    .fetch_all(p)
                    .await
                    .context("Failed to list login logs")?;
                Ok(rows
                    .iter()
                    .map(|row| LoginLog {
                        id: row.get("id"),
                        email: row.get("email"),
                        ip_address: row.get("ip_address"),
                        user_agent: row.get("user_agent"),
                        success: row.get("success"),
                        failure_reason: row.get("failure_reason"),
                        created_at: row.get("created_at"),
                    })
                    .collect())
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(SELECT_RECENT)
                    .bind(limit)
                    .fetch_all(p)
                    .await
                    .context("Failed to list login logs")?;
                Ok(rows
                    .iter()
                    .map(|row| LoginLog {
                        id: row.get("id"),
                        email: row.get("email"),
                        ip_address: row.get("ip_address"),
                        user_agent: row.get("user_agent"),
                        success: row.get("success"),
                        failure_reason: row.get("failure_reason"),
                        created_at: row.get("created_at"),
                    })
                    .collect())
            }
        }
    }
}
