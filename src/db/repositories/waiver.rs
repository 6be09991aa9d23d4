//! Waiver repository
//!
//! Database operations for student waivers.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{Waiver, WaiverStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

/// Waiver repository trait
#[async_trait]
pub trait WaiverRepository: Send + Sync {
    async fn create(&self, waiver: &Waiver) -> Result<Waiver>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Waiver>>;

    /// Waivers for every student of a guardian
    async fn list_by_guardian(&self, guardian_id: i64) -> Result<Vec<Waiver>>;

    /// Every waiver, newest first
    async fn list_all(&self) -> Result<Vec<Waiver>>;

    /// Persist the signature fields of `waiver`
    async fn save_signature(&self, waiver: &Waiver) -> Result<()>;

    /// Waivers still awaiting a signature
    async fn count_pending(&self) -> Result<i64>;

    /// Waivers whose signature has lapsed as of `now`
    async fn count_expired(&self, now: DateTime<Utc>) -> Result<i64>;
}

/// SQLx-based waiver repository implementation
pub struct SqlxWaiverRepository {
    pool: DynDatabasePool,
}

impl SqlxWaiverRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn WaiverRepository> {
        Arc::new(Self::new(pool))
    }
}

const WAIVER_COLUMNS: &str =
    "w.id, w.student_id, w.title, w.status, w.signed_by, w.signed_at, w.expires_at, w.created_at";

#[async_trait]
impl WaiverRepository for SqlxWaiverRepository {
    async fn create(&self, waiver: &Waiver) -> Result<Waiver> {
        let sql = r#"
            INSERT INTO waivers (student_id, title, status, signed_by, signed_at, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;
        let now = Utc::now();
        let id = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql)
                .bind(waiver.student_id)
                .bind(&waiver.title)
                .bind(waiver.status.to_string())
                .bind(&waiver.signed_by)
                .bind(waiver.signed_at)
                .bind(waiver.expires_at)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_rowid()),
            Backend::Mysql(p) => sqlx::query(sql)
                .bind(waiver.student_id)
                .bind(&waiver.title)
                .bind(waiver.status.to_string())
                .bind(&waiver.signed_by)
                .bind(waiver.signed_at)
                .bind(waiver.expires_at)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .context("Failed to create waiver")?;

        Ok(Waiver {
            id,
            created_at: now,
            ..waiver.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Waiver>> {
        let sql = format!("SELECT {} FROM waivers w WHERE w.id = ?", WAIVER_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get waiver")?;
                row.as_ref().map(row_to_waiver_sqlite).transpose()
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get waiver")?;
                row.as_ref().map(row_to_waiver_mysql).transpose()
            }
        }
    }

    async fn list_by_guardian(&self, guardian_id: i64) -> Result<Vec<Waiver>> {
        let sql = format!(
            "SELECT {} FROM waivers w JOIN students s ON s.id = w.student_id \
             WHERE s.guardian_id = ? ORDER BY w.created_at DESC, w.id DESC",
            WAIVER_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(&sql)
                    .bind(guardian_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list guardian waivers")?;
                rows.iter().map(row_to_waiver_sqlite).collect()
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(&sql)
                    .bind(guardian_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list guardian waivers")?;
                rows.iter().map(row_to_waiver_mysql).collect()
            }
        }
    }

    async fn list_all(&self) -> Result<Vec<Waiver>> {
        let sql = format!(
            "SELECT {} FROM waivers w ORDER BY w.created_at DESC, w.id DESC",
            WAIVER_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(&sql)
                    .fetch_all(p)
                    .await
                    .context("Failed to list waivers")?;
                rows.iter().map(row_to_waiver_sqlite).collect()
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(&sql)
                    .fetch_all(p)
                    .await
                    .context("Failed to list waivers")?;
                rows.iter().map(row_to_waiver_mysql).collect()
            }
        }
    }

    async fn save_signature(&self, waiver: &Waiver) -> Result<()> {
        let sql = "UPDATE waivers SET status = ?, signed_by = ?, signed_at = ?, expires_at = ? WHERE id = ?";
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql)
                .bind(waiver.status.to_string())
                .bind(&waiver.signed_by)
                .bind(waiver.signed_at)
                .bind(waiver.expires_at)
                .bind(waiver.id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(sql)
                .bind(waiver.status.to_string())
                .bind(&waiver.signed_by)
                .bind(waiver.signed_at)
                .bind(waiver.expires_at)
                .bind(waiver.id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to save waiver signature")
    }

    async fn count_pending(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM waivers WHERE status = 'pending'";
        let count = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_scalar(sql).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_scalar(sql).fetch_one(p).await,
        }
        .context("Failed to count pending waivers")?;
        Ok(count)
    }

    async fn count_expired(&self, now: DateTime<Utc>) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM waivers WHERE status = 'expired' \
                   OR (status = 'signed' AND expires_at IS NOT NULL AND expires_at <= ?)";
        let count = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_scalar(sql).bind(now).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_scalar(sql).bind(now).fetch_one(p).await,
        }
        .context("Failed to count expired waivers")?;
        Ok(count)
    }
}

fn parse_status(raw: &str) -> Result<WaiverStatus> {
    WaiverStatus::from_str(raw).with_context(|| format!("Invalid waiver status in database: {}", raw))
}

fn row_to_waiver_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Waiver> {
    Ok(Waiver {
        id: row.get("id"),
        student_id: row.get("student_id"),
        title: row.get("title"),
        status: parse_status(&row.get::<String, _>("status"))?,
        signed_by: row.get("signed_by"),
        signed_at: row.get("signed_at"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_waiver_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Waiver> {
    Ok(Waiver {
        id: row.get("id"),
        student_id: row.get("student_id"),
        title: row.get("title"),
        status: parse_status(&row.get::<String, _>("status"))?,
        signed_by: row.get("signed_by"),
        signed_at: row.get("signed_at"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_student, seed_user, setup_pool};
    use chrono::Duration;

    #[tokio::test]
    async fn test_create_and_sign_waiver() {
        let pool = setup_pool().await;
        let guardian = seed_user(&pool, "g@example.com").await;
        let student = seed_student(&pool, guardian, "Ada").await;
        let repo = SqlxWaiverRepository::new(pool);

        let mut waiver = repo
            .create(&Waiver::new(student, "Liability release".to_string()))
            .await
            .unwrap();
        assert_eq!(waiver.status, WaiverStatus::Pending);
        assert_eq!(repo.count_pending().await.unwrap(), 1);

        waiver.sign("Pat Lee".to_string(), Utc::now());
        repo.save_signature(&waiver).await.unwrap();

        let found = repo.get_by_id(waiver.id).await.unwrap().unwrap();
        assert_eq!(found.status, WaiverStatus::Signed);
        assert_eq!(found.signed_by.as_deref(), Some("Pat Lee"));
        assert!(found.expires_at.is_some());
        assert_eq!(repo.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_expired_uses_expiry() {
        let pool = setup_pool().await;
        let guardian = seed_user(&pool, "g@example.com").await;
        let student = seed_student(&pool, guardian, "Ada").await;
        let repo = SqlxWaiverRepository::new(pool);

        let mut old = repo
            .create(&Waiver::new(student, "Old".to_string()))
            .await
            .unwrap();
        old.sign("Pat Lee".to_string(), Utc::now() - Duration::days(400));
        repo.save_signature(&old).await.unwrap();

        let mut fresh = repo
            .create(&Waiver::new(student, "Fresh".to_string()))
            .await
            .unwrap();
        fresh.sign("Pat Lee".to_string(), Utc::now());
        repo.save_signature(&fresh).await.unwrap();

        assert_eq!(repo.count_expired(Utc::now()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_by_guardian() {
        let pool = setup_pool().await;
        let alice = seed_user(&pool, "alice@example.com").await;
        let bob = seed_user(&pool, "bob@example.com").await;
        let a = seed_student(&pool, alice, "A").await;
        let b = seed_student(&pool, bob, "B").await;
        let repo = SqlxWaiverRepository::new(pool);

        repo.create(&Waiver::new(a, "Liability".to_string())).await.unwrap();
        repo.create(&Waiver::new(b, "Liability".to_string())).await.unwrap();

        let alices = repo.list_by_guardian(alice).await.unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].student_id, a);
        assert_eq!(repo.list_all().await.unwrap().len(), 2);
    }
}
