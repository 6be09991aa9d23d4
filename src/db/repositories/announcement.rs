//! Announcement repository
//!
//! Database operations for announcements and per-user receipts.
//!
//! Receipt writes are upserts, which differ between dialects:
//! SQLite uses `ON CONFLICT ... DO UPDATE`, MySQL `ON DUPLICATE KEY UPDATE`.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{
    Announcement, AnnouncementPriority, AnnouncementReceipt, AnnouncementStatus, Recipients,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Announcement repository trait
#[async_trait]
pub trait AnnouncementRepository: Send + Sync {
    async fn create(&self, announcement: &Announcement) -> Result<Announcement>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Announcement>>;

    async fn update(&self, announcement: &Announcement) -> Result<Announcement>;

    async fn delete(&self, id: i64) -> Result<()>;

    /// All announcements including drafts, newest first
    async fn list_all(&self) -> Result<Vec<Announcement>>;

    /// Published announcements, unordered
    async fn list_published(&self) -> Result<Vec<Announcement>>;

    async fn count_published(&self) -> Result<i64>;

    /// A user's receipts across all announcements
    async fn receipts_for_user(&self, user_id: i64) -> Result<Vec<AnnouncementReceipt>>;

    /// Record a read; the first read time is kept
    async fn mark_read(&self, announcement_id: i64, user_id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn set_hidden(&self, announcement_id: i64, user_id: i64, hidden: bool) -> Result<()>;
}

/// SQLx-based announcement repository implementation
pub struct SqlxAnnouncementRepository {
    pool: DynDatabasePool,
}

impl SqlxAnnouncementRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AnnouncementRepository> {
        Arc::new(Self::new(pool))
    }
}

const ANNOUNCEMENT_COLUMNS: &str = "id, title, body, priority, status, recipients, author_id, published_at, expires_at, created_at, updated_at";

#[async_trait]
impl AnnouncementRepository for SqlxAnnouncementRepository {
    async fn create(&self, announcement: &Announcement) -> Result<Announcement> {
        match self.pool.backend() {
            Backend::Sqlite(p) => create_announcement_sqlite(p, announcement).await,
            Backend::Mysql(p) => create_announcement_mysql(p, announcement).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Announcement>> {
        let sql = format!("SELECT {} FROM announcements WHERE id = ?", ANNOUNCEMENT_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get announcement")?;
                row.as_ref().map(row_to_announcement_sqlite).transpose()
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get announcement")?;
                row.as_ref().map(row_to_announcement_mysql).transpose()
            }
        }
    }

    async fn update(&self, announcement: &Announcement) -> Result<Announcement> {
        let sql = r#"
            UPDATE announcements
            SET title = ?, body = ?, priority = ?, status = ?, recipients = ?,
                published_at = ?, expires_at = ?, updated_at = ?
            WHERE id = ?
        "#;
        let now = Utc::now();
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql)
                .bind(&announcement.title)
                .bind(&announcement.body)
                .bind(announcement.priority.to_string())
                .bind(announcement.status.to_string())
                .bind(announcement.recipients.to_string())
                .bind(announcement.published_at)
                .bind(announcement.expires_at)
                .bind(now)
                .bind(announcement.id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(sql)
                .bind(&announcement.title)
                .bind(&announcement.body)
                .bind(announcement.priority.to_string())
                .bind(announcement.status.to_string())
                .bind(announcement.recipients.to_string())
                .bind(announcement.published_at)
                .bind(announcement.expires_at)
                .bind(now)
                .bind(announcement.id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to update announcement")?;

        self.get_by_id(announcement.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Announcement not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let sql = "DELETE FROM announcements WHERE id = ?";
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql).bind(id).execute(p).await.map(|_| ()),
            Backend::Mysql(p) => sqlx::query(sql).bind(id).execute(p).await.map(|_| ()),
        }
        .context("Failed to delete announcement")
    }

    async fn list_all(&self) -> Result<Vec<Announcement>> {
        let sql = format!(
            "SELECT {} FROM announcements ORDER BY created_at DESC, id DESC",
            ANNOUNCEMENT_COLUMNS
        );
        self.fetch_many(&sql).await
    }

    async fn list_published(&self) -> Result<Vec<Announcement>> {
        let sql = format!(
            "SELECT {} FROM announcements WHERE status = 'published'",
            ANNOUNCEMENT_COLUMNS
        );
        self.fetch_many(&sql).await
    }

    async fn count_published(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM announcements WHERE status = 'published'";
        let count = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_scalar(sql).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_scalar(sql).fetch_one(p).await,
        }
        .context("Failed to count published announcements")?;
        Ok(count)
    }

    async fn receipts_for_user(&self, user_id: i64) -> Result<Vec<AnnouncementReceipt>> {
        let sql = "SELECT announcement_id, user_id, read_at, hidden FROM announcement_receipts WHERE user_id = ?";
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(sql)
                    .bind(user_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to load receipts")?;
                Ok(rows
                    .iter()
                    .map(|row| AnnouncementReceipt {
                        announcement_id: row.get("announcement_id"),
                        user_id: row.get("user_id"),
                        read_at: row.get("read_at"),
                        hidden: row.get("hidden"),
                    })
                    .collect())
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(sql)
                    .bind(user_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to load receipts")?;
                Ok(rows
                    .iter()
                    .map(|row| AnnouncementReceipt {
                        announcement_id: row.get("announcement_id"),
                        user_id: row.get("user_id"),
                        read_at: row.get("read_at"),
                        hidden: row.get("hidden"),
                    })
                    .collect())
            }
        }
    }

    async fn mark_read(&self, announcement_id: i64, user_id: i64, at: DateTime<Utc>) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => mark_read_sqlite(p, announcement_id, user_id, at).await,
            Backend::Mysql(p) => mark_read_mysql(p, announcement_id, user_id, at).await,
        }
    }

    async fn set_hidden(&self, announcement_id: i64, user_id: i64, hidden: bool) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => set_hidden_sqlite(p, announcement_id, user_id, hidden).await,
            Backend::Mysql(p) => set_hidden_mysql(p, announcement_id, user_id, hidden).await,
        }
    }
}

impl SqlxAnnouncementRepository {
    async fn fetch_many(&self, sql: &str) -> Result<Vec<Announcement>> {
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(sql)
                    .fetch_all(p)
                    .await
                    .context("Failed to list announcements")?;
                rows.iter().map(row_to_announcement_sqlite).collect()
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(sql)
                    .fetch_all(p)
                    .await
                    .context("Failed to list announcements")?;
                rows.iter().map(row_to_announcement_mysql).collect()
            }
        }
    }
}

const INSERT_ANNOUNCEMENT: &str = r#"
    INSERT INTO announcements (title, body, priority, status, recipients, author_id,
                               published_at, expires_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

struct AnnouncementFields {
    priority: String,
    status: String,
    recipients: String,
}

fn parse_fields(fields: AnnouncementFields) -> Result<(AnnouncementPriority, AnnouncementStatus, Recipients)> {
    Ok((
        AnnouncementPriority::from_str(&fields.priority)
            .with_context(|| format!("Invalid priority in database: {}", fields.priority))?,
        AnnouncementStatus::from_str(&fields.status)
            .with_context(|| format!("Invalid status in database: {}", fields.status))?,
        Recipients::from_str(&fields.recipients)
            .with_context(|| format!("Invalid recipients in database: {}", fields.recipients))?,
    ))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_announcement_sqlite(
    pool: &SqlitePool,
    announcement: &Announcement,
) -> Result<Announcement> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_ANNOUNCEMENT)
        .bind(&announcement.title)
        .bind(&announcement.body)
        .bind(announcement.priority.to_string())
        .bind(announcement.status.to_string())
        .bind(announcement.recipients.to_string())
        .bind(announcement.author_id)
        .bind(announcement.published_at)
        .bind(announcement.expires_at)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create announcement")?;

    Ok(Announcement {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..announcement.clone()
    })
}

async fn mark_read_sqlite(
    pool: &SqlitePool,
    announcement_id: i64,
    user_id: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO announcement_receipts (announcement_id, user_id, read_at, hidden)
        VALUES (?, ?, ?, 0)
        ON CONFLICT(announcement_id, user_id)
        DO UPDATE SET read_at = COALESCE(announcement_receipts.read_at, excluded.read_at)
        "#,
    )
    .bind(announcement_id)
    .bind(user_id)
    .bind(at)
    .execute(pool)
    .await
    .context("Failed to mark announcement read")?;
    Ok(())
}

async fn set_hidden_sqlite(
    pool: &SqlitePool,
    announcement_id: i64,
    user_id: i64,
    hidden: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO announcement_receipts (announcement_id, user_id, read_at, hidden)
        VALUES (?, ?, NULL, ?)
        ON CONFLICT(announcement_id, user_id)
        DO UPDATE SET hidden = excluded.hidden
        "#,
    )
    .bind(announcement_id)
    .bind(user_id)
    .bind(hidden)
    .execute(pool)
    .await
    .context("Failed to update announcement visibility")?;
    Ok(())
}

fn row_to_announcement_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Announcement> {
    let (priority, status, recipients) = parse_fields(AnnouncementFields {
        priority: row.get("priority"),
        status: row.get("status"),
        recipients: row.get("recipients"),
    })?;
    Ok(Announcement {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        priority,
        status,
        recipients,
        author_id: row.get("author_id"),
        published_at: row.get("published_at"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_announcement_mysql(
    pool: &MySqlPool,
    announcement: &Announcement,
) -> Result<Announcement> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_ANNOUNCEMENT)
        .bind(&announcement.title)
        .bind(&announcement.body)
        .bind(announcement.priority.to_string())
        .bind(announcement.status.to_string())
        .bind(announcement.recipients.to_string())
        .bind(announcement.author_id)
        .bind(announcement.published_at)
        .bind(announcement.expires_at)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create announcement")?;

    Ok(Announcement {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..announcement.clone()
    })
}

async fn mark_read_mysql(
    pool: &MySqlPool,
    announcement_id: i64,
    user_id: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO announcement_receipts (announcement_id, user_id, read_at, hidden)
        VALUES (?, ?, ?, 0)
        ON DUPLICATE KEY UPDATE read_at = COALESCE(read_at, VALUES(read_at))
        "#,
    )
    .bind(announcement_id)
    .bind(user_id)
    .bind(at)
    .execute(pool)
    .await
    .context("Failed to mark announcement read")?;
    Ok(())
}

async fn set_hidden_mysql(
    pool: &MySqlPool,
    announcement_id: i64,
    user_id: i64,
    hidden: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO announcement_receipts (announcement_id, user_id, read_at, hidden)
        VALUES (?, ?, NULL, ?)
        ON DUPLICATE KEY UPDATE hidden = VALUES(hidden)
        "#,
    )
    .bind(announcement_id)
    .bind(user_id)
    .bind(hidden)
    .execute(pool)
    .await
    .context("Failed to update announcement visibility")?;
    Ok(())
}

fn row_to_announcement_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Announcement> {
    let (priority, status, recipients) = parse_fields(AnnouncementFields {
        priority: row.get("priority"),
        status: row.get("status"),
        recipients: row.get("recipients"),
    })?;
    Ok(Announcement {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        priority,
        status,
        recipients,
        author_id: row.get("author_id"),
        published_at: row.get("published_at"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
