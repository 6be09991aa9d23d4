//! Registration repository
//!
//! Database operations for student/program registrations.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{Registration, RegistrationDetail, RegistrationFilter, RegistrationStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Registration repository trait
#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn create(&self, registration: &Registration) -> Result<Registration>;

    async fn get_by_id(&self, id: i64) -> Result<Option<RegistrationDetail>>;

    /// The registration row for a student/program pair, whatever its status
    async fn find(&self, student_id: i64, program_id: i64) -> Result<Option<Registration>>;

    /// Set status (and optionally notes) on a registration
    async fn set_status(
        &self,
        id: i64,
        status: RegistrationStatus,
        notes: Option<&str>,
    ) -> Result<()>;

    /// Pending + confirmed registrations for a program
    async fn count_seats(&self, program_id: i64) -> Result<i64>;

    /// Registrations for every student of a guardian, newest first
    async fn list_by_guardian(&self, guardian_id: i64) -> Result<Vec<RegistrationDetail>>;

    /// All registrations matching `filter`, newest first
    async fn list(&self, filter: &RegistrationFilter) -> Result<Vec<RegistrationDetail>>;

    /// Registration counts grouped by status
    async fn count_by_status(&self) -> Result<Vec<(RegistrationStatus, i64)>>;
}

/// SQLx-based registration repository implementation
pub struct SqlxRegistrationRepository {
    pool: DynDatabasePool,
}

impl SqlxRegistrationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RegistrationRepository> {
        Arc::new(Self::new(pool))
    }
}

const DETAIL_SELECT: &str = r#"
    SELECT r.id, r.student_id, r.program_id, r.status, r.notes, r.created_at, r.updated_at,
           s.guardian_id, s.first_name, s.last_name, p.name AS program_name
    FROM registrations r
    JOIN students s ON s.id = r.student_id
    JOIN programs p ON p.id = r.program_id
"#;

#[async_trait]
impl RegistrationRepository for SqlxRegistrationRepository {
    async fn create(&self, registration: &Registration) -> Result<Registration> {
        match self.pool.backend() {
            Backend::Sqlite(p) => create_registration_sqlite(p, registration).await,
            Backend::Mysql(p) => create_registration_mysql(p, registration).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<RegistrationDetail>> {
        let sql = format!("{} WHERE r.id = ?", DETAIL_SELECT);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get registration")?;
                row.as_ref().map(row_to_detail_sqlite).transpose()
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get registration")?;
                row.as_ref().map(row_to_detail_mysql).transpose()
            }
        }
    }

    async fn find(&self, student_id: i64, program_id: i64) -> Result<Option<Registration>> {
        let sql = r#"
            SELECT id, student_id, program_id, status, notes, created_at, updated_at
            FROM registrations
            WHERE student_id = ? AND program_id = ?
        "#;
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(sql)
                    .bind(student_id)
                    .bind(program_id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to find registration")?;
                row.as_ref().map(row_to_registration_sqlite).transpose()
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(sql)
                    .bind(student_id)
                    .bind(program_id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to find registration")?;
                row.as_ref().map(row_to_registration_mysql).transpose()
            }
        }
    }

    async fn set_status(
        &self,
        id: i64,
        status: RegistrationStatus,
        notes: Option<&str>,
    ) -> Result<()> {
        let sql = "UPDATE registrations SET status = ?, notes = COALESCE(?, notes), updated_at = ? WHERE id = ?";
        let now = Utc::now();
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql)
                .bind(status.to_string())
                .bind(notes)
                .bind(now)
                .bind(id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(sql)
                .bind(status.to_string())
                .bind(notes)
                .bind(now)
                .bind(id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to update registration status")
    }

    async fn count_seats(&self, program_id: i64) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM registrations WHERE program_id = ? AND status IN ('pending', 'confirmed')";
        let count = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_scalar(sql).bind(program_id).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_scalar(sql).bind(program_id).fetch_one(p).await,
        }
        .context("Failed to count program seats")?;
        Ok(count)
    }

    async fn list_by_guardian(&self, guardian_id: i64) -> Result<Vec<RegistrationDetail>> {
        let sql = format!(
            "{} WHERE s.guardian_id = ? ORDER BY r.created_at DESC, r.id DESC",
            DETAIL_SELECT
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(&sql)
                    .bind(guardian_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list guardian registrations")?;
                rows.iter().map(row_to_detail_sqlite).collect()
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(&sql)
                    .bind(guardian_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list guardian registrations")?;
                rows.iter().map(row_to_detail_mysql).collect()
            }
        }
    }

    async fn list(&self, filter: &RegistrationFilter) -> Result<Vec<RegistrationDetail>> {
        let sql = format!(
            "{} WHERE (? IS NULL OR r.status = ?) AND (? IS NULL OR r.program_id = ?) \
             ORDER BY r.created_at DESC, r.id DESC",
            DETAIL_SELECT
        );
        let status = filter.status.map(|s| s.to_string());
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(&sql)
                    .bind(&status)
                    .bind(&status)
                    .bind(filter.program_id)
                    .bind(filter.program_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list registrations")?;
                rows.iter().map(row_to_detail_sqlite).collect()
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(&sql)
                    .bind(&status)
                    .bind(&status)
                    .bind(filter.program_id)
                    .bind(filter.program_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list registrations")?;
                rows.iter().map(row_to_detail_mysql).collect()
            }
        }
    }

    async fn count_by_status(&self) -> Result<Vec<(RegistrationStatus, i64)>> {
        let sql = "SELECT status, COUNT(*) AS count FROM registrations GROUP BY status";
        let pairs: Vec<(String, i64)> = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(sql).fetch_all(p).await,
            Backend::Mysql(p) => sqlx::query_as(sql).fetch_all(p).await,
        }
        .context("Failed to count registrations by status")?;

        Ok(pairs
            .into_iter()
            .filter_map(|(status, count)| {
                RegistrationStatus::from_str(&status)
                    .ok()
                    .map(|status| (status, count))
            })
            .collect())
    }
}

const INSERT_REGISTRATION: &str = r#"
    INSERT INTO registrations (student_id, program_id, status, notes, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

fn parse_status(raw: &str) -> Result<RegistrationStatus> {
    RegistrationStatus::from_str(raw)
        .with_context(|| format!("Invalid registration status in database: {}", raw))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_registration_sqlite(
    pool: &SqlitePool,
    registration: &Registration,
) -> Result<Registration> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_REGISTRATION)
        .bind(registration.student_id)
        .bind(registration.program_id)
        .bind(registration.status.to_string())
        .bind(&registration.notes)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create registration")?;

    Ok(Registration {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..registration.clone()
    })
}

fn row_to_registration_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Registration> {
    Ok(Registration {
        id: row.get("id"),
        student_id: row.get("student_id"),
        program_id: row.get("program_id"),
        status: parse_status(&row.get::<String, _>("status"))?,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_detail_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<RegistrationDetail> {
    let first: String = row.get("first_name");
    let last: String = row.get("last_name");
    Ok(RegistrationDetail {
        registration: row_to_registration_sqlite(row)?,
        guardian_id: row.get("guardian_id"),
        student_name: format!("{} {}", first, last),
        program_name: row.get("program_name"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_registration_mysql(
    pool: &MySqlPool,
    registration: &Registration,
) -> Result<Registration> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_REGISTRATION)
        .bind(registration.student_id)
        .bind(registration.program_id)
        .bind(registration.status.to_string())
        .bind(&registration.notes)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create registration")?;

    Ok(Registration {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..registration.clone()
    })
}

fn row_to_registration_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Registration> {
    Ok(Registration {
        id: row.get("id"),
        student_id: row.get("student_id"),
        program_id: row.get("program_id"),
        status: parse_status(&row.get::<String, _>("status"))?,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_detail_mysql(row: &sqlx::mysql::MySqlRow) -> Result<RegistrationDetail> {
    let first: String = row.get("first_name");
    let last: String = row.get("last_name");
    Ok(RegistrationDetail {
        registration: row_to_registration_mysql(row)?,
        guardian_id: row.get("guardian_id"),
        student_name: format!("{} {}", first, last),
        program_name: row.get("program_name"),
    })
}
