//! Program repository
//!
//! Database operations for programs. Listings carry the number of
//! seat-holding (pending or confirmed) registrations per program.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{Program, ProgramSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Program repository trait
#[async_trait]
pub trait ProgramRepository: Send + Sync {
    async fn create(&self, program: &Program) -> Result<Program>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Program>>;

    /// List programs with enrolment, ordered by start date then name
    async fn list_with_enrollment(&self, active_only: bool) -> Result<Vec<ProgramSummary>>;

    async fn update(&self, program: &Program) -> Result<Program>;

    async fn delete(&self, id: i64) -> Result<()>;

    async fn count_active(&self) -> Result<i64>;
}

/// SQLx-based program repository implementation
pub struct SqlxProgramRepository {
    pool: DynDatabasePool,
}

impl SqlxProgramRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ProgramRepository> {
        Arc::new(Self::new(pool))
    }
}

const PROGRAM_COLUMNS: &str = "p.id, p.name, p.description, p.location, p.schedule, p.start_date, p.end_date, p.capacity, p.price_cents, p.min_grade, p.max_grade, p.is_active, p.created_at, p.updated_at";

const ENROLLED_SUBQUERY: &str = "(SELECT COUNT(*) FROM registrations r WHERE r.program_id = p.id AND r.status IN ('pending', 'confirmed'))";

fn list_sql(active_only: bool) -> String {
    format!(
        "SELECT {}, {} AS enrolled FROM programs p {} ORDER BY p.start_date IS NULL, p.start_date, p.name",
        PROGRAM_COLUMNS,
        ENROLLED_SUBQUERY,
        if active_only { "WHERE p.is_active = 1" } else { "" }
    )
}

#[async_trait]
impl ProgramRepository for SqlxProgramRepository {
    async fn create(&self, program: &Program) -> Result<Program> {
        match self.pool.backend() {
            Backend::Sqlite(p) => create_program_sqlite(p, program).await,
            Backend::Mysql(p) => create_program_mysql(p, program).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Program>> {
        let sql = format!("SELECT {} FROM programs p WHERE p.id = ?", PROGRAM_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get program by ID")?;
                Ok(row.as_ref().map(row_to_program_sqlite))
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get program by ID")?;
                Ok(row.as_ref().map(row_to_program_mysql))
            }
        }
    }

    async fn list_with_enrollment(&self, active_only: bool) -> Result<Vec<ProgramSummary>> {
        let sql = list_sql(active_only);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(&sql)
                    .fetch_all(p)
                    .await
                    .context("Failed to list programs")?;
                Ok(rows
                    .iter()
                    .map(|row| ProgramSummary::new(row_to_program_sqlite(row), row.get("enrolled")))
                    .collect())
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(&sql)
                    .fetch_all(p)
                    .await
                    .context("Failed to list programs")?;
                Ok(rows
                    .iter()
                    .map(|row| ProgramSummary::new(row_to_program_mysql(row), row.get("enrolled")))
                    .collect())
            }
        }
    }

    async fn update(&self, program: &Program) -> Result<Program> {
        match self.pool.backend() {
            Backend::Sqlite(p) => update_program_sqlite(p, program).await?,
            Backend::Mysql(p) => update_program_mysql(p, program).await?,
        }
        self.get_by_id(program.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Program not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let sql = "DELETE FROM programs WHERE id = ?";
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql).bind(id).execute(p).await.map(|_| ()),
            Backend::Mysql(p) => sqlx::query(sql).bind(id).execute(p).await.map(|_| ()),
        }
        .context("Failed to delete program")
    }

    async fn count_active(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM programs WHERE is_active = 1";
        let count = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_scalar(sql).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_scalar(sql).fetch_one(p).await,
        }
        .context("Failed to count active programs")?;
        Ok(count)
    }
}

const INSERT_PROGRAM: &str = r#"
    INSERT INTO programs (name, description, location, schedule, start_date, end_date, capacity,
                          price_cents, min_grade, max_grade, is_active, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_PROGRAM: &str = r#"
    UPDATE programs
    SET name = ?, description = ?, location = ?, schedule = ?, start_date = ?, end_date = ?,
        capacity = ?, price_cents = ?, min_grade = ?, max_grade = ?, is_active = ?, updated_at = ?
    WHERE id = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_program_sqlite(pool: &SqlitePool, program: &Program) -> Result<Program> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_PROGRAM)
        .bind(&program.name)
        .bind(&program.description)
        .bind(&program.location)
        .bind(&program.schedule)
        .bind(program.start_date)
        .bind(program.end_date)
        .bind(program.capacity)
        .bind(program.price_cents)
        .bind(program.min_grade)
        .bind(program.max_grade)
        .bind(program.is_active)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create program")?;

    Ok(Program {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..program.clone()
    })
}

async fn update_program_sqlite(pool: &SqlitePool, program: &Program) -> Result<()> {
    sqlx::query(UPDATE_PROGRAM)
        .bind(&program.name)
        .bind(&program.description)
        .bind(&program.location)
        .bind(&program.schedule)
        .bind(program.start_date)
        .bind(program.end_date)
        .bind(program.capacity)
        .bind(program.price_cents)
        .bind(program.min_grade)
        .bind(program.max_grade)
        .bind(program.is_active)
        .bind(Utc::now())
        .bind(program.id)
        .execute(pool)
        .await
        .context("Failed to update program")?;
    Ok(())
}

fn row_to_program_sqlite(row: &sqlx::sqlite::SqliteRow) -> Program {
    Program {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        location: row.get("location"),
        schedule: row.get("schedule"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        capacity: row.get("capacity"),
        price_cents: row.get("price_cents"),
        min_grade: row.get("min_grade"),
        max_grade: row.get("max_grade"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_program_mysql(pool: &MySqlPool, program: &Program) -> Result<Program> {
    let now = Utc::now();
    let result = sqlx::query(INSERT_PROGRAM)
        .bind(&program.name)
        .bind(&program.description)
        .bind(&program.location)
        .bind(&program.schedule)
        .bind(program.start_date)
        .bind(program.end_date)
        .bind(program.capacity)
        .bind(program.price_cents)
        .bind(program.min_grade)
        .bind(program.max_grade)
        .bind(program.is_active)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create program")?;

    Ok(Program {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..program.clone()
    })
}

async fn update_program_mysql(pool: &MySqlPool, program: &Program) -> Result<()> {
    sqlx::query(UPDATE_PROGRAM)
        .bind(&program.name)
        .bind(&program.description)
        .bind(&program.location)
        .bind(&program.schedule)
        .bind(program.start_date)
        .bind(program.end_date)
        .bind(program.capacity)
        .bind(program.price_cents)
        .bind(program.min_grade)
        .bind(program.max_grade)
        .bind(program.is_active)
        .bind(Utc::now())
        .bind(program.id)
        .execute(pool)
        .await
        .context("Failed to update program")?;
    Ok(())
}

fn row_to_program_mysql(row: &sqlx::mysql::MySqlRow) -> Program {
    Program {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        location: row.get("location"),
        schedule: row.get("schedule"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        capacity: row.get("capacity"),
        price_cents: row.get("price_cents"),
        min_grade: row.get("min_grade"),
        max_grade: row.get("max_grade"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{
        seed_program, seed_registration, seed_student, seed_user, setup_pool,
    };
    use crate::models::{ProgramInput, RegistrationStatus};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_create_and_get_program() {
        let pool = setup_pool().await;
        let repo = SqlxProgramRepository::new(pool);

        let program = Program::from_input(ProgramInput {
            name: "Chess Club".to_string(),
            description: Some("Openings and endgames".to_string()),
            start_date: NaiveDate::from_ymd_opt(2026, 9, 1),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 15),
            capacity: Some(12),
            price_cents: Some(4500),
            min_grade: Some(2),
            max_grade: Some(6),
            ..Default::default()
        });

        let created = repo.create(&program).await.unwrap();
        let found = repo.get_by_id(created.id).await.unwrap().unwrap();

        assert_eq!(found.name, "Chess Club");
        assert_eq!(found.capacity, Some(12));
        assert_eq!(found.price_cents, 4500);
        assert_eq!(found.start_date, NaiveDate::from_ymd_opt(2026, 9, 1));
        assert!(found.is_active);
    }

    #[tokio::test]
    async fn test_list_with_enrollment_counts_seat_holders() {
        let pool = setup_pool().await;
        let guardian = seed_user(&pool, "g@example.com").await;
        let a = seed_student(&pool, guardian, "A").await;
        let b = seed_student(&pool, guardian, "B").await;
        let c = seed_student(&pool, guardian, "C").await;
        let program = seed_program(&pool, "Robotics", Some(5)).await;

        seed_registration(&pool, a, program, RegistrationStatus::Pending).await;
        seed_registration(&pool, b, program, RegistrationStatus::Confirmed).await;
        seed_registration(&pool, c, program, RegistrationStatus::Cancelled).await;

        let repo = SqlxProgramRepository::new(pool);
        let list = repo.list_with_enrollment(true).await.unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].enrolled, 2);
        assert_eq!(list[0].spots_remaining, Some(3));
    }

    #[tokio::test]
    async fn test_inactive_programs_hidden_from_active_list() {
        let pool = setup_pool().await;
        let repo = SqlxProgramRepository::new(pool.clone());
        let id = seed_program(&pool, "Art", None).await;

        let mut program = repo.get_by_id(id).await.unwrap().unwrap();
        program.is_active = false;
        repo.update(&program).await.unwrap();

        assert!(repo.list_with_enrollment(true).await.unwrap().is_empty());
        assert_eq!(repo.list_with_enrollment(false).await.unwrap().len(), 1);
        assert_eq!(repo.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_program() {
        let pool = setup_pool().await;
        let repo = SqlxProgramRepository::new(pool.clone());
        let id = seed_program(&pool, "Art", None).await;

        repo.delete(id).await.unwrap();
        assert!(repo.get_by_id(id).await.unwrap().is_none());
    }
}
