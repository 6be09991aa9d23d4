//! Student repository
//!
//! Database operations for guardian-owned students.

use crate::db::{Backend, DynDatabasePool};
use crate::models::Student;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Student repository trait
#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Create a new student
    async fn create(&self, student: &Student) -> Result<Student>;

    /// Get student by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Student>>;

    /// List a guardian's students ordered by first name
    async fn list_by_guardian(&self, guardian_id: i64) -> Result<Vec<Student>>;

    /// Update a student
    async fn update(&self, student: &Student) -> Result<Student>;

    /// Delete a student (cascades to registrations and waivers)
    async fn delete(&self, id: i64) -> Result<()>;

    /// Count all students
    async fn count(&self) -> Result<i64>;
}

/// SQLx-based student repository implementation
pub struct SqlxStudentRepository {
    pool: DynDatabasePool,
}

impl SqlxStudentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn StudentRepository> {
        Arc::new(Self::new(pool))
    }
}

const STUDENT_COLUMNS: &str = "id, guardian_id, first_name, last_name, date_of_birth, grade, school, medical_notes, created_at, updated_at";

#[async_trait]
impl StudentRepository for SqlxStudentRepository {
    async fn create(&self, student: &Student) -> Result<Student> {
        match self.pool.backend() {
            Backend::Sqlite(p) => create_student_sqlite(p, student).await,
            Backend::Mysql(p) => create_student_mysql(p, student).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Student>> {
        let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get student by ID")?;
                Ok(row.as_ref().map(row_to_student_sqlite))
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get student by ID")?;
                Ok(row.as_ref().map(row_to_student_mysql))
            }
        }
    }

    async fn list_by_guardian(&self, guardian_id: i64) -> Result<Vec<Student>> {
        let sql = format!(
            "SELECT {} FROM students WHERE guardian_id = ? ORDER BY first_name, id",
            STUDENT_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(&sql)
                    .bind(guardian_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list students")?;
                Ok(rows.iter().map(row_to_student_sqlite).collect())
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(&sql)
                    .bind(guardian_id)
                    .fetch_all(p)
                    .await
                    .context("Failed to list students")?;
                Ok(rows.iter().map(row_to_student_mysql).collect())
            }
        }
    }

    async fn update(&self, student: &Student) -> Result<Student> {
        let sql = r#"
            UPDATE students
            SET first_name = ?, last_name = ?, date_of_birth = ?, grade = ?, school = ?,
                medical_notes = ?, updated_at = ?
            WHERE id = ?
        "#;
        let now = Utc::now();
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                sqlx::query(sql)
                    .bind(&student.first_name)
                    .bind(&student.last_name)
                    .bind(student.date_of_birth)
                    .bind(student.grade)
                    .bind(&student.school)
                    .bind(&student.medical_notes)
                    .bind(now)
                    .bind(student.id)
                    .execute(p)
                    .await
                    .context("Failed to update student")?;
            }
            Backend::Mysql(p) => {
                sqlx::query(sql)
                    .bind(&student.first_name)
                    .bind(&student.last_name)
                    .bind(student.date_of_birth)
                    .bind(student.grade)
                    .bind(&student.school)
                    .bind(&student.medical_notes)
                    .bind(now)
                    .bind(student.id)
                    .execute(p)
                    .await
                    .context("Failed to update student")?;
            }
        }

        self.get_by_id(student.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Student not found after update"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let sql = "DELETE FROM students WHERE id = ?";
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(sql).bind(id).execute(p).await.map(|_| ()),
            Backend::Mysql(p) => sqlx::query(sql).bind(id).execute(p).await.map(|_| ()),
        }
        .context("Failed to delete student")
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM students";
        let count = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_scalar(sql).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_scalar(sql).fetch_one(p).await,
        }
        .context("Failed to count students")?;
        Ok(count)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_student_sqlite(pool: &SqlitePool, student: &Student) -> Result<Student> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO students (guardian_id, first_name, last_name, date_of_birth, grade, school, medical_notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(student.guardian_id)
    .bind(&student.first_name)
    .bind(&student.last_name)
    .bind(student.date_of_birth)
    .bind(student.grade)
    .bind(&student.school)
    .bind(&student.medical_notes)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create student")?;

    Ok(Student {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: now,
        ..student.clone()
    })
}

fn row_to_student_sqlite(row: &sqlx::sqlite::SqliteRow) -> Student {
    Student {
        id: row.get("id"),
        guardian_id: row.get("guardian_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        date_of_birth: row.get("date_of_birth"),
        grade: row.get("grade"),
        school: row.get("school"),
        medical_notes: row.get("medical_notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_student_mysql(pool: &MySqlPool, student: &Student) -> Result<Student> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO students (guardian_id, first_name, last_name, date_of_birth, grade, school, medical_notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(student.guardian_id)
    .bind(&student.first_name)
    .bind(&student.last_name)
    .bind(student.date_of_birth)
    .bind(student.grade)
    .bind(&student.school)
    .bind(&student.medical_notes)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to create student")?;

    Ok(Student {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: now,
        ..student.clone()
    })
}

fn row_to_student_mysql(row: &sqlx::mysql::MySqlRow) -> Student {
    Student {
        id: row.get("id"),
        guardian_id: row.get("guardian_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        date_of_birth: row.get("date_of_birth"),
        grade: row.get("grade"),
        school: row.get("school"),
        medical_notes: row.get("medical_notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_user, setup_pool};
    use crate::models::StudentInput;
    use chrono::NaiveDate;

    fn student(guardian_id: i64, first_name: &str) -> Student {
        Student::from_input(
            guardian_id,
            StudentInput {
                first_name: first_name.to_string(),
                last_name: "Lee".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(2015, 4, 2),
                grade: Some(3),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_get_student() {
        let pool = setup_pool().await;
        let guardian = seed_user(&pool, "g@example.com").await;
        let repo = SqlxStudentRepository::new(pool);

        let created = repo.create(&student(guardian, "Ada")).await.unwrap();
        assert!(created.id > 0);

        let found = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found.first_name, "Ada");
        assert_eq!(found.guardian_id, guardian);
        assert_eq!(found.date_of_birth, NaiveDate::from_ymd_opt(2015, 4, 2));
        assert_eq!(found.grade, Some(3));

        assert!(repo.get_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_guardian_only_returns_own() {
        let pool = setup_pool().await;
        let alice = seed_user(&pool, "alice@example.com").await;
        let bob = seed_user(&pool, "bob@example.com").await;
        let repo = SqlxStudentRepository::new(pool);

        repo.create(&student(alice, "Zed")).await.unwrap();
        repo.create(&student(alice, "Amy")).await.unwrap();
        repo.create(&student(bob, "Bo")).await.unwrap();

        let mine = repo.list_by_guardian(alice).await.unwrap();
        let names: Vec<_> = mine.iter().map(|s| s.first_name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Zed"]);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_student() {
        let pool = setup_pool().await;
        let guardian = seed_user(&pool, "g@example.com").await;
        let repo = SqlxStudentRepository::new(pool);

        let mut created = repo.create(&student(guardian, "Ada")).await.unwrap();
        created.grade = Some(4);
        created.medical_notes = Some("asthma".to_string());
        let updated = repo.update(&created).await.unwrap();
        assert_eq!(updated.grade, Some(4));
        assert_eq!(updated.medical_notes.as_deref(), Some("asthma"));

        repo.delete(created.id).await.unwrap();
        assert!(repo.get_by_id(created.id).await.unwrap().is_none());
    }
}
