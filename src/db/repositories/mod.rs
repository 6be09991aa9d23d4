//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the queries for one entity, with a SQLite and a
//! MySQL code path.

pub mod announcement;
pub mod email_event;
pub mod login_log;
pub mod program;
pub mod registration;
pub mod session;
pub mod student;
pub mod user;
pub mod waiver;

pub use announcement::{AnnouncementRepository, SqlxAnnouncementRepository};
pub use email_event::{EmailEventRepository, SqlxEmailEventRepository};
pub use login_log::{LoginLogRepository, SqlxLoginLogRepository};
pub use program::{ProgramRepository, SqlxProgramRepository};
pub use registration::{RegistrationRepository, SqlxRegistrationRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use student::{SqlxStudentRepository, StudentRepository};
pub use user::{SqlxUserRepository, UserRepository};
pub use waiver::{SqlxWaiverRepository, WaiverRepository};

/// Fixtures shared by repository and service tests
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{
        Program, ProgramInput, Registration, RegistrationStatus, Student, StudentInput, User,
        UserRole,
    };

    /// In-memory database with all migrations applied
    pub async fn setup_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    /// Insert a guardian and return its ID
    pub async fn seed_user(pool: &DynDatabasePool, email: &str) -> i64 {
        let user = User::new(
            email.to_string(),
            "hash".to_string(),
            "Pat".to_string(),
            "Lee".to_string(),
            UserRole::Guardian,
        );
        SqlxUserRepository::new(pool.clone())
            .create(&user)
            .await
            .expect("Failed to seed user")
            .id
    }

    /// Insert a third-grader for `guardian_id` and return its ID
    pub async fn seed_student(pool: &DynDatabasePool, guardian_id: i64, first_name: &str) -> i64 {
        let student = Student::from_input(
            guardian_id,
            StudentInput {
                first_name: first_name.to_string(),
                last_name: "Lee".to_string(),
                grade: Some(3),
                ..Default::default()
            },
        );
        SqlxStudentRepository::new(pool.clone())
            .create(&student)
            .await
            .expect("Failed to seed student")
            .id
    }

    /// Insert an active program and return its ID
    pub async fn seed_program(pool: &DynDatabasePool, name: &str, capacity: Option<i32>) -> i64 {
        let program = Program::from_input(ProgramInput {
            name: name.to_string(),
            capacity,
            ..Default::default()
        });
        SqlxProgramRepository::new(pool.clone())
            .create(&program)
            .await
            .expect("Failed to seed program")
            .id
    }

    /// Insert a registration and return its ID
    pub async fn seed_registration(
        pool: &DynDatabasePool,
        student_id: i64,
        program_id: i64,
        status: RegistrationStatus,
    ) -> i64 {
        SqlxRegistrationRepository::new(pool.clone())
            .create(&Registration::new(student_id, program_id, status))
            .await
            .expect("Failed to seed registration")
            .id
    }
}
