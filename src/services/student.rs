//! Student service
//!
//! Guardians manage their own roster. A student that belongs to another
//! guardian is reported as not found.

use crate::db::repositories::StudentRepository;
use crate::models::{Student, StudentInput, MAX_GRADE, MIN_GRADE};
use crate::services::error::{require, FieldErrors, ServiceError};
use crate::services::program::ProgramService;
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

/// Field errors for a student's editable fields, judged as of `today`
pub fn validate_student(input: &StudentInput, today: NaiveDate) -> FieldErrors {
    let mut errors = FieldErrors::new();
    require(&mut errors, "first_name", &input.first_name, "First name is required");
    require(&mut errors, "last_name", &input.last_name, "Last name is required");

    if let Some(dob) = input.date_of_birth {
        if dob > today {
            errors.insert(
                "date_of_birth".to_string(),
                "Date of birth cannot be in the future".to_string(),
            );
        }
    }
    if let Some(grade) = input.grade {
        if !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
            errors.insert(
                "grade".to_string(),
                format!("Grade must be between {} and {}", MIN_GRADE, MAX_GRADE),
            );
        }
    }
    errors
}

/// Student service
pub struct StudentService {
    repo: Arc<dyn StudentRepository>,
    programs: Arc<ProgramService>,
}

impl StudentService {
    /// `programs` is told when a delete drops seat-holding registrations
    pub fn new(repo: Arc<dyn StudentRepository>, programs: Arc<ProgramService>) -> Self {
        Self { repo, programs }
    }

    pub async fn list_for_guardian(&self, guardian_id: i64) -> Result<Vec<Student>, ServiceError> {
        Ok(self
            .repo
            .list_by_guardian(guardian_id)
            .await
            .context("Failed to list students")?)
    }

    /// Fetch a student owned by `guardian_id`
    pub async fn get_owned(&self, guardian_id: i64, id: i64) -> Result<Student, ServiceError> {
        self.get_any(id)
            .await?
            .filter(|s| s.guardian_id == guardian_id)
            .ok_or(ServiceError::NotFound("Student"))
    }

    /// Fetch any student regardless of owner (admin view)
    pub async fn get_any(&self, id: i64) -> Result<Option<Student>, ServiceError> {
        Ok(self.repo.get_by_id(id).await.context("Failed to get student")?)
    }

    pub async fn create(&self, guardian_id: i64, input: StudentInput) -> Result<Student, ServiceError> {
        ServiceError::check(validate_student(&input, Utc::now().date_naive()))?;

        let student = self
            .repo
            .create(&Student::from_input(guardian_id, input))
            .await
            .context("Failed to create student")?;
        tracing::info!("Guardian {} added student {}", guardian_id, student.id);
        Ok(student)
    }

    pub async fn update(
        &self,
        guardian_id: i64,
        id: i64,
        input: StudentInput,
    ) -> Result<Student, ServiceError> {
        let mut student = self.get_owned(guardian_id, id).await?;
        ServiceError::check(validate_student(&input, Utc::now().date_naive()))?;

        student.apply(input);
        Ok(self.repo.update(&student).await.context("Failed to update student")?)
    }

    /// Remove a student along with its registrations and waivers
    pub async fn delete(&self, guardian_id: i64, id: i64) -> Result<(), ServiceError> {
        let student = self.get_owned(guardian_id, id).await?;
        self.repo
            .delete(student.id)
            .await
            .context("Failed to delete student")?;
        // registrations go with the student, so seat counts change
        self.programs.invalidate().await;
        tracing::info!("Guardian {} removed student {}", guardian_id, id);
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, ServiceError> {
        Ok(self.repo.count().await.context("Failed to count students")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::{seed_user, setup_pool};
    use crate::db::repositories::{SqlxProgramRepository, SqlxStudentRepository};
    use chrono::Duration;
    use proptest::prelude::*;

    fn input(first_name: &str, grade: Option<i32>) -> StudentInput {
        StudentInput {
            first_name: first_name.to_string(),
            last_name: "Lee".to_string(),
            grade,
            ..Default::default()
        }
    }

    async fn setup() -> (StudentService, i64, i64) {
        let pool = setup_pool().await;
        let alice = seed_user(&pool, "alice@example.com").await;
        let bob = seed_user(&pool, "bob@example.com").await;
        let programs = Arc::new(ProgramService::new(
            SqlxProgramRepository::boxed(pool.clone()),
            Arc::new(MemoryCache::new()),
        ));
        (
            StudentService::new(SqlxStudentRepository::boxed(pool), programs),
            alice,
            bob,
        )
    }

    #[tokio::test]
    async fn test_create_and_list_own_students() {
        let (service, alice, bob) = setup().await;
        service.create(alice, input("Ada", Some(3))).await.unwrap();
        service.create(bob, input("Bo", Some(0))).await.unwrap();

        let mine = service.list_for_guardian(alice).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].first_name, "Ada");
        assert_eq!(service.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_other_guardians_student_is_not_found() {
        let (service, alice, bob) = setup().await;
        let ada = service.create(alice, input("Ada", Some(3))).await.unwrap();

        assert!(matches!(
            service.get_owned(bob, ada.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.update(bob, ada.id, input("Eve", None)).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.delete(bob, ada.id).await,
            Err(ServiceError::NotFound(_))
        ));
        // admin view ignores ownership
        assert!(service.get_any(ada.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (service, alice, _) = setup().await;
        let ada = service.create(alice, input("Ada", Some(3))).await.unwrap();

        let updated = service.update(alice, ada.id, input("Ada", Some(4))).await.unwrap();
        assert_eq!(updated.grade, Some(4));

        service.delete(alice, ada.id).await.unwrap();
        assert!(service.get_any(ada.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_future_birthday() {
        let (service, alice, _) = setup().await;
        let mut future = input("Ada", Some(3));
        future.date_of_birth = Some(Utc::now().date_naive() + Duration::days(2));

        match service.create(alice, future).await {
            Err(ServiceError::InvalidFields(fields)) => {
                assert!(fields.contains_key("date_of_birth"))
            }
            other => panic!("expected field errors, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_requires_names() {
        let today = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let errors = validate_student(&StudentInput::default(), today);
        assert!(errors.contains_key("first_name"));
        assert!(errors.contains_key("last_name"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Grade validation accepts exactly pre-K through 12
        #[test]
        fn prop_grade_range(grade in -10i32..30) {
            let today = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
            let errors = validate_student(&input("Ada", Some(grade)), today);
            prop_assert_eq!(errors.contains_key("grade"), !(-1..=12).contains(&grade));
        }
    }
}
