//! Waiver service
//!
//! Admins create waiver requirements per student; guardians sign them.
//! A signature is valid for a year, after which the waiver reads as expired
//! and can be signed again.

use crate::db::repositories::{StudentRepository, WaiverRepository};
use crate::models::{Student, Waiver, WaiverStatus};
use crate::services::error::ServiceError;
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

/// Waiver service
pub struct WaiverService {
    repo: Arc<dyn WaiverRepository>,
    students: Arc<dyn StudentRepository>,
}

impl WaiverService {
    pub fn new(repo: Arc<dyn WaiverRepository>, students: Arc<dyn StudentRepository>) -> Self {
        Self { repo, students }
    }

    /// Waivers for the guardian's students, with effective status
    pub async fn list_for_guardian(&self, guardian_id: i64) -> Result<Vec<Waiver>, ServiceError> {
        let now = Utc::now();
        Ok(self
            .repo
            .list_by_guardian(guardian_id)
            .await
            .context("Failed to list waivers")?
            .into_iter()
            .map(|w| w.with_effective_status(now))
            .collect())
    }

    /// Sign a waiver for one of the guardian's students.
    ///
    /// Signing a waiver that is already signed and still valid is a conflict.
    pub async fn sign(
        &self,
        guardian_id: i64,
        waiver_id: i64,
        signed_by: &str,
    ) -> Result<Waiver, ServiceError> {
        let signed_by = signed_by.trim();
        if signed_by.is_empty() {
            return Err(ServiceError::Validation(
                "Type your full name to sign".to_string(),
            ));
        }

        let (mut waiver, student) = self.with_student(waiver_id).await?;
        if student.guardian_id != guardian_id {
            return Err(ServiceError::NotFound("Waiver"));
        }

        let now = Utc::now();
        if waiver.effective_status_at(now) == WaiverStatus::Signed {
            return Err(ServiceError::Conflict("Waiver is already signed".to_string()));
        }

        waiver.sign(signed_by.to_string(), now);
        self.repo
            .save_signature(&waiver)
            .await
            .context("Failed to save waiver signature")?;
        tracing::info!("Waiver {} signed for student {}", waiver.id, student.id);
        Ok(waiver)
    }

    /// Require a waiver for a student (admin)
    pub async fn create(&self, student_id: i64, title: &str) -> Result<Waiver, ServiceError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ServiceError::Validation("Title is required".to_string()));
        }
        self.students
            .get_by_id(student_id)
            .await
            .context("Failed to get student")?
            .ok_or(ServiceError::NotFound("Student"))?;

        Ok(self
            .repo
            .create(&Waiver::new(student_id, title.to_string()))
            .await
            .context("Failed to create waiver")?)
    }

    /// Every waiver, optionally only those with the given effective status
    pub async fn list_all(&self, status: Option<WaiverStatus>) -> Result<Vec<Waiver>, ServiceError> {
        let now = Utc::now();
        Ok(self
            .repo
            .list_all()
            .await
            .context("Failed to list waivers")?
            .into_iter()
            .map(|w| w.with_effective_status(now))
            .filter(|w| status.map_or(true, |s| w.status == s))
            .collect())
    }

    /// A waiver together with its student
    pub async fn with_student(&self, waiver_id: i64) -> Result<(Waiver, Student), ServiceError> {
        let waiver = self
            .repo
            .get_by_id(waiver_id)
            .await
            .context("Failed to get waiver")?
            .ok_or(ServiceError::NotFound("Waiver"))?;
        let student = self
            .students
            .get_by_id(waiver.student_id)
            .await
            .context("Failed to get student")?
            .ok_or(ServiceError::NotFound("Waiver"))?;
        Ok((waiver, student))
    }

    pub async fn count_pending(&self) -> Result<i64, ServiceError> {
        Ok(self.repo.count_pending().await.context("Failed to count waivers")?)
    }

    pub async fn count_expired(&self) -> Result<i64, ServiceError> {
        Ok(self
            .repo
            .count_expired(Utc::now())
            .await
            .context("Failed to count waivers")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_student, seed_user, setup_pool};
    use crate::db::repositories::{SqlxStudentRepository, SqlxWaiverRepository};
    use crate::db::DynDatabasePool;
    use chrono::Duration;

    async fn setup() -> (DynDatabasePool, WaiverService) {
        let pool = setup_pool().await;
        let service = WaiverService::new(
            SqlxWaiverRepository::boxed(pool.clone()),
            SqlxStudentRepository::boxed(pool.clone()),
        );
        (pool, service)
    }

    #[tokio::test]
    async fn test_create_and_sign() {
        let (pool, service) = setup().await;
        let guardian = seed_user(&pool, "g@example.com").await;
        let student = seed_student(&pool, guardian, "Ada").await;

        let waiver = service.create(student, "Liability release").await.unwrap();
        assert_eq!(service.count_pending().await.unwrap(), 1);

        let signed = service.sign(guardian, waiver.id, "  Pat Lee ").await.unwrap();
        assert_eq!(signed.status, WaiverStatus::Signed);
        assert_eq!(signed.signed_by.as_deref(), Some("Pat Lee"));
        let days = (signed.expires_at.unwrap() - signed.signed_at.unwrap()).num_days();
        assert_eq!(days, 365);

        assert!(matches!(
            service.sign(guardian, waiver.id, "Pat Lee").await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_checks_name_and_owner() {
        let (pool, service) = setup().await;
        let alice = seed_user(&pool, "alice@example.com").await;
        let bob = seed_user(&pool, "bob@example.com").await;
        let student = seed_student(&pool, alice, "Ada").await;
        let waiver = service.create(student, "Liability").await.unwrap();

        assert!(matches!(
            service.sign(alice, waiver.id, "   ").await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            service.sign(bob, waiver.id, "Bob").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.create(9999, "Liability").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lapsed_signature_reads_expired_and_can_be_renewed() {
        let (pool, service) = setup().await;
        let guardian = seed_user(&pool, "g@example.com").await;
        let student = seed_student(&pool, guardian, "Ada").await;
        let mut waiver = service.create(student, "Liability").await.unwrap();

        waiver.sign("Pat Lee".to_string(), Utc::now() - Duration::days(400));
        SqlxWaiverRepository::new(pool.clone())
            .save_signature(&waiver)
            .await
            .unwrap();

        let listed = service.list_for_guardian(guardian).await.unwrap();
        assert_eq!(listed[0].status, WaiverStatus::Expired);
        assert_eq!(service.list_all(Some(WaiverStatus::Expired)).await.unwrap().len(), 1);
        assert!(service.list_all(Some(WaiverStatus::Signed)).await.unwrap().is_empty());
        assert_eq!(service.count_expired().await.unwrap(), 1);

        let renewed = service.sign(guardian, waiver.id, "Pat Lee").await.unwrap();
        assert_eq!(renewed.effective_status_at(Utc::now()), WaiverStatus::Signed);
    }
}
