//! Program service
//!
//! Public program catalogue plus admin maintenance. The active listing is
//! served from the cache and dropped on every program or registration write.

use crate::cache::{CacheLayer, MemoryCache};
use crate::db::repositories::ProgramRepository;
use crate::models::{Program, ProgramInput, ProgramSummary, MAX_GRADE, MIN_GRADE};
use crate::services::error::{require, FieldErrors, ServiceError};
use anyhow::Context;
use std::sync::Arc;

/// Cache key prefix for program listings
pub const PROGRAM_CACHE_PREFIX: &str = "programs:";
const ACTIVE_PROGRAMS_KEY: &str = "programs:active";

/// Field errors for program input
pub fn validate_program(input: &ProgramInput) -> FieldErrors {
    let mut errors = FieldErrors::new();
    require(&mut errors, "name", &input.name, "Name is required");

    if let (Some(start), Some(end)) = (input.start_date, input.end_date) {
        if end < start {
            errors.insert(
                "end_date".to_string(),
                "End date must be on or after the start date".to_string(),
            );
        }
    }
    if matches!(input.capacity, Some(c) if c <= 0) {
        errors.insert("capacity".to_string(), "Capacity must be greater than 0".to_string());
    }
    if matches!(input.price_cents, Some(p) if p < 0) {
        errors.insert("price_cents".to_string(), "Price cannot be negative".to_string());
    }

    for (field, grade) in [("min_grade", input.min_grade), ("max_grade", input.max_grade)] {
        if matches!(grade, Some(g) if !(MIN_GRADE..=MAX_GRADE).contains(&g)) {
            errors.insert(
                field.to_string(),
                format!("Grade must be between {} and {}", MIN_GRADE, MAX_GRADE),
            );
        }
    }
    if let (Some(min), Some(max)) = (input.min_grade, input.max_grade) {
        if min > max {
            errors.insert(
                "max_grade".to_string(),
                "Maximum grade must not be below the minimum grade".to_string(),
            );
        }
    }
    errors
}

/// Program service
pub struct ProgramService {
    repo: Arc<dyn ProgramRepository>,
    cache: Arc<MemoryCache>,
}

impl ProgramService {
    pub fn new(repo: Arc<dyn ProgramRepository>, cache: Arc<MemoryCache>) -> Self {
        Self { repo, cache }
    }

    /// Active programs with enrolment, cached
    pub async fn list_active(&self) -> Result<Vec<ProgramSummary>, ServiceError> {
        match self.cache.get::<Vec<ProgramSummary>>(ACTIVE_PROGRAMS_KEY).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable program cache entry: {:#}", e),
        }

        let programs = self
            .repo
            .list_with_enrollment(true)
            .await
            .context("Failed to list active programs")?;

        if let Err(e) = self
            .cache
            .set(ACTIVE_PROGRAMS_KEY, &programs, self.cache.default_ttl())
            .await
        {
            tracing::warn!("Failed to cache program listing: {:#}", e);
        }
        Ok(programs)
    }

    /// Every program including inactive ones (admin view)
    pub async fn list_all(&self) -> Result<Vec<ProgramSummary>, ServiceError> {
        Ok(self
            .repo
            .list_with_enrollment(false)
            .await
            .context("Failed to list programs")?)
    }

    /// One active program, as the public sees it
    pub async fn get_public(&self, id: i64) -> Result<ProgramSummary, ServiceError> {
        self.list_active()
            .await?
            .into_iter()
            .find(|p| p.program.id == id)
            .ok_or(ServiceError::NotFound("Program"))
    }

    /// Any program by ID, active or not
    pub async fn get(&self, id: i64) -> Result<Program, ServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get program")?
            .ok_or(ServiceError::NotFound("Program"))
    }

    pub async fn create(&self, input: ProgramInput) -> Result<Program, ServiceError> {
        ServiceError::check(validate_program(&input))?;

        let program = self
            .repo
            .create(&Program::from_input(input))
            .await
            .context("Failed to create program")?;
        self.invalidate().await;
        tracing::info!("Created program {} ({})", program.id, program.name);
        Ok(program)
    }

    pub async fn update(&self, id: i64, input: ProgramInput) -> Result<Program, ServiceError> {
        let mut program = self.get(id).await?;
        ServiceError::check(validate_program(&input))?;

        program.apply(input);
        let updated = self
            .repo
            .update(&program)
            .await
            .context("Failed to update program")?;
        self.invalidate().await;
        Ok(updated)
    }

    /// Hide a program from the public listing without losing its registrations
    pub async fn deactivate(&self, id: i64) -> Result<Program, ServiceError> {
        let mut program = self.get(id).await?;
        program.is_active = false;
        let updated = self
            .repo
            .update(&program)
            .await
            .context("Failed to deactivate program")?;
        self.invalidate().await;
        Ok(updated)
    }

    /// Delete a program. Refused while registrations still hold seats.
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let summary = self
            .list_all()
            .await?
            .into_iter()
            .find(|p| p.program.id == id)
            .ok_or(ServiceError::NotFound("Program"))?;

        if summary.enrolled > 0 {
            return Err(ServiceError::Conflict(format!(
                "Program has {} active registration(s); deactivate it instead",
                summary.enrolled
            )));
        }

        self.repo.delete(id).await.context("Failed to delete program")?;
        self.invalidate().await;
        Ok(())
    }

    pub async fn count_active(&self) -> Result<i64, ServiceError> {
        Ok(self
            .repo
            .count_active()
            .await
            .context("Failed to count active programs")?)
    }

    /// Drop cached listings
    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_prefix(PROGRAM_CACHE_PREFIX).await {
            tracing::warn!("Failed to invalidate program cache: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{
        seed_registration, seed_student, seed_user, setup_pool,
    };
    use crate::db::repositories::SqlxProgramRepository;
    use crate::db::DynDatabasePool;
    use crate::models::RegistrationStatus;
    use chrono::NaiveDate;

    async fn setup() -> (DynDatabasePool, ProgramService) {
        let pool = setup_pool().await;
        let service = ProgramService::new(
            SqlxProgramRepository::boxed(pool.clone()),
            Arc::new(MemoryCache::new()),
        );
        (pool, service)
    }

    fn input(name: &str, capacity: Option<i32>) -> ProgramInput {
        ProgramInput {
            name: name.to_string(),
            capacity,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_program_rules() {
        let bad = ProgramInput {
            name: " ".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 7, 10),
            end_date: NaiveDate::from_ymd_opt(2024, 7, 1),
            capacity: Some(0),
            price_cents: Some(-1),
            min_grade: Some(5),
            max_grade: Some(2),
            ..Default::default()
        };
        let errors = validate_program(&bad);
        for field in ["name", "end_date", "capacity", "price_cents", "max_grade"] {
            assert!(errors.contains_key(field), "missing {}", field);
        }

        let good = ProgramInput {
            name: "Robotics".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 7, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 7, 1),
            capacity: Some(12),
            min_grade: Some(3),
            max_grade: Some(3),
            ..Default::default()
        };
        assert!(validate_program(&good).is_empty());
    }

    #[tokio::test]
    async fn test_listing_is_cached_until_a_write() {
        let (pool, service) = setup().await;
        let robotics = service.create(input("Robotics", Some(10))).await.unwrap();

        assert_eq!(service.list_active().await.unwrap().len(), 1);

        // a write that bypasses the service is not visible until invalidation
        SqlxProgramRepository::new(pool)
            .create(&Program::from_input(input("Pottery", None)))
            .await
            .unwrap();
        assert_eq!(service.list_active().await.unwrap().len(), 1);

        service.deactivate(robotics.id).await.unwrap();
        let names: Vec<_> = service
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.program.name)
            .collect();
        assert_eq!(names, vec!["Pottery"]);
    }

    #[tokio::test]
    async fn test_get_public_hides_inactive() {
        let (_pool, service) = setup().await;
        let program = service.create(input("Chess", None)).await.unwrap();
        assert!(service.get_public(program.id).await.is_ok());

        service.deactivate(program.id).await.unwrap();
        assert!(matches!(
            service.get_public(program.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(!service.get(program.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_spots_remaining_reported() {
        let (pool, service) = setup().await;
        let program = service.create(input("Art", Some(2))).await.unwrap();
        let guardian = seed_user(&pool, "g@example.com").await;
        let student = seed_student(&pool, guardian, "Ada").await;
        seed_registration(&pool, student, program.id, RegistrationStatus::Pending).await;
        service.invalidate().await;

        let summary = service.get_public(program.id).await.unwrap();
        assert_eq!(summary.enrolled, 1);
        assert_eq!(summary.spots_remaining, Some(1));
    }

    #[tokio::test]
    async fn test_delete_refused_with_seat_holders() {
        let (pool, service) = setup().await;
        let program = service.create(input("Art", Some(2))).await.unwrap();
        let guardian = seed_user(&pool, "g@example.com").await;
        let student = seed_student(&pool, guardian, "Ada").await;
        seed_registration(&pool, student, program.id, RegistrationStatus::Confirmed).await;

        assert!(matches!(
            service.delete(program.id).await,
            Err(ServiceError::Conflict(_))
        ));

        let empty = service.create(input("Empty", None)).await.unwrap();
        service.delete(empty.id).await.unwrap();
        assert!(matches!(service.get(empty.id).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_validates() {
        let (_pool, service) = setup().await;
        let program = service.create(input("Art", None)).await.unwrap();

        let result = service.update(program.id, input("", None)).await;
        assert!(matches!(result, Err(ServiceError::InvalidFields(_))));

        let updated = service.update(program.id, input("Art Studio", Some(8))).await.unwrap();
        assert_eq!(updated.name, "Art Studio");
        assert_eq!(updated.capacity, Some(8));
    }
}
