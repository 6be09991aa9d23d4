//! Registration service
//!
//! Seat allocation plus the guardian and admin views of registrations.
//! A registration holds a seat while `pending` or `confirmed`; once those
//! reach a program's capacity, new registrations are waitlisted.

use crate::db::repositories::RegistrationRepository;
use crate::models::{
    Program, Registration, RegistrationDetail, RegistrationFilter, RegistrationStatus,
};
use crate::services::error::ServiceError;
use crate::services::program::ProgramService;
use anyhow::Context;
use std::sync::Arc;

/// Registration service
pub struct RegistrationService {
    repo: Arc<dyn RegistrationRepository>,
    programs: Arc<ProgramService>,
}

impl RegistrationService {
    pub fn new(repo: Arc<dyn RegistrationRepository>, programs: Arc<ProgramService>) -> Self {
        Self { repo, programs }
    }

    /// Conflict when the student already has a live registration for the program
    pub async fn ensure_not_registered(
        &self,
        student_id: i64,
        program_id: i64,
    ) -> Result<Option<Registration>, ServiceError> {
        let existing = self
            .repo
            .find(student_id, program_id)
            .await
            .context("Failed to look up registration")?;

        match existing {
            Some(r) if !r.status.is_cancelled() => Err(ServiceError::Conflict(format!(
                "Student {} is already registered for this program",
                student_id
            ))),
            other => Ok(other),
        }
    }

    /// Register a student, waitlisting when the program is full.
    ///
    /// A previously cancelled registration for the same pair is reopened
    /// rather than duplicated.
    pub async fn enroll(
        &self,
        student_id: i64,
        program: &Program,
        notes: Option<&str>,
    ) -> Result<Registration, ServiceError> {
        let cancelled = self.ensure_not_registered(student_id, program.id).await?;

        let seats = self
            .repo
            .count_seats(program.id)
            .await
            .context("Failed to count seats")?;
        let status = if program.has_room(seats) {
            RegistrationStatus::Pending
        } else {
            RegistrationStatus::Waitlisted
        };

        let registration = match cancelled {
            Some(previous) => {
                self.repo
                    .set_status(previous.id, status, notes)
                    .await
                    .context("Failed to reopen registration")?;
                Registration {
                    status,
                    notes: notes.map(str::to_string).or(previous.notes.clone()),
                    ..previous
                }
            }
            None => {
                let mut new = Registration::new(student_id, program.id, status);
                new.notes = notes.map(str::to_string);
                self.repo
                    .create(&new)
                    .await
                    .context("Failed to create registration")?
            }
        };

        self.programs.invalidate().await;
        tracing::info!(
            "Student {} registered for program {} ({})",
            student_id,
            program.id,
            registration.status
        );
        Ok(registration)
    }

    pub async fn list_for_guardian(
        &self,
        guardian_id: i64,
    ) -> Result<Vec<RegistrationDetail>, ServiceError> {
        Ok(self
            .repo
            .list_by_guardian(guardian_id)
            .await
            .context("Failed to list registrations")?)
    }

    /// Cancel one of the guardian's registrations. Cancelling twice is a no-op.
    pub async fn cancel(
        &self,
        guardian_id: i64,
        id: i64,
    ) -> Result<RegistrationDetail, ServiceError> {
        let detail = self
            .get(id)
            .await?
            .filter(|d| d.guardian_id == guardian_id)
            .ok_or(ServiceError::NotFound("Registration"))?;

        if detail.registration.status.is_cancelled() {
            return Ok(detail);
        }

        self.repo
            .set_status(id, RegistrationStatus::Cancelled, None)
            .await
            .context("Failed to cancel registration")?;
        self.programs.invalidate().await;

        self.get(id)
            .await?
            .ok_or(ServiceError::NotFound("Registration"))
    }

    pub async fn get(&self, id: i64) -> Result<Option<RegistrationDetail>, ServiceError> {
        Ok(self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get registration")?)
    }

    /// All registrations matching `filter` (admin view)
    pub async fn list(
        &self,
        filter: &RegistrationFilter,
    ) -> Result<Vec<RegistrationDetail>, ServiceError> {
        Ok(self.repo.list(filter).await.context("Failed to list registrations")?)
    }

    /// Admin status change.
    ///
    /// Moving a registration that holds no seat into a seat-holding status
    /// is refused when the program is already full.
    pub async fn set_status(
        &self,
        id: i64,
        status: RegistrationStatus,
        notes: Option<&str>,
    ) -> Result<RegistrationDetail, ServiceError> {
        let current = self
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound("Registration"))?;

        if status.holds_seat() && !current.registration.status.holds_seat() {
            let program = self.programs.get(current.registration.program_id).await?;
            let seats = self
                .repo
                .count_seats(program.id)
                .await
                .context("Failed to count seats")?;
            if !program.has_room(seats) {
                return Err(ServiceError::Conflict(format!(
                    "{} is full ({} of {} seats taken)",
                    program.name,
                    seats,
                    program.capacity.unwrap_or_default()
                )));
            }
        }

        self.repo
            .set_status(id, status, notes)
            .await
            .context("Failed to update registration status")?;
        self.programs.invalidate().await;

        self.get(id)
            .await?
            .ok_or(ServiceError::NotFound("Registration"))
    }

    pub async fn count_by_status(&self) -> Result<Vec<(RegistrationStatus, i64)>, ServiceError> {
        Ok(self
            .repo
            .count_by_status()
            .await
            .context("Failed to count registrations")?)
    }
}
