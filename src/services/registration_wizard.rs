//! Registration wizard
//!
//! Three steps, validated in order: `parent` (guardian contact details),
//! `students` (existing and/or new students), `program` (the program to
//! join). Nothing is stored between steps. Submission re-validates every
//! step and only then writes: profile, new students, one registration per
//! student.

use crate::models::{
    grade_label, Program, Registration, RegistrationStatus, Student, StudentInput,
    UpdateProfileInput, User,
};
use crate::services::email::EmailService;
use crate::services::error::{FieldErrors, ServiceError};
use crate::services::program::ProgramService;
use crate::services::registration::RegistrationService;
use crate::services::student::{validate_student, StudentService};
use crate::services::user::{validate_contact, UserService};
use anyhow::anyhow;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Wizard step, in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    Parent,
    Students,
    Program,
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::Students => write!(f, "students"),
            Self::Program => write!(f, "program"),
        }
    }
}

/// Guardian contact details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentStep {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// Students to register
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentsStep {
    /// Students already on the guardian's roster
    #[serde(default)]
    pub existing_ids: Vec<i64>,
    /// Students to add to the roster
    #[serde(default)]
    pub new_students: Vec<StudentInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramStep {
    pub program_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A full submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardSubmission {
    pub parent: ParentStep,
    pub students: StudentsStep,
    pub program: ProgramStep,
}

/// Request to check one step. Later steps may use earlier ones when given,
/// e.g. the program step checks grade eligibility against `students`.
#[derive(Debug, Clone, Deserialize)]
pub struct StepCheck {
    pub step: WizardStep,
    #[serde(default)]
    pub parent: Option<ParentStep>,
    #[serde(default)]
    pub students: Option<StudentsStep>,
    #[serde(default)]
    pub program: Option<ProgramStep>,
}

/// Result of checking one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: WizardStep,
    pub valid: bool,
    pub errors: FieldErrors,
}

/// One registration made by the wizard
#[derive(Debug, Clone, Serialize)]
pub struct WizardRegistration {
    pub student: Student,
    pub registration: Registration,
}

/// Everything a successful submission produced
#[derive(Debug, Clone, Serialize)]
pub struct WizardOutcome {
    pub guardian: User,
    pub program: Program,
    pub registrations: Vec<WizardRegistration>,
    pub waitlisted: usize,
    pub email_sent: bool,
}

/// Error types for wizard submission
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    /// A step failed validation; later steps were not checked
    #[error("Step '{step}' is invalid")]
    InvalidStep { step: WizardStep, errors: FieldErrors },

    /// A student is already registered for the program
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for WizardError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Conflict(msg) => WizardError::Conflict(msg),
            ServiceError::Internal(e) => WizardError::Internal(e),
            other => WizardError::Internal(anyhow!(other.to_string())),
        }
    }
}

/// Students resolved by the students step
#[derive(Default)]
struct ResolvedStudents {
    existing: Vec<Student>,
    new: Vec<StudentInput>,
}

impl ResolvedStudents {
    /// Display name and grade of every student, existing first
    fn roster(&self) -> Vec<(String, Option<i32>)> {
        self.existing
            .iter()
            .map(|s| (s.full_name(), s.grade))
            .chain(self.new.iter().map(|s| {
                (
                    format!("{} {}", s.first_name.trim(), s.last_name.trim()),
                    s.grade,
                )
            }))
            .collect()
    }
}

/// Registration wizard
pub struct RegistrationWizard {
    users: Arc<UserService>,
    students: Arc<StudentService>,
    programs: Arc<ProgramService>,
    registrations: Arc<RegistrationService>,
    email: Arc<EmailService>,
}

impl RegistrationWizard {
    pub fn new(
        users: Arc<UserService>,
        students: Arc<StudentService>,
        programs: Arc<ProgramService>,
        registrations: Arc<RegistrationService>,
        email: Arc<EmailService>,
    ) -> Self {
        Self {
            users,
            students,
            programs,
            registrations,
            email,
        }
    }

    /// Check a single step without writing anything
    pub async fn validate_step(
        &self,
        guardian: &User,
        check: StepCheck,
    ) -> Result<StepReport, WizardError> {
        let errors = match check.step {
            WizardStep::Parent => validate_parent(&check.parent.unwrap_or_default()),
            WizardStep::Students => {
                let step = check.students.unwrap_or_default();
                match self.resolve_students(guardian.id, &step).await? {
                    Ok(_) => FieldErrors::new(),
                    Err(errors) => errors,
                }
            }
            WizardStep::Program => {
                let roster = match &check.students {
                    Some(step) => self
                        .resolve_students(guardian.id, step)
                        .await?
                        .unwrap_or_default(),
                    None => ResolvedStudents::default(),
                };
                let step = check.program.unwrap_or_default();
                match self.resolve_program(&step, &roster).await? {
                    Ok(_) => FieldErrors::new(),
                    Err(errors) => errors,
                }
            }
        };

        Ok(StepReport {
            step: check.step,
            valid: errors.is_empty(),
            errors,
        })
    }

    /// Validate all steps in order, then register every student
    pub async fn submit(
        &self,
        guardian: &User,
        submission: WizardSubmission,
    ) -> Result<WizardOutcome, WizardError> {
        let parent_errors = validate_parent(&submission.parent);
        if !parent_errors.is_empty() {
            return Err(WizardError::InvalidStep {
                step: WizardStep::Parent,
                errors: parent_errors,
            });
        }

        let resolved = self
            .resolve_students(guardian.id, &submission.students)
            .await?
            .map_err(|errors| WizardError::InvalidStep {
                step: WizardStep::Students,
                errors,
            })?;

        let program = self
            .resolve_program(&submission.program, &resolved)
            .await?
            .map_err(|errors| WizardError::InvalidStep {
                step: WizardStep::Program,
                errors,
            })?;

        for student in &resolved.existing {
            self.registrations
                .ensure_not_registered(student.id, program.id)
                .await
                .map_err(|e| match e {
                    ServiceError::Conflict(_) => WizardError::Conflict(format!(
                        "{} is already registered for {}",
                        student.full_name(),
                        program.name
                    )),
                    other => other.into(),
                })?;
        }

        // All steps are valid; write in order.
        let parent = submission.parent;
        let guardian = self
            .users
            .update_profile(
                guardian.id,
                UpdateProfileInput {
                    first_name: Some(parent.first_name),
                    last_name: Some(parent.last_name),
                    phone: Some(parent.phone),
                },
            )
            .await
            .map_err(|e| anyhow!("Failed to update guardian profile: {}", e))?;

        let mut students = resolved.existing;
        for input in resolved.new {
            students.push(self.students.create(guardian.id, input).await?);
        }

        let notes = submission
            .program
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let mut registrations = Vec::with_capacity(students.len());
        for student in students {
            let registration = self.registrations.enroll(student.id, &program, notes).await?;
            registrations.push(WizardRegistration {
                student,
                registration,
            });
        }

        let waitlisted = registrations
            .iter()
            .filter(|r| r.registration.status == RegistrationStatus::Waitlisted)
            .count();

        let enrolled: Vec<(String, Registration)> = registrations
            .iter()
            .map(|r| (r.student.full_name(), r.registration.clone()))
            .collect();
        let email_sent = match self
            .email
            .send_registration_confirmation(&guardian, &program, &enrolled)
            .await
        {
            Ok(()) => self.email.delivers(),
            Err(e) => {
                tracing::warn!(
                    "Registration confirmation to {} failed: {:#}",
                    guardian.email,
                    e
                );
                false
            }
        };

        tracing::info!(
            "Guardian {} registered {} student(s) for program {} ({} waitlisted)",
            guardian.id,
            registrations.len(),
            program.id,
            waitlisted
        );

        Ok(WizardOutcome {
            guardian,
            program,
            registrations,
            waitlisted,
            email_sent,
        })
    }

    /// Field errors, or the guardian's existing students plus the new ones
    async fn resolve_students(
        &self,
        guardian_id: i64,
        step: &StudentsStep,
    ) -> Result<Result<ResolvedStudents, FieldErrors>, WizardError> {
        let mut errors = FieldErrors::new();

        if step.existing_ids.is_empty() && step.new_students.is_empty() {
            errors.insert(
                "students".to_string(),
                "Add at least one student".to_string(),
            );
            return Ok(Err(errors));
        }

        let mut seen = HashSet::new();
        let mut existing = Vec::new();
        for (i, id) in step.existing_ids.iter().enumerate() {
            let field = format!("existing_ids[{}]", i);
            if !seen.insert(*id) {
                errors.insert(field, "Student listed more than once".to_string());
                continue;
            }
            match self.students.get_owned(guardian_id, *id).await {
                Ok(student) => existing.push(student),
                Err(ServiceError::NotFound(_)) => {
                    errors.insert(field, "Student not found".to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let today = today();
        for (i, input) in step.new_students.iter().enumerate() {
            for (field, message) in validate_student(input, today) {
                errors.insert(format!("new_students[{}].{}", i, field), message);
            }
        }

        if errors.is_empty() {
            Ok(Ok(ResolvedStudents {
                existing,
                new: step.new_students.clone(),
            }))
        } else {
            Ok(Err(errors))
        }
    }

    /// Field errors, or the chosen program when it is open and every
    /// student falls inside its grade band
    async fn resolve_program(
        &self,
        step: &ProgramStep,
        students: &ResolvedStudents,
    ) -> Result<Result<Program, FieldErrors>, WizardError> {
        let mut errors = FieldErrors::new();

        let Some(program_id) = step.program_id else {
            errors.insert("program_id".to_string(), "Choose a program".to_string());
            return Ok(Err(errors));
        };

        let program = match self.programs.get(program_id).await {
            Ok(p) if p.is_active => p,
            Ok(_) | Err(ServiceError::NotFound(_)) => {
                errors.insert(
                    "program_id".to_string(),
                    "This program is not open for registration".to_string(),
                );
                return Ok(Err(errors));
            }
            Err(e) => return Err(e.into()),
        };

        let ineligible: Vec<String> = students
            .roster()
            .into_iter()
            .filter(|(_, grade)| !program.accepts_grade(*grade))
            .map(|(name, _)| name)
            .collect();
        if !ineligible.is_empty() {
            errors.insert(
                "program_id".to_string(),
                format!(
                    "{} is open to {}; not eligible: {}",
                    program.name,
                    grade_band(&program),
                    ineligible.join(", ")
                ),
            );
            return Ok(Err(errors));
        }

        Ok(Ok(program))
    }
}

/// Parent step: names and a phone number are all required
pub fn validate_parent(parent: &ParentStep) -> FieldErrors {
    let mut errors = validate_contact(&parent.first_name, &parent.last_name, Some(&parent.phone));
    if parent.phone.trim().is_empty() {
        errors.insert("phone".to_string(), "Phone number is required".to_string());
    }
    errors
}

fn grade_band(program: &Program) -> String {
    match (program.min_grade, program.max_grade) {
        (Some(min), Some(max)) if min == max => grade_label(min),
        (Some(min), Some(max)) => format!("{} to {}", grade_label(min), grade_label(max)),
        (Some(min), None) => format!("{} and up", grade_label(min)),
        (None, Some(max)) => format!("up to {}", grade_label(max)),
        (None, None) => "all grades".to_string(),
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::{seed_student, setup_pool};
    use crate::db::repositories::{
        SqlxLoginLogRepository, SqlxProgramRepository, SqlxRegistrationRepository,
        SqlxSessionRepository, SqlxStudentRepository, SqlxUserRepository, StudentRepository,
    };
    use crate::db::DynDatabasePool;
    use crate::models::ProgramInput;
    use crate::services::email::testing::{FailingMailer, RecordingMailer};
    use crate::services::email::{LogMailer, Mailer};
    use crate::services::user::SignupInput;

    struct Fixture {
        pool: DynDatabasePool,
        wizard: RegistrationWizard,
        programs: Arc<ProgramService>,
        guardian: User,
    }

    async fn fixture(mailer: Arc<dyn Mailer>) -> Fixture {
        let pool = setup_pool().await;
        let users = Arc::new(UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            SqlxLoginLogRepository::boxed(pool.clone()),
        ));
        let programs = Arc::new(ProgramService::new(
            SqlxProgramRepository::boxed(pool.clone()),
            Arc::new(MemoryCache::new()),
        ));
        let students = Arc::new(StudentService::new(
            SqlxStudentRepository::boxed(pool.clone()),
            programs.clone(),
        ));
        let registrations = Arc::new(RegistrationService::new(
            SqlxRegistrationRepository::boxed(pool.clone()),
            programs.clone(),
        ));
        let email = Arc::new(EmailService::new(mailer, "Homer Hub"));

        let guardian = users
            .signup(SignupInput {
                email: "pat@example.com".to_string(),
                password: "password123".to_string(),
                first_name: "Pat".to_string(),
                last_name: "Lee".to_string(),
                phone: None,
            })
            .await
            .unwrap();

        Fixture {
            pool,
            wizard: RegistrationWizard::new(users, students, programs.clone(), registrations, email),
            programs,
            guardian,
        }
    }

    async fn program(f: &Fixture, capacity: Option<i32>, grades: (Option<i32>, Option<i32>)) -> Program {
        f.programs
            .create(ProgramInput {
                name: "Robotics".to_string(),
                capacity,
                min_grade: grades.0,
                max_grade: grades.1,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    fn parent() -> ParentStep {
        ParentStep {
            first_name: "Pat".to_string(),
            last_name: "Lee".to_string(),
            phone: "555-123-4567".to_string(),
        }
    }

    fn new_student(first_name: &str, grade: i32) -> StudentInput {
        StudentInput {
            first_name: first_name.to_string(),
            last_name: "Lee".to_string(),
            grade: Some(grade),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_registers_every_student() {
        let mailer = Arc::new(RecordingMailer::default());
        let f = fixture(mailer.clone()).await;
        let existing = seed_student(&f.pool, f.guardian.id, "Ada").await;
        let program = program(&f, Some(2), (None, None)).await;

        let outcome = f
            .wizard
            .submit(
                &f.guardian,
                WizardSubmission {
                    parent: ParentStep {
                        first_name: "Patricia".to_string(),
                        ..parent()
                    },
                    students: StudentsStep {
                        existing_ids: vec![existing],
                        new_students: vec![new_student("Bo", 2), new_student("Cy", 4)],
                    },
                    program: ProgramStep {
                        program_id: Some(program.id),
                        notes: Some("carpool with the Smiths".to_string()),
                    },
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.guardian.first_name, "Patricia");
        assert_eq!(outcome.guardian.phone.as_deref(), Some("555-123-4567"));
        assert_eq!(outcome.registrations.len(), 3);
        let statuses: Vec<_> = outcome
            .registrations
            .iter()
            .map(|r| r.registration.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                RegistrationStatus::Pending,
                RegistrationStatus::Pending,
                RegistrationStatus::Waitlisted
            ]
        );
        assert_eq!(outcome.waitlisted, 1);
        assert!(outcome.registrations.iter().all(|r| r.student.id > 0));
        assert!(outcome.email_sent);

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Cy Lee: waitlisted"));
    }

    #[tokio::test]
    async fn test_submit_stops_at_first_invalid_step() {
        let f = fixture(Arc::new(RecordingMailer::default())).await;

        let result = f
            .wizard
            .submit(
                &f.guardian,
                WizardSubmission {
                    parent: ParentStep {
                        phone: "".to_string(),
                        ..parent()
                    },
                    students: StudentsStep::default(),
                    program: ProgramStep::default(),
                },
            )
            .await;
        match result {
            Err(WizardError::InvalidStep { step, errors }) => {
                assert_eq!(step, WizardStep::Parent);
                assert!(errors.contains_key("phone"));
                assert!(!errors.contains_key("students"));
            }
            other => panic!("expected parent step failure, got {:?}", other),
        }

        let result = f
            .wizard
            .submit(
                &f.guardian,
                WizardSubmission {
                    parent: parent(),
                    students: StudentsStep {
                        existing_ids: vec![],
                        new_students: vec![new_student("", 20)],
                    },
                    program: ProgramStep::default(),
                },
            )
            .await;
        match result {
            Err(WizardError::InvalidStep { step, errors }) => {
                assert_eq!(step, WizardStep::Students);
                assert!(errors.contains_key("new_students[0].first_name"));
                assert!(errors.contains_key("new_students[0].grade"));
            }
            other => panic!("expected students step failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_grade_band_fails_program_step_without_writes() {
        let f = fixture(Arc::new(RecordingMailer::default())).await;
        let program = program(&f, None, (Some(5), Some(8))).await;

        let result = f
            .wizard
            .submit(
                &f.guardian,
                WizardSubmission {
                    parent: parent(),
                    students: StudentsStep {
                        existing_ids: vec![],
                        new_students: vec![new_student("Bo", 2)],
                    },
                    program: ProgramStep {
                        program_id: Some(program.id),
                        notes: None,
                    },
                },
            )
            .await;

        match result {
            Err(WizardError::InvalidStep { step, errors }) => {
                assert_eq!(step, WizardStep::Program);
                assert!(errors["program_id"].contains("Bo Lee"));
            }
            other => panic!("expected program step failure, got {:?}", other),
        }
        let roster = SqlxStudentRepository::new(f.pool.clone())
            .list_by_guardian(f.guardian.id)
            .await
            .unwrap();
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_already_registered_is_conflict() {
        let f = fixture(Arc::new(RecordingMailer::default())).await;
        let existing = seed_student(&f.pool, f.guardian.id, "Ada").await;
        let program = program(&f, None, (None, None)).await;
        let submission = WizardSubmission {
            parent: parent(),
            students: StudentsStep {
                existing_ids: vec![existing],
                new_students: vec![],
            },
            program: ProgramStep {
                program_id: Some(program.id),
                notes: None,
            },
        };

        f.wizard.submit(&f.guardian, submission.clone()).await.unwrap();
        let again = f.wizard.submit(&f.guardian, submission).await;
        assert!(matches!(again, Err(WizardError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_email_failure_does_not_fail_submission() {
        let f = fixture(Arc::new(FailingMailer)).await;
        let program = program(&f, None, (None, None)).await;

        let outcome = f
            .wizard
            .submit(
                &f.guardian,
                WizardSubmission {
                    parent: parent(),
                    students: StudentsStep {
                        existing_ids: vec![],
                        new_students: vec![new_student("Bo", 2)],
                    },
                    program: ProgramStep {
                        program_id: Some(program.id),
                        notes: None,
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.registrations.len(), 1);
        assert!(!outcome.email_sent);
    }

    #[tokio::test]
    async fn test_log_only_mail_is_not_reported_sent() {
        let f = fixture(Arc::new(LogMailer)).await;
        let program = program(&f, None, (None, None)).await;

        let outcome = f
            .wizard
            .submit(
                &f.guardian,
                WizardSubmission {
                    parent: parent(),
                    students: StudentsStep {
                        existing_ids: vec![],
                        new_students: vec![new_student("Cy", 5)],
                    },
                    program: ProgramStep {
                        program_id: Some(program.id),
                        notes: None,
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.registrations.len(), 1);
        assert!(!outcome.email_sent);
    }

    #[tokio::test]
    async fn test_validate_step_reports_without_writing() {
        let f = fixture(Arc::new(RecordingMailer::default())).await;
        let ada = seed_student(&f.pool, f.guardian.id, "Ada").await;
        let program = program(&f, None, (Some(5), None)).await;

        let report = f
            .wizard
            .validate_step(
                &f.guardian,
                StepCheck {
                    step: WizardStep::Parent,
                    parent: Some(parent()),
                    students: None,
                    program: None,
                },
            )
            .await
            .unwrap();
        assert!(report.valid);

        let report = f
            .wizard
            .validate_step(
                &f.guardian,
                StepCheck {
                    step: WizardStep::Students,
                    parent: None,
                    students: Some(StudentsStep {
                        existing_ids: vec![ada, ada],
                        new_students: vec![],
                    }),
                    program: None,
                },
            )
            .await
            .unwrap();
        assert!(!report.valid);
        assert!(report.errors.contains_key("existing_ids[1]"));

        let report = f
            .wizard
            .validate_step(
                &f.guardian,
                StepCheck {
                    step: WizardStep::Program,
                    parent: None,
                    students: Some(StudentsStep {
                        existing_ids: vec![],
                        new_students: vec![new_student("Bo", 2)],
                    }),
                    program: Some(ProgramStep {
                        program_id: Some(program.id),
                        notes: None,
                    }),
                },
            )
            .await
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.step, WizardStep::Program);

        let roster = SqlxStudentRepository::new(f.pool.clone())
            .list_by_guardian(f.guardian.id)
            .await
            .unwrap();
        assert_eq!(roster.len(), 1);
    }
}
