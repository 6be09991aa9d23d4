//! Services layer - Business logic
//!
//! This module contains the business logic of the guardian portal.
//! Services are responsible for:
//! - Implementing business rules
//! - Coordinating between repositories and cache
//! - Handling validation and error cases

pub mod admin;
pub mod announcement;
pub mod email;
pub mod error;
pub mod password;
pub mod program;
pub mod rate_limiter;
pub mod registration;
pub mod registration_wizard;
pub mod student;
pub mod user;
pub mod waiver;
pub mod webhook;

pub use admin::AdminPolicy;
pub use announcement::AnnouncementService;
pub use email::{EmailService, LogMailer, Mailer, OutgoingEmail, SmtpMailer};
pub use error::{FieldErrors, ServiceError};
pub use password::{hash_password, verify_password};
pub use program::ProgramService;
pub use rate_limiter::LoginRateLimiter;
pub use registration::RegistrationService;
pub use registration_wizard::{RegistrationWizard, WizardError, WizardStep};
pub use student::StudentService;
pub use user::{SignupInput, UserService, UserServiceError};
pub use waiver::WaiverService;
pub use webhook::{WebhookError, WebhookService};
