//! Data models
//!
//! Database entities, input types and listing views used across the portal:
//! users and sessions, students, programs, registrations, waivers,
//! announcements, email events and login logs.

mod announcement;
mod email_event;
mod login_log;
mod pagination;
mod program;
mod registration;
mod session;
mod student;
mod user;
mod waiver;

pub use announcement::{
    Announcement, AnnouncementInput, AnnouncementPriority, AnnouncementReceipt,
    AnnouncementStatus, FeedFilter, FeedItem, Recipients,
};
pub use email_event::{EmailEvent, NewEmailEvent};
pub use login_log::{LoginAttempt, LoginFailure, LoginLog};
pub use pagination::{ListParams, PagedResult};
pub use program::{Program, ProgramInput, ProgramSummary};
pub use registration::{Registration, RegistrationDetail, RegistrationFilter, RegistrationStatus};
pub use session::Session;
pub use student::{grade_label, Student, StudentInput, MAX_GRADE, MIN_GRADE};
pub use user::{UpdateProfileInput, User, UserRole, UserStatus};
pub use waiver::{Waiver, WaiverStatus, WAIVER_VALIDITY_DAYS};
