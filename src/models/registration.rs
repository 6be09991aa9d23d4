//! Registration model
//!
//! Links a student to a program. One row per (student, program).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registration entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub student_id: i64,
    pub program_id: i64,
    pub status: RegistrationStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn new(student_id: i64, program_id: i64, status: RegistrationStatus) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            student_id,
            program_id,
            status,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Registration lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    #[default]
    Pending,
    Confirmed,
    Waitlisted,
    Cancelled,
}

impl RegistrationStatus {
    /// Pending and confirmed registrations hold a seat
    pub fn holds_seat(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn is_cancelled(&self) -> bool {
        *self == Self::Cancelled
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Waitlisted => write!(f, "waitlisted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RegistrationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "waitlisted" => Ok(Self::Waitlisted),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid registration status: {}", s)),
        }
    }
}

/// Registration joined with the names a listing needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationDetail {
    #[serde(flatten)]
    pub registration: Registration,
    pub guardian_id: i64,
    pub student_name: String,
    pub program_name: String,
}

/// Admin listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationFilter {
    pub status: Option<RegistrationStatus>,
    pub program_id: Option<i64>,
}
