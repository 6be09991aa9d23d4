//! Waiver model
//!
//! A liability document tracked per student. A signature is valid for
//! [`WAIVER_VALIDITY_DAYS`] days.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Days a signed waiver stays valid
pub const WAIVER_VALIDITY_DAYS: i64 = 365;

/// Waiver entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waiver {
    pub id: i64,
    pub student_id: i64,
    pub title: String,
    pub status: WaiverStatus,
    pub signed_by: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Waiver {
    pub fn new(student_id: i64, title: String) -> Self {
        Self {
            id: 0,
            student_id,
            title,
            status: WaiverStatus::Pending,
            signed_by: None,
            signed_at: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// Record a signature at `now`
    pub fn sign(&mut self, signed_by: String, now: DateTime<Utc>) {
        self.status = WaiverStatus::Signed;
        self.signed_by = Some(signed_by);
        self.signed_at = Some(now);
        self.expires_at = Some(now + Duration::days(WAIVER_VALIDITY_DAYS));
    }

    /// Status as of `now`: a signed waiver past `expires_at` reads as expired
    pub fn effective_status_at(&self, now: DateTime<Utc>) -> WaiverStatus {
        match (self.status, self.expires_at) {
            (WaiverStatus::Signed, Some(expires_at)) if expires_at <= now => WaiverStatus::Expired,
            (status, _) => status,
        }
    }

    /// Replace the stored status with the effective one
    pub fn with_effective_status(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status_at(now);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WaiverStatus {
    #[default]
    Pending,
    Signed,
    Expired,
}

impl fmt::Display for WaiverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Signed => write!(f, "signed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for WaiverStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "signed" => Ok(Self::Signed),
            "expired" => Ok(Self::Expired),
            _ => Err(anyhow::anyhow!("Invalid waiver status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_sets_expiry_one_year_out() {
        let now = Utc::now();
        let mut waiver = Waiver::new(1, "Liability".to_string());
        waiver.sign("Pat Lee".to_string(), now);

        assert_eq!(waiver.status, WaiverStatus::Signed);
        assert_eq!(waiver.signed_by.as_deref(), Some("Pat Lee"));
        assert_eq!(waiver.signed_at, Some(now));
        assert_eq!(waiver.expires_at, Some(now + Duration::days(365)));
    }

    #[test]
    fn test_effective_status_flips_after_expiry() {
        let signed_at = Utc::now() - Duration::days(400);
        let mut waiver = Waiver::new(1, "Liability".to_string());
        waiver.sign("Pat Lee".to_string(), signed_at);

        assert_eq!(
            waiver.effective_status_at(signed_at + Duration::days(364)),
            WaiverStatus::Signed
        );
        assert_eq!(waiver.effective_status_at(Utc::now()), WaiverStatus::Expired);
        assert_eq!(
            waiver.with_effective_status(Utc::now()).status,
            WaiverStatus::Expired
        );
    }

    #[test]
    fn test_pending_stays_pending() {
        let waiver = Waiver::new(1, "Photo release".to_string());
        assert_eq!(waiver.effective_status_at(Utc::now()), WaiverStatus::Pending);
    }
}
