//! Login sessions
//!
//! A session is an opaque random token handed to the guardian as a cookie
//! (or bearer token) after a successful login.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The token itself; also the primary key
    pub id: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Mint a fresh token for `user_id` that lives for `lifetime`
    pub fn issue(user_id: i64, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + lifetime,
            created_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired_at(Utc::now())
    }

    pub fn expired_at(&self, instant: DateTime<Utc>) -> bool {
        self.expires_at <= instant
    }

    /// Whole seconds left before expiry, zero once expired
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}
