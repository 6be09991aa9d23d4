//! Email delivery event model
//!
//! Events reported by the email provider's webhook (delivered, bounce, open...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored email event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: i64,
    pub email: String,
    /// Provider event name, e.g. "delivered" or "bounce"
    pub event: String,
    pub message_id: Option<String>,
    pub reason: Option<String>,
    /// When the provider says the event happened
    pub occurred_at: DateTime<Utc>,
    /// When we received it
    pub received_at: DateTime<Utc>,
}

/// Event ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmailEvent {
    pub email: String,
    pub event: String,
    pub message_id: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
