//! Login audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored login attempt, as listed to administrators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginLog {
    pub id: i64,
    pub email: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Why a login was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    IpThrottled,
    EmailThrottled,
    BadCredentials,
    AccountDisabled,
    ServerError,
}

impl LoginFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpThrottled => "ip_rate_limited",
            Self::EmailThrottled => "email_rate_limited",
            Self::BadCredentials => "invalid_credentials",
            Self::AccountDisabled => "account_disabled",
            Self::ServerError => "server_error",
        }
    }
}

/// What the login handler knows about a request before it is decided
#[derive(Debug, Clone, Default)]
pub struct LoginAttempt {
    pub email: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub failure_reason: Option<String>,
}

impl LoginAttempt {
    pub fn new(email: &str, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            email: email.to_string(),
            ip_address,
            user_agent,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> Self {
        Self {
            success: true,
            failure_reason: None,
            ..self.clone()
        }
    }

    pub fn failed(&self, why: LoginFailure) -> Self {
        Self {
            success: false,
            failure_reason: Some(why.as_str().to_string()),
            ..self.clone()
        }
    }
}
