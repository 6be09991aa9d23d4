//! User service
//!
//! Account business logic:
//! - Guardian signup with input validation
//! - Login/logout and session lifetime
//! - Profile and password changes
//! - Back-office account management (roles, admin flag, enable/disable)

use crate::db::repositories::{LoginLogRepository, SessionRepository, UserRepository};
use crate::models::{
    ListParams, LoginAttempt, LoginLog, PagedResult, Session, UpdateProfileInput, User, UserRole,
    UserStatus,
};
use crate::services::error::{require, FieldErrors};
use crate::services::password::{check_password_policy, hash_password, verify_password};
use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Default session expiration time in days
const DEFAULT_SESSION_EXPIRATION_DAYS: i64 = 7;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Authentication failed (invalid credentials)
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// The account exists but has been disabled by an admin
    #[error("Account disabled")]
    AccountDisabled,

    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Per-field validation messages
    #[error("Validation failed for {} field(s)", .0.len())]
    InvalidFields(FieldErrors),

    /// User already exists
    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found")]
    NotFound,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for guardian signup
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SignupInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// User service for managing accounts and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    login_log_repo: Arc<dyn LoginLogRepository>,
    session_expiration_days: i64,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        login_log_repo: Arc<dyn LoginLogRepository>,
    ) -> Self {
        Self::with_session_expiration(
            user_repo,
            session_repo,
            login_log_repo,
            DEFAULT_SESSION_EXPIRATION_DAYS,
        )
    }

    /// Create a user service with a custom session lifetime
    pub fn with_session_expiration(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        login_log_repo: Arc<dyn LoginLogRepository>,
        session_expiration_days: i64,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            login_log_repo,
            session_expiration_days: session_expiration_days.max(1),
        }
    }

    pub fn session_expiration_days(&self) -> i64 {
        self.session_expiration_days
    }

    /// Create a guardian account.
    ///
    /// The email is stored lowercased; a second account with the same
    /// address is rejected with `UserExists`.
    pub async fn signup(&self, input: SignupInput) -> Result<User, UserServiceError> {
        let email = normalize_email(&input.email);

        let mut errors = validate_contact(&input.first_name, &input.last_name, input.phone.as_deref());
        if !is_valid_email(&email) {
            errors.insert("email".to_string(), "Enter a valid email address".to_string());
        }
        if let Err(msg) = check_password_policy(&input.password) {
            errors.insert("password".to_string(), msg);
        }
        if !errors.is_empty() {
            return Err(UserServiceError::InvalidFields(errors));
        }

        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check existing email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(email));
        }

        let password_hash = hash_password(&input.password)?;
        let mut user = User::new(
            email,
            password_hash,
            input.first_name.trim().to_string(),
            input.last_name.trim().to_string(),
            UserRole::Guardian,
        );
        user.phone = clean_optional(input.phone);

        let created = self
            .user_repo
            .create(&user)
            .await
            .context("Failed to create user")?;

        tracing::info!("New guardian account {} ({})", created.id, created.email);
        Ok(created)
    }

    /// Verify credentials and open a session.
    ///
    /// Unknown email and wrong password produce the same error.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Session, User), UserServiceError> {
        let email = normalize_email(email);
        let user = self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up user")?
            .ok_or_else(|| UserServiceError::AuthenticationError(INVALID_CREDENTIALS.to_string()))?;

        if !verify_password(password, &user.password_hash).context("Failed to verify password")? {
            return Err(UserServiceError::AuthenticationError(
                INVALID_CREDENTIALS.to_string(),
            ));
        }

        if user.is_disabled() {
            return Err(UserServiceError::AccountDisabled);
        }

        let session = self.create_session(user.id).await?;
        Ok((session, user))
    }

    /// Invalidate a session token
    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .revoke(token)
            .await
            .context("Failed to revoke session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// An expired session is deleted and reads as absent, as does a session
    /// belonging to a disabled account.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .find(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            if let Err(e) = self.session_repo.revoke(token).await {
                tracing::warn!("Failed to delete expired session: {:#}", e);
            }
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;

        Ok(user.filter(|u| u.is_active()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    /// Update names and phone of the signed-in user.
    ///
    /// Omitted fields are left alone; an empty phone clears it.
    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<User, UserServiceError> {
        let mut user = self.require_user(user_id).await?;

        if let Some(first) = input.first_name {
            user.first_name = first.trim().to_string();
        }
        if let Some(last) = input.last_name {
            user.last_name = last.trim().to_string();
        }
        if let Some(phone) = input.phone {
            user.phone = clean_optional(Some(phone));
        }

        let errors = validate_contact(&user.first_name, &user.last_name, user.phone.as_deref());
        if !errors.is_empty() {
            return Err(UserServiceError::InvalidFields(errors));
        }

        Ok(self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update profile")?)
    }

    /// Replace the password after checking the current one
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UserServiceError> {
        let mut user = self.require_user(user_id).await?;

        if !verify_password(current_password, &user.password_hash)
            .context("Failed to verify password")?
        {
            return Err(UserServiceError::AuthenticationError(
                "Current password is incorrect".to_string(),
            ));
        }
        check_password_policy(new_password).map_err(UserServiceError::ValidationError)?;

        user.password_hash = hash_password(new_password)?;
        self.user_repo
            .update(&user)
            .await
            .context("Failed to update password")?;
        Ok(())
    }

    /// Delete all expired sessions, returning how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self
            .session_repo
            .purge_expired(Utc::now())
            .await
            .context("Failed to delete expired sessions")?)
    }

    /// Write a login attempt to the audit log.
    ///
    /// Failures are logged and swallowed so they never block a login.
    pub async fn record_login_attempt(&self, attempt: LoginAttempt) {
        if let Err(e) = self.login_log_repo.record(&attempt).await {
            tracing::warn!("Failed to record login attempt for {}: {:#}", attempt.email, e);
        }
    }

    pub async fn recent_login_attempts(&self, limit: i64) -> Result<Vec<LoginLog>, UserServiceError> {
        Ok(self
            .login_log_repo
            .list_recent(limit.clamp(1, 500))
            .await
            .context("Failed to list login attempts")?)
    }

    // ========================================================================
    // Account management
    // ========================================================================

    pub async fn list_users(&self, params: &ListParams) -> Result<PagedResult<User>, UserServiceError> {
        let (users, total) = self
            .user_repo
            .list(params)
            .await
            .context("Failed to list users")?;
        Ok(PagedResult::new(users, total, params))
    }

    pub async fn count_by_role(&self, role: UserRole) -> Result<i64, UserServiceError> {
        Ok(self
            .user_repo
            .count_by_role(role)
            .await
            .context("Failed to count users")?)
    }

    pub async fn set_role(&self, user_id: i64, role: UserRole) -> Result<User, UserServiceError> {
        let mut user = self.require_user(user_id).await?;
        user.role = role;
        Ok(self.user_repo.update(&user).await.context("Failed to update role")?)
    }

    pub async fn set_admin_flag(&self, user_id: i64, is_admin: bool) -> Result<User, UserServiceError> {
        let mut user = self.require_user(user_id).await?;
        user.is_admin = is_admin;
        Ok(self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update admin flag")?)
    }

    /// Enable or disable an account. Disabling revokes every session.
    pub async fn set_status(&self, user_id: i64, status: UserStatus) -> Result<User, UserServiceError> {
        let mut user = self.require_user(user_id).await?;
        user.status = status;
        let updated = self
            .user_repo
            .update(&user)
            .await
            .context("Failed to update account status")?;

        if updated.is_disabled() {
            let revoked = self
                .session_repo
                .revoke_all_for_user(user_id)
                .await
                .context("Failed to revoke sessions")?;
            tracing::info!("Disabled account {} and revoked {} session(s)", user_id, revoked);
        }
        Ok(updated)
    }

    // ========================================================================
    // Private helper methods
    // ========================================================================

    async fn require_user(&self, user_id: i64) -> Result<User, UserServiceError> {
        self.user_repo
            .get_by_id(user_id)
            .await
            .context("Failed to get user")?
            .ok_or(UserServiceError::NotFound)
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let session = Session::issue(user_id, Duration::days(self.session_expiration_days));

        Ok(self
            .session_repo
            .insert(&session)
            .await
            .context("Failed to create session")?)
    }
}

/// Lowercase and trim an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Something before and after a single `@`, with a dot in the domain
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// A phone number needs 7 to 15 digits; spaces, dashes, dots, parens and `+` are allowed
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits)
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || " -.()+".contains(c))
}

/// Field errors for a person's name and optional phone
pub fn validate_contact(first_name: &str, last_name: &str, phone: Option<&str>) -> FieldErrors {
    let mut errors = FieldErrors::new();
    require(&mut errors, "first_name", first_name, "First name is required");
    require(&mut errors, "last_name", last_name, "Last name is required");
    if let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) {
        if !is_valid_phone(phone) {
            errors.insert("phone".to_string(), "Enter a valid phone number".to_string());
        }
    }
    errors
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
