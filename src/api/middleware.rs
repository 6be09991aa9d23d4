//! API middleware
//!
//! Contains:
//! - Application state shared by every handler
//! - The JSON error type and its mapping from service errors
//! - Authentication (session token validation)
//! - Authorization (admin check)
//! - Request statistics

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::create_cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxAnnouncementRepository, SqlxEmailEventRepository, SqlxLoginLogRepository,
    SqlxProgramRepository, SqlxRegistrationRepository, SqlxSessionRepository,
    SqlxStudentRepository, SqlxUserRepository, SqlxWaiverRepository,
};
use crate::db::DynDatabasePool;
use crate::models::{User, UserRole};
use crate::services::{
    AdminPolicy, AnnouncementService, EmailService, LoginRateLimiter, ProgramService,
    RegistrationService, RegistrationWizard, ServiceError, StudentService, UserService,
    UserServiceError, WaiverService, WebhookError, WebhookService, WizardError,
};

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    /// Total number of requests processed
    total_requests: AtomicU64,
    /// Total response time in microseconds (for calculating average)
    total_response_time_us: AtomicU64,
    /// Application start time
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a request with its response time
    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Average response time in microseconds
    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub student_service: Arc<StudentService>,
    pub program_service: Arc<ProgramService>,
    pub registration_service: Arc<RegistrationService>,
    pub waiver_service: Arc<WaiverService>,
    pub announcement_service: Arc<AnnouncementService>,
    pub email_service: Arc<EmailService>,
    pub webhook_service: Arc<WebhookService>,
    pub wizard: Arc<RegistrationWizard>,
    pub admin_policy: Arc<AdminPolicy>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    pub request_stats: Arc<RequestStats>,
}

impl AppState {
    /// Wire repositories and services over an already-migrated pool
    pub fn build(pool: DynDatabasePool, config: &Config) -> anyhow::Result<Self> {
        let cache = create_cache(&config.cache);

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let student_repo = SqlxStudentRepository::boxed(pool.clone());

        let user_service = Arc::new(UserService::with_session_expiration(
            user_repo,
            SqlxSessionRepository::boxed(pool.clone()),
            SqlxLoginLogRepository::boxed(pool.clone()),
            config.auth.session_days,
        ));
        let program_service = Arc::new(ProgramService::new(
            SqlxProgramRepository::boxed(pool.clone()),
            cache,
        ));
        let student_service = Arc::new(StudentService::new(
            student_repo.clone(),
            program_service.clone(),
        ));
        let registration_service = Arc::new(RegistrationService::new(
            SqlxRegistrationRepository::boxed(pool.clone()),
            program_service.clone(),
        ));
        let waiver_service = Arc::new(WaiverService::new(
            SqlxWaiverRepository::boxed(pool.clone()),
            student_repo,
        ));
        let announcement_service = Arc::new(AnnouncementService::new(
            SqlxAnnouncementRepository::boxed(pool.clone()),
        ));
        let email_service = Arc::new(EmailService::from_config(&config.email)?);
        let webhook_service = Arc::new(WebhookService::new(
            SqlxEmailEventRepository::boxed(pool.clone()),
            config.webhook.secret.clone(),
        ));
        let wizard = Arc::new(RegistrationWizard::new(
            user_service.clone(),
            student_service.clone(),
            program_service.clone(),
            registration_service.clone(),
            email_service.clone(),
        ));

        Ok(Self {
            pool,
            user_service,
            student_service,
            program_service,
            registration_service,
            waiver_service,
            announcement_service,
            email_service,
            webhook_service,
            wizard,
            admin_policy: Arc::new(AdminPolicy::new(&config.auth.admin_emails)),
            rate_limiter: Arc::new(LoginRateLimiter::new()),
            request_stats: Arc::new(RequestStats::new()),
        })
    }

    /// Role used for audience checks; admins by any rule see everything
    pub fn effective_role(&self, user: &User) -> UserRole {
        if self.admin_policy.is_admin(user) {
            UserRole::Admin
        } else {
            user.role
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    /// Field-level validation failure; `details.fields` maps field to message
    pub fn invalid_fields(fields: impl Serialize) -> Self {
        Self::with_details(
            "VALIDATION_ERROR",
            "Please correct the highlighted fields",
            serde_json::json!({ "fields": fields }),
        )
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: u64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            message,
            serde_json::json!({ "retry_after": retry_after }),
        )
    }

    /// Log the cause and hide it from the client
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {}", err);
        Self::new("INTERNAL_ERROR", "Something went wrong, please try again later")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" | "ACCOUNT_DISABLED" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => ApiError::validation_error(msg),
            ServiceError::InvalidFields(fields) => ApiError::invalid_fields(fields),
            ServiceError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            ServiceError::Conflict(msg) => ApiError::conflict(msg),
            ServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            ServiceError::Internal(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::AccountDisabled => {
                ApiError::new("ACCOUNT_DISABLED", "This account has been disabled")
            }
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::InvalidFields(fields) => ApiError::invalid_fields(fields),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::NotFound => ApiError::not_found("User not found"),
            UserServiceError::InternalError(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<WizardError> for ApiError {
    fn from(err: WizardError) -> Self {
        match err {
            WizardError::InvalidStep { step, errors } => ApiError::with_details(
                "VALIDATION_ERROR",
                format!("Please correct the {} step", step),
                serde_json::json!({ "step": step, "fields": errors }),
            ),
            WizardError::Conflict(msg) => ApiError::conflict(msg),
            WizardError::Internal(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSignature => ApiError::unauthorized("Invalid webhook signature"),
            WebhookError::InvalidPayload(msg) => ApiError::validation_error(msg),
            WebhookError::Internal(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Session token from `Authorization: Bearer`, falling back to the `session` cookie
pub(crate) fn extract_session_token(headers: &header::HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some(token) = cookie.trim().strip_prefix("session=") {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .user_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Admin authorization middleware; runs after [`require_auth`]
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !state.admin_policy.is_admin(&user.0) {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Request statistics middleware
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .request_stats
        .record(start.elapsed().as_micros() as u64);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use axum::http::HeaderMap;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer test-token-123")]);
        assert_eq!(extract_session_token(&h), Some("test-token-123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let h = headers(&[(header::COOKIE, "theme=dark; session=test-token-456")]);
        assert_eq!(extract_session_token(&h), Some("test-token-456".to_string()));
    }

    #[test]
    fn test_extract_session_token_bearer_priority() {
        let h = headers(&[
            (header::AUTHORIZATION, "Bearer bearer-token"),
            (header::COOKIE, "session=cookie-token"),
        ]);
        assert_eq!(extract_session_token(&h), Some("bearer-token".to_string()));
    }

    #[test]
    fn test_extract_session_token_none() {
        assert!(extract_session_token(&HeaderMap::new()).is_none());
        let h = headers(&[(header::AUTHORIZATION, "Basic invalid")]);
        assert!(extract_session_token(&h).is_none());
        let h = headers(&[(header::COOKIE, "session=")]);
        assert!(extract_session_token(&h).is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            ("VALIDATION_ERROR", StatusCode::BAD_REQUEST),
            ("UNAUTHORIZED", StatusCode::UNAUTHORIZED),
            ("FORBIDDEN", StatusCode::FORBIDDEN),
            ("ACCOUNT_DISABLED", StatusCode::FORBIDDEN),
            ("NOT_FOUND", StatusCode::NOT_FOUND),
            ("CONFLICT", StatusCode::CONFLICT),
            ("RATE_LIMIT", StatusCode::TOO_MANY_REQUESTS),
            ("INTERNAL_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (code, status) in cases {
            assert_eq!(ApiError::new(code, "x").status(), status, "{}", code);
        }
    }

    #[test]
    fn test_service_errors_convert() {
        let err: ApiError = ServiceError::NotFound("Student").into();
        assert_eq!(err.error.code, "NOT_FOUND");
        assert_eq!(err.error.message, "Student not found");

        let mut fields = crate::services::FieldErrors::new();
        fields.insert("grade".to_string(), "Grade must be between -1 and 12".to_string());
        let err: ApiError = ServiceError::InvalidFields(fields).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.error.details.unwrap()["fields"]["grade"],
            "Grade must be between -1 and 12"
        );

        let err: ApiError = UserServiceError::AccountDisabled.into();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err: ApiError = WebhookError::InvalidSignature.into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err: ApiError = ServiceError::Internal(anyhow!("database is locked")).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.error.message.contains("locked"));
    }

    #[test]
    fn test_request_stats() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_us(), 0.0);
        stats.record(100);
        stats.record(300);
        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.avg_response_time_us(), 200.0);
    }
}
