//! Authentication API endpoints
//!
//! - POST /api/auth/signup - Guardian signup
//! - POST /api/auth/login - Login (rate limited per IP and per email)
//! - POST /api/auth/logout - Logout
//! - GET /api/auth/me - Current user
//! - PUT /api/auth/profile - Update names and phone
//! - PUT /api/auth/password - Change password

use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use crate::api::middleware::{extract_session_token, ApiError, AppState, AuthenticatedUser};
use crate::models::{LoginAttempt, LoginFailure, Session, UpdateProfileInput, User};
use crate::services::user::normalize_email;
use crate::services::{SignupInput, UserServiceError};

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

/// User as returned to clients
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub status: String,
    /// Whether admin routes are open to this user
    pub is_admin: bool,
    pub created_at: String,
}

impl UserResponse {
    pub fn new(user: User, state: &AppState) -> Self {
        let is_admin = state.admin_policy.is_admin(&user);
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            role: user.role.to_string(),
            status: user.status.to_string(),
            is_admin,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Request body for changing password
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
}

fn session_cookie(session: &Session, days: i64) -> Result<HeaderMap, ApiError> {
    let cookie = format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id,
        days * 24 * 60 * 60
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(ApiError::internal)?,
    );
    Ok(headers)
}

/// POST /api/auth/signup - Create a guardian account and sign it in
async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupInput>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state.user_service.signup(body).await?;

    let (session, user) = state.user_service.login(&user.email, &password).await?;
    let headers = session_cookie(&session, state.user_service.session_expiration_days())?;

    Ok((
        StatusCode::CREATED,
        headers,
        Json(AuthResponse {
            user: UserResponse::new(user, &state),
            token: session.id,
        }),
    ))
}

/// POST /api/auth/login - Login
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&body.email);
    let ip_address = client_ip.map(|ip| ip.to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(String::from);

    let attempt = LoginAttempt::new(&email, ip_address.clone(), user_agent);

    // 10 requests per IP per minute
    if let Some(ip) = client_ip {
        if state.rate_limiter.is_ip_limited(ip).await {
            state
                .user_service
                .record_login_attempt(attempt.failed(LoginFailure::IpThrottled))
                .await;
            return Err(ApiError::rate_limited(
                "Too many requests, please try again shortly",
                60,
            ));
        }
        state.rate_limiter.record_ip_request(ip).await;
    }

    // 5 failures per email per 15 minutes
    if state.rate_limiter.is_email_limited(&email).await {
        state
            .user_service
            .record_login_attempt(attempt.failed(LoginFailure::EmailThrottled))
            .await;
        return Err(ApiError::rate_limited(
            "Too many failed attempts, please try again in 15 minutes",
            900,
        ));
    }

    let (session, user) = match state.user_service.login(&email, &body.password).await {
        Ok(result) => result,
        Err(e) => {
            let reason = match &e {
                UserServiceError::AccountDisabled => LoginFailure::AccountDisabled,
                UserServiceError::AuthenticationError(_) => LoginFailure::BadCredentials,
                _ => LoginFailure::ServerError,
            };
            state.rate_limiter.record_failed_attempt(&email).await;
            state
                .user_service
                .record_login_attempt(attempt.failed(reason))
                .await;
            return Err(e.into());
        }
    };

    state.rate_limiter.clear_email_attempts(&email).await;
    state.user_service.record_login_attempt(attempt.succeeded()).await;

    let response_headers = session_cookie(&session, state.user_service.session_expiration_days())?;
    Ok((
        response_headers,
        Json(AuthResponse {
            user: UserResponse::new(user, &state),
            token: session.id,
        }),
    ))
}

/// POST /api/auth/logout - Logout
async fn logout(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_session_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
    state.user_service.logout(&token).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// GET /api/auth/me - Current user
async fn get_current_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Json<UserResponse> {
    Json(UserResponse::new(user.0, &state))
}

/// PUT /api/auth/profile - Update the current user's contact details
async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<UserResponse>, ApiError> {
    let updated = state.user_service.update_profile(user.0.id, body).await?;
    Ok(Json(UserResponse::new(updated, &state)))
}

/// PUT /api/auth/password - Change the current user's password
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .user_service
        .change_password(user.0.id, &body.current_password, &body.new_password)
        .await
        .map_err(|e| match e {
            // A wrong current password is a form error, not a lost session
            UserServiceError::AuthenticationError(msg) => ApiError::validation_error(msg),
            other => other.into(),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// Address of the caller, for per-IP throttling and the login log
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(extract_ip_address(&parts.headers, peer)))
    }
}

/// Proxy headers win; otherwise the socket peer
fn extract_ip_address(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    from_header("x-forwarded-for")
        .or_else(|| from_header("x-real-ip"))
        .or(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_extract_ip_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_ip_address(&headers, None), None);
        assert_eq!(
            extract_ip_address(&headers, Some(ip("192.0.2.1"))),
            Some(ip("192.0.2.1"))
        );

        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(
            extract_ip_address(&headers, Some(ip("192.0.2.1"))),
            Some(ip("10.0.0.9"))
        );

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_ip_address(&headers, None), Some(ip("203.0.113.7")));
    }

    #[test]
    fn test_unparseable_proxy_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "unknown".parse().unwrap());
        assert_eq!(
            extract_ip_address(&headers, Some(ip("192.0.2.1"))),
            Some(ip("192.0.2.1"))
        );
    }
}
