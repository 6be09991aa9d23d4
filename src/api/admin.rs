//! Admin API endpoints
//!
//! Back-office routes under /api/admin, all behind `require_auth` and
//! `require_admin`:
//! - Dashboard counts and request statistics
//! - User management
//! - Programs, registrations, students and waivers
//! - Announcements
//! - Email events and login logs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::api::auth::UserResponse;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{
    Announcement, AnnouncementInput, EmailEvent, ListParams, LoginLog, Program,
    ProgramInput, ProgramSummary, RegistrationDetail, RegistrationFilter, RegistrationStatus,
    Student, UserRole, UserStatus, Waiver, WaiverStatus,
};
use crate::services::ServiceError;

/// App version reported on the dashboard
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Response for dashboard stats
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub guardians: i64,
    pub students: i64,
    pub active_programs: i64,
    /// Registration count per status
    pub registrations: BTreeMap<String, i64>,
    pub waivers_pending: i64,
    pub waivers_expired: i64,
    pub published_announcements: i64,
    pub requests: RequestStatsResponse,
}

#[derive(Debug, Serialize)]
pub struct RequestStatsResponse {
    pub version: String,
    pub total_requests: u64,
    /// Average response time in milliseconds
    pub avg_response_time_ms: f64,
    pub uptime_seconds: u64,
    /// Uptime formatted (e.g., "2h 15m")
    pub uptime_formatted: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct AdminFlagRequest {
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Deserialize)]
pub struct RegistrationStatusRequest {
    pub status: RegistrationStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaiverQuery {
    #[serde(default)]
    pub status: Option<WaiverStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWaiverRequest {
    pub student_id: i64,
    pub title: String,
}

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(get_dashboard))
        // Users
        .route("/users", get(list_users))
        .route("/users/{id}/role", put(set_user_role))
        .route("/users/{id}/admin", put(set_user_admin_flag))
        .route("/users/{id}/status", put(set_user_status))
        // Programs
        .route("/programs", get(list_programs).post(create_program))
        .route("/programs/{id}", put(update_program).delete(delete_program))
        .route("/programs/{id}/deactivate", post(deactivate_program))
        // Registrations
        .route("/registrations", get(list_registrations))
        .route("/registrations/{id}/status", put(set_registration_status))
        // Students
        .route("/students/{id}", get(get_student))
        // Waivers
        .route("/waivers", get(list_waivers).post(create_waiver))
        .route("/waivers/{id}/remind", post(remind_waiver))
        // Announcements
        .route("/announcements", get(list_announcements).post(create_announcement))
        .route(
            "/announcements/{id}",
            get(get_announcement)
                .put(update_announcement)
                .delete(delete_announcement),
        )
        .route("/announcements/{id}/publish", post(publish_announcement))
        .route("/announcements/{id}/archive", post(archive_announcement))
        // Audit
        .route("/email-events", get(list_email_events))
        .route("/login-logs", get(list_login_logs))
}

/// GET /api/admin/dashboard
async fn get_dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>, ApiError> {
    let guardians = state.user_service.count_by_role(UserRole::Guardian).await?;
    let students = state.student_service.count().await?;
    let active_programs = state.program_service.count_active().await?;
    let registrations = state
        .registration_service
        .count_by_status()
        .await?
        .into_iter()
        .map(|(status, count)| (status.to_string(), count))
        .collect();
    let waivers_pending = state.waiver_service.count_pending().await?;
    let waivers_expired = state.waiver_service.count_expired().await?;
    let published_announcements = state.announcement_service.count_published().await?;

    let uptime_seconds = state.request_stats.uptime_seconds();
    Ok(Json(DashboardResponse {
        guardians,
        students,
        active_programs,
        registrations,
        waivers_pending,
        waivers_expired,
        published_announcements,
        requests: RequestStatsResponse {
            version: APP_VERSION.to_string(),
            total_requests: state.request_stats.total_requests(),
            avg_response_time_ms: state.request_stats.avg_response_time_us() / 1000.0,
            uptime_seconds,
            uptime_formatted: format_uptime(uptime_seconds),
        },
    }))
}

/// Format uptime to human readable string
fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

// ============================================================================
// Users
// ============================================================================

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    let result = state.user_service.list_users(&params).await?;
    let total_pages = result.total_pages();

    Ok(Json(UserListResponse {
        total: result.total,
        page: result.page,
        per_page: result.per_page,
        total_pages,
        users: result
            .items
            .into_iter()
            .map(|u| UserResponse::new(u, &state))
            .collect(),
    }))
}

async fn set_user_role(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.user_service.set_role(id, body.role).await?;
    Ok(Json(UserResponse::new(user, &state)))
}

async fn set_user_admin_flag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AdminFlagRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.user_service.set_admin_flag(id, body.is_admin).await?;
    Ok(Json(UserResponse::new(user, &state)))
}

/// Admins cannot disable themselves
async fn set_user_status(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if id == admin.0.id && body.status == UserStatus::Disabled {
        return Err(ApiError::validation_error("You cannot disable your own account"));
    }
    let user = state.user_service.set_status(id, body.status).await?;
    Ok(Json(UserResponse::new(user, &state)))
}

// ============================================================================
// Programs
// ============================================================================

async fn list_programs(State(state): State<AppState>) -> Result<Json<Vec<ProgramSummary>>, ApiError> {
    Ok(Json(state.program_service.list_all().await?))
}

async fn create_program(
    State(state): State<AppState>,
    Json(body): Json<ProgramInput>,
) -> Result<(StatusCode, Json<Program>), ApiError> {
    let program = state.program_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(program)))
}

async fn update_program(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ProgramInput>,
) -> Result<Json<Program>, ApiError> {
    Ok(Json(state.program_service.update(id, body).await?))
}

async fn deactivate_program(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Program>, ApiError> {
    Ok(Json(state.program_service.deactivate(id).await?))
}

async fn delete_program(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.program_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Registrations and students
// ============================================================================

async fn list_registrations(
    State(state): State<AppState>,
    Query(filter): Query<RegistrationFilter>,
) -> Result<Json<Vec<RegistrationDetail>>, ApiError> {
    Ok(Json(state.registration_service.list(&filter).await?))
}

async fn set_registration_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RegistrationStatusRequest>,
) -> Result<Json<RegistrationDetail>, ApiError> {
    Ok(Json(
        state
            .registration_service
            .set_status(id, body.status, body.notes.as_deref())
            .await?,
    ))
}

async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Student>, ApiError> {
    state
        .student_service
        .get_any(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Student not found"))
}

// ============================================================================
// Waivers
// ============================================================================

async fn list_waivers(
    State(state): State<AppState>,
    Query(query): Query<WaiverQuery>,
) -> Result<Json<Vec<Waiver>>, ApiError> {
    Ok(Json(state.waiver_service.list_all(query.status).await?))
}

async fn create_waiver(
    State(state): State<AppState>,
    Json(body): Json<CreateWaiverRequest>,
) -> Result<(StatusCode, Json<Waiver>), ApiError> {
    let waiver = state
        .waiver_service
        .create(body.student_id, &body.title)
        .await?;
    Ok((StatusCode::CREATED, Json(waiver)))
}

/// POST /api/admin/waivers/{id}/remind - Email the guardian about an unsigned waiver
async fn remind_waiver(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let (waiver, student) = state.waiver_service.with_student(id).await?;
    let waiver = waiver.with_effective_status(chrono::Utc::now());
    if waiver.status == WaiverStatus::Signed {
        return Err(ServiceError::Conflict("Waiver is already signed".to_string()).into());
    }

    let guardian = state
        .user_service
        .get_by_id(student.guardian_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Guardian not found"))?;

    state
        .email_service
        .send_waiver_reminder(&guardian, &student.full_name(), &waiver)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to send waiver reminder: {:#}", e)))?;

    tracing::info!("Sent waiver {} reminder to {}", waiver.id, guardian.email);
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Announcements
// ============================================================================

async fn list_announcements(
    State(state): State<AppState>,
) -> Result<Json<Vec<Announcement>>, ApiError> {
    Ok(Json(state.announcement_service.list_all().await?))
}

async fn get_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Announcement>, ApiError> {
    Ok(Json(state.announcement_service.get(id).await?))
}

async fn create_announcement(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Json(body): Json<AnnouncementInput>,
) -> Result<(StatusCode, Json<Announcement>), ApiError> {
    let announcement = state.announcement_service.create(admin.0.id, body).await?;
    Ok((StatusCode::CREATED, Json(announcement)))
}

async fn update_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AnnouncementInput>,
) -> Result<Json<Announcement>, ApiError> {
    Ok(Json(state.announcement_service.update(id, body).await?))
}

async fn publish_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Announcement>, ApiError> {
    Ok(Json(state.announcement_service.publish(id).await?))
}

async fn archive_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Announcement>, ApiError> {
    Ok(Json(state.announcement_service.archive(id).await?))
}

async fn delete_announcement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.announcement_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Audit
// ============================================================================

async fn list_email_events(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<EmailEvent>>, ApiError> {
    Ok(Json(state.webhook_service.recent(query.limit).await?))
}

async fn list_login_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<LoginLog>>, ApiError> {
    Ok(Json(
        state.user_service.recent_login_attempts(query.limit).await?,
    ))
}
