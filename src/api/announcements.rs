//! Announcement feed for the signed-in user
//!
//! - GET /api/announcements?include_hidden=&unread_only=
//! - GET /api/announcements/unread-count
//! - POST /api/announcements/{id}/read, /hide, /unhide

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{FeedFilter, FeedItem};

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(feed))
        .route("/unread-count", get(unread_count))
        .route("/{id}/read", post(mark_read))
        .route("/{id}/hide", post(hide))
        .route("/{id}/unhide", post(unhide))
}

async fn feed(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<FeedFilter>,
) -> Result<Json<Vec<FeedItem>>, ApiError> {
    let role = state.effective_role(&user.0);
    Ok(Json(
        state
            .announcement_service
            .feed(user.0.id, role, filter)
            .await?,
    ))
}

async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let role = state.effective_role(&user.0);
    let unread = state.announcement_service.unread_count(user.0.id, role).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let role = state.effective_role(&user.0);
    state
        .announcement_service
        .mark_read(user.0.id, role, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn hide(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    set_hidden(&state, &user, id, true).await
}

async fn unhide(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    set_hidden(&state, &user, id, false).await
}

async fn set_hidden(
    state: &AppState,
    user: &AuthenticatedUser,
    id: i64,
    hidden: bool,
) -> Result<StatusCode, ApiError> {
    let role = state.effective_role(&user.0);
    state
        .announcement_service
        .set_hidden(user.0.id, role, id, hidden)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
