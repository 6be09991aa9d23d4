//! Guardian registration endpoints
//!
//! - GET /api/registrations
//! - POST /api/registrations/{id}/cancel

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::RegistrationDetail;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_registrations))
        .route("/{id}/cancel", post(cancel_registration))
}

async fn list_registrations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<RegistrationDetail>>, ApiError> {
    Ok(Json(
        state.registration_service.list_for_guardian(user.0.id).await?,
    ))
}

async fn cancel_registration(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<RegistrationDetail>, ApiError> {
    Ok(Json(state.registration_service.cancel(user.0.id, id).await?))
}
