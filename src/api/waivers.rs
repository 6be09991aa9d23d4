//! Guardian waiver endpoints
//!
//! - GET /api/waivers
//! - POST /api/waivers/{id}/sign

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::Waiver;

/// Typed-name signature
#[derive(Debug, Deserialize)]
pub struct SignRequest {
    #[serde(default)]
    pub signed_by: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_waivers))
        .route("/{id}/sign", post(sign_waiver))
}

async fn list_waivers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Waiver>>, ApiError> {
    Ok(Json(state.waiver_service.list_for_guardian(user.0.id).await?))
}

async fn sign_waiver(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<SignRequest>,
) -> Result<Json<Waiver>, ApiError> {
    Ok(Json(
        state
            .waiver_service
            .sign(user.0.id, id, &body.signed_by)
            .await?,
    ))
}
