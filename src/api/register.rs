//! Registration wizard endpoints
//!
//! - POST /api/register/validate - Check one step, nothing is written
//! - POST /api/register - Submit all three steps

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::services::registration_wizard::{StepCheck, StepReport, WizardOutcome, WizardSubmission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit))
        .route("/validate", post(validate_step))
}

/// Always 200; `valid` and `errors` carry the outcome
async fn validate_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<StepCheck>,
) -> Result<Json<StepReport>, ApiError> {
    Ok(Json(state.wizard.validate_step(&user.0, body).await?))
}

async fn submit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<WizardSubmission>,
) -> Result<(StatusCode, Json<WizardOutcome>), ApiError> {
    let outcome = state.wizard.submit(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
