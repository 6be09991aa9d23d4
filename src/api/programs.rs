//! Public program catalogue
//!
//! - GET /api/programs - Active programs with remaining spots
//! - GET /api/programs/{id}

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::models::ProgramSummary;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_programs))
        .route("/{id}", get(get_program))
}

async fn list_programs(State(state): State<AppState>) -> Result<Json<Vec<ProgramSummary>>, ApiError> {
    Ok(Json(state.program_service.list_active().await?))
}

async fn get_program(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProgramSummary>, ApiError> {
    Ok(Json(state.program_service.get_public(id).await?))
}
