//! Student roster endpoints for the signed-in guardian
//!
//! - GET/POST /api/students
//! - GET/PUT/DELETE /api/students/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{Student, StudentInput};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_students).post(create_student))
        .route(
            "/{id}",
            get(get_student).put(update_student).delete(delete_student),
        )
}

async fn list_students(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Student>>, ApiError> {
    Ok(Json(state.student_service.list_for_guardian(user.0.id).await?))
}

async fn create_student(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<StudentInput>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    let student = state.student_service.create(user.0.id, body).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

async fn get_student(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Student>, ApiError> {
    Ok(Json(state.student_service.get_owned(user.0.id, id).await?))
}

async fn update_student(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<StudentInput>,
) -> Result<Json<Student>, ApiError> {
    Ok(Json(state.student_service.update(user.0.id, id, body).await?))
}

async fn delete_student(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.student_service.delete(user.0.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
