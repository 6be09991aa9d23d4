//! Inbound provider webhooks
//!
//! - POST /api/webhooks/email - Delivery events; signed with `X-Webhook-Signature`
//!   when a secret is configured

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/email", post(email_events))
}

/// The signature covers the raw bytes, so the body is not parsed by an extractor
async fn email_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());
    let received = state.webhook_service.ingest(&body, signature).await?;
    Ok(Json(WebhookResponse { received }))
}
