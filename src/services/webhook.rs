//! Email provider webhook
//!
//! The provider posts a JSON array of delivery events. When a shared secret
//! is configured, the `X-Webhook-Signature` header must carry the hex
//! HMAC-SHA256 of the raw request body.

use crate::db::repositories::EmailEventRepository;
use crate::models::{EmailEvent, NewEmailEvent};
use anyhow::Context;
use chrono::DateTime;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Error types for webhook ingestion
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// One event as the provider sends it; unknown fields are ignored
#[derive(Debug, Deserialize)]
struct ProviderEvent {
    email: String,
    event: String,
    /// Unix seconds
    timestamp: i64,
    #[serde(default)]
    sg_message_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Lowercase hex HMAC-SHA256 of `body`
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Constant-time check of a hex signature, with or without a `sha256=` prefix
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Some(expected) = decode_hex(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Parse a non-empty array of well-formed events
pub fn parse_events(body: &[u8]) -> Result<Vec<NewEmailEvent>, WebhookError> {
    let items: Vec<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| WebhookError::InvalidPayload(format!("expected a JSON array: {}", e)))?;
    if items.is_empty() {
        return Err(WebhookError::InvalidPayload("no events".to_string()));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let raw: ProviderEvent = serde_json::from_value(item)
                .map_err(|e| WebhookError::InvalidPayload(format!("event {}: {}", i, e)))?;
            if raw.email.trim().is_empty() || raw.event.trim().is_empty() {
                return Err(WebhookError::InvalidPayload(format!(
                    "event {}: email and event must not be empty",
                    i
                )));
            }
            let occurred_at = DateTime::from_timestamp(raw.timestamp, 0).ok_or_else(|| {
                WebhookError::InvalidPayload(format!("event {}: timestamp out of range", i))
            })?;
            Ok(NewEmailEvent {
                email: raw.email.trim().to_lowercase(),
                event: raw.event.trim().to_lowercase(),
                message_id: raw.sg_message_id,
                reason: raw.reason,
                occurred_at,
            })
        })
        .collect()
}

/// Webhook service
pub struct WebhookService {
    repo: Arc<dyn EmailEventRepository>,
    secret: Option<String>,
}

impl WebhookService {
    pub fn new(repo: Arc<dyn EmailEventRepository>, secret: Option<String>) -> Self {
        Self {
            repo,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Verify, parse and store a webhook delivery, returning the stored count
    pub async fn ingest(&self, body: &[u8], signature: Option<&str>) -> Result<usize, WebhookError> {
        if let Some(secret) = &self.secret {
            match signature {
                Some(sig) if verify(secret, body, sig) => {}
                _ => return Err(WebhookError::InvalidSignature),
            }
        }

        let events = parse_events(body)?;
        for event in &events {
            match event.event.as_str() {
                "bounce" | "dropped" | "spamreport" => tracing::warn!(
                    "Email {} for {}: {}",
                    event.event,
                    event.email,
                    event.reason.as_deref().unwrap_or("no reason given")
                ),
                _ => tracing::debug!("Email {} for {}", event.event, event.email),
            }
        }

        let stored = self
            .repo
            .insert_many(&events)
            .await
            .context("Failed to store email events")?;
        tracing::info!("Stored {} email event(s)", stored);
        Ok(stored)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<EmailEvent>, WebhookError> {
        Ok(self
            .repo
            .list_recent(limit.clamp(1, 500))
            .await
            .context("Failed to list email events")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_pool;
    use crate::db::repositories::SqlxEmailEventRepository;

    const BODY: &str = r#"[
        {"email":"Pat@Example.com","event":"delivered","timestamp":1700000000,"sg_message_id":"abc.1"},
        {"email":"bo@example.com","event":"bounce","timestamp":1700000100,"reason":"mailbox full","ip":"1.2.3.4"}
    ]"#;

    async fn service(secret: Option<&str>) -> WebhookService {
        let pool = setup_pool().await;
        WebhookService::new(
            SqlxEmailEventRepository::boxed(pool),
            secret.map(str::to_string),
        )
    }

    #[test]
    fn test_sign_matches_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_accepts_prefix_and_rejects_garbage() {
        let sig = sign("s3cret", b"[]");
        assert!(verify("s3cret", b"[]", &sig));
        assert!(verify("s3cret", b"[]", &format!("sha256={}", sig)));
        assert!(verify("s3cret", b"[]", &sig.to_uppercase()));
        assert!(!verify("other", b"[]", &sig));
        assert!(!verify("s3cret", b"[ ]", &sig));
        assert!(!verify("s3cret", b"[]", "zz"));
        assert!(!verify("s3cret", b"[]", "abc"));
    }

    #[test]
    fn test_parse_events() {
        let events = parse_events(BODY.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].email, "pat@example.com");
        assert_eq!(events[0].message_id.as_deref(), Some("abc.1"));
        assert_eq!(events[1].reason.as_deref(), Some("mailbox full"));
        assert_eq!(events[0].occurred_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for body in [
            "",
            "{}",
            "[]",
            r#"[{"email":"a@b.co","event":"open"}]"#,
            r#"[{"email":"","event":"open","timestamp":1}]"#,
            r#"[{"email":"a@b.co","event":"open","timestamp":"yesterday"}]"#,
        ] {
            assert!(
                matches!(parse_events(body.as_bytes()), Err(WebhookError::InvalidPayload(_))),
                "accepted {:?}",
                body
            );
        }
    }

    #[tokio::test]
    async fn test_ingest_without_secret_stores_events() {
        let service = service(None).await;
        assert_eq!(service.ingest(BODY.as_bytes(), None).await.unwrap(), 2);
        assert_eq!(service.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_with_secret_requires_signature() {
        let service = service(Some("s3cret")).await;

        assert!(matches!(
            service.ingest(BODY.as_bytes(), None).await,
            Err(WebhookError::InvalidSignature)
        ));
        assert!(matches!(
            service.ingest(BODY.as_bytes(), Some("deadbeef")).await,
            Err(WebhookError::InvalidSignature)
        ));

        let sig = sign("s3cret", BODY.as_bytes());
        assert_eq!(service.ingest(BODY.as_bytes(), Some(&sig)).await.unwrap(), 2);
    }
}
