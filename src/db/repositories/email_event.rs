//! Email event repository
//!
//! Stores delivery events received from the email provider webhook.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{EmailEvent, NewEmailEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

/// Email event repository trait
#[async_trait]
pub trait EmailEventRepository: Send + Sync {
    /// Store a batch of events, returning how many were written
    async fn insert_many(&self, events: &[NewEmailEvent]) -> Result<usize>;

    /// Most recent events first
    async fn list_recent(&self, limit: i64) -> Result<Vec<EmailEvent>>;
}

/// SQLx-based email event repository implementation
pub struct SqlxEmailEventRepository {
    pool: DynDatabasePool,
}

impl SqlxEmailEventRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn EmailEventRepository> {
        Arc::new(Self::new(pool))
    }
}

const INSERT_EVENT: &str = r#"
    INSERT INTO email_events (email, event, message_id, reason, occurred_at, received_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const SELECT_RECENT: &str = r#"
    SELECT id, email, event, message_id, reason, occurred_at, received_at
    FROM email_events
    ORDER BY received_at DESC, id DESC
    LIMIT ?
"#;

#[async_trait]
impl EmailEventRepository for SqlxEmailEventRepository {
    async fn insert_many(&self, events: &[NewEmailEvent]) -> Result<usize> {
        let received_at = Utc::now();
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let mut tx = p.begin().await.context("Failed to begin transaction")?;
                for event in events {
                    sqlx::query(INSERT_EVENT)
                        .bind(&event.email)
                        .bind(&event.event)
                        .bind(&event.message_id)
                        .bind(&event.reason)
                        .bind(event.occurred_at)
                        .bind(received_at)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to store email event")?;
                }
                tx.commit().await.context("Failed to commit email events")?;
            }
            Backend::Mysql(p) => {
                let mut tx = p.begin().await.context("Failed to begin transaction")?;
                for event in events {
                    sqlx::query(INSERT_EVENT)
                        .bind(&event.email)
                        .bind(&event.event)
                        .bind(&event.message_id)
                        .bind(&event.reason)
                        .bind(event.occurred_at)
                        .bind(received_at)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to store email event")?;
                }
                tx.commit().await.context("Failed to commit email events")?;
            }
        }
        Ok(events.len())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<EmailEvent>> {
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let rows = sqlx::query(SELECT_RECENT)
                    .bind(limit)
                    .fetch_all(p)
                    .await
                    .context("Failed to list email events")?;
                Ok(rows
                    .iter()
                    .map(|row| EmailEvent {
                        id: row.get("id"),
                        email: row.get("email"),
                        event: row.get("event"),
                        message_id: row.get("message_id"),
                        reason: row.get("reason"),
                        occurred_at: row.get("occurred_at"),
                        received_at: row.get("received_at"),
                    })
                    .collect())
            }
            Backend::Mysql(p) => {
                let rows = sqlx::query(SELECT_RECENT)
                    .bind(limit)
                    .fetch_all(p)
                    .await
                    .context("Failed to list email events")?;
                Ok(rows
                    .iter()
                    .map(|row| EmailEvent {
                        id: row.get("id"),
                        email: row.get("email"),
                        event: row.get("event"),
                        message_id: row.get("message_id"),
                        reason: row.get("reason"),
                        occurred_at: row.get("occurred_at"),
                        received_at: row.get("received_at"),
                    })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_pool;
    use chrono::Duration;

    fn event(email: &str, kind: &str) -> NewEmailEvent {
        NewEmailEvent {
            email: email.to_string(),
            event: kind.to_string(),
            message_id: Some("msg-1".to_string()),
            reason: None,
            occurred_at: Utc::now() - Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn test_insert_and_list_events() {
        let pool = setup_pool().await;
        let repo = SqlxEmailEventRepository::new(pool);

        let stored = repo
            .insert_many(&[
                event("a@example.com", "delivered"),
                event("b@example.com", "bounce"),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().any(|e| e.event == "bounce" && e.email == "b@example.com"));

        assert_eq!(repo.list_recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_empty_batch() {
        let pool = setup_pool().await;
        let repo = SqlxEmailEventRepository::new(pool);
        assert_eq!(repo.insert_many(&[]).await.unwrap(), 0);
    }
}
