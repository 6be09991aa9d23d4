//! Session token store
//!
//! Every statement here is portable between SQLite and MySQL, so each
//! method binds the same SQL against whichever backend the pool holds.

use crate::db::{Backend, DynDatabasePool};
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<Session>;

    /// Look a token up, expired or not
    async fn find(&self, token: &str) -> Result<Option<Session>>;

    async fn revoke(&self, token: &str) -> Result<()>;

    /// Drop every token held by a user, returning how many went
    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64>;

    /// Drop tokens that expired at or before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

type SessionRow = (String, i64, DateTime<Utc>, DateTime<Utc>);

const INSERT_SQL: &str =
    "INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)";
const FIND_SQL: &str = "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?";
const REVOKE_SQL: &str = "DELETE FROM sessions WHERE id = ?";
const REVOKE_USER_SQL: &str = "DELETE FROM sessions WHERE user_id = ?";
const PURGE_SQL: &str = "DELETE FROM sessions WHERE expires_at <= ?";

fn into_session((id, user_id, expires_at, created_at): SessionRow) -> Session {
    Session {
        id,
        user_id,
        expires_at,
        created_at,
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn insert(&self, session: &Session) -> Result<Session> {
        let stored = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_SQL)
                .bind(&session.id)
                .bind(session.user_id)
                .bind(session.expires_at)
                .bind(session.created_at)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(INSERT_SQL)
                .bind(&session.id)
                .bind(session.user_id)
                .bind(session.expires_at)
                .bind(session.created_at)
                .execute(p)
                .await
                .map(|_| ()),
        };
        stored.with_context(|| format!("Failed to store session for user {}", session.user_id))?;

        Ok(session.clone())
    }

    async fn find(&self, token: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(FIND_SQL).bind(token).fetch_optional(p).await,
            Backend::Mysql(p) => sqlx::query_as(FIND_SQL).bind(token).fetch_optional(p).await,
        }
        .context("Failed to look up session token")?;

        Ok(row.map(into_session))
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let done = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(REVOKE_SQL).bind(token).execute(p).await.map(|_| ()),
            Backend::Mysql(p) => sqlx::query(REVOKE_SQL).bind(token).execute(p).await.map(|_| ()),
        };
        done.context("Failed to revoke session")
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64> {
        let revoked = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(REVOKE_USER_SQL)
                .bind(user_id)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
            Backend::Mysql(p) => sqlx::query(REVOKE_USER_SQL)
                .bind(user_id)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
        };
        revoked.with_context(|| format!("Failed to revoke sessions of user {}", user_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(PURGE_SQL)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
            Backend::Mysql(p) => sqlx::query(PURGE_SQL)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
        };
        purged.context("Failed to purge expired sessions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_user, setup_pool};
    use chrono::Duration;

    /// Store plus one guardian ID per entry in `emails`
    async fn store_with_guardians(emails: &[&str]) -> (SqlxSessionRepository, Vec<i64>) {
        let pool = setup_pool().await;
        let mut ids = Vec::new();
        for email in emails {
            ids.push(seed_user(&pool, email).await);
        }
        (SqlxSessionRepository::new(pool), ids)
    }

    #[tokio::test]
    async fn test_insert_find_revoke() {
        let (store, ids) = store_with_guardians(&["pat@example.com"]).await;
        let session = Session::issue(ids[0], Duration::days(7));
        store.insert(&session).await.unwrap();

        let found = store.find(&session.id).await.unwrap().unwrap();
        assert_eq!(found.user_id, ids[0]);
        assert_eq!(found.expires_at.timestamp(), session.expires_at.timestamp());

        store.revoke(&session.id).await.unwrap();
        assert!(store.find(&session.id).await.unwrap().is_none());
        assert!(store.find("never-issued").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user_leaves_others() {
        let (store, ids) = store_with_guardians(&["pat@example.com", "sam@example.com"]).await;
        let mine = [
            Session::issue(ids[0], Duration::days(7)),
            Session::issue(ids[0], Duration::days(7)),
        ];
        let theirs = Session::issue(ids[1], Duration::days(7));
        for s in mine.iter().chain(std::iter::once(&theirs)) {
            store.insert(s).await.unwrap();
        }

        assert_eq!(store.revoke_all_for_user(ids[0]).await.unwrap(), 2);
        for s in &mine {
            assert!(store.find(&s.id).await.unwrap().is_none());
        }
        assert!(store.find(&theirs.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, ids) = store_with_guardians(&["pat@example.com"]).await;
        let stale = Session::issue(ids[0], Duration::days(-1));
        let live = Session::issue(ids[0], Duration::days(7));
        store.insert(&stale).await.unwrap();
        store.insert(&live).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.find(&stale.id).await.unwrap().is_none());
        assert!(store.find(&live.id).await.unwrap().is_some());
    }
}
