//! Account storage
//!
//! Emails arrive already normalized (trimmed, lowercased); the unique index
//! on `users.email` is what rejects a second signup.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{ListParams, User, UserRole, UserStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Write every mutable column back and return the stored row
    async fn update(&self, user: &User) -> Result<User>;

    async fn count_by_role(&self, role: UserRole) -> Result<i64>;

    /// One page of accounts, newest first, plus the overall count
    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)>;
}

pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }

    async fn find_one(&self, column: &str, value: UserKey<'_>) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?", ACCOUNT_FIELDS, column);
        let row: Option<AccountRow> = match (self.pool.backend(), value) {
            (Backend::Sqlite(p), UserKey::Id(id)) => {
                sqlx::query_as(&sql).bind(id).fetch_optional(p).await
            }
            (Backend::Sqlite(p), UserKey::Email(email)) => {
                sqlx::query_as(&sql).bind(email).fetch_optional(p).await
            }
            (Backend::Mysql(p), UserKey::Id(id)) => {
                sqlx::query_as(&sql).bind(id).fetch_optional(p).await
            }
            (Backend::Mysql(p), UserKey::Email(email)) => {
                sqlx::query_as(&sql).bind(email).fetch_optional(p).await
            }
        }
        .with_context(|| format!("Failed to load account by {}", column))?;

        row.map(into_user).transpose()
    }
}

#[derive(Clone, Copy)]
enum UserKey<'a> {
    Id(i64),
    Email(&'a str),
}

const ACCOUNT_FIELDS: &str = "id, email, password_hash, first_name, last_name, phone, role, \
                              is_admin, status, created_at, updated_at";

type AccountRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    bool,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn into_user(row: AccountRow) -> Result<User> {
    let (
        id,
        email,
        password_hash,
        first_name,
        last_name,
        phone,
        role,
        is_admin,
        status,
        created_at,
        updated_at,
    ) = row;
    let role = UserRole::from_str(&role)
        .with_context(|| format!("Unknown role {:?} on account {}", role, id))?;

    Ok(User {
        id,
        email,
        password_hash,
        first_name,
        last_name,
        phone,
        role,
        is_admin,
        status: UserStatus::from_str(&status).unwrap_or_default(),
        created_at,
        updated_at,
    })
}

const INSERT_ACCOUNT: &str = "INSERT INTO users \
    (email, password_hash, first_name, last_name, phone, role, is_admin, status, created_at, updated_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPDATE_ACCOUNT: &str = "UPDATE users SET email = ?, password_hash = ?, first_name = ?, \
    last_name = ?, phone = ?, role = ?, is_admin = ?, status = ?, updated_at = ? WHERE id = ?";

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let now = Utc::now();
        let role = user.role.to_string();
        let status = user.status.to_string();

        let id = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_ACCOUNT)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&user.first_name)
                .bind(&user.last_name)
                .bind(&user.phone)
                .bind(&role)
                .bind(user.is_admin)
                .bind(&status)
                .bind(now)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_rowid()),
            Backend::Mysql(p) => sqlx::query(INSERT_ACCOUNT)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&user.first_name)
                .bind(&user.last_name)
                .bind(&user.phone)
                .bind(&role)
                .bind(user.is_admin)
                .bind(&status)
                .bind(now)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .with_context(|| format!("Failed to insert account {}", user.email))?;

        Ok(User {
            id,
            created_at: now,
            updated_at: now,
            ..user.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        self.find_one("id", UserKey::Id(id)).await
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one("email", UserKey::Email(email)).await
    }

    async fn update(&self, user: &User) -> Result<User> {
        let role = user.role.to_string();
        let status = user.status.to_string();
        let written = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(UPDATE_ACCOUNT)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&user.first_name)
                .bind(&user.last_name)
                .bind(&user.phone)
                .bind(&role)
                .bind(user.is_admin)
                .bind(&status)
                .bind(Utc::now())
                .bind(user.id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(UPDATE_ACCOUNT)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&user.first_name)
                .bind(&user.last_name)
                .bind(&user.phone)
                .bind(&role)
                .bind(user.is_admin)
                .bind(&status)
                .bind(Utc::now())
                .bind(user.id)
                .execute(p)
                .await
                .map(|_| ()),
        };
        written.with_context(|| format!("Failed to update account {}", user.id))?;

        self.get_by_id(user.id)
            .await?
            .with_context(|| format!("Account {} vanished during update", user.id))
    }

    async fn count_by_role(&self, role: UserRole) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM users WHERE role = ?";
        let count = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_scalar(sql).bind(role.to_string()).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_scalar(sql).bind(role.to_string()).fetch_one(p).await,
        }
        .context("Failed to count users by role")?;
        Ok(count)
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<User>, i64)> {
        let page_sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            ACCOUNT_FIELDS
        );
        let count_sql = "SELECT COUNT(*) FROM users";

        let (rows, total): (Vec<AccountRow>, i64) = match self.pool.backend() {
            Backend::Sqlite(p) => (
                sqlx::query_as(&page_sql)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(p)
                    .await
                    .context("Failed to page accounts")?,
                sqlx::query_scalar(count_sql)
                    .fetch_one(p)
                    .await
                    .context("Failed to count accounts")?,
            ),
            Backend::Mysql(p) => (
                sqlx::query_as(&page_sql)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(p)
                    .await
                    .context("Failed to page accounts")?,
                sqlx::query_scalar(count_sql)
                    .fetch_one(p)
                    .await
                    .context("Failed to count accounts")?,
            ),
        };

        let users = rows.into_iter().map(into_user).collect::<Result<Vec<_>>>()?;
        Ok((users, total))
    }
}
