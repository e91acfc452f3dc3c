//! User repository.
//!
//! Handles registration, lookup by id or email, and versioned updates
//! (activation, profile changes).

use super::versioned::{Versioned, VersionedStore, edit_conflict};
use super::DbError;
use crate::security::password::PasswordCredential;
use crate::validator::{EMAIL_RX, Validator, matches};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;

/// A registered user.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub created_at: i64,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password: PasswordCredential,
    pub activated: bool,
    pub version: i64,
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: PasswordCredential,
    pub activated: bool,
}

pub(crate) type UserRow = (i64, i64, String, String, String, bool, i64);

pub(crate) const USER_COLUMNS: &str =
    "users.id, users.created_at, users.name, users.email, users.password_hash, users.activated, users.version";

pub(crate) fn user_from_row(row: UserRow) -> User {
    let (id, created_at, name, email, password_hash, activated, version) = row;
    User {
        id,
        created_at,
        name,
        email,
        password: PasswordCredential::from_hash(password_hash),
        activated,
        version,
    }
}

impl Versioned for User {
    fn id(&self) -> i64 {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user. A taken email yields `DuplicateKey("email")`.
    pub async fn insert(&self, user: &NewUser) -> Result<User, DbError> {
        let now = chrono::Utc::now().timestamp();

        let (id, version) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            INSERT INTO users (created_at, name, email, password_hash, activated)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, version
            "#,
        )
        .bind(now)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.password.hash())
        .bind(user.activated)
        .fetch_one(self.pool)
        .await
        .map_err(DbError::unique_on("email"))?;

        Ok(User {
            id,
            created_at: now,
            name: user.name.clone(),
            email: user.email.clone(),
            password: user.password.clone(),
            activated: user.activated,
            version,
        })
    }

    /// Find a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<User, DbError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = ? COLLATE NOCASE",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(self.pool)
        .await?;

        row.map(user_from_row).ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl VersionedStore for UserRepository<'_> {
    type Entity = User;

    const KIND: &'static str = "user";

    async fn get(&self, id: i64) -> Result<User, DbError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(user_from_row).ok_or(DbError::NotFound)
    }

    async fn update(&self, user: &mut User) -> Result<i64, DbError> {
        let version = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE users
            SET name = ?, email = ?, password_hash = ?, activated = ?, version = version + 1
            WHERE id = ? AND version = ?
            RETURNING version
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.password.hash())
        .bind(user.activated)
        .bind(user.id)
        .bind(user.version)
        .fetch_optional(self.pool)
        .await
        .map_err(DbError::unique_on("email"))?
        .ok_or_else(|| edit_conflict(Self::KIND, user.id, user.version))?;

        user.version = version;
        Ok(version)
    }
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(matches(email, &EMAIL_RX), "email", "must be a valid email address");
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(password.len() <= 72, "password", "must not be more than 72 bytes long");
}

/// Validate registration input before anything is hashed or stored.
pub fn validate_user(v: &mut Validator, name: &str, email: &str, password: &str) {
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(name.len() <= 500, "name", "must not be more than 500 bytes long");
    validate_email(v, email);
    validate_password_plaintext(v, password);
}
