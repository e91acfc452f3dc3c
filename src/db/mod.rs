//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for:
//! - Users (registration, activation, credential lookup)
//! - Movies (the versioned catalogue resource)
//! - Scoped, hashed, expiring tokens
//! - Permission grants per user
//!
//! Every store error is classified into [`DbError`] here, at the point of
//! origin, so callers match on the kind rather than on SQLx internals.

mod filters;
mod movies;
mod permissions;
mod tokens;
mod users;
mod versioned;

pub use filters::{Filters, Metadata, validate_filters};
pub use movies::{
    Movie, MovieRepository, MovieUpdate, NewMovie, Runtime, RuntimeFormatError,
    MOVIE_SORT_SAFELIST, validate_movie,
};
pub use permissions::{MOVIES_READ, MOVIES_WRITE, PermissionRepository, Permissions};
pub use tokens::{IssuedToken, Scope, TOKEN_PLAINTEXT_LEN, TokenRepository, UnknownScope, validate_token_plaintext};
pub use users::{NewUser, User, UserRepository, validate_email, validate_password_plaintext, validate_user};
pub use versioned::{Versioned, VersionedStore, check_expected_version, update_versioned};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity, token or token/scope combination absent or expired.
    #[error("record not found")]
    NotFound,
    /// The conditional write found a newer version than the caller's.
    #[error("edit conflict")]
    EditConflict,
    /// A unique constraint rejected the write; carries the field name.
    #[error("duplicate value for {0}")]
    DuplicateKey(&'static str),
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Map a unique constraint violation on `field` to [`DbError::DuplicateKey`].
    pub(crate) fn unique_on(field: &'static str) -> impl FnOnce(sqlx::Error) -> DbError {
        move |e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return DbError::DuplicateKey(field);
            }
            DbError::from(e)
        }
    }
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // Uniquely named shared-cache memory database per call so that
            // parallel tests never see each other's rows.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:greenlight-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .foreign_keys(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .foreign_keys(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        // WAL lets token lookups proceed while a versioned write is in flight.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        let integrity_result: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&pool)
            .await?;

        if integrity_result != "ok" {
            tracing::error!(
                integrity_check = %integrity_result,
                "Database integrity check FAILED - corruption detected!"
            );
            return Err(DbError::Internal(format!(
                "database integrity check failed: {}",
                integrity_result
            )));
        }

        info!("Database integrity check passed");

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(DbError::Migration)?;

        info!("Database migrations checked/applied");
        Ok(())
    }

    /// Get user repository.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Get movie repository.
    pub fn movies(&self) -> MovieRepository<'_> {
        MovieRepository::new(&self.pool)
    }

    /// Get token repository.
    pub fn tokens(&self) -> TokenRepository<'_> {
        TokenRepository::new(&self.pool)
    }

    /// Get permission repository.
    pub fn permissions(&self) -> PermissionRepository<'_> {
        PermissionRepository::new(&self.pool)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            other => DbError::Sqlx(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err)
    }
}
