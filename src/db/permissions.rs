//! Permission grants.
//!
//! Stores which capability codes a user holds. Deciding whether a code is
//! sufficient for an action is left to the caller.

use super::DbError;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeSet;

/// Read access to the movie catalogue.
pub const MOVIES_READ: &str = "movies:read";

/// Write access to the movie catalogue.
pub const MOVIES_WRITE: &str = "movies:write";

/// The set of capability codes granted to one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for Permissions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Repository for permission operations.
pub struct PermissionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PermissionRepository<'a> {
    /// Create a new permission repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Grant `codes` to `user_id`. Re-granting a held code is a no-op.
    ///
    /// All codes are granted in one transaction.
    pub async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        for code in codes {
            sqlx::query("INSERT OR IGNORE INTO permissions (code) VALUES (?)")
                .bind(*code)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO users_permissions (user_id, permission_id)
                SELECT ?, id FROM permissions WHERE code = ?
                "#,
            )
            .bind(user_id)
            .bind(*code)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_foreign_key_violation()
                {
                    return DbError::NotFound;
                }
                DbError::from(e)
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Every code granted to `user_id`.
    pub async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, DbError> {
        let codes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT permissions.code
            FROM permissions
            INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
            WHERE users_permissions.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(codes.into_iter().collect())
    }
}
