//! Token repository.
//!
//! Tokens are random, scoped and expiring. The plaintext is handed to the
//! caller once; only its SHA-256 digest is stored. The plaintext is already
//! high-entropy and single-purpose, so the digest is unsalted and can serve
//! as the lookup key.

use super::users::{USER_COLUMNS, User, UserRow, user_from_row};
use super::DbError;
use crate::validator::Validator;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Random bytes behind every token.
const TOKEN_BYTES: usize = 32;

/// Length of the encoded plaintext.
pub const TOKEN_PLAINTEXT_LEN: usize = 43;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Activation,
    Authentication,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown token scope: {0}")]
pub struct UnknownScope(pub String);

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(Scope::Activation),
            "authentication" => Ok(Scope::Authentication),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

/// A freshly minted token. The plaintext cannot be recovered later.
#[derive(Clone, Serialize)]
pub struct IssuedToken {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: Scope,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("plaintext", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish()
    }
}

fn generate_plaintext() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic lookup key for a plaintext.
pub(crate) fn token_digest(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// Repository for token operations.
pub struct TokenRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TokenRepository<'a> {
    /// Create a new token repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Mint a token for `user_id` valid for `ttl` under `scope`.
    pub async fn issue(&self, user_id: i64, ttl: TimeDelta, scope: Scope) -> Result<IssuedToken, DbError> {
        let plaintext = generate_plaintext();
        let expiry = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| DbError::Internal(format!("token lifetime {ttl} overflows the clock")))?;

        sqlx::query("INSERT INTO tokens (hash, user_id, expiry, scope) VALUES (?, ?, ?, ?)")
            .bind(token_digest(&plaintext))
            .bind(user_id)
            .bind(expiry.timestamp())
            .bind(scope.as_str())
            .execute(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_foreign_key_violation()
                {
                    return DbError::NotFound;
                }
                DbError::unique_on("token")(e)
            })?;

        crate::metrics::record_token_issued(scope);
        tracing::debug!(user_id, scope = %scope, expiry = %expiry, "Token issued");

        Ok(IssuedToken {
            plaintext,
            user_id,
            expiry,
            scope,
        })
    }

    /// The user owning a live token of `scope` with this plaintext.
    ///
    /// Wrong plaintext, wrong scope and expiry all yield
    /// [`DbError::NotFound`] so callers cannot tell them apart.
    pub async fn get_for_token(&self, scope: Scope, plaintext: &str) -> Result<User, DbError> {
        let now = Utc::now().timestamp();

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {}
            FROM users
            INNER JOIN tokens ON users.id = tokens.user_id
            WHERE tokens.hash = ? AND tokens.scope = ? AND tokens.expiry > ?
            "#,
            USER_COLUMNS
        ))
        .bind(token_digest(plaintext))
        .bind(scope.as_str())
        .bind(now)
        .fetch_optional(self.pool)
        .await?;

        crate::metrics::record_token_lookup(scope, row.is_some());
        row.map(user_from_row).ok_or(DbError::NotFound)
    }

    /// Remove every token of `scope` held by `user_id`.
    pub async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM tokens WHERE scope = ? AND user_id = ?")
            .bind(scope.as_str())
            .bind(user_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Remove tokens whose expiry has passed, whatever their scope.
    pub async fn delete_expired(&self) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expiry <= ?")
            .bind(Utc::now().timestamp())
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(
        plaintext.len() == TOKEN_PLAINTEXT_LEN,
        "token",
        "must be 43 bytes long",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewUser};
    use crate::security::password::PasswordCredential;

    async fn setup() -> (Database, i64) {
        let db = Database::new(":memory:").await.unwrap();
        let user = db
            .users()
            .insert(&NewUser {
                name: "Alice".to_string(),
                email: "a@example.com".to_string(),
                password: PasswordCredential::from_hash("$argon2id$placeholder"),
                activated: false,
            })
            .await
            .unwrap();
        (db, user.id)
    }

    #[tokio::test]
    async fn test_issue_then_lookup_round_trip() {
        let (db, user_id) = setup().await;
        let token = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Activation).await.unwrap();
        assert_eq!(token.plaintext.len(), TOKEN_PLAINTEXT_LEN);

        let user = db.tokens().get_for_token(Scope::Activation, &token.plaintext).await.unwrap();
        assert_eq!(user.id, user_id);
    }

    #[tokio::test]
    async fn test_issued_token_serializes_plaintext_and_expiry() {
        let (db, user_id) = setup().await;
        let token = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Authentication).await.unwrap();

        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["token"], token.plaintext.as_str());
        assert_eq!(json["expiry"], serde_json::to_value(token.expiry).unwrap());
        assert!(json.get("user_id").is_none());
        assert!(json.get("scope").is_none());
    }

    #[tokio::test]
    async fn test_unrepresentable_expiry_is_an_error() {
        let (db, user_id) = setup().await;
        let err = db
            .tokens()
            .issue(user_id, TimeDelta::MAX, Scope::Activation)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Internal(_)));
        assert_eq!(db.tokens().delete_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_plaintext_is_not_found() {
        let (db, _) = setup().await;
        let err = db
            .tokens()
            .get_for_token(Scope::Authentication, "garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let (db, user_id) = setup().await;
        for ttl in [TimeDelta::zero(), TimeDelta::seconds(-60)] {
            let token = db.tokens().issue(user_id, ttl, Scope::Authentication).await.unwrap();
            let err = db
                .tokens()
                .get_for_token(Scope::Authentication, &token.plaintext)
                .await
                .unwrap_err();
            assert!(matches!(err, DbError::NotFound));
        }
    }

    #[tokio::test]
    async fn test_wrong_scope_is_rejected() {
        let (db, user_id) = setup().await;
        let token = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Activation).await.unwrap();
        let err = db
            .tokens()
            .get_for_token(Scope::Authentication, &token.plaintext)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_all_for_user_only_touches_scope() {
        let (db, user_id) = setup().await;
        let first = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Activation).await.unwrap();
        let second = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Activation).await.unwrap();
        let auth = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Authentication).await.unwrap();

        let removed = db.tokens().delete_all_for_user(Scope::Activation, user_id).await.unwrap();
        assert_eq!(removed, 2);

        for token in [&first, &second] {
            assert!(matches!(
                db.tokens().get_for_token(Scope::Activation, &token.plaintext).await,
                Err(DbError::NotFound)
            ));
        }
        assert!(db.tokens().get_for_token(Scope::Authentication, &auth.plaintext).await.is_ok());
    }

    #[tokio::test]
    async fn test_only_digest_is_persisted() {
        let (db, user_id) = setup().await;
        let token = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Activation).await.unwrap();

        let stored: Vec<u8> = sqlx::query_scalar("SELECT hash FROM tokens")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(stored.len(), 32);
        assert_eq!(stored, token_digest(&token.plaintext));
        assert_ne!(stored, token.plaintext.as_bytes());
    }

    #[tokio::test]
    async fn test_issue_for_missing_user() {
        let (db, _) = setup().await;
        let err = db.tokens().issue(999, TimeDelta::hours(1), Scope::Activation).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (db, user_id) = setup().await;
        db.tokens().issue(user_id, TimeDelta::seconds(-1), Scope::Activation).await.unwrap();
        let live = db.tokens().issue(user_id, TimeDelta::hours(1), Scope::Activation).await.unwrap();

        assert_eq!(db.tokens().delete_expired().await.unwrap(), 1);
        assert!(db.tokens().get_for_token(Scope::Activation, &live.plaintext).await.is_ok());
    }

    #[test]
    fn test_scope_parsing_rejects_unknown() {
        assert_eq!("activation".parse::<Scope>(), Ok(Scope::Activation));
        assert_eq!("authentication".parse::<Scope>(), Ok(Scope::Authentication));
        assert_eq!(
            "admin".parse::<Scope>(),
            Err(UnknownScope("admin".to_string()))
        );
    }

    #[test]
    fn test_plaintexts_are_unique() {
        assert_ne!(generate_plaintext(), generate_plaintext());
    }

    #[test]
    fn test_debug_hides_plaintext() {
        let token = IssuedToken {
            plaintext: "Y3dHS1ZpbHdNT3N6c1RtUHJ6cExXVVR0UmlnVVlSbVY".to_string(),
            user_id: 1,
            expiry: Utc::now(),
            scope: Scope::Activation,
        };
        assert!(!format!("{:?}", token).contains("Y3dH"));
    }

    #[test]
    fn test_validate_token_plaintext() {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, "");
        assert_eq!(
            v.errors().get("token"),
            ["must be provided", "must be 43 bytes long"]
        );

        let mut v = Validator::new();
        validate_token_plaintext(&mut v, &generate_plaintext());
        assert!(v.valid());
    }
}
