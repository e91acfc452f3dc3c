//! Password hashing and verification utilities.
//!
//! Centralizes Argon2 password handling for user credentials. Only the PHC
//! hash string is ever held beyond the call that received the plaintext.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use std::fmt;

/// Pre-computed Argon2id hash that never matches a real password.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$dGltaW5nLW9yYWNsZS1kdW1teQ$K4VZh8k8YL3E8H7E8H7E8H7E8H7E8H7E8H7E8H7E8Hg";

/// One-way credential derived from a user's password.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordCredential {
    hash: String,
}

impl PasswordCredential {
    /// Hash `plaintext` with a fresh salt.
    pub fn from_plaintext(plaintext: &str) -> Result<Self, argon2::password_hash::Error> {
        hash_password(plaintext).map(|hash| Self { hash })
    }

    /// Wrap a stored PHC hash string.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether `plaintext` matches. A malformed stored hash never matches.
    pub fn matches(&self, plaintext: &str) -> bool {
        match PasswordHash::new(&self.hash) {
            Ok(parsed) => verify_password(plaintext, &parsed).unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                false
            }
        }
    }
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordCredential(<redacted>)")
    }
}

/// Verify a password against a stored Argon2 hash.
pub fn verify_password(
    password: &str,
    hash: &PasswordHash<'_>,
) -> Result<bool, argon2::password_hash::Error> {
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), hash)
        .is_ok())
}

/// Hash a password using default Argon2 settings.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    Ok(argon2
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Burn roughly one verification's worth of CPU so that a lookup for an
/// unknown account takes as long as a wrong password.
pub fn dummy_verify(password: &str) {
    if let Ok(parsed) = PasswordHash::new(DUMMY_HASH) {
        let _ = verify_password(password, &parsed);
    }
}
