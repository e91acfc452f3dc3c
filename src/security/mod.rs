//! Credential handling.
//!
//! - **Passwords**: Argon2id hashing with constant-shape verification for
//!   unknown accounts

pub mod password;

pub use password::{PasswordCredential, dummy_verify};
