//! greenlight - trust and consistency core for the movie catalogue API.
//!
//! Scoped, hashed, expiring tokens; per-user permission grants; versioned
//! resources updated under optimistic concurrency; and a detached, retrying
//! notification dispatcher for activation emails.

pub mod app;
pub mod background;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod mailer;
pub mod metrics;
pub mod security;
pub mod services;
pub mod telemetry;
pub mod validator;

pub use app::App;
pub use error::{AppError, AppResult};
