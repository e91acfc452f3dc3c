//! Request flows.
//!
//! Each flow validates its input, talks to the store and, where needed,
//! schedules notifications. Flows are timed and their failures counted by
//! [`crate::telemetry::FlowTimer`]; an external layer (HTTP handlers, a CLI)
//! maps the returned [`crate::error::AppError`] to its own responses.

pub mod accounts;
pub mod catalog;

pub use accounts::{AccountService, RegisterUser, require_activated};
pub use catalog::CatalogService;
