//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_environment() -> String {
    "development".to_string()
}

pub fn default_metrics_port() -> u16 {
    4001
}

pub fn default_database_path() -> String {
    "greenlight.db".to_string()
}

// =============================================================================
// Token Defaults
// =============================================================================

pub fn default_activation_ttl_hours() -> i64 {
    72
}

pub fn default_authentication_ttl_hours() -> i64 {
    24
}

pub fn default_prune_interval_secs() -> u64 {
    3600
}

// =============================================================================
// SMTP / Notification Defaults
// =============================================================================

pub fn default_smtp_port() -> u16 {
    25
}

pub fn default_smtp_timeout_secs() -> u64 {
    5
}

pub fn default_delivery_attempts() -> u32 {
    3
}

pub fn default_retry_delay_ms() -> u64 {
    500
}

// =============================================================================
// Shutdown / Logging Defaults
// =============================================================================

pub fn default_drain_timeout_secs() -> u64 {
    5
}

pub fn default_log_level() -> String {
    "info".to_string()
}
