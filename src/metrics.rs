//! Prometheus metrics collection for greenlight.
//!
//! Metrics are registered once by [`init`]; until then every recorder is a
//! no-op, so library users and tests pay nothing.
//!
//! - `greenlight_tokens_issued_total{scope}` - tokens minted
//! - `greenlight_token_lookups_total{scope,outcome}` - verifications
//! - `greenlight_edit_conflicts_total{entity}` - lost version races
//! - `greenlight_notifications_total{outcome}` - notification results
//! - `greenlight_background_tasks` - detached tasks in flight
//! - `greenlight_flow_duration_seconds{flow}` - request flow latency

use crate::db::Scope;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Tokens minted by scope.
pub static TOKENS_ISSUED: OnceLock<IntCounterVec> = OnceLock::new();

/// Token verifications by scope and outcome.
pub static TOKEN_LOOKUPS: OnceLock<IntCounterVec> = OnceLock::new();

/// Conditional writes that found a newer version.
pub static EDIT_CONFLICTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Notification results (delivered, failed, template_error).
pub static NOTIFICATIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Individual delivery attempts, including retries.
pub static DELIVERY_ATTEMPTS: OnceLock<IntCounter> = OnceLock::new();

/// Panics recovered inside detached tasks.
pub static BACKGROUND_PANICS: OnceLock<IntCounter> = OnceLock::new();

/// Request flow errors by flow and error code.
pub static FLOW_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges and histograms
// ========================================================================

/// Detached tasks currently registered with a task barrier.
pub static BACKGROUND_TASKS: OnceLock<IntGauge> = OnceLock::new();

/// Request flow latency.
pub static FLOW_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Call once at startup; later calls keep the first registration.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                let m = $init.expect(concat!(stringify!($metric), " creation failed"));
                if let Err(e) = r.register(Box::new(m.clone())) {
                    tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                }
                let _ = $metric.set(m);
            }
        };
    }

    register!(TOKENS_ISSUED, IntCounterVec::new(Opts::new("greenlight_tokens_issued_total", "Tokens issued by scope"), &["scope"]));
    register!(TOKEN_LOOKUPS, IntCounterVec::new(Opts::new("greenlight_token_lookups_total", "Token verifications by scope and outcome"), &["scope", "outcome"]));
    register!(EDIT_CONFLICTS, IntCounterVec::new(Opts::new("greenlight_edit_conflicts_total", "Versioned updates that lost the race"), &["entity"]));
    register!(NOTIFICATIONS, IntCounterVec::new(Opts::new("greenlight_notifications_total", "Notification results"), &["outcome"]));
    register!(DELIVERY_ATTEMPTS, IntCounter::new("greenlight_delivery_attempts_total", "Notification delivery attempts"));
    register!(BACKGROUND_PANICS, IntCounter::new("greenlight_background_panics_total", "Panics recovered in detached tasks"));
    register!(FLOW_ERRORS, IntCounterVec::new(Opts::new("greenlight_flow_errors_total", "Request flow errors"), &["flow", "error"]));
    register!(BACKGROUND_TASKS, IntGauge::new("greenlight_background_tasks", "Detached tasks in flight"));
    register!(FLOW_LATENCY, HistogramVec::new(
        HistogramOpts::new("greenlight_flow_duration_seconds", "Request flow latency")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["flow"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recorders
// ============================================================================

pub fn record_token_issued(scope: Scope) {
    if let Some(m) = TOKENS_ISSUED.get() {
        m.with_label_values(&[scope.as_str()]).inc();
    }
}

pub fn record_token_lookup(scope: Scope, found: bool) {
    if let Some(m) = TOKEN_LOOKUPS.get() {
        let outcome = if found { "valid" } else { "rejected" };
        m.with_label_values(&[scope.as_str(), outcome]).inc();
    }
}

pub fn record_edit_conflict(entity: &str) {
    if let Some(m) = EDIT_CONFLICTS.get() {
        m.with_label_values(&[entity]).inc();
    }
}

pub fn record_notification(outcome: &str) {
    if let Some(m) = NOTIFICATIONS.get() {
        m.with_label_values(&[outcome]).inc();
    }
}

pub fn record_delivery_attempt() {
    if let Some(m) = DELIVERY_ATTEMPTS.get() {
        m.inc();
    }
}

pub fn record_background_panic() {
    if let Some(m) = BACKGROUND_PANICS.get() {
        m.inc();
    }
}

pub fn background_task_started() {
    if let Some(m) = BACKGROUND_TASKS.get() {
        m.inc();
    }
}

pub fn background_task_finished() {
    if let Some(m) = BACKGROUND_TASKS.get() {
        m.dec();
    }
}

/// Record latency, and the error code if the flow failed.
pub fn record_flow(flow: &str, duration: f64, error: Option<&str>) {
    if let Some(m) = FLOW_LATENCY.get() {
        m.with_label_values(&[flow]).observe(duration);
    }
    if let Some(code) = error
        && let Some(m) = FLOW_ERRORS.get()
    {
        m.with_label_values(&[flow, code]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_show_up_after_init() {
        init();
        init();
        record_token_issued(Scope::Activation);
        record_edit_conflict("movie");
        record_flow("register_user", 0.01, Some("validation"));

        let text = gather_metrics();
        assert!(text.contains("greenlight_tokens_issued_total"));
        assert!(text.contains("greenlight_edit_conflicts_total{entity=\"movie\"}"));
        assert!(text.contains("greenlight_flow_errors_total"));
    }
}
