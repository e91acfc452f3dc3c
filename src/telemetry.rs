//! Telemetry utilities: subscriber setup, flow timing and span constructors.

use crate::config::{LogFormat, LoggingConfig};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless;
/// the second install is ignored.
pub fn init(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let result = match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Guard for timing a request flow and recording metrics.
///
/// Records latency when dropped; call [`FlowTimer::fail`] first to label
/// the error.
pub struct FlowTimer {
    flow: &'static str,
    start: Instant,
    error: Option<&'static str>,
}

impl FlowTimer {
    /// Start timing a flow.
    pub fn new(flow: &'static str) -> Self {
        Self {
            flow,
            start: Instant::now(),
            error: None,
        }
    }

    pub fn fail(&mut self, code: &'static str) {
        self.error = Some(code);
    }

    /// Pass a result through, labelling it if it is an error.
    pub fn observe<T>(mut self, result: crate::error::AppResult<T>) -> crate::error::AppResult<T> {
        if let Err(ref e) = result {
            self.fail(e.error_code());
        }
        result
    }
}

impl Drop for FlowTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_flow(self.flow, duration, self.error);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for one request flow.
    pub fn flow(name: &'static str) -> Span {
        info_span!("flow", name = name)
    }

    /// Span for a detached task.
    pub fn background(name: &'static str) -> Span {
        info_span!("background", task = name)
    }

    /// Span for one notification delivery.
    pub fn notification(template: &str, recipient: &str) -> Span {
        info_span!("notification", template = %template, recipient = %recipient)
    }
}
