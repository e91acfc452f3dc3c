//! Notification dispatch.
//!
//! [`Mailer::send`] renders an [`EmailTemplate`] and hands it to a
//! [`Transport`], retrying failed attempts with a fixed delay between them.
//! [`Mailer::dispatch`] does the same on a [`TaskBarrier`] so the caller
//! returns immediately; failures there are logged and counted, never
//! surfaced.

mod message;
mod smtp;
mod template;
mod transport;

pub use message::Email;
pub use smtp::SmtpTransport;
pub use template::{EmailTemplate, RenderedEmail, TokenActivation, UserWelcome};
pub use transport::{LogTransport, MemoryTransport, Transport, TransportError};

use crate::background::TaskBarrier;
use crate::config::{Config, NotificationConfig};
use crate::telemetry::spans;
use backon::{ConstantBuilder, Retryable};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, warn};

/// Sender used when neither `[smtp]` nor a fallback sender is configured.
pub const DEFAULT_SENDER: &str = "Greenlight <no-reply@greenlight.local>";

#[derive(Debug, Error)]
pub enum MailError {
    /// Rendering failed. Deterministic, so never retried.
    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),
    #[error("delivery failed after {attempts} attempts: {last}")]
    Delivery {
        attempts: u32,
        #[source]
        last: TransportError,
    },
}

/// How many times to try a delivery and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// A message to send later. Owns all of its data.
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: String,
    pub message: Arc<dyn EmailTemplate>,
}

impl Notification {
    pub fn new(recipient: impl Into<String>, message: impl EmailTemplate + 'static) -> Self {
        Self {
            recipient: recipient.into(),
            message: Arc::new(message),
        }
    }
}

#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn Transport>,
    sender: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("sender", &self.sender)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Mailer {
    pub fn new(transport: Arc<dyn Transport>, sender: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            sender: sender.into(),
            retry,
        }
    }

    /// SMTP when `[smtp]` is present, otherwise log-only delivery.
    pub fn from_config(config: &Config) -> Self {
        let retry = RetryPolicy::from_config(&config.notifications);
        match &config.smtp {
            Some(smtp) => Self::new(Arc::new(SmtpTransport::from_config(smtp)), smtp.sender.clone(), retry),
            None => {
                let sender = config
                    .notifications
                    .fallback_sender
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SENDER.to_string());
                Self::new(Arc::new(LogTransport), sender, retry)
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Render `message` and deliver it to `recipient`.
    ///
    /// Returns after the first successful attempt, or with the last
    /// transport error once every attempt has failed.
    pub async fn send(&self, recipient: &str, message: &dyn EmailTemplate) -> Result<(), MailError> {
        let rendered = match message.render() {
            Ok(r) => r,
            Err(e) => {
                crate::metrics::record_notification("template_error");
                return Err(e.into());
            }
        };
        let email = Email::new(self.sender.as_str(), recipient, rendered);

        // backon counts retries, not attempts.
        let attempts = self.retry.attempts.max(1);
        let backoff = ConstantBuilder::default()
            .with_delay(self.retry.delay)
            .with_max_times(attempts.saturating_sub(1) as usize);

        let transport = &self.transport;
        let email = &email;
        let mut failed = 0u32;

        let outcome = (|| async move {
            crate::metrics::record_delivery_attempt();
            transport.deliver(email).await
        })
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .notify(|e: &TransportError, delay: Duration| {
            failed += 1;
            warn!(
                attempt = failed,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Email delivery failed, retrying"
            );
        })
        .await;

        match outcome {
            Ok(()) => {
                crate::metrics::record_notification("delivered");
                debug!(attempt = failed + 1, "Email delivered");
                Ok(())
            }
            Err(last) => {
                crate::metrics::record_notification("failed");
                Err(MailError::Delivery { attempts, last })
            }
        }
    }

    /// Send `notification` on `barrier` without waiting for it.
    pub fn dispatch(&self, barrier: &TaskBarrier, notification: Notification) -> JoinHandle<()> {
        let mailer = self.clone();
        let span = spans::notification(notification.message.name(), &notification.recipient);

        barrier.run(
            "notification",
            async move {
                if let Err(e) = mailer
                    .send(&notification.recipient, notification.message.as_ref())
                    .await
                {
                    error!(error = %e, "Failed to deliver notification");
                }
            }
            .instrument(span),
        )
    }
}
