//! Delivery backends.

use super::message::Email;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// A failed delivery attempt. Every variant is worth retrying.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("attempt timed out")]
    Timeout,
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("server rejected {command}: {code} {message}")]
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Something that can hand one [`Email`] to the outside world.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, email: &Email) -> Result<(), TransportError>;
}

/// Writes messages to the log instead of sending them.
///
/// Used when no SMTP relay is configured.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, email: &Email) -> Result<(), TransportError> {
        info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            body = %email.plain_body,
            "Email delivery (no SMTP relay configured)"
        );
        Ok(())
    }
}

/// Keeps delivered messages in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Email>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, oldest first.
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }

    /// Most recent message addressed to `to`.
    pub fn last_to(&self, to: &str) -> Option<Email> {
        self.sent.lock().iter().rev().find(|e| e.to == to).cloned()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn deliver(&self, email: &Email) -> Result<(), TransportError> {
        self.sent.lock().push(email.clone());
        Ok(())
    }
}
