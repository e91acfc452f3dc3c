//! Integration test common infrastructure.
//!
//! Builds an isolated [`App`] over an in-memory database with a
//! [`MemoryTransport`] mailer, so flows can be driven end to end and the
//! resulting emails inspected.

use greenlight::App;
use greenlight::config::Config;
use greenlight::mailer::{Email, Mailer, MemoryTransport, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

pub struct TestApp {
    pub app: App,
    pub outbox: MemoryTransport,
}

impl TestApp {
    pub async fn spawn() -> anyhow::Result<Self> {
        let config = Config::parse(
            r#"
            [database]
            path = ":memory:"

            [shutdown]
            drain_timeout_secs = 2
            "#,
        )?;

        let outbox = MemoryTransport::new();
        let mailer = Mailer::new(
            Arc::new(outbox.clone()),
            "Greenlight <no-reply@greenlight.test>",
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(10),
            },
        );
        let app = App::with_mailer(config, mailer).await?;
        Ok(Self { app, outbox })
    }

    /// Wait for detached work, then return the latest email to `to`.
    #[allow(dead_code)]
    pub async fn last_email_to(&self, to: &str) -> anyhow::Result<Email> {
        // drain closes the tracker; later dispatches still run, they are
        // just no longer waited on by this call.
        self.app.barrier.drain(Duration::from_secs(2)).await;
        self.outbox
            .last_to(to)
            .ok_or_else(|| anyhow::anyhow!("no email sent to {}", to))
    }

    /// Activation token embedded in the latest email to `to`.
    #[allow(dead_code)]
    pub async fn activation_token_for(&self, to: &str) -> anyhow::Result<String> {
        let email = self.last_email_to(to).await?;
        extract_token(&email.plain_body).ok_or_else(|| anyhow::anyhow!("no token in email body"))
    }
}

/// Pull the token out of the `{"token": "..."}` line of an email body.
pub fn extract_token(body: &str) -> Option<String> {
    const MARKER: &str = r#"{"token": ""#;
    let start = body.find(MARKER)? + MARKER.len();
    let end = start + body[start..].find('"')?;
    Some(body[start..end].to_string())
}
