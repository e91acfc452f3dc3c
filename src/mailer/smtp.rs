//! Minimal SMTP client.
//!
//! One connection per message: greeting, `EHLO`, `STARTTLS` when offered,
//! optional `AUTH PLAIN`, `MAIL FROM`, `RCPT TO`, `DATA`, `QUIT`. Implicit
//! TLS (SMTPS) is used when configured. Credentials are only ever sent over
//! TLS.

use super::message::Email;
use super::transport::{Transport, TransportError};
use crate::config::SmtpConfig;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use zeroize::Zeroizing;

const MAX_REPLY_LINE: usize = 4096;

/// Delivers mail through an SMTP relay.
pub struct SmtpTransport {
    host: String,
    port: u16,
    credentials: Option<(String, Zeroizing<String>)>,
    /// Used for STARTTLS, and for the whole connection when `implicit_tls`.
    tls: Option<Arc<ClientConfig>>,
    implicit_tls: bool,
    timeout: Duration,
}

impl SmtpTransport {
    /// Plaintext relay without authentication or TLS.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            tls: None,
            implicit_tls: false,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &SmtpConfig) -> Self {
        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), Zeroizing::new(pass.clone()))),
            _ => None,
        };

        Self {
            host: config.host.clone(),
            port: config.port,
            credentials,
            tls: Some(native_tls_config()),
            implicit_tls: config.tls,
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn attempt(&self, email: &Email) -> Result<(), TransportError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let helo_name = email
            .envelope_sender()
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("localhost")
            .to_string();

        if self.implicit_tls {
            let config = self
                .tls
                .as_ref()
                .ok_or_else(|| TransportError::Tls("no TLS configuration".to_string()))?;
            let mut session = Session::new(self.handshake(config, tcp).await?);
            session.expect("greeting", 2).await?;
            hello(&mut session, &helo_name).await?;
            return self.transmit(session, email).await;
        }

        let mut session = Session::new(tcp);
        session.expect("greeting", 2).await?;
        let greeting = hello(&mut session, &helo_name).await?;

        match &self.tls {
            Some(config) if greeting.offers("STARTTLS") => {
                session.command("STARTTLS", "STARTTLS", 2).await?;
                let tcp = session.into_inner()?;
                let mut session = Session::new(self.handshake(config, tcp).await?);
                hello(&mut session, &helo_name).await?;
                self.transmit(session, email).await
            }
            _ if self.credentials.is_some() => Err(TransportError::Tls(
                "relay does not offer STARTTLS, refusing to send credentials in plaintext".to_string(),
            )),
            _ => self.transmit(session, email).await,
        }
    }

    async fn handshake(
        &self,
        config: &Arc<ClientConfig>,
        tcp: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
        let server_name =
            ServerName::try_from(self.host.clone()).map_err(|e| TransportError::Tls(e.to_string()))?;
        TlsConnector::from(Arc::clone(config))
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))
    }

    /// Authenticate if configured, then hand over the message.
    async fn transmit<S>(&self, mut session: Session<S>, email: &Email) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some((user, pass)) = &self.credentials {
            session.command("AUTH", &auth_plain(user, pass), 2).await?;
        }

        session
            .command("MAIL FROM", &format!("MAIL FROM:<{}>", email.envelope_sender()), 2)
            .await?;
        session
            .command("RCPT TO", &format!("RCPT TO:<{}>", email.envelope_recipient()), 2)
            .await?;
        session.command("DATA", "DATA", 3).await?;
        session.send_data(&email.to_mime()).await?;
        session.expect("message body", 2).await?;

        // The message is accepted at this point; a failed QUIT is not a failed delivery.
        if let Err(e) = session.command("QUIT", "QUIT", 2).await {
            debug!(error = %e, "SMTP QUIT failed after message was accepted");
        }
        Ok(())
    }
}

/// `EHLO`, falling back to `HELO` for relays that reject it.
async fn hello<S>(session: &mut Session<S>, name: &str) -> Result<Reply, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match session.command("EHLO", &format!("EHLO {name}"), 2).await {
        Ok(reply) => Ok(reply),
        Err(_) => session.command("HELO", &format!("HELO {name}"), 2).await,
    }
}

fn auth_plain(user: &str, pass: &str) -> Zeroizing<String> {
    let token = Zeroizing::new(format!("\0{user}\0{pass}"));
    Zeroizing::new(format!("AUTH PLAIN {}", STANDARD.encode(token.as_bytes())))
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn deliver(&self, email: &Email) -> Result<(), TransportError> {
        tokio::time::timeout(self.timeout, self.attempt(email))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

/// Client config trusting the platform's root certificates.
fn native_tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        if let Err(e) = roots.add(cert) {
            warn!("Failed to add root cert: {}", e);
        }
    }
    for e in &certs.errors {
        warn!("Error loading native certs: {}", e);
    }

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

struct Reply {
    code: u16,
    /// Text of every line, one entry per line.
    lines: Vec<String>,
}

impl Reply {
    /// Whether an `EHLO` reply advertises `extension`.
    fn offers(&self, extension: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|kw| kw.eq_ignore_ascii_case(extension))
        })
    }

    fn message(&self) -> String {
        self.lines.join(" ")
    }
}

struct Session<S> {
    lines: FramedRead<ReadHalf<S>, LinesCodec>,
    writer: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REPLY_LINE)),
            writer,
        }
    }

    /// Recover the stream for a TLS upgrade.
    fn into_inner(self) -> Result<S, TransportError> {
        if !self.lines.read_buffer().is_empty() {
            return Err(TransportError::Protocol(
                "unexpected data before TLS handshake".to_string(),
            ));
        }
        Ok(self.lines.into_inner().unsplit(self.writer))
    }

    /// Read one possibly multi-line reply.
    async fn reply(&mut self) -> Result<Reply, TransportError> {
        let mut lines = Vec::new();
        loop {
            let line = match self.lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::Io(e))) => return Err(TransportError::Io(e)),
                Some(Err(e)) => return Err(TransportError::Protocol(e.to_string())),
                None => return Err(TransportError::Protocol("connection closed".to_string())),
            };

            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| TransportError::Protocol(format!("malformed reply: {line}")))?;
            let more = line.as_bytes().get(3) == Some(&b'-');

            lines.push(line.get(4..).unwrap_or_default().trim().to_string());

            if !more {
                return Ok(Reply { code, lines });
            }
        }
    }

    /// Read a reply and require its first digit to be `class`.
    async fn expect(&mut self, command: &'static str, class: u16) -> Result<Reply, TransportError> {
        let reply = self.reply().await?;
        if reply.code / 100 != class {
            return Err(TransportError::Rejected {
                command,
                code: reply.code,
                message: reply.message(),
            });
        }
        Ok(reply)
    }

    async fn command(&mut self, name: &'static str, line: &str, class: u16) -> Result<Reply, TransportError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.expect(name, class).await
    }

    /// Send the message body with dot-stuffing and the terminating `.` line.
    async fn send_data(&mut self, mime: &str) -> Result<(), TransportError> {
        let mut data = String::with_capacity(mime.len() + 8);
        for line in mime.split("\r\n") {
            if line.starts_with('.') {
                data.push('.');
            }
            data.push_str(line);
            data.push_str("\r\n");
        }
        // `split` yields a trailing empty segment for a CRLF-terminated message.
        if mime.ends_with("\r\n") {
            data.truncate(data.len() - 2);
        }
        data.push_str(".\r\n");

        self.writer.write_all(data.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
