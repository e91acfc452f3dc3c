//! Outgoing message composition.
//!
//! Every message is `multipart/alternative` with a plain-text part followed
//! by an HTML part. Bodies are base64 encoded so they survive any relay
//! unchanged; non-ASCII subjects use RFC 2047 encoded words.

use super::template::RenderedEmail;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use std::borrow::Cow;
use uuid::Uuid;

const BODY_LINE_LEN: usize = 76;

/// A fully rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

impl Email {
    pub fn new(from: impl Into<String>, to: impl Into<String>, rendered: RenderedEmail) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: rendered.subject,
            plain_body: rendered.plain_body,
            html_body: rendered.html_body,
        }
    }

    /// Bare address of the sender, for `MAIL FROM`.
    pub fn envelope_sender(&self) -> &str {
        bare_address(&self.from)
    }

    /// Bare address of the recipient, for `RCPT TO`.
    pub fn envelope_recipient(&self) -> &str {
        bare_address(&self.to)
    }

    /// Serialize as an RFC 5322 message with CRLF line endings.
    pub fn to_mime(&self) -> String {
        let boundary = format!("greenlight-{}", Uuid::new_v4().simple());
        let domain = self
            .envelope_sender()
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("localhost");

        let mut out = String::with_capacity(self.plain_body.len() * 2 + self.html_body.len() * 2 + 512);
        push_header(&mut out, "From", &single_line(&self.from));
        push_header(&mut out, "To", &single_line(&self.to));
        push_header(&mut out, "Subject", &encode_header(&single_line(&self.subject)));
        push_header(&mut out, "Date", &Utc::now().to_rfc2822());
        push_header(&mut out, "Message-ID", &format!("<{}@{}>", Uuid::new_v4(), domain));
        push_header(&mut out, "MIME-Version", "1.0");
        push_header(
            &mut out,
            "Content-Type",
            &format!("multipart/alternative; boundary=\"{boundary}\""),
        );
        out.push_str("\r\n");

        push_part(&mut out, &boundary, "text/plain", &self.plain_body);
        push_part(&mut out, &boundary, "text/html", &self.html_body);
        out.push_str(&format!("--{boundary}--\r\n"));
        out
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

fn push_part(out: &mut String, boundary: &str, content_type: &str, body: &str) {
    out.push_str(&format!("--{boundary}\r\n"));
    push_header(out, "Content-Type", &format!("{content_type}; charset=UTF-8"));
    push_header(out, "Content-Transfer-Encoding", "base64");
    out.push_str("\r\n");

    let encoded = STANDARD.encode(normalize_newlines(body));
    // Base64 output is ASCII, so byte chunks are valid UTF-8.
    for line in encoded.as_bytes().chunks(BODY_LINE_LEN) {
        out.push_str(std::str::from_utf8(line).unwrap_or_default());
        out.push_str("\r\n");
    }
}

fn bare_address(mailbox: &str) -> &str {
    match (mailbox.find('<'), mailbox.rfind('>')) {
        (Some(start), Some(end)) if start < end => mailbox[start + 1..end].trim(),
        _ => mailbox.trim(),
    }
}

/// Headers are single-line; collapse any CR or LF.
fn single_line(value: &str) -> Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        Cow::Owned(value.replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

fn encode_header(value: &str) -> Cow<'_, str> {
    if value.is_ascii() {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("=?UTF-8?B?{}?=", STANDARD.encode(value)))
    }
}

fn normalize_newlines(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(subject: &str) -> Email {
        Email::new(
            "Greenlight <no-reply@greenlight.example>",
            "alice@example.com",
            RenderedEmail {
                subject: subject.to_string(),
                plain_body: "line one\nline two\n".to_string(),
                html_body: "<p>hello</p>".to_string(),
            },
        )
    }

    fn decode_part(mime: &str, content_type: &str) -> String {
        let marker = format!("Content-Type: {content_type}; charset=UTF-8\r\n");
        let start = mime.find(&marker).unwrap();
        let rest = &mime[start..];
        let body_start = rest.find("\r\n\r\n").unwrap() + 4;
        let body_end = rest.find("--greenlight-").unwrap();
        let encoded: String = rest[body_start..body_end].split("\r\n").collect();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_envelope_addresses() {
        let e = email("hi");
        assert_eq!(e.envelope_sender(), "no-reply@greenlight.example");
        assert_eq!(e.envelope_recipient(), "alice@example.com");
    }

    #[test]
    fn test_mime_has_both_parts_in_order() {
        let mime = email("Welcome").to_mime();
        assert!(mime.contains("Subject: Welcome\r\n"));
        assert!(mime.contains("MIME-Version: 1.0\r\n"));
        assert!(mime.contains("@greenlight.example>\r\n"));

        let plain = mime.find("text/plain").unwrap();
        let html = mime.find("text/html").unwrap();
        assert!(plain < html);

        assert_eq!(decode_part(&mime, "text/plain"), "line one\r\nline two\r\n");
        assert_eq!(decode_part(&mime, "text/html"), "<p>hello</p>");
        assert!(mime.trim_end().ends_with("--"));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let mime = email("Bienvenue à Greenlight").to_mime();
        assert!(mime.contains("Subject: =?UTF-8?B?"));
        assert!(!mime.contains("Bienvenue à"));
    }

    #[test]
    fn test_header_injection_is_flattened() {
        let mime = email("hi\r\nBcc: eve@example.com").to_mime();
        assert!(!mime.contains("\r\nBcc:"));
    }
}
