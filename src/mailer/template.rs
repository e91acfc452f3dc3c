//! Email templates.
//!
//! Every message renders three sections from one typed context: a subject,
//! a plain-text body (`templates/<name>/plain.txt`) and an HTML body
//! (`templates/<name>/body.html`, escaped by askama). Rendering is
//! deterministic, so its errors are never retried.

use askama::Template;
use std::fmt;

/// The three rendered sections of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

/// A message that can render itself into an email.
pub trait EmailTemplate: fmt::Debug + Send + Sync {
    /// Stable name for logs and metrics.
    fn name(&self) -> &'static str;

    fn render(&self) -> askama::Result<RenderedEmail>;
}

/// Sent once, right after registration.
#[derive(Debug, Clone)]
pub struct UserWelcome {
    pub name: String,
    pub user_id: i64,
    pub activation_token: String,
    pub expires_in: String,
}

/// Sent when a user asks for a fresh activation token.
#[derive(Debug, Clone)]
pub struct TokenActivation {
    pub activation_token: String,
    pub expires_in: String,
}

#[derive(Template)]
#[template(source = "Welcome to Greenlight!", ext = "txt")]
struct UserWelcomeSubject;

#[derive(Template)]
#[template(path = "user_welcome/plain.txt")]
struct UserWelcomePlain<'a> {
    data: &'a UserWelcome,
}

#[derive(Template)]
#[template(path = "user_welcome/body.html")]
struct UserWelcomeHtml<'a> {
    data: &'a UserWelcome,
}

impl EmailTemplate for UserWelcome {
    fn name(&self) -> &'static str {
        "user_welcome"
    }

    fn render(&self) -> askama::Result<RenderedEmail> {
        Ok(RenderedEmail {
            subject: UserWelcomeSubject.render()?,
            plain_body: UserWelcomePlain { data: self }.render()?,
            html_body: UserWelcomeHtml { data: self }.render()?,
        })
    }
}

#[derive(Template)]
#[template(source = "Activate your Greenlight account", ext = "txt")]
struct TokenActivationSubject;

#[derive(Template)]
#[template(path = "token_activation/plain.txt")]
struct TokenActivationPlain<'a> {
    data: &'a TokenActivation,
}

#[derive(Template)]
#[template(path = "token_activation/body.html")]
struct TokenActivationHtml<'a> {
    data: &'a TokenActivation,
}

impl EmailTemplate for TokenActivation {
    fn name(&self) -> &'static str {
        "token_activation"
    }

    fn render(&self) -> askama::Result<RenderedEmail> {
        Ok(RenderedEmail {
            subject: TokenActivationSubject.render()?,
            plain_body: TokenActivationPlain { data: self }.render()?,
            html_body: TokenActivationHtml { data: self }.render()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn welcome(name: &str) -> UserWelcome {
        UserWelcome {
            name: name.to_string(),
            user_id: 7,
            activation_token: "TOKEN123".to_string(),
            expires_in: "3 days".to_string(),
        }
    }

    #[test]
    fn test_welcome_renders_every_section() {
        let rendered = welcome("Alice").render().unwrap();

        assert_eq!(rendered.subject, "Welcome to Greenlight!");
        assert!(rendered.plain_body.starts_with("Hi Alice,"));
        assert!(rendered.plain_body.contains(r#"{"token": "TOKEN123"}"#));
        assert!(rendered.plain_body.contains("user ID number is 7"));
        assert!(rendered.plain_body.contains("expire in 3 days"));
        assert!(rendered.html_body.contains("TOKEN123"));
    }

    #[test]
    fn test_html_body_is_escaped() {
        let rendered = welcome("<b>Eve</b>").render().unwrap();

        assert!(rendered.plain_body.contains("Hi <b>Eve</b>,"));
        assert!(rendered.html_body.contains("&lt;b&gt;Eve"));
        assert!(!rendered.html_body.contains("<b>Eve"));
    }

    #[test]
    fn test_token_activation() {
        let message = TokenActivation {
            activation_token: "TOKEN456".to_string(),
            expires_in: "1 day".to_string(),
        };
        let rendered = message.render().unwrap();

        assert_eq!(message.name(), "token_activation");
        assert_eq!(rendered.subject, "Activate your Greenlight account");
        assert!(rendered.plain_body.contains(r#"{"token": "TOKEN456"}"#));
        assert!(rendered.html_body.contains("expire in 1 day"));
    }
}
