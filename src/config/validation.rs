//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::path::Path;
use thiserror::Error;

const ENVIRONMENTS: &[&str] = &["development", "staging", "production"];

/// Longest token lifetime accepted, one year.
pub const MAX_TTL_HOURS: i64 = 24 * 365;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server.environment must be one of development, staging, production, got '{0}'")]
    InvalidEnvironment(String),
    #[error("database.path is required")]
    MissingDatabasePath,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("tokens.{0} must be greater than zero")]
    NonPositiveTtl(&'static str),
    #[error("tokens.{0} must be at most {MAX_TTL_HOURS} hours")]
    TtlTooLong(&'static str),
    #[error("smtp.host is required")]
    MissingSmtpHost,
    #[error("smtp.sender is required")]
    MissingSmtpSender,
    #[error("smtp.username and smtp.password must be set together")]
    IncompleteSmtpCredentials,
    #[error("smtp.timeout_secs must be greater than zero")]
    ZeroSmtpTimeout,
    #[error("notifications.attempts must be at least 1")]
    ZeroAttempts,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !ENVIRONMENTS.contains(&config.server.environment.as_str()) {
        errors.push(ValidationError::InvalidEnvironment(
            config.server.environment.clone(),
        ));
    }

    // Database path validation
    let db_path = &config.database.path;
    if db_path.is_empty() {
        errors.push(ValidationError::MissingDatabasePath);
    } else if db_path != ":memory:"
        && let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(db_path.clone()));
    }

    for (name, hours) in [
        ("activation_ttl_hours", config.tokens.activation_ttl_hours),
        ("authentication_ttl_hours", config.tokens.authentication_ttl_hours),
    ] {
        if hours <= 0 {
            errors.push(ValidationError::NonPositiveTtl(name));
        } else if hours > MAX_TTL_HOURS {
            errors.push(ValidationError::TtlTooLong(name));
        }
    }

    if let Some(ref smtp) = config.smtp {
        if smtp.host.is_empty() {
            errors.push(ValidationError::MissingSmtpHost);
        }
        if smtp.sender.is_empty() {
            errors.push(ValidationError::MissingSmtpSender);
        }
        if smtp.username.is_some() != smtp.password.is_some() {
            errors.push(ValidationError::IncompleteSmtpCredentials);
        }
        if smtp.timeout_secs == 0 {
            errors.push(ValidationError::ZeroSmtpTimeout);
        }
    }

    if config.notifications.attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_reports_every_problem() {
        let config = Config::parse(
            r#"
            [server]
            environment = "prod"

            [database]
            path = "/definitely/not/here/greenlight.db"

            [tokens]
            activation_ttl_hours = 0

            [smtp]
            host = ""
            sender = "no-reply@example.com"
            username = "mailer"

            [notifications]
            attempts = 0
            "#,
        )
        .unwrap();

        let errors = validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidEnvironment("prod".to_string()),
                ValidationError::DatabasePathInvalid("/definitely/not/here/greenlight.db".to_string()),
                ValidationError::NonPositiveTtl("activation_ttl_hours"),
                ValidationError::MissingSmtpHost,
                ValidationError::IncompleteSmtpCredentials,
                ValidationError::ZeroAttempts,
            ]
        );
    }

    #[test]
    fn test_ttl_upper_bound() {
        let config = Config::parse(
            "[tokens]\nactivation_ttl_hours = 10000000000\nauthentication_ttl_hours = 8760\n",
        )
        .unwrap();
        assert_eq!(
            validate(&config).unwrap_err(),
            vec![ValidationError::TtlTooLong("activation_ttl_hours")]
        );
    }
}
