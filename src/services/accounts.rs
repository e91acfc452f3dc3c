//! Account flows: registration, activation, authentication and
//! permission checks.
//!
//! Registration inserts the user, grants the default permission, mints an
//! activation token and schedules the welcome email, in that order. These
//! steps are not one transaction: if a later step fails the user remains
//! unactivated and can ask for a new token with
//! [`AccountService::resend_activation`].

use crate::background::TaskBarrier;
use crate::config::TokenConfig;
use crate::db::{
    Database, DbError, IssuedToken, MOVIES_READ, NewUser, Scope, User, VersionedStore, validate_email,
    validate_password_plaintext, validate_token_plaintext, validate_user,
};
use crate::error::{AppError, AppResult};
use crate::mailer::{Mailer, Notification, TokenActivation, UserWelcome};
use crate::security::password::{PasswordCredential, dummy_verify};
use crate::telemetry::{FlowTimer, spans};
use crate::validator::Validator;
use chrono::TimeDelta;
use tracing::{Instrument, debug, info};
use zeroize::Zeroizing;

/// Registration input. The plaintext password is wiped on drop.
#[derive(Clone)]
pub struct RegisterUser {
    pub name: String,
    pub email: String,
    pub password: Zeroizing<String>,
}

impl RegisterUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl std::fmt::Debug for RegisterUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Account service.
#[derive(Clone)]
pub struct AccountService {
    db: Database,
    mailer: Mailer,
    barrier: TaskBarrier,
    tokens: TokenConfig,
}

impl AccountService {
    pub fn new(db: Database, mailer: Mailer, barrier: TaskBarrier, tokens: TokenConfig) -> Self {
        Self {
            db,
            mailer,
            barrier,
            tokens,
        }
    }

    /// Create an unactivated user with `movies:read` and email them an
    /// activation token. Returns before the email is sent.
    pub async fn register_user(&self, input: RegisterUser) -> AppResult<User> {
        let timer = FlowTimer::new("register_user");
        timer.observe(self.register(input).instrument(spans::flow("register_user")).await)
    }

    async fn register(&self, input: RegisterUser) -> AppResult<User> {
        let mut v = Validator::new();
        validate_user(&mut v, &input.name, &input.email, &input.password);
        v.into_result()?;

        let password = PasswordCredential::from_plaintext(&input.password)?;
        let user = self
            .db
            .users()
            .insert(&NewUser {
                name: input.name,
                email: input.email,
                password,
                activated: false,
            })
            .await
            .map_err(|e| match e {
                DbError::DuplicateKey("email") => {
                    AppError::field("email", "a user with this email address already exists")
                }
                other => other.into(),
            })?;

        self.db.permissions().add_for_user(user.id, &[MOVIES_READ]).await?;

        let ttl = self.tokens.activation_ttl();
        let token = self.db.tokens().issue(user.id, ttl, Scope::Activation).await?;

        self.mailer.dispatch(
            &self.barrier,
            Notification::new(
                user.email.as_str(),
                UserWelcome {
                    name: user.name.clone(),
                    user_id: user.id,
                    activation_token: token.plaintext,
                    expires_in: describe_ttl(ttl),
                },
            ),
        );

        info!(user_id = user.id, "User registered");
        Ok(user)
    }

    /// Redeem an activation token. Every outstanding activation token for
    /// the user is deleted afterwards.
    pub async fn activate_user(&self, plaintext: &str) -> AppResult<User> {
        let timer = FlowTimer::new("activate_user");
        timer.observe(self.activate(plaintext).instrument(spans::flow("activate_user")).await)
    }

    async fn activate(&self, plaintext: &str) -> AppResult<User> {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, plaintext);
        v.into_result()?;

        let mut user = match self.db.tokens().get_for_token(Scope::Activation, plaintext).await {
            Ok(user) => user,
            Err(DbError::NotFound) => {
                return Err(AppError::field("token", "invalid or expired activation token"));
            }
            Err(e) => return Err(e.into()),
        };

        user.activated = true;
        self.db.users().update(&mut user).await?;

        let removed = self
            .db
            .tokens()
            .delete_all_for_user(Scope::Activation, user.id)
            .await?;

        info!(user_id = user.id, tokens_removed = removed, "User activated");
        Ok(user)
    }

    /// Exchange email and password for an authentication token.
    ///
    /// An unknown email and a wrong password are indistinguishable, in
    /// result and in timing.
    pub async fn create_authentication_token(&self, email: &str, password: &str) -> AppResult<IssuedToken> {
        let timer = FlowTimer::new("create_authentication_token");
        timer.observe(
            self.login(email, password)
                .instrument(spans::flow("create_authentication_token"))
                .await,
        )
    }

    async fn login(&self, email: &str, password: &str) -> AppResult<IssuedToken> {
        let mut v = Validator::new();
        validate_email(&mut v, email);
        validate_password_plaintext(&mut v, password);
        v.into_result()?;

        let user = match self.db.users().get_by_email(email).await {
            Ok(user) => user,
            Err(DbError::NotFound) => {
                dummy_verify(password);
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if !user.password.matches(password) {
            debug!(user_id = user.id, "Password mismatch");
            return Err(AppError::InvalidCredentials);
        }

        let token = self
            .db
            .tokens()
            .issue(user.id, self.tokens.authentication_ttl(), Scope::Authentication)
            .await?;
        Ok(token)
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate(&self, plaintext: &str) -> AppResult<User> {
        let timer = FlowTimer::new("authenticate");
        timer.observe(
            self.resolve_bearer(plaintext)
                .instrument(spans::flow("authenticate"))
                .await,
        )
    }

    async fn resolve_bearer(&self, plaintext: &str) -> AppResult<User> {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, plaintext);
        if !v.valid() {
            return Err(AppError::InvalidCredentials);
        }

        match self.db.tokens().get_for_token(Scope::Authentication, plaintext).await {
            Ok(user) => Ok(user),
            Err(DbError::NotFound) => Err(AppError::InvalidCredentials),
            Err(e) => Err(e.into()),
        }
    }

    /// Mint a fresh activation token for a user who has not activated yet
    /// and email it. Earlier activation tokens stay valid until they expire
    /// or one of them is redeemed.
    pub async fn resend_activation(&self, email: &str) -> AppResult<()> {
        let timer = FlowTimer::new("resend_activation");
        timer.observe(self.resend(email).instrument(spans::flow("resend_activation")).await)
    }

    async fn resend(&self, email: &str) -> AppResult<()> {
        let mut v = Validator::new();
        validate_email(&mut v, email);
        v.into_result()?;

        let user = match self.db.users().get_by_email(email).await {
            Ok(user) => user,
            Err(DbError::NotFound) => {
                return Err(AppError::field("email", "no matching email address found"));
            }
            Err(e) => return Err(e.into()),
        };
        if user.activated {
            return Err(AppError::field("email", "user has already been activated"));
        }

        let ttl = self.tokens.activation_ttl();
        let token = self.db.tokens().issue(user.id, ttl, Scope::Activation).await?;

        self.mailer.dispatch(
            &self.barrier,
            Notification::new(
                user.email.as_str(),
                TokenActivation {
                    activation_token: token.plaintext,
                    expires_in: describe_ttl(ttl),
                },
            ),
        );

        info!(user_id = user.id, "Activation token reissued");
        Ok(())
    }

    /// Require an activated user holding `code`.
    pub async fn require_permission(&self, user: &User, code: &str) -> AppResult<()> {
        require_activated(user)?;

        let permissions = self.db.permissions().get_all_for_user(user.id).await?;
        if !permissions.includes(code) {
            debug!(user_id = user.id, code, "Permission denied");
            return Err(AppError::NotPermitted);
        }
        Ok(())
    }
}

pub fn require_activated(user: &User) -> AppResult<()> {
    if user.activated {
        Ok(())
    } else {
        Err(AppError::InactiveAccount)
    }
}

/// Human wording for a token lifetime, e.g. "3 days" or "12 hours".
fn describe_ttl(ttl: TimeDelta) -> String {
    let hours = ttl.num_hours();
    match hours {
        h if h > 0 && h % 24 == 0 => plural(h / 24, "day"),
        h if h > 0 => plural(h, "hour"),
        _ => plural(ttl.num_minutes(), "minute"),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 { format!("1 {unit}") } else { format!("{n} {unit}s") }
}
