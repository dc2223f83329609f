/// Auth Orchestrator
///
/// Sequences the credential store, the session store, the single-use token
/// ledger and the token issuer into the request-level auth flows. Holds no
/// per-user state of its own; every mutation goes through one of the store
/// traits.
///
/// Inputs are expected to be validated and normalized already (see
/// `crate::validators`).

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::{SignedToken, TokenIssuer};
use crate::auth::password::PasswordHasher;
use crate::auth::tokens::{generate_opaque_token, hash_token};
use crate::configuration::TokenSettings;
use crate::email_client::{
    action_link, password_reset_email, verification_email, EmailMessage, EmailSender,
};
use crate::error::{AppError, AuthError, DatabaseError, ErrorContext};
use crate::storage::{NewUser, SessionStore, TokenLedger, TokenPurpose, User, UserStore};

/// Access + refresh token pair handed back to the boundary layer
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SignedToken,
    pub refresh: SignedToken,
}

/// Public view of a user; never includes the password hash
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub email_verified: bool,
    pub email_verified_at: Option<String>,
    pub roles: Vec<String>,
    pub created_at: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            email_verified: user.is_email_verified(),
            email_verified_at: user.email_verified_at.map(|at| at.to_rfc3339()),
            roles: user.roles.clone(),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub profile: UserProfile,
    pub tokens: TokenPair,
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn TokenLedger>,
    issuer: TokenIssuer,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn EmailSender>,
    base_url: String,
    token_settings: TokenSettings,
}

impl AuthService {
    pub fn new<S>(
        store: Arc<S>,
        issuer: TokenIssuer,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn EmailSender>,
        base_url: String,
        token_settings: TokenSettings,
    ) -> Self
    where
        S: UserStore + SessionStore + TokenLedger + 'static,
    {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            ledger: store,
            issuer,
            hasher,
            mailer,
            base_url,
            token_settings,
        }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Create an unverified account and send its verification email.
    ///
    /// No session is created; the account cannot log in until verified.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<User, AppError> {
        let context = ErrorContext::new("user_registration");

        if self.users.find_user_by_email(email).await?.is_some() {
            tracing::info!(request_id = %context.request_id, "Registration for existing email rejected");
            return Err(AuthError::EmailTaken.into());
        }

        let password_hash = self.hasher.hash(password).await?;

        let new_user = NewUser {
            email: email.to_string(),
            password_hash,
            display_name: display_name.to_string(),
        };

        // A concurrent registration can still win the unique index.
        let user = match self.users.insert_user(new_user, Utc::now()).await {
            Ok(user) => user,
            Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_))) => {
                return Err(AuthError::EmailTaken.into());
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            "User registered"
        );

        self.send_verification(&user).await?;

        Ok(user)
    }

    /// Check credentials and open a new refresh session.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AppError> {
        let context = ErrorContext::new("user_login");

        let user = match self.users.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                self.hasher.verify_against_dummy(password).await?;
                tracing::warn!(request_id = %context.request_id, "Login for unknown email");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !self.hasher.verify(password, &user.password_hash).await? {
            tracing::warn!(
                request_id = %context.request_id,
                user_id = %user.id,
                "Login with wrong password"
            );
            return Err(AuthError::InvalidCredentials.into());
        }

        if !user.is_email_verified() {
            tracing::info!(
                request_id = %context.request_id,
                user_id = %user.id,
                "Login blocked until email is verified"
            );
            return Err(AuthError::EmailNotVerified.into());
        }

        let tokens = self.open_session(user.id).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            "User logged in"
        );

        Ok(LoginOutcome {
            profile: UserProfile::from(&user),
            tokens,
        })
    }

    /// Rotate a refresh token: consume its session and open a new one.
    ///
    /// Every failure is `SessionInvalid`.
    pub async fn refresh(&self, raw_refresh_token: Option<&str>) -> Result<TokenPair, AppError> {
        let context = ErrorContext::new("token_refresh");

        let raw = raw_refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::SessionInvalid)?;

        let claims = self.issuer.verify_refresh_token(raw)?;
        let subject = claims
            .user_id()
            .map_err(|_| AppError::Auth(AuthError::SessionInvalid))?;

        let token_hash = hash_token(raw);
        let now = Utc::now();

        let session = match self.sessions.consume_active_session(&token_hash, now).await? {
            Some(session) => session,
            None => {
                self.report_inactive_session(&context, &token_hash).await;
                return Err(AuthError::SessionInvalid.into());
            }
        };

        if session.user_id != subject {
            tracing::error!(
                request_id = %context.request_id,
                session_id = %session.id,
                "Refresh session owner does not match token subject"
            );
            return Err(AuthError::SessionInvalid.into());
        }

        if self.users.find_user_by_id(session.user_id).await?.is_none() {
            tracing::warn!(
                request_id = %context.request_id,
                user_id = %session.user_id,
                "Refresh for a user that no longer exists"
            );
            return Err(AuthError::SessionInvalid.into());
        }

        let tokens = self.open_session(session.user_id).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %session.user_id,
            rotated_session_id = %session.id,
            "Refresh token rotated"
        );

        Ok(tokens)
    }

    /// Revoke the presented refresh session, if any. Never fails.
    pub async fn logout(&self, raw_refresh_token: Option<&str>) {
        let context = ErrorContext::new("user_logout");

        let raw = match raw_refresh_token.filter(|t| !t.is_empty()) {
            Some(raw) => raw,
            None => return,
        };

        match self.sessions.revoke_session(&hash_token(raw), Utc::now()).await {
            Ok(true) => tracing::info!(request_id = %context.request_id, "Session revoked on logout"),
            Ok(false) => {
                tracing::debug!(request_id = %context.request_id, "Logout with unknown or revoked session")
            }
            Err(e) => context.log_error(&e),
        }
    }

    /// Profile of the access token's subject
    pub async fn me(&self, user_id: Uuid) -> Result<UserProfile, AppError> {
        let user = self
            .users
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(UserProfile::from(&user))
    }

    /// Start a password reset. The outcome is the same whether or not the
    /// account exists; failures are only logged.
    pub async fn forgot_password(&self, email: &str) {
        let context = ErrorContext::new("forgot_password");

        if let Err(e) = self.try_forgot_password(email, &context).await {
            context.log_error(&e);
        }
    }

    async fn try_forgot_password(&self, email: &str, context: &ErrorContext) -> Result<(), AppError> {
        let user = match self.users.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                tracing::info!(request_id = %context.request_id, "Password reset for unknown email");
                return Ok(());
            }
        };

        let ttl = self.token_settings.password_reset_ttl();
        let raw = self.issue_single_use(TokenPurpose::PasswordReset, user.id, ttl).await?;

        let link = action_link(&self.base_url, "reset-password", &raw);
        let message = password_reset_email(
            &user.display_name,
            &link,
            self.token_settings.password_reset_ttl_minutes,
        );
        self.dispatch(&user, message);

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            "Password reset token issued"
        );
        Ok(())
    }

    /// Consume a reset token, set the new password and revoke every session
    /// the user has.
    pub async fn reset_password(&self, raw_token: &str, new_password: &str) -> Result<(), AppError> {
        let context = ErrorContext::new("reset_password");

        // Hash before redeeming so a hashing failure does not burn the token.
        let password_hash = self.hasher.hash(new_password).await?;

        let reset = self
            .ledger
            .complete_password_reset(&hash_token(raw_token), &password_hash, Utc::now())
            .await?
            .ok_or(AuthError::ResetLinkInvalid)?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %reset.user_id,
            revoked_sessions = reset.revoked_sessions,
            "Password reset; all sessions revoked"
        );
        Ok(())
    }

    /// Consume a verification token and mark the email verified.
    ///
    /// An already-verified account is a success, and its original
    /// verification time is kept.
    pub async fn verify_email(&self, raw_token: &str) -> Result<(), AppError> {
        let context = ErrorContext::new("verify_email");

        let token = self
            .ledger
            .consume_token(TokenPurpose::EmailVerification, &hash_token(raw_token), Utc::now())
            .await?
            .ok_or(AuthError::VerifyLinkInvalid)?;

        if self.users.find_user_by_id(token.user_id).await?.is_none() {
            return Err(AuthError::VerifyLinkInvalid.into());
        }

        let newly_verified = self
            .users
            .mark_email_verified(token.user_id, Utc::now())
            .await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %token.user_id,
            newly_verified,
            "Email verification token consumed"
        );
        Ok(())
    }

    /// Send a fresh verification email to an unverified account. Same
    /// outcome for unknown and already-verified addresses.
    pub async fn resend_verification(&self, email: &str) {
        let context = ErrorContext::new("resend_verification");

        let result = match self.users.find_user_by_email(email).await {
            Ok(Some(user)) if !user.is_email_verified() => self.send_verification(&user).await,
            Ok(Some(_)) => {
                tracing::info!(request_id = %context.request_id, "Resend for already verified email");
                Ok(())
            }
            Ok(None) => {
                tracing::info!(request_id = %context.request_id, "Resend for unknown email");
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            context.log_error(&e);
        }
    }

    async fn send_verification(&self, user: &User) -> Result<(), AppError> {
        let ttl = self.token_settings.email_verification_ttl();
        let raw = self
            .issue_single_use(TokenPurpose::EmailVerification, user.id, ttl)
            .await?;

        let link = action_link(&self.base_url, "verify-email", &raw);
        let message = verification_email(
            &user.display_name,
            &link,
            self.token_settings.email_verification_ttl_minutes,
        );
        self.dispatch(user, message);
        Ok(())
    }

    /// Mint a raw token, store its digest (invalidating older ones), and
    /// return the raw value for the email link.
    async fn issue_single_use(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        ttl: chrono::Duration,
    ) -> Result<String, AppError> {
        let raw = generate_opaque_token();
        let now = Utc::now();

        self.ledger
            .issue_token(purpose, user_id, &hash_token(&raw), now + ttl, now)
            .await?;

        Ok(raw)
    }

    async fn open_session(&self, user_id: Uuid) -> Result<TokenPair, AppError> {
        let access = self.issuer.issue_access_token(user_id)?;
        let refresh = self.issuer.issue_refresh_token(user_id)?;

        self.sessions
            .create_session(user_id, &hash_token(&refresh.token), refresh.expires_at, Utc::now())
            .await?;

        Ok(TokenPair { access, refresh })
    }

    /// Send on a background task so the response never waits on the mail
    /// provider. Delivery failures are logged there and never change the
    /// flow's result.
    fn dispatch(&self, user: &User, message: EmailMessage) {
        let mailer = Arc::clone(&self.mailer);
        let user_id = user.id;
        let recipient = user.email.clone();

        tokio::spawn(async move {
            if let Err(e) = mailer
                .send_email(&recipient, &message.subject, &message.html, &message.text)
                .await
            {
                tracing::error!(user_id = %user_id, error = %e, subject = %message.subject, "Failed to send email");
            }
        });
    }

    async fn report_inactive_session(&self, context: &ErrorContext, token_hash: &str) {
        match self.sessions.find_session_by_hash(token_hash).await {
            Ok(Some(session)) if session.revoked_at.is_some() => {
                tracing::warn!(
                    request_id = %context.request_id,
                    user_id = %session.user_id,
                    session_id = %session.id,
                    "Revoked refresh token presented again"
                );
            }
            Ok(Some(session)) => {
                tracing::info!(
                    request_id = %context.request_id,
                    user_id = %session.user_id,
                    "Expired refresh token presented"
                );
            }
            Ok(None) => {
                tracing::warn!(request_id = %context.request_id, "Unknown refresh token presented");
            }
            Err(e) => context.log_error(&e),
        }
    }
}
