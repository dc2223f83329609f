/// Storage layer
///
/// Domain records plus the repository traits the auth orchestrator talks
/// to. Every state transition that must hold under concurrency (consuming a
/// refresh session, issuing or consuming a single-use token, redeeming a
/// password reset) is a single conditional operation on the store, never a
/// read followed by a write.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;

pub const DEFAULT_ROLE: &str = "user";

/// Identity root
#[derive(Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

// Keeps the password hash out of logs and panic messages.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("email_verified_at", &self.email_verified_at)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
}

/// One issued refresh grant, keyed by the digest of its token
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

/// What a single-use token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    pub fn table(&self) -> &'static str {
        match self {
            TokenPurpose::EmailVerification => "email_verification_tokens",
            TokenPurpose::PasswordReset => "password_reset_tokens",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenPurpose::EmailVerification => write!(f, "email_verification"),
            TokenPurpose::PasswordReset => write!(f, "password_reset"),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SingleUseToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SingleUseToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

/// What a redeemed password reset changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedReset {
    pub user_id: Uuid,
    pub revoked_sessions: u64,
}

/// Credential store
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; a duplicate email is a `UniqueConstraintViolation`.
    async fn insert_user(&self, user: NewUser, now: DateTime<Utc>) -> Result<User, AppError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    /// Set `email_verified_at` if it is still null. Returns whether this
    /// call was the one that set it.
    async fn mark_email_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;
}

/// Refresh session store
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RefreshSession, AppError>;

    /// Atomically revoke the Active session with this hash and return it.
    ///
    /// Of any number of concurrent callers presenting the same hash, at most
    /// one gets `Some`.
    async fn consume_active_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AppError>;

    async fn find_session_by_hash(&self, token_hash: &str)
        -> Result<Option<RefreshSession>, AppError>;

    /// Revoke the session with this hash if it is not already revoked.
    async fn revoke_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, AppError>;
}

/// Single-use token ledger, shared by email verification and password reset
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Invalidate every usable token of `(user_id, purpose)` and insert the
    /// new one, as one atomic step.
    async fn issue_token(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SingleUseToken, AppError>;

    /// Atomically mark a usable token as used and return it.
    async fn consume_token(
        &self,
        purpose: TokenPurpose,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SingleUseToken>, AppError>;

    async fn count_usable_tokens(
        &self,
        purpose: TokenPurpose,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Redeem a password reset token: mark it used, store the new password
    /// hash and revoke every unrevoked session of its owner, all or nothing.
    ///
    /// `None` when the token is not usable or its owner is gone; nothing is
    /// changed in that case.
    async fn complete_password_reset(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletedReset>, AppError>;
}
