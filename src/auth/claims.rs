/// JWT Claims structure
///
/// Payload shared by access and refresh tokens. `typ` keeps the two apart;
/// refresh tokens additionally carry a random `jti` so two refresh tokens
/// minted for the same user in the same second never collide.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
    pub typ: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    pub fn access(user_id: Uuid, ttl: Duration, issuer: String) -> Self {
        Self::new(user_id, TokenKind::Access, None, ttl, issuer)
    }

    pub fn refresh(user_id: Uuid, ttl: Duration, issuer: String) -> Self {
        let jti = Uuid::new_v4().to_string();
        Self::new(user_id, TokenKind::Refresh, Some(jti), ttl, issuer)
    }

    fn new(
        user_id: Uuid,
        typ: TokenKind,
        jti: Option<String>,
        ttl: Duration,
        issuer: String,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            exp: now + ttl.num_seconds(),
            iat: now,
            iss: issuer,
            typ,
            jti,
        }
    }

    /// Extract user ID from claims
    ///
    /// # Errors
    /// Returns `TokenInvalid` if the subject is not a UUID
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth(AuthError::TokenInvalid))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
