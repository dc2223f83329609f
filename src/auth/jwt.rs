/// Token Issuer
///
/// Mints and verifies the signed access and refresh tokens. The issuer is
/// stateless apart from its keys, so one instance is built at startup and
/// shared by every request.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenKind};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};

/// A freshly signed token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// Build the issuer from settings.
    ///
    /// # Errors
    /// Returns a `ConfigError` if either secret is missing or a TTL is invalid.
    pub fn new(config: &JwtSettings) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl()?,
            refresh_ttl: config.refresh_ttl(),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign a short-lived access token for `user_id`
    pub fn issue_access_token(&self, user_id: Uuid) -> Result<SignedToken, AppError> {
        let claims = Claims::access(user_id, self.access_ttl, self.issuer.clone());
        self.sign(&claims, &self.access_encoding)
    }

    /// Sign a refresh token for `user_id` with a fresh `jti`
    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<SignedToken, AppError> {
        let claims = Claims::refresh(user_id, self.refresh_ttl, self.issuer.clone());
        self.sign(&claims, &self.refresh_encoding)
    }

    /// Validate an access token and return its claims
    ///
    /// # Errors
    /// `TokenInvalid` if the token is malformed, tampered with, expired,
    /// from another issuer, or is not an access token.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AppError> {
        self.verify(token, &self.access_decoding, TokenKind::Access)
            .map_err(|_| AppError::Auth(AuthError::TokenInvalid))
    }

    /// Validate a refresh token's signature and return its claims
    ///
    /// This proves only that we minted the token; whether its session is
    /// still Active is decided by the session store.
    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, AppError> {
        self.verify(token, &self.refresh_decoding, TokenKind::Refresh)
            .map_err(|_| AppError::Auth(AuthError::SessionInvalid))
    }

    fn sign(&self, claims: &Claims, key: &EncodingKey) -> Result<SignedToken, AppError> {
        let token = encode(&Header::new(Algorithm::HS256), claims, key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(SignedToken {
            token,
            expires_at: claims.expires_at(),
        })
    }

    fn verify(&self, token: &str, key: &DecodingKey, kind: TokenKind) -> Result<Claims, String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                e.to_string()
            })?;

        if claims.typ != kind {
            tracing::warn!(expected = ?kind, found = ?claims.typ, "Token presented as the wrong kind");
            return Err("wrong token kind".to_string());
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            access_secret: "access-secret-key-at-least-32-characters".to_string(),
            refresh_secret: "refresh-secret-key-at-least-32-characters".to_string(),
            issuer: "test".to_string(),
            access_token_ttl: "15m".to_string(),
            refresh_token_ttl_days: 30,
        }
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&get_test_config()).expect("Failed to build issuer")
    }

    #[test]
    fn test_generate_and_validate_access_token() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let signed = issuer.issue_access_token(user_id).expect("Failed to generate token");
        let claims = issuer.verify_access_token(&signed.token).expect("Failed to validate token");

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.typ, TokenKind::Access);
        assert_eq!(claims.iss, "test");
    }

    #[test]
    fn test_generate_and_validate_refresh_token() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let signed = issuer.issue_refresh_token(user_id).expect("Failed to generate token");
        let claims = issuer.verify_refresh_token(&signed.token).expect("Failed to validate token");

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert!(claims.jti.is_some());
        assert!(signed.expires_at > Utc::now() + Duration::days(29));
    }

    #[test]
    fn test_refresh_tokens_are_unique() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let a = issuer.issue_refresh_token(user_id).unwrap();
        let b = issuer.issue_refresh_token(user_id).unwrap();

        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_access_token_rejected_as_refresh() {
        let issuer = issuer();
        let access = issuer.issue_access_token(Uuid::new_v4()).unwrap();

        let err = issuer.verify_refresh_token(&access.token).unwrap_err();
        assert_eq!(err.auth_kind(), Some(&AuthError::SessionInvalid));
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let issuer = issuer();
        let refresh = issuer.issue_refresh_token(Uuid::new_v4()).unwrap();

        let err = issuer.verify_access_token(&refresh.token).unwrap_err();
        assert_eq!(err.auth_kind(), Some(&AuthError::TokenInvalid));
    }

    #[test]
    fn test_invalid_token() {
        let result = issuer().verify_access_token("invalid.token.here");
        assert!(result.is_err());
    }

    #[test]
    fn test_tampered_token() {
        let issuer = issuer();
        let signed = issuer.issue_access_token(Uuid::new_v4()).unwrap();

        let tampered = format!("{}X", signed.token);
        assert!(issuer.verify_access_token(&tampered).is_err());
    }

    #[test]
    fn test_wrong_issuer() {
        let signed = issuer().issue_access_token(Uuid::new_v4()).unwrap();

        let mut config = get_test_config();
        config.issuer = "wrong-issuer".to_string();
        let other = TokenIssuer::new(&config).unwrap();

        assert!(other.verify_access_token(&signed.token).is_err());
    }

    #[test]
    fn test_missing_secret_fails_at_construction() {
        let mut config = get_test_config();
        config.refresh_secret = String::new();

        assert!(TokenIssuer::new(&config).is_err());
    }
}
