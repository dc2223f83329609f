use chrono::Duration;

use crate::auth::MIN_PRODUCTION_COST;
use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    pub tokens: TokenSettings,
    pub email_client: EmailClientSettings,
    pub password: PasswordSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public origin used when building links in outgoing emails
    pub base_url: String,
    /// Controls the `Secure` attribute on auth cookies
    pub production: bool,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT signing settings
///
/// Access and refresh tokens are signed with separate secrets so that one
/// can never be replayed as the other.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub access_token_ttl: String,  // e.g. "15m", "900s", "1h"
    pub refresh_token_ttl_days: i64,
}

impl JwtSettings {
    /// Check that both secrets are present and the TTLs are usable.
    ///
    /// A failure here is a startup error; the server must not run without
    /// signing keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.access_secret".to_string()));
        }
        if self.refresh_secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.refresh_secret".to_string()));
        }
        self.access_ttl()?;
        if self.refresh_token_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.refresh_token_ttl_days must be positive, got {}",
                self.refresh_token_ttl_days
            )));
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.access_token_ttl)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_ttl_days)
    }
}

/// Lifetimes of single-use tokens
#[derive(serde::Deserialize, Clone)]
pub struct TokenSettings {
    pub email_verification_ttl_minutes: i64,
    pub password_reset_ttl_minutes: i64,
}

impl TokenSettings {
    pub fn email_verification_ttl(&self) -> Duration {
        Duration::minutes(self.email_verification_ttl_minutes)
    }

    pub fn password_reset_ttl(&self) -> Duration {
        Duration::minutes(self.password_reset_ttl_minutes)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub authorization_token: String,
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct PasswordSettings {
    pub bcrypt_cost: u32,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt.validate()?;
        if self.password.bcrypt_cost < MIN_PRODUCTION_COST && self.application.production {
            return Err(ConfigError::InvalidValue(format!(
                "password.bcrypt_cost must be at least {} in production, got {}",
                MIN_PRODUCTION_COST, self.password.bcrypt_cost
            )));
        }
        Ok(())
    }
}

/// Parse a duration string such as `15m`, `900s`, `1h`, `2d` or bare seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let trimmed = raw.trim();
    let invalid = || ConfigError::InvalidValue(format!("invalid duration: {:?}", raw));

    if trimmed.is_empty() {
        return Err(invalid());
    }

    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split_at);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit.trim() {
        "" | "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => return Err(invalid()),
    };

    if duration <= Duration::zero() {
        return Err(invalid());
    }
    Ok(duration)
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 8000)?
        .set_default("application.base_url", "http://127.0.0.1:8000")?
        .set_default("application.production", false)?
        .set_default("database.username", "postgres")?
        .set_default("database.password", "password")?
        .set_default("database.host", "127.0.0.1")?
        .set_default("database.port", 5432)?
        .set_default("database.database_name", "liftlog")?
        .set_default("database.max_connections", 5)?
        .set_default("jwt.access_secret", "")?
        .set_default("jwt.refresh_secret", "")?
        .set_default("jwt.issuer", "liftlog")?
        .set_default("jwt.access_token_ttl", "15m")?
        .set_default("jwt.refresh_token_ttl_days", 30)?
        .set_default("tokens.email_verification_ttl_minutes", 60)?
        .set_default("tokens.password_reset_ttl_minutes", 30)?
        .set_default("email_client.base_url", "http://127.0.0.1:8025")?
        .set_default("email_client.sender_email", "no-reply@liftlog.app")?
        .set_default("email_client.authorization_token", "")?
        .set_default("email_client.timeout_milliseconds", 10_000)?
        .set_default("password.bcrypt_cost", 12)?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
