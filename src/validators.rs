/// Input validators for the auth boundary
///
/// Everything the orchestrator receives has already passed through here:
/// values are trimmed, emails are lower-cased, and passwords meet the
/// strength policy. Length limits also keep oversized payloads away from
/// bcrypt.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_NAME_LENGTH: usize = 100;
const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 72; // bcrypt ignores bytes beyond 72
const MAX_TOKEN_LENGTH: usize = 2048;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("email regex is valid");
}

/// Validates an email address and returns its normalized (trimmed,
/// lower-cased) form.
pub fn parse_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }

    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    if has_suspicious_email_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent("email".to_string()));
    }

    Ok(normalize_email(trimmed))
}

/// Case-normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates a display name
pub fn parse_display_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("display_name".to_string()));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong("display_name".to_string(), MAX_NAME_LENGTH));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::SuspiciousContent("display_name".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Password strength requirements
///
/// - 8 to 72 bytes
/// - At least one digit, one lowercase and one uppercase letter
pub fn parse_password(password: &str) -> Result<String, ValidationError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort("password".to_string(), MIN_PASSWORD_LENGTH));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password".to_string(), MAX_PASSWORD_LENGTH));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(ValidationError::WeakPassword);
    }

    Ok(password.to_string())
}

/// Validates an opaque token taken from a request body
pub fn parse_token(token: &str) -> Result<String, ValidationError> {
    let trimmed = token.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("token".to_string()));
    }

    if trimmed.len() > MAX_TOKEN_LENGTH {
        return Err(ValidationError::TooLong("token".to_string(), MAX_TOKEN_LENGTH));
    }

    Ok(trimmed.to_string())
}

fn has_suspicious_email_patterns(email: &str) -> bool {
    if let Some(at_pos) = email.find('@') {
        if at_pos > 64 {
            return true;
        }
    }

    if email.matches('@').count() != 1 {
        return true;
    }

    email.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(parse_email("user@example.com").is_ok());
        assert!(parse_email("test.email@domain.co.uk").is_ok());
        assert!(parse_email("user+tag@example.com").is_ok());
    }

    #[test]
    fn test_email_is_normalized() {
        assert_eq!(parse_email("  John.Doe@Example.COM ").unwrap(), "john.doe@example.com");
    }

    #[test]
    fn test_invalid_email_format() {
        assert!(parse_email("invalid").is_err());
        assert!(parse_email("user@").is_err());
        assert!(parse_email("@example.com").is_err());
        assert!(parse_email("user@@example.com").is_err());
    }

    #[test]
    fn test_email_length_limits() {
        let too_long = format!("{}@example.com", "a".repeat(250));
        assert!(parse_email(&too_long).is_err());
        assert!(parse_email("a@b").is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(parse_display_name("  Jean-Pierre ").unwrap(), "Jean-Pierre");
        assert!(parse_display_name("").is_err());
        assert!(parse_display_name(&"a".repeat(101)).is_err());
        assert!(parse_display_name("Name\0with\0null").is_err());
    }

    #[test]
    fn test_password_policy() {
        assert!(parse_password("P@ssw0rd1").is_ok());
        assert!(parse_password("Short1").is_err());
        assert!(parse_password("nouppercase1").is_err());
        assert!(parse_password("NOLOWERCASE1").is_err());
        assert!(parse_password("NoDigitsHere").is_err());
        assert!(parse_password(&format!("Aa1{}", "a".repeat(70))).is_err());
    }

    #[test]
    fn test_token() {
        assert_eq!(parse_token(" abc ").unwrap(), "abc");
        assert!(parse_token("   ").is_err());
        assert!(parse_token(&"a".repeat(MAX_TOKEN_LENGTH + 1)).is_err());
    }
}
