/// Error Handling Module
///
/// One error type for the whole application, built from small domain enums:
/// 1. Control Flow Errors (Result-based, converted with `?`)
/// 2. HTTP responses with a generic, enumeration-safe message
/// 3. Structured error logging with a per-response error id
///
/// Messages rendered to clients never carry internal detail; the detail goes
/// to the log line keyed by the same `error_id`.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Validation errors for input data
#[derive(Debug, Clone)]
pub enum ValidationError {
    EmptyField(String),
    TooShort(String, usize),
    TooLong(String, usize),
    InvalidFormat(String),
    SuspiciousContent(String),
    WeakPassword,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::SuspiciousContent(field) => {
                write!(f, "{} contains suspicious content", field)
            }
            ValidationError::WeakPassword => write!(
                f,
                "password must contain at least one digit, one lowercase letter, and one uppercase letter"
            ),
        }
    }
}

impl StdError for ValidationError {}

/// Database operation errors
#[derive(Debug)]
pub enum DatabaseError {
    UniqueConstraintViolation(String),
    NotFound(String),
    QueryExecution(String),
    ConnectionPool(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::UniqueConstraintViolation(msg) => {
                write!(f, "Duplicate entry: {}", msg)
            }
            DatabaseError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DatabaseError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

/// Email service errors
#[derive(Debug, Clone)]
pub enum EmailError {
    SendFailed(String),
    ServiceUnavailable(String),
    ConfigurationError(String),
}

impl fmt::Display for EmailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmailError::SendFailed(msg) => write!(f, "Failed to send email: {}", msg),
            EmailError::ServiceUnavailable(msg) => {
                write!(f, "Email service unavailable: {}", msg)
            }
            EmailError::ConfigurationError(msg) => write!(f, "Email config error: {}", msg),
        }
    }
}

impl StdError for EmailError {}

/// Configuration errors
///
/// Raised while loading settings at startup, never per request.
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

/// Authentication and authorization errors
///
/// The token and credential variants render deliberately generic messages so
/// a caller cannot tell which check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    EmailTaken,
    InvalidCredentials,
    EmailNotVerified,
    SessionInvalid,
    ResetLinkInvalid,
    VerifyLinkInvalid,
    MissingToken,
    TokenInvalid,
    UserNotFound,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::EmailTaken => write!(f, "Email is already registered"),
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::EmailNotVerified => {
                write!(f, "Please verify your email before logging in")
            }
            AuthError::SessionInvalid => write!(f, "Session expired, please log in again"),
            AuthError::ResetLinkInvalid => {
                write!(f, "Reset link is invalid or has expired")
            }
            AuthError::VerifyLinkInvalid => {
                write!(f, "Verification link is invalid or has expired")
            }
            AuthError::MissingToken => write!(f, "Missing authentication token"),
            AuthError::TokenInvalid => write!(f, "Invalid or expired token"),
            AuthError::UserNotFound => write!(f, "User not found"),
        }
    }
}

impl StdError for AuthError {}

impl AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::EmailNotVerified => StatusCode::FORBIDDEN,
            AuthError::ResetLinkInvalid | AuthError::VerifyLinkInvalid => StatusCode::BAD_REQUEST,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidCredentials
            | AuthError::SessionInvalid
            | AuthError::MissingToken
            | AuthError::TokenInvalid => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::EmailTaken => "EMAIL_TAKEN",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AuthError::SessionInvalid => "SESSION_INVALID",
            AuthError::ResetLinkInvalid => "RESET_LINK_INVALID",
            AuthError::VerifyLinkInvalid => "VERIFY_LINK_INVALID",
            AuthError::MissingToken => "UNAUTHORIZED",
            AuthError::TokenInvalid => "TOKEN_INVALID",
            AuthError::UserNotFound => "NOT_FOUND",
        }
    }
}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

/// Central error type that all application errors map to
#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Database(DatabaseError),
    Email(EmailError),
    Auth(AuthError),
    Config(ConfigError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Email(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

impl AppError {
    /// The auth failure carried by this error, if any.
    pub fn auth_kind(&self) -> Option<&AuthError> {
        match self {
            AppError::Auth(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        AppError::Email(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // 23505 = unique_violation
            if db_err.code().as_deref() == Some("23505") {
                return AppError::Database(DatabaseError::UniqueConstraintViolation(
                    db_err.message().to_string(),
                ));
            }
        }

        match err {
            sqlx::Error::RowNotFound => {
                AppError::Database(DatabaseError::NotFound("Record not found".to_string()))
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Database(DatabaseError::ConnectionPool(err.to_string()))
            }
            other => AppError::Database(DatabaseError::QueryExecution(other.to_string())),
        }
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID, also present on the matching log line
    pub error_id: String,
    /// Short, action-oriented message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    pub status: u16,
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            AppError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR".to_string(),
                e.to_string(),
            ),

            AppError::Database(e) => match e {
                DatabaseError::UniqueConstraintViolation(_) => (
                    StatusCode::CONFLICT,
                    "DUPLICATE_ENTRY".to_string(),
                    "Resource already exists".to_string(),
                ),
                DatabaseError::NotFound(_) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND".to_string(),
                    "Not found".to_string(),
                ),
                DatabaseError::ConnectionPool(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE".to_string(),
                    "Service temporarily unavailable".to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR".to_string(),
                    "Something went wrong, please try again".to_string(),
                ),
            },

            AppError::Email(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "EMAIL_SERVICE_ERROR".to_string(),
                "Email service temporarily unavailable".to_string(),
            ),

            AppError::Auth(e) => (e.status_code(), e.code().to_string(), e.to_string()),

            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR".to_string(),
                "Server configuration error".to_string(),
            ),

            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                "Something went wrong, please try again".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error_id: request_id.to_string(),
            message,
            code,
            status: status.as_u16(),
        };

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                tracing::warn!(request_id = request_id, error = %self, "Duplicate entry attempt");
            }
            AppError::Database(e) => {
                tracing::error!(request_id = request_id, error = %e, "Database error");
            }
            AppError::Email(e) => {
                tracing::error!(request_id = request_id, error = %e, "Email service error");
            }
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials => {
                    tracing::warn!(request_id = request_id, error = %e, "Invalid credentials attempt");
                }
                _ => {
                    tracing::warn!(request_id = request_id, error = %e, "Authentication error");
                }
            },
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Database(e) => match e {
                DatabaseError::UniqueConstraintViolation(_) => StatusCode::CONFLICT,
                DatabaseError::NotFound(_) => StatusCode::NOT_FOUND,
                DatabaseError::ConnectionPool(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Email(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Auth(e) => e.status_code(),
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT
// ============================================================================

/// Request-scoped context attached to flow logs
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn log_error(&self, error: &AppError) {
        let context = serde_json::json!({
            "request_id": self.request_id,
            "operation": self.operation,
            "timestamp": self.timestamp.to_rfc3339(),
        });

        match error {
            AppError::Validation(_) | AppError::Auth(_) => {
                tracing::warn!(error = %error, context = ?context, "Request rejected");
            }
            _ => {
                tracing::error!(error = %error, context = ?context, "Request failed");
            }
        }
    }
}
