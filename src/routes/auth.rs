/// Authentication Routes
///
/// Thin HTTP boundary over `AuthService`: validates and normalizes input,
/// calls the flow, and turns the result into a status, a JSON body and
/// cookie instructions.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthService, Claims, UserProfile};
use crate::error::AppError;
use crate::routes::cookies::{CookiePolicy, REFRESH_COOKIE};
use crate::validators::{parse_display_name, parse_email, parse_password, parse_token};

/// Returned by forgot-password and resend-verification whatever the outcome
pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent.";
pub const RESEND_VERIFICATION_MESSAGE: &str =
    "If that email belongs to an unverified account, a new verification link has been sent.";
const REGISTERED_MESSAGE: &str = "Account created. Check your email to verify your address.";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(alias = "displayName")]
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

/// Browsers only send the refresh cookie to `/auth/refresh`, so clients may
/// also hand the token over in the logout body.
#[derive(Deserialize)]
pub struct LogoutRequest {
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl OkResponse {
    fn ok() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    fn with_message(message: &'static str) -> Self {
        Self {
            ok: true,
            message: Some(message),
        }
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserProfile,
}

fn refresh_cookie_value(req: &HttpRequest) -> Option<String> {
    req.cookie(REFRESH_COOKIE).map(|c| c.value().to_string())
}

/// POST /auth/register
///
/// # Errors
/// - 400: Validation errors
/// - 409: Email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let email = parse_email(&form.email)?;
    let password = parse_password(&form.password)?;
    let display_name = parse_display_name(&form.display_name)?;

    auth.register(&email, &password, &display_name).await?;

    Ok(HttpResponse::Created().json(OkResponse::with_message(REGISTERED_MESSAGE)))
}

/// POST /auth/login
///
/// # Errors
/// - 400: Validation error
/// - 401: Invalid credentials (same for unknown email and wrong password)
/// - 403: Email not verified
pub async fn login(
    form: web::Json<LoginRequest>,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookiePolicy>,
) -> Result<HttpResponse, AppError> {
    let email = parse_email(&form.email)?;

    let outcome = auth.login(&email, &form.password).await?;

    let mut response = HttpResponse::Ok();
    cookies.set_session(&mut response, &outcome.tokens);
    Ok(response.json(LoginResponse {
        user: outcome.profile,
    }))
}

/// POST /auth/refresh
///
/// Rotates the refresh cookie. On any failure both cookies are cleared so
/// the client stops presenting dead tokens.
pub async fn refresh(
    req: HttpRequest,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookiePolicy>,
) -> HttpResponse {
    let raw = refresh_cookie_value(&req);

    match auth.refresh(raw.as_deref()).await {
        Ok(tokens) => {
            let mut response = HttpResponse::Ok();
            cookies.set_session(&mut response, &tokens);
            response.json(OkResponse::ok())
        }
        Err(e) => {
            let mut response = e.error_response();
            cookies.clear_session_on(&mut response);
            response
        }
    }
}

/// POST /auth/logout
///
/// Revokes the session named by the refresh cookie or, failing that, by
/// `refresh_token` in the JSON body. Always 200; revocation is best-effort.
pub async fn logout(
    req: HttpRequest,
    body: Option<web::Json<LogoutRequest>>,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookiePolicy>,
) -> HttpResponse {
    let raw = refresh_cookie_value(&req)
        .or_else(|| body.and_then(|b| b.into_inner().refresh_token));
    auth.logout(raw.as_deref()).await;

    let mut response = HttpResponse::Ok();
    cookies.clear_session(&mut response);
    response.json(OkResponse::ok())
}

/// GET /auth/me
///
/// Claims are injected by `AccessTokenMiddleware`.
///
/// # Errors
/// - 401: Missing or invalid token (middleware)
/// - 404: User no longer exists
pub async fn me(
    claims: web::ReqData<Claims>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;
    let profile = auth.me(user_id).await?;

    Ok(HttpResponse::Ok().json(profile))
}

/// POST /auth/forgot-password
///
/// Identical response for known and unknown emails.
pub async fn forgot_password(
    form: web::Json<EmailRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let email = parse_email(&form.email)?;

    auth.forgot_password(&email).await;

    Ok(HttpResponse::Ok().json(OkResponse::with_message(FORGOT_PASSWORD_MESSAGE)))
}

/// POST /auth/reset-password
///
/// # Errors
/// - 400: Invalid, expired or used token; weak password
pub async fn reset_password(
    form: web::Json<ResetPasswordRequest>,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookiePolicy>,
) -> Result<HttpResponse, AppError> {
    let token = parse_token(&form.token)?;
    let password = parse_password(&form.password)?;

    auth.reset_password(&token, &password).await?;

    let mut response = HttpResponse::Ok();
    cookies.clear_session(&mut response);
    Ok(response.json(OkResponse::ok()))
}

/// POST /auth/verify-email
///
/// # Errors
/// - 400: Invalid or expired token
pub async fn verify_email(
    form: web::Json<TokenRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let token = parse_token(&form.token)?;

    auth.verify_email(&token).await?;

    Ok(HttpResponse::Ok().json(OkResponse::ok()))
}

/// POST /auth/resend-verification
///
/// Identical response for unknown, unverified and verified emails.
pub async fn resend_verification(
    form: web::Json<EmailRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let email = parse_email(&form.email)?;

    auth.resend_verification(&email).await;

    Ok(HttpResponse::Ok().json(OkResponse::with_message(RESEND_VERIFICATION_MESSAGE)))
}
