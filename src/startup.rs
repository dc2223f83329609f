use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AuthService, BcryptHasher, TokenIssuer};
use crate::configuration::Settings;
use crate::email_client::{EmailClient, EmailSender, SenderEmail};
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::AccessTokenMiddleware;
use crate::routes::{
    forgot_password, health_check, login, logout, me, refresh, register, resend_verification,
    reset_password, verify_email, CookiePolicy,
};
use crate::storage::PgStore;

/// Cookie policy matching the issuer's token lifetimes
pub fn cookie_policy(issuer: &TokenIssuer, production: bool) -> CookiePolicy {
    CookiePolicy::new(production, issuer.access_ttl(), issuer.refresh_ttl())
}

/// Wire the production dependencies from settings: Postgres store, HTTP
/// email client, bcrypt hasher and token issuer.
pub async fn build_auth_service(settings: &Settings) -> Result<AuthService, AppError> {
    let issuer = TokenIssuer::new(&settings.jwt)?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.connection_string())
        .await?;
    tracing::info!("Database connection pool created");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to run migrations: {}", e)))?;

    let sender = SenderEmail::parse(settings.email_client.sender_email.clone())?;
    let email_client: Arc<dyn EmailSender> = Arc::new(EmailClient::new(
        settings.email_client.base_url.clone(),
        sender,
        settings.email_client.authorization_token.clone(),
        settings.email_client.timeout(),
    )?);

    Ok(AuthService::new(
        Arc::new(PgStore::new(pool)),
        issuer,
        Arc::new(BcryptHasher::new(settings.password.bcrypt_cost)),
        email_client,
        settings.application.base_url.clone(),
        settings.tokens.clone(),
    ))
}

pub fn run(
    listener: TcpListener,
    auth: Arc<AuthService>,
    cookies: CookiePolicy,
) -> Result<Server, std::io::Error> {
    let issuer = auth.issuer().clone();
    let auth = web::Data::from(auth);
    let cookies = web::Data::new(cookies);

    let server = HttpServer::new(move || {
        let json_config = web::JsonConfig::default()
            .limit(16 * 1024)
            .error_handler(|err, _req| {
                tracing::debug!(error = %err, "Rejected request body");
                AppError::Validation(ValidationError::InvalidFormat("request body".to_string()))
                    .into()
            });

        App::new()
            .wrap(LoggerMiddleware)
            .app_data(json_config)
            .app_data(auth.clone())
            .app_data(cookies.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout))
                    .route("/forgot-password", web::post().to(forgot_password))
                    .route("/reset-password", web::post().to(reset_password))
                    .route("/verify-email", web::post().to(verify_email))
                    .route("/resend-verification", web::post().to(resend_verification))
                    .service(
                        web::resource("/me")
                            .wrap(AccessTokenMiddleware::new(issuer.clone()))
                            .route(web::get().to(me)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
