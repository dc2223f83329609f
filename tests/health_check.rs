//! Smoke test for the server wiring

use std::net::TcpListener;
use std::sync::Arc;

use async_trait::async_trait;
use liftlog::auth::{AuthService, BcryptHasher, TokenIssuer};
use liftlog::configuration::{JwtSettings, TokenSettings};
use liftlog::email_client::EmailSender;
use liftlog::error::EmailError;
use liftlog::startup::{cookie_policy, run};
use liftlog::storage::InMemoryStore;

struct NullMailer;

#[async_trait]
impl EmailSender for NullMailer {
    async fn send_email(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), EmailError> {
        Ok(())
    }
}

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let issuer = TokenIssuer::new(&JwtSettings {
        access_secret: "access-secret-key-at-least-32-characters".to_string(),
        refresh_secret: "refresh-secret-key-at-least-32-characters".to_string(),
        issuer: "test".to_string(),
        access_token_ttl: "15m".to_string(),
        refresh_token_ttl_days: 30,
    })
    .expect("Failed to build issuer");
    let cookies = cookie_policy(&issuer, false);

    let auth = AuthService::new(
        Arc::new(InMemoryStore::new()),
        issuer,
        Arc::new(BcryptHasher::new(4)),
        Arc::new(NullMailer),
        "http://localhost".to_string(),
        TokenSettings {
            email_verification_ttl_minutes: 60,
            password_reset_ttl_minutes: 30,
        },
    );

    let server = run(listener, Arc::new(auth), cookies).expect("Failed to create server");
    let _ = tokio::spawn(server);

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/workouts", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(404, response.status().as_u16());
}
