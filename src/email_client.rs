use async_trait::async_trait;
use serde::Serialize;

use crate::error::EmailError;
use crate::validators::parse_email;

/// Outbound email delivery
///
/// Implemented by the HTTP client below; tests provide their own recorder.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), EmailError>;
}

/// HTTP email API client, built once at startup and shared.
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderEmail,
    authorization_token: String,
}

#[derive(Clone, Debug)]
pub struct SenderEmail(String);

impl SenderEmail {
    pub fn parse(s: String) -> Result<Self, EmailError> {
        let email = parse_email(&s)
            .map_err(|e| EmailError::ConfigurationError(format!("sender email: {}", e)))?;
        Ok(Self(email))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SenderEmail,
        authorization_token: String,
        timeout: std::time::Duration,
    ) -> Result<Self, EmailError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmailError::ConfigurationError(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            sender,
            authorization_token,
        })
    }
}

#[async_trait]
impl EmailSender for EmailClient {
    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), EmailError> {
        let url = format!("{}/email", self.base_url.trim_end_matches('/'));
        let request = SendEmailRequest {
            from: self.sender.inner(),
            to: recipient,
            subject,
            html_body: html_content,
            text_body: text_content,
        };

        self.http_client
            .post(&url)
            .header("X-Server-Token", &self.authorization_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    EmailError::ServiceUnavailable(e.to_string())
                } else {
                    EmailError::SendFailed(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| EmailError::SendFailed(format!("Email service error: {}", e)))?;

        Ok(())
    }
}

/// A rendered message ready for an `EmailSender`
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn verification_email(display_name: &str, link: &str, ttl_minutes: i64) -> EmailMessage {
    EmailMessage {
        subject: "Verify your LiftLog email".to_string(),
        html: format!(
            "<p>Hi {},</p>\
             <p>Confirm your email to start logging workouts:</p>\
             <p><a href=\"{}\">Verify email</a></p>\
             <p>This link expires in {} minutes.</p>",
            html_escape(display_name),
            link,
            ttl_minutes
        ),
        text: format!(
            "Hi {},\n\nConfirm your email to start logging workouts:\n{}\n\nThis link expires in {} minutes.",
            display_name, link, ttl_minutes
        ),
    }
}

pub fn password_reset_email(display_name: &str, link: &str, ttl_minutes: i64) -> EmailMessage {
    EmailMessage {
        subject: "Reset your LiftLog password".to_string(),
        html: format!(
            "<p>Hi {},</p>\
             <p>Someone asked to reset your password. If it was you, use the link below:</p>\
             <p><a href=\"{}\">Reset password</a></p>\
             <p>This link expires in {} minutes. If you did not ask for this, ignore this email.</p>",
            html_escape(display_name),
            link,
            ttl_minutes
        ),
        text: format!(
            "Hi {},\n\nSomeone asked to reset your password. If it was you, use the link below:\n{}\n\n\
             This link expires in {} minutes. If you did not ask for this, ignore this email.",
            display_name, link, ttl_minutes
        ),
    }
}

/// `{base_url}/{path}?token={token}`
pub fn action_link(base_url: &str, path: &str, token: &str) -> String {
    format!(
        "{}/{}?token={}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/'),
        urlencoding::encode(token)
    )
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
