use anyhow::{Context, Result};
use html_escape::encode_text;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::MailConfig;

const BREVO_SEND_URL: &str = "https://api.brevo.com/v3/smtp/email";
const BREVO_TIMEOUT_SECS: u64 = 10;
const LOG_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailKind {
    Verification,
    PasswordReset,
    Welcome,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub kind: EmailKind,
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Transactional mail. Callers treat every send as best-effort.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}

pub fn verification_email(to_email: &str, to_name: &str, link: &str) -> OutgoingEmail {
    OutgoingEmail {
        kind: EmailKind::Verification,
        to_email: to_email.to_string(),
        to_name: to_name.to_string(),
        subject: "Verify your Chatter email address".to_string(),
        html: format!(
            "<p>Hi {name},</p><p>Please confirm your email address to finish setting up your Chatter account.</p>\
             <p><a href=\"{link}\">Verify email</a></p><p>This link expires in 24 hours.</p>",
            name = encode_text(to_name),
            link = link
        ),
        text: format!(
            "Hi {},\n\nConfirm your email address to finish setting up your Chatter account:\n{}\n\nThis link expires in 24 hours.",
            to_name, link
        ),
    }
}

pub fn password_reset_email(to_email: &str, to_name: &str, link: &str) -> OutgoingEmail {
    OutgoingEmail {
        kind: EmailKind::PasswordReset,
        to_email: to_email.to_string(),
        to_name: to_name.to_string(),
        subject: "Reset your Chatter password".to_string(),
        html: format!(
            "<p>Hi {name},</p><p>We received a request to reset your password.</p>\
             <p><a href=\"{link}\">Choose a new password</a></p>\
             <p>This link expires in 1 hour. If you did not ask for a reset you can ignore this email.</p>",
            name = encode_text(to_name),
            link = link
        ),
        text: format!(
            "Hi {},\n\nReset your password here:\n{}\n\nThis link expires in 1 hour. If you did not ask for a reset you can ignore this email.",
            to_name, link
        ),
    }
}

pub fn welcome_email(to_email: &str, to_name: &str, app_url: &str) -> OutgoingEmail {
    OutgoingEmail {
        kind: EmailKind::Welcome,
        to_email: to_email.to_string(),
        to_name: to_name.to_string(),
        subject: "Welcome to Chatter".to_string(),
        html: format!(
            "<p>Hi {name},</p><p>Welcome to Chatter! ChatterBot is waiting in your conversations to show you around.</p>\
             <p><a href=\"{url}\">Open Chatter</a></p>",
            name = encode_text(to_name),
            url = app_url
        ),
        text: format!(
            "Hi {},\n\nWelcome to Chatter! ChatterBot is waiting in your conversations to show you around.\n{}",
            to_name, app_url
        ),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoSendEmailBody {
    sender: BrevoEmailAddress,
    to: Vec<BrevoEmailAddress>,
    subject: String,
    html_content: String,
    text_content: String,
}

/// Sends mail through the Brevo transactional API.
pub struct BrevoMailer {
    http: reqwest::Client,
    api_key: String,
    sender_email: String,
    sender_name: String,
}

impl BrevoMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let api_key = config
            .brevo_api_key
            .clone()
            .context("BREVO_API_KEY is required")?;
        let sender_email = config
            .sender_email
            .clone()
            .context("BREVO_SENDER_EMAIL is required")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(BREVO_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client for Brevo")?;
        Ok(Self {
            http,
            api_key,
            sender_email,
            sender_name: config.sender_name.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Mailer for BrevoMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        let body = BrevoSendEmailBody {
            sender: BrevoEmailAddress {
                email: self.sender_email.clone(),
                name: Some(self.sender_name.clone()),
            },
            to: vec![BrevoEmailAddress {
                email: email.to_email,
                name: Some(email.to_name),
            }],
            subject: email.subject,
            html_content: email.html,
            text_content: email.text,
        };

        let resp = self
            .http
            .post(BREVO_SEND_URL)
            .header("api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("Brevo request failed")?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(kind = ?email.kind, "Email accepted by Brevo");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Brevo send failed (status={}): {}", status.as_u16(), body)
    }
}

/// Mailer for deployments without Brevo credentials. Emails are logged
/// (without links) and the most recent ones kept in memory.
#[derive(Default)]
pub struct LogMailer {
    outbox: Mutex<Vec<OutgoingEmail>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retained emails, oldest first.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        tracing::info!(
            kind = ?email.kind,
            subject = %email.subject,
            "Mail delivery not configured; email logged only"
        );
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| anyhow::anyhow!("outbox lock poisoned"))?;
        if outbox.len() == LOG_OUTBOX_CAPACITY {
            outbox.remove(0);
        }
        outbox.push(email);
        Ok(())
    }
}
