//! Outbound email: the Resend HTTP API and usage notification templates.

use std::time::Duration;

use async_trait::async_trait;
use hookory_models::UsageNotification;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::EmailConfig;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email not configured: RESEND_API_KEY is not set")]
    NotConfigured,

    #[error("Email request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email provider returned {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// A rendered message ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Delivers email. Callers treat delivery as best-effort.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct ResendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Resend API sender.
pub struct ResendSender {
    client: Client,
    config: EmailConfig,
}

impl ResendSender {
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmailSender for ResendSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let api_key = self.config.api_key.as_deref().ok_or(EmailError::NotConfigured)?;

        let response = self
            .client
            .post(format!("{}/emails", self.config.api_base.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&ResendRequest {
                from: &self.config.from,
                to: [&message.to],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: ResendResponse = response.json().await?;
        info!(email_id = ?body.id, "Email sent");
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn wrap(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="font-family: -apple-system, Segoe UI, Roboto, sans-serif; background: #f6f6f7; padding: 24px;">
  <div style="max-width: 560px; margin: 0 auto; background: #ffffff; border-radius: 12px; padding: 32px;">
    {content}
    <p style="color: #888; font-size: 12px; margin-top: 32px;">Hookory</p>
  </div>
</body>
</html>"#
    )
}

fn button(href: &str, label: &str) -> String {
    format!(
        r#"<p style="text-align: center; margin-top: 24px;"><a href="{href}" style="background: #111; color: #fff; padding: 12px 24px; border-radius: 8px; text-decoration: none;">{label}</a></p>"#
    )
}

/// Render the email for a usage notification.
pub fn usage_notification_email(
    kind: UsageNotification,
    to: &str,
    name: &str,
    usage_limit: u32,
    app_url: &str,
) -> EmailMessage {
    let name = escape_html(name);
    let app_url = app_url.trim_end_matches('/');

    let (subject, html) = match kind {
        UsageNotification::Warning => {
            let remaining = usage_limit / 5;
            let content = format!(
                "<h2>Heads Up: You're Crushing It!</h2>\
                 <p>Hi {name},</p>\
                 <p>You've used <strong>80%</strong> of your monthly generations.</p>\
                 <p>You have about <strong>{remaining}</strong> generations left before you hit your limit.</p>\
                 {}",
                button(&format!("{}/dashboard", app_url), "Check Usage")
            );
            (
                "Heads Up: You've used 80% of your limit",
                wrap("Usage Alert: 80% Used", &content),
            )
        }
        UsageNotification::LimitReached => {
            let content = format!(
                "<h2>You've Maxed Out!</h2>\
                 <p>Hi {name},</p>\
                 <p>You've used <strong>100%</strong> of your monthly generations.</p>\
                 <p>Generation is paused until your next cycle, or until you upgrade.</p>\
                 {}",
                button(&format!("{}/usage", app_url), "Upgrade Now")
            );
            (
                "Action Required: Monthly Limit Reached",
                wrap("Action Required: Monthly Limit Reached", &content),
            )
        }
    };

    EmailMessage {
        to: to.to_string(),
        subject: subject.to_string(),
        html,
    }
}
