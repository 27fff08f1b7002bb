//! Outbound channel senders.
//!
//! Mail transport and the realtime push fabric live outside this crate;
//! the log-backed senders stand in for them until a real one is wired up.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::AlertError;
use crate::models::Notification;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, address: &str, subject: &str, html: &str) -> Result<(), AlertError>;
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send_webhook(&self, url: &str, payload: &Value) -> Result<(), AlertError>;
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn push(&self, account_id: &str, payload: &Value) -> Result<(), AlertError>;
}

/// POSTs the payload as JSON
pub struct HttpWebhookSender {
    client: Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpWebhookSender { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send_webhook(&self, url: &str, payload: &Value) -> Result<(), AlertError> {
        let response = self.client.post(url).json(payload).send().await?;

        if !response.status().is_success() {
            return Err(AlertError::Rejected(format!(
                "webhook {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

pub struct LogEmailSender {
    from: String,
}

impl LogEmailSender {
    pub fn new(from: &str) -> Self {
        LogEmailSender {
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_email(&self, address: &str, subject: &str, html: &str) -> Result<(), AlertError> {
        log::info!(
            "Email from {} to {}: {} ({} bytes)",
            self.from,
            address,
            subject,
            html.len()
        );
        Ok(())
    }
}

pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn push(&self, account_id: &str, payload: &Value) -> Result<(), AlertError> {
        log::info!("Push to {}: {}", account_id, payload);
        Ok(())
    }
}

pub fn email_subject(notification: &Notification) -> String {
    format!("[Security Alert] {}", notification.title)
}

pub fn email_body(notification: &Notification) -> String {
    format!(
        "<h2>{}</h2>\n<p>{}</p>\n<p><small>Severity: {} &middot; {}</small></p>\n",
        escape_html(&notification.title),
        escape_html(&notification.message),
        notification.severity,
        notification.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

pub fn webhook_payload(notification: &Notification) -> Value {
    serde_json::json!({
        "type": "security_notification",
        "account_id": notification.account_id,
        "kind": notification.kind,
        "severity": notification.severity,
        "title": notification.title,
        "message": notification.message,
        "metadata": notification.metadata,
        "timestamp": notification.created_at.to_rfc3339(),
    })
}

pub fn push_payload(notification: &Notification) -> Value {
    serde_json::json!({
        "title": notification.title,
        "message": notification.message,
        "severity": notification.severity,
        "timestamp": notification.created_at.to_rfc3339(),
    })
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
