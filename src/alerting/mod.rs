//! Notification delivery
//!
//! Producers queue notifications without waiting; the dispatcher task
//! applies each account's preferences and fans out to the enabled
//! channels. Channel failures are logged and never reach the producer.

pub mod channels;
pub mod filter;

pub use channels::{EmailSender, HttpWebhookSender, LogEmailSender, LogPushSender, PushSender, WebhookSender};
pub use filter::{select_channels, should_deliver, DeliveryTarget};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::NotificationConfig;
use crate::models::{Notification, NotificationPreference};
use crate::persistence::AccountStore;

/// Errors that can occur during notification delivery
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Notification channel closed")]
    ChannelClosed,
}

/// The three outbound senders
#[derive(Clone)]
pub struct Channels {
    pub email: Arc<dyn EmailSender>,
    pub webhook: Arc<dyn WebhookSender>,
    pub push: Arc<dyn PushSender>,
}

impl Channels {
    pub fn from_config(config: &NotificationConfig) -> Result<Self, AlertError> {
        Ok(Channels {
            email: Arc::new(LogEmailSender::new(&config.email_from)),
            webhook: Arc::new(HttpWebhookSender::new(Duration::from_secs(
                config.http_timeout_secs,
            ))?),
            push: Arc::new(LogPushSender),
        })
    }
}

/// Outcome of one dispatch, for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub suppressed: bool,
    pub delivered: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

pub struct NotificationDispatcher {
    accounts: Arc<dyn AccountStore>,
    channels: Channels,
    enabled: bool,
}

impl NotificationDispatcher {
    pub fn new(accounts: Arc<dyn AccountStore>, channels: Channels, config: &NotificationConfig) -> Self {
        NotificationDispatcher {
            accounts,
            channels,
            enabled: config.enabled,
        }
    }

    /// Dispatch loop; spawn it as a tokio task
    pub async fn run(self, mut rx: mpsc::Receiver<Notification>) {
        log::info!("Notification dispatcher started");

        while let Some(notification) = rx.recv().await {
            if !self.enabled {
                continue;
            }
            let report = self.dispatch(&notification, Utc::now()).await;
            log::debug!(
                "Notification {:?} for {}: {:?}",
                notification.title,
                notification.account_id,
                report
            );
        }

        log::info!("Notification dispatcher stopped");
    }

    /// Filter and deliver one notification. Never fails; each channel is
    /// attempted on its own.
    pub async fn dispatch(&self, notification: &Notification, now: DateTime<Utc>) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let preferences = match self.accounts.load_preferences(&notification.account_id) {
            Ok(Some(preferences)) => preferences,
            Ok(None) => NotificationPreference::defaults_for(&notification.account_id),
            Err(e) => {
                log::error!(
                    "Could not load notification preferences for {}: {}",
                    notification.account_id,
                    e
                );
                report.suppressed = true;
                return report;
            }
        };

        if !should_deliver(&preferences, notification.kind, notification.severity, now) {
            log::debug!(
                "Suppressed {} notification for {}",
                notification.severity,
                notification.account_id
            );
            report.suppressed = true;
            return report;
        }

        for target in select_channels(&preferences) {
            let channel = target.channel();
            match self.deliver(&target, notification).await {
                Ok(()) => report.delivered.push(channel),
                Err(e) => {
                    log::error!(
                        "{} delivery to {} failed: {}",
                        channel,
                        notification.account_id,
                        e
                    );
                    report.failed.push(channel);
                }
            }
        }

        report
    }

    async fn deliver(&self, target: &DeliveryTarget, notification: &Notification) -> Result<(), AlertError> {
        match target {
            DeliveryTarget::Email(address) => {
                self.channels
                    .email
                    .send_email(
                        address,
                        &channels::email_subject(notification),
                        &channels::email_body(notification),
                    )
                    .await
            }
            DeliveryTarget::Webhook(url) => {
                self.channels
                    .webhook
                    .send_webhook(url, &channels::webhook_payload(notification))
                    .await
            }
            DeliveryTarget::Push(account_id) => {
                self.channels
                    .push
                    .push(account_id, &channels::push_payload(notification))
                    .await
            }
        }
    }
}

/// Sync-friendly handle for queueing notifications
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        NotificationQueue { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (NotificationQueue::new(tx), rx)
    }

    /// Queue without blocking; a full or closed queue drops the notification
    pub fn queue(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            match e {
                mpsc::error::TrySendError::Full(n) => {
                    log::warn!("Notification queue full, dropping alert for {}", n.account_id);
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::warn!("Notification queue closed");
                }
            }
        }
    }

    pub async fn queue_async(&self, notification: Notification) -> Result<(), AlertError> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
