//! Event recording: enrich, redact, persist, then hand off for correlation
//! and notification without waiting on either.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::alerting::NotificationQueue;
use crate::enrichment::Enricher;
use crate::error::{GuardError, GuardResult};
use crate::models::{
    EventType, Notification, NotificationKind, RequestInfo, SecurityEvent, Severity,
};
use crate::persistence::EventStore;

use super::redaction::request_context;

/// What to record, before enrichment and persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub severity: Severity,
    pub description: String,
    pub account_id: Option<String>,
}

impl EventDraft {
    pub fn new(event_type: EventType, severity: Severity, description: impl Into<String>) -> Self {
        EventDraft {
            event_type,
            severity,
            description: description.into(),
            account_id: None,
        }
    }

    pub fn for_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn for_optional_account(mut self, account_id: Option<&str>) -> Self {
        self.account_id = account_id.map(String::from);
        self
    }
}

/// Map an observed HTTP status to the event it implies, if any
pub fn http_status_event(code: u16, request: &RequestInfo) -> Option<EventDraft> {
    match code {
        429 => Some(EventDraft::new(
            EventType::RateLimitExceeded,
            Severity::Medium,
            format!("Rate limit exceeded by {}", request.ip),
        )),
        401 | 403 => Some(EventDraft::new(
            EventType::InvalidToken,
            Severity::High,
            format!("Token validation failed with status {}", code),
        )),
        _ => None,
    }
}

/// Non-blocking handoff of persisted events to the correlation worker
#[derive(Clone)]
pub struct CorrelationQueue {
    tx: mpsc::Sender<SecurityEvent>,
}

impl CorrelationQueue {
    pub fn new(tx: mpsc::Sender<SecurityEvent>) -> Self {
        CorrelationQueue { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (CorrelationQueue::new(tx), rx)
    }

    /// Drops the event with a warning when the worker is behind or gone
    pub fn submit(&self, event: SecurityEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    log::warn!("Correlation queue full, skipping event {}", event.id);
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::warn!("Correlation queue closed");
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Clone)]
pub struct EventRecorder {
    store: Arc<dyn EventStore>,
    enricher: Enricher,
    correlation: Option<CorrelationQueue>,
    notifications: Option<NotificationQueue>,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn EventStore>, enricher: Enricher) -> Self {
        EventRecorder {
            store,
            enricher,
            correlation: None,
            notifications: None,
        }
    }

    pub fn with_correlation(mut self, queue: CorrelationQueue) -> Self {
        self.correlation = Some(queue);
        self
    }

    pub fn with_notifications(mut self, queue: NotificationQueue) -> Self {
        self.notifications = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Persist a security event.
    ///
    /// Enrichment is bounded and best-effort. The write itself is awaited;
    /// a storage failure is returned to the caller. Correlation and
    /// notification are queued afterwards and never fail the call.
    pub async fn record(
        &self,
        draft: EventDraft,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<SecurityEvent> {
        if request.ip.trim().is_empty() {
            return Err(GuardError::Validation("request ip is required".to_string()));
        }

        let enrichment = self.enricher.enrich(&request.ip, &request.user_agent).await;

        let event = SecurityEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: draft.event_type,
            severity: draft.severity,
            description: draft.description,
            account_id: draft.account_id,
            timestamp: now,
            ip: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            location: enrichment.location,
            device: enrichment.device,
            request: request_context(request),
        };

        let stored = self.store.append_event(&event).map_err(|e| {
            log::error!(
                "Failed to persist {} event for {}: {}",
                event.event_type,
                event.ip,
                e
            );
            GuardError::from(e)
        })?;

        log::debug!(
            "Recorded {} ({}) from {}",
            stored.event_type,
            stored.severity,
            stored.ip
        );

        if let Some(ref queue) = self.correlation {
            queue.submit(stored.clone());
        }

        if let (Some(queue), Some(account_id)) = (&self.notifications, &stored.account_id) {
            queue.queue(notification_for(&stored, account_id));
        }

        Ok(stored)
    }
}

pub fn event_title(event_type: EventType) -> &'static str {
    match event_type {
        EventType::LoginSuccess => "New sign-in to your account",
        EventType::LoginFailure => "Failed sign-in attempt",
        EventType::AccountLocked => "Account locked",
        EventType::PasswordChanged => "Password changed",
        EventType::SuspiciousActivity => "Suspicious activity detected",
        EventType::RateLimitExceeded => "Rate limit exceeded",
        EventType::InvalidToken => "Invalid access token",
        EventType::XssAttempt => "Cross-site scripting attempt",
        EventType::InjectionAttempt => "Injection attempt",
        EventType::FileUploadViolation => "Blocked file upload",
    }
}

fn notification_for(event: &SecurityEvent, account_id: &str) -> Notification {
    Notification::new(
        account_id,
        NotificationKind::from(event.event_type),
        event.severity,
        event_title(event.event_type),
        event.description.clone(),
        event.timestamp,
    )
    .with_metadata(serde_json::json!({
        "event_id": event.id,
        "event_type": event.event_type,
        "ip": event.ip,
        "country": event.location.country,
        "city": event.location.city,
        "browser": event.device.browser,
        "os": event.device.os,
    }))
}
