use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{EventType, Severity};

/// Notification topic, gated by the per-account event type toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SecurityEvents,
    LoginAttempts,
    SystemAlerts,
    AuditLogs,
}

impl From<EventType> for NotificationKind {
    fn from(event_type: EventType) -> Self {
        if event_type.is_login_related() {
            NotificationKind::LoginAttempts
        } else {
            NotificationKind::SecurityEvents
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailChannel {
    pub enabled: bool,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookChannel {
    pub enabled: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushChannel {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeFlags {
    pub security_events: bool,
    pub login_attempts: bool,
    pub system_alerts: bool,
    pub audit_logs: bool,
}

impl EventTypeFlags {
    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::SecurityEvents => self.security_events,
            NotificationKind::LoginAttempts => self.login_attempts,
            NotificationKind::SystemAlerts => self.system_alerts,
            NotificationKind::AuditLogs => self.audit_logs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityFlags {
    pub low: bool,
    pub medium: bool,
    pub high: bool,
    pub critical: bool,
}

impl SeverityFlags {
    pub fn allows(&self, severity: Severity) -> bool {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }
}

/// Time-of-day window in the account's timezone; `end` is exclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: String,
}

/// Per-account notification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub account_id: String,
    /// Gates the risk-engine security alert
    pub login_notifications: bool,
    pub email: EmailChannel,
    pub webhook: WebhookChannel,
    pub push: PushChannel,
    pub event_types: EventTypeFlags,
    pub severities: SeverityFlags,
    pub quiet_hours: QuietHours,
}

impl NotificationPreference {
    pub fn defaults_for(account_id: &str) -> Self {
        NotificationPreference {
            account_id: account_id.to_string(),
            login_notifications: true,
            email: EmailChannel {
                enabled: true,
                address: None,
            },
            webhook: WebhookChannel {
                enabled: false,
                url: None,
            },
            push: PushChannel { enabled: true },
            event_types: EventTypeFlags {
                security_events: true,
                login_attempts: true,
                system_alerts: true,
                audit_logs: false,
            },
            severities: SeverityFlags {
                low: false,
                medium: true,
                high: true,
                critical: true,
            },
            quiet_hours: QuietHours {
                enabled: false,
                start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
                end: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
                timezone: "Asia/Seoul".to_string(),
            },
        }
    }
}

/// Candidate notification handed to the dispatch filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub account_id: String,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        account_id: &str,
        kind: NotificationKind,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Notification {
            account_id: account_id.to_string(),
            kind,
            severity,
            title: title.into(),
            message: message.into(),
            metadata: serde_json::Value::Null,
            created_at,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
