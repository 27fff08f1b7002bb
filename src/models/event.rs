use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of security event recorded in the event store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    LoginSuccess,
    LoginFailure,
    AccountLocked,
    PasswordChanged,
    SuspiciousActivity,
    RateLimitExceeded,
    InvalidToken,
    XssAttempt,
    InjectionAttempt,
    FileUploadViolation,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::LoginSuccess,
        EventType::LoginFailure,
        EventType::AccountLocked,
        EventType::PasswordChanged,
        EventType::SuspiciousActivity,
        EventType::RateLimitExceeded,
        EventType::InvalidToken,
        EventType::XssAttempt,
        EventType::InjectionAttempt,
        EventType::FileUploadViolation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LoginSuccess => "LOGIN_SUCCESS",
            EventType::LoginFailure => "LOGIN_FAILURE",
            EventType::AccountLocked => "ACCOUNT_LOCKED",
            EventType::PasswordChanged => "PASSWORD_CHANGED",
            EventType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            EventType::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            EventType::InvalidToken => "INVALID_TOKEN",
            EventType::XssAttempt => "XSS_ATTEMPT",
            EventType::InjectionAttempt => "INJECTION_ATTEMPT",
            EventType::FileUploadViolation => "FILE_UPLOAD_VIOLATION",
        }
    }

    /// Login-related events are routed to the login-attempts notification toggle
    pub fn is_login_related(&self) -> bool {
        matches!(
            self,
            EventType::LoginSuccess | EventType::LoginFailure | EventType::AccountLocked
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

/// Event severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn is_elevated(&self) -> bool {
        *self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Location resolved from the client IP. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedLocation {
    pub country: Option<String>,
    pub city: Option<String>,
    pub timezone: Option<String>,
}

/// Device descriptor parsed from the user agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedDevice {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
}

/// Redacted snapshot of the request that triggered an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub method: Option<String>,
    pub path: Option<String>,
    pub redacted_headers: BTreeMap<String, String>,
    pub redacted_body: Option<serde_json::Value>,
}

/// Raw request information handed to the recorder by the request layer
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub ip: String,
    pub user_agent: String,
    pub method: Option<String>,
    pub path: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl RequestInfo {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        RequestInfo {
            ip: ip.into(),
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, method: &str, path: &str) -> Self {
        self.method = Some(method.to_string());
        self.path = Some(path.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Immutable security event as persisted in the event store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub description: String,
    pub account_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub location: EnrichedLocation,
    pub device: EnrichedDevice,
    pub request: RequestContext,
}
