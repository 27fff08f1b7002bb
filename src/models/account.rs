use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-account lockout counters.
///
/// `version` is bumped on every successful write and is the token used by
/// the store's compare-and-swap update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptState {
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub version: u64,
}

impl LoginAttemptState {
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if now < until)
    }
}

/// One entry of the bounded per-account login history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub success: bool,
    pub country: Option<String>,
    pub timezone: Option<String>,
}

/// An authenticated session bound to a device fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub account_id: String,
    pub device_id: String,
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Trusted,
    Blocked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Trusted => "trusted",
            DeviceStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trusted" => Some(DeviceStatus::Trusted),
            "blocked" => Some(DeviceStatus::Blocked),
            _ => None,
        }
    }
}

/// Snapshot of an account's trusted and blocked device sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTrustState {
    pub trusted_devices: Vec<String>,
    pub blocked_devices: Vec<String>,
}

impl DeviceTrustState {
    pub fn is_trusted(&self, device_id: &str) -> bool {
        self.trusted_devices.iter().any(|d| d == device_id)
    }

    pub fn is_blocked(&self, device_id: &str) -> bool {
        self.blocked_devices.iter().any(|d| d == device_id)
    }
}
