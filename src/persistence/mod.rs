//! Persistence module for security telemetry and account state
//!
//! Two append-only collections (security events, audit records) plus the
//! small per-account mutable records owned by the lockout tracker, the
//! device registry and the session guard.

pub mod sqlite_store;

pub use sqlite_store::SqliteStore;

use crate::models::{
    AuditAction, AuditCategory, AuditRecord, DeviceStatus, DeviceTrustState, EventType,
    LoginAttemptState, LoginHistoryEntry, NotificationPreference, SecurityEvent, SessionRecord,
    Severity,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

/// Filter over the security event collection. Date bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<EventType>,
    pub severity: Option<Severity>,
    pub account_id: Option<String>,
    pub ip: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn for_ip_since(ip: &str, since: DateTime<Utc>) -> Self {
        EventQuery {
            ip: Some(ip.to_string()),
            start: Some(since),
            ..Default::default()
        }
    }

    pub fn for_account_since(account_id: &str, since: DateTime<Utc>) -> Self {
        EventQuery {
            account_id: Some(account_id.to_string()),
            start: Some(since),
            ..Default::default()
        }
    }
}

/// Filter over the audit collection. Date bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub category: Option<AuditCategory>,
    pub account_id: Option<String>,
    pub target_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Append-mostly store for security events and audit records.
///
/// Writers never update existing rows. Results are always sorted by
/// timestamp descending.
pub trait EventStore: Send + Sync {
    /// Persist a security event.
    ///
    /// Returns the stored event; its timestamp may be nudged forward so that
    /// an account's trail stays strictly monotonic.
    fn append_event(&self, event: &SecurityEvent) -> Result<SecurityEvent, PersistenceError>;

    fn find_events(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, PersistenceError>;

    /// Count events matching the same predicate as `find_events`, ignoring paging
    fn count_events(&self, query: &EventQuery) -> Result<usize, PersistenceError>;

    /// Persist an audit record, with the same monotonic guarantee as events
    fn append_audit(&self, record: &AuditRecord) -> Result<AuditRecord, PersistenceError>;

    fn find_audits(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, PersistenceError>;

    fn count_audits(&self, query: &AuditQuery) -> Result<usize, PersistenceError>;

    /// Delete every event and audit record strictly older than `cutoff`
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PersistenceError>;
}

/// Per-account mutable state.
///
/// Only the owning components call the mutating methods.
pub trait AccountStore: Send + Sync {
    // =====================
    // Lockout state
    // =====================

    /// Load the lockout state, or a fresh state at version 0
    fn load_login_state(&self, account_id: &str) -> Result<LoginAttemptState, PersistenceError>;

    /// Write `next` only if the stored version still equals `expected_version`.
    ///
    /// Returns false when another writer got there first.
    fn compare_and_swap_login_state(
        &self,
        account_id: &str,
        expected_version: u64,
        next: &LoginAttemptState,
    ) -> Result<bool, PersistenceError>;

    /// Append to the login history, evicting the oldest entries beyond `cap`
    fn append_login_history(
        &self,
        account_id: &str,
        entry: &LoginHistoryEntry,
        cap: usize,
    ) -> Result<(), PersistenceError>;

    /// Login history, most recent first
    fn login_history(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LoginHistoryEntry>, PersistenceError>;

    // =====================
    // Device trust
    // =====================

    fn device_trust_state(&self, account_id: &str) -> Result<DeviceTrustState, PersistenceError>;

    fn device_status(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceStatus>, PersistenceError>;

    /// Move a device from `expected` to `next` in a single step.
    ///
    /// Returns false when the stored status no longer equals `expected`.
    fn transition_device(
        &self,
        account_id: &str,
        device_id: &str,
        expected: Option<DeviceStatus>,
        next: Option<DeviceStatus>,
        at: DateTime<Utc>,
    ) -> Result<bool, PersistenceError>;

    // =====================
    // Sessions
    // =====================

    /// Insert a session unless its device is blocked, checked in the same step.
    ///
    /// Returns false when the device is blocked and nothing was written.
    fn open_session(&self, session: &SessionRecord) -> Result<bool, PersistenceError>;

    fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, PersistenceError>;

    fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), PersistenceError>;

    /// Mark a session inactive; returns false if it was not active
    fn end_session(&self, session_id: &str) -> Result<bool, PersistenceError>;

    /// End every active session bound to a device; returns how many were ended
    fn end_device_sessions(&self, account_id: &str, device_id: &str)
        -> Result<usize, PersistenceError>;

    fn sessions_for_account(
        &self,
        account_id: &str,
        active_only: bool,
    ) -> Result<Vec<SessionRecord>, PersistenceError>;

    /// Whether the device has any active or historical session for the account
    fn device_known(&self, account_id: &str, device_id: &str) -> Result<bool, PersistenceError>;

    // =====================
    // Notification preferences
    // =====================

    fn load_preferences(
        &self,
        account_id: &str,
    ) -> Result<Option<NotificationPreference>, PersistenceError>;

    fn save_preferences(&self, preferences: &NotificationPreference) -> Result<(), PersistenceError>;
}
