//! Shared fixtures for unit tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alerting::{AlertError, Channels, EmailSender, PushSender, WebhookSender};
use crate::enrichment::{Enricher, GeoResolver};
use crate::models::{
    DeviceStatus, DeviceTrustState, EnrichedLocation, LoginAttemptState, LoginHistoryEntry,
    NotificationPreference, SessionRecord,
};
use crate::persistence::{AccountStore, PersistenceError, SqliteStore};

/// 2024-03-15 12:00:00 UTC
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

#[derive(Default)]
pub struct StaticGeoResolver {
    table: HashMap<IpAddr, EnrichedLocation>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        StaticGeoResolver::default()
    }

    pub fn with(mut self, ip: &str, country: &str, timezone: &str) -> Self {
        self.table.insert(
            ip.parse().unwrap(),
            EnrichedLocation {
                country: Some(country.to_string()),
                city: None,
                timezone: Some(timezone.to_string()),
            },
        );
        self
    }
}

impl GeoResolver for StaticGeoResolver {
    fn resolve(&self, ip: &IpAddr) -> Option<EnrichedLocation> {
        self.table.get(ip).cloned()
    }
}

pub struct SlowGeoResolver {
    delay: Duration,
}

impl SlowGeoResolver {
    pub fn new(delay: Duration) -> Self {
        SlowGeoResolver { delay }
    }
}

impl GeoResolver for SlowGeoResolver {
    fn resolve(&self, _ip: &IpAddr) -> Option<EnrichedLocation> {
        std::thread::sleep(self.delay);
        Some(EnrichedLocation {
            country: Some("ZZ".to_string()),
            ..Default::default()
        })
    }
}

/// Enricher resolving a handful of fixed addresses
pub fn test_enricher() -> Enricher {
    let geo = StaticGeoResolver::new()
        .with("1.2.3.4", "KR", "Asia/Seoul")
        .with("8.8.8.8", "US", "America/New_York")
        .with("5.6.7.8", "DE", "Europe/Berlin");
    Enricher::new(Some(Arc::new(geo)), Duration::from_secs(2)).unwrap()
}

type Sent<T> = Arc<Mutex<Vec<T>>>;

/// Channel senders that remember what they were asked to send
#[derive(Clone, Default)]
pub struct RecordingChannels {
    emails: Sent<(String, String, String)>,
    webhooks: Sent<(String, Value)>,
    pushes: Sent<(String, Value)>,
    email_fails: Arc<AtomicBool>,
}

impl RecordingChannels {
    pub fn new() -> Self {
        RecordingChannels::default()
    }

    pub fn channels(&self) -> Channels {
        Channels {
            email: Arc::new(self.clone()),
            webhook: Arc::new(self.clone()),
            push: Arc::new(self.clone()),
        }
    }

    pub fn fail_email(&self) {
        self.email_fails.store(true, Ordering::SeqCst);
    }

    pub fn emails(&self) -> Vec<(String, String, String)> {
        self.emails.lock().unwrap().clone()
    }

    pub fn webhooks(&self) -> Vec<(String, Value)> {
        self.webhooks.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<(String, Value)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingChannels {
    async fn send_email(&self, address: &str, subject: &str, html: &str) -> Result<(), AlertError> {
        if self.email_fails.load(Ordering::SeqCst) {
            return Err(AlertError::Rejected("smtp unavailable".to_string()));
        }
        self.emails
            .lock()
            .unwrap()
            .push((address.to_string(), subject.to_string(), html.to_string()));
        Ok(())
    }
}

#[async_trait]
impl WebhookSender for RecordingChannels {
    async fn send_webhook(&self, url: &str, payload: &Value) -> Result<(), AlertError> {
        self.webhooks
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        Ok(())
    }
}

#[async_trait]
impl PushSender for RecordingChannels {
    async fn push(&self, account_id: &str, payload: &Value) -> Result<(), AlertError> {
        self.pushes
            .lock()
            .unwrap()
            .push((account_id.to_string(), payload.clone()));
        Ok(())
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Account store that runs a one-shot hook right before selected writes,
/// standing in for a competing writer landing at that exact point
pub struct HookedAccountStore {
    inner: Arc<SqliteStore>,
    before_open: Mutex<Option<Hook>>,
    before_swap: Mutex<Option<Hook>>,
    reject_swaps: AtomicBool,
    swap_attempts: AtomicUsize,
}

impl HookedAccountStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        HookedAccountStore {
            inner,
            before_open: Mutex::new(None),
            before_swap: Mutex::new(None),
            reject_swaps: AtomicBool::new(false),
            swap_attempts: AtomicUsize::new(0),
        }
    }

    pub fn before_next_open(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_open.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn before_next_swap(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_swap.lock().unwrap() = Some(Box::new(hook));
    }

    /// Every later swap reports a lost race without writing
    pub fn reject_swaps(&self) {
        self.reject_swaps.store(true, Ordering::SeqCst);
    }

    pub fn swap_attempts(&self) -> usize {
        self.swap_attempts.load(Ordering::SeqCst)
    }

    fn fire(slot: &Mutex<Option<Hook>>) {
        let hook = slot.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl AccountStore for HookedAccountStore {
    fn load_login_state(&self, account_id: &str) -> Result<LoginAttemptState, PersistenceError> {
        self.inner.load_login_state(account_id)
    }

    fn compare_and_swap_login_state(
        &self,
        account_id: &str,
        expected_version: u64,
        next: &LoginAttemptState,
    ) -> Result<bool, PersistenceError> {
        self.swap_attempts.fetch_add(1, Ordering::SeqCst);
        Self::fire(&self.before_swap);
        if self.reject_swaps.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner
            .compare_and_swap_login_state(account_id, expected_version, next)
    }

    fn append_login_history(
        &self,
        account_id: &str,
        entry: &LoginHistoryEntry,
        cap: usize,
    ) -> Result<(), PersistenceError> {
        self.inner.append_login_history(account_id, entry, cap)
    }

    fn login_history(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LoginHistoryEntry>, PersistenceError> {
        self.inner.login_history(account_id, limit)
    }

    fn device_trust_state(&self, account_id: &str) -> Result<DeviceTrustState, PersistenceError> {
        self.inner.device_trust_state(account_id)
    }

    fn device_status(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceStatus>, PersistenceError> {
        self.inner.device_status(account_id, device_id)
    }

    fn transition_device(
        &self,
        account_id: &str,
        device_id: &str,
        expected: Option<DeviceStatus>,
        next: Option<DeviceStatus>,
        at: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        self.inner
            .transition_device(account_id, device_id, expected, next, at)
    }

    fn open_session(&self, session: &SessionRecord) -> Result<bool, PersistenceError> {
        Self::fire(&self.before_open);
        self.inner.open_session(session)
    }

    fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        self.inner.get_session(session_id)
    }

    fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.inner.touch_session(session_id, at)
    }

    fn end_session(&self, session_id: &str) -> Result<bool, PersistenceError> {
        self.inner.end_session(session_id)
    }

    fn end_device_sessions(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<usize, PersistenceError> {
        self.inner.end_device_sessions(account_id, device_id)
    }

    fn sessions_for_account(
        &self,
        account_id: &str,
        active_only: bool,
    ) -> Result<Vec<SessionRecord>, PersistenceError> {
        self.inner.sessions_for_account(account_id, active_only)
    }

    fn device_known(&self, account_id: &str, device_id: &str) -> Result<bool, PersistenceError> {
        self.inner.device_known(account_id, device_id)
    }

    fn load_preferences(
        &self,
        account_id: &str,
    ) -> Result<Option<NotificationPreference>, PersistenceError> {
        self.inner.load_preferences(account_id)
    }

    fn save_preferences(&self, preferences: &NotificationPreference) -> Result<(), PersistenceError> {
        self.inner.save_preferences(preferences)
    }
}
