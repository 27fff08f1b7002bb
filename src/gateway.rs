//! The entry points the request-handling layer calls
//!
//! `SecurityGateway` wires every component to one store and owns the
//! background workers (correlation and notification dispatch). Call
//! `spawn_workers` once from inside a tokio runtime.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::alerting::{AlertError, Channels, NotificationDispatcher, NotificationQueue};
use crate::audit::{AuditService, Dashboard};
use crate::config::{Config, ConfigError};
use crate::detection::inspection::InspectionError;
use crate::detection::{
    http_status_event, CorrelationQueue, Correlator, EventDraft, EventRecorder, PayloadInspector,
    RequestPayload,
};
use crate::devices::DeviceRegistry;
use crate::enrichment::Enricher;
use crate::error::GuardResult;
use crate::lockout::{LockoutDecision, LoginTracker};
use crate::models::{
    AuditEntry, AuditMetadata, AuditRecord, DeviceTrustState, LoginHistoryEntry, Notification,
    RequestInfo, RiskAssessment, SecurityEvent, SessionRecord, Severity,
};
use crate::persistence::{PersistenceError, SqliteStore};
use crate::risk::RiskEngine;
use crate::session::SessionGuard;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage setup failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("User agent patterns failed to compile: {0}")]
    UserAgent(#[from] regex::Error),

    #[error("Inspection rules failed to compile: {0}")]
    Inspection(#[from] InspectionError),

    #[error("Notification channels failed to initialize: {0}")]
    Channels(#[from] AlertError),
}

/// Workers waiting for a runtime
struct PendingWorkers {
    correlator: Correlator,
    correlation_rx: mpsc::Receiver<SecurityEvent>,
    dispatcher: NotificationDispatcher,
    notification_rx: mpsc::Receiver<Notification>,
}

pub struct SecurityGateway {
    recorder: EventRecorder,
    sessions: SessionGuard,
    logins: LoginTracker,
    devices: DeviceRegistry,
    risk: RiskEngine,
    audit: AuditService,
    dashboard: Dashboard,
    inspector: PayloadInspector,
    workers: Option<PendingWorkers>,
}

impl SecurityGateway {
    /// Open the configured database and build every component
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        config.validate()?;
        let store = Arc::new(SqliteStore::new(&config.storage.database_path)?);
        let enricher = Enricher::from_config(&config.enrichment)?;
        let channels = Channels::from_config(&config.notifications)?;
        log::info!(
            "Security store opened at {}",
            config.storage.database_path.display()
        );
        Self::assemble(store, enricher, channels, config)
    }

    /// Build on an existing store with explicit collaborators
    pub fn assemble(
        store: Arc<SqliteStore>,
        enricher: Enricher,
        channels: Channels,
        config: &Config,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let (correlation_queue, correlation_rx) =
            CorrelationQueue::channel(config.correlation.queue_capacity);
        let (notification_queue, notification_rx) =
            NotificationQueue::channel(config.notifications.queue_capacity);

        let correlator = Correlator::new(store.clone(), config.correlation.clone());
        let recorder = EventRecorder::new(store.clone(), enricher)
            .with_correlation(correlation_queue)
            .with_notifications(notification_queue.clone());
        let audit = AuditService::new(store.clone(), config.retention.clone());

        let gateway = SecurityGateway {
            sessions: SessionGuard::new(store.clone(), recorder.clone()),
            logins: LoginTracker::new(store.clone(), recorder.clone(), config.lockout.clone()),
            devices: DeviceRegistry::new(store.clone(), audit.clone())
                .with_notifications(notification_queue.clone()),
            risk: RiskEngine::new(store.clone(), config.risk.clone())
                .with_correlator(correlator.clone())
                .with_notifications(notification_queue),
            dashboard: Dashboard::new(store.clone()),
            inspector: PayloadInspector::from_config(&config.inspection)?,
            workers: Some(PendingWorkers {
                correlator,
                correlation_rx,
                dispatcher: NotificationDispatcher::new(store, channels, &config.notifications),
                notification_rx,
            }),
            recorder,
            audit,
        };
        Ok(gateway)
    }

    /// Start the correlation and notification workers.
    ///
    /// Only the first call spawns anything.
    pub fn spawn_workers(&mut self) -> Vec<JoinHandle<()>> {
        match self.workers.take() {
            Some(workers) => vec![
                tokio::spawn(workers.correlator.run(workers.correlation_rx)),
                tokio::spawn(workers.dispatcher.run(workers.notification_rx)),
            ],
            None => Vec::new(),
        }
    }

    /// Check a session against the request fingerprint.
    ///
    /// A mismatch ends the session and yields `AuthenticationRequired`.
    pub async fn on_request_authenticated(
        &self,
        session_id: &str,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<SessionRecord> {
        self.sessions
            .verify(session_id, request, now)
            .await?
            .into_result()
    }

    pub async fn on_login_outcome(
        &self,
        account_id: &str,
        success: bool,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<LockoutDecision> {
        let decision = self
            .logins
            .on_login_outcome(account_id, success, request, now)
            .await?;
        self.risk.invalidate(account_id);
        Ok(decision)
    }

    pub async fn on_password_reset(
        &self,
        account_id: &str,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<()> {
        self.logins.on_password_reset(account_id, request, now).await?;
        self.risk.invalidate(account_id);
        Ok(())
    }

    pub fn start_session(
        &self,
        account_id: &str,
        device_id: &str,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<SessionRecord> {
        let session = self.sessions.start(account_id, device_id, request, now)?;
        self.risk.invalidate(account_id);
        Ok(session)
    }

    pub fn end_session(&self, session_id: &str) -> GuardResult<bool> {
        self.sessions.end(session_id)
    }

    pub fn active_sessions(&self, account_id: &str) -> GuardResult<Vec<SessionRecord>> {
        self.sessions.active_sessions(account_id)
    }

    /// Record the event implied by a response status, if any
    pub async fn on_http_status_observed(
        &self,
        code: u16,
        request: &RequestInfo,
        account_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> GuardResult<Option<SecurityEvent>> {
        match http_status_event(code, request) {
            Some(draft) => {
                let draft = draft.for_optional_account(account_id);
                Ok(Some(self.recorder.record(draft, request, now).await?))
            }
            None => Ok(None),
        }
    }

    /// Inspect request input and record one CRITICAL event per hit
    pub async fn on_body_inspected(
        &self,
        payload: &RequestPayload,
        request: &RequestInfo,
        account_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> GuardResult<Vec<SecurityEvent>> {
        let mut events = Vec::new();
        for hit in self.inspector.inspect(payload) {
            log::warn!("{} from {}", hit.describe(), request.ip);
            let draft = EventDraft::new(hit.kind.event_type(), Severity::Critical, hit.describe())
                .for_optional_account(account_id);
            events.push(self.recorder.record(draft, request, now).await?);
        }
        Ok(events)
    }

    /// Post-action audit hook. The handling layer calls this once the
    /// business logic has produced its result.
    pub fn record_outcome(
        &self,
        entry: AuditEntry,
        request: &RequestInfo,
        status: u16,
        now: DateTime<Utc>,
    ) -> GuardResult<AuditRecord> {
        let metadata = AuditMetadata {
            ip: Some(request.ip.clone()),
            user_agent: Some(request.user_agent.clone()),
            path: request.path.clone(),
            method: request.method.clone(),
            status: Some(status),
        };
        self.audit.log(entry.metadata(metadata), now)
    }

    pub fn trust_device(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<()> {
        self.devices.trust(account_id, device_id, now)?;
        self.risk.invalidate(account_id);
        Ok(())
    }

    pub fn untrust_device(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<()> {
        self.devices.untrust(account_id, device_id, now)?;
        self.risk.invalidate(account_id);
        Ok(())
    }

    /// Block a device; returns how many sessions were ended
    pub fn block_device(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<usize> {
        let ended = self.devices.block(account_id, device_id, now)?;
        self.risk.invalidate(account_id);
        Ok(ended)
    }

    pub fn unblock_device(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<()> {
        self.devices.unblock(account_id, device_id, now)?;
        self.risk.invalidate(account_id);
        Ok(())
    }

    pub fn devices(&self, account_id: &str) -> GuardResult<DeviceTrustState> {
        self.devices.list(account_id)
    }

    pub fn login_history(&self, account_id: &str, limit: Option<usize>) -> GuardResult<Vec<LoginHistoryEntry>> {
        self.logins.history(account_id, limit)
    }

    pub fn assess_risk(&self, account_id: &str, now: DateTime<Utc>) -> GuardResult<RiskAssessment> {
        self.risk.assess(account_id, now)
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }
}
