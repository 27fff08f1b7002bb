//! Trusted and blocked device registry
//!
//! A device is trusted, blocked, or neither. The two classifications share a
//! single stored status per `(account, device)`, so they can never overlap;
//! moving between them is one conditional write.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::alerting::NotificationQueue;
use crate::audit::AuditService;
use crate::error::{GuardError, GuardResult};
use crate::models::{
    AuditAction, AuditCategory, AuditEntry, DeviceStatus, DeviceTrustState, Notification,
    NotificationKind, Severity,
};
use crate::persistence::AccountStore;

fn status_value(status: Option<DeviceStatus>) -> serde_json::Value {
    match status {
        Some(s) => json!({ "status": s.as_str() }),
        None => json!({ "status": "unclassified" }),
    }
}

#[derive(Clone)]
pub struct DeviceRegistry {
    accounts: Arc<dyn AccountStore>,
    audit: AuditService,
    notifications: Option<NotificationQueue>,
}

impl DeviceRegistry {
    pub fn new(accounts: Arc<dyn AccountStore>, audit: AuditService) -> Self {
        DeviceRegistry {
            accounts,
            audit,
            notifications: None,
        }
    }

    pub fn with_notifications(mut self, queue: NotificationQueue) -> Self {
        self.notifications = Some(queue);
        self
    }

    pub fn list(&self, account_id: &str) -> GuardResult<DeviceTrustState> {
        Ok(self.accounts.device_trust_state(account_id)?)
    }

    /// Trust a device seen in one of the account's sessions
    pub fn trust(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<()> {
        let current = self.known_status(account_id, device_id)?;
        match current {
            Some(DeviceStatus::Trusted) => {
                return Err(GuardError::Conflict(format!(
                    "device {} is already trusted",
                    device_id
                )))
            }
            Some(DeviceStatus::Blocked) => {
                return Err(GuardError::Conflict(format!(
                    "device {} is blocked; unblock it first",
                    device_id
                )))
            }
            None => {}
        }

        self.transition(account_id, device_id, current, Some(DeviceStatus::Trusted), now)?;
        self.announce(
            account_id,
            device_id,
            current,
            Some(DeviceStatus::Trusted),
            "Device trusted",
            Severity::Medium,
            now,
        );
        Ok(())
    }

    pub fn untrust(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<()> {
        let current = self.accounts.device_status(account_id, device_id)?;
        if current != Some(DeviceStatus::Trusted) {
            return Err(GuardError::NotFound(format!(
                "device {} is not trusted",
                device_id
            )));
        }

        self.transition(account_id, device_id, current, None, now)?;
        self.announce(account_id, device_id, current, None, "Device trust removed", Severity::Medium, now);
        Ok(())
    }

    /// Block a device and end every active session bound to it.
    ///
    /// A trusted device loses its trust in the same write.
    pub fn block(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<usize> {
        let current = self.known_status(account_id, device_id)?;
        if current == Some(DeviceStatus::Blocked) {
            return Err(GuardError::Conflict(format!(
                "device {} is already blocked",
                device_id
            )));
        }

        self.transition(account_id, device_id, current, Some(DeviceStatus::Blocked), now)?;
        let ended = self.accounts.end_device_sessions(account_id, device_id)?;
        log::info!(
            "Blocked device {} for account {}, ended {} session(s)",
            device_id,
            account_id,
            ended
        );

        self.announce(
            account_id,
            device_id,
            current,
            Some(DeviceStatus::Blocked),
            "Device blocked",
            Severity::High,
            now,
        );
        Ok(ended)
    }

    pub fn unblock(&self, account_id: &str, device_id: &str, now: DateTime<Utc>) -> GuardResult<()> {
        let current = self.accounts.device_status(account_id, device_id)?;
        if current != Some(DeviceStatus::Blocked) {
            return Err(GuardError::NotFound(format!(
                "device {} is not blocked",
                device_id
            )));
        }

        self.transition(account_id, device_id, current, None, now)?;
        self.announce(account_id, device_id, current, None, "Device unblocked", Severity::Medium, now);
        Ok(())
    }

    /// Current status of a device the account has actually used
    fn known_status(&self, account_id: &str, device_id: &str) -> GuardResult<Option<DeviceStatus>> {
        if device_id.is_empty() {
            return Err(GuardError::Validation("device id is required".to_string()));
        }
        let status = self.accounts.device_status(account_id, device_id)?;
        if status.is_none() && !self.accounts.device_known(account_id, device_id)? {
            return Err(GuardError::device_not_found(device_id));
        }
        Ok(status)
    }

    fn transition(
        &self,
        account_id: &str,
        device_id: &str,
        expected: Option<DeviceStatus>,
        next: Option<DeviceStatus>,
        now: DateTime<Utc>,
    ) -> GuardResult<()> {
        if self
            .accounts
            .transition_device(account_id, device_id, expected, next, now)?
        {
            Ok(())
        } else {
            Err(GuardError::Conflict(format!(
                "device {} changed concurrently",
                device_id
            )))
        }
    }

    /// Audit the change and queue a notification. Neither fails the change.
    #[allow(clippy::too_many_arguments)]
    fn announce(
        &self,
        account_id: &str,
        device_id: &str,
        before: Option<DeviceStatus>,
        after: Option<DeviceStatus>,
        title: &str,
        severity: Severity,
        now: DateTime<Utc>,
    ) {
        let entry = AuditEntry::new(AuditAction::SettingsChange, AuditCategory::Security)
            .account(account_id)
            .target("device", device_id)
            .change(Some(status_value(before)), Some(status_value(after)), title);
        if let Err(e) = self.audit.log(entry, now) {
            log::error!("Failed to audit device change for {}: {}", account_id, e);
        }

        if let Some(queue) = &self.notifications {
            let notification = Notification::new(
                account_id,
                NotificationKind::SecurityEvents,
                severity,
                title,
                format!("{}: {}", title, device_id),
                now,
            )
            .with_metadata(json!({ "device_id": device_id }));
            queue.queue(notification);
        }
    }
}
