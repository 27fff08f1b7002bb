//! Session integrity guard
//!
//! A session is bound to the `(user agent, ip)` fingerprint it was created
//! with. Equality is exact: a client whose address changes mid-session
//! (carrier NAT rotation, mobile handoff) is forced to sign in again.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::detection::{EventDraft, EventRecorder};
use crate::error::{GuardError, GuardResult};
use crate::models::{EventType, RequestInfo, SessionRecord, Severity};
use crate::persistence::AccountStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionVerdict {
    Valid(SessionRecord),
    Invalid { reason: String },
}

impl SessionVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionVerdict::Valid(_))
    }

    /// Turn a rejection into the authentication-required error the caller must surface
    pub fn into_result(self) -> GuardResult<SessionRecord> {
        match self {
            SessionVerdict::Valid(session) => Ok(session),
            SessionVerdict::Invalid { reason } => Err(GuardError::AuthenticationRequired(reason)),
        }
    }
}

pub fn fingerprint_matches(session: &SessionRecord, request: &RequestInfo) -> bool {
    session.user_agent == request.user_agent && session.ip == request.ip
}

#[derive(Clone)]
pub struct SessionGuard {
    accounts: Arc<dyn AccountStore>,
    recorder: EventRecorder,
}

impl SessionGuard {
    pub fn new(accounts: Arc<dyn AccountStore>, recorder: EventRecorder) -> Self {
        SessionGuard { accounts, recorder }
    }

    /// Open a session for a device. Blocked devices are refused.
    pub fn start(
        &self,
        account_id: &str,
        device_id: &str,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<SessionRecord> {
        if account_id.is_empty() || device_id.is_empty() {
            return Err(GuardError::Validation(
                "account and device ids are required".to_string(),
            ));
        }

        let session = SessionRecord {
            session_id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            device_id: device_id.to_string(),
            ip: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            created_at: now,
            last_active_at: now,
            is_active: true,
        };
        if !self.accounts.open_session(&session)? {
            log::warn!(
                "Refused session for blocked device {} on account {}",
                device_id,
                account_id
            );
            return Err(GuardError::PolicyViolation(format!(
                "device {} is blocked",
                device_id
            )));
        }
        Ok(session)
    }

    /// Check an authenticated request against its session's fingerprint.
    ///
    /// A mismatch ends the session and records SUSPICIOUS_ACTIVITY before
    /// returning `Invalid`.
    pub async fn verify(
        &self,
        session_id: &str,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<SessionVerdict> {
        let session = self
            .accounts
            .get_session(session_id)?
            .ok_or_else(|| GuardError::NotFound(format!("session {} not found", session_id)))?;

        if !session.is_active {
            return Ok(SessionVerdict::Invalid {
                reason: "session has ended".to_string(),
            });
        }

        if !fingerprint_matches(&session, request) {
            self.accounts.end_session(&session.session_id)?;
            log::warn!(
                "Session {} for {} presented a new fingerprint ({} -> {}), terminated",
                session.session_id,
                session.account_id,
                session.ip,
                request.ip
            );

            let draft = EventDraft::new(
                EventType::SuspiciousActivity,
                Severity::High,
                format!(
                    "Session fingerprint mismatch: expected {} / {:?}",
                    session.ip, session.user_agent
                ),
            )
            .for_account(&session.account_id);
            if let Err(err) = self.recorder.record(draft, request, now).await {
                log::error!(
                    "Failed to record fingerprint mismatch for session {}: {}",
                    session.session_id,
                    err
                );
            }

            return Ok(SessionVerdict::Invalid {
                reason: "session fingerprint changed, please sign in again".to_string(),
            });
        }

        self.accounts.touch_session(&session.session_id, now)?;
        Ok(SessionVerdict::Valid(SessionRecord {
            last_active_at: now,
            ..session
        }))
    }

    /// Explicit logout
    pub fn end(&self, session_id: &str) -> GuardResult<bool> {
        if self.accounts.get_session(session_id)?.is_none() {
            return Err(GuardError::NotFound(format!("session {} not found", session_id)));
        }
        Ok(self.accounts.end_session(session_id)?)
    }

    pub fn active_sessions(&self, account_id: &str) -> GuardResult<Vec<SessionRecord>> {
        Ok(self.accounts.sessions_for_account(account_id, true)?)
    }
}
