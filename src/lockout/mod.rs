//! Login attempt tracking and account lockout
//!
//! Per account the tracker is a two-state machine, `Normal` and `Locked`.
//! State lives in the account store and every transition is written with a
//! compare-and-swap on its version, so concurrent logins for the same
//! account never lose a failure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::LockoutConfig;
use crate::detection::{EventDraft, EventRecorder};
use crate::error::{GuardError, GuardResult};
use crate::localtime::minutes_after;
use crate::models::{
    EventType, LoginAttemptState, LoginHistoryEntry, RequestInfo, SecurityEvent, Severity,
};
use crate::persistence::AccountStore;

/// What the request layer should answer for a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LockoutDecision {
    Allowed,
    InvalidCredentials { remaining_attempts: u32 },
    Locked { until: DateTime<Utc> },
}

/// Result of applying one outcome to the stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Succeeded,
    Failed { remaining: u32 },
    NewlyLocked { until: DateTime<Utc> },
    StillLocked { until: DateTime<Utc> },
}

impl Transition {
    fn decision(self) -> LockoutDecision {
        match self {
            Transition::Succeeded => LockoutDecision::Allowed,
            Transition::Failed { remaining } => LockoutDecision::InvalidCredentials {
                remaining_attempts: remaining,
            },
            Transition::NewlyLocked { until } | Transition::StillLocked { until } => {
                LockoutDecision::Locked { until }
            }
        }
    }
}

/// Pure state transition. Expiry is applied lazily before the outcome.
fn apply(
    state: &LoginAttemptState,
    success: bool,
    now: DateTime<Utc>,
    config: &LockoutConfig,
) -> GuardResult<(LoginAttemptState, Transition)> {
    let mut next = state.clone();

    match next.locked_until {
        Some(until) if now < until => return Ok((next, Transition::StillLocked { until })),
        Some(_) => {
            next.locked_until = None;
            next.failure_count = 0;
        }
        None => {}
    }

    if success {
        next.failure_count = 0;
        return Ok((next, Transition::Succeeded));
    }

    next.failure_count += 1;
    next.last_failure_at = Some(now);

    if next.failure_count >= config.max_failures {
        let until = minutes_after(now, config.lock_minutes).ok_or_else(|| {
            GuardError::Validation(format!(
                "lock duration of {} minutes is out of range",
                config.lock_minutes
            ))
        })?;
        next.locked_until = Some(until);
        Ok((next, Transition::NewlyLocked { until }))
    } else {
        let remaining = config.max_failures - next.failure_count;
        Ok((next, Transition::Failed { remaining }))
    }
}

#[derive(Clone)]
pub struct LoginTracker {
    accounts: Arc<dyn AccountStore>,
    recorder: EventRecorder,
    config: LockoutConfig,
}

impl LoginTracker {
    pub fn new(accounts: Arc<dyn AccountStore>, recorder: EventRecorder, config: LockoutConfig) -> Self {
        LoginTracker {
            accounts,
            recorder,
            config,
        }
    }

    /// Read-modify-write under compare-and-swap, retrying on contention
    fn update<F>(&self, account_id: &str, mut step: F) -> GuardResult<Transition>
    where
        F: FnMut(&LoginAttemptState) -> GuardResult<(LoginAttemptState, Transition)>,
    {
        for attempt in 0..=self.config.max_update_retries {
            let current = self.accounts.load_login_state(account_id)?;
            let (next, transition) = step(&current)?;

            if next == current {
                return Ok(transition);
            }
            if self
                .accounts
                .compare_and_swap_login_state(account_id, current.version, &next)?
            {
                return Ok(transition);
            }
            log::debug!(
                "Login state for {} changed concurrently (attempt {})",
                account_id,
                attempt + 1
            );
        }

        Err(GuardError::Conflict(format!(
            "login state for {} is under contention",
            account_id
        )))
    }

    /// Apply a login outcome and record its events.
    ///
    /// A locked account answers `Locked` even for correct credentials.
    pub async fn on_login_outcome(
        &self,
        account_id: &str,
        success: bool,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<LockoutDecision> {
        if account_id.trim().is_empty() {
            return Err(GuardError::Validation("account id is required".to_string()));
        }

        let transition = self.update(account_id, |state| apply(state, success, now, &self.config))?;

        let first_event = match transition {
            Transition::Succeeded => {
                self.record(EventType::LoginSuccess, Severity::Low, "Login succeeded".to_string(), account_id, request, now)
                    .await?
            }
            Transition::Failed { remaining } => {
                self.record(
                    EventType::LoginFailure,
                    Severity::Medium,
                    format!("Login failed: invalid credentials ({} attempts remaining)", remaining),
                    account_id,
                    request,
                    now,
                )
                .await?
            }
            Transition::NewlyLocked { until } => {
                let failure = self
                    .record(
                        EventType::LoginFailure,
                        Severity::Medium,
                        "Login failed: invalid credentials".to_string(),
                        account_id,
                        request,
                        now,
                    )
                    .await?;
                log::warn!(
                    "Account {} locked until {} after {} failed logins",
                    account_id,
                    until.to_rfc3339(),
                    self.config.max_failures
                );
                self.record(
                    EventType::AccountLocked,
                    Severity::High,
                    format!(
                        "Account locked after {} failed login attempts until {}",
                        self.config.max_failures,
                        until.to_rfc3339()
                    ),
                    account_id,
                    request,
                    now,
                )
                .await?;
                failure
            }
            Transition::StillLocked { until } => {
                self.record(
                    EventType::LoginFailure,
                    Severity::Medium,
                    format!("Login rejected: account locked until {}", until.to_rfc3339()),
                    account_id,
                    request,
                    now,
                )
                .await?
            }
        };

        let entry = LoginHistoryEntry {
            timestamp: now,
            ip: request.ip.clone(),
            user_agent: request.user_agent.clone(),
            success: transition == Transition::Succeeded,
            country: first_event.location.country,
            timezone: first_event.location.timezone,
        };
        self.accounts
            .append_login_history(account_id, &entry, self.config.history_limit)?;

        Ok(transition.decision())
    }

    /// Consume a completed password reset: clears any lock and the failure count
    pub async fn on_password_reset(
        &self,
        account_id: &str,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<()> {
        self.update(account_id, |state| {
            let cleared = LoginAttemptState {
                failure_count: 0,
                last_failure_at: None,
                locked_until: None,
                version: state.version,
            };
            Ok((cleared, Transition::Succeeded))
        })?;

        self.record(
            EventType::PasswordChanged,
            Severity::Medium,
            "Password changed".to_string(),
            account_id,
            request,
            now,
        )
        .await?;
        Ok(())
    }

    pub fn state(&self, account_id: &str) -> GuardResult<LoginAttemptState> {
        Ok(self.accounts.load_login_state(account_id)?)
    }

    pub fn is_locked(&self, account_id: &str, now: DateTime<Utc>) -> GuardResult<bool> {
        Ok(self.state(account_id)?.is_locked_at(now))
    }

    /// Most recent first
    pub fn history(&self, account_id: &str, limit: Option<usize>) -> GuardResult<Vec<LoginHistoryEntry>> {
        Ok(self.accounts.login_history(account_id, limit)?)
    }

    async fn record(
        &self,
        event_type: EventType,
        severity: Severity,
        description: String,
        account_id: &str,
        request: &RequestInfo,
        now: DateTime<Utc>,
    ) -> GuardResult<SecurityEvent> {
        let draft = EventDraft::new(event_type, severity, description).for_account(account_id);
        self.recorder.record(draft, request, now).await
    }
}
