//! Sliding-window correlation over persisted security events
//!
//! Every check re-queries the event store at evaluation time, so several
//! service instances sharing one store see the same windows. Findings are
//! logged, not stored, so they can never feed back into their own counts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::CorrelationConfig;
use crate::localtime::{hours_before, is_off_hours, local_hour, minutes_before};
use crate::models::{EventType, SecurityEvent};
use crate::persistence::{EventQuery, EventStore, PersistenceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrelationFinding {
    IpFailureBurst { ip: String, failures: usize },
    IpAccountFanOut { ip: String, accounts: Vec<String> },
    AccountMultiCountry { account_id: String, countries: Vec<String> },
    AccountOffHours { account_id: String, events: usize },
}

impl CorrelationFinding {
    pub fn kind(&self) -> &'static str {
        match self {
            CorrelationFinding::IpFailureBurst { .. } => "ip_failure_burst",
            CorrelationFinding::IpAccountFanOut { .. } => "ip_account_fan_out",
            CorrelationFinding::AccountMultiCountry { .. } => "account_multi_country",
            CorrelationFinding::AccountOffHours { .. } => "account_off_hours",
        }
    }
}

impl fmt::Display for CorrelationFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationFinding::IpFailureBurst { ip, failures } => {
                write!(f, "{} failed logins from {} in the last hour", failures, ip)
            }
            CorrelationFinding::IpAccountFanOut { ip, accounts } => {
                write!(f, "{} accounts accessed from {} in the last hour", accounts.len(), ip)
            }
            CorrelationFinding::AccountMultiCountry {
                account_id,
                countries,
            } => write!(
                f,
                "account {} accessed from {} countries: {}",
                account_id,
                countries.len(),
                countries.join(", ")
            ),
            CorrelationFinding::AccountOffHours { account_id, events } => write!(
                f,
                "account {} has {} off-hours events in the last day",
                account_id, events
            ),
        }
    }
}

#[derive(Clone)]
pub struct Correlator {
    store: Arc<dyn EventStore>,
    config: CorrelationConfig,
}

impl Correlator {
    pub fn new(store: Arc<dyn EventStore>, config: CorrelationConfig) -> Self {
        Correlator { store, config }
    }

    // A window reaching past the representable range covers the whole history
    fn ip_window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        minutes_before(now, self.config.ip_window_minutes).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn account_window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        hours_before(now, self.config.account_window_hours).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Failure burst and account fan-out for one source address
    pub fn check_ip(
        &self,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CorrelationFinding>, PersistenceError> {
        let mut findings = Vec::new();
        let since = self.ip_window_start(now);

        let failures = self.store.count_events(&EventQuery {
            event_type: Some(EventType::LoginFailure),
            ..EventQuery::for_ip_since(ip, since)
        })?;
        if failures >= self.config.ip_failure_threshold {
            findings.push(CorrelationFinding::IpFailureBurst {
                ip: ip.to_string(),
                failures,
            });
        }

        let accounts: BTreeSet<String> = self
            .store
            .find_events(&EventQuery::for_ip_since(ip, since))?
            .into_iter()
            .filter_map(|e| e.account_id)
            .collect();
        if accounts.len() >= self.config.ip_account_threshold {
            findings.push(CorrelationFinding::IpAccountFanOut {
                ip: ip.to_string(),
                accounts: accounts.into_iter().collect(),
            });
        }

        Ok(findings)
    }

    /// Country spread and off-hours activity for one account
    pub fn check_account(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CorrelationFinding>, PersistenceError> {
        let mut findings = Vec::new();
        let events = self.store.find_events(&EventQuery::for_account_since(
            account_id,
            self.account_window_start(now),
        ))?;

        let countries: BTreeSet<&str> = events
            .iter()
            .filter_map(|e| e.location.country.as_deref())
            .collect();
        if countries.len() > self.config.account_country_limit {
            findings.push(CorrelationFinding::AccountMultiCountry {
                account_id: account_id.to_string(),
                countries: countries.into_iter().map(String::from).collect(),
            });
        }

        let off_hours = events
            .iter()
            .filter(|e| {
                let hour = local_hour(e.timestamp, e.location.timezone.as_deref());
                is_off_hours(hour, self.config.off_hours_start, self.config.off_hours_end)
            })
            .count();
        if off_hours >= self.config.off_hours_threshold {
            findings.push(CorrelationFinding::AccountOffHours {
                account_id: account_id.to_string(),
                events: off_hours,
            });
        }

        Ok(findings)
    }

    /// All checks that apply to a freshly recorded event
    pub fn evaluate(
        &self,
        event: &SecurityEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<CorrelationFinding>, PersistenceError> {
        let mut findings = self.check_ip(&event.ip, now)?;
        if let Some(ref account_id) = event.account_id {
            findings.extend(self.check_account(account_id, now)?);
        }
        Ok(findings)
    }

    /// Correlation worker loop; spawn it as a tokio task
    pub async fn run(self, mut rx: mpsc::Receiver<SecurityEvent>) {
        log::info!("Correlation worker started");

        while let Some(event) = rx.recv().await {
            if !self.config.enabled {
                continue;
            }

            let correlator = self.clone();
            let event_id = event.id.clone();
            let result =
                tokio::task::spawn_blocking(move || correlator.evaluate(&event, Utc::now())).await;

            match result {
                Ok(Ok(findings)) => {
                    for finding in findings {
                        log::warn!("Correlation [{}]: {}", finding.kind(), finding);
                    }
                }
                Ok(Err(e)) => log::error!("Correlation for event {} failed: {}", event_id, e),
                Err(e) => log::error!("Correlation task for event {} panicked: {}", event_id, e),
            }
        }

        log::info!("Correlation worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::models::{EnrichedDevice, EnrichedLocation, RequestContext, Severity};
    use crate::persistence::SqliteStore;
    use crate::testing::fixed_now;

    fn correlator() -> (Arc<SqliteStore>, Correlator) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let correlator = Correlator::new(store.clone(), CorrelationConfig::default());
        (store, correlator)
    }

    fn seed(
        store: &SqliteStore,
        event_type: EventType,
        account: Option<&str>,
        ip: &str,
        country: Option<&str>,
        ts: DateTime<Utc>,
    ) {
        store
            .append_event(&SecurityEvent {
                id: uuid::Uuid::new_v4().to_string(),
                event_type,
                severity: Severity::Medium,
                description: "seed".to_string(),
                account_id: account.map(String::from),
                timestamp: ts,
                ip: ip.to_string(),
                user_agent: "ua".to_string(),
                location: EnrichedLocation {
                    country: country.map(String::from),
                    ..Default::default()
                },
                device: EnrichedDevice::default(),
                request: RequestContext::default(),
            })
            .unwrap();
    }

    #[test]
    fn test_ip_failure_burst_threshold() {
        let (store, correlator) = correlator();
        let now = fixed_now();

        for i in 0..9 {
            seed(&store, EventType::LoginFailure, None, "9.9.9.9", None, now - Duration::minutes(i));
        }
        assert!(correlator.check_ip("9.9.9.9", now).unwrap().is_empty());

        for i in 0..2 {
            seed(&store, EventType::LoginFailure, None, "9.9.9.9", None, now - Duration::minutes(20 + i));
        }
        let findings = correlator.check_ip("9.9.9.9", now).unwrap();
        assert_eq!(
            findings,
            vec![CorrelationFinding::IpFailureBurst {
                ip: "9.9.9.9".to_string(),
                failures: 11
            }]
        );
    }

    #[test]
    fn test_failures_outside_window_are_ignored() {
        let (store, correlator) = correlator();
        let now = fixed_now();
        for i in 0..12 {
            seed(&store, EventType::LoginFailure, None, "9.9.9.9", None, now - Duration::hours(2) - Duration::minutes(i));
        }
        assert!(correlator.check_ip("9.9.9.9", now).unwrap().is_empty());
    }

    #[test]
    fn test_unbounded_windows_cover_all_history() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let correlator = Correlator::new(
            store.clone(),
            CorrelationConfig {
                ip_window_minutes: i64::MAX,
                account_window_hours: i64::MAX,
                ..Default::default()
            },
        );
        let now = fixed_now();
        for i in 0..10 {
            seed(&store, EventType::LoginFailure, Some("alice"), "9.9.9.9", None, now - Duration::days(400 + i));
        }

        let findings = correlator.check_ip("9.9.9.9", now).unwrap();
        assert!(matches!(
            findings.as_slice(),
            [CorrelationFinding::IpFailureBurst { failures: 10, .. }]
        ));
        assert!(correlator.check_account("alice", now).is_ok());
    }

    #[test]
    fn test_ip_account_fan_out() {
        let (store, correlator) = correlator();
        let now = fixed_now();
        for account in ["a", "b", "c", "d"] {
            seed(&store, EventType::LoginSuccess, Some(account), "7.7.7.7", None, now - Duration::minutes(5));
        }
        assert!(correlator.check_ip("7.7.7.7", now).unwrap().is_empty());

        seed(&store, EventType::LoginSuccess, Some("e"), "7.7.7.7", None, now - Duration::minutes(5));
        let findings = correlator.check_ip("7.7.7.7", now).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind(), "ip_account_fan_out");
    }

    #[test]
    fn test_account_multi_country_needs_more_than_two() {
        let (store, correlator) = correlator();
        let now = fixed_now();
        seed(&store, EventType::LoginSuccess, Some("alice"), "1.1.1.1", Some("KR"), now - Duration::hours(1));
        seed(&store, EventType::LoginSuccess, Some("alice"), "2.2.2.2", Some("US"), now - Duration::hours(2));
        seed(&store, EventType::LoginSuccess, Some("alice"), "2.2.2.3", Some("US"), now - Duration::hours(3));
        assert!(correlator.check_account("alice", now).unwrap().is_empty());

        seed(&store, EventType::LoginSuccess, Some("alice"), "3.3.3.3", Some("DE"), now - Duration::hours(4));
        let findings = correlator.check_account("alice", now).unwrap();
        assert_eq!(
            findings,
            vec![CorrelationFinding::AccountMultiCountry {
                account_id: "alice".to_string(),
                countries: vec!["DE".to_string(), "KR".to_string(), "US".to_string()],
            }]
        );
    }

    #[test]
    fn test_account_off_hours() {
        let (store, correlator) = correlator();
        // fixed_now() is 12:00 UTC; 23:00, 01:00 and 03:00 UTC are off-hours
        let now = fixed_now();
        for hours_ago in [13, 11, 9] {
            seed(&store, EventType::LoginSuccess, Some("bob"), "1.1.1.1", None, now - Duration::hours(hours_ago));
        }
        seed(&store, EventType::LoginSuccess, Some("bob"), "1.1.1.1", None, now - Duration::hours(1));

        let findings = correlator.check_account("bob", now).unwrap();
        assert_eq!(
            findings,
            vec![CorrelationFinding::AccountOffHours {
                account_id: "bob".to_string(),
                events: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_worker_drains_queue_and_stops() {
        let (store, correlator) = correlator();
        seed(&store, EventType::LoginFailure, Some("a"), "9.9.9.9", None, fixed_now());
        let event = store.find_events(&EventQuery::default()).unwrap().remove(0);

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(correlator.run(rx));
        tx.send(event).await.unwrap();
        drop(tx);

        tokio_test::assert_ok!(handle.await);
    }
}
