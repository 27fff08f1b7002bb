//! Administrative dashboard aggregations over a trailing range

use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{GuardError, GuardResult};
use crate::localtime::days_before;
use crate::models::{EventType, SecurityEvent, Severity};
use crate::persistence::{AuditQuery, EventQuery, EventStore};

const RECENT_SUSPICIOUS: usize = 10;
const TOP_ROWS: usize = 20;
const IP_FAILURE_THRESHOLD: usize = 5;

/// Closed interval the dashboard aggregates over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DashboardRange {
    pub fn trailing_days(days: i64, now: DateTime<Utc>) -> GuardResult<Self> {
        if days < 1 {
            return Err(GuardError::Validation("days must be at least 1".to_string()));
        }
        let start = days_before(now, days)
            .ok_or_else(|| GuardError::Validation(format!("{} days is out of range", days)))?;
        Ok(DashboardRange { start, end: now })
    }

    fn events(&self) -> EventQuery {
        EventQuery {
            start: Some(self.start),
            end: Some(self.end),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub total_events: usize,
    pub high_severity_events: usize,
    pub login_successes: usize,
    pub login_failures: usize,
    pub recent_suspicious: Vec<SecurityEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyStat {
    pub hour: DateTime<Utc>,
    pub events: usize,
    pub high_severity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpThreat {
    pub ip: String,
    pub total_events: usize,
    pub failed_logins: usize,
    pub suspicious_activities: usize,
    pub last_seen: DateTime<Utc>,
    pub countries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserActivity {
    pub account_id: String,
    pub total_actions: usize,
    pub distinct_ips: usize,
    pub last_action: DateTime<Utc>,
    pub actions: Vec<String>,
}

#[derive(Clone)]
pub struct Dashboard {
    store: Arc<dyn EventStore>,
}

impl Dashboard {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Dashboard { store }
    }

    pub fn overview(&self, range: DashboardRange) -> GuardResult<Overview> {
        let count = |event_type: Option<EventType>, severity: Option<Severity>| {
            self.store.count_events(&EventQuery {
                event_type,
                severity,
                ..range.events()
            })
        };

        Ok(Overview {
            total_events: count(None, None)?,
            high_severity_events: count(None, Some(Severity::High))?
                + count(None, Some(Severity::Critical))?,
            login_successes: count(Some(EventType::LoginSuccess), None)?,
            login_failures: count(Some(EventType::LoginFailure), None)?,
            recent_suspicious: self.store.find_events(&EventQuery {
                event_type: Some(EventType::SuspiciousActivity),
                limit: Some(RECENT_SUSPICIOUS),
                ..range.events()
            })?,
        })
    }

    /// Per UTC hour, ascending
    pub fn hourly_stats(&self, range: DashboardRange) -> GuardResult<Vec<HourlyStat>> {
        let mut buckets: BTreeMap<DateTime<Utc>, (usize, usize)> = BTreeMap::new();
        for event in self.store.find_events(&range.events())? {
            let bucket = buckets.entry(hour_of(event.timestamp)).or_insert((0, 0));
            bucket.0 += 1;
            if event.severity.is_elevated() {
                bucket.1 += 1;
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(hour, (events, high_severity))| HourlyStat {
                hour,
                events,
                high_severity,
            })
            .collect())
    }

    /// Addresses with more than five failed logins or any suspicious activity
    pub fn ip_threats(&self, range: DashboardRange) -> GuardResult<Vec<IpThreat>> {
        let mut per_ip: BTreeMap<String, (IpThreat, BTreeSet<String>)> = BTreeMap::new();

        for event in self.store.find_events(&range.events())? {
            let (threat, countries) = per_ip.entry(event.ip.clone()).or_insert_with(|| {
                (
                    IpThreat {
                        ip: event.ip.clone(),
                        total_events: 0,
                        failed_logins: 0,
                        suspicious_activities: 0,
                        last_seen: event.timestamp,
                        countries: Vec::new(),
                    },
                    BTreeSet::new(),
                )
            });

            threat.total_events += 1;
            threat.last_seen = threat.last_seen.max(event.timestamp);
            match event.event_type {
                EventType::LoginFailure => threat.failed_logins += 1,
                EventType::SuspiciousActivity => threat.suspicious_activities += 1,
                _ => {}
            }
            if let Some(country) = event.location.country {
                countries.insert(country);
            }
        }

        let mut threats: Vec<IpThreat> = per_ip
            .into_values()
            .map(|(mut threat, countries)| {
                threat.countries = countries.into_iter().collect();
                threat
            })
            .filter(|t| t.failed_logins > IP_FAILURE_THRESHOLD || t.suspicious_activities > 0)
            .collect();

        threats.sort_by(|a, b| b.total_events.cmp(&a.total_events).then_with(|| a.ip.cmp(&b.ip)));
        threats.truncate(TOP_ROWS);
        Ok(threats)
    }

    /// Most active accounts by audited actions
    pub fn user_activities(&self, range: DashboardRange) -> GuardResult<Vec<UserActivity>> {
        let records = self.store.find_audits(&AuditQuery {
            start: Some(range.start),
            end: Some(range.end),
            ..Default::default()
        })?;

        let mut per_account: BTreeMap<String, (usize, BTreeSet<String>, DateTime<Utc>, BTreeSet<String>)> =
            BTreeMap::new();
        for record in records {
            let account_id = match record.account_id {
                Some(ref id) => id.clone(),
                None => continue,
            };
            let entry = per_account
                .entry(account_id)
                .or_insert_with(|| (0, BTreeSet::new(), record.timestamp, BTreeSet::new()));
            entry.0 += 1;
            if let Some(ref ip) = record.metadata.ip {
                entry.1.insert(ip.clone());
            }
            entry.2 = entry.2.max(record.timestamp);
            entry.3.insert(record.action.as_str().to_string());
        }

        let mut activities: Vec<UserActivity> = per_account
            .into_iter()
            .map(|(account_id, (total_actions, ips, last_action, actions))| UserActivity {
                account_id,
                total_actions,
                distinct_ips: ips.len(),
                last_action,
                actions: actions.into_iter().collect(),
            })
            .collect();

        activities.sort_by(|a, b| {
            b.total_actions
                .cmp(&a.total_actions)
                .then_with(|| a.account_id.cmp(&b.account_id))
        });
        activities.truncate(TOP_ROWS);
        Ok(activities)
    }
}

fn hour_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    match ts.date_naive().and_hms_opt(ts.hour(), 0, 0) {
        Some(naive) => Utc.from_utc_datetime(&naive),
        None => ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::models::{
        AuditAction, AuditCategory, AuditEntry, AuditMetadata, EnrichedDevice, EnrichedLocation,
        RequestContext,
    };
    use crate::persistence::SqliteStore;
    use crate::testing::fixed_now;
    use crate::audit::AuditService;
    use crate::config::RetentionConfig;

    fn seed(store: &SqliteStore, event_type: EventType, severity: Severity, ip: &str, at: DateTime<Utc>) {
        store
            .append_event(&SecurityEvent {
                id: uuid::Uuid::new_v4().to_string(),
                event_type,
                severity,
                description: "seed".to_string(),
                account_id: None,
                timestamp: at,
                ip: ip.to_string(),
                user_agent: "ua".to_string(),
                location: EnrichedLocation {
                    country: Some("KR".to_string()),
                    ..Default::default()
                },
                device: EnrichedDevice::default(),
                request: RequestContext::default(),
            })
            .unwrap();
    }

    fn setup() -> (Arc<SqliteStore>, Dashboard, DashboardRange) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let dashboard = Dashboard::new(store.clone());
        let range = DashboardRange::trailing_days(1, fixed_now()).unwrap();
        (store, dashboard, range)
    }

    #[test]
    fn test_overview_counts() {
        let (store, dashboard, range) = setup();
        let now = fixed_now();
        seed(&store, EventType::LoginSuccess, Severity::Low, "1.1.1.1", now - Duration::hours(1));
        seed(&store, EventType::LoginFailure, Severity::Medium, "1.1.1.1", now - Duration::hours(1));
        seed(&store, EventType::AccountLocked, Severity::High, "1.1.1.1", now - Duration::hours(1));
        seed(&store, EventType::SuspiciousActivity, Severity::High, "2.2.2.2", now - Duration::hours(2));
        seed(&store, EventType::XssAttempt, Severity::Critical, "2.2.2.2", now - Duration::hours(2));
        seed(&store, EventType::LoginFailure, Severity::Medium, "1.1.1.1", now - Duration::days(3));

        let overview = dashboard.overview(range).unwrap();
        assert_eq!(overview.total_events, 5);
        assert_eq!(overview.high_severity_events, 3);
        assert_eq!(overview.login_successes, 1);
        assert_eq!(overview.login_failures, 1);
        assert_eq!(overview.recent_suspicious.len(), 1);
    }

    #[test]
    fn test_hourly_stats_ascending() {
        let (store, dashboard, range) = setup();
        let now = fixed_now();
        seed(&store, EventType::LoginFailure, Severity::Medium, "1.1.1.1", now - Duration::minutes(30));
        seed(&store, EventType::InvalidToken, Severity::High, "1.1.1.1", now - Duration::minutes(20));
        seed(&store, EventType::LoginFailure, Severity::Medium, "1.1.1.1", now - Duration::minutes(150));

        let stats = dashboard.hourly_stats(range).unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats[0].hour < stats[1].hour);
        assert_eq!(stats[1].events, 2);
        assert_eq!(stats[1].high_severity, 1);
        assert_eq!(stats[1].hour, now - Duration::hours(1));
    }

    #[test]
    fn test_ip_threat_selection() {
        let (store, dashboard, range) = setup();
        let now = fixed_now();
        for i in 0..6 {
            seed(&store, EventType::LoginFailure, Severity::Medium, "6.6.6.6", now - Duration::minutes(i));
        }
        for i in 0..5 {
            seed(&store, EventType::LoginFailure, Severity::Medium, "5.5.5.5", now - Duration::minutes(i));
        }
        seed(&store, EventType::SuspiciousActivity, Severity::High, "7.7.7.7", now);

        let threats = dashboard.ip_threats(range).unwrap();
        let ips: Vec<&str> = threats.iter().map(|t| t.ip.as_str()).collect();
        assert_eq!(ips, vec!["6.6.6.6", "7.7.7.7"]);
        assert_eq!(threats[0].failed_logins, 6);
        assert_eq!(threats[0].countries, vec!["KR".to_string()]);
        assert_eq!(threats[0].last_seen, now);
    }

    #[test]
    fn test_user_activities() {
        let (store, dashboard, range) = setup();
        let audit = AuditService::new(store.clone(), RetentionConfig::default());
        let now = fixed_now();
        for (account, action, ip) in [
            ("alice", AuditAction::Login, "1.1.1.1"),
            ("alice", AuditAction::Update, "2.2.2.2"),
            ("alice", AuditAction::Update, "2.2.2.2"),
            ("bob", AuditAction::Login, "3.3.3.3"),
        ] {
            audit
                .log(
                    AuditEntry::new(action, AuditCategory::User)
                        .account(account)
                        .metadata(AuditMetadata {
                            ip: Some(ip.to_string()),
                            ..Default::default()
                        }),
                    now - Duration::hours(1),
                )
                .unwrap();
        }

        let activities = dashboard.user_activities(range).unwrap();
        assert_eq!(activities[0].account_id, "alice");
        assert_eq!(activities[0].total_actions, 3);
        assert_eq!(activities[0].distinct_ips, 2);
        assert_eq!(activities[0].actions, vec!["LOGIN".to_string(), "UPDATE".to_string()]);
        assert_eq!(activities[1].account_id, "bob");
    }

    #[test]
    fn test_range_validation() {
        assert!(DashboardRange::trailing_days(0, fixed_now()).is_err());

        let range = DashboardRange::trailing_days(7, fixed_now()).unwrap();
        assert_eq!(range.start, fixed_now() - Duration::days(7));
        assert_eq!(range.end, fixed_now());

        for days in [100_000_000, i64::MAX] {
            let result = DashboardRange::trailing_days(days, fixed_now());
            assert!(matches!(result, Err(GuardError::Validation(_))));
        }
    }
}
