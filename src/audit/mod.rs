//! Audit trail: the explicit post-action hook, paginated search over audits
//! and security events, statistics, and retention cleanup.

pub mod dashboard;

pub use dashboard::{Dashboard, DashboardRange};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::RetentionConfig;
use crate::error::{GuardError, GuardResult};
use crate::localtime::days_before;
use crate::models::{
    AuditAction, AuditCategory, AuditEntry, AuditRecord, EventType, SecurityEvent, Severity,
};
use crate::persistence::{AuditQuery, EventQuery, EventStore};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

/// Audit search filters; page and limit default to 1 and 50
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub action: Option<AuditAction>,
    pub category: Option<AuditCategory>,
    pub account_id: Option<String>,
    pub target_id: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub event_type: Option<EventType>,
    pub severity: Option<Severity>,
    pub account_id: Option<String>,
    pub ip: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountCount {
    pub account_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStatistics {
    pub by_action: BTreeMap<AuditAction, usize>,
    pub by_category: BTreeMap<AuditCategory, usize>,
    pub top_accounts: Vec<AccountCount>,
}

/// Resolved `(page, limit, offset)`
fn paging(page: Option<usize>, limit: Option<usize>) -> GuardResult<(usize, usize, usize)> {
    let page = page.unwrap_or(DEFAULT_PAGE);
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if page == 0 {
        return Err(GuardError::Validation("page must be at least 1".to_string()));
    }
    if limit == 0 || limit > MAX_LIMIT {
        return Err(GuardError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    Ok((page, limit, (page - 1) * limit))
}

fn check_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> GuardResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(GuardError::Validation(
            "start date must not be after end date".to_string(),
        )),
        _ => Ok(()),
    }
}

fn page_of<T>(items: Vec<T>, total: usize, page: usize, limit: usize) -> Page<T> {
    Page {
        items,
        total,
        page,
        limit,
        total_pages: (total + limit - 1) / limit,
    }
}

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn EventStore>,
    retention: RetentionConfig,
}

impl AuditService {
    pub fn new(store: Arc<dyn EventStore>, retention: RetentionConfig) -> Self {
        AuditService { store, retention }
    }

    /// Write one audit record for a completed action
    pub fn log(&self, entry: AuditEntry, now: DateTime<Utc>) -> GuardResult<AuditRecord> {
        let record = AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            action: entry.action,
            category: entry.category,
            account_id: entry.account_id,
            target_id: entry.target_id,
            target_kind: entry.target_kind,
            details: entry.details,
            metadata: entry.metadata,
            timestamp: now,
        };

        let stored = self.store.append_audit(&record).map_err(|e| {
            log::error!("Failed to persist audit record {}: {}", record.action, e);
            GuardError::from(e)
        })?;
        Ok(stored)
    }

    pub fn search(&self, filter: &AuditFilter) -> GuardResult<Page<AuditRecord>> {
        check_range(filter.start, filter.end)?;
        let (page, limit, offset) = paging(filter.page, filter.limit)?;

        let query = AuditQuery {
            action: filter.action,
            category: filter.category,
            account_id: filter.account_id.clone(),
            target_id: filter.target_id.clone(),
            start: filter.start,
            end: filter.end,
            offset,
            limit: Some(limit),
        };

        let items = self.store.find_audits(&query)?;
        let total = self.store.count_audits(&query)?;
        Ok(page_of(items, total, page, limit))
    }

    pub fn search_events(&self, filter: &EventFilter) -> GuardResult<Page<SecurityEvent>> {
        check_range(filter.start, filter.end)?;
        let (page, limit, offset) = paging(filter.page, filter.limit)?;

        let query = EventQuery {
            event_type: filter.event_type,
            severity: filter.severity,
            account_id: filter.account_id.clone(),
            ip: filter.ip.clone(),
            start: filter.start,
            end: filter.end,
            offset,
            limit: Some(limit),
        };

        let items = self.store.find_events(&query)?;
        let total = self.store.count_events(&query)?;
        Ok(page_of(items, total, page, limit))
    }

    /// Counts over the closed interval `[start, end]`
    pub fn statistics(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> GuardResult<AuditStatistics> {
        check_range(Some(start), Some(end))?;

        let records = self.store.find_audits(&AuditQuery {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        })?;

        let mut stats = AuditStatistics::default();
        let mut per_account: HashMap<String, usize> = HashMap::new();
        for record in records {
            *stats.by_action.entry(record.action).or_insert(0) += 1;
            *stats.by_category.entry(record.category).or_insert(0) += 1;
            if let Some(account_id) = record.account_id {
                *per_account.entry(account_id).or_insert(0) += 1;
            }
        }

        let mut top: Vec<AccountCount> = per_account
            .into_iter()
            .map(|(account_id, count)| AccountCount { account_id, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.account_id.cmp(&b.account_id)));
        top.truncate(10);
        stats.top_accounts = top;

        Ok(stats)
    }

    /// Delete audit records and security events older than `now - retention_days`.
    ///
    /// Irreversible; expose only to administrators.
    pub fn cleanup(&self, retention_days: i64, now: DateTime<Utc>) -> GuardResult<usize> {
        if retention_days < self.retention.minimum_days {
            return Err(GuardError::PolicyViolation(format!(
                "retention of {} days is below the {} day minimum",
                retention_days, self.retention.minimum_days
            )));
        }

        let cutoff = days_before(now, retention_days).ok_or_else(|| {
            GuardError::Validation(format!(
                "retention of {} days is out of range",
                retention_days
            ))
        })?;
        let deleted = self.store.purge_before(cutoff)?;
        log::info!(
            "Retention cleanup removed {} records older than {}",
            deleted,
            cutoff.to_rfc3339()
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::models::{AuditMetadata, EnrichedDevice, EnrichedLocation, RequestContext};
    use crate::persistence::SqliteStore;
    use crate::testing::fixed_now;

    fn service() -> AuditService {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        AuditService::new(store, RetentionConfig::default())
    }

    fn log_action(service: &AuditService, account: &str, action: AuditAction, at: DateTime<Utc>) {
        service
            .log(
                AuditEntry::new(action, AuditCategory::User)
                    .account(account)
                    .metadata(AuditMetadata {
                        ip: Some("1.1.1.1".to_string()),
                        ..Default::default()
                    }),
                at,
            )
            .unwrap();
    }

    fn event_at(at: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: EventType::LoginFailure,
            severity: Severity::Medium,
            description: "x".to_string(),
            account_id: None,
            timestamp: at,
            ip: "1.1.1.1".to_string(),
            user_agent: "ua".to_string(),
            location: EnrichedLocation::default(),
            device: EnrichedDevice::default(),
            request: RequestContext::default(),
        }
    }

    #[test]
    fn test_search_defaults_and_total() {
        let service = service();
        for i in 0..60 {
            log_action(&service, "alice", AuditAction::Read, fixed_now() + Duration::seconds(i));
        }
        log_action(&service, "bob", AuditAction::Read, fixed_now());

        let filter = AuditFilter {
            account_id: Some("alice".to_string()),
            ..Default::default()
        };
        let page = service.search(&filter).unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 50);
        assert_eq!(page.items.len(), 50);
        assert_eq!(page.total, 60);
        assert_eq!(page.total_pages, 2);
        assert!(page.items[0].timestamp > page.items[49].timestamp);

        let second = service
            .search(&AuditFilter {
                page: Some(2),
                ..filter
            })
            .unwrap();
        assert_eq!(second.items.len(), 10);
    }

    #[test]
    fn test_invalid_filters_are_rejected() {
        let service = service();
        let zero_page = AuditFilter {
            page: Some(0),
            ..Default::default()
        };
        assert!(matches!(service.search(&zero_page), Err(GuardError::Validation(_))));

        let inverted = AuditFilter {
            start: Some(fixed_now()),
            end: Some(fixed_now() - Duration::days(1)),
            ..Default::default()
        };
        assert!(matches!(service.search(&inverted), Err(GuardError::Validation(_))));

        let huge = EventFilter {
            limit: Some(MAX_LIMIT + 1),
            ..Default::default()
        };
        assert!(matches!(service.search_events(&huge), Err(GuardError::Validation(_))));
    }

    #[test]
    fn test_statistics_closed_interval() {
        let service = service();
        let start = fixed_now();
        let end = fixed_now() + Duration::hours(1);

        log_action(&service, "alice", AuditAction::Login, start);
        log_action(&service, "alice", AuditAction::Logout, end);
        log_action(&service, "bob", AuditAction::Login, start + Duration::minutes(5));
        log_action(&service, "carol", AuditAction::Login, end + Duration::seconds(1));

        let stats = service.statistics(start, end).unwrap();
        assert_eq!(stats.by_action[&AuditAction::Login], 2);
        assert_eq!(stats.by_action[&AuditAction::Logout], 1);
        assert_eq!(stats.by_category[&AuditCategory::User], 3);
        assert_eq!(
            stats.top_accounts,
            vec![
                AccountCount { account_id: "alice".to_string(), count: 2 },
                AccountCount { account_id: "bob".to_string(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_top_accounts_capped_at_ten() {
        let service = service();
        for i in 0..12 {
            log_action(&service, &format!("user{:02}", i), AuditAction::Read, fixed_now());
        }
        let stats = service
            .statistics(fixed_now() - Duration::hours(1), fixed_now() + Duration::hours(1))
            .unwrap();
        assert_eq!(stats.top_accounts.len(), 10);
    }

    #[test]
    fn test_cleanup_enforces_floor() {
        let service = service();
        let now = fixed_now();
        let result = service.cleanup(29, now);
        assert!(matches!(result, Err(GuardError::PolicyViolation(_))));
        assert_eq!(service.cleanup(30, now).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_rejects_unrepresentable_retention() {
        let service = service();
        log_action(&service, "alice", AuditAction::Read, fixed_now() - Duration::days(400));

        for days in [100_000_000, i64::MAX] {
            let result = service.cleanup(days, fixed_now());
            assert!(matches!(result, Err(GuardError::Validation(_))));
        }
        assert_eq!(service.search(&AuditFilter::default()).unwrap().total, 1);
    }

    #[test]
    fn test_cleanup_keeps_newer_records() {
        let service = service();
        let now = fixed_now();
        log_action(&service, "alice", AuditAction::Read, now - Duration::days(40));
        log_action(&service, "bob", AuditAction::Read, now - Duration::days(29));
        service.store.append_event(&event_at(now - Duration::days(31))).unwrap();
        service.store.append_event(&event_at(now - Duration::days(1))).unwrap();

        assert_eq!(service.cleanup(30, now).unwrap(), 2);

        let remaining = service.search(&AuditFilter::default()).unwrap();
        assert_eq!(remaining.total, 1);
        assert_eq!(remaining.items[0].account_id.as_deref(), Some("bob"));
        assert_eq!(service.search_events(&EventFilter::default()).unwrap().total, 1);
    }
}
