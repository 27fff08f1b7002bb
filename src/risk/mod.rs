//! Risk scoring engine
//!
//! Sums the login, device and IP analyzers into one assessment per account.
//! Assessments are derived data: they are cached briefly and recomputed
//! from the account store, never written back.

pub mod analyzers;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::alerting::NotificationQueue;
use crate::config::RiskConfig;
use crate::detection::{CorrelationFinding, Correlator};
use crate::error::GuardResult;
use crate::models::{
    AnalyzerReport, Notification, NotificationKind, RiskAssessment, RiskLevel, Severity,
    UnusualActivity,
};
use crate::persistence::AccountStore;

pub fn risk_level(score: u32, config: &RiskConfig) -> RiskLevel {
    if score >= config.high_threshold {
        RiskLevel::High
    } else if score >= config.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Sum analyzer reports in order, deduplicating recommendations
pub fn combine(account_id: &str, reports: Vec<AnalyzerReport>, config: &RiskConfig) -> RiskAssessment {
    let mut score = 0;
    let mut activities = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();

    for report in reports {
        score += report.risk_score;
        activities.extend(report.unusual_activities);
        for rec in report.recommendations {
            if !recommendations.contains(&rec) {
                recommendations.push(rec);
            }
        }
    }

    RiskAssessment {
        account_id: account_id.to_string(),
        risk_score: score,
        risk_level: risk_level(score, config),
        unusual_activities: activities,
        recommendations,
    }
}

fn finding_activity(finding: &CorrelationFinding) -> UnusualActivity {
    let activity = UnusualActivity::new(finding.kind(), finding.to_string());
    match finding {
        CorrelationFinding::IpFailureBurst { ip, failures } => {
            activity.with_count(*failures).with_subjects(vec![ip.clone()])
        }
        CorrelationFinding::IpAccountFanOut { ip, accounts } => {
            activity.with_count(accounts.len()).with_subjects(vec![ip.clone()])
        }
        CorrelationFinding::AccountMultiCountry { countries, .. } => activity
            .with_count(countries.len())
            .with_subjects(countries.clone()),
        CorrelationFinding::AccountOffHours { events, .. } => activity.with_count(*events),
    }
}

struct CachedAssessment {
    assessment: RiskAssessment,
    computed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RiskEngine {
    accounts: Arc<dyn AccountStore>,
    config: RiskConfig,
    correlator: Option<Correlator>,
    notifications: Option<NotificationQueue>,
    cache: Arc<Mutex<HashMap<String, CachedAssessment>>>,
}

impl RiskEngine {
    pub fn new(accounts: Arc<dyn AccountStore>, config: RiskConfig) -> Self {
        RiskEngine {
            accounts,
            config,
            correlator: None,
            notifications: None,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_correlator(mut self, correlator: Correlator) -> Self {
        self.correlator = Some(correlator);
        self
    }

    pub fn with_notifications(mut self, queue: NotificationQueue) -> Self {
        self.notifications = Some(queue);
        self
    }

    /// Assess an account, reusing a cached result younger than the TTL
    pub fn assess(&self, account_id: &str, now: DateTime<Utc>) -> GuardResult<RiskAssessment> {
        if let Some(cached) = self.cached(account_id, now) {
            return Ok(cached);
        }

        let assessment = self.compute(account_id, now)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                account_id.to_string(),
                CachedAssessment {
                    assessment: assessment.clone(),
                    computed_at: now,
                },
            );
        }

        if assessment.is_high_risk() {
            self.alert(&assessment, now);
        }
        Ok(assessment)
    }

    pub fn invalidate(&self, account_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(account_id);
        }
    }

    fn cached(&self, account_id: &str, now: DateTime<Utc>) -> Option<RiskAssessment> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(account_id)?;
        let age = now - entry.computed_at;
        let fresh = Duration::try_seconds(self.config.cache_ttl_seconds)
            .map_or(false, |ttl| age < ttl);
        if age >= Duration::zero() && fresh {
            Some(entry.assessment.clone())
        } else {
            None
        }
    }

    fn compute(&self, account_id: &str, now: DateTime<Utc>) -> GuardResult<RiskAssessment> {
        let history = self.accounts.login_history(account_id, None)?;
        let sessions = self.accounts.sessions_for_account(account_id, true)?;
        let devices = self.accounts.device_trust_state(account_id)?;

        let reports = vec![
            analyzers::analyze_logins(&history, &self.config),
            analyzers::analyze_devices(&sessions, &devices, &self.config),
            analyzers::analyze_ips(&history, &self.config),
        ];
        let mut assessment = combine(account_id, reports, &self.config);

        let ips: BTreeSet<&str> = history.iter().map(|e| e.ip.as_str()).collect();
        for finding in self.findings(account_id, ips, now) {
            assessment.unusual_activities.push(finding_activity(&finding));
        }

        log::debug!(
            "Risk for {}: {} ({})",
            account_id,
            assessment.risk_score,
            assessment.risk_level
        );
        Ok(assessment)
    }

    /// Current correlation findings for the account and its addresses.
    /// These add context only and never change the score.
    fn findings(&self, account_id: &str, ips: BTreeSet<&str>, now: DateTime<Utc>) -> Vec<CorrelationFinding> {
        let correlator = match &self.correlator {
            Some(c) => c,
            None => return Vec::new(),
        };

        let mut findings = Vec::new();
        match correlator.check_account(account_id, now) {
            Ok(found) => findings.extend(found),
            Err(e) => log::error!("Correlation lookup for {} failed: {}", account_id, e),
        }
        for ip in ips {
            match correlator.check_ip(ip, now) {
                Ok(found) => findings.extend(found),
                Err(e) => log::error!("Correlation lookup for {} failed: {}", ip, e),
            }
        }
        findings
    }

    /// Queue a security alert when the account asked for login notifications.
    /// Failures are logged; the assessment is returned regardless.
    fn alert(&self, assessment: &RiskAssessment, now: DateTime<Utc>) {
        let queue = match &self.notifications {
            Some(q) => q,
            None => return,
        };

        let wants_alert = match self.accounts.load_preferences(&assessment.account_id) {
            Ok(Some(prefs)) => prefs.login_notifications,
            Ok(None) => true,
            Err(e) => {
                log::error!(
                    "Could not load preferences for {}: {}",
                    assessment.account_id,
                    e
                );
                false
            }
        };
        if !wants_alert {
            return;
        }

        let activities: Vec<&str> = assessment
            .unusual_activities
            .iter()
            .map(|a| a.message.as_str())
            .collect();
        let notification = Notification::new(
            &assessment.account_id,
            NotificationKind::SecurityEvents,
            Severity::High,
            "High account risk detected",
            activities.join("\n"),
            now,
        )
        .with_metadata(json!({
            "risk_score": assessment.risk_score,
            "risk_level": assessment.risk_level,
            "recommendations": assessment.recommendations,
        }));
        queue.queue(notification);
    }
}
