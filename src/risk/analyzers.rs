//! The three risk analyzers. Each is a pure function over account state.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::RiskConfig;
use crate::localtime::{is_off_hours, local_hour};
use crate::models::{AnalyzerReport, DeviceTrustState, LoginHistoryEntry, SessionRecord, UnusualActivity};

pub const ENABLE_TWO_FACTOR: &str = "Enable two-factor authentication";
pub const RESTRICT_IPS: &str = "Restrict sign-in to an allow-list of IP addresses";
pub const END_UNUSED_SESSIONS: &str = "End sessions that are no longer in use";
pub const REGISTER_DEVICES: &str = "Register the devices you use as trusted";
pub const BLOCK_IP: &str = "Block the offending IP address";

/// Failure rate, country spread and off-hours successes.
///
/// `history` is most recent first.
pub fn analyze_logins(history: &[LoginHistoryEntry], config: &RiskConfig) -> AnalyzerReport {
    let mut report = AnalyzerReport::default();

    let failures = history
        .iter()
        .take(config.recent_login_window)
        .filter(|entry| !entry.success)
        .count();
    if failures >= config.recent_failure_threshold {
        report.flag(
            config.recent_failure_weight,
            UnusualActivity::new(
                "multiple_failures",
                format!("{} failed logins among the most recent attempts", failures),
            )
            .with_count(failures),
            Some(ENABLE_TWO_FACTOR),
        );
    }

    let countries: BTreeSet<&str> = history
        .iter()
        .take(config.country_window)
        .filter_map(|entry| entry.country.as_deref())
        .collect();
    if countries.len() >= config.country_threshold {
        report.flag(
            config.country_weight,
            UnusualActivity::new("multiple_locations", "Logins from several countries")
                .with_count(countries.len())
                .with_subjects(countries.into_iter().map(String::from).collect()),
            Some(RESTRICT_IPS),
        );
    }

    let off_hours = history
        .iter()
        .filter(|entry| entry.success)
        .filter(|entry| {
            let hour = local_hour(entry.timestamp, entry.timezone.as_deref());
            is_off_hours(hour, config.off_hours_start, config.off_hours_end)
        })
        .count();
    if off_hours >= config.off_hours_success_threshold {
        report.flag(
            config.off_hours_weight,
            UnusualActivity::new("unusual_times", "Successful logins at unusual hours")
                .with_count(off_hours),
            None,
        );
    }

    report
}

/// Concurrent sessions and sessions on untrusted devices
pub fn analyze_devices(
    active_sessions: &[SessionRecord],
    devices: &DeviceTrustState,
    config: &RiskConfig,
) -> AnalyzerReport {
    let mut report = AnalyzerReport::default();
    let active: Vec<&SessionRecord> = active_sessions.iter().filter(|s| s.is_active).collect();

    if active.len() > config.max_active_sessions {
        report.flag(
            config.active_sessions_weight,
            UnusualActivity::new(
                "multiple_sessions",
                format!("{} concurrent sessions", active.len()),
            )
            .with_count(active.len()),
            Some(END_UNUSED_SESSIONS),
        );
    }

    let untrusted: BTreeSet<&str> = active
        .iter()
        .map(|s| s.device_id.as_str())
        .filter(|device| !devices.is_trusted(device))
        .collect();
    if !untrusted.is_empty() {
        let sessions = active
            .iter()
            .filter(|s| !devices.is_trusted(&s.device_id))
            .count();
        report.flag(
            config.untrusted_device_weight,
            UnusualActivity::new(
                "new_devices",
                format!("{} session(s) on untrusted devices", sessions),
            )
            .with_count(sessions)
            .with_subjects(untrusted.into_iter().map(String::from).collect()),
            Some(REGISTER_DEVICES),
        );
    }

    report
}

/// Per-address attempt volume and failing addresses
pub fn analyze_ips(history: &[LoginHistoryEntry], config: &RiskConfig) -> AnalyzerReport {
    let mut report = AnalyzerReport::default();

    let mut attempts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut failing: BTreeSet<&str> = BTreeSet::new();
    for entry in history.iter().filter(|e| !e.ip.is_empty()) {
        *attempts.entry(entry.ip.as_str()).or_default() += 1;
        if !entry.success {
            failing.insert(entry.ip.as_str());
        }
    }

    for (ip, count) in attempts {
        if count > config.ip_attempt_limit {
            report.flag(
                config.ip_excessive_weight,
                UnusualActivity::new(
                    "excessive_attempts",
                    format!("{} login attempts from {}", count, ip),
                )
                .with_count(count)
                .with_subjects(vec![ip.to_string()]),
                Some(BLOCK_IP),
            );
        }
    }

    if !failing.is_empty() {
        let score = config.failed_ip_weight * failing.len() as u32;
        report.flag(
            score,
            UnusualActivity::new(
                "suspicious_ips",
                format!("{} address(es) with failed logins", failing.len()),
            )
            .with_count(failing.len())
            .with_subjects(failing.into_iter().map(String::from).collect()),
            None,
        );
    }

    report
}
