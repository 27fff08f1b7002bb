use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::detection::inspection::ThreatKind;

/// Configuration for the warden security layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event store / account state storage
    pub storage: StorageConfig,
    /// Geo and device enrichment
    pub enrichment: EnrichmentConfig,
    /// Login attempt and lockout policy
    pub lockout: LockoutConfig,
    /// Sliding-window correlation thresholds
    pub correlation: CorrelationConfig,
    /// Risk scoring weights and cutoffs
    pub risk: RiskConfig,
    /// Audit and security event retention
    pub retention: RetentionConfig,
    /// Notification delivery
    pub notifications: NotificationConfig,
    /// Request payload inspection rules
    pub inspection: InspectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database_path: PathBuf::from("warden.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// MaxMind GeoLite2-City database; locations stay empty when unset
    pub geoip_database: Option<PathBuf>,
    /// Upper bound for a single enrichment lookup
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            geoip_database: None,
            timeout_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Consecutive failures that lock the account
    pub max_failures: u32,
    /// Lock duration from the triggering failure
    pub lock_minutes: i64,
    /// Login history entries kept per account
    pub history_limit: usize,
    /// Compare-and-swap retries before giving up on a contended account
    pub max_update_retries: usize,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        LockoutConfig {
            max_failures: 5,
            lock_minutes: 30,
            history_limit: 100,
            max_update_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub enabled: bool,
    /// Trailing window for the per-IP checks
    pub ip_window_minutes: i64,
    /// Trailing window for the per-account checks
    pub account_window_hours: i64,
    /// LOGIN_FAILURE events from one IP that fire the burst check
    pub ip_failure_threshold: usize,
    /// Distinct accounts seen from one IP that fire the fan-out check
    pub ip_account_threshold: usize,
    /// Distinct countries per account tolerated before firing
    pub account_country_limit: usize,
    /// Off-hours events per account that fire the check
    pub off_hours_threshold: usize,
    /// First off-hours hour (inclusive)
    pub off_hours_start: u32,
    /// Last off-hours hour (inclusive)
    pub off_hours_end: u32,
    /// Pending events buffered for the correlation worker
    pub queue_capacity: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            enabled: true,
            ip_window_minutes: 60,
            account_window_hours: 24,
            ip_failure_threshold: 10,
            ip_account_threshold: 5,
            account_country_limit: 2,
            off_hours_threshold: 3,
            off_hours_start: 22,
            off_hours_end: 5,
            queue_capacity: 1000,
        }
    }
}

/// Risk scoring constants.
///
/// These are empirical values with no stated derivation and should be
/// calibrated against real data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub recent_login_window: usize,
    pub recent_failure_threshold: usize,
    pub recent_failure_weight: u32,
    pub country_window: usize,
    pub country_threshold: usize,
    pub country_weight: u32,
    pub off_hours_success_threshold: usize,
    pub off_hours_weight: u32,
    /// Off-hours band for successful logins, inclusive, in the login's local time
    pub off_hours_start: u32,
    pub off_hours_end: u32,
    pub max_active_sessions: usize,
    pub active_sessions_weight: u32,
    pub untrusted_device_weight: u32,
    pub ip_attempt_limit: usize,
    pub ip_excessive_weight: u32,
    pub failed_ip_weight: u32,
    pub high_threshold: u32,
    pub medium_threshold: u32,
    /// Assessments are reused for this long
    pub cache_ttl_seconds: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            recent_login_window: 10,
            recent_failure_threshold: 3,
            recent_failure_weight: 30,
            country_window: 20,
            country_threshold: 3,
            country_weight: 20,
            off_hours_success_threshold: 3,
            off_hours_weight: 10,
            off_hours_start: 22,
            off_hours_end: 5,
            max_active_sessions: 3,
            active_sessions_weight: 15,
            untrusted_device_weight: 10,
            ip_attempt_limit: 10,
            ip_excessive_weight: 20,
            failed_ip_weight: 5,
            high_threshold: 70,
            medium_threshold: 40,
            cache_ttl_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Floor below which cleanup is refused
    pub minimum_days: i64,
    /// Retention used by the scheduled sweeper
    pub default_days: i64,
    /// Interval between sweeps
    pub sweep_interval_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            minimum_days: 30,
            default_days: 90,
            sweep_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Pending notifications buffered before new ones are dropped
    pub queue_capacity: usize,
    /// Timeout for outbound webhook requests
    pub http_timeout_secs: u64,
    /// Sender address for security mail
    pub email_from: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            enabled: true,
            queue_capacity: 100,
            http_timeout_secs: 30,
            email_from: "security@localhost".to_string(),
        }
    }
}

/// A single `(field glob, pattern)` inspection rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionRuleConfig {
    /// Glob over dotted payload paths, e.g. `body.*` or `query.search`
    pub field: String,
    /// Regular expression tested against string leaves
    pub pattern: String,
    pub kind: ThreatKind,
}

impl InspectionRuleConfig {
    fn any_field(pattern: &str, kind: ThreatKind) -> Self {
        InspectionRuleConfig {
            field: "*".to_string(),
            pattern: pattern.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    pub enabled: bool,
    /// Evaluated in order; the first match per field and kind wins
    pub rules: Vec<InspectionRuleConfig>,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        let xss = [
            r"(?is)<script\b.*?</script>",
            r"(?i)javascript:",
            r"(?i)onerror=",
            r"(?i)onload=",
        ];
        let injection = [
            r"(?i)\$where",
            r"(?i)\$ne",
            r"(?i)\$gt",
            r"(?i)\$lt",
            r"(?i)\$or",
            r"(?i)\$and",
            r"\{\s*\$",
            r";\s*$",
            r"--",
            r"/\*",
            r"(?i)UNION\s+SELECT",
        ];

        let rules = xss
            .iter()
            .map(|p| InspectionRuleConfig::any_field(p, ThreatKind::Xss))
            .chain(
                injection
                    .iter()
                    .map(|p| InspectionRuleConfig::any_field(p, ThreatKind::Injection)),
            )
            .collect();

        InspectionConfig {
            enabled: true,
            rules,
        }
    }
}

const MINUTES_PER_YEAR: i64 = 525_600;
const HOURS_PER_YEAR: i64 = 8_760;
const MAX_RETENTION_DAYS: i64 = 36_500;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("retention.default_days ({default_days}) is below retention.minimum_days ({minimum_days})")]
    RetentionBelowMinimum { default_days: i64, minimum_days: i64 },
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations and hours that the time arithmetic cannot represent
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("lockout.max_failures", i64::from(self.lockout.max_failures), 1, 1_000)?;
        check_range("lockout.lock_minutes", self.lockout.lock_minutes, 1, MINUTES_PER_YEAR)?;
        check_range(
            "correlation.ip_window_minutes",
            self.correlation.ip_window_minutes,
            1,
            MINUTES_PER_YEAR,
        )?;
        check_range(
            "correlation.account_window_hours",
            self.correlation.account_window_hours,
            1,
            HOURS_PER_YEAR,
        )?;
        check_range(
            "correlation.off_hours_start",
            i64::from(self.correlation.off_hours_start),
            0,
            23,
        )?;
        check_range(
            "correlation.off_hours_end",
            i64::from(self.correlation.off_hours_end),
            0,
            23,
        )?;
        check_range("risk.off_hours_start", i64::from(self.risk.off_hours_start), 0, 23)?;
        check_range("risk.off_hours_end", i64::from(self.risk.off_hours_end), 0, 23)?;
        check_range("risk.cache_ttl_seconds", self.risk.cache_ttl_seconds, 0, SECONDS_PER_DAY)?;
        check_range(
            "retention.minimum_days",
            self.retention.minimum_days,
            1,
            MAX_RETENTION_DAYS,
        )?;
        check_range(
            "retention.default_days",
            self.retention.default_days,
            1,
            MAX_RETENTION_DAYS,
        )?;
        if self.retention.default_days < self.retention.minimum_days {
            return Err(ConfigError::RetentionBelowMinimum {
                default_days: self.retention.default_days,
                minimum_days: self.retention.minimum_days,
            });
        }
        Ok(())
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
