//! Per-account delivery decisions: quiet hours, topic and severity toggles,
//! and channel selection.

use chrono::{DateTime, Utc};

use crate::localtime::{in_half_open_window, local_time};
use crate::models::notification::QuietHours;
use crate::models::{NotificationKind, NotificationPreference, Severity};

/// Resolved destination for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    Email(String),
    Webhook(String),
    Push(String),
}

impl DeliveryTarget {
    pub fn channel(&self) -> &'static str {
        match self {
            DeliveryTarget::Email(_) => "email",
            DeliveryTarget::Webhook(_) => "webhook",
            DeliveryTarget::Push(_) => "push",
        }
    }
}

/// Whether `now` falls inside the account's quiet hours
pub fn in_quiet_hours(quiet_hours: &QuietHours, now: DateTime<Utc>) -> bool {
    if !quiet_hours.enabled {
        return false;
    }
    let local = local_time(now, Some(&quiet_hours.timezone));
    in_half_open_window(local, quiet_hours.start, quiet_hours.end)
}

/// Quiet hours first (CRITICAL always passes), then the topic toggle, then
/// the severity toggle.
pub fn should_deliver(
    preferences: &NotificationPreference,
    kind: NotificationKind,
    severity: Severity,
    now: DateTime<Utc>,
) -> bool {
    if in_quiet_hours(&preferences.quiet_hours, now) && severity != Severity::Critical {
        return false;
    }
    if !preferences.event_types.allows(kind) {
        return false;
    }
    preferences.severities.allows(severity)
}

/// Enabled channels that also have a usable target
pub fn select_channels(preferences: &NotificationPreference) -> Vec<DeliveryTarget> {
    let mut targets = Vec::new();

    if preferences.email.enabled {
        match preferences.email.address.as_deref() {
            Some(address) if is_valid_email(address) => {
                targets.push(DeliveryTarget::Email(address.to_string()))
            }
            _ => log::debug!(
                "Email enabled for {} but no valid address is set",
                preferences.account_id
            ),
        }
    }

    if preferences.webhook.enabled {
        match preferences.webhook.url.as_deref() {
            Some(url) if is_valid_webhook_url(url) => {
                targets.push(DeliveryTarget::Webhook(url.to_string()))
            }
            _ => log::debug!(
                "Webhook enabled for {} but no valid URL is set",
                preferences.account_id
            ),
        }
    }

    if preferences.push.enabled {
        targets.push(DeliveryTarget::Push(preferences.account_id.clone()));
    }

    targets
}

fn is_valid_email(address: &str) -> bool {
    match address.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn is_valid_webhook_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn prefs() -> NotificationPreference {
        let mut prefs = NotificationPreference::defaults_for("alice");
        prefs.quiet_hours = QuietHours {
            enabled: true,
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            timezone: "UTC".to_string(),
        };
        prefs
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, h, m, 0).unwrap()
    }

    #[test]
    fn test_quiet_hours_suppress_all_but_critical() {
        let prefs = prefs();
        let kind = NotificationKind::SecurityEvents;
        assert!(!should_deliver(&prefs, kind, Severity::Medium, utc(23, 0)));
        assert!(should_deliver(&prefs, kind, Severity::Critical, utc(23, 0)));
        assert!(!should_deliver(&prefs, kind, Severity::High, utc(5, 59)));
        assert!(should_deliver(&prefs, kind, Severity::Medium, utc(6, 0)));
    }

    #[test]
    fn test_quiet_hours_use_account_timezone() {
        let mut prefs = prefs();
        prefs.quiet_hours.timezone = "Asia/Seoul".to_string();
        // 14:00 UTC is 23:00 in Seoul
        assert!(!should_deliver(&prefs, NotificationKind::SecurityEvents, Severity::High, utc(14, 0)));
        assert!(should_deliver(&prefs, NotificationKind::SecurityEvents, Severity::High, utc(23, 0)));
    }

    #[test]
    fn test_topic_and_severity_toggles() {
        let mut prefs = prefs();
        prefs.quiet_hours.enabled = false;

        assert!(!should_deliver(&prefs, NotificationKind::AuditLogs, Severity::High, utc(12, 0)));
        assert!(!should_deliver(&prefs, NotificationKind::LoginAttempts, Severity::Low, utc(12, 0)));
        assert!(should_deliver(&prefs, NotificationKind::LoginAttempts, Severity::Medium, utc(12, 0)));

        prefs.event_types.login_attempts = false;
        assert!(!should_deliver(&prefs, NotificationKind::LoginAttempts, Severity::Critical, utc(12, 0)));
    }

    #[test]
    fn test_critical_in_quiet_hours_still_respects_toggles() {
        let mut prefs = prefs();
        prefs.severities.critical = false;
        assert!(!should_deliver(&prefs, NotificationKind::SecurityEvents, Severity::Critical, utc(23, 0)));
    }

    #[test]
    fn test_channel_selection() {
        let mut prefs = NotificationPreference::defaults_for("alice");
        assert_eq!(select_channels(&prefs), vec![DeliveryTarget::Push("alice".to_string())]);

        prefs.email.address = Some("alice@example.com".to_string());
        prefs.webhook.enabled = true;
        prefs.webhook.url = Some("not a url".to_string());
        assert_eq!(
            select_channels(&prefs),
            vec![
                DeliveryTarget::Email("alice@example.com".to_string()),
                DeliveryTarget::Push("alice".to_string()),
            ]
        );

        prefs.webhook.url = Some("https://hooks.example.com/warden".to_string());
        prefs.push.enabled = false;
        prefs.email.address = Some("broken@".to_string());
        assert_eq!(
            select_channels(&prefs),
            vec![DeliveryTarget::Webhook("https://hooks.example.com/warden".to_string())]
        );
    }
}
