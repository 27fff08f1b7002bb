//! Time helpers shared by correlation, risk scoring, lockout and quiet hours

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Parse an IANA timezone name, falling back to UTC
pub fn parse_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            log::warn!("Unknown timezone {:?}, using UTC", name);
            Tz::UTC
        }
    }
}

/// `now - days`, or None when either the span or the result leaves chrono's range
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|span| now.checked_sub_signed(span))
}

pub fn hours_before(now: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    Duration::try_hours(hours).and_then(|span| now.checked_sub_signed(span))
}

pub fn minutes_before(now: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(minutes).and_then(|span| now.checked_sub_signed(span))
}

pub fn minutes_after(now: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(minutes).and_then(|span| now.checked_add_signed(span))
}

/// Wall-clock time of `ts` in the given zone (UTC when absent)
pub fn local_time(ts: DateTime<Utc>, timezone: Option<&str>) -> NaiveTime {
    let tz = timezone.map(parse_timezone).unwrap_or(Tz::UTC);
    tz.from_utc_datetime(&ts.naive_utc()).time()
}

pub fn local_hour(ts: DateTime<Utc>, timezone: Option<&str>) -> u32 {
    local_time(ts, timezone).hour()
}

/// Whether `hour` falls in the inclusive `[start, end]` band, which may wrap midnight
pub fn is_off_hours(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour <= end
    } else {
        hour >= start || hour <= end
    }
}

/// Whether `time` falls in `[start, end)`, wrapping midnight when `start > end`.
/// `start == end` is an empty window.
pub fn in_half_open_window(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start < end {
        time >= start && time < end
    } else if start > end {
        time >= start || time < end
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_local_hour_converts_zone() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 14, 30, 0).unwrap();
        assert_eq!(local_hour(ts, None), 14);
        assert_eq!(local_hour(ts, Some("Asia/Seoul")), 23);
        assert_eq!(local_hour(ts, Some("Not/AZone")), 14);
    }

    #[test]
    fn test_off_hours_wraps_midnight() {
        assert!(is_off_hours(22, 22, 5));
        assert!(is_off_hours(3, 22, 5));
        assert!(is_off_hours(5, 22, 5));
        assert!(!is_off_hours(6, 22, 5));
        assert!(!is_off_hours(21, 22, 5));
        assert!(is_off_hours(2, 1, 4));
    }

    #[test]
    fn test_checked_offsets() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(
            days_before(now, 30),
            Some(Utc.with_ymd_and_hms(2024, 2, 14, 12, 0, 0).unwrap())
        );
        assert_eq!(hours_before(now, 24), Some(now - Duration::days(1)));
        assert_eq!(minutes_after(now, 30), Some(now + Duration::minutes(30)));

        assert_eq!(days_before(now, 100_000_000), None);
        assert_eq!(days_before(now, i64::MAX), None);
        assert_eq!(hours_before(now, i64::MAX), None);
        assert_eq!(minutes_before(now, i64::MIN), None);
        assert_eq!(minutes_after(now, i64::MAX), None);
    }

    #[test]
    fn test_half_open_window() {
        assert!(in_half_open_window(hm(23, 0), hm(22, 0), hm(6, 0)));
        assert!(in_half_open_window(hm(5, 59), hm(22, 0), hm(6, 0)));
        assert!(!in_half_open_window(hm(6, 0), hm(22, 0), hm(6, 0)));
        assert!(in_half_open_window(hm(12, 0), hm(9, 0), hm(17, 0)));
        assert!(!in_half_open_window(hm(17, 0), hm(9, 0), hm(17, 0)));
        assert!(!in_half_open_window(hm(9, 0), hm(9, 0), hm(9, 0)));
    }
}
