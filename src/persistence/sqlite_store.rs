//! SQLite implementation of the EventStore and AccountStore traits

use super::{AccountStore, AuditQuery, EventQuery, EventStore, PersistenceError};
use crate::models::{
    AuditDetails, AuditMetadata, AuditRecord, DeviceStatus, DeviceTrustState, EnrichedDevice,
    EnrichedLocation, LoginAttemptState, LoginHistoryEntry, NotificationPreference,
    RequestContext, SecurityEvent, SessionRecord,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const EVENT_COLUMNS: &str = "id, event_type, severity, description, account_id, timestamp, ip, \
     user_agent, country, city, timezone, browser, os, device_type, method, path, headers, body";

const AUDIT_COLUMNS: &str = "id, action, category, account_id, target_id, target_kind, \
     before_state, after_state, reason, ip, user_agent, path, method, status, timestamp";

const SESSION_COLUMNS: &str =
    "session_id, account_id, device_id, ip, user_agent, created_at, last_active_at, is_active";

/// SQLite-based storage for events, audits and account state
///
/// All access goes through a single connection guarded by a mutex, which
/// also serialises the read-check-write steps of the conditional updates.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    purge_batch: usize,
}

/// Rows removed per DELETE during retention purges
pub const DEFAULT_PURGE_BATCH: usize = 500;

impl SqliteStore {
    /// Open (or create) a store at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
            purge_batch: DEFAULT_PURGE_BATCH,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Mutex::new(conn),
            purge_batch: DEFAULT_PURGE_BATCH,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn with_purge_batch(mut self, batch: usize) -> Self {
        self.purge_batch = batch.max(1);
        self
    }

    /// Delete rows older than `cutoff` one batch at a time.
    ///
    /// The connection lock is taken per batch so writers can interleave.
    fn purge_table(&self, table: &str, cutoff: i64) -> Result<usize, PersistenceError> {
        let sql = format!(
            "DELETE FROM {table} WHERE rowid IN
             (SELECT rowid FROM {table} WHERE timestamp < ? LIMIT ?)",
            table = table
        );
        let batch = self.purge_batch as i64;
        let mut deleted = 0;
        loop {
            let removed = self.conn()?.execute(&sql, params![cutoff, batch])?;
            deleted += removed;
            if removed < self.purge_batch {
                return Ok(deleted);
            }
        }
    }

    fn initialize_schema(&self) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)
    }

    /// Latest stored timestamp for an account in the given table
    fn latest_for_account(
        conn: &Connection,
        table: &str,
        account_id: &str,
    ) -> Result<Option<i64>, PersistenceError> {
        let sql = format!("SELECT MAX(timestamp) FROM {} WHERE account_id = ?", table);
        let latest: Option<i64> = conn.query_row(&sql, params![account_id], |row| row.get(0))?;
        Ok(latest)
    }

    /// Normalise to millisecond precision and keep the account trail strictly increasing
    fn monotonic_timestamp(
        conn: &Connection,
        table: &str,
        account_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, PersistenceError> {
        let mut millis = to_millis(timestamp);
        if let Some(account_id) = account_id {
            if let Some(latest) = Self::latest_for_account(conn, table, account_id)? {
                if latest >= millis {
                    millis = latest + 1;
                }
            }
        }
        from_millis(millis)
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| PersistenceError::InvalidData(format!("Invalid timestamp: {}", millis)))
}

fn opt_from_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, PersistenceError> {
    millis.map(from_millis).transpose()
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

/// Conjunction of SQL conditions with positional values
#[derive(Default)]
struct Filter {
    conditions: Vec<&'static str>,
    values: Vec<Value>,
}

impl Filter {
    fn push(&mut self, condition: &'static str, value: Value) {
        self.conditions.push(condition);
        self.values.push(value);
    }

    fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn with_paging(mut self, offset: usize, limit: Option<usize>) -> Vec<Value> {
        self.values
            .push(Value::Integer(limit.map(|l| l as i64).unwrap_or(-1)));
        self.values.push(Value::Integer(offset as i64));
        self.values
    }

    fn events(query: &EventQuery) -> Self {
        let mut filter = Filter::default();
        if let Some(event_type) = query.event_type {
            filter.push("event_type = ?", text(event_type.as_str()));
        }
        if let Some(severity) = query.severity {
            filter.push("severity = ?", text(severity.as_str()));
        }
        if let Some(ref account_id) = query.account_id {
            filter.push("account_id = ?", text(account_id));
        }
        if let Some(ref ip) = query.ip {
            filter.push("ip = ?", text(ip));
        }
        if let Some(start) = query.start {
            filter.push("timestamp >= ?", Value::Integer(to_millis(start)));
        }
        if let Some(end) = query.end {
            filter.push("timestamp <= ?", Value::Integer(to_millis(end)));
        }
        filter
    }

    fn audits(query: &AuditQuery) -> Self {
        let mut filter = Filter::default();
        if let Some(action) = query.action {
            filter.push("action = ?", text(action.as_str()));
        }
        if let Some(category) = query.category {
            filter.push("category = ?", text(category.as_str()));
        }
        if let Some(ref account_id) = query.account_id {
            filter.push("account_id = ?", text(account_id));
        }
        if let Some(ref target_id) = query.target_id {
            filter.push("target_id = ?", text(target_id));
        }
        if let Some(start) = query.start {
            filter.push("timestamp >= ?", Value::Integer(to_millis(start)));
        }
        if let Some(end) = query.end {
            filter.push("timestamp <= ?", Value::Integer(to_millis(end)));
        }
        filter
    }
}

/// Raw security_events row before enum and JSON decoding
struct EventRow {
    id: String,
    event_type: String,
    severity: String,
    description: String,
    account_id: Option<String>,
    timestamp: i64,
    ip: String,
    user_agent: String,
    country: Option<String>,
    city: Option<String>,
    timezone: Option<String>,
    browser: Option<String>,
    os: Option<String>,
    device_type: Option<String>,
    method: Option<String>,
    path: Option<String>,
    headers: String,
    body: Option<String>,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(EventRow {
            id: row.get(0)?,
            event_type: row.get(1)?,
            severity: row.get(2)?,
            description: row.get(3)?,
            account_id: row.get(4)?,
            timestamp: row.get(5)?,
            ip: row.get(6)?,
            user_agent: row.get(7)?,
            country: row.get(8)?,
            city: row.get(9)?,
            timezone: row.get(10)?,
            browser: row.get(11)?,
            os: row.get(12)?,
            device_type: row.get(13)?,
            method: row.get(14)?,
            path: row.get(15)?,
            headers: row.get(16)?,
            body: row.get(17)?,
        })
    }

    fn into_event(self) -> Result<SecurityEvent, PersistenceError> {
        Ok(SecurityEvent {
            event_type: self.event_type.parse().map_err(PersistenceError::InvalidData)?,
            severity: self.severity.parse().map_err(PersistenceError::InvalidData)?,
            timestamp: from_millis(self.timestamp)?,
            id: self.id,
            description: self.description,
            account_id: self.account_id,
            ip: self.ip,
            user_agent: self.user_agent,
            location: EnrichedLocation {
                country: self.country,
                city: self.city,
                timezone: self.timezone,
            },
            device: EnrichedDevice {
                browser: self.browser,
                os: self.os,
                device_type: self.device_type,
            },
            request: RequestContext {
                method: self.method,
                path: self.path,
                redacted_headers: serde_json::from_str(&self.headers)?,
                redacted_body: self.body.as_deref().map(serde_json::from_str).transpose()?,
            },
        })
    }
}

/// Raw audit_records row
struct AuditRow {
    id: String,
    action: String,
    category: String,
    account_id: Option<String>,
    target_id: Option<String>,
    target_kind: Option<String>,
    before: Option<String>,
    after: Option<String>,
    reason: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    path: Option<String>,
    method: Option<String>,
    status: Option<u16>,
    timestamp: i64,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AuditRow {
            id: row.get(0)?,
            action: row.get(1)?,
            category: row.get(2)?,
            account_id: row.get(3)?,
            target_id: row.get(4)?,
            target_kind: row.get(5)?,
            before: row.get(6)?,
            after: row.get(7)?,
            reason: row.get(8)?,
            ip: row.get(9)?,
            user_agent: row.get(10)?,
            path: row.get(11)?,
            method: row.get(12)?,
            status: row.get(13)?,
            timestamp: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<AuditRecord, PersistenceError> {
        Ok(AuditRecord {
            action: self.action.parse().map_err(PersistenceError::InvalidData)?,
            category: self.category.parse().map_err(PersistenceError::InvalidData)?,
            timestamp: from_millis(self.timestamp)?,
            id: self.id,
            account_id: self.account_id,
            target_id: self.target_id,
            target_kind: self.target_kind,
            details: AuditDetails {
                before: self.before.as_deref().map(serde_json::from_str).transpose()?,
                after: self.after.as_deref().map(serde_json::from_str).transpose()?,
                reason: self.reason,
            },
            metadata: AuditMetadata {
                ip: self.ip,
                user_agent: self.user_agent,
                path: self.path,
                method: self.method,
                status: self.status,
            },
        })
    }
}

struct SessionRow {
    session_id: String,
    account_id: String,
    device_id: String,
    ip: String,
    user_agent: String,
    created_at: i64,
    last_active_at: i64,
    is_active: bool,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SessionRow {
            session_id: row.get(0)?,
            account_id: row.get(1)?,
            device_id: row.get(2)?,
            ip: row.get(3)?,
            user_agent: row.get(4)?,
            created_at: row.get(5)?,
            last_active_at: row.get(6)?,
            is_active: row.get(7)?,
        })
    }

    fn into_session(self) -> Result<SessionRecord, PersistenceError> {
        Ok(SessionRecord {
            created_at: from_millis(self.created_at)?,
            last_active_at: from_millis(self.last_active_at)?,
            session_id: self.session_id,
            account_id: self.account_id,
            device_id: self.device_id,
            ip: self.ip,
            user_agent: self.user_agent,
            is_active: self.is_active,
        })
    }
}

impl EventStore for SqliteStore {
    fn append_event(&self, event: &SecurityEvent) -> Result<SecurityEvent, PersistenceError> {
        let conn = self.conn()?;
        let mut stored = event.clone();
        stored.timestamp = Self::monotonic_timestamp(
            &conn,
            "security_events",
            event.account_id.as_deref(),
            event.timestamp,
        )?;

        let headers = serde_json::to_string(&stored.request.redacted_headers)?;
        let body = stored
            .request
            .redacted_body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO security_events
             (id, event_type, severity, description, account_id, timestamp, ip, user_agent,
              country, city, timezone, browser, os, device_type, method, path, headers, body)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                stored.id,
                stored.event_type.as_str(),
                stored.severity.as_str(),
                stored.description,
                stored.account_id,
                to_millis(stored.timestamp),
                stored.ip,
                stored.user_agent,
                stored.location.country,
                stored.location.city,
                stored.location.timezone,
                stored.device.browser,
                stored.device.os,
                stored.device.device_type,
                stored.request.method,
                stored.request.path,
                headers,
                body,
            ],
        )?;

        Ok(stored)
    }

    fn find_events(&self, query: &EventQuery) -> Result<Vec<SecurityEvent>, PersistenceError> {
        let conn = self.conn()?;
        let filter = Filter::events(query);
        let sql = format!(
            "SELECT {} FROM security_events{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            EVENT_COLUMNS,
            filter.sql()
        );
        let values = filter.with_paging(query.offset, query.limit);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    fn count_events(&self, query: &EventQuery) -> Result<usize, PersistenceError> {
        let conn = self.conn()?;
        let filter = Filter::events(query);
        let sql = format!("SELECT COUNT(*) FROM security_events{}", filter.sql());
        let count: i64 =
            conn.query_row(&sql, params_from_iter(filter.values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn append_audit(&self, record: &AuditRecord) -> Result<AuditRecord, PersistenceError> {
        let conn = self.conn()?;
        let mut stored = record.clone();
        stored.timestamp = Self::monotonic_timestamp(
            &conn,
            "audit_records",
            record.account_id.as_deref(),
            record.timestamp,
        )?;

        let before = stored
            .details
            .before
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let after = stored
            .details
            .after
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO audit_records
             (id, action, category, account_id, target_id, target_kind, before_state,
              after_state, reason, ip, user_agent, path, method, status, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                stored.id,
                stored.action.as_str(),
                stored.category.as_str(),
                stored.account_id,
                stored.target_id,
                stored.target_kind,
                before,
                after,
                stored.details.reason,
                stored.metadata.ip,
                stored.metadata.user_agent,
                stored.metadata.path,
                stored.metadata.method,
                stored.metadata.status,
                to_millis(stored.timestamp),
            ],
        )?;

        Ok(stored)
    }

    fn find_audits(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, PersistenceError> {
        let conn = self.conn()?;
        let filter = Filter::audits(query);
        let sql = format!(
            "SELECT {} FROM audit_records{} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            AUDIT_COLUMNS,
            filter.sql()
        );
        let values = filter.with_paging(query.offset, query.limit);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), AuditRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(AuditRow::into_record).collect()
    }

    fn count_audits(&self, query: &AuditQuery) -> Result<usize, PersistenceError> {
        let conn = self.conn()?;
        let filter = Filter::audits(query);
        let sql = format!("SELECT COUNT(*) FROM audit_records{}", filter.sql());
        let count: i64 =
            conn.query_row(&sql, params_from_iter(filter.values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let cutoff = to_millis(cutoff);
        let audits = self.purge_table("audit_records", cutoff)?;
        let events = self.purge_table("security_events", cutoff)?;
        Ok(audits + events)
    }
}

impl AccountStore for SqliteStore {
    fn load_login_state(&self, account_id: &str) -> Result<LoginAttemptState, PersistenceError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT failure_count, last_failure_at, locked_until, version
                 FROM login_attempt_state WHERE account_id = ?",
                params![account_id],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((failure_count, last_failure_at, locked_until, version)) => {
                Ok(LoginAttemptState {
                    failure_count,
                    last_failure_at: opt_from_millis(last_failure_at)?,
                    locked_until: opt_from_millis(locked_until)?,
                    version: version as u64,
                })
            }
            None => Ok(LoginAttemptState::default()),
        }
    }

    fn compare_and_swap_login_state(
        &self,
        account_id: &str,
        expected_version: u64,
        next: &LoginAttemptState,
    ) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let last_failure_at = next.last_failure_at.map(to_millis);
        let locked_until = next.locked_until.map(to_millis);

        if expected_version == 0 {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO login_attempt_state
                 (account_id, failure_count, last_failure_at, locked_until, version)
                 VALUES (?, ?, ?, ?, 1)",
                params![account_id, next.failure_count, last_failure_at, locked_until],
            )?;
            if inserted == 1 {
                return Ok(true);
            }
        }

        let updated = conn.execute(
            "UPDATE login_attempt_state
             SET failure_count = ?, last_failure_at = ?, locked_until = ?, version = version + 1
             WHERE account_id = ? AND version = ?",
            params![
                next.failure_count,
                last_failure_at,
                locked_until,
                account_id,
                expected_version as i64
            ],
        )?;

        Ok(updated == 1)
    }

    fn append_login_history(
        &self,
        account_id: &str,
        entry: &LoginHistoryEntry,
        cap: usize,
    ) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO login_history
             (account_id, timestamp, ip, user_agent, success, country, timezone)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                account_id,
                to_millis(entry.timestamp),
                entry.ip,
                entry.user_agent,
                entry.success,
                entry.country,
                entry.timezone
            ],
        )?;

        // Oldest entries go first once the cap is exceeded
        conn.execute(
            "DELETE FROM login_history
             WHERE account_id = ?1 AND id NOT IN (
                 SELECT id FROM login_history WHERE account_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT ?2
             )",
            params![account_id, cap as i64],
        )?;
        Ok(())
    }

    fn login_history(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LoginHistoryEntry>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, ip, user_agent, success, country, timezone
             FROM login_history WHERE account_id = ?
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )?;

        let rows = stmt
            .query_map(
                params![account_id, limit.map(|l| l as i64).unwrap_or(-1)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(timestamp, ip, user_agent, success, country, timezone)| {
                Ok(LoginHistoryEntry {
                    timestamp: from_millis(timestamp)?,
                    ip,
                    user_agent,
                    success,
                    country,
                    timezone,
                })
            })
            .collect()
    }

    fn device_trust_state(&self, account_id: &str) -> Result<DeviceTrustState, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, status FROM device_trust
             WHERE account_id = ? ORDER BY updated_at, device_id",
        )?;
        let rows = stmt
            .query_map(params![account_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = DeviceTrustState::default();
        for (device_id, status) in rows {
            match DeviceStatus::parse(&status) {
                Some(DeviceStatus::Trusted) => state.trusted_devices.push(device_id),
                Some(DeviceStatus::Blocked) => state.blocked_devices.push(device_id),
                None => {
                    return Err(PersistenceError::InvalidData(format!(
                        "Invalid device status: {}",
                        status
                    )))
                }
            }
        }
        Ok(state)
    }

    fn device_status(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceStatus>, PersistenceError> {
        let conn = self.conn()?;
        current_device_status(&conn, account_id, device_id)
    }

    fn transition_device(
        &self,
        account_id: &str,
        device_id: &str,
        expected: Option<DeviceStatus>,
        next: Option<DeviceStatus>,
        at: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        if current_device_status(&conn, account_id, device_id)? != expected {
            return Ok(false);
        }

        match next {
            Some(status) => {
                conn.execute(
                    "INSERT OR REPLACE INTO device_trust (account_id, device_id, status, updated_at)
                     VALUES (?, ?, ?, ?)",
                    params![account_id, device_id, status.as_str(), to_millis(at)],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM device_trust WHERE account_id = ? AND device_id = ?",
                    params![account_id, device_id],
                )?;
            }
        }
        Ok(true)
    }

    fn open_session(&self, session: &SessionRecord) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO sessions
             (session_id, account_id, device_id, ip, user_agent, created_at, last_active_at, is_active)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM device_trust
                 WHERE account_id = ? AND device_id = ? AND status = ?
             )",
            params![
                session.session_id,
                session.account_id,
                session.device_id,
                session.ip,
                session.user_agent,
                to_millis(session.created_at),
                to_millis(session.last_active_at),
                session.is_active,
                session.account_id,
                session.device_id,
                DeviceStatus::Blocked.as_str()
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, PersistenceError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM sessions WHERE session_id = ?", SESSION_COLUMNS);
        let row = conn
            .query_row(&sql, params![session_id], SessionRow::from_row)
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET last_active_at = ? WHERE session_id = ?",
            params![to_millis(at), session_id],
        )?;
        Ok(())
    }

    fn end_session(&self, session_id: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET is_active = 0 WHERE session_id = ? AND is_active = 1",
            params![session_id],
        )?;
        Ok(updated == 1)
    }

    fn end_device_sessions(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<usize, PersistenceError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET is_active = 0
             WHERE account_id = ? AND device_id = ? AND is_active = 1",
            params![account_id, device_id],
        )?;
        Ok(updated)
    }

    fn sessions_for_account(
        &self,
        account_id: &str,
        active_only: bool,
    ) -> Result<Vec<SessionRecord>, PersistenceError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE account_id = ? AND (is_active = 1 OR ? = 0)
             ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![account_id, active_only], SessionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    fn device_known(&self, account_id: &str, device_id: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let known: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE account_id = ? AND device_id = ?)",
            params![account_id, device_id],
            |row| row.get(0),
        )?;
        Ok(known)
    }

    fn load_preferences(
        &self,
        account_id: &str,
    ) -> Result<Option<NotificationPreference>, PersistenceError> {
        let conn = self.conn()?;
        let settings: Option<String> = conn
            .query_row(
                "SELECT settings FROM notification_preferences WHERE account_id = ?",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(settings
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?)
    }

    fn save_preferences(&self, preferences: &NotificationPreference) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        let settings = serde_json::to_string(preferences)?;
        conn.execute(
            "INSERT OR REPLACE INTO notification_preferences (account_id, settings) VALUES (?, ?)",
            params![preferences.account_id, settings],
        )?;
        Ok(())
    }
}

fn current_device_status(
    conn: &Connection,
    account_id: &str,
    device_id: &str,
) -> Result<Option<DeviceStatus>, PersistenceError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM device_trust WHERE account_id = ? AND device_id = ?",
            params![account_id, device_id],
            |row| row.get(0),
        )
        .optional()?;

    status
        .map(|s| {
            DeviceStatus::parse(&s)
                .ok_or_else(|| PersistenceError::InvalidData(format!("Invalid device status: {}", s)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditAction, AuditCategory, EventType, Severity};
    use chrono::{Duration, TimeZone};

    fn create_test_store() -> SqliteStore {
        SqliteStore::in_memory().expect("Failed to create in-memory store")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(id: &str, account: Option<&str>, ip: &str, ts: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent {
            id: id.to_string(),
            event_type: EventType::LoginFailure,
            severity: Severity::Medium,
            description: "test".to_string(),
            account_id: account.map(String::from),
            timestamp: ts,
            ip: ip.to_string(),
            user_agent: "curl/8.0".to_string(),
            location: EnrichedLocation::default(),
            device: EnrichedDevice::default(),
            request: RequestContext::default(),
        }
    }

    fn audit(id: &str, account: &str, action: AuditAction, ts: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: id.to_string(),
            action,
            category: AuditCategory::Security,
            account_id: Some(account.to_string()),
            target_id: None,
            target_kind: None,
            details: AuditDetails::default(),
            metadata: AuditMetadata::default(),
            timestamp: ts,
        }
    }

    fn session(id: &str, account: &str, device: &str) -> SessionRecord {
        SessionRecord {
            session_id: id.to_string(),
            account_id: account.to_string(),
            device_id: device.to_string(),
            ip: "1.1.1.1".to_string(),
            user_agent: "ua".to_string(),
            created_at: at(0),
            last_active_at: at(0),
            is_active: true,
        }
    }

    #[test]
    fn test_event_roundtrip_keeps_enrichment_and_request() {
        let store = create_test_store();
        let mut e = event("e1", Some("alice"), "8.8.8.8", at(0));
        e.location.country = Some("US".to_string());
        e.device.browser = Some("Firefox".to_string());
        e.request.method = Some("POST".to_string());
        e.request
            .redacted_headers
            .insert("authorization".to_string(), "[REDACTED]".to_string());
        e.request.redacted_body = Some(serde_json::json!({"password": "[REDACTED]"}));

        store.append_event(&e).unwrap();

        let found = store
            .find_events(&EventQuery {
                account_id: Some("alice".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(found, vec![e]);
    }

    #[test]
    fn test_account_timestamps_are_monotonic() {
        let store = create_test_store();
        let first = store.append_event(&event("e1", Some("alice"), "1.1.1.1", at(10))).unwrap();
        let second = store.append_event(&event("e2", Some("alice"), "1.1.1.1", at(5))).unwrap();
        assert!(second.timestamp > first.timestamp);

        // Other accounts are unaffected
        let other = store.append_event(&event("e3", Some("bob"), "1.1.1.1", at(5))).unwrap();
        assert_eq!(other.timestamp, at(5));
    }

    #[test]
    fn test_event_filters_and_paging() {
        let store = create_test_store();
        for i in 0..5 {
            store
                .append_event(&event(&format!("a{}", i), Some("alice"), "1.1.1.1", at(i)))
                .unwrap();
        }
        store.append_event(&event("b0", Some("bob"), "2.2.2.2", at(3))).unwrap();

        let query = EventQuery {
            account_id: Some("alice".to_string()),
            offset: 1,
            limit: Some(2),
            ..Default::default()
        };
        let page = store.find_events(&query).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "a3");
        assert_eq!(page[1].id, "a2");
        assert_eq!(store.count_events(&query).unwrap(), 5);

        let by_ip = store.find_events(&EventQuery::for_ip_since("2.2.2.2", at(0))).unwrap();
        assert_eq!(by_ip.len(), 1);

        let ranged = EventQuery {
            start: Some(at(1)),
            end: Some(at(3)),
            ..Default::default()
        };
        assert_eq!(store.count_events(&ranged).unwrap(), 4);
    }

    #[test]
    fn test_purge_before() {
        let store = create_test_store();
        store.append_event(&event("old", None, "1.1.1.1", at(0))).unwrap();
        store.append_event(&event("new", None, "1.1.1.1", at(100))).unwrap();
        store.append_audit(&audit("a-old", "alice", AuditAction::Login, at(0))).unwrap();
        store.append_audit(&audit("a-new", "alice", AuditAction::Login, at(100))).unwrap();

        let deleted = store.purge_before(at(50)).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count_events(&EventQuery::default()).unwrap(), 1);
        assert_eq!(store.count_audits(&AuditQuery::default()).unwrap(), 1);
    }

    #[test]
    fn test_purge_runs_in_batches() {
        let store = create_test_store().with_purge_batch(2);
        // Four old rows per table, an exact multiple of the batch size
        for i in 0..4 {
            store
                .append_event(&event(&format!("old-{}", i), None, "1.1.1.1", at(i)))
                .unwrap();
            store
                .append_audit(&audit(&format!("a-old-{}", i), "alice", AuditAction::Login, at(i)))
                .unwrap();
        }
        store.append_event(&event("new", None, "1.1.1.1", at(100))).unwrap();
        store.append_audit(&audit("a-new", "alice", AuditAction::Login, at(100))).unwrap();

        assert_eq!(store.purge_before(at(50)).unwrap(), 8);
        assert_eq!(store.count_events(&EventQuery::default()).unwrap(), 1);
        assert_eq!(store.count_audits(&AuditQuery::default()).unwrap(), 1);
        assert_eq!(store.purge_before(at(50)).unwrap(), 0);
    }

    #[test]
    fn test_audit_filters() {
        let store = create_test_store();
        store.append_audit(&audit("1", "alice", AuditAction::Login, at(0))).unwrap();
        store.append_audit(&audit("2", "alice", AuditAction::Logout, at(1))).unwrap();
        store.append_audit(&audit("3", "bob", AuditAction::Login, at(2))).unwrap();

        let query = AuditQuery {
            action: Some(AuditAction::Login),
            ..Default::default()
        };
        let found = store.find_audits(&query).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "3");
        assert_eq!(store.count_audits(&query).unwrap(), 2);
    }

    #[test]
    fn test_login_state_compare_and_swap() {
        let store = create_test_store();
        let state = store.load_login_state("alice").unwrap();
        assert_eq!(state.version, 0);

        let next = LoginAttemptState {
            failure_count: 1,
            last_failure_at: Some(at(0)),
            ..Default::default()
        };
        assert!(store.compare_and_swap_login_state("alice", 0, &next).unwrap());
        // Stale writer loses
        assert!(!store.compare_and_swap_login_state("alice", 0, &next).unwrap());

        let loaded = store.load_login_state("alice").unwrap();
        assert_eq!(loaded.failure_count, 1);
        assert_eq!(loaded.version, 1);

        let next = LoginAttemptState {
            failure_count: 2,
            ..loaded.clone()
        };
        assert!(store.compare_and_swap_login_state("alice", 1, &next).unwrap());
        assert_eq!(store.load_login_state("alice").unwrap().version, 2);
    }

    #[test]
    fn test_login_history_is_capped() {
        let store = create_test_store();
        for i in 0..5 {
            let entry = LoginHistoryEntry {
                timestamp: at(i),
                ip: format!("10.0.0.{}", i),
                user_agent: "ua".to_string(),
                success: i % 2 == 0,
                country: None,
                timezone: None,
            };
            store.append_login_history("alice", &entry, 3).unwrap();
        }

        let history = store.login_history("alice", None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].ip, "10.0.0.4");
        assert_eq!(history[2].ip, "10.0.0.2");
    }

    #[test]
    fn test_device_transitions_keep_sets_disjoint() {
        let store = create_test_store();
        assert!(store
            .transition_device("alice", "d1", None, Some(DeviceStatus::Trusted), at(0))
            .unwrap());
        assert!(store
            .transition_device(
                "alice",
                "d1",
                Some(DeviceStatus::Trusted),
                Some(DeviceStatus::Blocked),
                at(1)
            )
            .unwrap());
        // Expectation no longer holds
        assert!(!store
            .transition_device("alice", "d1", None, Some(DeviceStatus::Trusted), at(2))
            .unwrap());

        let state = store.device_trust_state("alice").unwrap();
        assert!(state.trusted_devices.is_empty());
        assert_eq!(state.blocked_devices, vec!["d1".to_string()]);
    }

    #[test]
    fn test_sessions() {
        let store = create_test_store();
        assert!(store.open_session(&session("s1", "alice", "d1")).unwrap());
        assert!(store.open_session(&session("s2", "alice", "d1")).unwrap());
        assert!(store.open_session(&session("s3", "alice", "d2")).unwrap());

        assert!(store.device_known("alice", "d1").unwrap());
        assert!(!store.device_known("alice", "d9").unwrap());
        assert!(!store.device_known("bob", "d1").unwrap());

        assert_eq!(store.end_device_sessions("alice", "d1").unwrap(), 2);
        assert_eq!(store.sessions_for_account("alice", true).unwrap().len(), 1);
        assert_eq!(store.sessions_for_account("alice", false).unwrap().len(), 3);

        assert!(store.end_session("s3").unwrap());
        assert!(!store.end_session("s3").unwrap());

        store.touch_session("s3", at(60)).unwrap();
        let s3 = store.get_session("s3").unwrap().unwrap();
        assert_eq!(s3.last_active_at, at(60));
        assert!(!s3.is_active);
    }

    #[test]
    fn test_open_session_refuses_blocked_device() {
        let store = create_test_store();
        store
            .transition_device("alice", "d1", None, Some(DeviceStatus::Blocked), at(0))
            .unwrap();
        store
            .transition_device("alice", "d2", None, Some(DeviceStatus::Trusted), at(0))
            .unwrap();

        assert!(!store.open_session(&session("s1", "alice", "d1")).unwrap());
        assert!(store.get_session("s1").unwrap().is_none());

        // Trusted devices and other accounts' blocks do not interfere
        assert!(store.open_session(&session("s2", "alice", "d2")).unwrap());
        assert!(store.open_session(&session("s3", "bob", "d1")).unwrap());
        assert_eq!(store.sessions_for_account("alice", false).unwrap().len(), 1);
    }

    #[test]
    fn test_preferences_roundtrip() {
        let store = create_test_store();
        assert!(store.load_preferences("alice").unwrap().is_none());

        let mut prefs = NotificationPreference::defaults_for("alice");
        prefs.email.address = Some("alice@example.com".to_string());
        store.save_preferences(&prefs).unwrap();

        assert_eq!(store.load_preferences("alice").unwrap(), Some(prefs));
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .append_event(&event("e1", Some("alice"), "1.1.1.1", at(0) + Duration::hours(1)))
                .unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.count_events(&EventQuery::default()).unwrap(), 1);
    }
}
