//! Record output for the administrative CLI

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use crate::audit::dashboard::{HourlyStat, IpThreat, Overview, UserActivity};
use crate::audit::AuditStatistics;
use crate::models::{AuditRecord, RiskAssessment, SecurityEvent};

/// Something the CLI can print.
///
/// Records without a one-line console form are printed as pretty JSON.
pub trait Record: Serialize {
    fn console_line(&self) -> Option<String> {
        None
    }
}

impl Record for SecurityEvent {
    fn console_line(&self) -> Option<String> {
        Some(format!(
            "[{}] {} {} - account: {}, ip: {}, country: {} - {}",
            self.timestamp.to_rfc3339(),
            self.severity,
            self.event_type,
            self.account_id.as_deref().unwrap_or("-"),
            self.ip,
            self.location.country.as_deref().unwrap_or("-"),
            self.description
        ))
    }
}

impl Record for AuditRecord {
    fn console_line(&self) -> Option<String> {
        Some(format!(
            "[{}] {} {} - account: {}, target: {}",
            self.timestamp.to_rfc3339(),
            self.category,
            self.action,
            self.account_id.as_deref().unwrap_or("-"),
            self.target_id.as_deref().unwrap_or("-")
        ))
    }
}

impl Record for RiskAssessment {
    fn console_line(&self) -> Option<String> {
        let mut line = format!(
            "Risk for {}: {} ({})",
            self.account_id, self.risk_score, self.risk_level
        );
        for activity in &self.unusual_activities {
            line.push_str(&format!("\n  ! {}", activity.message));
        }
        for rec in &self.recommendations {
            line.push_str(&format!("\n  - {}", rec));
        }
        Some(line)
    }
}

impl Record for HourlyStat {
    fn console_line(&self) -> Option<String> {
        Some(format!(
            "{}  events: {:>5}  high: {:>5}",
            self.hour.format("%Y-%m-%d %H:00"),
            self.events,
            self.high_severity
        ))
    }
}

impl Record for IpThreat {
    fn console_line(&self) -> Option<String> {
        Some(format!(
            "{} - events: {}, failed logins: {}, suspicious: {}, countries: [{}], last seen {}",
            self.ip,
            self.total_events,
            self.failed_logins,
            self.suspicious_activities,
            self.countries.join(", "),
            self.last_seen.to_rfc3339()
        ))
    }
}

impl Record for UserActivity {
    fn console_line(&self) -> Option<String> {
        Some(format!(
            "{} - actions: {}, ips: {}, last {} [{}]",
            self.account_id,
            self.total_actions,
            self.distinct_ips,
            self.last_action.to_rfc3339(),
            self.actions.join(", ")
        ))
    }
}

impl Record for Overview {}
impl Record for AuditStatistics {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "console" => Ok(OutputFormat::Console),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// Writes records to stdout or appends them to a file
pub struct OutputHandler {
    format: OutputFormat,
    writer: Option<Box<dyn Write + Send>>,
}

impl OutputHandler {
    pub fn new(format: OutputFormat, file_path: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let writer: Option<Box<dyn Write + Send>> = match (format, file_path) {
            (OutputFormat::Console, _) | (_, None) => None,
            (_, Some(path)) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(BufWriter::new(file)))
            }
        };

        Ok(OutputHandler { format, writer })
    }

    /// In-memory sink
    pub fn to_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        OutputHandler {
            format,
            writer: Some(writer),
        }
    }

    pub fn write_record<R: Record>(&mut self, record: &R) -> Result<(), Box<dyn std::error::Error>> {
        let output = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record)?,
            OutputFormat::Jsonl => serde_json::to_string(record)?,
            OutputFormat::Console => match record.console_line() {
                Some(line) => line,
                None => serde_json::to_string_pretty(record)?,
            },
        };
        self.write_output(&format!("{}\n", output))
    }

    pub fn write_all<R: Record>(&mut self, records: &[R]) -> Result<(), Box<dyn std::error::Error>> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    fn write_output(&mut self, data: &str) -> Result<(), Box<dyn std::error::Error>> {
        match &mut self.writer {
            Some(writer) => {
                writer.write_all(data.as_bytes())?;
                writer.flush()?;
            }
            None => {
                print!("{}", data);
                io::stdout().flush()?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}
