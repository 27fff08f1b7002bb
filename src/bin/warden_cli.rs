use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

use warden::audit::{AuditFilter, AuditService, Dashboard, DashboardRange, EventFilter};
use warden::config::Config;
use warden::detection::Correlator;
use warden::models::{AuditAction, AuditCategory, EventType, Severity};
use warden::output::{OutputFormat, OutputHandler};
use warden::persistence::{AccountStore, SqliteStore};
use warden::risk::RiskEngine;

/// Administrative CLI for the warden security store
#[derive(StructOpt, Debug)]
#[structopt(name = "warden", about = "Security audit and telemetry administration")]
struct Cli {
    /// Path to configuration file
    #[structopt(short, long, default_value = "warden.toml", global = true)]
    config: PathBuf,

    /// Output format: json, jsonl or console
    #[structopt(short, long, default_value = "console", global = true)]
    format: OutputFormat,

    /// Append output to this file instead of stdout
    #[structopt(short, long, global = true)]
    output: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Generate a default configuration file
    Config {
        #[structopt(default_value = "warden.toml")]
        path: PathBuf,
    },
    /// Search the audit trail
    Audit {
        #[structopt(long)]
        account: Option<String>,
        #[structopt(long)]
        action: Option<AuditAction>,
        #[structopt(long)]
        category: Option<AuditCategory>,
        #[structopt(long)]
        target: Option<String>,
        /// RFC 3339 lower bound, inclusive
        #[structopt(long, parse(try_from_str = parse_time))]
        start: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound, inclusive
        #[structopt(long, parse(try_from_str = parse_time))]
        end: Option<DateTime<Utc>>,
        #[structopt(long)]
        page: Option<usize>,
        #[structopt(long)]
        limit: Option<usize>,
    },
    /// Search security events
    Events {
        #[structopt(long)]
        account: Option<String>,
        #[structopt(long = "type")]
        event_type: Option<EventType>,
        #[structopt(long)]
        severity: Option<Severity>,
        #[structopt(long)]
        ip: Option<String>,
        #[structopt(long, parse(try_from_str = parse_time))]
        start: Option<DateTime<Utc>>,
        #[structopt(long, parse(try_from_str = parse_time))]
        end: Option<DateTime<Utc>>,
        #[structopt(long)]
        page: Option<usize>,
        #[structopt(long)]
        limit: Option<usize>,
    },
    /// Audit statistics over a trailing range
    Stats {
        #[structopt(long, default_value = "30")]
        days: i64,
    },
    /// Delete audit records and security events older than the retention
    Cleanup {
        #[structopt(long)]
        days: i64,
    },
    /// Dashboard aggregations over a trailing range
    Dashboard {
        /// overview, hourly, threats or users
        view: String,
        #[structopt(long, default_value = "7")]
        days: i64,
    },
    /// Risk assessment for one account
    Risk { account: String },
    /// Login history for one account
    History {
        account: String,
        #[structopt(long, default_value = "20")]
        limit: usize,
    },
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::from_args();

    if let Command::Config { path } = &cli.command {
        Config::default().to_file(path)?;
        println!("Default configuration written to: {:?}", path);
        return Ok(());
    }

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        log::warn!("Config file {:?} not found, using defaults", cli.config);
        Config::default()
    };

    let store = Arc::new(SqliteStore::new(&config.storage.database_path)?);
    let audit = AuditService::new(store.clone(), config.retention.clone());
    let mut out = OutputHandler::new(cli.format, cli.output.clone())?;
    let now = Utc::now();

    match cli.command {
        Command::Config { .. } => {}
        Command::Audit {
            account,
            action,
            category,
            target,
            start,
            end,
            page,
            limit,
        } => {
            let result = audit.search(&AuditFilter {
                start,
                end,
                action,
                category,
                account_id: account,
                target_id: target,
                page,
                limit,
            })?;
            out.write_all(&result.items)?;
            eprintln!(
                "page {}/{} ({} total)",
                result.page, result.total_pages, result.total
            );
        }
        Command::Events {
            account,
            event_type,
            severity,
            ip,
            start,
            end,
            page,
            limit,
        } => {
            let result = audit.search_events(&EventFilter {
                start,
                end,
                event_type,
                severity,
                account_id: account,
                ip,
                page,
                limit,
            })?;
            out.write_all(&result.items)?;
            eprintln!(
                "page {}/{} ({} total)",
                result.page, result.total_pages, result.total
            );
        }
        Command::Stats { days } => {
            let range = DashboardRange::trailing_days(days, now)?;
            out.write_record(&audit.statistics(range.start, range.end)?)?;
        }
        Command::Cleanup { days } => {
            let deleted = audit.cleanup(days, now)?;
            println!("Deleted {} record(s) older than {} days", deleted, days);
        }
        Command::Dashboard { view, days } => {
            let dashboard = Dashboard::new(store.clone());
            let range = DashboardRange::trailing_days(days, now)?;
            match view.as_str() {
                "overview" => out.write_record(&dashboard.overview(range)?)?,
                "hourly" => out.write_all(&dashboard.hourly_stats(range)?)?,
                "threats" => out.write_all(&dashboard.ip_threats(range)?)?,
                "users" => out.write_all(&dashboard.user_activities(range)?)?,
                other => {
                    eprintln!("Unknown dashboard view: {}", other);
                    std::process::exit(2);
                }
            }
        }
        Command::Risk { account } => {
            let engine = RiskEngine::new(store.clone(), config.risk.clone())
                .with_correlator(Correlator::new(store.clone(), config.correlation.clone()));
            out.write_record(&engine.assess(&account, now)?)?;
        }
        Command::History { account, limit } => {
            for entry in store.login_history(&account, Some(limit))? {
                println!(
                    "[{}] {} ip: {}, country: {}, agent: {}",
                    entry.timestamp.to_rfc3339(),
                    if entry.success { "success" } else { "failure" },
                    entry.ip,
                    entry.country.as_deref().unwrap_or("-"),
                    entry.user_agent
                );
            }
        }
    }

    out.flush()?;
    Ok(())
}
