use chrono::Utc;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use warden::audit::AuditService;
use warden::config::Config;
use warden::persistence::SqliteStore;

/// Scheduled retention sweep, run as its own process
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting retention sweeper...");

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("warden.toml"));

    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file not found, using defaults");
        Config::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let store = Arc::new(SqliteStore::new(&config.storage.database_path)?);
    let audit = AuditService::new(store, config.retention.clone());
    let interval = Duration::from_secs(config.retention.sweep_interval_hours.max(1) * 3600);
    let days = config.retention.default_days;

    log::info!(
        "Sweeping records older than {} days every {} hour(s). Press Ctrl+C to stop.",
        days,
        config.retention.sweep_interval_hours.max(1)
    );

    let mut last_sweep: Option<Instant> = None;
    while running.load(Ordering::SeqCst) {
        let due = last_sweep.map_or(true, |at| at.elapsed() >= interval);
        if due {
            match audit.cleanup(days, Utc::now()) {
                Ok(deleted) => log::info!("Retention sweep removed {} record(s)", deleted),
                Err(e) => log::error!("Retention sweep failed: {}", e),
            }
            last_sweep = Some(Instant::now());
        }

        std::thread::sleep(Duration::from_millis(500));
    }

    log::info!("Retention sweeper stopped");
    Ok(())
}
