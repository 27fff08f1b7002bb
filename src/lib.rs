pub mod alerting;
pub mod audit;
pub mod config;
pub mod detection;
pub mod devices;
pub mod enrichment;
pub mod error;
pub mod gateway;
pub mod localtime;
pub mod lockout;
pub mod models;
pub mod output;
pub mod persistence;
pub mod risk;
pub mod session;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{GuardError, GuardResult};
pub use gateway::{SecurityGateway, SetupError};
pub use lockout::LockoutDecision;
pub use models::{AuditEntry, RequestInfo, RiskAssessment, SecurityEvent, SessionRecord};
pub use persistence::{AccountStore, EventStore, SqliteStore};
pub use session::SessionVerdict;
