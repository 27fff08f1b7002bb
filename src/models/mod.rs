pub mod account;
pub mod audit;
pub mod event;
pub mod notification;
pub mod risk;

pub use account::{DeviceStatus, DeviceTrustState, LoginAttemptState, LoginHistoryEntry, SessionRecord};
pub use audit::{AuditAction, AuditCategory, AuditDetails, AuditEntry, AuditMetadata, AuditRecord};
pub use event::{
    EnrichedDevice, EnrichedLocation, EventType, RequestContext, RequestInfo, SecurityEvent, Severity,
};
pub use notification::{Notification, NotificationKind, NotificationPreference};
pub use risk::{AnalyzerReport, RiskAssessment, RiskLevel, UnusualActivity};
