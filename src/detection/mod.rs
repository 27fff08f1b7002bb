pub mod correlation;
pub mod inspection;
pub mod recorder;
pub mod redaction;

pub use correlation::{CorrelationFinding, Correlator};
pub use inspection::{PayloadInspector, RequestPayload, ThreatKind, ThreatMatch};
pub use recorder::{http_status_event, CorrelationQueue, EventDraft, EventRecorder};
