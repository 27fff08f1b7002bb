//! Error taxonomy surfaced to the request-handling layer

use crate::persistence::PersistenceError;
use thiserror::Error;

/// Errors returned by the core state-mutating operations.
///
/// Enrichment, correlation and notification failures never reach this type;
/// they are logged at their own boundary.
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

impl GuardError {
    pub fn device_not_found(device_id: &str) -> Self {
        GuardError::NotFound(format!("device {} not found", device_id))
    }

    /// HTTP-equivalent status for the request layer
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::Validation(_) => 400,
            GuardError::AuthenticationRequired(_) => 401,
            GuardError::PolicyViolation(_) => 403,
            GuardError::NotFound(_) => 404,
            GuardError::Conflict(_) => 409,
            GuardError::Persistence(_) => 500,
        }
    }

    /// Message safe to show to end users
    pub fn public_message(&self) -> String {
        match self {
            GuardError::Persistence(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
