//! Error types for the petdose_core library.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for petdose_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A medication record that cannot be turned into a schedule.
    /// Fatal for that medication only.
    #[error("Invalid medication {schedule_id}: {message}")]
    Validation {
        schedule_id: String,
        message: String,
    },

    /// Medication store error
    #[error("Store error: {0}")]
    Store(String),

    /// Device notification subsystem error
    #[error("Notification error: {0}")]
    Transport(#[from] TransportError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(schedule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            schedule_id: schedule_id.into(),
            message: message.into(),
        }
    }
}

/// Failure talking to the device notification subsystem.
///
/// These are recoverable per operation: the reconciler records them and
/// carries on with the remaining operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("notification service unavailable: {0}")]
    Unavailable(String),

    #[error("notification service timed out after {0:?}")]
    Timeout(Duration),

    #[error("notification rejected: {0}")]
    Rejected(String),
}
