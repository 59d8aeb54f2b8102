//! Error types shared by the store, the timer engines and the admin console

use thiserror::Error;

use crate::timer::TimerKind;

/// Failures reported by a document store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store could not be reached (connectivity, offline simulation, closed listener)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Local I/O failure in a file-backed store
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded or decoded as JSON
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Path is empty or escapes the store root
    #[error("invalid document path: {0}")]
    InvalidPath(String),
}

/// A received document does not have the expected shape.
///
/// Consumers treat this exactly like an absent document.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures surfaced by timer commands
#[derive(Debug, Error)]
pub enum TimerError {
    /// Command rejected before any write (e.g. countdown started with no deadline)
    #[error("{0}")]
    Validation(String),

    /// Read or write failed; nothing was applied locally
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// A command for this timer is still outstanding
    #[error("a {0} command is already in progress")]
    Busy(TimerKind),
}

impl TimerError {
    /// Short message suitable for an operator-facing notice
    pub fn notice(&self) -> String {
        match self {
            TimerError::Validation(msg) => msg.clone(),
            TimerError::StoreUnavailable(_) => {
                "Could not reach the timer store. Please try again.".to_string()
            }
            TimerError::Busy(kind) => format!("Wait for the current {} command to finish.", kind),
        }
    }
}

pub type TimerResult<T> = Result<T, TimerError>;
