//! Error types for schedule and status parsing.

use thiserror::Error;

/// Result type alias for state parsing operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("schedule job {job}: {reason}")]
    Parse { job: usize, reason: String },

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
