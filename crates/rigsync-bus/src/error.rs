//! Error types for automation-bus access.

use thiserror::Error;

use crate::bus::Subsystem;

/// Result type alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    /// The subsystem's remote object cannot be reached (application down).
    #[error("{0} is not reachable")]
    Unreachable(Subsystem),

    #[error("call {subsystem}.{method} failed: {reason}")]
    Call {
        subsystem: Subsystem,
        method: String,
        reason: String,
    },

    #[error("property {subsystem}.{name} not available")]
    MissingProperty { subsystem: Subsystem, name: String },

    #[error("unexpected value for {what}: {value}")]
    Type { what: String, value: String },

    #[error("device property {device}/{property} not available")]
    MissingDeviceProperty { device: String, property: String },
}

impl BusError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BusError::Unreachable(_))
    }
}
