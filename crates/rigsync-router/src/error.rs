//! Error types for the device status router.

use rigsync_bus::BusError;
use thiserror::Error;

/// Result type alias for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Debug, Error)]
pub enum RouterError {
    /// The controlled application is not ready; returned instead of
    /// attempting an automation operation.
    #[error("not connected to the observatory application")]
    NotConnected,

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("no {0} bound to the optical train")]
    DeviceMissing(&'static str),

    #[error("{0} did not finish in time")]
    Timeout(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
