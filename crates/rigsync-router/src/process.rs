//! Lifecycle control of the observatory-control application process.

use async_trait::async_trait;

/// Terminates and relaunches the controlled application.
///
/// The supervisor relaunches an application that stays unreachable; the
/// leader relaunches one whose scheduler keeps failing to start.
#[async_trait]
pub trait ProcessControl: Send + Sync + 'static {
    /// Forcibly stop every running instance.
    async fn terminate(&self) -> std::io::Result<()>;

    /// Start a fresh, detached instance.
    async fn launch(&self) -> std::io::Result<()>;
}
