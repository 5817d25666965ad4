//! Role callbacks driven by the router.

use async_trait::async_trait;
use rigsync_state::StatusRecord;

/// Node-role behaviour plugged into the router's supervision and dispatch.
///
/// Every callback runs on a router task; long-running work belongs on a
/// task of the role's own.
#[async_trait]
pub trait NodeHooks: Send + Sync + 'static {
    /// The application became ready and subscriptions are in place.
    async fn on_ready(&self) {}

    /// Readiness was lost; subscriptions are about to be dropped.
    async fn on_disconnected(&self) {}

    /// A subsystem changed; `record` is its full current state.
    async fn on_status(&self, _record: StatusRecord) {}

    /// Periodic callback while ready.
    async fn on_tick(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

#[async_trait]
impl NodeHooks for NoHooks {}
