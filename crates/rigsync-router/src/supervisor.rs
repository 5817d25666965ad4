//! Supervision of the observatory-control application.
//!
//! ```text
//! Unavailable ──reachable──▶ AttemptingStart ──▶ WaitingReady ──all mandatory──▶ Ready
//!     ▲   │                                          │ readable                  │
//!     │   └─ unreachable for reach_timeout:          └─ entry object lost ──┐    │ readiness
//!     │      terminate + relaunch                                           │    │ lost
//!     └───────────────────────────── Disconnected ◀─────────────────────────┴────┘
//! ```
//!
//! The supervisor is one long-lived task. It stops only on the shutdown
//! signal; every failure inside a step is logged and the machine moves on.

use std::sync::Arc;

use rigsync_bus::{Subsystem, names};
use rigsync_state::{CommunicationStatus, Deadline};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::hooks::NodeHooks;
use crate::process::ProcessControl;
use crate::router::StatusRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Unavailable,
    AttemptingStart,
    WaitingReady,
    Ready,
    Disconnected,
}

pub struct Supervisor {
    router: Arc<StatusRouter>,
    hooks: Arc<dyn NodeHooks>,
    process: Arc<dyn ProcessControl>,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(
        router: Arc<StatusRouter>,
        hooks: Arc<dyn NodeHooks>,
        process: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            router,
            hooks,
            process,
            state: SupervisorState::Unavailable,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Drive the state machine until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("supervisor started");
        loop {
            tokio::select! {
                next = self.step() => {
                    if next != self.state {
                        debug!(from = ?self.state, to = ?next, "supervisor transition");
                    }
                    self.state = next;
                }
                _ = shutdown.changed() => break,
            }
        }
        if self.router.is_ready() || self.router.is_subscribed() {
            self.router.set_ready(false);
            self.hooks.on_disconnected().await;
            self.router.unsubscribe();
        }
        info!("supervisor stopped");
    }

    /// Perform the work of the current state and return the next one.
    pub async fn step(&self) -> SupervisorState {
        match self.state {
            SupervisorState::Unavailable => self.await_application().await,
            SupervisorState::AttemptingStart => self.start_automation().await,
            SupervisorState::WaitingReady => self.wait_ready().await,
            SupervisorState::Ready => self.check_ready().await,
            SupervisorState::Disconnected => self.disconnect().await,
        }
    }

    async fn await_application(&self) -> SupervisorState {
        let config = &self.router.config;
        let bus = &self.router.bus;
        let mut deadline = Deadline::labeled(config.reach_timeout, "observatory application");
        loop {
            if bus.ping(Subsystem::Ekos).await.is_ok() {
                return SupervisorState::AttemptingStart;
            }
            if deadline.elapsed() {
                break;
            }
            sleep(config.startup_poll).await;
        }

        warn!("observatory application unreachable, relaunching");
        if let Err(e) = self.process.terminate().await {
            warn!(error = %e, "failed to terminate application");
        }
        if let Err(e) = self.process.launch().await {
            error!(error = %e, "failed to launch application");
        }
        sleep(config.relaunch_grace).await;
        SupervisorState::Unavailable
    }

    async fn start_automation(&self) -> SupervisorState {
        let bus = &self.router.bus;
        let status = match bus.read(Subsystem::Ekos, names::EKOS_STATUS).await {
            Ok(value) => CommunicationStatus::from_value(&value),
            Err(e) if e.is_unreachable() => return SupervisorState::Unavailable,
            Err(e) => {
                debug!(error = %e, "automation status unreadable");
                CommunicationStatus::Unknown
            }
        };
        if status != CommunicationStatus::Success {
            info!(?status, "starting automation");
            if let Err(e) = bus.call(Subsystem::Ekos, names::START, vec![]).await {
                warn!(error = %e, "automation start failed");
                if e.is_unreachable() {
                    return SupervisorState::Unavailable;
                }
            }
        }
        SupervisorState::WaitingReady
    }

    async fn mandatory_readable(&self) -> bool {
        for subsystem in Subsystem::MANDATORY {
            if let Err(e) = self.router.bus.read_all(subsystem).await {
                debug!(%subsystem, error = %e, "subsystem not readable");
                return false;
            }
        }
        true
    }

    async fn wait_ready(&self) -> SupervisorState {
        if self.router.bus.ping(Subsystem::Ekos).await.is_err() {
            return SupervisorState::Unavailable;
        }
        if !self.mandatory_readable().await {
            sleep(self.router.config.startup_poll).await;
            return SupervisorState::WaitingReady;
        }

        info!("observatory ready");
        self.router.set_ready(true);
        self.subscribe().await;
        self.hooks.on_ready().await;
        SupervisorState::Ready
    }

    async fn check_ready(&self) -> SupervisorState {
        sleep(self.router.config.ready_poll).await;
        if !self.mandatory_readable().await {
            return SupervisorState::Disconnected;
        }
        if !self.router.is_subscribed() {
            self.subscribe().await;
        }
        self.router.watchdog().await;
        self.hooks.on_tick().await;
        SupervisorState::Ready
    }

    async fn disconnect(&self) -> SupervisorState {
        warn!("observatory readiness lost");
        self.router.set_ready(false);
        self.hooks.on_disconnected().await;
        self.router.unsubscribe();
        SupervisorState::Unavailable
    }

    async fn subscribe(&self) {
        if let Err(e) = self.router.subscribe(self.hooks.clone()).await {
            warn!(error = %e, "subscription failed");
        }
    }
}

impl StatusRouter {
    /// Spawn the supervisor task for this router.
    pub fn supervise(
        self: &Arc<Self>,
        hooks: Arc<dyn NodeHooks>,
        process: Arc<dyn ProcessControl>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let supervisor = Supervisor::new(Arc::clone(self), hooks, process);
        tokio::spawn(supervisor.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rigsync_bus::MemoryBus;
    use serde_json::json;

    use super::*;
    use crate::config::RouterConfig;

    /// Relaunching brings the in-memory application back.
    struct FakeProcess {
        bus: Arc<MemoryBus>,
        launches: AtomicUsize,
    }

    #[async_trait]
    impl ProcessControl for FakeProcess {
        async fn terminate(&self) -> std::io::Result<()> {
            self.bus.set_app_running(false);
            Ok(())
        }

        async fn launch(&self) -> std::io::Result<()> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.bus.set_app_running(true);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHooks {
        ready: AtomicUsize,
        disconnected: AtomicUsize,
    }

    #[async_trait]
    impl NodeHooks for CountingHooks {
        async fn on_ready(&self) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_disconnected(&self) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        bus: Arc<MemoryBus>,
        router: Arc<StatusRouter>,
        hooks: Arc<CountingHooks>,
        process: Arc<FakeProcess>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        for subsystem in Subsystem::MANDATORY {
            bus.set_status(subsystem, 0);
        }
        bus.set_property(Subsystem::Ekos, names::EKOS_STATUS, json!(0));
        let router = Arc::new(StatusRouter::new(bus.clone(), RouterConfig::default()));
        let process = Arc::new(FakeProcess {
            bus: bus.clone(),
            launches: AtomicUsize::new(0),
        });
        Fixture {
            bus,
            router,
            hooks: Arc::new(CountingHooks::default()),
            process,
        }
    }

    impl Fixture {
        fn supervisor(&self) -> Supervisor {
            Supervisor::new(self.router.clone(), self.hooks.clone(), self.process.clone())
        }
    }

    async fn advance(sup: &mut Supervisor) -> SupervisorState {
        sup.state = sup.step().await;
        sup.state
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_ready_and_starts_automation() {
        let f = fixture();
        let mut sup = f.supervisor();

        assert_eq!(advance(&mut sup).await, SupervisorState::AttemptingStart);
        assert_eq!(advance(&mut sup).await, SupervisorState::WaitingReady);
        assert_eq!(f.bus.call_count(Subsystem::Ekos, names::START), 1);
        assert_eq!(advance(&mut sup).await, SupervisorState::Ready);

        assert!(f.router.is_ready());
        assert!(f.router.is_subscribed());
        assert_eq!(f.hooks.ready.load(Ordering::SeqCst), 1);
        f.router.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn started_automation_is_not_restarted() {
        let f = fixture();
        f.bus.set_property(Subsystem::Ekos, names::EKOS_STATUS, json!(2));
        let mut sup = f.supervisor();
        advance(&mut sup).await;
        advance(&mut sup).await;
        assert_eq!(f.bus.call_count(Subsystem::Ekos, names::START), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_application_is_relaunched() {
        let f = fixture();
        f.bus.set_app_running(false);
        let mut sup = f.supervisor();

        let started = tokio::time::Instant::now();
        assert_eq!(advance(&mut sup).await, SupervisorState::Unavailable);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(f.process.launches.load(Ordering::SeqCst), 1);

        assert_eq!(advance(&mut sup).await, SupervisorState::AttemptingStart);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_every_mandatory_subsystem_is_readable() {
        let f = fixture();
        f.bus.set_reachable(Subsystem::Scheduler, false);
        let mut sup = f.supervisor();
        advance(&mut sup).await;
        advance(&mut sup).await;
        assert_eq!(advance(&mut sup).await, SupervisorState::WaitingReady);
        assert_eq!(advance(&mut sup).await, SupervisorState::WaitingReady);

        f.bus.set_reachable(Subsystem::Scheduler, true);
        assert_eq!(advance(&mut sup).await, SupervisorState::Ready);
        f.router.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_loss_disconnects_and_resets() {
        let f = fixture();
        let mut sup = f.supervisor();
        for _ in 0..3 {
            advance(&mut sup).await;
        }
        assert_eq!(advance(&mut sup).await, SupervisorState::Ready);

        f.bus.set_reachable(Subsystem::Guide, false);
        assert_eq!(advance(&mut sup).await, SupervisorState::Disconnected);
        assert_eq!(advance(&mut sup).await, SupervisorState::Unavailable);
        assert!(!f.router.is_ready());
        assert!(!f.router.is_subscribed());
        assert_eq!(f.hooks.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let handle = f.router.supervise(f.hooks.clone(), f.process.clone(), rx);

        let mut deadline = Deadline::new(Duration::from_secs(30));
        let ready = rigsync_state::poll_until(&mut deadline, Duration::from_millis(100), || {
            f.router.is_ready()
        })
        .await;
        assert!(ready);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!f.router.is_ready());
        assert!(!f.router.is_subscribed());
    }
}
