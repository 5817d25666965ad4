//! Leader role: replicate the local observatory to every follower.
//!
//! The leader caches the latest record per subsystem. A follower that
//! connects gets `hello_from_server` followed by the cached records in
//! [`Action::BOOTSTRAP_ORDER`]; after that it receives every record as it
//! is produced. Bootstrap and broadcast run under the same registry lock,
//! so a follower never sees a live record before its bootstrap.
//!
//! Besides replication the leader guards its own rig:
//!
//! - weather-gated scheduler auto-start, relaunching the application when
//!   starts keep falling back to idle;
//! - bad-weather safety: a running scheduler is stopped and the mount
//!   parked once the scheduler has settled;
//! - align target correction: the align module is pointed back at the
//!   active job, and a solve far from the job stops everything.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rigsync_bus::Subsystem;
use rigsync_router::{NodeHooks, ProcessControl, StatusRouter};
use rigsync_state::{
    Action, AlignState, AlignmentSolution, Flag, SchedulerState, StatusRecord, WeatherState,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::channel::{self, ChannelSender};
use crate::error::ReplicationResult;
use crate::protocol::Message;

/// A scheduler reaching idle this soon after a pause was aborted by hand.
pub const USER_ABORT_WINDOW: Duration = Duration::from_secs(5);

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// A scheduler back to idle this soon after being started failed to start.
pub const START_FAILURE_WINDOW: Duration = Duration::from_secs(30);

/// Failed starts tolerated before the application is relaunched.
pub const MAX_START_FAILURES: u32 = 5;

/// Align target drift from the active job that gets corrected, in arc-seconds.
pub const ALIGN_TARGET_TOLERANCE: f64 = 5.0;

/// Solve distance from the active job that stops everything, in arc-seconds.
pub const SOLUTION_TOLERANCE: f64 = 30.0;

/// Configuration for the leader role.
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    pub listen: SocketAddr,
    /// Start the scheduler when the weather turns OK.
    pub auto_start: bool,
    /// Schedule loaded once the node is ready.
    pub schedule: Option<PathBuf>,
}

impl LeaderConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            auto_start: false,
            schedule: None,
        }
    }

    pub fn with_auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = enabled;
        self
    }

    pub fn with_schedule(mut self, path: impl Into<PathBuf>) -> Self {
        self.schedule = Some(path.into());
        self
    }
}

// ── Auto-start ─────────────────────────────────────────────────────

/// Weather-gated scheduler auto-start with user-abort detection.
#[derive(Debug, Clone)]
pub struct AutoStartPolicy {
    configured: bool,
    enabled: bool,
    paused_at: Option<Instant>,
}

impl AutoStartPolicy {
    pub fn new(configured: bool) -> Self {
        Self {
            configured,
            enabled: configured,
            paused_at: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Track scheduler transitions.
    ///
    /// Idle within [`USER_ABORT_WINDOW`] of a pause disables auto-start;
    /// seeing the scheduler running again re-enables it.
    pub fn observe_scheduler(&mut self, status: SchedulerState) {
        match status {
            SchedulerState::Paused => self.paused_at = Some(Instant::now()),
            SchedulerState::Idle => {
                if let Some(paused) = self.paused_at.take() {
                    if self.enabled && paused.elapsed() <= USER_ABORT_WINDOW {
                        self.enabled = false;
                        info!("scheduler aborted by user, auto-start disabled");
                    }
                }
            }
            SchedulerState::Running => {
                self.paused_at = None;
                if self.configured && !self.enabled {
                    self.enabled = true;
                    info!("scheduler running again, auto-start re-enabled");
                }
            }
            _ => {}
        }
    }

    /// Only a settled scheduler is started; starting, loading, shutting
    /// down and paused schedulers are left alone.
    pub fn should_start(&self, weather: WeatherState, scheduler: SchedulerState) -> bool {
        self.enabled
            && weather == WeatherState::Ok
            && matches!(scheduler, SchedulerState::Idle | SchedulerState::Aborted)
    }
}

/// Counts scheduler starts that fell back to idle right away.
#[derive(Debug, Default)]
pub struct StartFailures {
    last_start: Option<Instant>,
    failures: u32,
}

impl StartFailures {
    /// Record a start attempt. A start within [`START_FAILURE_WINDOW`] of
    /// the previous one means that one failed. Returns `false` once more
    /// than [`MAX_START_FAILURES`] starts failed; the count starts over.
    pub fn attempt(&mut self) -> bool {
        if self
            .last_start
            .is_some_and(|at| at.elapsed() < START_FAILURE_WINDOW)
        {
            self.failures += 1;
            warn!(failures = self.failures, "scheduler start failed");
        }
        if self.failures > MAX_START_FAILURES {
            self.failures = 0;
            self.last_start = None;
            return false;
        }
        self.last_start = Some(Instant::now());
        true
    }

    /// The scheduler kept running past the failure window.
    pub fn settled(&mut self) {
        if self.failures > 0 {
            debug!(failures = self.failures, "scheduler running, start failures cleared");
        }
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Weather that must not be observed under: reported and not OK.
fn is_unsafe(weather: WeatherState) -> bool {
    matches!(weather, WeatherState::Warning | WeatherState::Alert)
}

// ── Leader ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    channels: HashMap<u64, ChannelSender>,
    cache: BTreeMap<Action, StatusRecord>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Leader {
    router: Arc<StatusRouter>,
    config: LeaderConfig,
    registry: Mutex<Registry>,
    auto_start: Mutex<AutoStartPolicy>,
    starts: Mutex<StartFailures>,
    process: Option<Arc<dyn ProcessControl>>,
    next_id: AtomicU64,
}

impl Leader {
    pub fn new(router: Arc<StatusRouter>, config: LeaderConfig) -> Self {
        Self {
            auto_start: Mutex::new(AutoStartPolicy::new(config.auto_start)),
            router,
            config,
            registry: Mutex::new(Registry::default()),
            starts: Mutex::new(StartFailures::default()),
            process: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Relaunch the application through `process` when the scheduler
    /// keeps failing to start.
    pub fn with_process(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn router(&self) -> &Arc<StatusRouter> {
        &self.router
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    pub fn follower_count(&self) -> usize {
        lock(&self.registry).channels.len()
    }

    /// Latest record cached for `action`.
    pub fn cached(&self, action: Action) -> Option<StatusRecord> {
        lock(&self.registry).cache.get(&action).cloned()
    }

    pub fn auto_start_enabled(&self) -> bool {
        lock(&self.auto_start).is_enabled()
    }

    pub fn start_failures(&self) -> u32 {
        lock(&self.starts).failures()
    }

    /// Cache `record` and send it to every follower.
    ///
    /// A follower whose channel has closed or whose queue is full is
    /// dropped from the registry and disconnected; it bootstraps again
    /// when it reconnects.
    pub fn broadcast(&self, record: StatusRecord) {
        let mut registry = lock(&self.registry);
        let mut dead = Vec::new();
        for (id, channel) in &registry.channels {
            if let Err(e) = channel.send(Message::Status(record.clone())) {
                dead.push((*id, e));
            }
        }
        for (id, error) in dead {
            if let Some(channel) = registry.channels.remove(&id) {
                channel.close();
                warn!(peer = %channel.peer(), %error, "dropping follower channel");
            }
        }
        registry.cache.insert(record.action, record);
    }

    /// Bootstrap a new follower and add it to the registry.
    fn register(&self, channel: ChannelSender) -> ReplicationResult<usize> {
        let mut registry = lock(&self.registry);
        channel.send(Message::HelloFromServer)?;
        for action in Action::BOOTSTRAP_ORDER {
            if let Some(record) = registry.cache.get(&action) {
                channel.send(Message::Status(record.clone()))?;
            }
        }
        registry.channels.insert(channel.id(), channel);
        Ok(registry.channels.len())
    }

    fn unregister(&self, id: u64) {
        lock(&self.registry).channels.remove(&id);
    }

    // ── Network ────────────────────────────────────────────────────

    /// Bind the configured address and serve followers until shutdown.
    pub async fn listen(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> ReplicationResult<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept followers on `listener` until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> ReplicationResult<()> {
        info!(addr = %listener.local_addr()?, "replication listener started");
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let leader = Arc::clone(&self);
                        tokio::spawn(async move { leader.handle_follower(stream, peer).await });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("replication listener stopped");
        Ok(())
    }

    async fn handle_follower(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, mut reader, writer) = match channel::open(stream, id) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(%peer, error = %e, "cannot open follower channel");
                return;
            }
        };

        match timeout(HELLO_TIMEOUT, reader.next()).await {
            Ok(Ok(Some(Message::HelloFromClient))) => {}
            Ok(Ok(other)) => {
                warn!(%peer, message = ?other, "expected hello from follower");
                writer.abort();
                return;
            }
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "follower handshake failed");
                writer.abort();
                return;
            }
            Err(_) => {
                warn!(%peer, "follower handshake timed out");
                writer.abort();
                return;
            }
        }

        match self.register(sender) {
            Ok(followers) => info!(%peer, followers, "follower connected"),
            Err(e) => {
                warn!(%peer, error = %e, "follower bootstrap failed");
                return;
            }
        }

        loop {
            match reader.next().await {
                Ok(Some(message)) => debug!(%peer, ?message, "ignoring follower message"),
                Ok(None) => break,
                Err(e) => {
                    debug!(%peer, error = %e, "follower read failed");
                    break;
                }
            }
        }
        self.unregister(id);
        info!(%peer, followers = self.follower_count(), "follower disconnected");
    }

    // ── Scheduler and weather ──────────────────────────────────────

    /// Start the scheduler in good weather, secure the rig in bad.
    async fn check_scheduler(&self) {
        if self.router.is_suspended() {
            return;
        }
        let (weather, scheduler) = {
            let state = self.router.state();
            (state.weather(), state.scheduler())
        };
        if is_unsafe(weather) {
            self.secure_rig(weather, scheduler).await;
            return;
        }
        let start = lock(&self.auto_start).should_start(weather, scheduler);
        if start {
            info!(?weather, ?scheduler, "weather ok, auto-starting scheduler");
            self.start_scheduler().await;
        }
    }

    async fn start_scheduler(&self) {
        if !lock(&self.starts).attempt() {
            warn!("scheduler keeps failing to start, relaunching application");
            self.relaunch().await;
            return;
        }
        if let Err(e) = self.router.start_scheduler().await {
            warn!(error = %e, "scheduler auto-start failed");
        }
    }

    async fn relaunch(&self) {
        let Some(process) = &self.process else {
            warn!("no process control, cannot relaunch application");
            return;
        };
        if let Err(e) = process.terminate().await {
            warn!(error = %e, "failed to terminate application");
        }
        if let Err(e) = process.launch().await {
            warn!(error = %e, "failed to launch application");
        }
    }

    /// Stop a running scheduler and park once it has settled. A paused
    /// scheduler cannot be stopped, so it is resumed first.
    async fn secure_rig(&self, weather: WeatherState, scheduler: SchedulerState) {
        let result = match scheduler {
            SchedulerState::Running | SchedulerState::Startup => {
                info!(?weather, ?scheduler, "bad weather, stopping scheduler");
                self.stop_all().await
            }
            SchedulerState::Paused => {
                info!(?weather, "bad weather, resuming paused scheduler to stop it");
                self.router.start_scheduler().await
            }
            SchedulerState::Idle | SchedulerState::Aborted => self.router.park_mount().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(?weather, ?scheduler, error = %e, "bad weather safety failed");
        }
    }

    /// Abort local focus, align and capture and stop the scheduler.
    async fn stop_all(&self) -> rigsync_router::RouterResult<()> {
        self.router.stop_all().await;
        self.router.stop_scheduler().await
    }

    /// Clear start failures once the scheduler has run past the window.
    fn note_scheduler_running(&self) {
        let settled = {
            let state = self.router.state();
            state.flag(Flag::SchedulerRunning)
                && !state.flag_changed_within(Flag::SchedulerRunning, START_FAILURE_WINDOW)
        };
        if settled {
            lock(&self.starts).settled();
        }
    }

    // ── Align target ───────────────────────────────────────────────

    /// Keep the align module aimed at the active job.
    async fn check_align_target(&self, solution: Option<AlignmentSolution>) {
        let (job, align) = {
            let state = self.router.state();
            (state.active_job().cloned(), state.align())
        };
        let Some(job) = job else {
            return;
        };
        let wanted = AlignmentSolution::new(job.position_angle, job.ra * 15.0, job.dec);

        match self.router.align_target_coords().await {
            Ok(Some((ra, dec))) => {
                let aimed = AlignmentSolution::new(job.position_angle, ra * 15.0, dec);
                let drift = wanted.separation_arcsec(&aimed);
                if drift > ALIGN_TARGET_TOLERANCE {
                    info!(job = %job.name, drift, "align target drifted from job, correcting");
                    if let Err(e) = self.router.set_align_target_coords(job.ra, job.dec).await {
                        warn!(error = %e, "cannot correct align target");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "align target unreadable"),
        }

        if align != AlignState::Complete {
            return;
        }
        if let Some(solution) = solution {
            let distance = wanted.separation_arcsec(&solution);
            if distance > SOLUTION_TOLERANCE {
                warn!(job = %job.name, distance, "solution far from job, stopping everything");
                if let Err(e) = self.stop_all().await {
                    warn!(error = %e, "stop after bad solution failed");
                }
            }
        }
    }
}

#[async_trait]
impl NodeHooks for Leader {
    async fn on_ready(&self) {
        info!(followers = self.follower_count(), "leader ready");
        if let Some(path) = &self.config.schedule {
            match self.router.load_schedule(path).await {
                Ok(true) => {}
                Ok(false) => warn!(path = %path.display(), "schedule rejected"),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot load schedule"),
            }
        }
    }

    async fn on_disconnected(&self) {
        warn!("observatory application lost, followers keep last known state");
    }

    async fn on_status(&self, record: StatusRecord) {
        match record.action {
            Action::SchedulerStatus => {
                let scheduler = self.router.state().scheduler();
                lock(&self.auto_start).observe_scheduler(scheduler);
                self.check_scheduler().await;
            }
            Action::WeatherStatus => self.check_scheduler().await,
            Action::AlignStatus => self.check_align_target(record.solution).await,
            _ => {}
        }
        self.broadcast(record);
    }

    /// The active job can change while the scheduler stays running.
    async fn on_tick(&self) {
        self.note_scheduler_running();
        self.check_scheduler().await;
        match self.router.refresh_scheduler_job().await {
            Ok(true) => {
                if let Err(e) = self.router.resync(Subsystem::Scheduler, self).await {
                    debug!(error = %e, "scheduler resync failed");
                }
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "schedule job refresh failed"),
        }
    }
}
