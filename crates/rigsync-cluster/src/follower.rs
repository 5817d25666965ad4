//! Follower role: mirror the leader and drive the local rig.
//!
//! Two tasks run beside the node's supervisor:
//!
//! - the receiver keeps a channel to the leader open, reconnecting after
//!   [`FollowerConfig::reconnect_backoff`], and applies every replicated
//!   record to a mirrored [`ObservatoryState`];
//! - the stage loop evaluates the mirror every
//!   [`FollowerConfig::stage_period`] and moves the local rig through
//!   Focus → Align → Capture.
//!
//! Evaluations are serialized by the stage lock. They run only while the
//! node is ready, the leader has finished its bootstrap and automation is
//! not suspended.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rigsync_router::{NodeHooks, PA_TOLERANCE, RouterResult, StatusRouter};
use rigsync_state::{
    Action, AlignmentSolution, Flag, ObservatoryState, StateSnapshot, StatusRecord, normalize_pa,
};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel;
use crate::error::ReplicationResult;
use crate::protocol::Message;
use crate::strategy::{JobStrategy, LeaderWork, PreparedJob};

/// Pause before retrying work the strategy could not prepare.
pub const JOB_RETRY: Duration = Duration::from_secs(10);

/// How long capture may run without reporting an active job.
pub const JOBLESS_CAPTURE_LIMIT: Duration = Duration::from_secs(10);

/// Configuration for the follower role.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// `host:port` of the leader's replication listener.
    pub leader: String,
    /// Appended to mirrored job names.
    pub suffix: String,
    /// Sync the mount to each solution while aligning.
    pub auto_sync: bool,
    /// Autofocus in the Focus stage.
    pub auto_focus: bool,
    pub reconnect_backoff: Duration,
    pub stage_period: Duration,
}

impl FollowerConfig {
    pub fn new(leader: impl Into<String>) -> Self {
        Self {
            leader: leader.into(),
            suffix: "client".to_string(),
            auto_sync: false,
            auto_focus: true,
            reconnect_backoff: Duration::from_secs(1),
            stage_period: Duration::from_millis(100),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    pub fn with_auto_focus(mut self, enabled: bool) -> Self {
        self.auto_focus = enabled;
        self
    }

    pub fn with_stage_period(mut self, period: Duration) -> Self {
        self.stage_period = period;
        self
    }
}

/// Where the follower's rig is in its per-target workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Focus,
    Align,
    Capture,
}

impl Stage {
    /// Stage to continue from when the leader reports a new solution.
    fn on_new_solution(self, capturing: bool) -> Stage {
        match self {
            Stage::Focus | Stage::Align => self,
            Stage::Capture => Stage::Focus,
            Stage::Init if capturing => Stage::Capture,
            Stage::Init => Stage::Focus,
        }
    }
}

// ── Mirror ─────────────────────────────────────────────────────────

/// The leader as last reported.
#[derive(Debug, Default)]
struct Mirror {
    state: ObservatoryState,
    solution: Option<AlignmentSolution>,
    new_solution: bool,
    init_done: bool,
    connected: bool,
}

impl Mirror {
    fn apply(&mut self, record: &StatusRecord) {
        self.state.apply_record(record);
        if record.action == Action::AlignStatus {
            if let Some(solution) = record.solution {
                if self.solution != Some(solution) {
                    self.solution = Some(solution);
                    self.new_solution = true;
                }
            }
        }
    }
}

/// Mirror readings for one stage evaluation, edges consumed.
#[derive(Debug, Clone)]
struct Observation {
    tracking: bool,
    tracking_changed: bool,
    guiding: bool,
    guiding_changed: bool,
    dithering: bool,
    dithering_changed: bool,
    new_solution: bool,
    solution: Option<AlignmentSolution>,
    work: LeaderWork,
}

#[derive(Debug)]
struct StageMachine {
    stage: Stage,
    /// Key of the leader work the prepared job mirrors.
    work_key: Option<String>,
    prepared: Option<PreparedJob>,
    /// Work that failed to prepare and when it may be tried again.
    retry: Option<(String, Instant)>,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self {
            stage: Stage::Init,
            work_key: None,
            prepared: None,
            retry: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Follower ───────────────────────────────────────────────────────

pub struct Follower {
    router: Arc<StatusRouter>,
    config: FollowerConfig,
    strategy: Arc<dyn JobStrategy>,
    mirror: Mutex<Mirror>,
    machine: tokio::sync::Mutex<StageMachine>,
}

impl Follower {
    pub fn new(
        router: Arc<StatusRouter>,
        config: FollowerConfig,
        strategy: Arc<dyn JobStrategy>,
    ) -> Self {
        Self {
            router,
            config,
            strategy,
            mirror: Mutex::new(Mirror::default()),
            machine: tokio::sync::Mutex::new(StageMachine::default()),
        }
    }

    pub fn router(&self) -> &Arc<StatusRouter> {
        &self.router
    }

    pub fn config(&self) -> &FollowerConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn stage(&self) -> Stage {
        self.machine.lock().await.stage
    }

    /// Local job currently mirroring the leader's, if any.
    pub async fn prepared_job(&self) -> Option<PreparedJob> {
        self.machine.lock().await.prepared.clone()
    }

    pub fn leader_snapshot(&self) -> StateSnapshot {
        lock(&self.mirror).state.snapshot()
    }

    pub fn leader_solution(&self) -> Option<AlignmentSolution> {
        lock(&self.mirror).solution
    }

    pub fn is_leader_connected(&self) -> bool {
        lock(&self.mirror).connected
    }

    pub fn is_init_done(&self) -> bool {
        lock(&self.mirror).init_done
    }

    // ── Receiver ───────────────────────────────────────────────────

    /// Keep a channel to the leader open until shutdown. Connects only
    /// while the local rig is ready.
    pub async fn run_receiver(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if self.router.is_ready() {
                match TcpStream::connect(&self.config.leader).await {
                    Ok(stream) => {
                        info!(leader = %self.config.leader, "connected to leader");
                        if let Err(e) = self.session(stream, &mut shutdown).await {
                            warn!(error = %e, "leader channel failed");
                        }
                        self.leader_lost();
                    }
                    Err(e) => debug!(leader = %self.config.leader, error = %e, "leader unreachable"),
                }
            }
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("leader receiver stopped");
    }

    async fn session(
        &self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ReplicationResult<()> {
        let (sender, mut reader, writer) = channel::open(stream, 0)?;
        sender.send(Message::HelloFromClient)?;
        lock(&self.mirror).connected = true;

        let result = loop {
            tokio::select! {
                message = reader.next() => match message {
                    Ok(Some(message)) => self.handle_message(message).await,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
                _ = shutdown.changed() => break Ok(()),
            }
        };
        writer.abort();
        result
    }

    fn leader_lost(&self) {
        let mut mirror = lock(&self.mirror);
        if mirror.connected {
            info!("leader connection lost");
        }
        *mirror = Mirror::default();
    }

    /// Apply one message from the leader.
    pub async fn handle_message(&self, message: Message) {
        let record = {
            let mut mirror = lock(&self.mirror);
            match message {
                Message::HelloFromServer | Message::InitDone => {
                    if !mirror.init_done {
                        info!("leader initialization complete");
                    }
                    mirror.init_done = true;
                    return;
                }
                Message::BeginInit => {
                    mirror.init_done = false;
                    return;
                }
                Message::HelloFromClient => {
                    warn!("unexpected hello from leader");
                    return;
                }
                Message::Status(record) => {
                    mirror.apply(&record);
                    record
                }
            }
        };

        if matches!(record.action, Action::MountStatus | Action::SchedulerStatus) {
            let (mount, park, scheduler) = {
                let mirror = lock(&self.mirror);
                (mirror.state.mount(), mirror.state.park(), mirror.state.scheduler())
            };
            self.router.apply_thermal_policy(mount, park, scheduler).await;
        }
    }

    // ── Stage loop ─────────────────────────────────────────────────

    /// Evaluate the stage machine every period until shutdown.
    pub async fn run_stage_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.stage_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.should_evaluate() {
                        if let Err(e) = self.evaluate().await {
                            warn!(error = %e, "stage evaluation failed");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("stage loop stopped");
    }

    fn should_evaluate(&self) -> bool {
        self.router.is_ready() && !self.router.is_suspended() && self.is_init_done()
    }

    fn observe(&self) -> Observation {
        let mut guard = lock(&self.mirror);
        let mirror = &mut *guard;
        let new_solution = std::mem::take(&mut mirror.new_solution);
        let state = &mut mirror.state;
        Observation {
            tracking: state.flag(Flag::TrackingMount),
            tracking_changed: state.take_change(Flag::TrackingMount),
            guiding: state.flag(Flag::Guiding),
            guiding_changed: state.take_change(Flag::Guiding),
            dithering: state.flag(Flag::Dithering),
            dithering_changed: state.take_change(Flag::Dithering),
            work: LeaderWork {
                target: Some(state.capture_target().to_string()).filter(|t| !t.is_empty()),
                job: state.active_job().cloned(),
            },
            new_solution,
            solution: mirror.solution,
        }
    }

    /// One pass of the stage rules.
    pub async fn evaluate(&self) -> RouterResult<()> {
        let mut machine = self.machine.lock().await;
        let seen = self.observe();

        // The leader's mount stopped: nothing local may keep running.
        if !seen.tracking {
            if seen.tracking_changed {
                info!("leader mount not tracking");
            }
            if self.router.is_active() {
                self.router.stop_all().await;
            }
            return Ok(());
        }

        self.follow_work(&mut machine, &seen.work).await;

        if seen.new_solution {
            let capturing = self.router.state().flag(Flag::Capturing);
            let next = machine.stage.on_new_solution(capturing);
            if next != machine.stage {
                info!(from = ?machine.stage, to = ?next, "new leader solution");
                machine.stage = next;
            }
        }

        if !seen.guiding {
            if seen.guiding_changed {
                info!("leader stopped guiding");
                self.router.stop_all().await;
            }
            return Ok(());
        }

        match machine.stage {
            Stage::Init => Ok(()),
            Stage::Focus => self.focus_stage(&mut machine).await,
            Stage::Align => self.align_stage(&mut machine, &seen).await,
            Stage::Capture => self.capture_stage(&machine, &seen).await,
        }
    }

    /// Materialize the leader's work locally when it changes. New work
    /// starts over from Focus.
    async fn follow_work(&self, machine: &mut StageMachine, work: &LeaderWork) {
        let Some(key) = self.strategy.work_key(work) else {
            return;
        };
        if machine.work_key.as_deref() == Some(key.as_str()) {
            return;
        }
        if let Some((failed, at)) = &machine.retry {
            if *failed == key && Instant::now() < *at {
                return;
            }
        }

        info!(work = %key, strategy = self.strategy.name(), "leader work changed");
        self.router.stop_all().await;
        match self.strategy.prepare(&self.router, work, &self.config.suffix).await {
            Ok(prepared) => {
                info!(job = %prepared.name, "local job ready");
                machine.work_key = Some(key);
                machine.prepared = Some(prepared);
                machine.retry = None;
                machine.stage = Stage::Focus;
            }
            Err(e) => {
                warn!(work = %key, error = %e, "cannot prepare local job");
                machine.retry = Some((key, Instant::now() + JOB_RETRY));
            }
        }
    }

    async fn focus_stage(&self, machine: &mut StageMachine) -> RouterResult<()> {
        self.router.stop_all().await;
        if self.config.auto_focus && self.router.can_autofocus().await {
            match self.router.run_autofocus(None).await? {
                Some(position) => info!(position, "autofocus complete"),
                None => warn!("autofocus did not complete"),
            }
        }
        machine.stage = Stage::Align;
        Ok(())
    }

    /// Target to frame: the leader's solution, else its job, with a local
    /// angle override on top.
    fn alignment_target(&self, machine: &StageMachine, seen: &Observation) -> Option<AlignmentSolution> {
        let base = seen.solution.or_else(|| {
            let job = seen.work.job.as_ref()?;
            Some(AlignmentSolution::new(job.position_angle, job.ra * 15.0, job.dec))
        })?;
        let position_angle = machine
            .prepared
            .as_ref()
            .and_then(|p| p.position_angle)
            .unwrap_or(base.position_angle);
        Some(AlignmentSolution {
            position_angle: normalize_pa(position_angle),
            ..base
        })
    }

    async fn align_stage(&self, machine: &mut StageMachine, seen: &Observation) -> RouterResult<()> {
        self.router.stop_all().await;
        let Some(target) = self.alignment_target(machine, seen) else {
            warn!("no leader position to align to, capturing as framed");
            machine.stage = Stage::Capture;
            return Ok(());
        };
        self.router
            .execute_pa_alignment(target, self.config.auto_sync)
            .await?;
        if self.router.pa_in_range(target.position_angle, PA_TOLERANCE) {
            info!(pa = target.position_angle, "framing matches leader");
            machine.stage = Stage::Capture;
        } else {
            debug!(pa = target.position_angle, "framing off target, aligning again");
        }
        Ok(())
    }

    async fn capture_stage(&self, machine: &StageMachine, seen: &Observation) -> RouterResult<()> {
        if seen.dithering || seen.dithering_changed {
            self.abort_for_dither().await?;
            return Ok(());
        }
        if self.router.state().flag(Flag::Focusing) {
            return Ok(());
        }
        if !self.router.state().flag(Flag::Capturing) {
            if self.router.pending_job_count().await? == 0 {
                if let Some(prepared) = &machine.prepared {
                    if let Err(e) = self.strategy.reload(&self.router, prepared).await {
                        warn!(error = %e, "cannot reload sequence");
                        return Ok(());
                    }
                }
            }
            self.router.start_capture().await?;
            return Ok(());
        }
        self.abort_if_stuck().await
    }

    async fn abort_for_dither(&self) -> RouterResult<()> {
        let Some(snapshot) = self.router.capture_snapshot().await? else {
            return Ok(());
        };
        if snapshot.abortable_for_dither() {
            info!(
                exposure = snapshot.exposure,
                time_left = snapshot.time_left,
                "leader dithering, aborting exposure"
            );
            self.router.stop_capture().await?;
        }
        Ok(())
    }

    async fn abort_if_stuck(&self) -> RouterResult<()> {
        let snapshot = self.router.capture_snapshot().await?;
        let Some(running) = self.router.frame_running_for() else {
            return Ok(());
        };
        let stuck = match &snapshot {
            Some(snapshot) => snapshot.is_stuck(running),
            None => running > JOBLESS_CAPTURE_LIMIT,
        };
        if stuck {
            warn!(job = snapshot.map(|s| s.job_id), ?running, "capture stuck, aborting");
            self.router.stop_capture().await?;
        }
        Ok(())
    }

    // ── Manual capture control ─────────────────────────────────────

    /// Start local capture if the leader is tracking and guiding.
    /// Returns whether capture is running afterwards.
    pub async fn check_start_capture(&self) -> RouterResult<bool> {
        let _machine = self.machine.lock().await;
        let (tracking, guiding) = {
            let mirror = lock(&self.mirror);
            (
                mirror.state.flag(Flag::TrackingMount),
                mirror.state.flag(Flag::Guiding),
            )
        };
        if self.router.state().flag(Flag::Capturing) {
            return Ok(true);
        }
        if !(tracking && guiding) {
            debug!(tracking, guiding, "leader not ready for capture");
            return Ok(false);
        }
        self.router.start_capture().await
    }

    /// Stop local capture. Returns whether capture is stopped afterwards.
    pub async fn check_stop_capture(&self) -> RouterResult<bool> {
        let _machine = self.machine.lock().await;
        if !self.router.state().flag(Flag::Capturing) {
            return Ok(true);
        }
        self.router.stop_capture().await
    }
}

#[async_trait]
impl NodeHooks for Follower {
    async fn on_ready(&self) {
        info!(leader = %self.config.leader, strategy = self.strategy.name(), "follower ready");
    }

    /// A restarted application has lost its queue; start over.
    async fn on_disconnected(&self) {
        *self.machine.lock().await = StageMachine::default();
    }
}

#[cfg(test)]
mod tests {
    use rigsync_bus::{MemoryBus, Subsystem, names};
    use rigsync_router::RouterConfig;
    use rigsync_state::{GuideStatus, MountStatus, Properties, ScheduleJob};
    use serde_json::json;

    use super::*;
    use crate::strategy::SequenceByTarget;

    fn record(action: Action, status: i64) -> StatusRecord {
        let mut properties = Properties::new();
        properties.insert("status".into(), json!(status));
        StatusRecord::new(action, properties)
    }

    fn follower(bus: &Arc<MemoryBus>) -> Follower {
        let router = Arc::new(StatusRouter::new(
            bus.clone(),
            RouterConfig::default().with_local_thermal_policy(false),
        ));
        Follower::new(
            router,
            FollowerConfig::new("127.0.0.1:1"),
            Arc::new(SequenceByTarget::new("/nonexistent")),
        )
    }

    #[test]
    fn new_solution_moves_capture_back_to_focus() {
        assert_eq!(Stage::Capture.on_new_solution(true), Stage::Focus);
        assert_eq!(Stage::Align.on_new_solution(false), Stage::Align);
        assert_eq!(Stage::Focus.on_new_solution(true), Stage::Focus);
        assert_eq!(Stage::Init.on_new_solution(true), Stage::Capture);
        assert_eq!(Stage::Init.on_new_solution(false), Stage::Focus);
    }

    #[tokio::test]
    async fn bootstrap_messages_toggle_init_done() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        assert!(!follower.is_init_done());
        follower.handle_message(Message::HelloFromServer).await;
        assert!(follower.is_init_done());
        follower.handle_message(Message::BeginInit).await;
        assert!(!follower.is_init_done());
        follower.handle_message(Message::InitDone).await;
        assert!(follower.is_init_done());
    }

    #[tokio::test]
    async fn records_update_the_mirror_not_the_local_state() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        follower
            .handle_message(Message::Status(record(Action::MountStatus, 3)))
            .await;
        follower
            .handle_message(Message::Status(record(Action::GuideStatus, 12)))
            .await;

        let leader = follower.leader_snapshot();
        assert_eq!(leader.mount, MountStatus::Tracking);
        assert_eq!(leader.guide, GuideStatus::Guiding);
        assert!(leader.tracking_mount);
        assert_eq!(follower.router().state().mount(), MountStatus::Idle);
    }

    #[tokio::test]
    async fn same_solution_is_not_new() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        let solved = record(Action::AlignStatus, 1)
            .with_solution(Some(AlignmentSolution::new(10.0, 150.0, -5.0)));

        follower.handle_message(Message::Status(solved.clone())).await;
        assert!(follower.observe().new_solution);
        follower.handle_message(Message::Status(solved)).await;
        assert!(!follower.observe().new_solution);
    }

    #[tokio::test]
    async fn leader_not_tracking_stops_local_activity() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        follower.router().state().apply_capture(rigsync_state::CaptureStatus::Capturing);
        follower
            .handle_message(Message::Status(record(Action::MountStatus, 3)))
            .await;
        follower.evaluate().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 0);

        follower
            .handle_message(Message::Status(record(Action::MountStatus, 0)))
            .await;
        follower.evaluate().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 1);
    }

    #[tokio::test]
    async fn idle_rig_is_left_alone_when_leader_stops_tracking() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        follower.evaluate().await.unwrap();
        assert!(bus.call_log().is_empty());
    }

    fn targeting(target: &str) -> LeaderWork {
        LeaderWork {
            target: Some(target.into()),
            job: None,
        }
    }

    fn capture_of(target: &str) -> Message {
        let mut capture = record(Action::CaptureStatus, 0);
        capture.properties.insert("targetName".into(), json!(target));
        Message::Status(capture)
    }

    #[tokio::test(start_paused = true)]
    async fn unpreparable_work_is_retried_after_a_pause() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        let mut machine = StageMachine::default();

        follower.follow_work(&mut machine, &targeting("M31")).await;
        assert!(machine.work_key.is_none());
        let (_, retry_at) = machine.retry.clone().expect("retry scheduled");

        follower.follow_work(&mut machine, &targeting("M31")).await;
        assert_eq!(machine.retry.as_ref().map(|(_, at)| *at), Some(retry_at));

        tokio::time::advance(JOB_RETRY).await;
        follower.follow_work(&mut machine, &targeting("M31")).await;
        assert!(machine.retry.as_ref().unwrap().1 > retry_at);
    }

    #[tokio::test(start_paused = true)]
    async fn new_target_is_tried_without_waiting_out_the_retry() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        let mut machine = StageMachine::default();

        follower.follow_work(&mut machine, &targeting("M31")).await;
        follower.follow_work(&mut machine, &targeting("M33")).await;
        assert_eq!(machine.retry.as_ref().map(|(key, _)| key.as_str()), Some("M33"));
    }

    #[tokio::test]
    async fn capture_target_selects_sequence_without_a_scheduler_job() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m_31.esq"), "<SequenceQueue/>").unwrap();
        std::fs::write(dir.path().join("m_33.esq"), "<SequenceQueue/>").unwrap();
        let bus = Arc::new(MemoryBus::new());
        let router = Arc::new(StatusRouter::new(
            bus.clone(),
            RouterConfig::default().with_local_thermal_policy(false),
        ));
        let follower = Follower::new(
            router,
            FollowerConfig::new("127.0.0.1:1"),
            Arc::new(SequenceByTarget::new(dir.path())),
        );

        follower.handle_message(Message::HelloFromServer).await;
        follower
            .handle_message(Message::Status(record(Action::MountStatus, 3)))
            .await;
        follower.handle_message(capture_of("M 31")).await;
        follower.evaluate().await.unwrap();

        assert_eq!(
            bus.calls_to(Subsystem::Capture, names::LOAD_SEQUENCE_QUEUE),
            vec![vec![json!(dir.path().join("m_31.esq").display().to_string())]]
        );
        assert_eq!(
            bus.property(Subsystem::Capture, names::TARGET_NAME),
            Some(json!("M 31_client"))
        );
        assert_eq!(follower.stage().await, Stage::Focus);
        assert_eq!(follower.prepared_job().await.unwrap().name, "M 31_client");

        // Same target again: nothing reloads.
        follower.handle_message(capture_of("M 31")).await;
        follower.evaluate().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Capture, names::LOAD_SEQUENCE_QUEUE), 1);

        // A new target while capturing starts over from Focus.
        follower.machine.lock().await.stage = Stage::Capture;
        follower.handle_message(capture_of("M 33")).await;
        follower.evaluate().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Capture, names::LOAD_SEQUENCE_QUEUE), 2);
        assert_eq!(follower.stage().await, Stage::Focus);
        assert_eq!(
            bus.property(Subsystem::Capture, names::TARGET_NAME),
            Some(json!("M 33_client"))
        );
    }

    #[tokio::test]
    async fn alignment_target_prefers_solution_then_override() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        let job = ScheduleJob {
            name: "M31".into(),
            ra: 1.0,
            dec: 41.0,
            position_angle: 182.4,
            sequence: String::new(),
            focal_ratio: None,
            sequence_content: None,
        };
        let mut machine = StageMachine::default();
        let mut seen = follower.observe();
        seen.work.job = Some(job);

        let from_job = follower.alignment_target(&machine, &seen).unwrap();
        assert!((from_job.position_angle - 2.4).abs() < 1e-9);
        assert_eq!(from_job.ra, 15.0);

        seen.solution = Some(AlignmentSolution::new(30.0, 150.0, -5.0));
        assert_eq!(follower.alignment_target(&machine, &seen).unwrap().ra, 150.0);

        machine.prepared = Some(PreparedJob {
            name: "m31_client".into(),
            sequence: "/seq/m31.esq".into(),
            schedule: None,
            position_angle: Some(95.0),
        });
        let overridden = follower.alignment_target(&machine, &seen).unwrap();
        assert_eq!(overridden.position_angle, 95.0);
        assert_eq!(overridden.ra, 150.0);
    }

    #[tokio::test]
    async fn manual_start_needs_tracking_and_guiding_leader() {
        let bus = Arc::new(MemoryBus::new());
        let follower = follower(&bus);
        assert!(!follower.check_start_capture().await.unwrap());
        assert_eq!(bus.call_count(Subsystem::Capture, names::START), 0);

        // Already stopped.
        assert!(follower.check_stop_capture().await.unwrap());
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 0);
    }

    /// Leader tracking and dithering again after a short settle, local rig
    /// capturing with `time_left` seconds to go on a 300 s exposure.
    async fn dithering_follower(bus: &Arc<MemoryBus>, time_left: f64) -> Follower {
        bus.set_return(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, json!(0));
        bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_DURATION, json!(300.0));
        bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_PROGRESS, json!(time_left));
        let follower = follower(bus);
        follower
            .router()
            .state()
            .apply_capture(rigsync_state::CaptureStatus::Capturing);

        let guide = [12, 15, 12, 15].map(|status| record(Action::GuideStatus, status));
        follower
            .handle_message(Message::Status(record(Action::MountStatus, 3)))
            .await;
        for record in guide {
            follower.handle_message(Message::Status(record)).await;
        }
        let solved = record(Action::AlignStatus, 1)
            .with_solution(Some(AlignmentSolution::new(2.4, 10.0, 41.0)));
        follower.handle_message(Message::Status(solved)).await;
        follower
    }

    #[tokio::test(start_paused = true)]
    async fn exposure_just_started_survives_dither() {
        let bus = Arc::new(MemoryBus::new());
        let follower = dithering_follower(&bus, 298.8).await;

        follower.evaluate().await.unwrap();
        assert_eq!(follower.stage().await, Stage::Capture);
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exposure_in_progress_is_aborted_for_dither() {
        let bus = Arc::new(MemoryBus::new());
        let follower = dithering_follower(&bus, 200.0).await;

        follower.evaluate().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_without_job_is_aborted_after_limit() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_return(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, json!(-1));
        let follower = follower(&bus);
        follower
            .router()
            .dispatch(
                rigsync_bus::BusSignal::status(Subsystem::Capture, 2),
                &rigsync_router::NoHooks,
            )
            .await;
        assert!(follower.router().state().flag(Flag::Capturing));

        follower.abort_if_stuck().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 0);

        tokio::time::advance(JOBLESS_CAPTURE_LIMIT + Duration::from_secs(1)).await;
        follower.abort_if_stuck().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 1);
    }
}
