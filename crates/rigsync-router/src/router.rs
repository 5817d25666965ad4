//! The device status router.
//!
//! `StatusRouter` owns the node's [`ObservatoryState`] behind a single
//! coarse lock. Bus signals are handled one at a time on the dispatch
//! task: the subsystem's properties are re-read, the matching `apply_*`
//! entry point runs under the lock, side effects (thermal policy, capture
//! bookkeeping) run after it is released, and the resulting
//! [`StatusRecord`] is handed to the node's [`NodeHooks`].
//!
//! Automation operations in `automation.rs` wait on [`RouterEvent`]s
//! broadcast by the dispatch task, never on the state lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use rigsync_bus::{
    AutomationBus, BusSignal, Camera, FilterWheel, Focuser, Rotator, SignalKind, SignalStream,
    Subsystem, bound_device, find_first_device, names,
};
use rigsync_state::{
    Action, AlignState, AlignmentSolution, CaptureStatus, FocusState, GuideStatus,
    MeridianFlipStatus, MountStatus, ObservatoryState, ParkStatus, Properties, ScheduleJob,
    SchedulerState, StateSnapshot, StatusRecord, WeatherState,
};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationSlot;
use crate::config::RouterConfig;
use crate::error::{RouterError, RouterResult};
use crate::hooks::NodeHooks;
use crate::thermal::{ThermalAction, ThermalCommand, ThermalController, ThermalReading, thermal_policy};

/// Capture may sit in `ChangingFilter` this long before it is aborted.
pub const FILTER_CHANGE_LIMIT: Duration = Duration::from_secs(15);

const EVENT_CAPACITY: usize = 256;

/// Activity observed by the dispatch task, for automation waits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouterEvent {
    Align(AlignState),
    Solution(AlignmentSolution),
    Focus(FocusState),
    Capture(CaptureStatus),
}

/// Physical devices backing the optical train.
#[derive(Debug, Clone, Default)]
pub struct DeviceSet {
    pub optical_train: String,
    pub camera: Option<Camera>,
    pub focuser: Option<Focuser>,
    pub filter_wheel: Option<FilterWheel>,
    pub rotator: Option<Rotator>,
    pub weather: Option<Subsystem>,
}

#[derive(Debug, Default)]
pub(crate) struct CaptureRun {
    pub(crate) job_id: Option<i64>,
    /// Start of the current frame.
    pub(crate) frame_started: Option<Instant>,
    pub(crate) changing_filter_since: Option<Instant>,
}

struct Subscription {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StatusRouter {
    pub(crate) bus: Arc<dyn AutomationBus>,
    pub(crate) config: RouterConfig,
    state: Mutex<ObservatoryState>,
    ready: AtomicBool,
    suspended: AtomicBool,
    devices: RwLock<DeviceSet>,
    thermal: tokio::sync::Mutex<ThermalController>,
    events: broadcast::Sender<RouterEvent>,
    solution: Mutex<Option<AlignmentSolution>>,
    pub(crate) capture_run: Mutex<CaptureRun>,
    pub(crate) calibration: CalibrationSlot,
    subscription: Mutex<Option<Subscription>>,
    /// Serializes dispatch from the signal task and from resyncs.
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl StatusRouter {
    pub fn new(bus: Arc<dyn AutomationBus>, config: RouterConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            bus,
            thermal: tokio::sync::Mutex::new(ThermalController::new(config.pre_cool_temp)),
            config,
            state: Mutex::new(ObservatoryState::new()),
            ready: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            devices: RwLock::new(DeviceSet::default()),
            events,
            solution: Mutex::new(None),
            capture_run: Mutex::new(CaptureRun::default()),
            calibration: CalibrationSlot::default(),
            subscription: Mutex::new(None),
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn bus(&self) -> &Arc<dyn AutomationBus> {
        &self.bus
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // ── State access ───────────────────────────────────────────────

    /// Take the coarse state lock. Hold it only for short decisions.
    pub fn state(&self) -> MutexGuard<'_, ObservatoryState> {
        lock(&self.state)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state().snapshot()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub(crate) fn ensure_ready(&self) -> RouterResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(RouterError::NotConnected)
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn suspend(&self) {
        if !self.suspended.swap(true, Ordering::SeqCst) {
            info!("automation suspended");
        }
    }

    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::SeqCst) {
            info!("automation resumed");
        }
    }

    pub fn devices(&self) -> DeviceSet {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RouterEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Most recent plate-solve solution of this node.
    pub fn last_solution(&self) -> Option<AlignmentSolution> {
        *lock(&self.solution)
    }

    // ── Subscription ───────────────────────────────────────────────

    pub fn is_subscribed(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    /// Attach to every monitored subsystem and resolve devices.
    ///
    /// Idempotent. The current status of each subsystem is dispatched
    /// before live signals are processed.
    pub async fn subscribe(self: &Arc<Self>, hooks: Arc<dyn NodeHooks>) -> RouterResult<()> {
        if self.is_subscribed() {
            return Ok(());
        }

        let weather = self.find_weather().await;
        let devices = self.resolve_devices(weather).await;
        info!(
            camera = devices.camera.as_ref().map(|d| d.name().to_string()),
            focuser = devices.focuser.as_ref().map(|d| d.name().to_string()),
            filter_wheel = devices.filter_wheel.as_ref().map(|d| d.name().to_string()),
            rotator = devices.rotator.as_ref().map(|d| d.name().to_string()),
            weather = weather.map(|w| w.to_string()),
            "devices resolved"
        );
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = devices;

        let mut subsystems = Subsystem::MONITORED.to_vec();
        subsystems.extend(weather);
        let stream = self.bus.subscribe(&subsystems).await?;

        for subsystem in &subsystems {
            match self.bus.read_ordinal(*subsystem).await {
                Ok(ordinal) => {
                    self.dispatch(BusSignal::status(*subsystem, ordinal), hooks.as_ref())
                        .await
                }
                Err(e) => debug!(%subsystem, error = %e, "no initial status"),
            }
        }

        let (stop, stop_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(run_dispatch(Arc::clone(self), hooks, stream, stop_rx.clone())),
            tokio::spawn(run_thermal(Arc::clone(self), stop_rx)),
        ];
        *lock(&self.subscription) = Some(Subscription { stop, tasks });
        info!(subsystems = subsystems.len(), "subscribed to bus signals");
        Ok(())
    }

    /// Drop subscriptions and return the snapshot to idle defaults.
    pub fn unsubscribe(&self) {
        if let Some(sub) = lock(&self.subscription).take() {
            let _ = sub.stop.send(true);
            for task in sub.tasks {
                task.abort();
            }
            info!("unsubscribed from bus signals");
        }
        *self.devices.write().unwrap_or_else(PoisonError::into_inner) = DeviceSet::default();
        *lock(&self.capture_run) = CaptureRun::default();
        self.state().reset();
    }

    async fn find_weather(&self) -> Option<Subsystem> {
        for index in Subsystem::WEATHER_INDICES {
            let subsystem = Subsystem::Weather(index);
            if self.bus.ping(subsystem).await.is_ok() {
                info!(%subsystem, "weather subsystem found");
                return Some(subsystem);
            }
        }
        None
    }

    async fn resolve_devices(&self, weather: Option<Subsystem>) -> DeviceSet {
        let bus = &self.bus;
        let read = |name: &'static str| async move {
            bus.read_string(Subsystem::Capture, name)
                .await
                .map_err(|e| debug!(property = name, error = %e, "device not bound"))
                .ok()
                .flatten()
        };

        let optical_train = read(names::OPTICAL_TRAIN).await.unwrap_or_default();
        let camera = bound_device(read(names::CAMERA).await);
        let filter_wheel = bound_device(read(names::FILTER_WHEEL).await);
        let focuser = match bus
            .call(Subsystem::Focus, names::FOCUSER, vec![json!(optical_train)])
            .await
        {
            Ok(Value::String(name)) => bound_device(Some(name)),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "no focuser");
                None
            }
        };
        let rotator = find_first_device(bus, names::ROTATOR_INTERFACE)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "rotator lookup failed");
                None
            });

        DeviceSet {
            camera: camera.map(|d| Camera::new(bus.clone(), d)),
            focuser: focuser.map(|d| Focuser::new(bus.clone(), d)),
            filter_wheel: filter_wheel.map(|d| FilterWheel::new(bus.clone(), d)),
            rotator: rotator.map(|d| Rotator::new(bus.clone(), d)),
            weather,
            optical_train,
        }
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Handle one bus signal; failures are logged.
    pub async fn dispatch(&self, signal: BusSignal, hooks: &dyn NodeHooks) {
        let _serial = self.dispatch_lock.lock().await;
        if let Err(e) = self.handle_signal(signal, hooks).await {
            warn!(subsystem = %signal.subsystem, error = %e, "signal handling failed");
        }
    }

    /// Re-read a subsystem's status and dispatch it as a fresh signal.
    pub async fn resync(&self, subsystem: Subsystem, hooks: &dyn NodeHooks) -> RouterResult<()> {
        let ordinal = self.bus.read_ordinal(subsystem).await?;
        self.dispatch(BusSignal::status(subsystem, ordinal), hooks).await;
        Ok(())
    }

    async fn handle_signal(&self, signal: BusSignal, hooks: &dyn NodeHooks) -> RouterResult<()> {
        let subsystem = signal.subsystem;
        let ordinal = match signal.kind {
            SignalKind::Status(ordinal) => ordinal,
            SignalKind::ParkStatus(ordinal) => {
                self.state().apply_park(ParkStatus::from_ordinal(ordinal));
                self.run_thermal_policy().await;
                return Ok(());
            }
            SignalKind::MeridianFlipStatus(ordinal) => {
                let status = MeridianFlipStatus::from_ordinal(ordinal);
                if self.state().apply_meridian_flip(status) {
                    info!(?status, "meridian flip");
                }
                return Ok(());
            }
            SignalKind::NewSolution => {
                let properties = self.bus.read_all(subsystem).await?;
                let ordinal = properties
                    .get(names::STATUS)
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);
                let record = self.on_align(ordinal, properties, true).await;
                hooks.on_status(record).await;
                return Ok(());
            }
        };

        let mut properties = self.bus.read_all(subsystem).await?;
        properties.insert(names::STATUS.to_string(), json!(ordinal));

        let record = match subsystem {
            Subsystem::Mount => Some(self.on_mount(ordinal, properties).await),
            Subsystem::Guide => Some(self.on_guide(ordinal, properties)),
            Subsystem::Capture => Some(self.on_capture(ordinal, properties).await),
            Subsystem::Focus => Some(self.on_focus(ordinal, properties)),
            Subsystem::Align => Some(self.on_align(ordinal, properties, false).await),
            Subsystem::Scheduler => Some(self.on_scheduler(ordinal, properties).await),
            Subsystem::Weather(_) => Some(self.on_weather(ordinal, properties)),
            Subsystem::Dome => {
                self.state()
                    .apply_dome(rigsync_state::DomeState::from_ordinal(ordinal));
                None
            }
            Subsystem::Ekos | Subsystem::Indi => None,
        };

        if let Some(record) = record {
            hooks.on_status(record).await;
        }
        Ok(())
    }

    async fn on_mount(&self, ordinal: i64, properties: Properties) -> StatusRecord {
        let status = MountStatus::from_ordinal(ordinal);
        let changed = {
            let mut state = self.state();
            if let Some(park) = properties.get(names::PARK_STATUS) {
                state.apply_park(ParkStatus::from_value(park));
            }
            state.apply_mount(status)
        };
        if changed {
            debug!(?status, "mount status");
        }
        self.run_thermal_policy().await;
        StatusRecord::new(Action::MountStatus, properties)
    }

    fn on_guide(&self, ordinal: i64, properties: Properties) -> StatusRecord {
        let status = GuideStatus::from_ordinal(ordinal);
        if self.state().apply_guide(status) {
            debug!(?status, "guide status");
        }
        StatusRecord::new(Action::GuideStatus, properties)
    }

    async fn on_capture(&self, ordinal: i64, properties: Properties) -> StatusRecord {
        let status = CaptureStatus::from_ordinal(ordinal);
        let target = properties
            .get(names::TARGET_NAME)
            .and_then(Value::as_str)
            .map(str::to_string);
        let (was_capturing, capturing) = {
            let mut state = self.state();
            let was = state.flag(rigsync_state::Flag::Capturing);
            if let Some(target) = &target {
                state.set_capture_target(target.clone());
            }
            state.apply_capture(status);
            (was, state.flag(rigsync_state::Flag::Capturing))
        };
        debug!(?status, "capture status");

        let job_id = if capturing && !was_capturing {
            self.bus
                .call_i64(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, vec![])
                .await
                .ok()
        } else {
            None
        };

        {
            let now = Instant::now();
            let mut run = lock(&self.capture_run);
            if !capturing {
                *run = CaptureRun::default();
            } else {
                if job_id.is_some() {
                    run.job_id = job_id;
                }
                if status == CaptureStatus::Capturing || run.frame_started.is_none() {
                    run.frame_started = Some(now);
                }
                if status == CaptureStatus::ChangingFilter {
                    run.changing_filter_since.get_or_insert(now);
                } else {
                    run.changing_filter_since = None;
                }
            }
        }

        self.publish(RouterEvent::Capture(status));
        StatusRecord::new(Action::CaptureStatus, properties).with_target_name(target)
    }

    fn on_focus(&self, ordinal: i64, properties: Properties) -> StatusRecord {
        let status = FocusState::from_ordinal(ordinal);
        if self.state().apply_focus(status) {
            debug!(?status, "focus status");
        }
        self.publish(RouterEvent::Focus(status));
        StatusRecord::new(Action::FocusStatus, properties)
    }

    async fn on_align(&self, ordinal: i64, properties: Properties, fresh: bool) -> StatusRecord {
        let status = AlignState::from_ordinal(ordinal);
        let target = {
            let mut state = self.state();
            state.apply_align(status);
            state.capture_target().to_string()
        };
        debug!(?status, fresh, "align status");

        let solution = self.read_solution().await;
        if let Some(solution) = solution {
            *lock(&self.solution) = Some(solution);
            if fresh {
                info!(
                    pa = solution.position_angle,
                    ra = solution.ra,
                    dec = solution.dec,
                    "new alignment solution"
                );
                self.publish(RouterEvent::Solution(solution));
            }
        }
        // Published after the solution so waiters see it before the outcome.
        self.publish(RouterEvent::Align(status));

        StatusRecord::new(Action::AlignStatus, properties)
            .with_solution(solution)
            .with_target_name(Some(target).filter(|t| !t.is_empty()))
    }

    async fn on_scheduler(&self, ordinal: i64, properties: Properties) -> StatusRecord {
        let status = SchedulerState::from_ordinal(ordinal);
        if self.state().apply_scheduler(status) {
            info!(?status, "scheduler status");
        }
        if let Err(e) = self.refresh_scheduler_job().await {
            warn!(error = %e, "failed to read active schedule job");
        }
        self.run_thermal_policy().await;
        let job = self.state().active_job().cloned();
        StatusRecord::new(Action::SchedulerStatus, properties).with_job(job)
    }

    fn on_weather(&self, ordinal: i64, properties: Properties) -> StatusRecord {
        let status = WeatherState::from_ordinal(ordinal);
        if self.state().apply_weather(status) {
            info!(?status, "weather status");
        }
        StatusRecord::new(Action::WeatherStatus, properties)
    }

    async fn read_solution(&self) -> Option<AlignmentSolution> {
        match self
            .bus
            .call_f64_list(Subsystem::Align, names::GET_SOLUTION_RESULT, vec![])
            .await
        {
            Ok(raw) => AlignmentSolution::from_raw(&raw),
            Err(e) => {
                debug!(error = %e, "no solution result");
                None
            }
        }
    }

    // ── Schedule job ───────────────────────────────────────────────

    /// Re-read the scheduler's active job. Returns whether its identity changed.
    pub async fn refresh_scheduler_job(&self) -> RouterResult<bool> {
        let name = match self
            .bus
            .read_string(Subsystem::Scheduler, names::CURRENT_JOB_NAME)
            .await
        {
            Ok(name) => name.filter(|n| !n.is_empty()),
            Err(rigsync_bus::BusError::MissingProperty { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let current = self.state().active_job().map(|j| j.name.clone());
        let Some(name) = name else {
            return Ok(self.state().set_active_job(None));
        };
        if current.as_deref() == Some(name.as_str()) {
            return Ok(false);
        }

        let Some(json) = self
            .bus
            .read_string(Subsystem::Scheduler, names::CURRENT_JOB_JSON)
            .await?
        else {
            return Ok(false);
        };
        let job = match ScheduleJob::from_bus_json(&json) {
            Ok(job) => job,
            Err(e) => {
                warn!(job = %name, error = %e, "malformed schedule job");
                return Ok(false);
            }
        };
        let content = read_sequence(&job.sequence).await;
        let job = job
            .with_focal_ratio(self.focal_ratio().await)
            .with_sequence_content(content);
        info!(job = %job.name, sequence = %job.sequence, "active schedule job");
        Ok(self.state().set_active_job(Some(job)))
    }

    /// Focal ratio of the optical train, when the align subsystem knows it.
    pub async fn focal_ratio(&self) -> Option<f64> {
        let info = self
            .bus
            .call_f64_list(Subsystem::Align, names::TELESCOPE_INFO, vec![])
            .await
            .ok()?;
        let (focal_length, aperture) = (*info.first()?, *info.get(1)?);
        let reducer = info.get(2).copied().filter(|r| *r > 0.0).unwrap_or(1.0);
        (aperture > 0.0 && focal_length > 0.0).then(|| focal_length / aperture * reducer)
    }

    // ── Thermal ────────────────────────────────────────────────────

    async fn run_thermal_policy(&self) {
        if !self.config.local_thermal_policy {
            return;
        }
        let (mount, park, scheduler) = {
            let state = self.state();
            (state.mount(), state.park(), state.scheduler())
        };
        self.apply_thermal_policy(mount, park, scheduler).await;
    }

    /// Warm or pre-cool the camera for the given mount and scheduler status.
    pub async fn apply_thermal_policy(
        &self,
        mount: MountStatus,
        park: ParkStatus,
        scheduler: SchedulerState,
    ) {
        let result = match thermal_policy(mount, park, scheduler) {
            Some(ThermalAction::Warm) => self.warm_camera().await,
            Some(ThermalAction::PreCool) => self.pre_cool_camera().await,
            None => Ok(()),
        };
        if let Err(e) = result {
            debug!(error = %e, "thermal policy not applied");
        }
    }

    pub async fn warm_camera(&self) -> RouterResult<()> {
        self.thermal_command(|ctl, reading| ctl.warm(reading)).await
    }

    pub async fn pre_cool_camera(&self) -> RouterResult<()> {
        self.thermal_command(|ctl, reading| ctl.pre_cool(reading)).await
    }

    /// One thermal controller tick.
    pub async fn thermal_tick(&self) -> RouterResult<()> {
        self.thermal_command(|ctl, reading| ctl.step(reading)).await
    }

    pub async fn is_warming(&self) -> bool {
        self.thermal.lock().await.is_warming()
    }

    async fn thermal_command<F>(&self, f: F) -> RouterResult<()>
    where
        F: FnOnce(&mut ThermalController, ThermalReading) -> Vec<ThermalCommand>,
    {
        let camera = self.devices().camera.ok_or(RouterError::DeviceMissing("camera"))?;
        let mut controller = self.thermal.lock().await;
        let reading = ThermalReading::read(&camera).await?;
        for command in f(&mut controller, reading) {
            command.apply(&camera).await?;
        }
        Ok(())
    }

    // ── Watchdog ───────────────────────────────────────────────────

    /// Abort a capture stuck changing filters.
    pub async fn watchdog(&self) {
        let stuck = {
            let mut run = lock(&self.capture_run);
            match run.changing_filter_since {
                Some(since) if since.elapsed() > FILTER_CHANGE_LIMIT => {
                    run.changing_filter_since = None;
                    true
                }
                _ => false,
            }
        };
        if stuck {
            warn!("capture stuck changing filter, aborting");
            if let Err(e) = self.bus.call(Subsystem::Capture, names::ABORT, vec![]).await {
                warn!(error = %e, "capture abort failed");
            }
        }
    }
}

/// Load the sequence a job points at, when it is a local file.
async fn read_sequence(sequence: &str) -> Option<String> {
    let path = sequence.strip_prefix("file://").unwrap_or(sequence);
    if path.is_empty() || path.contains("://") {
        return None;
    }
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) => {
            warn!(%path, error = %e, "cannot read sequence file");
            None
        }
    }
}

async fn run_dispatch(
    router: Arc<StatusRouter>,
    hooks: Arc<dyn NodeHooks>,
    mut stream: SignalStream,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            signal = stream.recv() => match signal {
                Some(signal) => router.dispatch(signal, hooks.as_ref()).await,
                None => {
                    debug!("signal stream closed");
                    break;
                }
            },
            _ = stop.changed() => break,
        }
    }
}

async fn run_thermal(router: Arc<StatusRouter>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(router.config.thermal_period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = router.thermal_tick().await {
                    debug!(error = %e, "thermal tick skipped");
                }
            }
            _ = stop.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoHooks;
    use rigsync_bus::MemoryBus;
    use rigsync_state::Flag;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        records: StdMutex<Vec<StatusRecord>>,
    }

    #[async_trait::async_trait]
    impl NodeHooks for Recorder {
        async fn on_status(&self, record: StatusRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn router() -> (Arc<MemoryBus>, Arc<StatusRouter>) {
        let bus = Arc::new(MemoryBus::new());
        let router = Arc::new(StatusRouter::new(bus.clone(), RouterConfig::default()));
        (bus, router)
    }

    #[tokio::test]
    async fn dispatch_updates_state_and_flags() {
        let (bus, router) = router();
        bus.set_status(Subsystem::Guide, 12);
        router
            .dispatch(BusSignal::status(Subsystem::Guide, 12), &NoHooks)
            .await;
        assert_eq!(router.state().guide(), GuideStatus::Guiding);
        assert!(router.state().flag(Flag::Guiding));
    }

    #[tokio::test]
    async fn out_of_range_ordinal_is_unknown() {
        let (_bus, router) = router();
        router
            .dispatch(BusSignal::status(Subsystem::Mount, 42), &NoHooks)
            .await;
        assert_eq!(router.state().mount(), MountStatus::Unknown);
    }

    #[tokio::test]
    async fn records_carry_full_property_set() {
        let (bus, router) = router();
        bus.set_property(Subsystem::Mount, names::PARK_STATUS, json!(4));
        let hooks = Recorder::default();
        router
            .dispatch(BusSignal::status(Subsystem::Mount, 3), &hooks)
            .await;

        let records = hooks.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, Action::MountStatus);
        assert_eq!(records[0].status_ordinal(), Some(3));
        assert_eq!(records[0].properties.get(names::PARK_STATUS), Some(&json!(4)));
        assert_eq!(router.state().park(), ParkStatus::Unparked);
    }

    #[tokio::test]
    async fn align_record_includes_normalized_solution() {
        let (bus, router) = router();
        bus.set_return(
            Subsystem::Align,
            names::GET_SOLUTION_RESULT,
            json!([182.4, 150.0, -5.0]),
        );
        let hooks = Recorder::default();
        router
            .dispatch(BusSignal::status(Subsystem::Align, 1), &hooks)
            .await;

        let records = hooks.records.lock().unwrap();
        let solution = records[0].solution.expect("solution");
        assert!((solution.position_angle - 2.4).abs() < 1e-9);
        assert_eq!(router.last_solution(), Some(solution));
    }

    #[tokio::test]
    async fn scheduler_record_includes_active_job() {
        let (bus, router) = router();
        bus.set_property(Subsystem::Scheduler, names::CURRENT_JOB_NAME, json!("M31"));
        bus.set_property(
            Subsystem::Scheduler,
            names::CURRENT_JOB_JSON,
            json!(r#"{"name":"M31","targetRA":0.71,"targetDEC":41.27,"pa":12.0,"sequence":""}"#),
        );
        bus.set_return(Subsystem::Align, names::TELESCOPE_INFO, json!([1000.0, 200.0, 1.0]));
        let hooks = Recorder::default();
        router
            .dispatch(BusSignal::status(Subsystem::Scheduler, 2), &hooks)
            .await;

        let records = hooks.records.lock().unwrap();
        let job = records[0].job.as_ref().expect("job");
        assert_eq!(job.name, "M31");
        assert_eq!(job.focal_ratio, Some(5.0));
        assert!(router.state().flag(Flag::SchedulerRunning));
    }

    #[tokio::test]
    async fn scheduler_job_read_again_only_on_new_name() {
        let (bus, router) = router();
        bus.set_property(Subsystem::Scheduler, names::CURRENT_JOB_NAME, json!("M31"));
        bus.set_property(
            Subsystem::Scheduler,
            names::CURRENT_JOB_JSON,
            json!(r#"{"name":"M31"}"#),
        );
        assert!(router.refresh_scheduler_job().await.unwrap());
        assert!(!router.refresh_scheduler_job().await.unwrap());

        bus.set_property(Subsystem::Scheduler, names::CURRENT_JOB_NAME, json!(""));
        assert!(router.refresh_scheduler_job().await.unwrap());
        assert!(router.state().active_job().is_none());
    }

    #[tokio::test]
    async fn sequence_content_is_attached_from_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m31.esq");
        std::fs::write(&path, "<SequenceQueue/>").unwrap();

        let (bus, router) = router();
        bus.set_property(Subsystem::Scheduler, names::CURRENT_JOB_NAME, json!("M31"));
        bus.set_property(
            Subsystem::Scheduler,
            names::CURRENT_JOB_JSON,
            json!(format!(
                r#"{{"name":"M31","sequence":"file://{}"}}"#,
                path.display()
            )),
        );
        router.refresh_scheduler_job().await.unwrap();
        let state = router.state();
        let job = state.active_job().unwrap();
        assert_eq!(job.sequence_content.as_deref(), Some("<SequenceQueue/>"));
    }

    #[tokio::test]
    async fn subscribe_dispatches_initial_statuses_and_resolves_devices() {
        let (bus, router) = router();
        bus.set_status(Subsystem::Mount, 3);
        bus.set_status(Subsystem::Guide, 12);
        bus.set_status(Subsystem::Weather(1), 1);
        bus.set_property(Subsystem::Capture, names::CAMERA, json!("CCD"));
        bus.set_property(Subsystem::Capture, names::FILTER_WHEEL, json!(""));
        bus.set_return(Subsystem::Focus, names::FOCUSER, json!("FOC"));
        let hooks = Arc::new(Recorder::default());

        router.subscribe(hooks.clone()).await.unwrap();
        assert!(router.is_subscribed());
        assert_eq!(router.state().mount(), MountStatus::Tracking);
        assert_eq!(router.state().weather(), WeatherState::Ok);

        let devices = router.devices();
        assert_eq!(devices.camera.unwrap().name(), "CCD");
        assert_eq!(devices.focuser.unwrap().name(), "FOC");
        assert!(devices.filter_wheel.is_none());
        assert_eq!(devices.weather, Some(Subsystem::Weather(1)));

        // Second call is a no-op.
        let before = hooks.records.lock().unwrap().len();
        router.subscribe(hooks.clone()).await.unwrap();
        assert_eq!(hooks.records.lock().unwrap().len(), before);

        router.unsubscribe();
        assert!(!router.is_subscribed());
        assert_eq!(router.state().mount(), MountStatus::Idle);
    }

    #[tokio::test]
    async fn live_signals_reach_hooks_in_order() {
        let (bus, router) = router();
        let hooks = Arc::new(Recorder::default());
        router.subscribe(hooks.clone()).await.unwrap();
        hooks.records.lock().unwrap().clear();

        bus.emit_status(Subsystem::Capture, 2);
        bus.emit_status(Subsystem::Guide, 15);
        bus.emit_status(Subsystem::Focus, 5);

        let mut deadline = rigsync_state::Deadline::new(Duration::from_secs(2));
        let done = rigsync_state::poll_until(&mut deadline, Duration::from_millis(5), || {
            hooks.records.lock().unwrap().len() >= 3
        })
        .await;
        assert!(done);
        let actions: Vec<_> = hooks.records.lock().unwrap().iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![Action::CaptureStatus, Action::GuideStatus, Action::FocusStatus]
        );
        assert!(router.state().flag(Flag::Dithering));
        router.unsubscribe();
    }

    #[tokio::test]
    async fn parking_warms_a_cooling_camera() {
        let (bus, router) = router();
        bus.set_property(Subsystem::Capture, names::CAMERA, json!("CCD"));
        bus.set_device_switch("CCD", "CCD_COOLER", "COOLER_ON", true);
        bus.set_device_number("CCD", "CCD_TEMPERATURE", "CCD_TEMPERATURE_VALUE", -10.0);
        router.subscribe(Arc::new(NoHooks)).await.unwrap();

        router
            .dispatch(BusSignal::status(Subsystem::Mount, 4), &NoHooks)
            .await;
        assert!(router.is_warming().await);
        let camera = Camera::new(bus.clone(), "CCD");
        assert_eq!(camera.temperature().await.unwrap(), -8.0);
        router.unsubscribe();
    }

    #[tokio::test]
    async fn follower_config_ignores_local_thermal_policy() {
        let bus = Arc::new(MemoryBus::new());
        let router = Arc::new(StatusRouter::new(
            bus.clone(),
            RouterConfig::default().with_local_thermal_policy(false),
        ));
        bus.set_property(Subsystem::Capture, names::CAMERA, json!("CCD"));
        bus.set_device_switch("CCD", "CCD_COOLER", "COOLER_ON", true);
        bus.set_device_number("CCD", "CCD_TEMPERATURE", "CCD_TEMPERATURE_VALUE", -10.0);
        router.subscribe(Arc::new(NoHooks)).await.unwrap();

        router
            .dispatch(BusSignal::status(Subsystem::Mount, 4), &NoHooks)
            .await;
        assert!(!router.is_warming().await);
        router.unsubscribe();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_aborts_long_filter_change() {
        let (bus, router) = router();
        router
            .dispatch(BusSignal::status(Subsystem::Capture, 12), &NoHooks)
            .await;
        router.watchdog().await;
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 0);

        tokio::time::advance(FILTER_CHANGE_LIMIT + Duration::from_secs(1)).await;
        router.watchdog().await;
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 1);
    }

    #[test]
    fn suspend_and_resume_toggle() {
        let (_bus, router) = router();
        assert!(!router.is_suspended());
        router.suspend();
        assert!(router.is_suspended());
        router.resume();
        assert!(!router.is_suspended());
    }
}
