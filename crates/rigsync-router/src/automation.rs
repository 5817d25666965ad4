//! Automation operations on the local rig.
//!
//! Every wait here is a [`Deadline`] plus a short sleep. Waits observe
//! [`RouterEvent`]s or the snapshot flags; none holds the state lock
//! across an await.

use std::path::Path;
use std::time::Duration;

use rigsync_bus::{FilterWheel, Subsystem, names};
use rigsync_state::{
    AlignmentSolution, CaptureSnapshot, Deadline, Flag, FocusState, MountStatus, ParkStatus,
    PropertyState, pa_in_range, poll_until,
};
use serde_json::{Value, json};
use tokio::sync::broadcast::{Receiver, error::TryRecvError};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::{RouterError, RouterResult};
use crate::router::{RouterEvent, StatusRouter, lock};

pub const SOLVE_TIMEOUT: Duration = Duration::from_secs(20);
pub const FILTER_TIMEOUT: Duration = Duration::from_secs(20);
pub const FOCUS_START_TIMEOUT: Duration = Duration::from_secs(5);
pub const FOCUS_RUN_TIMEOUT: Duration = Duration::from_secs(300);
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(120);

/// Framing is accepted within this many degrees of the target PA.
pub const PA_TOLERANCE: f64 = 2.0;

const POLL: Duration = Duration::from_millis(100);
const FOCUS_RESTART_PAUSE: Duration = Duration::from_secs(1);

/// `false` is the only refusal; drivers that return nothing accepted.
fn accepted(value: &Value) -> bool {
    !matches!(value, Value::Bool(false))
}

/// Next event from the router, skipping over lag.
fn next_event(events: &mut Receiver<RouterEvent>) -> Option<RouterEvent> {
    loop {
        match events.try_recv() {
            Ok(event) => return Some(event),
            Err(TryRecvError::Lagged(skipped)) => debug!(skipped, "router events lagged"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
        }
    }
}

impl StatusRouter {
    // ── Plate solve ────────────────────────────────────────────────

    /// Capture and solve one frame. Returns whether the attempt failed.
    ///
    /// With `auto_sync`, each solution is pushed back as the mount target.
    pub async fn plate_solve(&self, auto_sync: bool) -> RouterResult<bool> {
        let mut events = self.events();
        let started = self
            .bus
            .call(Subsystem::Align, names::CAPTURE_AND_SOLVE, vec![])
            .await?;
        if !accepted(&started) {
            warn!("capture and solve refused");
            return Ok(true);
        }

        let rotator = self.devices().rotator;
        let mut deadline = Deadline::labeled(SOLVE_TIMEOUT, "plate solve");
        loop {
            while let Some(event) = next_event(&mut events) {
                match event {
                    RouterEvent::Align(status) if status.is_finished() => {
                        let failed = status != rigsync_state::AlignState::Complete;
                        info!(?status, failed, "plate solve finished");
                        return Ok(failed);
                    }
                    RouterEvent::Align(status) if status.is_active() => deadline.reset(),
                    RouterEvent::Solution(solution) => {
                        deadline.reset();
                        if auto_sync {
                            self.sync_to(solution).await;
                        }
                    }
                    _ => {}
                }
            }
            if let Some(rotator) = &rotator {
                if rotator.is_moving().await {
                    deadline.reset();
                }
            }
            if deadline.elapsed() {
                warn!("plate solve timed out");
                return Ok(true);
            }
            sleep(POLL).await;
        }
    }

    async fn sync_to(&self, solution: AlignmentSolution) {
        let args = vec![json!(solution.ra_hours()), json!(solution.dec)];
        match self
            .bus
            .call(Subsystem::Align, names::SET_TARGET_COORDS, args)
            .await
        {
            Ok(_) => debug!(ra = solution.ra, dec = solution.dec, "mount target synced to solution"),
            Err(e) => warn!(error = %e, "failed to sync mount target"),
        }
    }

    // ── Autofocus ──────────────────────────────────────────────────

    /// Whether autofocus can run on this rig.
    pub async fn can_autofocus(&self) -> bool {
        match self.devices().focuser {
            Some(focuser) => focuser.is_absolute().await,
            None => false,
        }
    }

    /// Run one autofocus, optionally on `filter_slot` first.
    ///
    /// Returns the focuser position when the run completed, `None` when it
    /// did not start, failed or timed out.
    pub async fn run_autofocus(&self, filter_slot: Option<i64>) -> RouterResult<Option<i64>> {
        let devices = self.devices();
        let focuser = devices.focuser.ok_or(RouterError::DeviceMissing("focuser"))?;
        if let Some(slot) = filter_slot {
            let wheel = devices
                .filter_wheel
                .ok_or(RouterError::DeviceMissing("filter wheel"))?;
            if !select_filter(&wheel, slot).await? {
                warn!(slot, "filter wheel did not settle");
                return Ok(None);
            }
        }

        let train = vec![json!(devices.optical_train)];
        self.bus
            .call(Subsystem::Focus, names::ABORT, train.clone())
            .await?;
        sleep(FOCUS_RESTART_PAUSE).await;

        let mut events = self.events();
        self.bus.call(Subsystem::Focus, names::START, train.clone()).await?;

        let mut start_deadline = Deadline::labeled(FOCUS_START_TIMEOUT, "autofocus start");
        let mut run_deadline = Deadline::labeled(FOCUS_RUN_TIMEOUT, "autofocus run");
        let mut running = false;
        let outcome = 'wait: loop {
            while let Some(event) = next_event(&mut events) {
                let RouterEvent::Focus(status) = event else {
                    continue;
                };
                if status.is_finished() {
                    break 'wait Some(status);
                }
                if status.is_running() && !running {
                    running = true;
                    run_deadline.reset();
                }
            }
            if !running && start_deadline.elapsed() {
                warn!("autofocus did not start");
                break None;
            }
            if running && run_deadline.elapsed() {
                warn!("autofocus did not finish, aborting");
                if let Err(e) = self.bus.call(Subsystem::Focus, names::ABORT, train.clone()).await {
                    warn!(error = %e, "focus abort failed");
                }
                break None;
            }
            sleep(POLL).await;
        };

        match outcome {
            Some(FocusState::Complete) => {
                let position = focuser.position().await?;
                info!(position, filter_slot, "autofocus complete");
                Ok(Some(position))
            }
            Some(status) => {
                warn!(?status, "autofocus unsuccessful");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    // ── Position-angle alignment ───────────────────────────────────

    /// Slew to `target` and frame it at its position angle.
    ///
    /// Solves once with a slew-to-target action so the rotator reaches the
    /// target angle, then once more syncing the mount. Returns whether both
    /// solves succeeded.
    pub async fn execute_pa_alignment(
        &self,
        target: AlignmentSolution,
        auto_sync: bool,
    ) -> RouterResult<bool> {
        info!(
            pa = target.position_angle,
            ra = target.ra,
            dec = target.dec,
            "aligning to target"
        );
        if !self.ensure_unparked().await? {
            return Ok(false);
        }

        let coords = vec![json!(target.ra_hours()), json!(target.dec)];
        self.bus
            .call(Subsystem::Mount, names::SLEW, coords.clone())
            .await?;
        if !self.wait_tracking().await {
            warn!("mount did not reach target");
            return Ok(false);
        }

        self.bus
            .call(
                Subsystem::Align,
                names::SET_TARGET_POSITION_ANGLE,
                vec![json!(target.position_angle)],
            )
            .await?;
        self.bus
            .call(Subsystem::Align, names::SET_TARGET_COORDS, coords)
            .await?;
        self.set_solver_action(names::SOLVER_ACTION_SLEW).await?;
        if self.plate_solve(false).await? {
            return Ok(false);
        }

        self.set_solver_action(names::SOLVER_ACTION_SYNC).await?;
        Ok(!self.plate_solve(auto_sync).await?)
    }

    /// Whether the last solution frames `target_pa` within `tolerance`.
    pub fn pa_in_range(&self, target_pa: f64, tolerance: f64) -> bool {
        self.last_solution()
            .is_some_and(|solution| pa_in_range(solution.position_angle, target_pa, tolerance))
    }

    async fn set_solver_action(&self, action: i64) -> RouterResult<()> {
        self.bus
            .call(Subsystem::Align, names::SET_SOLVER_ACTION, vec![json!(action)])
            .await?;
        Ok(())
    }

    async fn ensure_unparked(&self) -> RouterResult<bool> {
        let parked = |router: &StatusRouter| {
            let state = router.state();
            matches!(state.park(), ParkStatus::Parked | ParkStatus::Parking)
                || matches!(state.mount(), MountStatus::Parked | MountStatus::Parking)
        };
        if !parked(self) {
            return Ok(true);
        }
        info!("unparking mount");
        self.bus.call(Subsystem::Mount, names::UNPARK, vec![]).await?;
        let mut deadline = Deadline::labeled(MOUNT_TIMEOUT, "mount unpark");
        Ok(poll_until(&mut deadline, POLL * 5, || !parked(self)).await)
    }

    async fn wait_tracking(&self) -> bool {
        // Let the slew begin before trusting the status.
        sleep(Duration::from_secs(1)).await;
        let mut deadline = Deadline::labeled(MOUNT_TIMEOUT, "mount slew");
        poll_until(&mut deadline, POLL * 5, || {
            self.state().mount() == MountStatus::Tracking
        })
        .await
    }

    // ── Capture ────────────────────────────────────────────────────

    /// Start the capture queue. Returns whether capture reported running.
    pub async fn start_capture(&self) -> RouterResult<bool> {
        info!("starting capture");
        self.bus.call(Subsystem::Capture, names::START, vec![]).await?;
        let mut deadline = Deadline::labeled(CAPTURE_TIMEOUT, "capture start");
        Ok(poll_until(&mut deadline, POLL, || self.state().flag(Flag::Capturing)).await)
    }

    /// Abort capture. Returns whether capture reported stopped.
    pub async fn stop_capture(&self) -> RouterResult<bool> {
        info!("stopping capture");
        self.bus.call(Subsystem::Capture, names::ABORT, vec![]).await?;
        let mut deadline = Deadline::labeled(CAPTURE_TIMEOUT, "capture stop");
        Ok(poll_until(&mut deadline, POLL, || !self.state().flag(Flag::Capturing)).await)
    }

    /// Abort whatever focus, align and capture activity is running.
    pub async fn stop_all(&self) {
        let (focusing, aligning, capturing) = {
            let state = self.state();
            (
                state.flag(Flag::Focusing),
                state.align().is_active(),
                state.flag(Flag::Capturing),
            )
        };
        let train = vec![json!(self.devices().optical_train)];
        let calls = [
            (focusing, Subsystem::Focus, train),
            (aligning, Subsystem::Align, vec![]),
            (capturing, Subsystem::Capture, vec![]),
        ];
        for (active, subsystem, args) in calls {
            if !active {
                continue;
            }
            info!(%subsystem, "aborting");
            if let Err(e) = self.bus.call(subsystem, names::ABORT, args).await {
                warn!(%subsystem, error = %e, "abort failed");
            }
        }
    }

    /// Whether any local focus, align or capture activity is running.
    pub fn is_active(&self) -> bool {
        let state = self.state();
        state.flag(Flag::Focusing) || state.flag(Flag::Capturing) || state.align().is_active()
    }

    /// Progress of the active capture job, `None` when no job is active.
    pub async fn capture_snapshot(&self) -> RouterResult<Option<CaptureSnapshot>> {
        let job_id = self
            .bus
            .call_i64(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, vec![])
            .await?;
        if job_id < 0 {
            return Ok(None);
        }
        let id = vec![json!(job_id)];
        let duration = self
            .bus
            .call_f64(Subsystem::Capture, names::GET_JOB_EXPOSURE_DURATION, id.clone())
            .await?;
        let time_left = self
            .bus
            .call_f64(Subsystem::Capture, names::GET_JOB_EXPOSURE_PROGRESS, id.clone())
            .await?;
        let count = self
            .bus
            .call_i64(Subsystem::Capture, names::GET_JOB_IMAGE_COUNT, id.clone())
            .await
            .ok();
        let progress = self
            .bus
            .call_i64(Subsystem::Capture, names::GET_JOB_IMAGE_PROGRESS, id)
            .await
            .ok();

        {
            let mut run = lock(&self.capture_run);
            if run.job_id != Some(job_id) {
                run.job_id = Some(job_id);
                run.frame_started = Some(Instant::now());
            }
        }
        Ok(Some(
            CaptureSnapshot::new(job_id, duration, time_left).with_images(count, progress),
        ))
    }

    /// How long the current frame has been running.
    pub fn frame_running_for(&self) -> Option<Duration> {
        lock(&self.capture_run).frame_started.map(|t| t.elapsed())
    }

    pub async fn pending_job_count(&self) -> RouterResult<i64> {
        Ok(self
            .bus
            .call_i64(Subsystem::Capture, names::GET_PENDING_JOB_COUNT, vec![])
            .await?)
    }

    /// Replace the capture queue with the sequence at `path`.
    pub async fn load_sequence(&self, path: &Path) -> RouterResult<bool> {
        self.bus
            .call(Subsystem::Capture, names::CLEAR_SEQUENCE_QUEUE, vec![])
            .await?;
        let loaded = self
            .bus
            .call(
                Subsystem::Capture,
                names::LOAD_SEQUENCE_QUEUE,
                vec![json!(path.display().to_string())],
            )
            .await?;
        let ok = accepted(&loaded);
        info!(path = %path.display(), ok, "sequence loaded");
        Ok(ok)
    }

    /// Name the local capture module files frames under.
    pub async fn set_capture_target(&self, name: &str) -> RouterResult<()> {
        self.bus
            .write(Subsystem::Capture, names::TARGET_NAME, json!(name))
            .await?;
        debug!(target = name, "capture target set");
        Ok(())
    }

    // ── Scheduler ──────────────────────────────────────────────────

    pub async fn load_schedule(&self, path: &Path) -> RouterResult<bool> {
        let loaded = self
            .bus
            .call(
                Subsystem::Scheduler,
                names::LOAD_SCHEDULER,
                vec![json!(path.display().to_string())],
            )
            .await?;
        let ok = accepted(&loaded);
        info!(path = %path.display(), ok, "schedule loaded");
        Ok(ok)
    }

    pub async fn start_scheduler(&self) -> RouterResult<()> {
        info!("starting scheduler");
        self.bus.call(Subsystem::Scheduler, names::START, vec![]).await?;
        Ok(())
    }

    pub async fn stop_scheduler(&self) -> RouterResult<()> {
        info!("stopping scheduler");
        self.bus.call(Subsystem::Scheduler, names::STOP, vec![]).await?;
        Ok(())
    }

    // ── Mount and align target ─────────────────────────────────────

    /// Abort any motion and park, unless the mount is parked or parking.
    pub async fn park_mount(&self) -> RouterResult<()> {
        let mount = self.state().mount();
        if matches!(mount, MountStatus::Parking | MountStatus::Parked) {
            return Ok(());
        }
        info!(?mount, "parking mount");
        self.bus.call(Subsystem::Mount, names::ABORT, vec![]).await?;
        self.bus.call(Subsystem::Mount, names::PARK, vec![]).await?;
        Ok(())
    }

    /// Coordinates the align module solves for, RA in hours.
    pub async fn align_target_coords(&self) -> RouterResult<Option<(f64, f64)>> {
        let coords = self
            .bus
            .call_f64_list(Subsystem::Align, names::GET_TARGET_COORDS, vec![])
            .await?;
        Ok(match coords.as_slice() {
            [ra, dec, ..] => Some((*ra, *dec)),
            _ => None,
        })
    }

    pub async fn set_align_target_coords(&self, ra_hours: f64, dec: f64) -> RouterResult<()> {
        self.bus
            .call(
                Subsystem::Align,
                names::SET_TARGET_COORDS,
                vec![json!(ra_hours), json!(dec)],
            )
            .await?;
        Ok(())
    }
}

/// Move the wheel to `slot` and wait for it to settle there.
async fn select_filter(wheel: &FilterWheel, slot: i64) -> RouterResult<bool> {
    wheel.set_slot(slot).await?;
    let mut deadline = Deadline::labeled(FILTER_TIMEOUT, "filter wheel");
    loop {
        let settled = wheel.slot_state().await? == PropertyState::Ok;
        if settled && wheel.slot().await? == slot {
            return Ok(true);
        }
        if deadline.elapsed() {
            return Ok(false);
        }
        sleep(POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rigsync_bus::{BusSignal, MemoryBus};
    use rigsync_state::AlignState;

    use super::*;
    use crate::config::RouterConfig;
    use crate::hooks::NoHooks;

    async fn subscribed() -> (Arc<MemoryBus>, Arc<StatusRouter>) {
        let bus = Arc::new(MemoryBus::new());
        bus.set_return(Subsystem::Focus, names::FOCUSER, json!("FOC"));
        bus.set_property(Subsystem::Capture, names::FILTER_WHEEL, json!("FW"));
        bus.set_device_number("FOC", "ABS_FOCUS_POSITION", "FOCUS_ABSOLUTE_POSITION", 1000.0);
        bus.set_device_number("FW", "FILTER_SLOT", "FILTER_SLOT_VALUE", 1.0);
        let router = Arc::new(StatusRouter::new(bus.clone(), RouterConfig::default()));
        router.subscribe(Arc::new(NoHooks)).await.unwrap();
        (bus, router)
    }

    /// Focus start runs to completion and leaves the focuser at `position`.
    fn script_focus(bus: &MemoryBus, position: f64) {
        bus.on_call(Subsystem::Focus, names::START, move |bus, _| {
            bus.set_device_number("FOC", "ABS_FOCUS_POSITION", "FOCUS_ABSOLUTE_POSITION", position);
            bus.emit_status(Subsystem::Focus, FocusState::Progress.ordinal().unwrap());
            bus.emit_status(Subsystem::Focus, FocusState::Complete.ordinal().unwrap());
            Ok(json!(true))
        });
    }

    #[tokio::test(start_paused = true)]
    async fn plate_solve_reports_completion() {
        let (bus, router) = subscribed().await;
        bus.on_call(Subsystem::Align, names::CAPTURE_AND_SOLVE, |bus, _| {
            bus.emit_status(Subsystem::Align, AlignState::Progress.ordinal().unwrap());
            bus.emit_status(Subsystem::Align, AlignState::Complete.ordinal().unwrap());
            Ok(json!(true))
        });
        assert!(!router.plate_solve(false).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn plate_solve_failure_and_timeout_report_failed() {
        let (bus, router) = subscribed().await;
        bus.on_call(Subsystem::Align, names::CAPTURE_AND_SOLVE, |bus, _| {
            bus.emit_status(Subsystem::Align, AlignState::Failed.ordinal().unwrap());
            Ok(json!(true))
        });
        assert!(router.plate_solve(false).await.unwrap());

        bus.set_return(Subsystem::Align, names::CAPTURE_AND_SOLVE, json!(true));
        let started = Instant::now();
        assert!(router.plate_solve(false).await.unwrap());
        assert!(started.elapsed() >= SOLVE_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_sync_pushes_solution_coordinates() {
        let (bus, router) = subscribed().await;
        bus.set_return(
            Subsystem::Align,
            names::GET_SOLUTION_RESULT,
            json!([10.0, 150.0, -5.0]),
        );
        bus.on_call(Subsystem::Align, names::CAPTURE_AND_SOLVE, |bus, _| {
            bus.set_status(Subsystem::Align, AlignState::Complete.ordinal().unwrap());
            bus.emit(BusSignal {
                subsystem: Subsystem::Align,
                kind: rigsync_bus::SignalKind::NewSolution,
            });
            Ok(json!(true))
        });
        assert!(!router.plate_solve(true).await.unwrap());

        let synced = bus.calls_to(Subsystem::Align, names::SET_TARGET_COORDS);
        assert_eq!(synced, vec![vec![json!(10.0), json!(-5.0)]]);
    }

    #[tokio::test(start_paused = true)]
    async fn autofocus_returns_final_position() {
        let (bus, router) = subscribed().await;
        script_focus(&bus, 1234.0);
        assert_eq!(router.run_autofocus(None).await.unwrap(), Some(1234));
        assert_eq!(bus.call_count(Subsystem::Focus, names::ABORT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn autofocus_that_never_starts_gives_none() {
        let (_bus, router) = subscribed().await;
        assert_eq!(router.run_autofocus(None).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn autofocus_selects_filter_first() {
        let (bus, router) = subscribed().await;
        script_focus(&bus, 900.0);
        assert_eq!(router.run_autofocus(Some(3)).await.unwrap(), Some(900));
        assert_eq!(
            bus.device_value("FW", "FILTER_SLOT", "FILTER_SLOT_VALUE"),
            Some(json!(3.0))
        );
    }

    #[tokio::test]
    async fn autofocus_without_focuser_is_an_error() {
        let bus = Arc::new(MemoryBus::new());
        let router = StatusRouter::new(bus, RouterConfig::default());
        assert!(matches!(
            router.run_autofocus(None).await,
            Err(RouterError::DeviceMissing("focuser"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn capture_start_waits_for_capturing() {
        let (bus, router) = subscribed().await;
        bus.on_call(Subsystem::Capture, names::START, |bus, _| {
            bus.emit_status(Subsystem::Capture, 2);
            Ok(json!(true))
        });
        assert!(router.start_capture().await.unwrap());

        bus.set_return(Subsystem::Capture, names::ABORT, json!(true));
        // Nothing reports the abort, so the wait expires.
        assert!(!router.stop_capture().await.unwrap());
    }

    #[tokio::test]
    async fn capture_snapshot_reads_job_progress() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_return(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, json!(4));
        bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_DURATION, json!(300.0));
        bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_PROGRESS, json!(120.0));
        let router = StatusRouter::new(bus.clone(), RouterConfig::default());

        let snapshot = router.capture_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.job_id, 4);
        assert_eq!(snapshot.exposure, 180.0);
        assert!(snapshot.abortable_for_dither());
        assert!(router.frame_running_for().is_some());

        bus.set_return(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, json!(-1));
        assert!(router.capture_snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_all_aborts_only_active_subsystems() {
        let bus = Arc::new(MemoryBus::new());
        let router = StatusRouter::new(bus.clone(), RouterConfig::default());
        router
            .dispatch(BusSignal::status(Subsystem::Capture, 2), &NoHooks)
            .await;
        router.stop_all().await;
        assert_eq!(bus.call_count(Subsystem::Capture, names::ABORT), 1);
        assert_eq!(bus.call_count(Subsystem::Focus, names::ABORT), 0);
        assert_eq!(bus.call_count(Subsystem::Align, names::ABORT), 0);
    }

    #[tokio::test]
    async fn parking_skips_a_parked_mount() {
        let bus = Arc::new(MemoryBus::new());
        let router = StatusRouter::new(bus.clone(), RouterConfig::default());
        router.state().apply_mount(MountStatus::Tracking);
        router.park_mount().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Mount, names::ABORT), 1);
        assert_eq!(bus.call_count(Subsystem::Mount, names::PARK), 1);

        router.state().apply_mount(MountStatus::Parking);
        router.park_mount().await.unwrap();
        assert_eq!(bus.call_count(Subsystem::Mount, names::PARK), 1);
    }

    #[tokio::test]
    async fn align_target_coords_need_two_values() {
        let bus = Arc::new(MemoryBus::new());
        let router = StatusRouter::new(bus.clone(), RouterConfig::default());
        bus.set_return(Subsystem::Align, names::GET_TARGET_COORDS, json!([0.712, 41.27]));
        assert_eq!(router.align_target_coords().await.unwrap(), Some((0.712, 41.27)));
        bus.set_return(Subsystem::Align, names::GET_TARGET_COORDS, json!([]));
        assert_eq!(router.align_target_coords().await.unwrap(), None);
    }

    #[tokio::test]
    async fn capture_target_is_written_to_the_capture_module() {
        let bus = Arc::new(MemoryBus::new());
        let router = StatusRouter::new(bus.clone(), RouterConfig::default());
        router.set_capture_target("M 31_client").await.unwrap();
        assert_eq!(
            bus.property(Subsystem::Capture, names::TARGET_NAME),
            Some(json!("M 31_client"))
        );
    }

    #[tokio::test]
    async fn pa_in_range_uses_last_solution() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_return(
            Subsystem::Align,
            names::GET_SOLUTION_RESULT,
            json!([179.0, 10.0, 20.0]),
        );
        let router = StatusRouter::new(bus, RouterConfig::default());
        assert!(!router.pa_in_range(0.0, PA_TOLERANCE));
        router
            .dispatch(BusSignal::status(Subsystem::Align, 1), &NoHooks)
            .await;
        assert!(router.pa_in_range(0.5, PA_TOLERANCE));
        assert!(!router.pa_in_range(5.0, PA_TOLERANCE));
    }

    #[tokio::test(start_paused = true)]
    async fn pa_alignment_slews_rotates_and_syncs() {
        let (bus, router) = subscribed().await;
        bus.on_call(Subsystem::Mount, names::SLEW, |bus, _| {
            bus.emit_status(Subsystem::Mount, MountStatus::Tracking.ordinal().unwrap());
            Ok(json!(true))
        });
        bus.set_return(
            Subsystem::Align,
            names::GET_SOLUTION_RESULT,
            json!([45.5, 150.0, 20.0]),
        );
        bus.on_call(Subsystem::Align, names::CAPTURE_AND_SOLVE, |bus, _| {
            bus.emit_status(Subsystem::Align, AlignState::Complete.ordinal().unwrap());
            Ok(json!(true))
        });

        let target = AlignmentSolution::new(45.0, 150.0, 20.0);
        assert!(router.execute_pa_alignment(target, false).await.unwrap());
        assert!(router.pa_in_range(45.0, PA_TOLERANCE));

        let actions = bus.calls_to(Subsystem::Align, names::SET_SOLVER_ACTION);
        assert_eq!(
            actions,
            vec![
                vec![json!(names::SOLVER_ACTION_SLEW)],
                vec![json!(names::SOLVER_ACTION_SYNC)]
            ]
        );
        assert_eq!(
            bus.calls_to(Subsystem::Mount, names::SLEW),
            vec![vec![json!(10.0), json!(20.0)]]
        );
    }
}
