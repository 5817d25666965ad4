//! The per-node observatory snapshot.
//!
//! `ObservatoryState` is mutated only through its `apply_*` entry points,
//! one per subsystem. Each entry point stores the new status and recomputes
//! the derived flags owned by that subsystem, so a flag is always a function
//! of the last status applied.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::flag::EdgeFlag;
use crate::job::ScheduleJob;
use crate::record::{Action, StatusRecord};
use crate::status::*;

/// Derived flags tracked with edge detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Capturing,
    CapturePaused,
    Focusing,
    Guiding,
    Dithering,
    TrackingMount,
    SchedulerRunning,
}

#[derive(Debug, Clone, Default)]
pub struct ObservatoryState {
    mount: MountStatus,
    park: ParkStatus,
    meridian_flip: MeridianFlipStatus,
    guide: GuideStatus,
    capture: CaptureStatus,
    focus: FocusState,
    align: AlignState,
    scheduler: SchedulerState,
    weather: WeatherState,
    dome: DomeState,
    capture_target: String,
    active_job: Option<ScheduleJob>,

    capturing: EdgeFlag,
    capture_paused: EdgeFlag,
    focusing: EdgeFlag,
    guiding: EdgeFlag,
    dithering: EdgeFlag,
    tracking_mount: EdgeFlag,
    scheduler_running: EdgeFlag,
}

impl ObservatoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to idle defaults, as after a bus reconnect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ── Entry points ───────────────────────────────────────────────

    pub fn apply_mount(&mut self, status: MountStatus) -> bool {
        let changed = std::mem::replace(&mut self.mount, status) != status;
        self.tracking_mount.set(status == MountStatus::Tracking);
        changed
    }

    pub fn apply_park(&mut self, status: ParkStatus) -> bool {
        std::mem::replace(&mut self.park, status) != status
    }

    pub fn apply_meridian_flip(&mut self, status: MeridianFlipStatus) -> bool {
        std::mem::replace(&mut self.meridian_flip, status) != status
    }

    pub fn apply_guide(&mut self, status: GuideStatus) -> bool {
        use GuideStatus::*;
        let changed = std::mem::replace(&mut self.guide, status) != status;
        self.guiding.set(matches!(
            status,
            Guiding
                | Dithering
                | ManualDithering
                | DitheringSettle
                | DitheringSuccess
                | DitheringError
                | Reacquire
        ));
        self.dithering
            .set(matches!(status, Dithering | ManualDithering | DitheringSettle));
        changed
    }

    pub fn apply_capture(&mut self, status: CaptureStatus) -> bool {
        use CaptureStatus::*;
        let changed = std::mem::replace(&mut self.capture, status) != status;
        self.capturing.set(!matches!(
            status,
            Idle | Aborted | Suspended | Complete | Unknown
        ));
        self.capture_paused.set(status == Paused);
        changed
    }

    pub fn apply_focus(&mut self, status: FocusState) -> bool {
        let changed = std::mem::replace(&mut self.focus, status) != status;
        self.focusing.set(status.is_running());
        changed
    }

    pub fn apply_align(&mut self, status: AlignState) -> bool {
        std::mem::replace(&mut self.align, status) != status
    }

    pub fn apply_scheduler(&mut self, status: SchedulerState) -> bool {
        let changed = std::mem::replace(&mut self.scheduler, status) != status;
        self.scheduler_running.set(status == SchedulerState::Running);
        changed
    }

    pub fn apply_weather(&mut self, status: WeatherState) -> bool {
        std::mem::replace(&mut self.weather, status) != status
    }

    pub fn apply_dome(&mut self, status: DomeState) -> bool {
        std::mem::replace(&mut self.dome, status) != status
    }

    pub fn set_capture_target(&mut self, name: impl Into<String>) {
        self.capture_target = name.into();
    }

    /// Replace the active job. Returns whether the job identity changed.
    pub fn set_active_job(&mut self, job: Option<ScheduleJob>) -> bool {
        let changed = match (&self.active_job, &job) {
            (Some(a), Some(b)) => !a.same_identity(b),
            (None, None) => false,
            _ => true,
        };
        self.active_job = job;
        changed
    }

    /// Apply a replicated record to this (mirrored) snapshot.
    ///
    /// Returns whether the subsystem status changed. A missing or
    /// malformed `status` property degrades to `Unknown`.
    pub fn apply_record(&mut self, record: &StatusRecord) -> bool {
        let ordinal = record.status_ordinal().unwrap_or(-1);
        match record.action {
            Action::MountStatus => {
                if let Some(park) = record.properties.get("parkStatus") {
                    self.apply_park(ParkStatus::from_value(park));
                }
                self.apply_mount(MountStatus::from_ordinal(ordinal))
            }
            Action::GuideStatus => self.apply_guide(GuideStatus::from_ordinal(ordinal)),
            Action::CaptureStatus => {
                if let Some(target) = record
                    .target_name
                    .as_deref()
                    .or_else(|| record.property_str("targetName"))
                {
                    self.set_capture_target(target);
                }
                self.apply_capture(CaptureStatus::from_ordinal(ordinal))
            }
            Action::FocusStatus => self.apply_focus(FocusState::from_ordinal(ordinal)),
            Action::SchedulerStatus => {
                self.set_active_job(record.job.clone());
                self.apply_scheduler(SchedulerState::from_ordinal(ordinal))
            }
            Action::AlignStatus => self.apply_align(AlignState::from_ordinal(ordinal)),
            Action::WeatherStatus => self.apply_weather(WeatherState::from_ordinal(ordinal)),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn mount(&self) -> MountStatus {
        self.mount
    }
    pub fn park(&self) -> ParkStatus {
        self.park
    }
    pub fn meridian_flip(&self) -> MeridianFlipStatus {
        self.meridian_flip
    }
    pub fn guide(&self) -> GuideStatus {
        self.guide
    }
    pub fn capture(&self) -> CaptureStatus {
        self.capture
    }
    pub fn focus(&self) -> FocusState {
        self.focus
    }
    pub fn align(&self) -> AlignState {
        self.align
    }
    pub fn scheduler(&self) -> SchedulerState {
        self.scheduler
    }
    pub fn weather(&self) -> WeatherState {
        self.weather
    }
    pub fn dome(&self) -> DomeState {
        self.dome
    }
    pub fn capture_target(&self) -> &str {
        &self.capture_target
    }
    pub fn active_job(&self) -> Option<&ScheduleJob> {
        self.active_job.as_ref()
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.cell(flag).get()
    }

    /// Whether a derived flag changed value less than `window` ago.
    pub fn flag_changed_within(&self, flag: Flag, window: Duration) -> bool {
        self.cell(flag).changed_within(window)
    }

    /// Consume the pending change of a derived flag.
    pub fn take_change(&mut self, flag: Flag) -> bool {
        self.cell_mut(flag).take_change()
    }

    fn cell(&self, flag: Flag) -> &EdgeFlag {
        match flag {
            Flag::Capturing => &self.capturing,
            Flag::CapturePaused => &self.capture_paused,
            Flag::Focusing => &self.focusing,
            Flag::Guiding => &self.guiding,
            Flag::Dithering => &self.dithering,
            Flag::TrackingMount => &self.tracking_mount,
            Flag::SchedulerRunning => &self.scheduler_running,
        }
    }

    fn cell_mut(&mut self, flag: Flag) -> &mut EdgeFlag {
        match flag {
            Flag::Capturing => &mut self.capturing,
            Flag::CapturePaused => &mut self.capture_paused,
            Flag::Focusing => &mut self.focusing,
            Flag::Guiding => &mut self.guiding,
            Flag::Dithering => &mut self.dithering,
            Flag::TrackingMount => &mut self.tracking_mount,
            Flag::SchedulerRunning => &mut self.scheduler_running,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            mount: self.mount,
            park: self.park,
            meridian_flip: self.meridian_flip,
            guide: self.guide,
            capture: self.capture,
            focus: self.focus,
            align: self.align,
            scheduler: self.scheduler,
            weather: self.weather,
            dome: self.dome,
            capture_target: self.capture_target.clone(),
            active_job: self.active_job.clone(),
            capturing: self.capturing.get(),
            focusing: self.focusing.get(),
            guiding: self.guiding.get(),
            dithering: self.dithering.get(),
            tracking_mount: self.tracking_mount.get(),
            scheduler_running: self.scheduler_running.get(),
        }
    }
}

/// Serializable point-in-time view of an [`ObservatoryState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub mount: MountStatus,
    pub park: ParkStatus,
    pub meridian_flip: MeridianFlipStatus,
    pub guide: GuideStatus,
    pub capture: CaptureStatus,
    pub focus: FocusState,
    pub align: AlignState,
    pub scheduler: SchedulerState,
    pub weather: WeatherState,
    pub dome: DomeState,
    pub capture_target: String,
    pub active_job: Option<ScheduleJob>,
    pub capturing: bool,
    pub focusing: bool,
    pub guiding: bool,
    pub dithering: bool,
    pub tracking_mount: bool,
    pub scheduler_running: bool,
}
