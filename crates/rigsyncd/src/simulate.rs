//! Simulated observatory for running a node without the real application.
//!
//! The in-memory bus answers the commands the cluster roles issue the way a
//! cooperative rig would: slews end tracking, solves complete at once,
//! captures and schedulers start and stop on request.

use std::sync::Arc;

use async_trait::async_trait;
use rigsync_bus::{MemoryBus, Subsystem, names};
use rigsync_router::ProcessControl;
use rigsync_state::{
    AlignState, CaptureStatus, FocusState, GuideStatus, MountStatus, SchedulerState, WeatherState,
};
use serde_json::json;
use tracing::info;

const CAMERA: &str = "CCD Simulator";
const AMBIENT_TEMP: f64 = 12.0;

fn set(bus: &MemoryBus, subsystem: Subsystem, ordinal: Option<i64>) {
    if let Some(ordinal) = ordinal {
        bus.set_status(subsystem, ordinal);
    }
}

fn emit(bus: &MemoryBus, subsystem: Subsystem, ordinal: Option<i64>) {
    if let Some(ordinal) = ordinal {
        bus.emit_status(subsystem, ordinal);
    }
}

/// A tracking, guiding-capable rig with a cooled camera and clear skies.
pub fn observatory() -> Arc<MemoryBus> {
    let bus = Arc::new(MemoryBus::new());
    set(&bus, Subsystem::Mount, MountStatus::Tracking.ordinal());
    set(&bus, Subsystem::Guide, GuideStatus::Idle.ordinal());
    set(&bus, Subsystem::Capture, CaptureStatus::Idle.ordinal());
    set(&bus, Subsystem::Focus, FocusState::Idle.ordinal());
    set(&bus, Subsystem::Align, AlignState::Idle.ordinal());
    set(&bus, Subsystem::Scheduler, SchedulerState::Idle.ordinal());
    set(&bus, Subsystem::Weather(0), WeatherState::Ok.ordinal());

    bus.set_property(Subsystem::Capture, names::CAMERA, json!(CAMERA));
    bus.set_property(Subsystem::Capture, names::OPTICAL_TRAIN, json!("Primary"));
    bus.set_property(Subsystem::Align, names::TELESCOPE_INFO, json!([800.0, 160.0, 1.0]));
    bus.set_device_number(CAMERA, "CCD_TEMPERATURE", "CCD_TEMPERATURE_VALUE", AMBIENT_TEMP);
    bus.set_device_switch(CAMERA, "CCD_COOLER", "COOLER_ON", false);
    bus.set_device_switch(CAMERA, "CCD_COOLER", "COOLER_OFF", true);

    bus.set_return(Subsystem::Align, names::GET_SOLUTION_RESULT, json!([0.0, 10.68, 41.27]));
    bus.set_return(Subsystem::Capture, names::GET_PENDING_JOB_COUNT, json!(1));
    bus.set_return(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, json!(0));
    bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_DURATION, json!(300.0));
    bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_PROGRESS, json!(0.0));

    bus.on_call(Subsystem::Mount, names::SLEW, |bus, _| {
        emit(bus, Subsystem::Mount, MountStatus::Tracking.ordinal());
        Ok(json!(true))
    });
    bus.on_call(Subsystem::Align, names::CAPTURE_AND_SOLVE, |bus, _| {
        emit(bus, Subsystem::Align, AlignState::Complete.ordinal());
        Ok(json!(true))
    });
    bus.on_call(Subsystem::Focus, names::START, |bus, _| {
        emit(bus, Subsystem::Focus, FocusState::Complete.ordinal());
        Ok(json!(true))
    });
    bus.on_call(Subsystem::Capture, names::START, |bus, _| {
        emit(bus, Subsystem::Capture, CaptureStatus::Capturing.ordinal());
        Ok(json!(true))
    });
    bus.on_call(Subsystem::Capture, names::ABORT, |bus, _| {
        emit(bus, Subsystem::Capture, CaptureStatus::Aborted.ordinal());
        Ok(json!(true))
    });
    bus.on_call(Subsystem::Scheduler, names::START, |bus, _| {
        emit(bus, Subsystem::Scheduler, SchedulerState::Running.ordinal());
        Ok(json!(true))
    });
    bus.on_call(Subsystem::Scheduler, names::STOP, |bus, _| {
        emit(bus, Subsystem::Scheduler, SchedulerState::Idle.ordinal());
        Ok(json!(true))
    });
    bus
}

/// Stops and restarts the simulated application.
pub struct SimulatedProcess {
    bus: Arc<MemoryBus>,
}

impl SimulatedProcess {
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ProcessControl for SimulatedProcess {
    async fn terminate(&self) -> std::io::Result<()> {
        self.bus.set_app_running(false);
        info!("simulated application terminated");
        Ok(())
    }

    async fn launch(&self) -> std::io::Result<()> {
        self.bus.set_app_running(true);
        info!("simulated application launched");
        Ok(())
    }
}
