//! Point-in-time status report of a node.

use rigsync_state::{AlignmentSolution, CaptureSnapshot, StateSnapshot};
use serde::Serialize;
use tracing::debug;

use crate::calibration::FilterOffset;
use crate::error::RouterResult;
use crate::router::StatusRouter;

#[derive(Debug, Clone, Serialize)]
pub struct CameraReport {
    pub device: String,
    pub temperature: Option<f64>,
    pub cooling: Option<bool>,
    pub warming: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub ready: bool,
    pub suspended: bool,
    pub state: StateSnapshot,
    pub solution: Option<AlignmentSolution>,
    pub capture: Option<CaptureSnapshot>,
    pub camera: Option<CameraReport>,
    pub calibrating: bool,
    pub filter_offsets: Vec<FilterOffset>,
}

impl StatusRouter {
    /// Gather the node's current status. Fails when the node is not ready.
    pub async fn status_report(&self) -> RouterResult<StatusReport> {
        self.ensure_ready()?;

        let capture = self.capture_snapshot().await.unwrap_or_else(|e| {
            debug!(error = %e, "no capture progress");
            None
        });
        let camera = match self.devices().camera {
            Some(camera) => Some(CameraReport {
                device: camera.name().to_string(),
                temperature: camera.temperature().await.ok(),
                cooling: camera.is_cooling().await.ok(),
                warming: self.is_warming().await,
            }),
            None => None,
        };

        Ok(StatusReport {
            ready: true,
            suspended: self.is_suspended(),
            state: self.snapshot(),
            solution: self.last_solution(),
            capture,
            camera,
            calibrating: self.is_calibrating(),
            filter_offsets: self.calibration_results(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rigsync_bus::{MemoryBus, Subsystem, names};
    use serde_json::json;

    use super::*;
    use crate::config::RouterConfig;
    use crate::error::RouterError;

    #[tokio::test]
    async fn report_requires_ready() {
        let router = StatusRouter::new(Arc::new(MemoryBus::new()), RouterConfig::default());
        assert!(matches!(
            router.status_report().await,
            Err(RouterError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn report_serializes_snapshot_and_capture() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_return(Subsystem::Capture, names::GET_ACTIVE_JOB_ID, json!(1));
        bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_DURATION, json!(60.0));
        bus.set_return(Subsystem::Capture, names::GET_JOB_EXPOSURE_PROGRESS, json!(30.0));
        let router = StatusRouter::new(bus, RouterConfig::default());
        router.set_ready(true);

        let report = router.status_report().await.unwrap();
        assert!(report.camera.is_none());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["ready"], json!(true));
        assert_eq!(value["capture"]["job_id"], json!(1));
        assert_eq!(value["state"]["mount"], json!("idle"));
    }
}
