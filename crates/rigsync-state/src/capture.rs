//! Capture job progress.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum elapsed and remaining seconds before an exposure is worth
/// aborting for a dither.
pub const DITHER_ABORT_MARGIN_SECS: f64 = 2.0;

/// Grace period, beyond the job's own duration, before a job without
/// exposure progress is treated as stuck.
pub const STUCK_GRACE: Duration = Duration::from_secs(300);

/// Progress of the active capture job, read on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub job_id: i64,
    /// Declared exposure duration in seconds.
    pub duration: f64,
    /// Seconds already exposed.
    pub exposure: f64,
    /// Seconds left in the current exposure.
    pub time_left: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_progress: Option<i64>,
}

impl CaptureSnapshot {
    /// Build from the capture subsystem's duration and remaining-time
    /// readings.
    pub fn new(job_id: i64, duration: f64, time_left: f64) -> Self {
        Self {
            job_id,
            duration,
            exposure: duration - time_left,
            time_left,
            image_count: None,
            image_progress: None,
        }
    }

    pub fn with_images(mut self, count: Option<i64>, progress: Option<i64>) -> Self {
        self.image_count = count;
        self.image_progress = progress;
        self
    }

    /// At least [`DITHER_ABORT_MARGIN_SECS`] exposed and remaining.
    pub fn abortable_for_dither(&self) -> bool {
        self.time_left >= DITHER_ABORT_MARGIN_SECS && self.exposure >= DITHER_ABORT_MARGIN_SECS
    }

    /// A job that has not advanced past its first few seconds although it
    /// started longer ago than its duration plus [`STUCK_GRACE`].
    pub fn is_stuck(&self, running_for: Duration) -> bool {
        let limit = Duration::from_secs_f64(self.duration.max(0.0)) + STUCK_GRACE;
        self.exposure < 5.0 && running_for > limit
    }
}
