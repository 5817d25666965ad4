//! Filter focus-offset calibration.
//!
//! The first filter of the wheel is the reference. Each other filter is
//! focused between two reference runs and its offset is its focus position
//! minus the mean of the surrounding reference positions. The reference
//! run after one candidate serves as the run before the next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{RouterError, RouterResult};
use crate::router::{StatusRouter, lock};

/// Focus offset of one filter relative to the reference filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOffset {
    pub filter: String,
    pub slot: i64,
    pub offset: i64,
    pub reference_position: i64,
}

/// Outcome of a calibration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStart {
    Started,
    AlreadyInProgress,
}

#[derive(Debug, Default)]
pub(crate) struct CalibrationSlot {
    running: AtomicBool,
    results: Mutex<Vec<FilterOffset>>,
}

/// Clears the in-progress flag however the run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// `candidate − mean(before, after)`, rounded.
pub fn filter_offset(candidate: i64, before: i64, after: i64) -> i64 {
    (candidate as f64 - (before + after) as f64 / 2.0).round() as i64
}

impl StatusRouter {
    /// Start a calibration in the background unless one is running.
    pub fn calibrate_filters(self: &Arc<Self>) -> RouterResult<CalibrationStart> {
        self.ensure_ready()?;
        if self
            .calibration
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("filter calibration already in progress");
            return Ok(CalibrationStart::AlreadyInProgress);
        }

        let router = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = RunningGuard(&router.calibration.running);
            match router.run_filter_calibration().await {
                Ok(offsets) => *lock(&router.calibration.results) = offsets,
                Err(e) => warn!(error = %e, "filter calibration failed"),
            }
        });
        Ok(CalibrationStart::Started)
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.running.load(Ordering::SeqCst)
    }

    /// Offsets of the last completed calibration.
    pub fn calibration_results(&self) -> Vec<FilterOffset> {
        lock(&self.calibration.results).clone()
    }

    /// Run the calibration on the calling task.
    pub async fn run_filter_calibration(&self) -> RouterResult<Vec<FilterOffset>> {
        let wheel = self
            .devices()
            .filter_wheel
            .ok_or(RouterError::DeviceMissing("filter wheel"))?;
        let filters = wheel.filters().await?;
        let Some((reference, others)) = filters.split_first() else {
            return Ok(Vec::new());
        };
        info!(%reference, filters = others.len(), "filter calibration started");

        let mut offsets = Vec::new();
        let mut reference_before = None;
        for (index, filter) in others.iter().enumerate() {
            let slot = index as i64 + 2;
            let before = match reference_before {
                Some(position) => Some(position),
                None => self.run_autofocus(Some(1)).await?,
            };
            let candidate = self.run_autofocus(Some(slot)).await?;
            let after = self.run_autofocus(Some(1)).await?;
            reference_before = after;

            match (before, candidate, after) {
                (Some(before), Some(candidate), Some(after)) => {
                    let offset = filter_offset(candidate, before, after);
                    info!(%filter, slot, offset, "filter offset");
                    offsets.push(FilterOffset {
                        filter: filter.clone(),
                        slot,
                        offset,
                        reference_position: after,
                    });
                }
                _ => warn!(%filter, slot, "autofocus failed, no offset for filter"),
            }
        }
        info!(calibrated = offsets.len(), "filter calibration finished");
        Ok(offsets)
    }
}
