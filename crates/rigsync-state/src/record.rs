//! Status-change records: one subsystem's full state, as replicated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::align::AlignmentSolution;
use crate::job::ScheduleJob;

/// Property name → value, as read in bulk from a subsystem.
pub type Properties = BTreeMap<String, Value>;

/// Which subsystem a status-change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    MountStatus,
    GuideStatus,
    CaptureStatus,
    FocusStatus,
    SchedulerStatus,
    AlignStatus,
    WeatherStatus,
}

impl Action {
    /// Order in which cached records are replayed to a new follower.
    pub const BOOTSTRAP_ORDER: [Action; 6] = [
        Action::SchedulerStatus,
        Action::MountStatus,
        Action::AlignStatus,
        Action::FocusStatus,
        Action::GuideStatus,
        Action::CaptureStatus,
    ];
}

/// Self-contained description of one subsystem after a status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub action: Action,
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<AlignmentSolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<ScheduleJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

impl StatusRecord {
    pub fn new(action: Action, properties: Properties) -> Self {
        Self {
            action,
            properties,
            solution: None,
            job: None,
            target_name: None,
        }
    }

    pub fn with_solution(mut self, solution: Option<AlignmentSolution>) -> Self {
        self.solution = solution;
        self
    }

    pub fn with_job(mut self, job: Option<ScheduleJob>) -> Self {
        self.job = job;
        self
    }

    pub fn with_target_name(mut self, name: Option<String>) -> Self {
        self.target_name = name;
        self
    }

    /// The `status` property as a bus ordinal, when present and integral.
    pub fn status_ordinal(&self) -> Option<i64> {
        self.properties.get("status").and_then(Value::as_i64)
    }

    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }
}
