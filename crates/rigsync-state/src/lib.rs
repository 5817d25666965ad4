//! rigsync-state — the per-node observatory snapshot and its primitives.
//!
//! Everything in this crate is plain data plus the small amount of logic
//! that decides how data changes. Nothing here talks to the automation bus
//! or the network.
//!
//! # Architecture
//!
//! ```text
//! ObservatoryState
//!   ├── status enums (mount, guide, capture, focus, align, scheduler, ...)
//!   │     └── ordinal tables: bus integer → variant, Unknown when out of range
//!   ├── EdgeFlag × 6 (capturing, focusing, guiding, dithering,
//!   │                 tracking_mount, scheduler_running)
//!   └── Option<ScheduleJob>
//!
//! Deadline          bounded polling helper used by every wait loop
//! AlignmentSolution plate-solve result with PA folded into [0, 180)
//! CaptureSnapshot   exposure progress used for abort decisions
//! StatusRecord      one subsystem's full property set, as replicated
//! ```

pub mod align;
pub mod capture;
pub mod deadline;
pub mod error;
pub mod flag;
pub mod job;
pub mod record;
pub mod sequence;
pub mod state;
pub mod status;

pub use align::{AlignmentSolution, NO_SOLUTION, normalize_pa, pa_distance, pa_in_range};
pub use capture::CaptureSnapshot;
pub use deadline::{Deadline, poll_until};
pub use error::{StateError, StateResult};
pub use flag::EdgeFlag;
pub use job::{
    DEFAULT_SCHEDULE_TEMPLATE, ScheduleJob, local_name, parse_schedule, render_schedule,
};
pub use record::{Action, Properties, StatusRecord};
pub use sequence::{adjust_exposures, exposures, sequence_file_name};
pub use state::{Flag, ObservatoryState, StateSnapshot};
pub use status::*;
