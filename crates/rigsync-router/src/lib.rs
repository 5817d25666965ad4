//! rigsync-router — the per-node device status router.
//!
//! Owns the node's observatory snapshot, keeps it in step with the
//! automation bus, supervises the observatory-control application and
//! exposes the automation operations the cluster roles build on.
//!
//! # Architecture
//!
//! ```text
//! Supervisor (one task per node)
//!   Unavailable → AttemptingStart → WaitingReady → Ready → Disconnected
//!        │                                           │
//!        └─ ProcessControl: terminate + relaunch     └─ StatusRouter::subscribe
//!
//! StatusRouter
//!   ├── Mutex<ObservatoryState>       coarse state lock
//!   ├── dispatch task                 bus signal → apply_* → StatusRecord → NodeHooks
//!   ├── thermal task                  ThermalController tick every second
//!   ├── broadcast<RouterEvent>        align / focus / capture activity for waits
//!   └── automation                    plate solve, autofocus, PA alignment,
//!                                     capture control, filter calibration
//! ```

pub mod automation;
pub mod calibration;
pub mod config;
pub mod error;
pub mod hooks;
pub mod process;
pub mod report;
pub mod router;
pub mod supervisor;
pub mod thermal;

pub use automation::PA_TOLERANCE;
pub use calibration::{CalibrationStart, FilterOffset};
pub use config::RouterConfig;
pub use error::{RouterError, RouterResult};
pub use hooks::{NoHooks, NodeHooks};
pub use process::ProcessControl;
pub use report::{CameraReport, StatusReport};
pub use router::{DeviceSet, RouterEvent, StatusRouter};
pub use supervisor::{Supervisor, SupervisorState};
pub use thermal::{ThermalAction, ThermalController, thermal_policy};
