//! rigsync-bus — the automation-bus contract consumed by rigsync nodes.
//!
//! The observatory-control application exposes each subsystem as a remote
//! object: bulk and single property reads, property writes, method calls,
//! and status signals. [`AutomationBus`] is that contract. The binding to a
//! concrete transport lives outside this workspace; [`MemoryBus`] is an
//! in-process implementation for tests and simulation.
//!
//! # Architecture
//!
//! ```text
//! AutomationBus (trait)
//!   ├── ping / read_all / read / write / call / subscribe
//!   └── impl dyn AutomationBus: typed call/read helpers
//!
//! devices
//!   ├── DeviceProperties   raw INDI number/switch/text access via the indi subsystem
//!   ├── Camera             temperature, cooler, anti-dew heater
//!   ├── Focuser            absolute position, temperature
//!   ├── FilterWheel        slot, slot names
//!   └── Rotator            angle, angle state
//!
//! MemoryBus                properties + scripted methods + signal injection
//! ```

pub mod bus;
pub mod devices;
pub mod error;
pub mod memory;
pub mod names;

pub use bus::{AutomationBus, BusSignal, SignalKind, SignalStream, Subsystem};
pub use devices::{
    Camera, DeviceProperties, FilterWheel, Focuser, Rotator, bound_device, find_first_device,
};
pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
