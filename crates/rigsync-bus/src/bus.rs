//! The automation-bus contract.

use std::fmt;

use async_trait::async_trait;
use rigsync_state::Properties;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{BusError, BusResult};

/// A remote object exposed by the observatory-control application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    /// Top-level automation entry object.
    Ekos,
    Mount,
    Guide,
    Capture,
    Focus,
    Align,
    Scheduler,
    Dome,
    /// Optional weather gate, located by index.
    Weather(u8),
    /// Generic device-property bus.
    Indi,
}

impl Subsystem {
    /// Subsystems that must all be readable before the node is ready.
    pub const MANDATORY: [Subsystem; 5] = [
        Subsystem::Indi,
        Subsystem::Guide,
        Subsystem::Capture,
        Subsystem::Mount,
        Subsystem::Scheduler,
    ];

    /// Subsystems whose status signals the router handles.
    pub const MONITORED: [Subsystem; 6] = [
        Subsystem::Mount,
        Subsystem::Guide,
        Subsystem::Capture,
        Subsystem::Focus,
        Subsystem::Align,
        Subsystem::Scheduler,
    ];

    /// Index range scanned for a weather subsystem.
    pub const WEATHER_INDICES: std::ops::RangeInclusive<u8> = 0..=4;

    pub fn object_path(&self) -> String {
        match self {
            Subsystem::Ekos => "/KStars/Ekos".into(),
            Subsystem::Mount => "/KStars/Ekos/Mount".into(),
            Subsystem::Guide => "/KStars/Ekos/Guide".into(),
            Subsystem::Capture => "/KStars/Ekos/Capture".into(),
            Subsystem::Focus => "/KStars/Ekos/Focus".into(),
            Subsystem::Align => "/KStars/Ekos/Align".into(),
            Subsystem::Scheduler => "/KStars/Ekos/Scheduler".into(),
            Subsystem::Dome => "/KStars/Ekos/Dome".into(),
            Subsystem::Weather(n) => format!("/KStars/Ekos/Weather/{n}"),
            Subsystem::Indi => "/KStars/INDI".into(),
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Weather(n) => write!(f, "weather[{n}]"),
            other => f.write_str(&format!("{other:?}").to_lowercase()),
        }
    }
}

/// What a subsystem signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// New status ordinal.
    Status(i64),
    /// Mount park status ordinal.
    ParkStatus(i64),
    /// Mount meridian-flip status ordinal.
    MeridianFlipStatus(i64),
    /// The align subsystem produced a new solution.
    NewSolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSignal {
    pub subsystem: Subsystem,
    pub kind: SignalKind,
}

impl BusSignal {
    pub fn status(subsystem: Subsystem, ordinal: i64) -> Self {
        Self {
            subsystem,
            kind: SignalKind::Status(ordinal),
        }
    }
}

/// Ordered stream of signals for one subscription. Dropping it unsubscribes.
pub type SignalStream = mpsc::UnboundedReceiver<BusSignal>;

/// Remote access to the observatory-control application's subsystems.
#[async_trait]
pub trait AutomationBus: Send + Sync + 'static {
    /// Check that the subsystem's remote object answers.
    async fn ping(&self, subsystem: Subsystem) -> BusResult<()>;

    /// Read every property of a subsystem.
    async fn read_all(&self, subsystem: Subsystem) -> BusResult<Properties>;

    async fn read(&self, subsystem: Subsystem, name: &str) -> BusResult<Value>;

    async fn write(&self, subsystem: Subsystem, name: &str, value: Value) -> BusResult<()>;

    async fn call(&self, subsystem: Subsystem, method: &str, args: Vec<Value>) -> BusResult<Value>;

    /// Subscribe to signals of the given subsystems.
    async fn subscribe(&self, subsystems: &[Subsystem]) -> BusResult<SignalStream>;
}

fn type_error(what: impl Into<String>, value: &Value) -> BusError {
    BusError::Type {
        what: what.into(),
        value: value.to_string(),
    }
}

impl dyn AutomationBus {
    pub async fn call_f64(&self, subsystem: Subsystem, method: &str, args: Vec<Value>) -> BusResult<f64> {
        let value = self.call(subsystem, method, args).await?;
        value
            .as_f64()
            .ok_or_else(|| type_error(format!("{subsystem}.{method}"), &value))
    }

    pub async fn call_i64(&self, subsystem: Subsystem, method: &str, args: Vec<Value>) -> BusResult<i64> {
        let value = self.call(subsystem, method, args).await?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|v| v as i64))
            .ok_or_else(|| type_error(format!("{subsystem}.{method}"), &value))
    }

    pub async fn call_f64_list(
        &self,
        subsystem: Subsystem,
        method: &str,
        args: Vec<Value>,
    ) -> BusResult<Vec<f64>> {
        let value = self.call(subsystem, method, args).await?;
        value
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_f64).collect())
            .ok_or_else(|| type_error(format!("{subsystem}.{method}"), &value))
    }

    /// Read a string property; `null` reads as `None`.
    pub async fn read_string(&self, subsystem: Subsystem, name: &str) -> BusResult<Option<String>> {
        let value = self.read(subsystem, name).await?;
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Err(type_error(format!("{subsystem}.{name}"), &other)),
        }
    }

    /// Read the `status` property as an ordinal.
    pub async fn read_ordinal(&self, subsystem: Subsystem) -> BusResult<i64> {
        let value = self.read(subsystem, crate::names::STATUS).await?;
        value
            .as_i64()
            .ok_or_else(|| type_error(format!("{subsystem}.status"), &value))
    }
}
