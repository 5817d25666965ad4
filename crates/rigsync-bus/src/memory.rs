//! In-process automation bus.
//!
//! `MemoryBus` keeps subsystem properties and raw device properties in
//! memory, records every method call, and lets callers script method
//! behaviour and inject signals. Device-property methods of the indi
//! subsystem (`getNumber`, `setSwitch`, ...) are served from the device
//! table; every other method returns a scripted result or `null`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rigsync_state::{Properties, PropertyState};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::{AutomationBus, BusSignal, SignalStream, Subsystem};
use crate::error::{BusError, BusResult};
use crate::names;

/// Scripted method behaviour. Runs without the bus lock held, so it may
/// update properties or emit signals through the `&MemoryBus` it receives.
pub type MethodHandler = Arc<dyn Fn(&MemoryBus, &[Value]) -> BusResult<Value> + Send + Sync>;

type DeviceKey = (String, String, String);

#[derive(Default)]
struct Inner {
    app_down: bool,
    unreachable: HashSet<Subsystem>,
    properties: HashMap<Subsystem, Properties>,
    device_values: BTreeMap<DeviceKey, Value>,
    device_states: HashMap<(String, String), PropertyState>,
    handlers: HashMap<(Subsystem, String), MethodHandler>,
    calls: Vec<(Subsystem, String, Vec<Value>)>,
    subscribers: Vec<(Vec<Subsystem>, mpsc::UnboundedSender<BusSignal>)>,
}

#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Availability ───────────────────────────────────────────────

    /// Simulate the whole application being down (or back up).
    pub fn set_app_running(&self, running: bool) {
        self.lock().app_down = !running;
    }

    pub fn set_reachable(&self, subsystem: Subsystem, reachable: bool) {
        let mut inner = self.lock();
        if reachable {
            inner.unreachable.remove(&subsystem);
        } else {
            inner.unreachable.insert(subsystem);
        }
    }

    fn check_reachable(inner: &Inner, subsystem: Subsystem) -> BusResult<()> {
        let absent_weather =
            matches!(subsystem, Subsystem::Weather(_)) && !inner.properties.contains_key(&subsystem);
        if inner.app_down || inner.unreachable.contains(&subsystem) || absent_weather {
            return Err(BusError::Unreachable(subsystem));
        }
        Ok(())
    }

    // ── Subsystem properties ───────────────────────────────────────

    pub fn set_property(&self, subsystem: Subsystem, name: &str, value: Value) {
        self.lock()
            .properties
            .entry(subsystem)
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn set_status(&self, subsystem: Subsystem, ordinal: i64) {
        self.set_property(subsystem, names::STATUS, json!(ordinal));
    }

    pub fn property(&self, subsystem: Subsystem, name: &str) -> Option<Value> {
        self.lock()
            .properties
            .get(&subsystem)
            .and_then(|props| props.get(name).cloned())
    }

    // ── Device properties ──────────────────────────────────────────

    fn device_key(device: &str, property: &str, element: &str) -> DeviceKey {
        (device.into(), property.into(), element.into())
    }

    pub fn set_device_number(&self, device: &str, property: &str, element: &str, value: f64) {
        self.lock()
            .device_values
            .insert(Self::device_key(device, property, element), json!(value));
    }

    pub fn set_device_switch(&self, device: &str, property: &str, element: &str, on: bool) {
        self.lock().device_values.insert(
            Self::device_key(device, property, element),
            json!(if on { "On" } else { "Off" }),
        );
    }

    pub fn set_device_text(&self, device: &str, property: &str, element: &str, text: &str) {
        self.lock()
            .device_values
            .insert(Self::device_key(device, property, element), json!(text));
    }

    pub fn set_device_state(&self, device: &str, property: &str, state: PropertyState) {
        self.lock()
            .device_states
            .insert((device.into(), property.into()), state);
    }

    pub fn device_value(&self, device: &str, property: &str, element: &str) -> Option<Value> {
        self.lock()
            .device_values
            .get(&Self::device_key(device, property, element))
            .cloned()
    }

    // ── Methods ────────────────────────────────────────────────────

    /// Script the behaviour of a method.
    pub fn on_call<F>(&self, subsystem: Subsystem, method: &str, handler: F)
    where
        F: Fn(&MemoryBus, &[Value]) -> BusResult<Value> + Send + Sync + 'static,
    {
        self.lock()
            .handlers
            .insert((subsystem, method.to_string()), Arc::new(handler));
    }

    /// Script a method that always returns `value`.
    pub fn set_return(&self, subsystem: Subsystem, method: &str, value: Value) {
        self.on_call(subsystem, method, move |_, _| Ok(value.clone()));
    }

    /// Arguments of every recorded call to `subsystem.method`, in order.
    pub fn calls_to(&self, subsystem: Subsystem, method: &str) -> Vec<Vec<Value>> {
        self.lock()
            .calls
            .iter()
            .filter(|(s, m, _)| *s == subsystem && m == method)
            .map(|(_, _, args)| args.clone())
            .collect()
    }

    pub fn call_count(&self, subsystem: Subsystem, method: &str) -> usize {
        self.calls_to(subsystem, method).len()
    }

    /// Every recorded call as `subsystem.method`, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(|(s, m, _)| format!("{s}.{m}"))
            .collect()
    }

    // ── Signals ────────────────────────────────────────────────────

    /// Deliver a signal to every subscriber of its subsystem.
    pub fn emit(&self, signal: BusSignal) {
        let mut inner = self.lock();
        inner.subscribers.retain(|(subsystems, tx)| {
            if !subsystems.contains(&signal.subsystem) {
                return !tx.is_closed();
            }
            tx.send(signal).is_ok()
        });
    }

    /// Set a subsystem's status property and signal the change.
    pub fn emit_status(&self, subsystem: Subsystem, ordinal: i64) {
        self.set_status(subsystem, ordinal);
        self.emit(BusSignal::status(subsystem, ordinal));
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|(_, tx)| !tx.is_closed());
        inner.subscribers.len()
    }

    fn device_call(inner: &mut Inner, method: &str, args: &[Value]) -> Option<Value> {
        let arg = |i: usize| args.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
        let key = || (arg(0), arg(1), arg(2));
        match method {
            names::GET_DEVICES => {
                let devices: HashSet<_> = inner.device_values.keys().map(|(d, _, _)| d.clone()).collect();
                let mut devices: Vec<_> = devices.into_iter().collect();
                devices.sort();
                Some(json!(devices))
            }
            names::GET_PROPERTIES => {
                let device = arg(0);
                let mut props: Vec<_> = inner
                    .device_values
                    .keys()
                    .filter(|(d, _, _)| *d == device)
                    .map(|(_, p, _)| p.clone())
                    .collect();
                props.dedup();
                Some(json!(props))
            }
            names::GET_NUMBER | names::GET_SWITCH | names::GET_TEXT => {
                Some(inner.device_values.get(&key()).cloned().unwrap_or(Value::Null))
            }
            names::SET_NUMBER | names::SET_SWITCH | names::SET_TEXT => {
                let value = args.get(3).cloned().unwrap_or(Value::Null);
                inner.device_values.insert(key(), value);
                Some(json!(true))
            }
            names::GET_PROPERTY_STATE => {
                let state = inner
                    .device_states
                    .get(&(arg(0), arg(1)))
                    .copied()
                    .unwrap_or(PropertyState::Ok);
                let name = match state {
                    PropertyState::Idle => "Idle",
                    PropertyState::Ok => "Ok",
                    PropertyState::Busy => "Busy",
                    PropertyState::Alert => "Alert",
                    PropertyState::Unknown => "",
                };
                Some(json!(name))
            }
            names::SEND_PROPERTY => Some(json!(true)),
            _ => None,
        }
    }
}

#[async_trait]
impl AutomationBus for MemoryBus {
    async fn ping(&self, subsystem: Subsystem) -> BusResult<()> {
        Self::check_reachable(&self.lock(), subsystem)
    }

    async fn read_all(&self, subsystem: Subsystem) -> BusResult<Properties> {
        let inner = self.lock();
        Self::check_reachable(&inner, subsystem)?;
        Ok(inner.properties.get(&subsystem).cloned().unwrap_or_default())
    }

    async fn read(&self, subsystem: Subsystem, name: &str) -> BusResult<Value> {
        let inner = self.lock();
        Self::check_reachable(&inner, subsystem)?;
        inner
            .properties
            .get(&subsystem)
            .and_then(|props| props.get(name).cloned())
            .ok_or_else(|| BusError::MissingProperty {
                subsystem,
                name: name.to_string(),
            })
    }

    async fn write(&self, subsystem: Subsystem, name: &str, value: Value) -> BusResult<()> {
        let mut inner = self.lock();
        Self::check_reachable(&inner, subsystem)?;
        inner
            .properties
            .entry(subsystem)
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    async fn call(&self, subsystem: Subsystem, method: &str, args: Vec<Value>) -> BusResult<Value> {
        let handler = {
            let mut inner = self.lock();
            Self::check_reachable(&inner, subsystem)?;
            debug!(%subsystem, method, "bus call");
            inner.calls.push((subsystem, method.to_string(), args.clone()));
            let handler = inner.handlers.get(&(subsystem, method.to_string())).cloned();
            match handler {
                Some(handler) => handler,
                None if subsystem == Subsystem::Indi => {
                    return Ok(Self::device_call(&mut inner, method, &args).unwrap_or(Value::Null));
                }
                None => return Ok(Value::Null),
            }
        };
        handler(self, &args)
    }

    async fn subscribe(&self, subsystems: &[Subsystem]) -> BusResult<SignalStream> {
        let mut inner = self.lock();
        if inner.app_down {
            return Err(BusError::Unreachable(Subsystem::Ekos));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push((subsystems.to_vec(), tx));
        Ok(rx)
    }
}
