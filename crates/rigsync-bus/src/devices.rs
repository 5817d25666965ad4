//! Typed access to raw device properties through the indi subsystem.

use std::sync::Arc;

use rigsync_state::PropertyState;
use serde_json::{Value, json};

use crate::bus::{AutomationBus, Subsystem};
use crate::error::{BusError, BusResult};
use crate::names;

/// Raw number/switch/text properties of one named device.
#[derive(Clone)]
pub struct DeviceProperties {
    bus: Arc<dyn AutomationBus>,
    device: String,
}

impl std::fmt::Debug for DeviceProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProperties")
            .field("device", &self.device)
            .finish()
    }
}

impl DeviceProperties {
    pub fn new(bus: Arc<dyn AutomationBus>, device: impl Into<String>) -> Self {
        Self {
            bus,
            device: device.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.device
    }

    fn args(&self, rest: &[&str]) -> Vec<Value> {
        std::iter::once(json!(self.device))
            .chain(rest.iter().map(|s| json!(s)))
            .collect()
    }

    pub async fn number(&self, property: &str, element: &str) -> BusResult<f64> {
        self.bus
            .call_f64(Subsystem::Indi, names::GET_NUMBER, self.args(&[property, element]))
            .await
    }

    /// Set a number element and send the property to the device.
    pub async fn set_number(&self, property: &str, element: &str, value: f64) -> BusResult<()> {
        let mut args = self.args(&[property, element]);
        args.push(json!(value));
        self.bus.call(Subsystem::Indi, names::SET_NUMBER, args).await?;
        self.send(property).await
    }

    pub async fn switch(&self, property: &str, element: &str) -> BusResult<bool> {
        let value = self
            .bus
            .call(Subsystem::Indi, names::GET_SWITCH, self.args(&[property, element]))
            .await?;
        Ok(value.as_str() == Some("On"))
    }

    /// Set several switch elements of one property, then send it.
    pub async fn set_switches(&self, property: &str, elements: &[(&str, bool)]) -> BusResult<()> {
        for (element, on) in elements {
            let state = if *on { "On" } else { "Off" };
            self.bus
                .call(
                    Subsystem::Indi,
                    names::SET_SWITCH,
                    self.args(&[property, element, state]),
                )
                .await?;
        }
        self.send(property).await
    }

    /// Read a text element; `None` when unset.
    pub async fn text(&self, property: &str, element: &str) -> BusResult<Option<String>> {
        let value = self
            .bus
            .call(Subsystem::Indi, names::GET_TEXT, self.args(&[property, element]))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    pub async fn state(&self, property: &str) -> BusResult<PropertyState> {
        let value = self
            .bus
            .call(Subsystem::Indi, names::GET_PROPERTY_STATE, self.args(&[property]))
            .await?;
        Ok(match value.as_str() {
            Some("Idle") => PropertyState::Idle,
            Some("Ok") => PropertyState::Ok,
            Some("Busy") => PropertyState::Busy,
            Some("Alert") | Some("Alrt") => PropertyState::Alert,
            _ => PropertyState::Unknown,
        })
    }

    pub async fn properties(&self) -> BusResult<Vec<String>> {
        let value = self
            .bus
            .call(Subsystem::Indi, names::GET_PROPERTIES, self.args(&[]))
            .await?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn has_property(&self, property: &str) -> bool {
        self.properties()
            .await
            .map(|props| props.iter().any(|p| p.split('.').next() == Some(property)))
            .unwrap_or(false)
    }

    async fn send(&self, property: &str) -> BusResult<()> {
        self.bus
            .call(Subsystem::Indi, names::SEND_PROPERTY, self.args(&[property]))
            .await?;
        Ok(())
    }
}

/// First device whose driver interface includes `interface`.
pub async fn find_first_device(bus: &Arc<dyn AutomationBus>, interface: i64) -> BusResult<Option<String>> {
    let devices = bus.call(Subsystem::Indi, names::GET_DEVICES, vec![]).await?;
    let Some(devices) = devices.as_array() else {
        return Ok(None);
    };
    for device in devices.iter().filter_map(Value::as_str) {
        let props = DeviceProperties::new(bus.clone(), device);
        let driver = props
            .text("DRIVER_INFO", "DRIVER_INTERFACE")
            .await?
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0);
        if driver & interface != 0 {
            return Ok(Some(device.to_string()));
        }
    }
    Ok(None)
}

// ── Camera ─────────────────────────────────────────────────────────

const CCD_TEMPERATURE: &str = "CCD_TEMPERATURE";
const CCD_TEMPERATURE_VALUE: &str = "CCD_TEMPERATURE_VALUE";
const CCD_COOLER: &str = "CCD_COOLER";
const CCD_CONTROLS: &str = "CCD_CONTROLS";
const ANTI_DEW: &str = "AntiDewHeater";
const DEW_HEATER: &str = "DEW_HEATER";
const DEW_HEATER_ON: &str = "DEW_HEATER_ON";
const DEW_HEATER_OFF: &str = "DEW_HEATER_OFF";

#[derive(Debug, Clone)]
pub struct Camera {
    props: DeviceProperties,
}

impl Camera {
    pub fn new(bus: Arc<dyn AutomationBus>, device: impl Into<String>) -> Self {
        Self {
            props: DeviceProperties::new(bus, device),
        }
    }

    pub fn name(&self) -> &str {
        self.props.name()
    }

    pub async fn temperature(&self) -> BusResult<f64> {
        self.props.number(CCD_TEMPERATURE, CCD_TEMPERATURE_VALUE).await
    }

    /// State of the temperature property; `Ok` once the sensor settled.
    pub async fn temperature_state(&self) -> BusResult<PropertyState> {
        self.props.state(CCD_TEMPERATURE).await
    }

    /// Set the target temperature. Drivers switch the cooler on with it.
    pub async fn set_target_temperature(&self, celsius: f64) -> BusResult<()> {
        self.props
            .set_number(CCD_TEMPERATURE, CCD_TEMPERATURE_VALUE, celsius)
            .await
    }

    pub async fn is_cooling(&self) -> BusResult<bool> {
        self.props.switch(CCD_COOLER, "COOLER_ON").await
    }

    pub async fn set_cooler(&self, on: bool) -> BusResult<()> {
        self.props
            .set_switches(CCD_COOLER, &[("COOLER_ON", on), ("COOLER_OFF", !on)])
            .await
    }

    /// Anti-dew heaters are exposed either as a camera control or as a
    /// separate `DEW_HEATER` switch.
    async fn anti_dew_control(&self) -> BusResult<AntiDewControl> {
        if self.props.has_property(CCD_CONTROLS).await {
            Ok(AntiDewControl::CameraControl)
        } else if self.props.has_property(DEW_HEATER).await {
            Ok(AntiDewControl::Switch)
        } else {
            Err(BusError::MissingDeviceProperty {
                device: self.props.name().to_string(),
                property: ANTI_DEW.to_string(),
            })
        }
    }

    pub async fn anti_dew_on(&self) -> BusResult<bool> {
        match self.anti_dew_control().await? {
            AntiDewControl::CameraControl => {
                Ok(self.props.number(CCD_CONTROLS, ANTI_DEW).await? > 0.0)
            }
            AntiDewControl::Switch => self.props.switch(DEW_HEATER, DEW_HEATER_ON).await,
        }
    }

    pub async fn set_anti_dew(&self, on: bool) -> BusResult<()> {
        match self.anti_dew_control().await? {
            AntiDewControl::CameraControl => {
                self.props
                    .set_number(CCD_CONTROLS, ANTI_DEW, if on { 1.0 } else { 0.0 })
                    .await
            }
            AntiDewControl::Switch => {
                self.props
                    .set_switches(DEW_HEATER, &[(DEW_HEATER_ON, on), (DEW_HEATER_OFF, !on)])
                    .await
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AntiDewControl {
    CameraControl,
    Switch,
}

// ── Focuser ────────────────────────────────────────────────────────

const ABS_FOCUS_POSITION: &str = "ABS_FOCUS_POSITION";

#[derive(Debug, Clone)]
pub struct Focuser {
    props: DeviceProperties,
}

impl Focuser {
    pub fn new(bus: Arc<dyn AutomationBus>, device: impl Into<String>) -> Self {
        Self {
            props: DeviceProperties::new(bus, device),
        }
    }

    pub fn name(&self) -> &str {
        self.props.name()
    }

    pub async fn position(&self) -> BusResult<i64> {
        let pos = self
            .props
            .number(ABS_FOCUS_POSITION, "FOCUS_ABSOLUTE_POSITION")
            .await?;
        Ok(pos.round() as i64)
    }

    pub async fn temperature(&self) -> BusResult<f64> {
        self.props.number("FOCUS_TEMPERATURE", "TEMPERATURE").await
    }

    /// Absolute positioning is what autofocus needs.
    pub async fn is_absolute(&self) -> bool {
        self.props.has_property(ABS_FOCUS_POSITION).await
    }
}

// ── Filter wheel ───────────────────────────────────────────────────

const FILTER_SLOT: &str = "FILTER_SLOT";

#[derive(Debug, Clone)]
pub struct FilterWheel {
    props: DeviceProperties,
}

impl FilterWheel {
    pub fn new(bus: Arc<dyn AutomationBus>, device: impl Into<String>) -> Self {
        Self {
            props: DeviceProperties::new(bus, device),
        }
    }

    pub fn name(&self) -> &str {
        self.props.name()
    }

    /// Current slot, 1-based.
    pub async fn slot(&self) -> BusResult<i64> {
        Ok(self.props.number(FILTER_SLOT, "FILTER_SLOT_VALUE").await? as i64)
    }

    pub async fn set_slot(&self, slot: i64) -> BusResult<()> {
        self.props
            .set_number(FILTER_SLOT, "FILTER_SLOT_VALUE", slot as f64)
            .await
    }

    pub async fn slot_state(&self) -> BusResult<PropertyState> {
        self.props.state(FILTER_SLOT).await
    }

    /// Filter names in slot order; stops at the first unset or "invalid" name.
    pub async fn filters(&self) -> BusResult<Vec<String>> {
        let mut filters = Vec::new();
        for slot in 1..=64 {
            let name = self
                .props
                .text("FILTER_NAME", &format!("FILTER_SLOT_NAME_{slot}"))
                .await?;
            match name {
                Some(name) if !name.eq_ignore_ascii_case("invalid") => filters.push(name),
                _ => break,
            }
        }
        Ok(filters)
    }
}

// ── Rotator ────────────────────────────────────────────────────────

const ABS_ROTATOR_ANGLE: &str = "ABS_ROTATOR_ANGLE";

#[derive(Debug, Clone)]
pub struct Rotator {
    props: DeviceProperties,
}

impl Rotator {
    pub fn new(bus: Arc<dyn AutomationBus>, device: impl Into<String>) -> Self {
        Self {
            props: DeviceProperties::new(bus, device),
        }
    }

    pub fn name(&self) -> &str {
        self.props.name()
    }

    pub async fn angle(&self) -> BusResult<f64> {
        self.props.number(ABS_ROTATOR_ANGLE, "ANGLE").await
    }

    pub async fn angle_state(&self) -> BusResult<PropertyState> {
        self.props.state(ABS_ROTATOR_ANGLE).await
    }

    pub async fn is_moving(&self) -> bool {
        matches!(self.angle_state().await, Ok(PropertyState::Busy))
    }
}

/// Treat blank device names reported by a subsystem as unbound.
pub fn bound_device(name: Option<String>) -> Option<String> {
    name.filter(|n| !n.trim().is_empty())
}
