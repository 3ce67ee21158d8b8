use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// One independently reconciled quantity on either device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    Power,
    FlowTarget,
    AutoOffset,
    LgMode,
    /// Adaptive heating-curve control of the flow target, on or off.
    AiMode,
    ThermostatTarget,
    ThermostatMode,
}

impl FieldId {
    pub const ALL: [FieldId; 7] = [
        FieldId::Power,
        FieldId::FlowTarget,
        FieldId::AutoOffset,
        FieldId::LgMode,
        FieldId::AiMode,
        FieldId::ThermostatTarget,
        FieldId::ThermostatMode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FieldId::Power => "power",
            FieldId::FlowTarget => "flow_target",
            FieldId::AutoOffset => "auto_offset",
            FieldId::LgMode => "lg_mode",
            FieldId::ThermostatTarget => "thermostat_target",
            FieldId::ThermostatMode => "thermostat_mode",
            FieldId::AiMode => "ai_mode",
        }
    }

    pub fn device(&self) -> Device {
        match self {
            FieldId::ThermostatTarget | FieldId::ThermostatMode => Device::Thermostat,
            _ => Device::HeatPump,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    HeatPump,
    Thermostat,
}

impl Device {
    pub fn name(&self) -> &'static str {
        match self {
            Device::HeatPump => "heat_pump",
            Device::Thermostat => "thermostat",
        }
    }
}

/// LG operating mode as written to holding register 40001.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LgMode {
    Auto,
    Heating,
}

impl LgMode {
    pub fn code(&self) -> i64 {
        match self {
            LgMode::Auto => 3,
            LgMode::Heating => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            3 => Some(LgMode::Auto),
            4 => Some(LgMode::Heating),
            _ => None,
        }
    }

    /// Parse the `mode_setting` label reported by `GET /status`.
    pub fn from_setting(label: &str) -> Option<Self> {
        match label {
            "Auto" => Some(LgMode::Auto),
            "Heat" | "Heating" => Some(LgMode::Heating),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatMode {
    Eco,
    Auto,
    On,
    Off,
}

impl ThermostatMode {
    pub const ALL: [ThermostatMode; 4] = [
        ThermostatMode::Eco,
        ThermostatMode::Auto,
        ThermostatMode::On,
        ThermostatMode::Off,
    ];

    pub fn as_api_str(&self) -> &'static str {
        match self {
            ThermostatMode::Eco => "ECO",
            ThermostatMode::Auto => "AUTO",
            ThermostatMode::On => "ON",
            ThermostatMode::Off => "OFF",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "ECO" => Some(ThermostatMode::Eco),
            "AUTO" => Some(ThermostatMode::Auto),
            "ON" => Some(ThermostatMode::On),
            "OFF" => Some(ThermostatMode::Off),
            _ => None,
        }
    }

    /// Position of the mode in the field's option set.
    pub fn index(&self) -> f64 {
        match self {
            ThermostatMode::Eco => 0.0,
            ThermostatMode::Auto => 1.0,
            ThermostatMode::On => 2.0,
            ThermostatMode::Off => 3.0,
        }
    }

    pub fn from_index(value: f64) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.index() == value)
    }
}

/// Decoded `GET /status` body of the heat pump service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HeatPumpStatus {
    pub is_on: bool,
    pub target_temperature: f64,
    pub flow_temperature: f64,
    pub compressor_running: bool,
    #[serde(default)]
    pub op_mode: Option<i64>,
    #[serde(default)]
    pub auto_mode_offset: Option<f64>,
    #[serde(default)]
    pub return_temperature: Option<f64>,
    #[serde(default)]
    pub outdoor_temperature: Option<f64>,
    #[serde(default)]
    pub water_pump_running: Option<bool>,
    #[serde(default)]
    pub operating_mode: Option<String>,
    #[serde(default)]
    pub mode_setting: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub has_error: Option<bool>,
    /// Merged in from `GET /ai-mode`; absent when that endpoint is unavailable.
    #[serde(default)]
    pub ai_mode: Option<bool>,
}

impl HeatPumpStatus {
    /// Reconciled values carried by this snapshot.
    pub fn field_values(&self) -> Vec<(FieldId, f64)> {
        let mut values = vec![
            (FieldId::Power, if self.is_on { 1.0 } else { 0.0 }),
            (FieldId::FlowTarget, self.target_temperature),
        ];
        if let Some(offset) = self.auto_mode_offset {
            values.push((FieldId::AutoOffset, offset));
        }
        let lg_mode = self
            .op_mode
            .or_else(|| {
                self.mode_setting
                    .as_deref()
                    .and_then(LgMode::from_setting)
                    .map(|m| m.code())
            });
        if let Some(mode) = lg_mode {
            values.push((FieldId::LgMode, mode as f64));
        }
        if let Some(enabled) = self.ai_mode {
            values.push((FieldId::AiMode, if enabled { 1.0 } else { 0.0 }));
        }
        values
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThermostatConfig {
    #[serde(default)]
    pub target_temp: Option<f64>,
    #[serde(default)]
    pub eco_temp: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub hysteresis: Option<f64>,
}

/// Decoded `GET /api/v1/thermostat/status` body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThermostatStatus {
    #[serde(default)]
    pub target_temp: Option<f64>,
    #[serde(default)]
    pub active_target: Option<f64>,
    #[serde(default)]
    pub switch_state: Option<bool>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub current_temp: Option<f64>,
    #[serde(default)]
    pub outdoor_temp: Option<f64>,
    #[serde(default)]
    pub config: Option<ThermostatConfig>,
}

impl ThermostatStatus {
    pub fn target(&self) -> Option<f64> {
        self.target_temp
            .or_else(|| self.config.as_ref().and_then(|c| c.target_temp))
    }

    pub fn thermostat_mode(&self) -> Option<ThermostatMode> {
        self.mode
            .as_deref()
            .or_else(|| self.config.as_ref().and_then(|c| c.mode.as_deref()))
            .and_then(ThermostatMode::from_api_str)
    }

    pub fn field_values(&self) -> Vec<(FieldId, f64)> {
        let mut values = Vec::new();
        if let Some(target) = self.target() {
            values.push((FieldId::ThermostatTarget, target));
        }
        if let Some(mode) = self.thermostat_mode() {
            values.push((FieldId::ThermostatMode, mode.index()));
        }
        values
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    HeatPump(HeatPumpStatus),
    Thermostat(ThermostatStatus),
}

impl Snapshot {
    pub fn device(&self) -> Device {
        match self {
            Snapshot::HeatPump(_) => Device::HeatPump,
            Snapshot::Thermostat(_) => Device::Thermostat,
        }
    }

    pub fn field_values(&self) -> Vec<(FieldId, f64)> {
        match self {
            Snapshot::HeatPump(s) => s.field_values(),
            Snapshot::Thermostat(s) => s.field_values(),
        }
    }
}

/// Decoded `GET /lg-auto-offset-config` body: the LG Auto offset that
/// follows each thermostat mode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AutoOffsetMap {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub thermostat_mode_mappings: HashMap<String, f64>,
}

impl AutoOffsetMap {
    pub fn offset_for(&self, mode: ThermostatMode) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        self.thermostat_mode_mappings.get(mode.as_api_str()).copied()
    }
}

/// Derived reconciliation state of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldState {
    #[default]
    Idle,
    Interacting,
    Pending,
    InteractingPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    DispatchFailed,
    ValidationRejected,
    Unconfirmed,
}

/// One-shot user-visible message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub field: FieldId,
    pub kind: NoticeKind,
    pub message: String,
}

/// Events pushed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Render { field: FieldId, value: Option<f64> },
    StateChanged { field: FieldId, state: FieldState },
    Notice(Notice),
    Connection { device: Device, online: bool },
    Snapshot(Snapshot),
}
