use serde_json::{json, Value};

use crate::reconciler::Intent;
use crate::types::{
    AutoOffsetMap, Device, FieldId, HeatPumpStatus, LgMode, Snapshot, ThermostatMode,
    ThermostatStatus,
};
use crate::{Error, Result};

pub const HEAT_PUMP_STATUS_PATH: &str = "/status";
pub const THERMOSTAT_STATUS_PATH: &str = "/api/v1/thermostat/status";

pub const POWER_PATH: &str = "/power";
pub const SETPOINT_PATH: &str = "/setpoint";
pub const AUTO_MODE_OFFSET_PATH: &str = "/auto-mode-offset";
pub const LG_MODE_PATH: &str = "/lg-mode";
pub const AI_MODE_PATH: &str = "/ai-mode";
pub const AUTO_OFFSET_CONFIG_PATH: &str = "/lg-auto-offset-config";
pub const THERMOSTAT_CONFIG_PATH: &str = "/api/v1/thermostat/config";

pub fn status_path(device: Device) -> &'static str {
    match device {
        Device::HeatPump => HEAT_PUMP_STATUS_PATH,
        Device::Thermostat => THERMOSTAT_STATUS_PATH,
    }
}

/// An outbound command: one POST to one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub field: FieldId,
    pub device: Device,
    pub path: &'static str,
    pub body: Value,
}

pub fn command_for(intent: Intent) -> Result<CommandRequest> {
    let Intent { field, value } = intent;
    let (path, body) = match field {
        FieldId::Power => (POWER_PATH, power_data(value != 0.0)),
        FieldId::FlowTarget => (SETPOINT_PATH, setpoint_data(value)),
        FieldId::AutoOffset => (AUTO_MODE_OFFSET_PATH, offset_data(value.round() as i64)),
        FieldId::LgMode => {
            let mode = LgMode::from_code(value as i64).ok_or_else(|| Error::Validation {
                field,
                reason: format!("unknown LG mode code {value}"),
            })?;
            (LG_MODE_PATH, lg_mode_data(mode))
        }
        FieldId::AiMode => (AI_MODE_PATH, ai_mode_data(value != 0.0)),
        FieldId::ThermostatTarget => (THERMOSTAT_CONFIG_PATH, thermostat_target_data(value)),
        FieldId::ThermostatMode => {
            let mode = ThermostatMode::from_index(value).ok_or_else(|| Error::Validation {
                field,
                reason: format!("unknown thermostat mode index {value}"),
            })?;
            (THERMOSTAT_CONFIG_PATH, thermostat_mode_data(mode))
        }
    };
    Ok(CommandRequest {
        field,
        device: field.device(),
        path,
        body,
    })
}

pub fn power_data(on: bool) -> Value {
    json!({ "power_on": on })
}

pub fn setpoint_data(temperature: f64) -> Value {
    json!({ "temperature": temperature })
}

pub fn offset_data(offset: i64) -> Value {
    json!({ "offset": offset })
}

pub fn lg_mode_data(mode: LgMode) -> Value {
    json!({ "mode": mode.code() })
}

pub fn ai_mode_data(enabled: bool) -> Value {
    json!({ "enabled": enabled })
}

pub fn thermostat_target_data(target: f64) -> Value {
    json!({ "target_temp": target })
}

pub fn thermostat_mode_data(mode: ThermostatMode) -> Value {
    json!({ "mode": mode.as_api_str() })
}

/// A value the service chose on our behalf and echoed in its ack, to be
/// adopted as pending intent on another field.
pub fn echoed_default(field: FieldId, ack: &Value) -> Option<(FieldId, f64)> {
    match field {
        FieldId::LgMode => ack
            .get("default_temperature")
            .and_then(|v| v.as_f64())
            .map(|t| (FieldId::FlowTarget, t)),
        _ => None,
    }
}

pub fn decode_snapshot(device: Device, body: Value) -> Result<Snapshot> {
    Ok(match device {
        Device::HeatPump => Snapshot::HeatPump(serde_json::from_value::<HeatPumpStatus>(body)?),
        Device::Thermostat => Snapshot::Thermostat(serde_json::from_value::<ThermostatStatus>(body)?),
    })
}

/// Fold the `GET /ai-mode` body into a heat pump status body so both are
/// decoded, logged and diffed as one snapshot.
pub fn merge_ai_mode(status: &mut Value, ai_mode: &Value) {
    if let (Some(obj), Some(enabled)) = (status.as_object_mut(), ai_mode.get("enabled")) {
        obj.insert("ai_mode".to_string(), enabled.clone());
    }
}

pub fn decode_auto_offset_map(body: Value) -> Result<AutoOffsetMap> {
    Ok(serde_json::from_value(body)?)
}

/// Decode a response body. An empty body decodes to `null`.
pub fn parse_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}
