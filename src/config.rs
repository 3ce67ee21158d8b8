//! TOML configuration.
//!
//! ```toml
//! [heat_pump]
//! url = "http://192.168.2.10:8000"
//! poll_interval_ms = 2000
//!
//! [thermostat]
//! url = "http://192.168.2.11:8001"
//! poll_interval_ms = 10000
//!
//! [timing]
//! debounce_ms = 2000
//!
//! [fields.thermostat_target]
//! min = 18.0
//! max = 24.0
//! step = 0.5
//! tolerance = 0.1
//!
//! [message_log]
//! path = "control.ndjson"
//! mode = "diffed"
//! ```
//!
//! Every section is optional and falls back to the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::field::{FieldSpec, Tolerance};
use crate::logger::MessageLogMode;
use crate::reconciler::ReconcilerTiming;
use crate::types::{FieldId, LgMode, ThermostatMode};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_heat_pump", deserialize_with = "heat_pump_section")]
    pub heat_pump: DeviceConfig,
    #[serde(default = "default_thermostat", deserialize_with = "thermostat_section")]
    pub thermostat: DeviceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    #[serde(default)]
    pub message_log: Option<MessageLogConfig>,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub url: String,
    pub poll_interval_ms: u64,
}

/// A device section as written; missing keys take that device's defaults.
#[derive(Deserialize)]
struct DeviceSection {
    url: Option<String>,
    poll_interval_ms: Option<u64>,
}

impl DeviceSection {
    fn or(self, defaults: DeviceConfig) -> DeviceConfig {
        DeviceConfig {
            url: self.url.unwrap_or(defaults.url),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        }
    }
}

fn heat_pump_section<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DeviceConfig, D::Error> {
    DeviceSection::deserialize(d).map(|s| s.or(default_heat_pump()))
}

fn thermostat_section<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DeviceConfig, D::Error> {
    DeviceSection::deserialize(d).map(|s| s.or(default_thermostat()))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heat_pump: default_heat_pump(),
            thermostat: default_thermostat(),
            timing: TimingConfig::default(),
            fields: FieldsConfig::default(),
            message_log: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_pending_timeout_ms")]
    pub pending_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            confirm_poll_ms: default_confirm_poll_ms(),
            debounce_ms: default_debounce_ms(),
            pending_timeout_ms: default_pending_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn reconciler(&self) -> ReconcilerTiming {
        ReconcilerTiming {
            grace: Duration::from_millis(self.grace_ms),
            debounce: Duration::from_millis(self.debounce_ms),
            pending_timeout: Duration::from_millis(self.pending_timeout_ms),
        }
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Range, step and catch-up tolerance of a continuous control.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RangeConfig {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    /// Omit for exact matching.
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl RangeConfig {
    pub fn spec(&self) -> FieldSpec {
        let tolerance = match self.tolerance {
            Some(eps) if eps > 0.0 => Tolerance::Within(eps),
            _ => Tolerance::Exact,
        };
        FieldSpec::continuous(self.min, self.max, self.step, tolerance)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldsConfig {
    #[serde(default = "default_flow_target")]
    pub flow_target: RangeConfig,
    #[serde(default = "default_auto_offset")]
    pub auto_offset: RangeConfig,
    #[serde(default = "default_thermostat_target")]
    pub thermostat_target: RangeConfig,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            flow_target: default_flow_target(),
            auto_offset: default_auto_offset(),
            thermostat_target: default_thermostat_target(),
        }
    }
}

impl FieldsConfig {
    /// Specs for every controllable field.
    pub fn specs(&self) -> Vec<(FieldId, FieldSpec)> {
        vec![
            (FieldId::Power, FieldSpec::discrete([0.0, 1.0])),
            (FieldId::FlowTarget, self.flow_target.spec()),
            (FieldId::AutoOffset, self.auto_offset.spec()),
            (
                FieldId::LgMode,
                FieldSpec::discrete([LgMode::Auto.code() as f64, LgMode::Heating.code() as f64]),
            ),
            (FieldId::AiMode, FieldSpec::discrete([0.0, 1.0])),
            (FieldId::ThermostatTarget, self.thermostat_target.spec()),
            (
                FieldId::ThermostatMode,
                FieldSpec::discrete(
                    ThermostatMode::ALL
                        .iter()
                        .map(|m| m.index())
                        .collect::<Vec<_>>(),
                ),
            ),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageLogConfig {
    pub path: String,
    #[serde(default = "default_log_mode")]
    pub mode: MessageLogMode,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, device) in [("heat_pump", &self.heat_pump), ("thermostat", &self.thermostat)] {
            if device.url.is_empty() {
                return Err(Error::Config(format!("{name}.url is empty")));
            }
            if device.poll_interval_ms == 0 {
                return Err(Error::Config(format!("{name}.poll_interval_ms must be positive")));
            }
        }
        for (name, range) in [
            ("flow_target", &self.fields.flow_target),
            ("auto_offset", &self.fields.auto_offset),
            ("thermostat_target", &self.fields.thermostat_target),
        ] {
            if !(range.min < range.max) {
                return Err(Error::Config(format!(
                    "fields.{name}: min {} must be below max {}",
                    range.min, range.max
                )));
            }
            if !(range.step > 0.0) {
                return Err(Error::Config(format!("fields.{name}: step must be positive")));
            }
        }
        Ok(())
    }
}

fn default_heat_pump() -> DeviceConfig {
    DeviceConfig {
        url: "http://127.0.0.1:8000".to_string(),
        poll_interval_ms: 2000,
    }
}

fn default_thermostat() -> DeviceConfig {
    DeviceConfig {
        url: "http://127.0.0.1:8001".to_string(),
        poll_interval_ms: 10000,
    }
}

fn default_grace_ms() -> u64 {
    100
}

fn default_confirm_poll_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_pending_timeout_ms() -> u64 {
    10000
}

fn default_request_timeout_ms() -> u64 {
    10000
}

fn default_flow_target() -> RangeConfig {
    RangeConfig {
        min: 20.0,
        max: 60.0,
        step: 0.5,
        tolerance: Some(0.1),
    }
}

fn default_auto_offset() -> RangeConfig {
    RangeConfig {
        min: -5.0,
        max: 5.0,
        step: 1.0,
        tolerance: None,
    }
}

fn default_thermostat_target() -> RangeConfig {
    RangeConfig {
        min: 18.0,
        max: 24.0,
        step: 0.5,
        tolerance: Some(0.1),
    }
}

fn default_log_mode() -> MessageLogMode {
    MessageLogMode::Diffed
}
