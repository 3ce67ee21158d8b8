mod client;
mod config;
mod controller;
mod error;
mod field;
mod logger;
pub mod protocol;
mod reconciler;
mod timer;
mod types;

pub use client::DeviceClient;
pub use config::{Config, DeviceConfig, FieldsConfig, MessageLogConfig, RangeConfig, TimingConfig};
pub use controller::{Controller, ControllerBuilder, ControllerHandle, Gesture};
pub use error::{Error, Result};
pub use field::{ControlField, DebounceSession, FieldKind, FieldSpec, Tolerance};
pub use logger::MessageLogMode;
pub use reconciler::{Intent, Reconciler, ReconcilerTiming, SnapshotOutcome, TimerKey};
pub use timer::{TimerId, Timers};
pub use types::*;
