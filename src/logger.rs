use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::protocol::CommandRequest;
use crate::types::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLogMode {
    Full,
    Diffed,
}

/// NDJSON journal of commands, their outcomes and poll snapshots.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: HashMap<Device, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous: HashMap::new(),
        })
    }

    pub fn log_command(&mut self, id: Uuid, command: &CommandRequest) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "id": id.to_string(),
            "device": command.device.name(),
            "field": command.field.name(),
            "path": command.path,
            "body": command.body,
        });
        self.write_line(&entry);
    }

    pub fn log_ack(&mut self, id: Uuid, ack: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "ack",
            "id": id.to_string(),
            "body": ack,
        });
        self.write_line(&entry);
    }

    pub fn log_failure(&mut self, id: Uuid, error: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "fail",
            "id": id.to_string(),
            "error": error,
        });
        self.write_line(&entry);
    }

    pub fn log_poll(&mut self, device: Device, body: &Value) {
        let mut entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "poll",
            "device": device.name(),
        });

        match (self.mode, self.previous.get(&device)) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let mut changes = Vec::new();
                changed_paths(prev, body, "", &mut changes);
                entry["changes"] = Value::Array(changes);
            }
            (MessageLogMode::Diffed, None) => {
                entry["full"] = Value::Bool(true);
                entry["body"] = body.clone();
            }
            (MessageLogMode::Full, _) => {
                entry["body"] = body.clone();
            }
        }
        self.previous.insert(device, body.clone());
        self.write_line(&entry);
    }

    pub fn log_poll_failure(&mut self, device: Device, error: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "poll",
            "device": device.name(),
            "error": error,
        });
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

/// Leaf-level differences between two status bodies, as
/// `{"path", "old", "new"}` objects with dotted paths. Keys missing from
/// `current` are reported with `new: null`.
fn changed_paths(previous: &Value, current: &Value, prefix: &str, out: &mut Vec<Value>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match (previous, current) {
        (Value::Object(prev), Value::Object(curr)) => {
            for (key, new) in curr {
                let old = prev.get(key).unwrap_or(&Value::Null);
                changed_paths(old, new, &join(key), out);
            }
            for (key, old) in prev {
                if !curr.contains_key(key) {
                    out.push(json!({ "path": join(key), "old": old, "new": Value::Null }));
                }
            }
        }
        (Value::Null, Value::Object(curr)) => {
            for (key, new) in curr {
                changed_paths(&Value::Null, new, &join(key), out);
            }
        }
        (old, new) if old != new => {
            out.push(json!({ "path": prefix, "old": old, "new": new }));
        }
        _ => {}
    }
}
