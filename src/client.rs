use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, trace};

use crate::protocol::{
    decode_auto_offset_map, decode_snapshot, merge_ai_mode, parse_body, status_path,
    CommandRequest, AI_MODE_PATH, AUTO_OFFSET_CONFIG_PATH,
};
use crate::types::{AutoOffsetMap, Device, Snapshot};
use crate::Result;

/// HTTP transport shared by the poller and the command dispatcher. Cheap
/// to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    heat_pump_url: String,
    thermostat_url: String,
}

impl DeviceClient {
    pub fn new(
        heat_pump_url: impl Into<String>,
        thermostat_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            heat_pump_url: trim_base(heat_pump_url.into()),
            thermostat_url: trim_base(thermostat_url.into()),
        })
    }

    pub fn base_url(&self, device: Device) -> &str {
        match device {
            Device::HeatPump => &self.heat_pump_url,
            Device::Thermostat => &self.thermostat_url,
        }
    }

    /// Any non-success status, transport error or undecodable body is an
    /// error.
    pub async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let mut req = self.http.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?.error_for_status()?;
        let text = resp.text().await?;
        parse_body(&text)
    }

    /// Raw status body. For the heat pump the AI mode state is folded in
    /// when `/ai-mode` answers; the service returns 503 when its adaptive
    /// controller is not running.
    pub async fn fetch_status(&self, device: Device) -> Result<Value> {
        let url = format!("{}{}", self.base_url(device), status_path(device));
        trace!(url = %url, "polling status");
        let mut status = self.request(Method::GET, &url, None).await?;

        if device == Device::HeatPump {
            let url = format!("{}{}", self.heat_pump_url, AI_MODE_PATH);
            match self.request(Method::GET, &url, None).await {
                Ok(ai_mode) => merge_ai_mode(&mut status, &ai_mode),
                Err(e) => trace!("AI mode unavailable: {e}"),
            }
        }
        Ok(status)
    }

    pub async fn fetch_auto_offset_map(&self) -> Result<AutoOffsetMap> {
        let url = format!("{}{}", self.heat_pump_url, AUTO_OFFSET_CONFIG_PATH);
        let body = self.request(Method::GET, &url, None).await?;
        decode_auto_offset_map(body)
    }

    pub async fn poll(&self, device: Device) -> Result<Snapshot> {
        let body = self.fetch_status(device).await?;
        decode_snapshot(device, body)
    }

    pub async fn dispatch(&self, command: &CommandRequest) -> Result<Value> {
        let url = format!("{}{}", self.base_url(command.device), command.path);
        debug!(url = %url, field = %command.field, body = %command.body, "sending command");
        self.request(Method::POST, &url, Some(&command.body)).await
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
