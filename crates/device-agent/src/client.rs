//! HTTP client for the dispenser gateway.

use crate::{AgentError, IssuedCommand, PolledCommand, Result};
use device_registry::{DeviceId, DeviceSnapshot, HeartbeatReport, Params, StatusReport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, device_id: &DeviceId, leaf: &str) -> String {
        format!("{}/api/devices/{}/{}", self.base_url, device_id, leaf)
    }

    /// Fetch and consume the pending command, if any.
    pub async fn poll_command(&self, device_id: &DeviceId) -> Result<Option<PolledCommand>> {
        let resp = self.client.get(self.url(device_id, "commands")).send().await?;
        let polled: PolledCommand = decode(resp).await?;
        Ok(polled.command.is_some().then_some(polled))
    }

    pub async fn send_status(&self, device_id: &DeviceId, report: &StatusReport) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            device_id: &'a DeviceId,
            #[serde(flatten)]
            report: &'a StatusReport,
        }
        let body = Body { device_id, report };
        let resp = self
            .client
            .post(self.url(device_id, "status"))
            .json(&body)
            .send()
            .await?;
        decode::<serde_json::Value>(resp).await?;
        debug!(device = %device_id, status = %report.status_type, "status sent");
        Ok(())
    }

    pub async fn send_heartbeat(
        &self,
        device_id: &DeviceId,
        heartbeat: &HeartbeatReport,
    ) -> Result<()> {
        let resp = self
            .client
            .post(self.url(device_id, "heartbeat"))
            .json(heartbeat)
            .send()
            .await?;
        decode::<serde_json::Value>(resp).await?;
        Ok(())
    }

    pub async fn issue_command(
        &self,
        device_id: &DeviceId,
        command: &str,
        params: Option<Params>,
    ) -> Result<IssuedCommand> {
        #[derive(Serialize)]
        struct Body<'a> {
            command: &'a str,
            params: Option<Params>,
        }
        let resp = self
            .client
            .post(self.url(device_id, "commands"))
            .json(&Body { command, params })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn snapshot(&self, device_id: &DeviceId) -> Result<DeviceSnapshot> {
        let resp = self.client.get(self.url(device_id, "state")).send().await?;
        decode(resp).await
    }
}

/// Decode a success body, or surface the gateway's `{error}` message.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            error: String,
        }
        let text = resp.text().await?;
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        return Err(AgentError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json().await?)
}
