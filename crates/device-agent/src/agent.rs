use crate::{AgentConfig, CommandExecutor, GatewayClient, Hardware, Result};
use device_registry::{DeviceId, HeartbeatReport, StatusReport};
use std::future::Future;
use std::net::UdpSocket;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Poll loop for one device: fetch a command, execute it, report back, and
/// send a heartbeat every `heartbeat_interval`.
pub struct Agent<H> {
    device_id: DeviceId,
    config: AgentConfig,
    client: GatewayClient,
    executor: CommandExecutor<H>,
}

impl<H: Hardware> Agent<H> {
    pub fn new(device_id: DeviceId, config: AgentConfig, hardware: H) -> Result<Self> {
        let client = GatewayClient::new(&config.backend_url, config.request_timeout)?;
        let executor = CommandExecutor::new(hardware, config.hand_timeout);
        Ok(Self {
            device_id,
            config,
            client,
            executor,
        })
    }

    pub fn executor(&self) -> &CommandExecutor<H> {
        &self.executor
    }

    /// One poll round. Returns the status that was reported, if a command
    /// was waiting. A failed status push is logged, not returned.
    pub async fn poll_once(&mut self) -> Result<Option<StatusReport>> {
        let Some(polled) = self.client.poll_command(&self.device_id).await? else {
            return Ok(None);
        };
        let report = self.executor.execute(&polled).await;
        if let Err(e) = self.client.send_status(&self.device_id, &report).await {
            warn!(device = %self.device_id, error = %e, "status push failed");
        }
        Ok(Some(report))
    }

    pub fn heartbeat(&self) -> HeartbeatReport {
        HeartbeatReport {
            timestamp: Some(crate::now_rfc3339()),
            ip_address: local_ip(),
            locked: Some(self.executor.is_locked()),
            fingerprint_count: self.executor.hardware().fingerprint_count(),
        }
    }

    /// Heartbeats are best effort; failures only show up in debug logs.
    pub async fn send_heartbeat(&self) {
        let heartbeat = self.heartbeat();
        if let Err(e) = self.client.send_heartbeat(&self.device_id, &heartbeat).await {
            debug!(device = %self.device_id, error = %e, "heartbeat failed");
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> H {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves, then release and hand back the hardware.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> H {
        info!(
            device = %self.device_id,
            backend = self.client.base_url(),
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "agent started"
        );
        tokio::pin!(shutdown);

        self.send_heartbeat().await;
        let mut last_heartbeat = Instant::now();

        loop {
            if let Err(e) = self.poll_once().await {
                warn!(device = %self.device_id, error = %e, "poll failed");
            }
            if last_heartbeat.elapsed() >= self.config.heartbeat_interval {
                self.send_heartbeat().await;
                last_heartbeat = Instant::now();
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        self.executor.hardware_mut().release();
        info!(device = %self.device_id, "agent stopped");
        self.executor.into_hardware()
    }
}

/// Address of the interface used for outbound traffic. Connecting a UDP
/// socket sends nothing; it only selects a route.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}
