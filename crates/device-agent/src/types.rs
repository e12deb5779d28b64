use device_registry::Params;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of a poll response: `{command, params}` or `{command: null}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolledCommand {
    pub command: Option<String>,
    #[serde(default)]
    pub params: Option<Params>,
}

impl PolledCommand {
    pub fn new(command: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            command: Some(command.into()),
            params,
        }
    }
}

/// Echo returned when a command is accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssuedCommand {
    pub ok: bool,
    pub command: String,
    #[serde(default)]
    pub params: Option<Params>,
}

/// Result of turning a dispenser carousel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DispenseOutcome {
    /// Segments the carousel advanced; zero when already in position.
    pub segments_rotated: u64,
    pub steps: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub backend_url: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How long to wait for a hand under the outlet after dispensing.
    pub hand_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:3000".to_string(),
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
            hand_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}
