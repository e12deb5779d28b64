use crate::{CommandKind, CommandParams, Params, RegistryError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Non-empty device identifier, e.g. `pi-001`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(RegistryError::MissingField("device_id"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl FromStr for DeviceId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single outstanding instruction queued for a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PendingCommandWire")]
pub struct PendingCommand {
    pub command: CommandKind,
    pub params: CommandParams,
    #[serde(rename = "issuedAt", with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

// Params are re-validated against the command kind when read back.
#[derive(Deserialize)]
struct PendingCommandWire {
    command: String,
    #[serde(default)]
    params: Option<Params>,
    #[serde(rename = "issuedAt", with = "time::serde::rfc3339")]
    issued_at: OffsetDateTime,
}

impl TryFrom<PendingCommandWire> for PendingCommand {
    type Error = RegistryError;

    fn try_from(wire: PendingCommandWire) -> Result<Self> {
        let command: CommandKind = wire.command.parse()?;
        Ok(Self {
            command,
            params: CommandParams::extract(command, wire.params)?,
            issued_at: wire.issued_at,
        })
    }
}

/// Status report body as pushed by a device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub status_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Params>,
}

impl StatusReport {
    pub fn new(status_type: impl Into<String>) -> Self {
        Self {
            status_type: status_type.into(),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_data(mut self, data: Params) -> Self {
        self.data = Some(data);
        self
    }
}

/// Most recent status report, stamped at ingestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub status_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Params>,
    #[serde(rename = "receivedAt", with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

/// Heartbeat body as pushed by a device. Every field is optional, and a field
/// that does not fit its type (a sensor reporting `-1` fingerprints, say) is
/// dropped rather than failing the heartbeat.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub fingerprint_count: Option<u32>,
}

fn lenient<'de, D, T>(deserializer: D) -> core::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Most recent heartbeat, stamped at ingestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceHeartbeat {
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_count: Option<u32>,
    #[serde(rename = "receivedAt", with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub pending_command: Option<PendingCommand>,
    pub last_status: Option<DeviceStatus>,
    pub last_heartbeat: Option<DeviceHeartbeat>,
}

impl DeviceState {
    pub fn is_empty(&self) -> bool {
        self.pending_command.is_none() && self.last_status.is_none() && self.last_heartbeat.is_none()
    }
}

/// Snapshot of one device as served to the operator view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: DeviceId,
    #[serde(flatten)]
    pub state: DeviceState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_id_rejects_empty() {
        assert_eq!(
            DeviceId::new(""),
            Err(RegistryError::MissingField("device_id"))
        );
        assert_eq!(DeviceId::new("pi-001").unwrap().as_str(), "pi-001");
        assert!(serde_json::from_value::<DeviceId>(json!("")).is_err());
    }

    #[test]
    fn test_state_uses_camel_case_keys() {
        let value = serde_json::to_value(DeviceState::default()).unwrap();
        assert_eq!(
            value,
            json!({"pendingCommand": null, "lastStatus": null, "lastHeartbeat": null})
        );
    }

    #[test]
    fn test_pending_command_wire_shape() {
        let pending = PendingCommand {
            command: CommandKind::Dispense,
            params: CommandParams::extract(
                CommandKind::Dispense,
                json!({"motor_id": 1, "segment": 4}).as_object().cloned(),
            )
            .unwrap(),
            issued_at: OffsetDateTime::UNIX_EPOCH,
        };
        let value = serde_json::to_value(&pending).unwrap();
        assert_eq!(
            value,
            json!({
                "command": "dispense",
                "params": {"motor_id": 1, "segment": 4},
                "issuedAt": "1970-01-01T00:00:00Z"
            })
        );
        let back: PendingCommand = serde_json::from_value(value).unwrap();
        assert_eq!(back, pending);
    }

    #[test]
    fn test_pending_command_read_back_is_validated() {
        let bad = json!({
            "command": "dispense",
            "params": {"motor_id": -1, "segment": 0},
            "issuedAt": "1970-01-01T00:00:00Z"
        });
        assert!(serde_json::from_value::<PendingCommand>(bad).is_err());

        let unknown = json!({"command": "reboot", "issuedAt": "1970-01-01T00:00:00Z"});
        assert!(serde_json::from_value::<PendingCommand>(unknown).is_err());
    }

    #[test]
    fn test_heartbeat_drops_ill_typed_fields() {
        let hb: HeartbeatReport = serde_json::from_value(json!({
            "ip_address": "10.0.0.7",
            "locked": "yes",
            "fingerprint_count": -1,
            "timestamp": null
        }))
        .unwrap();
        assert_eq!(
            hb,
            HeartbeatReport {
                ip_address: Some("10.0.0.7".to_string()),
                ..HeartbeatReport::default()
            }
        );

        let hb: HeartbeatReport =
            serde_json::from_value(json!({"fingerprint_count": 3, "locked": false})).unwrap();
        assert_eq!(hb.fingerprint_count, Some(3));
        assert_eq!(hb.locked, Some(false));
    }

    #[test]
    fn test_status_report_tolerates_missing_fields() {
        let report: StatusReport = serde_json::from_value(json!({
            "device_id": "pi-001",
            "timestamp": "2024-05-01T10:00:00"
        }))
        .unwrap();
        assert_eq!(report.status_type, "");
        assert_eq!(report.timestamp.as_deref(), Some("2024-05-01T10:00:00"));
        assert_eq!(report.data, None);
    }
}
