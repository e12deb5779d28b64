use crate::{Hardware, PolledCommand};
use device_registry::{CommandKind, DispenseParams, Params, StatusReport};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

/// Device-side state machine: holds the lock flag and turns each polled
/// command into hardware calls plus exactly one status report.
pub struct CommandExecutor<H> {
    hardware: H,
    locked: bool,
    hand_timeout: Duration,
}

impl<H: Hardware> CommandExecutor<H> {
    /// Devices boot locked.
    pub fn new(hardware: H, hand_timeout: Duration) -> Self {
        Self {
            hardware,
            locked: true,
            hand_timeout,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn into_hardware(self) -> H {
        self.hardware
    }

    pub async fn execute(&mut self, polled: &PolledCommand) -> StatusReport {
        let name = polled.command.as_deref().unwrap_or_default();
        info!(command = name, "executing");

        let kind = match name.parse::<CommandKind>() {
            Ok(kind) => kind,
            Err(_) => {
                warn!(command = name, "unknown command");
                return report("error", json!({ "message": format!("Unknown command: {name}") }));
            }
        };

        match kind {
            CommandKind::Unlock => self.unlock(),
            CommandKind::Lock => {
                self.locked = true;
                report("locked", json!({ "message": "Device locked" }))
            }
            CommandKind::Dispense => self.dispense(polled.params.clone()).await,
            CommandKind::RegisterFingerprint => match self.hardware.enroll_fingerprint() {
                Ok(user_id) => report(
                    "fingerprint_registered",
                    json!({
                        "user_id": user_id,
                        "message": format!("Fingerprint registered successfully (ID: {user_id})"),
                    }),
                ),
                Err(e) => report("registration_failed", json!({ "message": e.to_string() })),
            },
            CommandKind::CheckHand => {
                let detected = self.hardware.is_hand_detected();
                report("hand_check", json!({ "detected": detected }))
            }
        }
    }

    fn unlock(&mut self) -> StatusReport {
        match self.hardware.verify_fingerprint() {
            Ok(user_id) => {
                self.locked = false;
                info!(user_id, "unlocked");
                report(
                    "unlocked",
                    json!({ "user_id": user_id, "message": "Fingerprint verified" }),
                )
            }
            Err(e) => {
                warn!(error = %e, "unlock failed");
                report("unlock_failed", json!({ "message": e.to_string() }))
            }
        }
    }

    async fn dispense(&mut self, params: Option<Params>) -> StatusReport {
        if self.locked {
            return report("error", json!({ "message": "Device is locked" }));
        }
        let target = match DispenseParams::from_params(&params.unwrap_or_default()) {
            Ok(target) => target,
            Err(e) => return report("error", json!({ "message": e.to_string() })),
        };

        if let Err(e) = self.hardware.dispense(target) {
            warn!(error = %e, "dispense failed");
            return report("error", json!({ "message": e.to_string() }));
        }
        info!(motor_id = target.motor_id, segment = target.segment, "dispensed, waiting for hand");

        let taken = self.hardware.wait_for_hand(self.hand_timeout).await;
        if !taken {
            warn!("no hand detected");
        }
        report(
            "pill_taken",
            json!({
                "motor_id": target.motor_id,
                "segment": target.segment,
                "taken": taken,
            }),
        )
    }
}

fn report(status_type: &str, data: Value) -> StatusReport {
    let report = StatusReport::new(status_type).with_timestamp(crate::now_rfc3339());
    match data {
        Value::Object(map) => report.with_data(map),
        _ => report,
    }
}
