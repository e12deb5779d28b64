use crate::{
    CommandKind, CommandParams, DeviceHeartbeat, DeviceId, DeviceMetrics, DeviceState,
    DeviceStatus, HeartbeatReport, Params, PendingCommand, RegistryError, Result, StatusReport,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

type Slot = Arc<Mutex<DeviceState>>;

/// Process-wide owner of every device's state.
///
/// Entries are created on first reference and never removed. Each entry sits
/// behind its own mutex, so operations on different devices do not contend;
/// the outer lock only guards the map itself while an entry is inserted.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Slot>>,
    metrics: Option<DeviceMetrics>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: DeviceMetrics) -> Self {
        Self {
            devices: RwLock::default(),
            metrics: Some(metrics),
        }
    }

    /// Queue `command` for the device, replacing any undelivered one.
    ///
    /// The device entry exists afterwards even when the command is rejected.
    /// A rejected command leaves the current pending command in place.
    pub fn issue_command(
        &self,
        device_id: &DeviceId,
        command: &str,
        params: Option<Params>,
    ) -> Result<PendingCommand> {
        let slot = self.entry(device_id);
        let kind = command.parse::<CommandKind>().map_err(|e| self.rejected(device_id, e))?;
        self.store(device_id, &slot, kind, params)
    }

    /// Typed form of [`DeviceRegistry::issue_command`].
    pub fn issue(
        &self,
        device_id: &DeviceId,
        kind: CommandKind,
        params: Option<Params>,
    ) -> Result<PendingCommand> {
        let slot = self.entry(device_id);
        self.store(device_id, &slot, kind, params)
    }

    fn store(
        &self,
        device_id: &DeviceId,
        slot: &Slot,
        kind: CommandKind,
        params: Option<Params>,
    ) -> Result<PendingCommand> {
        let params =
            CommandParams::extract(kind, params).map_err(|e| self.rejected(device_id, e))?;
        let pending = PendingCommand {
            command: kind,
            params,
            issued_at: OffsetDateTime::now_utc(),
        };

        let replaced = lock(slot).pending_command.replace(pending.clone());

        if let Some(old) = replaced {
            debug!(device = %device_id, dropped = %old.command, "overwrote undelivered command");
            self.count(|m| m.commands_overwritten.inc());
        }
        self.count(|m| m.commands_issued.inc());
        info!(device = %device_id, command = %kind, "command issued");
        Ok(pending)
    }

    /// Hand the pending command to the caller and clear it in the same
    /// critical section. Concurrent pollers see it at most once between them.
    pub fn consume_pending_command(&self, device_id: &DeviceId) -> Option<PendingCommand> {
        let slot = self.entry(device_id);
        let taken = lock(&slot).pending_command.take();
        if let Some(cmd) = &taken {
            self.count(|m| m.commands_delivered.inc());
            info!(device = %device_id, command = %cmd.command, "command delivered");
        }
        taken
    }

    /// Diagnostic read of the pending slot; never clears it.
    pub fn peek_pending_command(&self, device_id: &DeviceId) -> Option<PendingCommand> {
        let slot = self.entry(device_id);
        let pending = lock(&slot).pending_command.clone();
        pending
    }

    pub fn record_status(&self, device_id: &DeviceId, report: StatusReport) -> Result<DeviceStatus> {
        let slot = self.entry(device_id);
        if report.status_type.is_empty() {
            return Err(self.rejected(device_id, RegistryError::MissingField("status_type")));
        }
        let status = DeviceStatus {
            device_id: device_id.clone(),
            status_type: report.status_type,
            timestamp: report.timestamp,
            data: report.data,
            received_at: OffsetDateTime::now_utc(),
        };

        lock(&slot).last_status = Some(status.clone());

        self.count(|m| m.status_reports.inc());
        debug!(device = %device_id, status = %status.status_type, "status recorded");
        Ok(status)
    }

    pub fn record_heartbeat(&self, device_id: &DeviceId, report: HeartbeatReport) -> DeviceHeartbeat {
        let heartbeat = DeviceHeartbeat {
            device_id: device_id.clone(),
            timestamp: report.timestamp,
            ip_address: report.ip_address,
            locked: report.locked,
            fingerprint_count: report.fingerprint_count,
            received_at: OffsetDateTime::now_utc(),
        };

        let slot = self.entry(device_id);
        lock(&slot).last_heartbeat = Some(heartbeat.clone());

        self.count(|m| m.heartbeats.inc());
        debug!(device = %device_id, "heartbeat recorded");
        heartbeat
    }

    /// Copy of the device's state. Leaves the pending slot untouched.
    pub fn snapshot(&self, device_id: &DeviceId) -> DeviceState {
        let slot = self.entry(device_id);
        let state = lock(&slot).clone();
        state
    }

    pub fn device_count(&self) -> usize {
        read(&self.devices).len()
    }

    /// Existing slot, or a fresh empty one inserted under the write lock.
    /// Racing first accesses resolve to the same slot.
    fn entry(&self, device_id: &DeviceId) -> Slot {
        if let Some(slot) = read(&self.devices).get(device_id) {
            return Arc::clone(slot);
        }

        let mut devices = write(&self.devices);
        let before = devices.len();
        let slot = Arc::clone(devices.entry(device_id.clone()).or_default());
        if devices.len() > before {
            let tracked = devices.len();
            drop(devices);
            self.count(|m| m.devices_tracked.set(tracked as i64));
            debug!(device = %device_id, tracked, "tracking new device");
        }
        slot
    }

    fn rejected(&self, device_id: &DeviceId, err: RegistryError) -> RegistryError {
        self.count(|m| m.requests_rejected.inc());
        warn!(device = %device_id, error = %err, "request rejected");
        err
    }

    fn count(&self, f: impl FnOnce(&DeviceMetrics)) {
        if let Some(m) = &self.metrics {
            f(m);
        }
    }
}

// Device state is plain data; a panic elsewhere cannot leave it half-written,
// so a poisoned lock is still safe to use.
fn lock(slot: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DispenseParams, MetricsHub};
    use serde_json::{json, Value};
    use std::sync::Barrier;
    use std::thread;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    fn obj(v: Value) -> Option<Params> {
        v.as_object().cloned()
    }

    #[test]
    fn test_unseen_device_snapshot_is_empty() {
        let reg = DeviceRegistry::new();
        let state = reg.snapshot(&id("never-seen"));
        assert!(state.is_empty());
        assert_eq!(state.pending_command, None);
        assert_eq!(state.last_status, None);
        assert_eq!(state.last_heartbeat, None);
        assert_eq!(reg.device_count(), 1);
    }

    #[test]
    fn test_issue_then_consume_once() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");
        reg.issue_command(&dev, "unlock", None).unwrap();

        let cmd = reg.consume_pending_command(&dev).unwrap();
        assert_eq!(cmd.command, CommandKind::Unlock);
        assert_eq!(reg.consume_pending_command(&dev), None);
    }

    #[test]
    fn test_consume_with_nothing_pending() {
        let reg = DeviceRegistry::new();
        assert_eq!(reg.consume_pending_command(&id("pi-001")), None);
    }

    #[test]
    fn test_overwrite_keeps_only_latest() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");
        reg.issue_command(&dev, "lock", None).unwrap();
        reg.issue_command(&dev, "check_hand", None).unwrap();

        let cmd = reg.consume_pending_command(&dev).unwrap();
        assert_eq!(cmd.command, CommandKind::CheckHand);
        assert_eq!(reg.consume_pending_command(&dev), None);
    }

    #[test]
    fn test_dispense_validation() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");

        let err = reg
            .issue_command(&dev, "dispense", obj(json!({"motor_id": -1, "segment": 0})))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidParams {
                command: CommandKind::Dispense,
                field: "motor_id"
            }
        );
        assert_eq!(reg.peek_pending_command(&dev), None);

        reg.issue_command(&dev, "dispense", obj(json!({"motor_id": 2, "segment": 3})))
            .unwrap();
        let cmd = reg.consume_pending_command(&dev).unwrap();
        assert_eq!(cmd.command, CommandKind::Dispense);
        assert_eq!(
            cmd.params.dispense(),
            Some(DispenseParams {
                motor_id: 2,
                segment: 3
            })
        );
        assert_eq!(
            serde_json::to_value(&cmd.params).unwrap(),
            json!({"motor_id": 2, "segment": 3})
        );
    }

    #[test]
    fn test_rejected_command_leaves_pending_untouched() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");
        let issued = reg.issue_command(&dev, "lock", None).unwrap();

        let err = reg.issue_command(&dev, "reboot", None).unwrap_err();
        assert_eq!(err, RegistryError::UnknownCommand("reboot".to_string()));
        assert!(reg
            .issue_command(&dev, "dispense", obj(json!({"motor_id": 1})))
            .is_err());

        assert_eq!(reg.peek_pending_command(&dev), Some(issued));
    }

    #[test]
    fn test_rejected_requests_still_track_device() {
        let reg = DeviceRegistry::new();
        assert!(reg.issue_command(&id("fresh"), "reboot", None).is_err());
        assert_eq!(reg.device_count(), 1);

        assert!(reg
            .issue_command(&id("other"), "dispense", obj(json!({"segment": 1})))
            .is_err());
        assert!(reg.record_status(&id("third"), StatusReport::default()).is_err());
        assert_eq!(reg.device_count(), 3);
        assert!(reg.snapshot(&id("fresh")).is_empty());
    }

    #[test]
    fn test_peek_does_not_clear() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");
        let issued = reg.issue_command(&dev, "register_fingerprint", None).unwrap();

        for _ in 0..5 {
            assert_eq!(reg.peek_pending_command(&dev), Some(issued.clone()));
        }
        assert_eq!(reg.snapshot(&dev).pending_command, Some(issued.clone()));
        assert_eq!(reg.consume_pending_command(&dev), Some(issued));
        assert_eq!(reg.peek_pending_command(&dev), None);
    }

    #[test]
    fn test_status_last_write_wins() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");
        reg.record_status(&dev, StatusReport::new("idle")).unwrap();
        reg.record_status(&dev, StatusReport::new("busy")).unwrap();

        let status = reg.snapshot(&dev).last_status.unwrap();
        assert_eq!(status.status_type, "busy");
        assert_eq!(status.device_id, dev);
    }

    #[test]
    fn test_status_requires_type() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");
        reg.record_status(&dev, StatusReport::new("idle")).unwrap();

        let err = reg.record_status(&dev, StatusReport::default()).unwrap_err();
        assert_eq!(err, RegistryError::MissingField("status_type"));
        assert_eq!(err.to_string(), "status_type is required");
        assert_eq!(reg.snapshot(&dev).last_status.unwrap().status_type, "idle");
    }

    #[test]
    fn test_heartbeat_replaces_previous() {
        let reg = DeviceRegistry::new();
        let dev = id("pi-001");
        reg.record_heartbeat(
            &dev,
            HeartbeatReport {
                locked: Some(true),
                fingerprint_count: Some(2),
                ..HeartbeatReport::default()
            },
        );
        reg.record_heartbeat(
            &dev,
            HeartbeatReport {
                ip_address: Some("10.0.0.7".to_string()),
                ..HeartbeatReport::default()
            },
        );

        let hb = reg.snapshot(&dev).last_heartbeat.unwrap();
        assert_eq!(hb.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(hb.locked, None);
        assert_eq!(hb.fingerprint_count, None);
    }

    #[test]
    fn test_devices_are_isolated() {
        let reg = DeviceRegistry::new();
        reg.issue_command(&id("a"), "unlock", None).unwrap();
        assert_eq!(reg.consume_pending_command(&id("b")), None);
        assert!(reg.consume_pending_command(&id("a")).is_some());
    }

    #[test]
    fn test_concurrent_consume_delivers_once() {
        for _ in 0..200 {
            let reg = Arc::new(DeviceRegistry::new());
            let dev = id("pi-001");
            reg.issue_command(&dev, "unlock", None).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let reg = Arc::clone(&reg);
                    let barrier = Arc::clone(&barrier);
                    let dev = dev.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        reg.consume_pending_command(&dev)
                    })
                })
                .collect();

            let delivered = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(Option::is_some)
                .count();
            assert_eq!(delivered, 1);
        }
    }

    #[test]
    fn test_concurrent_first_access_creates_one_entry() {
        let reg = Arc::new(DeviceRegistry::new());
        let dev = id("fresh");
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = Arc::clone(&reg);
                let barrier = Arc::clone(&barrier);
                let dev = dev.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if i == 0 {
                        reg.issue_command(&dev, "lock", None).map(|_| ())
                    } else {
                        reg.snapshot(&dev);
                        Ok(())
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        assert_eq!(reg.device_count(), 1);
        assert_eq!(
            reg.peek_pending_command(&dev).map(|c| c.command),
            Some(CommandKind::Lock)
        );
    }

    #[test]
    fn test_metrics_follow_operations() {
        let hub = MetricsHub::new().unwrap();
        let reg = DeviceRegistry::with_metrics(hub.dev.clone());
        let dev = id("pi-001");

        reg.issue_command(&dev, "lock", None).unwrap();
        reg.issue_command(&dev, "unlock", None).unwrap();
        let _ = reg.issue_command(&dev, "reboot", None);
        reg.consume_pending_command(&dev);
        reg.consume_pending_command(&dev);
        reg.record_status(&dev, StatusReport::new("unlocked")).unwrap();
        reg.record_heartbeat(&dev, HeartbeatReport::default());
        reg.snapshot(&id("other"));

        assert_eq!(hub.dev.commands_issued.get(), 2);
        assert_eq!(hub.dev.commands_overwritten.get(), 1);
        assert_eq!(hub.dev.commands_delivered.get(), 1);
        assert_eq!(hub.dev.requests_rejected.get(), 1);
        assert_eq!(hub.dev.status_reports.get(), 1);
        assert_eq!(hub.dev.heartbeats.get(), 1);
        assert_eq!(hub.dev.devices_tracked.get(), 2);
        assert!(hub.encode_text().contains("dispenser_commands_issued 2"));
    }
}
