use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct DeviceMetrics {
    pub commands_issued: IntCounter,
    pub commands_delivered: IntCounter,
    pub commands_overwritten: IntCounter,
    pub requests_rejected: IntCounter,
    pub status_reports: IntCounter,
    pub heartbeats: IntCounter,
    pub devices_tracked: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let dev = DeviceMetrics {
            commands_issued: counter("dispenser_commands_issued", "Commands accepted")?,
            commands_delivered: counter(
                "dispenser_commands_delivered",
                "Commands handed to a polling device",
            )?,
            commands_overwritten: counter(
                "dispenser_commands_overwritten",
                "Pending commands replaced before delivery",
            )?,
            requests_rejected: counter(
                "dispenser_requests_rejected",
                "Commands and reports that failed validation",
            )?,
            status_reports: counter("dispenser_status_reports", "Status reports recorded")?,
            heartbeats: counter("dispenser_heartbeats", "Heartbeats recorded")?,
            devices_tracked: IntGauge::new(
                "dispenser_devices_tracked",
                "Device entries held by the registry",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let _ = registry.register(Box::new(dev.commands_issued.clone()));
        let _ = registry.register(Box::new(dev.commands_delivered.clone()));
        let _ = registry.register(Box::new(dev.commands_overwritten.clone()));
        let _ = registry.register(Box::new(dev.requests_rejected.clone()));
        let _ = registry.register(Box::new(dev.status_reports.clone()));
        let _ = registry.register(Box::new(dev.heartbeats.clone()));
        let _ = registry.register(Box::new(dev.devices_tracked.clone()));
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
