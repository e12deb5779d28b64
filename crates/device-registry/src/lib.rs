//! device-registry: per-device command and telemetry state for polling devices
//!
//! Devices poll for a single pending command and push status reports and
//! heartbeats; operators queue commands and read snapshots. All state lives in
//! a [`DeviceRegistry`] owned by the caller and shared by handle.

mod error;
pub use error::{RegistryError, Result};

mod command;
pub use command::{CommandKind, CommandParams, DispenseParams, Params};

mod types;
pub use types::*;

mod registry;
pub use registry::DeviceRegistry;

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};
