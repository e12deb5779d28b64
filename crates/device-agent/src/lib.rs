//! device-agent: the dispenser side of the command protocol
//!
//! A device polls the gateway for its pending command, drives its
//! [`Hardware`] accordingly, and reports the outcome as a status update. The
//! default build enables a `mock` hardware backend so agents can run on any
//! host.

mod error;
pub use error::{AgentError, HardwareError, Result};

mod types;
pub use types::{AgentConfig, DispenseOutcome, IssuedCommand, PolledCommand};

mod traits;
pub use traits::Hardware;

mod executor;
pub use executor::CommandExecutor;

mod client;
pub use client::GatewayClient;

mod agent;
pub use agent::Agent;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::MockHardware;

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
