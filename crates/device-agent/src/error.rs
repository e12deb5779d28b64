use device_registry::RegistryError;
use thiserror::Error;

pub type Result<T, E = AgentError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid request: {0}")]
    Invalid(#[from] RegistryError),
}

/// Failures reported by the dispenser hardware. Messages are what the device
/// puts in the `message` field of its status report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardwareError {
    #[error("Timeout - no finger detected")]
    NoFinger,
    #[error("Fingerprint not found in database")]
    UnknownFinger,
    #[error("Fingerprint library is full")]
    LibraryFull,
    #[error("Invalid motor ID: {0}")]
    InvalidMotor(u64),
    #[error("Invalid segment: {segment}. Must be 0-{max}")]
    InvalidSegment { segment: u64, max: u64 },
}
