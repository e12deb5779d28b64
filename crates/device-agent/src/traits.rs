use crate::{DispenseOutcome, HardwareError};
use async_trait::async_trait;
use device_registry::DispenseParams;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Peripherals of one dispenser: fingerprint reader, carousel motors and the
/// infrared sensor under the outlet.
#[async_trait]
pub trait Hardware: Send {
    /// Scan a finger and match it against the enrolled library.
    fn verify_fingerprint(&mut self) -> Result<u32, HardwareError>;

    /// Enroll the finger on the sensor; returns the new user id.
    fn enroll_fingerprint(&mut self) -> Result<u32, HardwareError>;

    /// Enrolled users, `None` if the sensor cannot be read.
    fn fingerprint_count(&self) -> Option<u32>;

    /// Rotate the carousel so `target.segment` sits over the outlet.
    fn dispense(&mut self, target: DispenseParams) -> Result<DispenseOutcome, HardwareError>;

    fn is_hand_detected(&mut self) -> bool;

    /// Poll the hand sensor until it fires or `timeout` elapses.
    async fn wait_for_hand(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_hand_detected() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Power down motors and release sensors on shutdown.
    fn release(&mut self) {}
}
