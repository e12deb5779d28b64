use crate::{DispenseOutcome, Hardware, HardwareError};
use device_registry::DispenseParams;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

pub const SEGMENTS_PER_ROTATION: u64 = 15;
pub const STEPS_PER_ROTATION: u64 = 200;
pub const USER_MAX_CNT: u32 = 1000;

/// What the fingerprint reader sees on the next scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Finger {
    Absent,
    /// Finger belonging to `user`, enrolled or not.
    User(u32),
    /// Any enrolled finger, chosen at random; absent when nobody is enrolled.
    Random,
}

/// What the infrared sensor under the outlet reports.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Hand {
    Absent,
    Present,
    /// Detected on each check with the given probability.
    Random(f64),
}

/// In-process dispenser with two carousel motors. Each instance is
/// independent, so tests can script one per case.
#[derive(Clone, Debug)]
pub struct MockHardware {
    motors: BTreeMap<u64, u64>,
    enrolled: Vec<u32>,
    finger: Finger,
    hand: Hand,
    released: bool,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            motors: BTreeMap::from([(1, 0), (2, 0)]),
            enrolled: Vec::new(),
            finger: Finger::Absent,
            hand: Hand::Absent,
            released: false,
        }
    }

    /// Randomised peripherals for running an agent against a live gateway.
    pub fn simulated() -> Self {
        Self::new()
            .with_enrolled(1)
            .with_finger(Finger::Random)
            .with_hand(Hand::Random(0.05))
    }

    /// Pre-enroll users `1..=count`.
    pub fn with_enrolled(mut self, count: u32) -> Self {
        self.enrolled = (1..=count.min(USER_MAX_CNT)).collect();
        self
    }

    pub fn with_finger(mut self, finger: Finger) -> Self {
        self.finger = finger;
        self
    }

    pub fn with_hand(mut self, hand: Hand) -> Self {
        self.hand = hand;
        self
    }

    pub fn current_segment(&self, motor_id: u64) -> Option<u64> {
        self.motors.get(&motor_id).copied()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Hardware for MockHardware {
    fn verify_fingerprint(&mut self) -> Result<u32, HardwareError> {
        match self.finger {
            Finger::Absent => Err(HardwareError::NoFinger),
            Finger::User(user) if self.enrolled.contains(&user) => Ok(user),
            Finger::User(_) => Err(HardwareError::UnknownFinger),
            Finger::Random => self
                .enrolled
                .choose(&mut rand::thread_rng())
                .copied()
                .ok_or(HardwareError::NoFinger),
        }
    }

    fn enroll_fingerprint(&mut self) -> Result<u32, HardwareError> {
        let count = self.enrolled.len() as u32;
        if count >= USER_MAX_CNT {
            return Err(HardwareError::LibraryFull);
        }
        if self.finger == Finger::Absent {
            return Err(HardwareError::NoFinger);
        }
        let user = count + 1;
        self.enrolled.push(user);
        Ok(user)
    }

    fn fingerprint_count(&self) -> Option<u32> {
        Some(self.enrolled.len() as u32)
    }

    fn dispense(&mut self, target: DispenseParams) -> Result<DispenseOutcome, HardwareError> {
        let current = self
            .motors
            .get_mut(&target.motor_id)
            .ok_or(HardwareError::InvalidMotor(target.motor_id))?;
        if target.segment >= SEGMENTS_PER_ROTATION {
            return Err(HardwareError::InvalidSegment {
                segment: target.segment,
                max: SEGMENTS_PER_ROTATION - 1,
            });
        }

        let segments_rotated =
            (target.segment + SEGMENTS_PER_ROTATION - *current) % SEGMENTS_PER_ROTATION;
        let steps = segments_rotated * STEPS_PER_ROTATION / SEGMENTS_PER_ROTATION;
        *current = target.segment;
        self.released = false;
        Ok(DispenseOutcome {
            segments_rotated,
            steps,
        })
    }

    fn is_hand_detected(&mut self) -> bool {
        match self.hand {
            Hand::Absent => false,
            Hand::Present => true,
            Hand::Random(p) => rand::thread_rng().gen_bool(p.clamp(0.0, 1.0)),
        }
    }

    fn release(&mut self) {
        self.released = true;
    }
}
