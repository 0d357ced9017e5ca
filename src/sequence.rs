//! Sequence id generation for outgoing commands

use std::sync::{Mutex, PoisonError};

/// Highest id handed out before the counter wraps back to 1
pub const ROLLOVER_THRESHOLD: u32 = 1_000_000;

/// Thread-safe, wrapping sequence counter.
///
/// One counter exists per interface. Values stay in `[1, threshold]` once the
/// first id has been issued; the counter never emits 0 after that.
#[derive(Debug)]
pub struct SequenceCounter {
    value: Mutex<u32>,
    threshold: u32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::with_threshold(0, ROLLOVER_THRESHOLD)
    }

    pub fn with_start(start: u32) -> Self {
        Self::with_threshold(start, ROLLOVER_THRESHOLD)
    }

    pub fn with_threshold(start: u32, threshold: u32) -> Self {
        Self {
            value: Mutex::new(start),
            threshold: threshold.max(1),
        }
    }

    /// Atomically advance the counter and return the new value
    pub fn increment(&self) -> u32 {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *value = match value.checked_add(1) {
            Some(next) if next <= self.threshold => next,
            _ => 1,
        };
        *value
    }

    /// Current value without advancing
    pub fn value(&self) -> u32 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
