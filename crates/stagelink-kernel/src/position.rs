//! [`SharedPosition`] – the single shared stage position.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use stagelink_hal::lock;

/// A position value and the monotonic instant it was read or set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReading {
    pub value_mm: f64,
    pub read_at: Instant,
}

/// Cloneable handle to the last known stage position.
///
/// The telemetry publisher and the command executor both write it; the frame
/// publisher reads it to annotate frames.  Every access goes through one
/// mutex.
#[derive(Debug, Clone)]
pub struct SharedPosition {
    inner: Arc<Mutex<PositionReading>>,
}

impl SharedPosition {
    pub fn new(initial_mm: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PositionReading {
                value_mm: initial_mm,
                read_at: Instant::now(),
            })),
        }
    }

    pub fn set(&self, value_mm: f64) {
        *lock(&self.inner) = PositionReading {
            value_mm,
            read_at: Instant::now(),
        };
    }

    pub fn get(&self) -> PositionReading {
        *lock(&self.inner)
    }

    pub fn value(&self) -> f64 {
        lock(&self.inner).value_mm
    }

    /// Store `value_mm` and return the previous value, atomically.
    pub fn replace(&self, value_mm: f64) -> f64 {
        let mut guard = lock(&self.inner);
        let previous = guard.value_mm;
        *guard = PositionReading {
            value_mm,
            read_at: Instant::now(),
        };
        previous
    }
}

impl Default for SharedPosition {
    fn default() -> Self {
        Self::new(0.0)
    }
}
