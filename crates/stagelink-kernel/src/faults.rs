//! Process-lifetime fault counters.

use std::sync::atomic::{AtomicU64, Ordering};

use stagelink_hal::FaultFlag;
use stagelink_types::{FaultCategory, FaultCounterSnapshot};

/// Counts classified hardware faults for the lifetime of the process.
///
/// Each counter is a single atomic, so concurrent increments from the
/// command path and the health monitor never lose updates.  Counters are only
/// zeroed by [`reset`](Self::reset), which the session manager calls after a
/// full hardware reinitialisation.
#[derive(Debug, Default)]
pub struct FaultCounters {
    thermal: AtomicU64,
    amplifier: AtomicU64,
    transport: AtomicU64,
    other: AtomicU64,
}

impl FaultCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, category: FaultCategory) -> &AtomicU64 {
        match category {
            FaultCategory::Thermal => &self.thermal,
            FaultCategory::Amplifier => &self.amplifier,
            FaultCategory::Transport => &self.transport,
            FaultCategory::Other => &self.other,
        }
    }

    pub fn record(&self, category: FaultCategory) {
        self.slot(category).fetch_add(1, Ordering::Relaxed);
    }

    /// Classify and count every flag; returns the category of each in order.
    pub fn record_flags(&self, flags: &[FaultFlag]) -> Vec<FaultCategory> {
        flags
            .iter()
            .map(|flag| {
                let category = flag.category();
                self.record(category);
                category
            })
            .collect()
    }

    pub fn get(&self, category: FaultCategory) -> u64 {
        self.slot(category).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> FaultCounterSnapshot {
        FaultCounterSnapshot {
            thermal: self.get(FaultCategory::Thermal),
            amplifier: self.get(FaultCategory::Amplifier),
            transport: self.get(FaultCategory::Transport),
            other: self.get(FaultCategory::Other),
        }
    }

    pub fn reset(&self) {
        for category in [
            FaultCategory::Thermal,
            FaultCategory::Amplifier,
            FaultCategory::Transport,
            FaultCategory::Other,
        ] {
            self.slot(category).store(0, Ordering::Relaxed);
        }
    }
}
