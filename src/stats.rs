//! Per-worker cycle counters in shared memory
//!
//! Each worker owns exactly one slot and is its only writer; the parent and
//! the progress reporter only read, so no lock is involved.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::settings::MAX_WORKERS;
use crate::shm::ProcessShared;

/// One worker's counter, padded to its own cache line
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct StatSlot {
    cycles: AtomicU64,
}

impl StatSlot {
    /// Record one completed cycle
    #[inline]
    pub fn increment(&self) {
        // Single writer: a plain load/store pair avoids a locked RMW
        let next = self.cycles.load(Ordering::Relaxed) + 1;
        self.cycles.store(next, Ordering::Relaxed);
    }

    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

/// Fixed-size table of [`StatSlot`]s, one per possible worker
#[repr(C)]
pub struct StatsTable {
    slots: [StatSlot; MAX_WORKERS],
}

// SAFETY: only atomics.
unsafe impl ProcessShared for StatsTable {}

impl StatsTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| StatSlot::default()),
        }
    }

    /// Slot for worker `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= MAX_WORKERS`; the worker count is capped when
    /// settings are resolved.
    pub fn slot(&self, index: usize) -> &StatSlot {
        &self.slots[index]
    }

    /// Sum of the first `workers` slots
    pub fn total(&self, workers: usize) -> u64 {
        self.slots[..workers.min(MAX_WORKERS)]
            .iter()
            .map(StatSlot::cycles)
            .sum()
    }
}

impl Default for StatsTable {
    fn default() -> Self {
        Self::new()
    }
}
