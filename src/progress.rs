//! Once-a-second throughput line while workers run
//!
//! Reads the shared stats table from a parent-side thread; workers are never
//! interrupted or locked.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::stats::StatsTable;
use crate::timing::monotonic_nanos;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub struct ProgressReporter<'a> {
    table: &'a StatsTable,
    workers: usize,
    previous: u64,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(table: &'a StatsTable, workers: usize) -> Self {
        Self {
            table,
            workers,
            previous: table.total(workers),
        }
    }

    /// Cycles completed since the previous tick
    pub fn tick(&mut self) -> u64 {
        let total = self.table.total(self.workers);
        let delta = total.saturating_sub(self.previous);
        self.previous = total;
        delta
    }

    /// Report every [`REPORT_INTERVAL`] until `stop` fires or disconnects
    pub fn run(mut self, stop: Receiver<()>) {
        while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(REPORT_INTERVAL) {
            let delta = self.tick();
            let now = monotonic_nanos();
            println!(
                "[{}.{:09}] ops = {}",
                now / 1_000_000_000,
                now % 1_000_000_000,
                delta
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_tick_reports_delta() {
        let table = StatsTable::new();
        table.slot(0).increment();
        let mut reporter = ProgressReporter::new(&table, 2);
        assert_eq!(reporter.tick(), 0);

        table.slot(0).increment();
        table.slot(1).increment();
        table.slot(1).increment();
        assert_eq!(reporter.tick(), 3);
        assert_eq!(reporter.tick(), 0);
    }

    #[test]
    fn test_tick_ignores_slots_past_worker_count() {
        let table = StatsTable::new();
        let mut reporter = ProgressReporter::new(&table, 1);
        table.slot(5).increment();
        assert_eq!(reporter.tick(), 0);
    }

    #[test]
    fn test_run_stops_on_signal() {
        let table = StatsTable::new();
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let handle = s.spawn(|| ProgressReporter::new(&table, 1).run(rx));
            tx.send(()).unwrap();
            handle.join().unwrap();
        });
    }
}
