//! Two-phase start barrier
//!
//! Workers post `ready` once they are forked and pinned, then block on `go`.
//! The parent waits `ready` once per worker before posting `go` once per
//! worker, so no timed region starts before every worker is in place.

use crate::error::Result;
use crate::shm::{ProcessSemaphore, ProcessShared, SharedRegion};

pub struct StartBarrier {
    ready: ProcessSemaphore,
    go: ProcessSemaphore,
}

// SAFETY: two process-shared semaphores.
unsafe impl ProcessShared for StartBarrier {}

impl StartBarrier {
    /// Map the barrier into shared memory with both counts at zero
    pub fn create() -> Result<SharedRegion<StartBarrier>> {
        let region = SharedRegion::new(StartBarrier {
            ready: ProcessSemaphore::uninit(),
            go: ProcessSemaphore::uninit(),
        })?;
        region.ready.init(0)?;
        region.go.init(0)?;
        Ok(region)
    }

    /// Worker side: announce that setup is complete
    pub fn signal_ready(&self) -> Result<()> {
        self.ready.post()
    }

    /// Worker side: block until the parent releases everyone
    pub fn wait_go(&self) -> Result<()> {
        self.go.wait()
    }

    /// Parent side: rendezvous with `workers` ready signals
    pub fn await_ready(&self, workers: usize) -> Result<()> {
        for _ in 0..workers {
            self.ready.wait()?;
        }
        Ok(())
    }

    /// Parent side: let `workers` workers start
    pub fn release(&self, workers: usize) -> Result<()> {
        for _ in 0..workers {
            self.go.post()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_no_worker_starts_before_release() {
        let barrier = StartBarrier::create().unwrap();
        let workers = 4;
        let starts = Mutex::new(Vec::new());

        let released_at = thread::scope(|s| {
            for i in 0..workers {
                let barrier = &barrier;
                let starts = &starts;
                s.spawn(move || {
                    // Odd workers are slow to reach the barrier
                    if i % 2 == 1 {
                        thread::sleep(Duration::from_millis(50));
                    }
                    barrier.signal_ready().unwrap();
                    barrier.wait_go().unwrap();
                    starts.lock().unwrap().push(Instant::now());
                });
            }

            barrier.await_ready(workers).unwrap();
            let released_at = Instant::now();
            barrier.release(workers).unwrap();
            released_at
        });

        let starts = starts.into_inner().unwrap();
        assert_eq!(starts.len(), workers);
        assert!(starts.iter().all(|start| *start >= released_at));
    }

    #[test]
    fn test_workers_block_until_released() {
        let barrier = StartBarrier::create().unwrap();
        let started = std::sync::atomic::AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                barrier.signal_ready().unwrap();
                barrier.wait_go().unwrap();
                started.store(true, std::sync::atomic::Ordering::SeqCst);
            });

            barrier.await_ready(1).unwrap();
            thread::sleep(Duration::from_millis(20));
            assert!(!started.load(std::sync::atomic::Ordering::SeqCst));
            barrier.release(1).unwrap();
        });

        assert!(started.load(std::sync::atomic::Ordering::SeqCst));
    }
}
