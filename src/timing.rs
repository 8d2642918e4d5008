//! Clocks and synthetic work
//!
//! Hardware cycle counter where the target has one, monotonic nanoseconds
//! everywhere, and a [`SyntheticDelay`] used by the write/flush protocol to
//! stagger workers so they don't hit the write lock in lockstep.

use std::time::{Duration, Instant};

use nix::time::{clock_gettime, ClockId};

/// Read the CPU timestamp counter
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn read_cycle_counter() -> u64 {
    // SAFETY: RDTSC is available on every x86_64 CPU.
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Read the CPU timestamp counter
///
/// Targets without a user-readable counter fall back to monotonic
/// nanoseconds, so "ticks" equal nanoseconds there.
#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub fn read_cycle_counter() -> u64 {
    monotonic_nanos()
}

/// True when [`read_cycle_counter`] reads real hardware cycles
pub const fn has_cycle_counter() -> bool {
    cfg!(target_arch = "x86_64")
}

/// `CLOCK_MONOTONIC` in nanoseconds
#[inline]
pub fn monotonic_nanos() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        // CLOCK_MONOTONIC cannot fail on Linux; keep the value monotone anyway
        Err(_) => 0,
    }
}

/// Busy work of a size proportional to `units`
pub trait SyntheticDelay {
    fn pause(&self, units: u64);
}

/// Spins on the cycle counter for `cycles_per_unit * units` cycles
#[derive(Debug, Clone, Copy)]
pub struct CycleCounterDelay {
    pub cycles_per_unit: u64,
}

impl Default for CycleCounterDelay {
    fn default() -> Self {
        Self {
            cycles_per_unit: 3000,
        }
    }
}

impl SyntheticDelay for CycleCounterDelay {
    fn pause(&self, units: u64) {
        let start = read_cycle_counter();
        let wait = self.cycles_per_unit * units;
        while read_cycle_counter().wrapping_sub(start) < wait {
            std::hint::spin_loop();
        }
    }
}

/// Spins on [`Instant`] for `per_unit * units`
#[derive(Debug, Clone, Copy)]
pub struct TimerDelay {
    pub per_unit: Duration,
}

impl Default for TimerDelay {
    fn default() -> Self {
        // ~3000 cycles at 3 GHz
        Self {
            per_unit: Duration::from_micros(1),
        }
    }
}

impl SyntheticDelay for TimerDelay {
    fn pause(&self, units: u64) {
        let deadline = Instant::now() + self.per_unit * units as u32;
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// No delay at all; used by tests that only care about protocol state
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl SyntheticDelay for NoDelay {
    fn pause(&self, _units: u64) {}
}

/// Delay selected for this target
pub enum PlatformDelay {
    Cycles(CycleCounterDelay),
    Timer(TimerDelay),
}

impl PlatformDelay {
    pub fn detect() -> Self {
        if has_cycle_counter() {
            PlatformDelay::Cycles(CycleCounterDelay::default())
        } else {
            PlatformDelay::Timer(TimerDelay::default())
        }
    }
}

impl SyntheticDelay for PlatformDelay {
    fn pause(&self, units: u64) {
        match self {
            PlatformDelay::Cycles(delay) => delay.pause(units),
            PlatformDelay::Timer(delay) => delay.pause(units),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_nanos_advances() {
        let a = monotonic_nanos();
        std::thread::sleep(Duration::from_millis(2));
        let b = monotonic_nanos();
        assert!(b > a);
        assert!(b - a >= 1_000_000);
    }

    #[test]
    fn test_cycle_counter_advances() {
        let a = read_cycle_counter();
        std::thread::sleep(Duration::from_millis(1));
        assert!(read_cycle_counter() > a);
    }

    #[test]
    fn test_timer_delay_waits_at_least_requested() {
        let delay = TimerDelay {
            per_unit: Duration::from_micros(100),
        };
        let start = Instant::now();
        delay.pause(20);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn test_cycle_delay_zero_units_returns() {
        CycleCounterDelay::default().pause(0);
        PlatformDelay::detect().pause(1);
    }
}
