//! Timestamp retrieval latency (`-m clock_gettime`)
//!
//! Each worker calibrates with 2^14 back-to-back reads to get a preliminary
//! average, then times `cycles` pairs of reads. The reported mean drops
//! samples at or above 4x the preliminary average and at or below half of
//! it. Histograms are printed by the last worker only so output from
//! different workers does not interleave.

use std::io;

use nix::sys::resource::{getrusage, UsageWho};

use super::{WorkerState, Workload};
use crate::error::{MeterError, Result};
use crate::fileset::WorkDir;
use crate::settings::Settings;
use crate::timing::{monotonic_nanos, read_cycle_counter};

pub const CALIBRATION_CALLS: u64 = 1 << 14;
/// `-c` is multiplied by this for timestamp reads
pub const CYCLE_SCALE: u64 = 1000;
const LOG2_BUCKETS: usize = 32;
const NEAR_MEAN_RADIUS: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// `clock_gettime(CLOCK_MONOTONIC)`
    #[default]
    Syscall,
    /// Hardware timestamp counter
    CycleCounter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockOptions {
    pub source: ClockSource,
    pub log2_histogram: bool,
    pub near_mean_histogram: bool,
    pub show: bool,
}

impl ClockOptions {
    fn keep_samples(&self) -> bool {
        self.log2_histogram || self.near_mean_histogram
    }
}

/// Mean over samples strictly between half and four times a preliminary average
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedMean {
    preliminary: u64,
    upper: u64,
    lower: u64,
    sum: u64,
    above: u64,
    below: u64,
    max: u64,
}

impl TruncatedMean {
    pub fn new(preliminary: u64) -> Self {
        Self {
            preliminary,
            upper: preliminary << 2,
            lower: preliminary >> 1,
            sum: 0,
            above: 0,
            below: 0,
            max: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, sample: u64) {
        self.max = self.max.max(sample);
        if sample >= self.upper {
            self.above += 1;
        } else if sample <= self.lower {
            self.below += 1;
        } else {
            self.sum += sample;
        }
    }

    pub fn finish(&self, count: u64) -> LatencySummary {
        let kept = count.saturating_sub(self.above + self.below);
        LatencySummary {
            preliminary: self.preliminary,
            truncated: if kept > 0 {
                self.sum / kept
            } else {
                self.preliminary
            },
            upper: self.upper,
            lower: self.lower,
            above: self.above,
            below: self.below,
            max: self.max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub preliminary: u64,
    pub truncated: u64,
    pub upper: u64,
    pub lower: u64,
    pub above: u64,
    pub below: u64,
    pub max: u64,
}

/// Base-2 exponential histogram; bucket `i` holds `2^(i-1) ..= 2^i - 1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log2Histogram {
    counts: [u64; LOG2_BUCKETS],
}

impl Default for Log2Histogram {
    fn default() -> Self {
        Self {
            counts: [0; LOG2_BUCKETS],
        }
    }
}

impl Log2Histogram {
    pub fn bucket(sample: u64) -> usize {
        ((u64::BITS - sample.leading_zeros()) as usize).min(LOG2_BUCKETS - 1)
    }

    pub fn record(&mut self, sample: u64) {
        self.counts[Self::bucket(sample)] += 1;
    }

    /// `(low, high, count)` rows covering the occupied range plus one
    /// empty bucket on each side
    pub fn rows(&self) -> Vec<(u64, u64, u64)> {
        let Some((first, last)) = occupied_range(&self.counts) else {
            return Vec::new();
        };
        let first = first.saturating_sub(1);
        let last = (last + 1).min(LOG2_BUCKETS - 1);
        (first..=last)
            .map(|i| {
                let low = if i == 0 { 0 } else { 1u64 << (i - 1) };
                let high = (1u64 << i) - 1;
                (low, high, self.counts[i])
            })
            .collect()
    }
}

/// Linear histogram of values within ±31 of a center
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearMeanHistogram {
    center: u64,
    counts: [u64; 2 * NEAR_MEAN_RADIUS + 1],
}

impl NearMeanHistogram {
    pub fn new(center: u64) -> Self {
        Self {
            center,
            counts: [0; 2 * NEAR_MEAN_RADIUS + 1],
        }
    }

    pub fn record(&mut self, sample: u64) {
        let slot = sample as i128 - self.center as i128 + NEAR_MEAN_RADIUS as i128;
        if (0..self.counts.len() as i128).contains(&slot) {
            self.counts[slot as usize] += 1;
        }
    }

    /// `(value, count)` rows covering the occupied range plus one empty
    /// neighbour on each side
    pub fn rows(&self) -> Vec<(i128, u64)> {
        let Some((first, last)) = occupied_range(&self.counts) else {
            return Vec::new();
        };
        let first = first.saturating_sub(1);
        let last = (last + 1).min(self.counts.len() - 1);
        (first..=last)
            .map(|i| {
                (
                    self.center as i128 + i as i128 - NEAR_MEAN_RADIUS as i128,
                    self.counts[i],
                )
            })
            .collect()
    }
}

fn occupied_range(counts: &[u64]) -> Option<(usize, usize)> {
    let first = counts.iter().position(|&c| c > 0)?;
    let last = counts.iter().rposition(|&c| c > 0)?;
    Some((first, last))
}

/// `-m clock_gettime`
#[derive(Default)]
pub struct ClockBench {
    options: ClockOptions,
}

impl ClockBench {
    pub fn options(&self) -> &ClockOptions {
        &self.options
    }

    fn measure_syscall(
        &self,
        index: usize,
        cycles: u64,
        samples: &mut Vec<u64>,
    ) -> LatencySummary {
        if self.options.show {
            println!("Mode clock_gettime");
        }

        let mut prev = monotonic_nanos();
        let mut sum = 0;
        for _ in 0..CALIBRATION_CALLS {
            let now = monotonic_nanos();
            sum += now - prev;
            prev = now;
        }

        let mut mean = TruncatedMean::new(sum >> 14);
        let keep = self.options.keep_samples();
        for _ in 0..cycles {
            let before = monotonic_nanos();
            let after = monotonic_nanos();
            let delta = after - before;
            if keep {
                samples.push(delta);
            }
            mean.record(delta);
        }
        let summary = mean.finish(cycles);

        if self.options.show {
            println!(
                "[{}] average = {} ns vs {} ns",
                index, summary.preliminary, summary.truncated
            );
            println!(
                "[{}] more than {} ns = {}, less than {} ns = {}, max = {}",
                index, summary.upper, summary.above, summary.lower, summary.below, summary.max
            );
        }
        summary
    }

    fn measure_cycles(
        &self,
        index: usize,
        cycles: u64,
        samples: &mut Vec<u64>,
    ) -> Result<LatencySummary> {
        if self.options.show {
            println!("Mode RDTSC");
        }

        let started = monotonic_nanos();
        let mut sum = 0;
        for _ in 0..CALIBRATION_CALLS {
            let before = read_cycle_counter();
            let after = read_cycle_counter();
            sum += after.wrapping_sub(before);
        }
        let elapsed = monotonic_nanos() - started;
        // Picoseconds per tick, from two reads per calibration iteration
        let ps_per_tick = if sum > 0 { 1000 * elapsed / (2 * sum) } else { 0 };
        if self.options.show {
            println!("[{}] Ticks vs time: {} {} {}", index, 2 * sum, elapsed, ps_per_tick);
        }

        let rusage_err = |e: nix::Error| MeterError::Io {
            worker: index,
            op: "getrusage",
            source: e.into(),
        };
        let usage_before = getrusage(UsageWho::RUSAGE_SELF).map_err(rusage_err)?;

        let mut mean = TruncatedMean::new(sum >> 14);
        let keep = self.options.keep_samples();
        for _ in 0..cycles {
            let before = read_cycle_counter();
            let after = read_cycle_counter();
            let delta = after.wrapping_sub(before);
            if keep {
                samples.push(delta);
            }
            mean.record(delta);
        }

        let usage_after = getrusage(UsageWho::RUSAGE_SELF).map_err(rusage_err)?;
        let involuntary = usage_after.involuntary_context_switches()
            - usage_before.involuntary_context_switches();
        let voluntary =
            usage_after.voluntary_context_switches() - usage_before.voluntary_context_switches();
        println!("involuntary vs voluntary: {} {}", involuntary, voluntary);

        let summary = mean.finish(cycles);
        if self.options.show {
            println!(
                "[{}] average = {} ns vs {} ns",
                index,
                summary.preliminary * ps_per_tick / 1000,
                summary.truncated * ps_per_tick / 1000
            );
            println!(
                "[{}] more than {} ticks = {}, less than {} ticks = {}, max = {}",
                index, summary.upper, summary.above, summary.lower, summary.below, summary.max
            );
        }
        Ok(summary)
    }

    fn print_histograms(&self, index: usize, summary: &LatencySummary, samples: &[u64]) {
        if self.options.log2_histogram {
            let mut histogram = Log2Histogram::default();
            samples.iter().for_each(|&s| histogram.record(s));
            println!("[{}] ===== Log2 histogram ==== ", index);
            for (low, high, count) in histogram.rows() {
                println!("[{}]\t{}..{}\t= {}", index, low, high, count);
            }
        }

        if self.options.near_mean_histogram {
            let mut histogram = NearMeanHistogram::new(summary.truncated);
            samples.iter().for_each(|&s| histogram.record(s));
            println!("[{}] ===== Near-avg values ==== ", index);
            for (value, count) in histogram.rows() {
                println!("[{}] {} \t= {}", index, value, count);
            }
        }
    }
}

impl Workload for ClockBench {
    fn name(&self) -> &'static str {
        "clock_gettime"
    }

    fn accepts_options(&self) -> bool {
        true
    }

    fn parse_option(&mut self, option: &str) -> Result<()> {
        match option {
            "rdtsc" => self.options.source = ClockSource::CycleCounter,
            "histo" => self.options.log2_histogram = true,
            "modehisto" => self.options.near_mean_histogram = true,
            "show" => self.options.show = true,
            other => {
                return Err(MeterError::UnknownOption {
                    benchmark: "clock_gettime",
                    option: other.to_string(),
                })
            }
        }
        Ok(())
    }

    fn initialize(&mut self, settings: &mut Settings, _dir: &WorkDir) -> Result<()> {
        // Sub-microsecond calls need many more iterations for stable numbers
        settings.cycles = settings
            .cycles
            .checked_mul(CYCLE_SCALE)
            .ok_or(MeterError::OutOfRange {
                flag: 'c',
                value: settings.cycles,
                max: u64::MAX / CYCLE_SCALE,
            })?;
        Ok(())
    }

    fn run(&self, index: usize, state: &WorkerState<'_>, _dir: &WorkDir) -> Result<u64> {
        let cycles = state.settings.cycles;
        let mut samples = Vec::new();
        if self.options.keep_samples() {
            usize::try_from(cycles)
                .ok()
                .and_then(|len| samples.try_reserve_exact(len).ok())
                .ok_or_else(|| MeterError::Io {
                    worker: index,
                    op: "sample buffer allocation",
                    source: io::Error::from(io::ErrorKind::OutOfMemory),
                })?;
        }

        let summary = match self.options.source {
            ClockSource::Syscall => self.measure_syscall(index, cycles, &mut samples),
            ClockSource::CycleCounter => self.measure_cycles(index, cycles, &mut samples)?,
        };

        if index + 1 == state.settings.workers {
            self.print_histograms(index, &summary, &samples);
        }

        Ok(cycles.saturating_add(CALIBRATION_CALLS))
    }
}
