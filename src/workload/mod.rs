//! Benchmark strategies and the contract the harness drives them through
//!
//! A strategy is resolved by name before anything is created, receives the
//! `-o` option tokens, initializes once in the parent, and then runs once in
//! every forked worker.

pub mod clock;
pub mod simple;
pub mod write_sync;

use crate::error::{MeterError, Result};
use crate::fileset::WorkDir;
use crate::settings::Settings;
use crate::stats::StatSlot;

pub use clock::ClockBench;
pub use simple::{OpenCloseBench, RenameBench, WriteUnlinkBench};
pub use write_sync::WriteSyncBench;

/// Per-worker view handed to [`Workload::run`]
pub struct WorkerState<'a> {
    pub settings: &'a Settings,
    pub stats: &'a StatSlot,
}

/// What each benchmark strategy provides to the harness
pub trait Workload {
    /// Name used with `-m`
    fn name(&self) -> &'static str;

    /// Whether this strategy consumes `-o` tokens at all
    fn accepts_options(&self) -> bool {
        false
    }

    /// Consume one `-o` token; runs before [`Workload::initialize`]
    fn parse_option(&mut self, option: &str) -> Result<()> {
        let _ = option;
        Ok(())
    }

    /// One-time setup in the parent, before fork
    fn initialize(&mut self, settings: &mut Settings, dir: &WorkDir) -> Result<()>;

    /// Timed job for worker `index`; returns the iteration count
    fn run(&self, index: usize, state: &WorkerState<'_>, dir: &WorkDir) -> Result<u64>;
}

/// The closed set of benchmark strategies
pub enum Benchmark {
    Open(OpenCloseBench),
    Rename(RenameBench),
    WriteUnlink(WriteUnlinkBench),
    WriteSync(WriteSyncBench),
    ClockGettime(ClockBench),
}

pub const BENCHMARK_NAMES: [&str; 5] = [
    "open",
    "rename",
    "write_unlink",
    "write_sync",
    "clock_gettime",
];

impl Benchmark {
    /// Look up a strategy by its `-m` name
    pub fn resolve(name: &str) -> Result<Self> {
        match name {
            "open" => Ok(Benchmark::Open(OpenCloseBench)),
            "rename" => Ok(Benchmark::Rename(RenameBench)),
            "write_unlink" => Ok(Benchmark::WriteUnlink(WriteUnlinkBench)),
            "write_sync" => Ok(Benchmark::WriteSync(WriteSyncBench::default())),
            "clock_gettime" => Ok(Benchmark::ClockGettime(ClockBench::default())),
            other => Err(MeterError::UnknownBenchmark(other.to_string())),
        }
    }

    /// Feed option tokens; ignored entirely by strategies without a parser
    pub fn apply_options<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) -> Result<()> {
        if !self.accepts_options() {
            let ignored: Vec<_> = tokens.into_iter().collect();
            if !ignored.is_empty() {
                tracing::debug!("{} takes no options, ignoring {:?}", self.name(), ignored);
            }
            return Ok(());
        }
        for token in tokens {
            self.parse_option(token)?;
        }
        Ok(())
    }

    fn inner(&self) -> &dyn Workload {
        match self {
            Benchmark::Open(b) => b,
            Benchmark::Rename(b) => b,
            Benchmark::WriteUnlink(b) => b,
            Benchmark::WriteSync(b) => b,
            Benchmark::ClockGettime(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Workload {
        match self {
            Benchmark::Open(b) => b,
            Benchmark::Rename(b) => b,
            Benchmark::WriteUnlink(b) => b,
            Benchmark::WriteSync(b) => b,
            Benchmark::ClockGettime(b) => b,
        }
    }
}

impl Workload for Benchmark {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn accepts_options(&self) -> bool {
        self.inner().accepts_options()
    }

    fn parse_option(&mut self, option: &str) -> Result<()> {
        self.inner_mut().parse_option(option)
    }

    fn initialize(&mut self, settings: &mut Settings, dir: &WorkDir) -> Result<()> {
        self.inner_mut().initialize(settings, dir)
    }

    fn run(&self, index: usize, state: &WorkerState<'_>, dir: &WorkDir) -> Result<u64> {
        self.inner().run(index, state, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_all_names() {
        for name in BENCHMARK_NAMES {
            let bench = Benchmark::resolve(name).unwrap();
            assert_eq!(bench.name(), name);
        }
    }

    #[test]
    fn test_resolve_unknown_name() {
        let err = Benchmark::resolve("bogus").err().unwrap();
        assert!(matches!(err, MeterError::UnknownBenchmark(ref n) if n == "bogus"));
    }

    #[test]
    fn test_options_ignored_without_parser() {
        let mut bench = Benchmark::resolve("open").unwrap();
        assert!(!bench.accepts_options());
        assert!(bench.apply_options(["anything", "goes"]).is_ok());
    }

    #[test]
    fn test_options_rejected_by_parser() {
        let mut bench = Benchmark::resolve("write_sync").unwrap();
        let err = bench.apply_options(["dual", "nonsense"]).unwrap_err();
        assert!(matches!(err, MeterError::UnknownOption { .. }));
        assert!(err.to_string().contains("nonsense"));
    }

    #[test]
    fn test_clock_accepts_options() {
        let mut bench = Benchmark::resolve("clock_gettime").unwrap();
        assert!(bench.apply_options(["rdtsc", "histo", "show"]).is_ok());
    }
}
