//! Process-wide run settings
//!
//! Built once from the command line, copied into every worker by fork and
//! never mutated afterwards.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::error::{MeterError, Result};

/// Hard ceiling on concurrent workers; sizes the shared stats table
pub const MAX_WORKERS: usize = 256;

pub const DEFAULT_CPU_LIMIT: i64 = 128;
pub const DEFAULT_CYCLES: i64 = 1024;
pub const DEFAULT_FILE_COUNT: i64 = 4 * 1024;
pub const DEFAULT_FILE_SIZE: i64 = 32 * 1024;
pub const DEFAULT_WORK_DIR: &str = "temp_syscallmeter";
pub const DEFAULT_BENCHMARK: &str = "open";

/// Validated settings for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub cpu_limit: usize,
    pub cycles: u64,
    pub file_count: u64,
    pub file_size: u64,
    pub work_dir: PathBuf,
    pub benchmark: String,
    pub options: Option<String>,
    /// Number of worker processes, see [`resolve_workers`]
    pub workers: usize,
    pub progress: bool,
    /// Trace-level diagnostics
    pub debug: bool,
}

impl Settings {
    /// Validate parsed arguments, given how many processors the process may use
    pub fn from_cli(cli: &Cli, available: usize) -> Result<Self> {
        let cpu_limit = positive('j', cli.cpu_limit)? as usize;
        Ok(Self {
            cpu_limit,
            cycles: positive('c', cli.cycles)?,
            file_count: positive('f', cli.file_count)?,
            file_size: positive('s', cli.file_size)?,
            work_dir: cli.work_dir.clone(),
            benchmark: cli.mode.clone(),
            options: cli.options.clone(),
            workers: resolve_workers(available, cpu_limit),
            progress: cli.progress,
            debug: cli.debug,
        })
    }

    /// Comma-separated option tokens, empty entries skipped
    pub fn option_tokens(&self) -> impl Iterator<Item = &str> {
        self.options
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Print the settings banner
    pub fn print_banner(&self) {
        println!("Settings:");
        println!("\tCYCLES = {}", self.cycles);
        println!("\tWORKERS = {}", self.workers);
        println!("\tFILECOUNT = {}", self.file_count);
        println!("\tFILESIZE = {}", self.file_size);
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cpu_limit: DEFAULT_CPU_LIMIT as usize,
            cycles: DEFAULT_CYCLES as u64,
            file_count: DEFAULT_FILE_COUNT as u64,
            file_size: DEFAULT_FILE_SIZE as u64,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            benchmark: DEFAULT_BENCHMARK.to_string(),
            options: None,
            workers: 1,
            progress: false,
            debug: false,
        }
    }
}

/// Worker count: one processor is left for the parent, capped by the
/// configured limit and [`MAX_WORKERS`], never below one
pub fn resolve_workers(available: usize, cpu_limit: usize) -> usize {
    available
        .saturating_sub(1)
        .min(cpu_limit)
        .min(MAX_WORKERS)
        .max(1)
}

fn positive(flag: char, value: i64) -> Result<u64> {
    if value <= 0 {
        return Err(MeterError::InvalidArgument {
            flag,
            value: value.to_string(),
        });
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["syscallmeter"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_resolve_workers_reserves_parent_cpu() {
        assert_eq!(resolve_workers(8, 128), 7);
    }

    #[test]
    fn test_resolve_workers_respects_limit() {
        assert_eq!(resolve_workers(64, 4), 4);
    }

    #[test]
    fn test_resolve_workers_caps_at_max() {
        assert_eq!(resolve_workers(1024, 1024), MAX_WORKERS);
    }

    #[test]
    fn test_resolve_workers_single_cpu_host() {
        assert_eq!(resolve_workers(1, 128), 1);
        assert_eq!(resolve_workers(0, 128), 1);
    }

    #[test]
    fn test_from_cli_defaults() {
        let settings = Settings::from_cli(&cli(&[]), 5).unwrap();
        assert_eq!(settings.cycles, 1024);
        assert_eq!(settings.file_count, 4096);
        assert_eq!(settings.file_size, 32 * 1024);
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.benchmark, "open");
        assert_eq!(settings.work_dir, PathBuf::from("temp_syscallmeter"));
        assert!(!settings.progress);
        assert!(!settings.debug);
    }

    #[test]
    fn test_from_cli_debug_and_progress() {
        let settings = Settings::from_cli(&cli(&["--debug", "-p"]), 2).unwrap();
        assert!(settings.debug);
        assert!(settings.progress);
    }

    #[test]
    fn test_from_cli_rejects_zero_cycles() {
        let err = Settings::from_cli(&cli(&["-c", "0"]), 4).unwrap_err();
        assert!(matches!(err, MeterError::InvalidArgument { flag: 'c', .. }));
    }

    #[test]
    fn test_from_cli_rejects_negative_file_size() {
        let err = Settings::from_cli(&cli(&["-s", "-5"]), 4).unwrap_err();
        assert!(err.to_string().contains("-s"));
    }

    #[test]
    fn test_from_cli_rejects_zero_cpu_limit() {
        let err = Settings::from_cli(&cli(&["-j", "0"]), 4).unwrap_err();
        assert!(matches!(err, MeterError::InvalidArgument { flag: 'j', .. }));
    }

    #[test]
    fn test_option_tokens_skip_empty() {
        let settings = Settings {
            options: Some("dual,,direct, ".to_string()),
            ..Settings::default()
        };
        let tokens: Vec<_> = settings.option_tokens().collect();
        assert_eq!(tokens, vec!["dual", "direct"]);
    }

    #[test]
    fn test_option_tokens_none() {
        assert_eq!(Settings::default().option_tokens().count(), 0);
    }
}
