//! CLI argument parsing for syscallmeter

use clap::Parser;
use std::path::PathBuf;

use crate::settings::{
    DEFAULT_BENCHMARK, DEFAULT_CPU_LIMIT, DEFAULT_CYCLES, DEFAULT_FILE_COUNT, DEFAULT_FILE_SIZE,
    DEFAULT_WORK_DIR,
};

// Numeric flags are parsed as signed integers so that zero and negative
// values reach `Settings::from_cli` and get the targeted diagnostic.
#[derive(Parser, Debug)]
#[command(name = "syscallmeter")]
#[command(version)]
#[command(about = "Measure syscall latency with pinned, barrier-synchronized worker processes", long_about = None)]
pub struct Cli {
    /// Maximum number of CPUs to use for workers
    #[arg(short = 'j', value_name = "N", default_value_t = DEFAULT_CPU_LIMIT, allow_negative_numbers = true)]
    pub cpu_limit: i64,

    /// Number of cycles per worker
    #[arg(short = 'c', value_name = "N", default_value_t = DEFAULT_CYCLES, allow_negative_numbers = true)]
    pub cycles: i64,

    /// Number of files to create
    #[arg(short = 'f', value_name = "N", default_value_t = DEFAULT_FILE_COUNT, allow_negative_numbers = true)]
    pub file_count: i64,

    /// Number of bytes in each file
    #[arg(short = 's', value_name = "BYTES", default_value_t = DEFAULT_FILE_SIZE, allow_negative_numbers = true)]
    pub file_size: i64,

    /// Working directory path
    #[arg(short = 'd', value_name = "PATH", default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,

    /// Worker job: open, rename, write_unlink, write_sync, clock_gettime
    #[arg(short = 'm', value_name = "NAME", default_value = DEFAULT_BENCHMARK)]
    pub mode: String,

    /// Comma-separated options for the worker job (e.g. -o dual,direct)
    #[arg(short = 'o', value_name = "LIST")]
    pub options: Option<String>,

    /// Print aggregate throughput every second
    #[arg(short = 'p')]
    pub progress: bool,

    /// Enable verbose diagnostic output
    #[arg(long = "debug")]
    pub debug: bool,
}
