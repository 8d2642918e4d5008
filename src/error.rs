//! Error taxonomy for syscallmeter
//!
//! Configuration errors are raised before any process or resource exists,
//! resource errors abort the run before fork, and worker errors terminate
//! the single worker that hit them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while configuring or running a benchmark
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("invalid argument {value} for option -{flag}: expected integer greater than 0")]
    InvalidArgument { flag: char, value: String },

    #[error("argument {value} for option -{flag} is too large (at most {max})")]
    OutOfRange { flag: char, value: u64, max: u64 },

    #[error("Unknown worker job (-m): {0}, use -h to see valid job names")]
    UnknownBenchmark(String),

    #[error("unexpected option for {benchmark}: {option}")]
    UnknownOption {
        benchmark: &'static str,
        option: String,
    },

    #[error("Found non-directory with name {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Can't prepare directory {}: {source}", .path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't map shared area: {0}")]
    SharedMemory(#[source] nix::Error),

    #[error("semaphore {op} failed: {source}")]
    Semaphore {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't create or open file {}: {source}", .path.display())]
    FileCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} was run before initialize")]
    NotInitialized(&'static str),

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("[{worker}] Can't set affinity to CPU {cpu}: {source}")]
    Affinity {
        worker: usize,
        cpu: usize,
        #[source]
        source: nix::Error,
    },

    #[error("[{worker}] write to file_{file_index} failed: {source}")]
    Write {
        worker: usize,
        file_index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("[{worker}] fdatasync of file_{file_index} failed: {source}")]
    Flush {
        worker: usize,
        file_index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("[{worker}] {op} failed: {source}")]
    Io {
        worker: usize,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = MeterError> = std::result::Result<T, E>;
