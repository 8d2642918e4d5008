//! Syscallmeter - multi-process system call latency benchmark
//!
//! Forks one worker per allowed processor, pins each worker, starts them
//! together through a shared-memory barrier and times a selected workload:
//! simple file-system syscall loops, timestamp retrieval, or a concurrent
//! write/flush protocol over a logical stream spread across fixed-size files.

pub mod barrier;
pub mod cli;
pub mod error;
pub mod fileset;
pub mod harness;
pub mod payload;
pub mod progress;
pub mod settings;
pub mod shm;
pub mod stats;
pub mod timing;
pub mod watermark;
pub mod workload;

pub use error::{MeterError, Result};
