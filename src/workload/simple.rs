//! Single-syscall timed loops: `open`, `rename`, `write_unlink`

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;

use super::{WorkerState, Workload};
use crate::error::{MeterError, Result};
use crate::fileset::{write_file, WorkDir};
use crate::payload::random_payload;
use crate::settings::Settings;

fn io_err(worker: usize, op: &'static str) -> impl FnOnce(std::io::Error) -> MeterError {
    move |source| MeterError::Io { worker, op, source }
}

/// `-m open`: open and close files from the working set
pub struct OpenCloseBench;

impl Workload for OpenCloseBench {
    fn name(&self) -> &'static str {
        "open"
    }

    fn initialize(&mut self, settings: &mut Settings, dir: &WorkDir) -> Result<()> {
        dir.make_files(settings.file_count, settings.file_size)
    }

    fn run(&self, index: usize, state: &WorkerState<'_>, dir: &WorkDir) -> Result<u64> {
        let count = state.settings.file_count;
        for i in 0..state.settings.cycles {
            let path = dir.file_path((index as u64 + i) % count);
            let file = File::open(&path).map_err(io_err(index, "open"))?;
            drop(file);
            state.stats.increment();
        }
        Ok(state.settings.cycles)
    }
}

/// `-m rename`: flip each worker's private file between two names
pub struct RenameBench;

impl RenameBench {
    fn names(dir: &WorkDir, index: usize) -> (std::path::PathBuf, std::path::PathBuf) {
        (
            dir.join(&format!("rename_{}_a", index)),
            dir.join(&format!("rename_{}_b", index)),
        )
    }
}

impl Workload for RenameBench {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn initialize(&mut self, settings: &mut Settings, dir: &WorkDir) -> Result<()> {
        let payload = random_payload(settings.file_size as usize, 0);
        for index in 0..settings.workers {
            let (a, b) = Self::names(dir, index);
            // Leftovers from an interrupted run would break the first rename
            let _ = fs::remove_file(&b);
            write_file(&a, &payload)?;
        }
        Ok(())
    }

    fn run(&self, index: usize, state: &WorkerState<'_>, dir: &WorkDir) -> Result<u64> {
        let (a, b) = Self::names(dir, index);
        for i in 0..state.settings.cycles {
            let (from, to) = if i % 2 == 0 { (&a, &b) } else { (&b, &a) };
            fs::rename(from, to).map_err(io_err(index, "rename"))?;
            state.stats.increment();
        }
        Ok(state.settings.cycles)
    }
}

/// `-m write_unlink`: create, fill, close and unlink a private file
pub struct WriteUnlinkBench;

impl Workload for WriteUnlinkBench {
    fn name(&self) -> &'static str {
        "write_unlink"
    }

    fn initialize(&mut self, _settings: &mut Settings, _dir: &WorkDir) -> Result<()> {
        Ok(())
    }

    fn run(&self, index: usize, state: &WorkerState<'_>, dir: &WorkDir) -> Result<u64> {
        let payload = random_payload(state.settings.file_size as usize, index as u32);
        let path = dir.join(&format!("write_unlink_{}", index));
        for _ in 0..state.settings.cycles {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o644)
                .open(&path)
                .map_err(io_err(index, "open"))?;
            file.write_all(&payload).map_err(io_err(index, "write"))?;
            drop(file);
            fs::remove_file(&path).map_err(io_err(index, "unlink"))?;
            state.stats.increment();
        }
        Ok(state.settings.cycles)
    }
}
