//! Process orchestration: fork one pinned worker per processor, release
//! them together, and reap them
//!
//! Everything that can fail on bad input or missing resources happens
//! before the first fork, so a misconfigured run never leaves children
//! behind.

use std::io::{self, Write};
use std::process;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};
use tracing::{debug, error, info, warn};

use crate::barrier::StartBarrier;
use crate::error::MeterError;
use crate::fileset::WorkDir;
use crate::progress::ProgressReporter;
use crate::settings::Settings;
use crate::shm::SharedRegion;
use crate::stats::StatsTable;
use crate::workload::{Benchmark, WorkerState, Workload};

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub workers: usize,
    /// Children that exited non-zero or were killed by a signal
    pub failed: usize,
    /// Sum of all workers' stats slots
    pub total_cycles: u64,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Processors in the calling process's affinity mask, ascending
pub fn allowed_cpus() -> Result<Vec<usize>> {
    let set =
        sched_getaffinity(Pid::from_raw(0)).context("Failed to read CPU affinity mask")?;
    Ok((0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect())
}

/// Pin the calling process to a single processor
pub fn pin_to_cpu(worker: usize, cpu: usize) -> Result<(), MeterError> {
    let mut set = CpuSet::new();
    set.set(cpu)
        .and_then(|()| sched_setaffinity(Pid::from_raw(0), &set))
        .map_err(|source| MeterError::Affinity {
            worker,
            cpu,
            source,
        })
}

/// Run one benchmark end to end
pub fn run(mut settings: Settings) -> Result<RunReport> {
    let mut bench = Benchmark::resolve(&settings.benchmark)?;
    bench.apply_options(settings.option_tokens())?;

    let stats = SharedRegion::new(StatsTable::new())?;
    let barrier = StartBarrier::create()?;
    let dir = WorkDir::prepare(&settings.work_dir)?;

    let name = bench.name();
    bench
        .initialize(&mut settings, &dir)
        .with_context(|| format!("Failed to initialize {}", name))?;

    let cpus = allowed_cpus()?;
    let workers = settings.workers;
    info!("forking {} workers for {}", workers, name);

    // Buffered output would otherwise be duplicated into every child
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut children = Vec::with_capacity(workers);
    for index in 0..workers {
        let cpu = cpus.get(index).copied().unwrap_or(index);
        // SAFETY: the child only runs the worker job and then exits
        // without unwinding back into this function.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let code = worker_main(index, cpu, &bench, &settings, &stats, &barrier, &dir);
                let _ = io::stdout().flush();
                process::exit(code);
            }
            Ok(ForkResult::Parent { child }) => {
                debug!("worker {} is pid {} on cpu {}", index, child, cpu);
                children.push(child);
            }
            Err(e) => {
                kill_all(&children);
                return Err(MeterError::Fork(e).into());
            }
        }
    }

    if let Err(e) = barrier.await_ready(workers) {
        kill_all(&children);
        return Err(e).context("Failed waiting for workers to become ready");
    }

    let failed = thread::scope(|s| -> Result<usize> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        if settings.progress {
            let table: &StatsTable = &stats;
            s.spawn(move || ProgressReporter::new(table, workers).run(stop_rx));
        }

        println!("Starting...");
        if let Err(e) = barrier.release(workers) {
            kill_all(&children);
            return Err(e).context("Failed to release workers");
        }

        let failed = reap(&children);
        drop(stop_tx);
        Ok(failed)
    })?;

    println!("Done");

    let report = RunReport {
        workers,
        failed,
        total_cycles: stats.total(workers),
    };
    info!(
        "{} workers finished, {} failed, {} cycles",
        report.workers, report.failed, report.total_cycles
    );
    Ok(report)
}

fn worker_main(
    index: usize,
    cpu: usize,
    bench: &Benchmark,
    settings: &Settings,
    stats: &StatsTable,
    barrier: &StartBarrier,
    dir: &WorkDir,
) -> i32 {
    let pinned = pin_to_cpu(index, cpu);

    // Signal even when pinning failed so the parent never waits forever
    if let Err(e) = barrier.signal_ready() {
        error!("[{}] {}", index, e);
        return 1;
    }
    if let Err(e) = pinned {
        error!("{}", e);
        return 1;
    }
    // SAFETY: sched_getcpu has no preconditions.
    let running_on = unsafe { libc::sched_getcpu() };
    debug!("[{}] running on cpu {}", index, running_on);
    if let Err(e) = barrier.wait_go() {
        error!("[{}] {}", index, e);
        return 1;
    }

    let state = WorkerState {
        settings,
        stats: stats.slot(index),
    };
    let started = Instant::now();
    match bench.run(index, &state, dir) {
        Ok(iterations) => {
            let elapsed = started.elapsed();
            println!("{}", worker_summary(index, getpid(), iterations, elapsed));
            0
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}

/// Completion line printed by each worker
pub fn worker_summary(index: usize, pid: Pid, iterations: u64, elapsed: Duration) -> String {
    let avg = if iterations > 0 {
        elapsed.as_nanos() as f64 / iterations as f64
    } else {
        0.0
    };
    format!(
        "[{} / {}] Worker is done with {} in {}.{:09} sec (avg.time = {:.6} ns)",
        index,
        pid,
        iterations,
        elapsed.as_secs(),
        elapsed.subsec_nanos(),
        avg
    )
}

/// Blocking wait for every child; returns how many did not exit cleanly
fn reap(children: &[Pid]) -> usize {
    let mut failed = 0;
    for &child in children {
        loop {
            match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, 0)) => break,
                Ok(WaitStatus::Exited(pid, code)) => {
                    warn!("worker pid {} exited with status {}", pid, code);
                    failed += 1;
                    break;
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    warn!("worker pid {} killed by {:?}", pid, signal);
                    failed += 1;
                    break;
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    error!("waitpid({}) failed: {}", child, e);
                    failed += 1;
                    break;
                }
            }
        }
    }
    failed
}

fn kill_all(children: &[Pid]) {
    for &child in children {
        if let Err(e) = kill(child, Signal::SIGKILL) {
            warn!("Can't kill worker pid {}: {}", child, e);
        }
    }
    reap(children);
}
