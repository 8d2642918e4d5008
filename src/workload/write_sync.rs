//! Concurrent append with durability flush (`-m write_sync`)
//!
//! Workers extend one logical byte stream that is laid out over the working
//! file set (`file_0` holds bytes `0..file_size`, `file_1` the next
//! `file_size` bytes, and so on). Two shared offsets describe progress:
//!
//! - `write_offset`: bytes claimed and written, advanced only under the
//!   write lock;
//! - `flush_offset`: bytes known to be durable, advanced by any worker
//!   through [`FlushWatermark::advance`], never backwards.
//!
//! `flush_offset <= write_offset` holds at every point. The locking mode
//! decides which lock, if any, is held while a worker runs `fdatasync`:
//!
//! | mode        | write lock              | flush lock                 |
//! |-------------|-------------------------|----------------------------|
//! | `joined`    | held over write + flush | the write lock             |
//! | `dual`      | released after write    | exclusive sync lock        |
//! | `onlywrite` | released after write    | none                       |
//! | `sharesyncN`| released after write    | sync semaphore, N holders  |

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::{WorkerState, Workload};
use crate::error::{MeterError, Result};
use crate::fileset::WorkDir;
use crate::settings::Settings;
use crate::shm::{ProcessSemaphore, ProcessShared, SemaphoreGuard, SharedRegion};
use crate::stats::StatSlot;
use crate::timing::{PlatformDelay, SyntheticDelay};
use crate::watermark::FlushWatermark;

/// Upper bound (exclusive) of a single advance
pub const CHUNK_SIZE: u64 = 64 * 1024;

/// Extra increment range added by the `doublelast` option
pub const DOUBLELAST_SHIFT: u64 = 8 * 1024;

/// Synthetic work before each attempt, in delay units
const WORK_UNITS: u64 = 20;

/// Locking discipline for the write and flush phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// One lock held across write and flush
    #[default]
    Joined,
    /// Write lock for writing, separate sync lock for flushing
    Dual,
    /// Write lock for writing, flush unsynchronized
    OnlyWrite,
    /// Exclusive write lock, flush shared by up to `sync_concurrency` workers
    SharedSync,
}

/// Strategy parameters set through `-o`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSyncParams {
    pub mode: LockMode,
    pub sync_concurrency: u32,
    pub direct: bool,
    pub shift: u64,
    pub chunk_size: u64,
}

impl Default for WriteSyncParams {
    fn default() -> Self {
        Self {
            mode: LockMode::Joined,
            sync_concurrency: 1,
            direct: false,
            shift: 0,
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl WriteSyncParams {
    pub fn parse_option(&mut self, option: &str) -> Result<()> {
        match option {
            "joined" => self.mode = LockMode::Joined,
            "dual" => self.mode = LockMode::Dual,
            "onlywrite" => self.mode = LockMode::OnlyWrite,
            "direct" => self.direct = true,
            "doublelast" => self.shift = DOUBLELAST_SHIFT,
            other => {
                let concurrency = other
                    .strip_prefix("sharesync")
                    .and_then(|n| n.parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| MeterError::UnknownOption {
                        benchmark: "write_sync",
                        option: other.to_string(),
                    })?;
                self.mode = LockMode::SharedSync;
                self.sync_concurrency = concurrency;
            }
        }
        Ok(())
    }

    /// Exclusive upper bound for a worker's random increment
    pub fn increment_range(&self) -> u64 {
        (self.chunk_size + self.shift).max(1)
    }
}

/// State shared by every worker process
pub struct WriteSyncShared {
    write_lock: ProcessSemaphore,
    sync_lock: ProcessSemaphore,
    write_offset: AtomicU64,
    flush_offset: FlushWatermark,
}

// SAFETY: semaphores and atomics only.
unsafe impl ProcessShared for WriteSyncShared {}

impl WriteSyncShared {
    /// Map the shared state with both offsets at zero
    pub fn create(sync_concurrency: u32) -> Result<SharedRegion<WriteSyncShared>> {
        let region = SharedRegion::new(WriteSyncShared {
            write_lock: ProcessSemaphore::uninit(),
            sync_lock: ProcessSemaphore::uninit(),
            write_offset: AtomicU64::new(0),
            flush_offset: FlushWatermark::new(0),
        })?;
        region.write_lock.init(1)?;
        region.sync_lock.init(sync_concurrency.max(1))?;
        Ok(region)
    }

    #[inline]
    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    #[inline]
    pub fn flush_offset(&self) -> u64 {
        self.flush_offset.get()
    }
}

/// Mapping between logical offsets and the working file set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLayout {
    pub file_size: u64,
    pub file_count: u64,
}

impl FileLayout {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            file_size: settings.file_size,
            file_count: settings.file_count,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.file_size * self.file_count
    }

    /// File holding the byte at `offset`
    pub fn file_index(&self, offset: u64) -> u64 {
        offset / self.file_size
    }

    /// File holding the last byte of a range ending at `end` (exclusive)
    pub fn last_file_index(&self, end: u64) -> u64 {
        end.saturating_sub(1) / self.file_size
    }

    /// Logical offset one past the last byte of file `index`
    pub fn file_end(&self, index: u64) -> u64 {
        (index + 1) * self.file_size
    }
}

/// Positioned writes and flushes against the file set
pub trait SegmentStore {
    fn write_at(&mut self, index: u64, pos: u64, buf: &[u8]) -> io::Result<()>;
    fn sync(&mut self, index: u64) -> io::Result<()>;
}

/// [`SegmentStore`] over real files, keeping one file open at a time
pub struct SegmentFiles<'a> {
    dir: &'a WorkDir,
    direct: bool,
    open: Option<(u64, File)>,
}

impl<'a> SegmentFiles<'a> {
    pub fn new(dir: &'a WorkDir, direct: bool) -> Self {
        Self {
            dir,
            direct,
            open: None,
        }
    }

    fn select(&mut self, index: u64) -> io::Result<&File> {
        let entry = match self.open.take() {
            Some((current, file)) if current == index => (current, file),
            _ => {
                let mut options = OpenOptions::new();
                options.read(true).write(true).create(true).mode(0o644);
                #[cfg(target_os = "linux")]
                if self.direct {
                    options.custom_flags(libc::O_DIRECT);
                }
                (index, options.open(self.dir.file_path(index))?)
            }
        };
        let (_, file) = self.open.insert(entry);
        Ok(&*file)
    }
}

impl SegmentStore for SegmentFiles<'_> {
    fn write_at(&mut self, index: u64, pos: u64, buf: &[u8]) -> io::Result<()> {
        self.select(index)?.write_all_at(buf, pos)
    }

    fn sync(&mut self, index: u64) -> io::Result<()> {
        self.select(index)?.sync_data()
    }
}

/// Per-worker tallies
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCounters {
    pub cycles: u64,
    pub skipped: u64,
    pub writes: u64,
    pub bytes_written: u64,
    pub syncs: u64,
}

/// Result of one attempt to advance the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The file set is full
    Finished,
    /// Another worker had already flushed past the target
    Skipped,
    /// Target reached; `written` bytes were written by this worker
    Advanced { written: u64 },
}

/// One worker's side of the protocol
pub struct WriteSyncWorker<'a, S: SegmentStore, D: SyntheticDelay> {
    index: usize,
    shared: &'a WriteSyncShared,
    params: &'a WriteSyncParams,
    layout: FileLayout,
    store: S,
    delay: D,
    stats: &'a StatSlot,
    payload: Vec<u8>,
    rng: StdRng,
    counters: ProtocolCounters,
}

impl<'a, S: SegmentStore, D: SyntheticDelay> WriteSyncWorker<'a, S, D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        shared: &'a WriteSyncShared,
        params: &'a WriteSyncParams,
        layout: FileLayout,
        store: S,
        delay: D,
        stats: &'a StatSlot,
    ) -> Self {
        Self {
            index,
            shared,
            params,
            layout,
            store,
            delay,
            stats,
            payload: crate::payload::random_payload(layout.file_size as usize, index as u32),
            // Seeded by worker index: reproducible per worker, distinct across workers
            rng: StdRng::seed_from_u64(index as u64),
            counters: ProtocolCounters::default(),
        }
    }

    pub fn counters(&self) -> ProtocolCounters {
        self.counters
    }

    /// Run until the file set is full
    pub fn run(mut self) -> Result<ProtocolCounters> {
        while self.step()? != Attempt::Finished {}
        Ok(self.counters)
    }

    /// Pick a target, pause, then try to advance to it
    pub fn step(&mut self) -> Result<Attempt> {
        let Some(needed) = self.next_target() else {
            return Ok(Attempt::Finished);
        };
        self.delay.pause(WORK_UNITS);
        self.advance_to(needed)
    }

    /// Random target past the current write offset, or `None` once full
    pub fn next_target(&mut self) -> Option<u64> {
        let increment = self.rng.gen_range(0..self.params.increment_range());
        let write = self.shared.write_offset();
        if self.layout.file_index(write) >= self.layout.file_count {
            return None;
        }
        Some((write + increment).min(self.layout.capacity()))
    }

    /// Make bytes up to `needed` written and durable
    pub fn advance_to(&mut self, needed: u64) -> Result<Attempt> {
        let shared = self.shared;

        let write_guard = shared.write_lock.acquire()?;
        if shared.flush_offset() >= needed {
            drop(write_guard);
            self.counters.skipped += 1;
            return Ok(Attempt::Skipped);
        }

        let written = self.write_through(needed)?;

        let _held: Option<SemaphoreGuard<'_>> = match self.params.mode {
            LockMode::Joined => Some(write_guard),
            LockMode::Dual | LockMode::SharedSync => {
                let sync_guard = shared.sync_lock.acquire()?;
                drop(write_guard);
                Some(sync_guard)
            }
            LockMode::OnlyWrite => {
                drop(write_guard);
                None
            }
        };

        // Everything below this offset was written before the flush starts
        let observed = shared.write_offset();
        if shared.flush_offset() < needed {
            let file_index = self.layout.last_file_index(needed);
            self.flush(file_index)?;
            shared
                .flush_offset
                .advance(observed.min(self.layout.file_end(file_index)));
        }

        self.counters.cycles += 1;
        self.stats.increment();
        Ok(Attempt::Advanced { written })
    }

    /// Advance `write_offset` to `needed`, splitting at file boundaries.
    /// Caller holds the write lock.
    fn write_through(&mut self, needed: u64) -> Result<u64> {
        let shared = self.shared;
        let mut write = shared.write_offset();
        let start = write;

        while write < needed {
            let file_index = self.layout.file_index(write);
            let pos = write % self.layout.file_size;
            let len = needed.min(self.layout.file_end(file_index)) - write;
            let chunk = &self.payload[pos as usize..(pos + len) as usize];

            self.store
                .write_at(file_index, pos, chunk)
                .map_err(|source| MeterError::Write {
                    worker: self.index,
                    file_index,
                    source,
                })?;
            self.counters.writes += 1;
            self.counters.bytes_written += len;

            write += len;
            shared.write_offset.store(write, Ordering::Release);

            // A completed file is flushed before anyone moves past it
            if self.layout.file_index(write) != file_index {
                self.flush(file_index)?;
                shared.flush_offset.advance(write);
            }
        }

        Ok(write - start)
    }

    fn flush(&mut self, file_index: u64) -> Result<()> {
        self.store
            .sync(file_index)
            .map_err(|source| MeterError::Flush {
                worker: self.index,
                file_index,
                source,
            })?;
        self.counters.syncs += 1;
        Ok(())
    }
}

/// `-m write_sync`
#[derive(Default)]
pub struct WriteSyncBench {
    params: WriteSyncParams,
    shared: Option<SharedRegion<WriteSyncShared>>,
}

impl Workload for WriteSyncBench {
    fn name(&self) -> &'static str {
        "write_sync"
    }

    fn accepts_options(&self) -> bool {
        true
    }

    fn parse_option(&mut self, option: &str) -> Result<()> {
        self.params.parse_option(option)
    }

    fn initialize(&mut self, settings: &mut Settings, dir: &WorkDir) -> Result<()> {
        self.shared = Some(WriteSyncShared::create(self.params.sync_concurrency)?);
        dir.make_files(settings.file_count, settings.file_size)?;
        if self.params.direct {
            warn!("direct I/O requested; writes are not block aligned and may be rejected");
        }
        info!(
            "write_sync: mode={:?} sync_concurrency={} direct={} shift={}",
            self.params.mode, self.params.sync_concurrency, self.params.direct, self.params.shift
        );
        Ok(())
    }

    fn run(&self, index: usize, state: &WorkerState<'_>, dir: &WorkDir) -> Result<u64> {
        let shared = self
            .shared
            .as_deref()
            .ok_or(MeterError::NotInitialized("write_sync"))?;
        let worker = WriteSyncWorker::new(
            index,
            shared,
            &self.params,
            FileLayout::from_settings(state.settings),
            SegmentFiles::new(dir, self.params.direct),
            PlatformDelay::detect(),
            state.stats,
        );
        let counters = worker.run()?;
        debug!(
            "[{}] cycles={} skipped={} writes={} bytes={} syncs={}",
            index,
            counters.cycles,
            counters.skipped,
            counters.writes,
            counters.bytes_written,
            counters.syncs
        );
        Ok(state.stats.cycles())
    }
}
