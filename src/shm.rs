//! Cross-process shared memory
//!
//! A [`SharedRegion`] is an anonymous `MAP_SHARED` mapping created by the
//! parent before fork. Every forked worker sees the same physical pages at
//! the same address, so atomics and process-shared semaphores placed inside
//! it synchronize across processes.

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use std::cell::UnsafeCell;
use std::mem::{size_of, MaybeUninit};
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{MeterError, Result};

/// Types that stay valid when their bytes are shared between processes.
///
/// # Safety
///
/// Implementors must contain no pointers into process-private memory and
/// must synchronize all interior mutation through atomics or
/// process-shared primitives such as [`ProcessSemaphore`].
pub unsafe trait ProcessShared: Sync {}

/// Owning handle to a `T` living in a shared anonymous mapping
pub struct SharedRegion<T: ProcessShared> {
    ptr: NonNull<T>,
    len: NonZeroUsize,
}

impl<T: ProcessShared> SharedRegion<T> {
    /// Map a shared region and move `value` into it
    pub fn new(value: T) -> Result<Self> {
        let len = NonZeroUsize::new(size_of::<T>()).unwrap_or(NonZeroUsize::MIN);

        // SAFETY: fresh anonymous mapping, no existing memory is aliased.
        let raw = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(MeterError::SharedMemory)?;

        let ptr = raw.cast::<T>();
        // SAFETY: the mapping is page aligned, at least size_of::<T>() bytes
        // and exclusively owned until this handle is returned.
        unsafe { ptr.as_ptr().write(value) };

        Ok(Self { ptr, len })
    }
}

impl<T: ProcessShared> Deref for SharedRegion<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialized in `new`, lives until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ProcessShared> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        // SAFETY: we own the value and the mapping; workers leave through
        // process::exit and never run this.
        unsafe {
            std::ptr::drop_in_place(self.ptr.as_ptr());
            let _ = munmap(self.ptr.cast(), self.len.get());
        }
    }
}

// SAFETY: T is Sync and process-shareable; the handle only hands out &T.
unsafe impl<T: ProcessShared> Send for SharedRegion<T> {}
unsafe impl<T: ProcessShared> Sync for SharedRegion<T> {}

/// POSIX unnamed semaphore with `pshared = 1`
///
/// Must be initialized in place with [`ProcessSemaphore::init`] once the
/// owning struct sits inside a [`SharedRegion`]; a `sem_t` must not move
/// after `sem_init`.
pub struct ProcessSemaphore {
    raw: UnsafeCell<MaybeUninit<libc::sem_t>>,
    ready: AtomicBool,
}

impl ProcessSemaphore {
    pub const fn uninit() -> Self {
        Self {
            raw: UnsafeCell::new(MaybeUninit::uninit()),
            ready: AtomicBool::new(false),
        }
    }

    fn as_ptr(&self) -> *mut libc::sem_t {
        self.raw.get().cast()
    }

    /// Initialize in place with the given count
    pub fn init(&self, value: u32) -> Result<()> {
        // SAFETY: pointer is valid for the lifetime of &self.
        if unsafe { libc::sem_init(self.as_ptr(), 1, value) } != 0 {
            return Err(MeterError::Semaphore {
                op: "sem_init",
                source: std::io::Error::last_os_error(),
            });
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Decrement, blocking while the count is zero
    pub fn wait(&self) -> Result<()> {
        debug_assert!(self.ready.load(Ordering::Acquire));
        loop {
            // SAFETY: initialized by `init`.
            if unsafe { libc::sem_wait(self.as_ptr()) } == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(MeterError::Semaphore {
                    op: "sem_wait",
                    source: err,
                });
            }
        }
    }

    /// Increment, waking one waiter
    pub fn post(&self) -> Result<()> {
        debug_assert!(self.ready.load(Ordering::Acquire));
        // SAFETY: initialized by `init`.
        if unsafe { libc::sem_post(self.as_ptr()) } != 0 {
            return Err(MeterError::Semaphore {
                op: "sem_post",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Acquire and release on drop
    pub fn acquire(&self) -> Result<SemaphoreGuard<'_>> {
        self.wait()?;
        Ok(SemaphoreGuard { sem: self })
    }

    /// Current count
    pub fn value(&self) -> Result<i32> {
        let mut value = 0;
        // SAFETY: initialized by `init`.
        if unsafe { libc::sem_getvalue(self.as_ptr(), &mut value) } != 0 {
            return Err(MeterError::Semaphore {
                op: "sem_getvalue",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(value)
    }
}

impl Drop for ProcessSemaphore {
    fn drop(&mut self) {
        if *self.ready.get_mut() {
            // SAFETY: initialized, and no process waits on it any more.
            unsafe { libc::sem_destroy(self.as_ptr()) };
        }
    }
}

// SAFETY: sem_t operations are safe to call concurrently from any thread or
// process sharing the mapping.
unsafe impl Sync for ProcessSemaphore {}
unsafe impl Send for ProcessSemaphore {}

/// Releases one unit of a [`ProcessSemaphore`] when dropped
pub struct SemaphoreGuard<'a> {
    sem: &'a ProcessSemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.post() {
            tracing::error!("failed to release semaphore: {}", e);
        }
    }
}
