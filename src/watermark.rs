//! Lock-free monotone offset
//!
//! The flushed-offset watermark is advanced by racing processes that may not
//! hold any common lock. Advancing is a compare-and-swap loop that only ever
//! moves the value forward: a stale proposal is dropped, a concurrent larger
//! advance is never overwritten.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
#[repr(transparent)]
pub struct FlushWatermark {
    offset: AtomicU64,
}

impl FlushWatermark {
    pub const fn new(offset: u64) -> Self {
        Self {
            offset: AtomicU64::new(offset),
        }
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Move the watermark to at least `candidate`
    ///
    /// Returns true if this call moved it. Returns false when the watermark
    /// was already at or past `candidate`, including when another caller got
    /// there first.
    ///
    /// # Example
    /// ```
    /// use syscallmeter::watermark::FlushWatermark;
    ///
    /// let mark = FlushWatermark::new(0);
    /// assert!(mark.advance(4096));
    /// assert!(!mark.advance(1024));
    /// assert_eq!(mark.get(), 4096);
    /// ```
    pub fn advance(&self, candidate: u64) -> bool {
        let mut current = self.offset.load(Ordering::Acquire);
        while current < candidate {
            match self.offset.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }
}
