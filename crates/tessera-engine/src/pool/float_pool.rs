use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed buffer lengths handed out by [`FloatPool`].
///
/// The largest class fits a full batch: 65536 vertices at 2+4+2 floats
/// plus headroom.
pub const SIZE_CLASSES: [usize; 5] = [64, 1024, 16384, 65536, 786432];

/// Default number of free buffers retained per size class.
pub const DEFAULT_RETENTION: usize = 64;

/// Counters reported by [`FloatPool::stats`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FloatPoolStats {
    /// Acquisitions served from a free list.
    pub hits: u64,
    /// Acquisitions that allocated a new class-sized buffer.
    pub misses: u64,
    /// Acquisitions larger than the largest class.
    pub oversize: u64,
    /// Buffers currently sitting in free lists.
    pub retained: usize,
}

struct SizeClass {
    len: usize,
    free: Mutex<Vec<Box<[f32]>>>,
}

impl SizeClass {
    fn free(&self) -> MutexGuard<'_, Vec<Box<[f32]>>> {
        // A poisoned free list only ever holds whole buffers.
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Size-classed recycler for large `f32` buffers.
///
/// Acquired buffers are at least as long as requested and their contents
/// are unspecified. Only buffers whose length is exactly a class length are
/// taken back; anything else is dropped on release.
pub struct FloatPool {
    classes: [SizeClass; SIZE_CLASSES.len()],
    retention: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    oversize: AtomicU64,
}

impl FloatPool {
    pub fn new(retention: usize) -> Self {
        Self {
            classes: SIZE_CLASSES.map(|len| SizeClass { len, free: Mutex::new(Vec::new()) }),
            retention,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            oversize: AtomicU64::new(0),
        }
    }

    /// Index of the smallest class that fits `len`, if any.
    pub fn class_for(len: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&class| class >= len)
    }

    /// Returns a buffer with `buffer.len() >= min_len`.
    pub fn acquire(&self, min_len: usize) -> Box<[f32]> {
        let Some(idx) = Self::class_for(min_len) else {
            self.oversize.fetch_add(1, Ordering::Relaxed);
            log::trace!("float pool: oversize request of {min_len}");
            return vec![0.0; min_len].into_boxed_slice();
        };

        let class = &self.classes[idx];
        if let Some(buffer) = class.free().pop() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return buffer;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        vec![0.0; class.len].into_boxed_slice()
    }

    /// Hands a buffer back. Non-class lengths and overflow past the
    /// retention cap are dropped.
    pub fn release(&self, buffer: Box<[f32]>) {
        let Some(class) = self.classes.iter().find(|c| c.len == buffer.len()) else {
            return;
        };
        let mut free = class.free();
        if free.len() < self.retention {
            free.push(buffer);
        }
    }

    pub fn stats(&self) -> FloatPoolStats {
        FloatPoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oversize: self.oversize.load(Ordering::Relaxed),
            retained: self.classes.iter().map(|c| c.free().len()).sum(),
        }
    }
}

impl Default for FloatPool {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl std::fmt::Debug for FloatPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloatPool")
            .field("retention", &self.retention)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── acquire ───────────────────────────────────────────────────────────

    #[test]
    fn acquire_rounds_up_to_class() {
        let pool = FloatPool::default();
        assert_eq!(pool.acquire(0).len(), 64);
        assert_eq!(pool.acquire(64).len(), 64);
        assert_eq!(pool.acquire(65).len(), 1024);
        assert_eq!(pool.acquire(70_000).len(), 786432);
    }

    #[test]
    fn oversize_gets_exact_length() {
        let pool = FloatPool::default();
        assert_eq!(pool.acquire(1_000_000).len(), 1_000_000);
        assert_eq!(pool.stats().oversize, 1);
    }

    // ── release ───────────────────────────────────────────────────────────

    #[test]
    fn released_buffer_is_reused() {
        let pool = FloatPool::default();
        let buf = pool.acquire(500);
        let ptr = buf.as_ptr();
        pool.release(buf);

        let again = pool.acquire(1000);
        assert_eq!(again.as_ptr(), ptr);
        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn non_class_length_is_not_retained() {
        let pool = FloatPool::default();
        pool.release(vec![0.0; 100].into_boxed_slice());
        pool.release(pool.acquire(2_000_000));
        assert_eq!(pool.stats().retained, 0);
    }

    #[test]
    fn retention_cap_bounds_free_list() {
        let pool = FloatPool::new(2);
        let bufs: Vec<_> = (0..5).map(|_| pool.acquire(10)).collect();
        for b in bufs {
            pool.release(b);
        }
        assert_eq!(pool.stats().retained, 2);
    }

    #[test]
    fn shared_across_threads() {
        let pool = std::sync::Arc::new(FloatPool::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = std::sync::Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let b = pool.acquire(1024);
                        pool.release(b);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.hits + stats.misses, 400);
        assert!(stats.retained <= 4);
    }
}
