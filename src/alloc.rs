//! Allocation contract shared by the registry and the file buffers.
//!
//! Buffers never call the global allocator directly: every region comes from
//! a [`MemMethods`] so that the store can be bounded, accounted and made to
//! fail on demand.

use std::sync::atomic::{AtomicUsize, Ordering};

/// The allocate/free/resize/size/roundup contract.
///
/// Regions are handed out as owned, zero-initialized boxes.
pub trait MemMethods: Send + Sync {
    /// Allocate `size` bytes, `None` when the allocator is exhausted.
    fn allocate(&self, size: usize) -> Option<Box<[u8]>>;

    /// Return a region obtained from this allocator.
    fn free(&self, mem: Box<[u8]>);

    /// Resize `mem` to `new_size`, keeping the leading bytes.
    ///
    /// On failure the untouched region is handed back in `Err`.
    fn reallocate(&self, mem: Box<[u8]>, new_size: usize) -> Result<Box<[u8]>, Box<[u8]>>;

    /// The real size of a region, which may exceed what was requested.
    fn usable_size(&self, mem: &[u8]) -> usize {
        mem.len()
    }

    /// Round a request up to the size that would actually be allocated.
    fn roundup(&self, size: usize) -> usize {
        size
    }

    fn stats(&self) -> MemStats;
}

/// Allocator accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemStats {
    /// Bytes currently handed out.
    pub outstanding: usize,
    /// Largest value `outstanding` ever reached.
    pub high_water: usize,
    /// Upper bound on `outstanding`, if any.
    pub limit: Option<usize>,
}

/// Allocator backed by the global heap, with optional size limit and
/// allocation granularity.
#[derive(Debug)]
pub struct SystemAllocator {
    granularity: usize,
    limit: Option<usize>,
    outstanding: AtomicUsize,
    high_water: AtomicUsize,
}

impl SystemAllocator {
    pub fn new() -> Self {
        SystemAllocator {
            granularity: 1,
            limit: None,
            outstanding: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Refuse allocations that would push outstanding memory past `limit` bytes.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Round every allocation up to a multiple of `granularity` bytes.
    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity.max(1);
        self
    }

    fn reserve(&self, size: usize) -> bool {
        let reserved = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(size)?;
                match self.limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            });
        match reserved {
            Ok(previous) => {
                self.high_water
                    .fetch_max(previous + size, Ordering::AcqRel);
                true
            }
            Err(_) => false,
        }
    }

    fn release(&self, size: usize) {
        self.outstanding.fetch_sub(size, Ordering::AcqRel);
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemMethods for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        if !self.reserve(size) {
            tracing::warn!(size, limit = ?self.limit, "allocation refused");
            return None;
        }
        let mut mem = Vec::new();
        if mem.try_reserve_exact(size).is_err() {
            self.release(size);
            tracing::warn!(size, "allocation failed");
            return None;
        }
        mem.resize(size, 0);
        Some(mem.into_boxed_slice())
    }

    fn free(&self, mem: Box<[u8]>) {
        self.release(mem.len());
    }

    fn reallocate(&self, mem: Box<[u8]>, new_size: usize) -> Result<Box<[u8]>, Box<[u8]>> {
        let Some(mut new_mem) = self.allocate(new_size) else {
            return Err(mem);
        };
        let keep = mem.len().min(new_size);
        new_mem[..keep].copy_from_slice(&mem[..keep]);
        self.free(mem);
        Ok(new_mem)
    }

    fn roundup(&self, size: usize) -> usize {
        size.div_ceil(self.granularity)
            .saturating_mul(self.granularity)
    }

    fn stats(&self) -> MemStats {
        MemStats {
            outstanding: self.outstanding.load(Ordering::Acquire),
            high_water: self.high_water.load(Ordering::Acquire),
            limit: self.limit,
        }
    }
}
