//! Growable byte buffer holding the content of one file.

use crate::alloc::MemMethods;
use crate::ffi::{SQLITE_IOERR_READ, SQLITE_IOERR_TRUNCATE, SQLITE_IOERR_WRITE};
use crate::{MemStoreError, VfsFile, VfsResult};

use std::sync::Arc;

/// Assumed page size of the engine.
pub const PAGE_SIZE: usize = 4096;

/// Capacity of a freshly created file.
pub const INITIAL_BUFFER_SIZE: usize = PAGE_SIZE * 2;

/// File content: an allocation from a [`MemMethods`] plus the logical length.
///
/// `len <= capacity` always holds. Bytes between `len` and the capacity are
/// never observable through reads.
pub struct MemBuffer {
    mem: Arc<dyn MemMethods>,
    data: Box<[u8]>,
    len: usize,
}

impl MemBuffer {
    pub fn with_capacity(mem: Arc<dyn MemMethods>, capacity: usize) -> Result<Self, MemStoreError> {
        let size = mem.roundup(capacity);
        let data = mem
            .allocate(size)
            .ok_or(MemStoreError::OutOfMemory(size))?;
        Ok(MemBuffer { mem, data, len: 0 })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Usable size of the current allocation.
    pub fn capacity(&self) -> usize {
        self.mem.usable_size(&self.data)
    }

    /// The valid bytes of the file.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Grow the allocation until it holds at least `needed` bytes, doubling
    /// the current capacity each step.
    fn ensure_capacity(&mut self, needed: usize) -> Result<(), MemStoreError> {
        let old_size = self.capacity();
        if old_size >= needed {
            return Ok(());
        }

        let mut new_size = old_size.max(1);
        while new_size < needed {
            new_size = new_size
                .checked_mul(2)
                .ok_or(MemStoreError::OutOfMemory(needed))?;
        }
        let new_size = self.mem.roundup(new_size);

        tracing::trace!(old_size, new_size, needed, "grow buffer");

        let data = std::mem::take(&mut self.data);
        match self.mem.reallocate(data, new_size) {
            Ok(data) => {
                self.data = data;
                Ok(())
            }
            Err(data) => {
                self.data = data;
                Err(MemStoreError::OutOfMemory(new_size))
            }
        }
    }

    fn checked_range(offset: i64, len: usize) -> Result<(usize, usize), MemStoreError> {
        let start = usize::try_from(offset).map_err(|_| MemStoreError::InvalidOffset(offset))?;
        let end = start
            .checked_add(len)
            .ok_or(MemStoreError::InvalidOffset(offset))?;
        Ok((start, end))
    }

    /// Copy as many bytes as are available at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied; the rest of `buf` is left alone.
    pub fn read_at(&self, offset: i64, buf: &mut [u8]) -> Result<usize, MemStoreError> {
        let (start, end) = Self::checked_range(offset, buf.len())?;
        if start >= self.len {
            return Ok(0);
        }
        let end = end.min(self.len);
        let n = end - start;
        buf[..n].copy_from_slice(&self.data[start..end]);
        Ok(n)
    }

    /// Write all of `buf` at `offset`, growing the buffer as needed.
    ///
    /// A write starting past the end zero-fills the gap. If the buffer cannot
    /// grow, nothing is written and the length is unchanged.
    pub fn write_at(&mut self, offset: i64, buf: &[u8]) -> Result<usize, MemStoreError> {
        let (start, end) = Self::checked_range(offset, buf.len())?;
        self.ensure_capacity(end)?;

        if start > self.len {
            self.data[self.len..start].fill(0);
        }
        self.data[start..end].copy_from_slice(buf);
        if end > self.len {
            self.len = end;
        }
        Ok(buf.len())
    }

    /// Shrink the logical length to `size`. The allocation is kept.
    pub fn truncate_to(&mut self, size: i64) -> Result<(), MemStoreError> {
        let size = usize::try_from(size).map_err(|_| MemStoreError::InvalidOffset(size))?;
        if size < self.len {
            self.len = size;
        }
        Ok(())
    }

    /// Pre-grow the allocation to hold `size` bytes.
    pub fn reserve(&mut self, size: i64) -> Result<(), MemStoreError> {
        let size = usize::try_from(size).map_err(|_| MemStoreError::InvalidOffset(size))?;
        self.ensure_capacity(size)
    }
}

impl Drop for MemBuffer {
    fn drop(&mut self) {
        self.mem.free(std::mem::take(&mut self.data));
    }
}

impl VfsFile for MemBuffer {
    fn read(&self, buf: &mut [u8], offset: i64) -> VfsResult<bool> {
        let n = self
            .read_at(offset, buf)
            .map_err(|err| err.vfs_err(SQLITE_IOERR_READ))?;
        if n < buf.len() {
            buf[n..].fill(0);
            return Ok(false);
        }
        Ok(true)
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()> {
        self.write_at(offset, buf)
            .map_err(|err| err.vfs_err(SQLITE_IOERR_WRITE))?;
        Ok(())
    }

    fn truncate(&mut self, size: i64) -> VfsResult<()> {
        self.truncate_to(size)
            .map_err(|err| err.vfs_err(SQLITE_IOERR_TRUNCATE))
    }

    fn size(&self) -> VfsResult<i64> {
        Ok(self.len as i64)
    }

    fn size_hint(&mut self, size: i64) -> VfsResult<()> {
        if let Err(err) = self.reserve(size) {
            tracing::debug!(size, %err, "size hint ignored");
        }
        Ok(())
    }
}
