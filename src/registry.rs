//! Name-keyed registry of in-memory files.

use crate::alloc::MemMethods;
use crate::buffer::MemBuffer;
use crate::MemStoreError;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One logical file.
///
/// Open handles keep an `Arc` to the record itself, so a later delete or
/// re-creation of the same name never retargets them. `ref_count` and
/// `pending_delete` only change while the registry lock is held.
pub struct FileRecord {
    name: String,
    buffer: RwLock<MemBuffer>,
    ref_count: AtomicUsize,
    pending_delete: AtomicBool,
}

impl FileRecord {
    fn new(name: &str, buffer: MemBuffer) -> Self {
        FileRecord {
            name: name.into(),
            buffer: RwLock::new(buffer),
            ref_count: AtomicUsize::new(0),
            pending_delete: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of open handles.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Whether a delete is waiting for the last handle to close.
    pub fn is_pending_delete(&self) -> bool {
        self.pending_delete.load(Ordering::Acquire)
    }

    pub fn buffer(&self) -> RwLockReadGuard<'_, MemBuffer> {
        self.buffer.read()
    }

    pub fn buffer_mut(&self) -> RwLockWriteGuard<'_, MemBuffer> {
        self.buffer.write()
    }
}

impl fmt::Debug for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRecord")
            .field("name", &self.name)
            .field("ref_count", &self.ref_count())
            .field("pending_delete", &self.is_pending_delete())
            .finish_non_exhaustive()
    }
}

/// Result of [`MemRegistry::delete`] and [`MemRegistry::delete_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No such file.
    Missing,
    /// Unlinked and freed.
    Removed,
    /// Still open; removed when the last handle closes.
    Deferred,
    /// Still open; left untouched.
    Busy,
}

/// Owner of every live [`FileRecord`].
///
/// Lookups are a linear scan: a database engine keeps only a handful of
/// files (database, journal, temp files) open at a time.
pub struct MemRegistry {
    mem: Arc<dyn MemMethods>,
    initial_size: usize,
    max_pathname: usize,
    files: Mutex<Vec<Arc<FileRecord>>>,
}

impl MemRegistry {
    pub fn new(mem: Arc<dyn MemMethods>, initial_size: usize, max_pathname: usize) -> Self {
        MemRegistry {
            mem,
            initial_size,
            max_pathname,
            files: Mutex::new(Vec::new()),
        }
    }

    /// Names are compared on their first `max_pathname` bytes.
    fn key<'a>(&self, name: &'a str) -> &'a [u8] {
        let bytes = name.as_bytes();
        &bytes[..bytes.len().min(self.max_pathname)]
    }

    fn find_locked(&self, files: &[Arc<FileRecord>], name: &str) -> Option<Arc<FileRecord>> {
        let key = self.key(name);
        files
            .iter()
            .find(|file| self.key(&file.name) == key)
            .cloned()
    }

    /// Build a record that is not linked yet.
    fn alloc_record(&self, name: &str) -> Result<Arc<FileRecord>, MemStoreError> {
        tracing::trace!(name, size = self.initial_size, "allocate file");
        let buffer = MemBuffer::with_capacity(self.mem.clone(), self.initial_size)?;
        Ok(Arc::new(FileRecord::new(name, buffer)))
    }

    fn unlink_locked(files: &mut Vec<Arc<FileRecord>>, record: &Arc<FileRecord>) -> bool {
        match files.iter().position(|file| Arc::ptr_eq(file, record)) {
            Some(idx) => {
                files.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, name: &str) -> Option<Arc<FileRecord>> {
        let files = self.files.lock();
        self.find_locked(&files, name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Create and link a new, empty record for `name`.
    ///
    /// Fails if the name is taken or the initial buffer cannot be
    /// allocated; in both cases the registry is left untouched.
    pub fn allocate(&self, name: &str) -> Result<Arc<FileRecord>, MemStoreError> {
        let mut files = self.files.lock();
        if self.find_locked(&files, name).is_some() {
            return Err(MemStoreError::Exists(name.into()));
        }
        let record = self.alloc_record(name)?;
        files.push(record.clone());
        Ok(record)
    }

    /// Remove `record` from the registry without touching its handles.
    ///
    /// The storage is freed once the last `Arc` to the record is dropped.
    pub fn unlink(&self, record: &Arc<FileRecord>) -> bool {
        Self::unlink_locked(&mut self.files.lock(), record)
    }

    /// Find or create `name` and take a reference on it, as one step.
    pub fn open(&self, name: &str) -> Result<Arc<FileRecord>, MemStoreError> {
        let mut files = self.files.lock();
        let record = match self.find_locked(&files, name) {
            Some(record) => record,
            None => {
                let record = self.alloc_record(name)?;
                files.push(record.clone());
                record
            }
        };
        record.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(record)
    }

    /// Create `name` and take a reference on it, failing if it exists.
    pub fn open_new(&self, name: &str) -> Result<Arc<FileRecord>, MemStoreError> {
        let mut files = self.files.lock();
        if self.find_locked(&files, name).is_some() {
            return Err(MemStoreError::Exists(name.into()));
        }
        let record = self.alloc_record(name)?;
        record.ref_count.fetch_add(1, Ordering::AcqRel);
        files.push(record.clone());
        Ok(record)
    }

    /// Drop a reference taken by [`open`](Self::open).
    ///
    /// With `delete` set the record is marked for deletion. A marked record
    /// is unlinked and freed when its last reference goes away.
    pub fn release(&self, record: Arc<FileRecord>, delete: bool) {
        let mut files = self.files.lock();
        if delete {
            record.pending_delete.store(true, Ordering::Release);
        }
        let previous = record.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "{} released without open", record.name);
        if previous == 1 && record.is_pending_delete() {
            tracing::trace!(name = record.name(), "free file");
            Self::unlink_locked(&mut files, &record);
        }
    }

    /// Delete `name` now, or once its last handle closes.
    pub fn delete(&self, name: &str) -> DeleteOutcome {
        let mut files = self.files.lock();
        let Some(record) = self.find_locked(&files, name) else {
            return DeleteOutcome::Missing;
        };
        if record.ref_count() == 0 {
            tracing::trace!(name, "free file");
            Self::unlink_locked(&mut files, &record);
            DeleteOutcome::Removed
        } else {
            record.pending_delete.store(true, Ordering::Release);
            DeleteOutcome::Deferred
        }
    }

    /// Delete `name` only if no handle has it open.
    ///
    /// Never returns [`DeleteOutcome::Deferred`].
    pub fn delete_idle(&self, name: &str) -> DeleteOutcome {
        let mut files = self.files.lock();
        let Some(record) = self.find_locked(&files, name) else {
            return DeleteOutcome::Missing;
        };
        if record.ref_count() > 0 {
            return DeleteOutcome::Busy;
        }
        tracing::trace!(name, "free file");
        Self::unlink_locked(&mut files, &record);
        DeleteOutcome::Removed
    }

    /// Make `buffer` the content of `name`, creating the file if needed.
    ///
    /// The previous content of an existing file is freed.
    pub fn replace(&self, name: &str, buffer: MemBuffer) {
        let record = {
            let mut files = self.files.lock();
            match self.find_locked(&files, name) {
                Some(record) => {
                    record.ref_count.fetch_add(1, Ordering::AcqRel);
                    record
                }
                None => {
                    tracing::trace!(name, size = buffer.len(), "link file");
                    files.push(Arc::new(FileRecord::new(name, buffer)));
                    return;
                }
            }
        };
        *record.buffer_mut() = buffer;
        self.release(record, false);
    }

    /// Names of all linked files.
    pub fn names(&self) -> Vec<String> {
        self.files
            .lock()
            .iter()
            .map(|file| file.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_pathname(&self) -> usize {
        self.max_pathname
    }

    pub fn mem(&self) -> &Arc<dyn MemMethods> {
        &self.mem
    }
}

#[cfg(test)]
mod tests {
    use super::{DeleteOutcome, MemRegistry};
    use crate::alloc::{MemMethods, SystemAllocator};
    use crate::buffer::{MemBuffer, INITIAL_BUFFER_SIZE};
    use crate::MemStoreError;
    use std::sync::Arc;

    fn registry() -> (Arc<SystemAllocator>, MemRegistry) {
        let mem = Arc::new(SystemAllocator::new());
        let registry = MemRegistry::new(mem.clone(), INITIAL_BUFFER_SIZE, 64);
        (mem, registry)
    }

    #[test]
    fn test_open_twice_shares_record() {
        let (_, registry) = registry();
        let a = registry.open("a.db").unwrap();
        let b = registry.open("a.db").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.ref_count(), 2);
        assert_eq!(registry.len(), 1);

        a.buffer_mut().write_at(0, b"shared").unwrap();
        assert_eq!(b.buffer().as_slice(), b"shared");

        registry.release(a, false);
        assert_eq!(b.ref_count(), 1);
        registry.release(b, false);
        assert!(registry.exists("a.db"));
    }

    #[test]
    fn test_allocate_find_unlink() {
        let (mem, registry) = registry();
        assert!(registry.find("x").is_none());
        let record = registry.allocate("x").unwrap();
        assert_eq!(record.ref_count(), 0);
        assert!(registry.exists("x"));
        assert_eq!(
            registry.allocate("x").unwrap_err(),
            MemStoreError::Exists("x".into())
        );

        assert!(registry.unlink(&record));
        assert!(!registry.unlink(&record));
        assert!(!registry.exists("x"));
        assert_eq!(mem.stats().outstanding, INITIAL_BUFFER_SIZE);
        drop(record);
        assert_eq!(mem.stats().outstanding, 0);
    }

    #[test]
    fn test_delete_while_open_is_deferred() {
        let (mem, registry) = registry();
        let record = registry.open("a.db").unwrap();
        assert_eq!(registry.delete("a.db"), DeleteOutcome::Deferred);
        assert!(registry.exists("a.db"));
        assert!(record.is_pending_delete());

        registry.release(record, false);
        assert!(!registry.exists("a.db"));
        assert_eq!(mem.stats().outstanding, 0);
    }

    #[test]
    fn test_delete_idle_and_missing() {
        let (mem, registry) = registry();
        let record = registry.open("a.db").unwrap();
        registry.release(record, false);
        assert_eq!(registry.delete("a.db"), DeleteOutcome::Removed);
        assert_eq!(registry.delete("a.db"), DeleteOutcome::Missing);
        assert_eq!(mem.stats().outstanding, 0);
    }

    #[test]
    fn test_delete_on_close_waits_for_last_handle() {
        let (_, registry) = registry();
        let a = registry.open("tmp").unwrap();
        let b = registry.open("tmp").unwrap();
        registry.release(a, true);
        assert!(registry.exists("tmp"));
        registry.release(b, false);
        assert!(!registry.exists("tmp"));
    }

    #[test]
    fn test_handle_survives_recreate() {
        let (_, registry) = registry();
        let old = registry.open("a.db").unwrap();
        old.buffer_mut().write_at(0, b"old").unwrap();
        registry.delete("a.db");
        // pending records stay reachable by name
        let same = registry.open("a.db").unwrap();
        assert!(Arc::ptr_eq(&old, &same));
        registry.release(same, false);
        registry.release(old, false);
        assert!(!registry.exists("a.db"));

        let fresh = registry.open("a.db").unwrap();
        assert!(fresh.buffer().is_empty());
        registry.release(fresh, false);
    }

    #[test]
    fn test_open_new_is_exclusive() {
        let (_, registry) = registry();
        let a = registry.open_new("a.db").unwrap();
        a.buffer_mut().write_at(0, b"data").unwrap();
        assert_eq!(
            registry.open_new("a.db").unwrap_err(),
            MemStoreError::Exists("a.db".into())
        );
        assert_eq!(a.ref_count(), 1);
        assert_eq!(a.buffer().as_slice(), b"data");
        registry.release(a, false);
    }

    #[test]
    fn test_allocation_failure_leaves_no_record() {
        let mem = Arc::new(SystemAllocator::new().with_limit(INITIAL_BUFFER_SIZE));
        let registry = MemRegistry::new(mem.clone(), INITIAL_BUFFER_SIZE, 64);
        let a = registry.open("a").unwrap();
        assert_eq!(
            registry.open("b").unwrap_err(),
            MemStoreError::OutOfMemory(INITIAL_BUFFER_SIZE)
        );
        assert!(!registry.exists("b"));
        assert_eq!(registry.len(), 1);
        registry.release(a, true);
        assert!(registry.is_empty());
        assert_eq!(mem.stats().outstanding, 0);
    }

    #[test]
    fn test_names_compared_up_to_max_pathname() {
        let mem = Arc::new(SystemAllocator::new());
        let registry = MemRegistry::new(mem, INITIAL_BUFFER_SIZE, 4);
        let a = registry.open("abcdX").unwrap();
        let b = registry.open("abcdY").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.exists("abcd"));
        assert!(!registry.exists("abc"));
        registry.release(a, false);
        registry.release(b, false);
    }

    #[test]
    fn test_names() {
        let (_, registry) = registry();
        registry.allocate("a").unwrap();
        registry.allocate("b").unwrap();
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_delete_idle_leaves_open_file_alone() {
        let (_, registry) = registry();
        let record = registry.open("a.db").unwrap();
        assert_eq!(registry.delete_idle("a.db"), DeleteOutcome::Busy);
        assert!(!record.is_pending_delete());
        registry.release(record, false);
        assert!(registry.exists("a.db"));

        assert_eq!(registry.delete_idle("a.db"), DeleteOutcome::Removed);
        assert_eq!(registry.delete_idle("a.db"), DeleteOutcome::Missing);
    }

    #[test]
    fn test_replace_swaps_content() {
        let (mem, registry) = registry();
        let record = registry.open("a.db").unwrap();
        record.buffer_mut().write_at(0, b"old content").unwrap();

        let mut buffer = MemBuffer::with_capacity(mem.clone(), 3).unwrap();
        buffer.write_at(0, b"new").unwrap();
        registry.replace("a.db", buffer);
        assert_eq!(record.buffer().as_slice(), b"new");
        assert_eq!(record.ref_count(), 1);
        // the initial allocation went away with the old buffer
        assert_eq!(mem.stats().outstanding, 3);
        registry.release(record, false);

        let buffer = MemBuffer::with_capacity(mem.clone(), 0).unwrap();
        registry.replace("b.db", buffer);
        let b = registry.find("b.db").unwrap();
        assert_eq!(b.ref_count(), 0);
        assert!(b.buffer().is_empty());
    }

    #[test]
    fn test_concurrent_open_release_delete() {
        let (mem, registry) = registry();
        std::thread::scope(|s| {
            for t in 0..4u8 {
                let registry = &registry;
                s.spawn(move || {
                    for i in 0..500i64 {
                        let record = registry.open("shared").unwrap();
                        record.buffer_mut().write_at(i % 8, &[t; 8]).unwrap();
                        registry.release(record, i % 3 == 0);
                    }
                });
            }
            let registry = &registry;
            s.spawn(move || {
                for _ in 0..500 {
                    let outcome = registry.delete_idle("shared");
                    assert_ne!(outcome, DeleteOutcome::Deferred);
                }
            });
        });

        // only delete-on-close may have marked the record
        if let Some(record) = registry.find("shared") {
            assert_eq!(record.ref_count(), 0);
            assert!(!record.is_pending_delete());
            drop(record);
            assert_eq!(registry.delete_idle("shared"), DeleteOutcome::Removed);
        }
        assert!(registry.is_empty());
        assert_eq!(mem.stats().outstanding, 0);
    }
}
