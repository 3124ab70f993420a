//! Memory VFS: the in-memory file store behind the engine's VFS interface.
//!
//! ```rust
//! use sqlite_inmem_vfs::{install, MemVfsCfgBuilder, NativeOsCallback};
//!
//! let util = install::<NativeOsCallback>(
//!     &MemVfsCfgBuilder::new()
//!         .vfs_name("memvfs-doc")
//!         .memory_limit(64 * 1024 * 1024)
//!         .build(),
//!     false,
//! )
//! .unwrap();
//!
//! util.import_file("seed.db", b"bytes").unwrap();
//! assert_eq!(util.export_file("seed.db").unwrap(), b"bytes");
//! ```

use crate::alloc::{MemMethods, MemStats, SystemAllocator};
use crate::bridge::{register_vfs, registered_vfs, RegisterVfsError, VfsAppData};
use crate::buffer::{MemBuffer, INITIAL_BUFFER_SIZE, PAGE_SIZE};
use crate::ffi::*;
use crate::os::{OsCallback, XorShiftRng};
use crate::registry::{DeleteOutcome, FileRecord, MemRegistry};
use crate::{
    AccessMode, FileControl, LockLevel, MemStoreError, OpenFlags, Vfs, VfsError, VfsFile,
    VfsHandle, VfsResult,
};

use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Where `xRandomness` draws its bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomSource {
    /// Per-VFS xorshift* generator.
    XorShift { seed: u64 },
    /// The [`OsCallback`] entropy source.
    Os,
}

/// `MemVfs` options
#[derive(Debug, Clone)]
pub struct MemVfsCfg {
    /// The SQLite VFS name under which this VFS is registered.
    pub vfs_name: String,
    /// Sector size reported by every file.
    pub sector_size: i32,
    /// Maximum path length, advertised as `mxPathname`.
    pub max_pathname: usize,
    /// Capacity of a newly created file.
    pub initial_file_size: usize,
    pub random: RandomSource,
    /// Upper bound on the bytes held by all files together.
    pub memory_limit: Option<usize>,
    /// Allocations are rounded up to a multiple of this.
    pub alloc_granularity: usize,
}

impl Default for MemVfsCfg {
    fn default() -> Self {
        Self {
            vfs_name: "memvfs".into(),
            sector_size: PAGE_SIZE as i32,
            max_pathname: 512,
            initial_file_size: INITIAL_BUFFER_SIZE,
            random: RandomSource::XorShift {
                seed: 0x2545_f491_4f6c_dd1d,
            },
            memory_limit: None,
            alloc_granularity: 1,
        }
    }
}

/// Build `MemVfsCfg`
pub struct MemVfsCfgBuilder(MemVfsCfg);

impl MemVfsCfgBuilder {
    pub fn new() -> Self {
        Self(MemVfsCfg::default())
    }

    /// The SQLite VFS name under which this VFS is registered.
    pub fn vfs_name(mut self, name: &str) -> Self {
        self.0.vfs_name = name.into();
        self
    }

    pub fn sector_size(mut self, size: i32) -> Self {
        self.0.sector_size = size;
        self
    }

    pub fn max_pathname(mut self, max: usize) -> Self {
        self.0.max_pathname = max;
        self
    }

    pub fn initial_file_size(mut self, size: usize) -> Self {
        self.0.initial_file_size = size;
        self
    }

    /// Seed the built-in generator used by `xRandomness`.
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.random = RandomSource::XorShift { seed };
        self
    }

    /// Take `xRandomness` bytes from the [`OsCallback`] instead.
    pub fn os_random(mut self) -> Self {
        self.0.random = RandomSource::Os;
        self
    }

    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.0.memory_limit = Some(limit);
        self
    }

    pub fn alloc_granularity(mut self, granularity: usize) -> Self {
        self.0.alloc_granularity = granularity;
        self
    }

    /// Build `MemVfsCfg`.
    pub fn build(self) -> MemVfsCfg {
        self.0
    }
}

impl Default for MemVfsCfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MemVfsError {
    #[error(transparent)]
    Vfs(#[from] RegisterVfsError),
    #[error(transparent)]
    Store(#[from] MemStoreError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} is open")]
    Busy(String),
}

/// An open file: a reference on one [`FileRecord`] plus its open flags.
pub struct MemHandle {
    record: Arc<FileRecord>,
    flags: OpenFlags,
    sector_size: i32,
}

impl MemHandle {
    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn record(&self) -> &Arc<FileRecord> {
        &self.record
    }
}

impl VfsHandle for MemHandle {
    fn read(&self, buf: &mut [u8], offset: i64) -> VfsResult<bool> {
        self.record.buffer().read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()> {
        self.record.buffer_mut().write(buf, offset)
    }

    fn truncate(&mut self, size: i64) -> VfsResult<()> {
        self.record.buffer_mut().truncate(size)
    }

    // writes land in memory as they happen
    fn sync(&mut self, _flags: i32) -> VfsResult<()> {
        self.record.buffer_mut().flush()
    }

    fn file_size(&self) -> VfsResult<i64> {
        self.record.buffer().size()
    }

    fn lock(&mut self, _level: LockLevel) -> VfsResult<()> {
        Ok(())
    }

    fn unlock(&mut self, _level: LockLevel) -> VfsResult<()> {
        Ok(())
    }

    fn check_reserved_lock(&self) -> VfsResult<bool> {
        Ok(false)
    }

    fn file_control(&mut self, op: FileControl) -> VfsResult<bool> {
        match op {
            FileControl::SizeHint(size) => {
                self.record.buffer_mut().size_hint(size)?;
                Ok(true)
            }
            FileControl::Other(_) => Ok(false),
        }
    }

    fn sector_size(&self) -> i32 {
        self.sector_size
    }

    fn device_characteristics(&self) -> i32 {
        SQLITE_IOCAP_ATOMIC
            | SQLITE_IOCAP_ATOMIC512
            | SQLITE_IOCAP_ATOMIC1K
            | SQLITE_IOCAP_ATOMIC2K
            | SQLITE_IOCAP_ATOMIC4K
            | SQLITE_IOCAP_ATOMIC8K
            | SQLITE_IOCAP_ATOMIC16K
            | SQLITE_IOCAP_ATOMIC32K
            | SQLITE_IOCAP_ATOMIC64K
            | SQLITE_IOCAP_SAFE_APPEND
            | SQLITE_IOCAP_SEQUENTIAL
    }
}

enum Randomness {
    XorShift(Mutex<XorShiftRng>),
    Os,
}

/// The in-memory VFS.
///
/// Each instance owns its own [`MemRegistry`], so independent instances
/// never see each other's files.
pub struct MemVfs<C> {
    registry: MemRegistry,
    sector_size: i32,
    random: Randomness,
    _os: PhantomData<fn() -> C>,
}

impl<C: OsCallback> MemVfs<C> {
    pub fn new(cfg: &MemVfsCfg) -> Self {
        let mut mem = SystemAllocator::new().with_granularity(cfg.alloc_granularity);
        if let Some(limit) = cfg.memory_limit {
            mem = mem.with_limit(limit);
        }
        Self::with_allocator(cfg, Arc::new(mem))
    }

    /// Like [`new`](Self::new), with a custom allocator. `memory_limit` and
    /// `alloc_granularity` are then up to `mem`.
    pub fn with_allocator(cfg: &MemVfsCfg, mem: Arc<dyn MemMethods>) -> Self {
        let random = match cfg.random {
            RandomSource::XorShift { seed } => {
                Randomness::XorShift(Mutex::new(XorShiftRng::new(seed)))
            }
            RandomSource::Os => Randomness::Os,
        };
        MemVfs {
            registry: MemRegistry::new(mem, cfg.initial_file_size, cfg.max_pathname),
            sector_size: cfg.sector_size,
            random,
            _os: PhantomData,
        }
    }

    pub fn registry(&self) -> &MemRegistry {
        &self.registry
    }

    pub fn stats(&self) -> MemStats {
        self.registry.mem().stats()
    }

    fn fill_random(&self, buf: &mut [u8]) {
        match &self.random {
            Randomness::XorShift(rng) => rng.lock().fill_bytes(buf),
            Randomness::Os => C::random(buf),
        }
    }

    /// Create a file for an open that came without a name.
    fn open_temp(&self) -> Result<Arc<FileRecord>, MemStoreError> {
        let mut bytes = [0u8; 8];
        self.fill_random(&mut bytes);
        let prefix = format!("/tmp/etilqs_{:016x}", u64::from_le_bytes(bytes));

        let mut attempt = 0u64;
        loop {
            let name = match attempt {
                0 => prefix.clone(),
                n => format!("{prefix}-{n}"),
            };
            match self.registry.open_new(&name) {
                Err(MemStoreError::Exists(_)) => attempt += 1,
                ret => return ret,
            }
        }
    }

    /// Replace the content of `name` with `bytes`, creating it if needed.
    pub fn import_file(&self, name: &str, bytes: &[u8]) -> Result<(), MemStoreError> {
        let max = self.registry.max_pathname();
        if name.len() > max {
            return Err(MemStoreError::NameTooLong {
                name: name.into(),
                max,
            });
        }
        // built aside so that a failed import leaves the store untouched
        let mut buffer = MemBuffer::with_capacity(self.registry.mem().clone(), bytes.len())?;
        buffer.write_at(0, bytes)?;
        self.registry.replace(name, buffer);
        Ok(())
    }

    /// Copy out the content of `name`.
    pub fn export_file(&self, name: &str) -> Option<Vec<u8>> {
        let record = self.registry.find(name)?;
        let bytes = record.buffer().as_slice().to_vec();
        Some(bytes)
    }
}

impl<C: OsCallback> Vfs for MemVfs<C> {
    type Handle = MemHandle;

    fn max_pathname(&self) -> usize {
        self.registry.max_pathname()
    }

    fn open(&self, name: Option<&str>, flags: OpenFlags) -> VfsResult<MemHandle> {
        let record = match name {
            Some(name) if flags.exclusive_create() => self.registry.open_new(name),
            Some(name) => self.registry.open(name),
            None => self.open_temp(),
        }
        .map_err(|err| err.vfs_err(SQLITE_IOERR))?;

        tracing::debug!(
            name = record.name(),
            flags = flags.bits(),
            refs = record.ref_count(),
            "open"
        );

        Ok(MemHandle {
            record,
            flags,
            sector_size: self.sector_size,
        })
    }

    fn close(&self, handle: MemHandle) -> VfsResult<()> {
        tracing::debug!(
            name = handle.name(),
            delete_on_close = handle.flags.delete_on_close(),
            "close"
        );
        self.registry
            .release(handle.record, handle.flags.delete_on_close());
        Ok(())
    }

    fn delete(&self, name: &str, _sync_dir: bool) -> VfsResult<()> {
        let outcome = self.registry.delete(name);
        tracing::debug!(name, ?outcome, "delete");
        Ok(())
    }

    // there are no permissions: every existing file is readable and writable
    fn access(&self, name: &str, _mode: AccessMode) -> VfsResult<bool> {
        Ok(self.registry.exists(name))
    }

    fn full_pathname(&self, name: &str, out: &mut [u8]) -> VfsResult<()> {
        let len = name.len();
        if len > self.max_pathname() || len + 1 > out.len() {
            return Err(VfsError::new(
                SQLITE_CANTOPEN,
                format!("no room for the full path of {name}"),
            ));
        }
        out[..len].copy_from_slice(name.as_bytes());
        out[len] = 0;
        Ok(())
    }

    fn randomness(&self, buf: &mut [u8]) -> usize {
        self.fill_random(buf);
        buf.len()
    }

    // nothing in memory ever has to be waited for
    fn sleep(&self, dur: Duration) -> Duration {
        dur
    }

    fn epoch_timestamp_in_ms(&self) -> i64 {
        C::epoch_timestamp_in_ms()
    }
}

/// MemVfs management tool.
pub struct MemVfsUtil<C: OsCallback> {
    app: &'static VfsAppData<MemVfs<C>>,
}

impl<C: OsCallback> MemVfsUtil<C> {
    /// The registered VFS.
    pub fn vfs(&self) -> &MemVfs<C> {
        self.app.vfs()
    }

    /// List all files.
    pub fn list(&self) -> Vec<String> {
        self.vfs().registry().names()
    }

    /// Number of files.
    pub fn count(&self) -> usize {
        self.vfs().registry().len()
    }

    /// Does the file exist.
    pub fn exists(&self, name: &str) -> bool {
        self.vfs().registry().exists(name)
    }

    /// Allocator accounting for all files of this VFS.
    pub fn stats(&self) -> MemStats {
        self.vfs().stats()
    }

    /// Imports the contents of a file, overwriting any existing content.
    pub fn import_file(&self, name: &str, bytes: &[u8]) -> Result<(), MemVfsError> {
        Ok(self.vfs().import_file(name, bytes)?)
    }

    /// Export the file.
    pub fn export_file(&self, name: &str) -> Result<Vec<u8>, MemVfsError> {
        self.vfs()
            .export_file(name)
            .ok_or_else(|| MemVfsError::NotFound(name.into()))
    }

    /// Delete the file, make sure that it is closed.
    ///
    /// Returns `Ok(false)` if there was nothing to delete.
    pub fn delete_file(&self, name: &str) -> Result<bool, MemVfsError> {
        match self.vfs().registry().delete_idle(name) {
            DeleteOutcome::Missing => Ok(false),
            DeleteOutcome::Removed => Ok(true),
            DeleteOutcome::Busy | DeleteOutcome::Deferred => Err(MemVfsError::Busy(name.into())),
        }
    }
}

/// Register the memory VFS and return a management tool.
///
/// If a memory VFS is already registered under `cfg.vfs_name`, only the
/// management tool is returned.
pub fn install<C: OsCallback>(
    cfg: &MemVfsCfg,
    default_vfs: bool,
) -> Result<MemVfsUtil<C>, MemVfsError> {
    static REGISTER_GUARD: Mutex<()> = Mutex::new(());
    let _guard = REGISTER_GUARD.lock();

    let app = match registered_vfs::<MemVfs<C>>(&cfg.vfs_name)? {
        Some(app) => app,
        None => register_vfs(&cfg.vfs_name, MemVfs::<C>::new(cfg), default_vfs)?,
    };

    Ok(MemVfsUtil { app })
}
