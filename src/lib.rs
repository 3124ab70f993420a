#![doc = include_str!("../README.md")]

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
pub mod ffi;

pub mod alloc;
pub mod buffer;
pub mod memvfs;
pub mod os;
pub mod registry;
pub mod test_suite;

#[allow(non_snake_case)]
mod bridge;

use ffi::*;
use std::time::Duration;

pub use alloc::{MemMethods, MemStats, SystemAllocator};
pub use bridge::{register_vfs, registered_vfs, RegisterVfsError, SQLiteVfs, VfsAppData};
pub use buffer::MemBuffer;
pub use memvfs::{
    install, MemHandle, MemVfs, MemVfsCfg, MemVfsCfgBuilder, MemVfsError, MemVfsUtil,
    RandomSource,
};
pub use os::{NativeOsCallback, OsCallback, XorShiftRng};
pub use registry::{DeleteOutcome, FileRecord, MemRegistry};

/// A VFS error carrying one of the engine's result codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsError {
    code: i32,
    message: String,
}

impl VfsError {
    pub fn new(code: i32, message: String) -> Self {
        VfsError { code, message }
    }

    /// The result code handed back to the engine.
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for VfsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for VfsError {}

pub type VfsResult<T> = Result<T, VfsError>;

/// Failures of the in-memory store itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemStoreError {
    #[error("unable to allocate {0} bytes")]
    OutOfMemory(usize),
    #[error("invalid offset or size {0}")]
    InvalidOffset(i64),
    #[error("{0} already exists")]
    Exists(String),
    #[error("path is longer than {max} bytes: {name}")]
    NameTooLong { name: String, max: usize },
}

impl MemStoreError {
    pub fn vfs_err(&self, code: i32) -> VfsError {
        VfsError::new(code, format!("{self}"))
    }
}

/// Open flags as passed to `xOpen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(i32);

impl OpenFlags {
    pub const fn from_bits(bits: i32) -> Self {
        OpenFlags(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, flag: i32) -> bool {
        self.0 & flag == flag
    }

    /// `CREATE` and `EXCLUSIVE` are always used together: the file must not exist yet.
    pub const fn exclusive_create(self) -> bool {
        self.contains(SQLITE_OPEN_CREATE | SQLITE_OPEN_EXCLUSIVE)
    }

    pub const fn delete_on_close(self) -> bool {
        self.contains(SQLITE_OPEN_DELETEONCLOSE)
    }
}

impl std::ops::BitOr<i32> for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: i32) -> OpenFlags {
        OpenFlags(self.0 | rhs)
    }
}

/// Kind of check requested by `xAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Exists,
    ReadWrite,
    Read,
}

impl TryFrom<i32> for AccessMode {
    type Error = VfsError;

    fn try_from(value: i32) -> VfsResult<Self> {
        match value {
            SQLITE_ACCESS_EXISTS => Ok(AccessMode::Exists),
            SQLITE_ACCESS_READWRITE => Ok(AccessMode::ReadWrite),
            SQLITE_ACCESS_READ => Ok(AccessMode::Read),
            other => Err(VfsError::new(
                SQLITE_IOERR_ACCESS,
                format!("unknown access mode {other}"),
            )),
        }
    }
}

/// File lock levels, ordinals match `SQLITE_LOCK_*`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    None = SQLITE_LOCK_NONE,
    Shared = SQLITE_LOCK_SHARED,
    Reserved = SQLITE_LOCK_RESERVED,
    Pending = SQLITE_LOCK_PENDING,
    Exclusive = SQLITE_LOCK_EXCLUSIVE,
}

impl TryFrom<i32> for LockLevel {
    type Error = VfsError;

    fn try_from(value: i32) -> VfsResult<Self> {
        match value {
            SQLITE_LOCK_NONE => Ok(LockLevel::None),
            SQLITE_LOCK_SHARED => Ok(LockLevel::Shared),
            SQLITE_LOCK_RESERVED => Ok(LockLevel::Reserved),
            SQLITE_LOCK_PENDING => Ok(LockLevel::Pending),
            SQLITE_LOCK_EXCLUSIVE => Ok(LockLevel::Exclusive),
            other => Err(VfsError::new(
                SQLITE_IOERR_LOCK,
                format!("unknown lock level {other}"),
            )),
        }
    }
}

/// A decoded `xFileControl` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileControl {
    /// `SQLITE_FCNTL_SIZE_HINT`: the file is expected to grow to this size.
    SizeHint(i64),
    /// Any opcode the VFS does not interpret.
    Other(i32),
}

/// The byte content of a file.
pub trait VfsFile {
    /// Fill `buf` from `offset`.
    ///
    /// Returns `Ok(false)` on a short read; the tail of `buf` past the end of
    /// the file has been zeroed.
    fn read(&self, buf: &mut [u8], offset: i64) -> VfsResult<bool>;
    /// Write all of `buf` at `offset`, or nothing.
    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()>;
    fn truncate(&mut self, size: i64) -> VfsResult<()>;
    fn flush(&mut self) -> VfsResult<()> {
        Ok(())
    }
    fn size(&self) -> VfsResult<i64>;
    /// Advisory: the file is about to grow to `size`.
    fn size_hint(&mut self, _size: i64) -> VfsResult<()> {
        Ok(())
    }
}

/// The per-file half of the engine's method set (`sqlite3_io_methods`).
pub trait VfsHandle: 'static {
    /// See [`VfsFile::read`].
    fn read(&self, buf: &mut [u8], offset: i64) -> VfsResult<bool>;
    fn write(&mut self, buf: &[u8], offset: i64) -> VfsResult<()>;
    fn truncate(&mut self, size: i64) -> VfsResult<()>;
    fn sync(&mut self, flags: i32) -> VfsResult<()>;
    fn file_size(&self) -> VfsResult<i64>;
    fn lock(&mut self, level: LockLevel) -> VfsResult<()>;
    fn unlock(&mut self, level: LockLevel) -> VfsResult<()>;
    fn check_reserved_lock(&self) -> VfsResult<bool>;
    /// Returns `Ok(false)` when the opcode is not recognized.
    fn file_control(&mut self, op: FileControl) -> VfsResult<bool>;
    fn sector_size(&self) -> i32;
    fn device_characteristics(&self) -> i32;
}

/// The VFS half of the engine's method set (`sqlite3_vfs`).
pub trait Vfs: Send + Sync + 'static {
    type Handle: VfsHandle;

    /// Upper bound on path names, also advertised as `mxPathname`.
    fn max_pathname(&self) -> usize;

    /// Open `name`, or a fresh temporary file when the engine passes no name.
    fn open(&self, name: Option<&str>, flags: OpenFlags) -> VfsResult<Self::Handle>;
    fn close(&self, handle: Self::Handle) -> VfsResult<()>;
    fn delete(&self, name: &str, sync_dir: bool) -> VfsResult<()>;
    fn access(&self, name: &str, mode: AccessMode) -> VfsResult<bool>;
    /// Write the canonical, NUL-terminated form of `name` into `out`.
    fn full_pathname(&self, name: &str, out: &mut [u8]) -> VfsResult<()>;
    /// Returns the number of random bytes written to `buf`.
    fn randomness(&self, buf: &mut [u8]) -> usize;
    /// Returns how long the call actually slept.
    fn sleep(&self, dur: Duration) -> Duration;
    /// Milliseconds since the Unix epoch.
    fn epoch_timestamp_in_ms(&self) -> i64;
}
