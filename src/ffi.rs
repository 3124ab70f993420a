//! The engine's OS-interface vocabulary.
//!
//! The callback-table structs come straight from `libsqlite3-sys`; the
//! integer vocabulary is declared here so the values the VFS hands back are
//! pinned to the engine's published enumeration.

pub use libsqlite3_sys::{
    sqlite3_file, sqlite3_int64, sqlite3_io_methods, sqlite3_vfs, sqlite3_vfs_find,
    sqlite3_vfs_register,
};

pub type sqlite3_filename = *const ::core::ffi::c_char;

pub const SQLITE_OK: i32 = 0;
pub const SQLITE_ERROR: i32 = 1;
pub const SQLITE_IOERR: i32 = 10;
pub const SQLITE_NOTFOUND: i32 = 12;
pub const SQLITE_CANTOPEN: i32 = 14;

pub const SQLITE_IOERR_READ: i32 = SQLITE_IOERR | (1 << 8);
pub const SQLITE_IOERR_SHORT_READ: i32 = SQLITE_IOERR | (2 << 8);
pub const SQLITE_IOERR_WRITE: i32 = SQLITE_IOERR | (3 << 8);
pub const SQLITE_IOERR_TRUNCATE: i32 = SQLITE_IOERR | (6 << 8);
pub const SQLITE_IOERR_DELETE: i32 = SQLITE_IOERR | (10 << 8);
pub const SQLITE_IOERR_ACCESS: i32 = SQLITE_IOERR | (13 << 8);
pub const SQLITE_IOERR_LOCK: i32 = SQLITE_IOERR | (15 << 8);

pub const SQLITE_OPEN_READONLY: i32 = 0x0000_0001;
pub const SQLITE_OPEN_READWRITE: i32 = 0x0000_0002;
pub const SQLITE_OPEN_CREATE: i32 = 0x0000_0004;
pub const SQLITE_OPEN_DELETEONCLOSE: i32 = 0x0000_0008;
pub const SQLITE_OPEN_EXCLUSIVE: i32 = 0x0000_0010;
pub const SQLITE_OPEN_MAIN_DB: i32 = 0x0000_0100;
pub const SQLITE_OPEN_TEMP_DB: i32 = 0x0000_0200;
pub const SQLITE_OPEN_TRANSIENT_DB: i32 = 0x0000_0400;
pub const SQLITE_OPEN_MAIN_JOURNAL: i32 = 0x0000_0800;
pub const SQLITE_OPEN_TEMP_JOURNAL: i32 = 0x0000_1000;
pub const SQLITE_OPEN_SUBJOURNAL: i32 = 0x0000_2000;
pub const SQLITE_OPEN_SUPER_JOURNAL: i32 = 0x0000_4000;
pub const SQLITE_OPEN_MASTER_JOURNAL: i32 = SQLITE_OPEN_SUPER_JOURNAL;
pub const SQLITE_OPEN_WAL: i32 = 0x0008_0000;

pub const SQLITE_ACCESS_EXISTS: i32 = 0;
pub const SQLITE_ACCESS_READWRITE: i32 = 1;
pub const SQLITE_ACCESS_READ: i32 = 2;

pub const SQLITE_LOCK_NONE: i32 = 0;
pub const SQLITE_LOCK_SHARED: i32 = 1;
pub const SQLITE_LOCK_RESERVED: i32 = 2;
pub const SQLITE_LOCK_PENDING: i32 = 3;
pub const SQLITE_LOCK_EXCLUSIVE: i32 = 4;

pub const SQLITE_SYNC_NORMAL: i32 = 0x0000_0002;

pub const SQLITE_FCNTL_SIZE_HINT: i32 = 5;

pub const SQLITE_IOCAP_ATOMIC: i32 = 0x0000_0001;
pub const SQLITE_IOCAP_ATOMIC512: i32 = 0x0000_0002;
pub const SQLITE_IOCAP_ATOMIC1K: i32 = 0x0000_0004;
pub const SQLITE_IOCAP_ATOMIC2K: i32 = 0x0000_0008;
pub const SQLITE_IOCAP_ATOMIC4K: i32 = 0x0000_0010;
pub const SQLITE_IOCAP_ATOMIC8K: i32 = 0x0000_0020;
pub const SQLITE_IOCAP_ATOMIC16K: i32 = 0x0000_0040;
pub const SQLITE_IOCAP_ATOMIC32K: i32 = 0x0000_0080;
pub const SQLITE_IOCAP_ATOMIC64K: i32 = 0x0000_0100;
pub const SQLITE_IOCAP_SAFE_APPEND: i32 = 0x0000_0200;
pub const SQLITE_IOCAP_SEQUENTIAL: i32 = 0x0000_0400;
