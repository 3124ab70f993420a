//! Behavioural checks any [`Vfs`] backing a shared in-memory store must pass.

use crate::ffi::*;
use crate::{AccessMode, FileControl, LockLevel, OpenFlags, Vfs, VfsError, VfsHandle, VfsResult};

macro_rules! check_result {
    ($expr:expr) => {
        if !$expr {
            return Err(VfsError::new(
                SQLITE_ERROR,
                format!("check failed: {}", stringify!($expr)),
            ));
        }
    };
}

macro_rules! check_eq {
    ($left:expr, $right:expr) => {
        let (left, right) = (&$left, &$right);
        if left != right {
            return Err(VfsError::new(
                SQLITE_ERROR,
                format!(
                    "{} != {}: {left:?} != {right:?}",
                    stringify!($left),
                    stringify!($right)
                ),
            ));
        }
    };
}

const MAIN_DB: i32 = SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE | SQLITE_OPEN_MAIN_DB;

fn test_read_write<V: Vfs>(vfs: &V) -> VfsResult<()> {
    let mut file = vfs.open(Some("test-suite-rw.db"), OpenFlags::from_bits(MAIN_DB))?;
    check_eq!(file.file_size()?, 0);

    file.write(b"hello", 0)?;
    file.write(b"world", 10)?;
    check_eq!(file.file_size()?, 15);

    let mut buf = [0xffu8; 15];
    check_result!(file.read(&mut buf, 0)?);
    check_eq!(&buf, b"hello\0\0\0\0\0world");

    // short read
    let mut buf = [0xffu8; 8];
    check_result!(!file.read(&mut buf, 12)?);
    check_eq!(&buf, b"rld\0\0\0\0\0");

    file.truncate(5)?;
    check_eq!(file.file_size()?, 5);
    file.truncate(50)?;
    check_eq!(file.file_size()?, 5);

    file.sync(SQLITE_SYNC_NORMAL)?;
    vfs.close(file)?;

    check_result!(vfs.access("test-suite-rw.db", AccessMode::Exists)?);
    vfs.delete("test-suite-rw.db", false)?;
    check_result!(!vfs.access("test-suite-rw.db", AccessMode::Exists)?);
    Ok(())
}

fn test_shared_handles<V: Vfs>(vfs: &V) -> VfsResult<()> {
    let flags = OpenFlags::from_bits(MAIN_DB);
    let mut a = vfs.open(Some("test-suite-shared.db"), flags)?;
    let b = vfs.open(Some("test-suite-shared.db"), flags)?;
    a.write(b"shared", 0)?;

    let mut buf = [0u8; 6];
    check_result!(b.read(&mut buf, 0)?);
    check_eq!(&buf, b"shared");

    // deferred until the last handle closes
    vfs.delete("test-suite-shared.db", false)?;
    check_result!(vfs.access("test-suite-shared.db", AccessMode::Exists)?);
    vfs.close(a)?;
    check_result!(b.read(&mut buf, 0)?);
    vfs.close(b)?;
    check_result!(!vfs.access("test-suite-shared.db", AccessMode::Exists)?);
    Ok(())
}

fn test_exclusive_create<V: Vfs>(vfs: &V) -> VfsResult<()> {
    let flags = OpenFlags::from_bits(MAIN_DB);
    let mut file = vfs.open(Some("test-suite-excl.db"), flags)?;
    file.write(b"keep", 0)?;

    let ret = vfs.open(
        Some("test-suite-excl.db"),
        flags | SQLITE_OPEN_EXCLUSIVE,
    );
    check_eq!(ret.err().map(|err| err.code()), Some(SQLITE_IOERR));
    check_eq!(file.file_size()?, 4);

    vfs.close(file)?;
    vfs.delete("test-suite-excl.db", false)?;
    Ok(())
}

fn test_delete_on_close<V: Vfs>(vfs: &V) -> VfsResult<()> {
    let flags = OpenFlags::from_bits(
        SQLITE_OPEN_READWRITE
            | SQLITE_OPEN_CREATE
            | SQLITE_OPEN_DELETEONCLOSE
            | SQLITE_OPEN_TEMP_JOURNAL,
    );
    let mut file = vfs.open(Some("test-suite-temp"), flags)?;
    file.write(&[1u8; 100], 0)?;
    check_result!(vfs.access("test-suite-temp", AccessMode::Exists)?);
    vfs.close(file)?;
    check_result!(!vfs.access("test-suite-temp", AccessMode::Exists)?);

    // deleting a missing file is not an error
    vfs.delete("test-suite-temp", false)?;
    Ok(())
}

fn test_file_methods<V: Vfs>(vfs: &V) -> VfsResult<()> {
    let mut file = vfs.open(Some("test-suite-misc.db"), OpenFlags::from_bits(MAIN_DB))?;
    for level in [
        LockLevel::Shared,
        LockLevel::Reserved,
        LockLevel::Exclusive,
    ] {
        file.lock(level)?;
    }
    check_result!(!file.check_reserved_lock()?);
    file.unlock(LockLevel::None)?;

    check_result!(file.file_control(FileControl::SizeHint(65536))?);
    check_eq!(file.file_size()?, 0);
    check_result!(!file.file_control(FileControl::Other(-1))?);
    check_result!(file.sector_size() > 0);

    vfs.close(file)?;
    vfs.delete("test-suite-misc.db", false)?;
    Ok(())
}

fn test_full_pathname<V: Vfs>(vfs: &V) -> VfsResult<()> {
    let mut out = vec![0xffu8; vfs.max_pathname() + 1];
    vfs.full_pathname("test-suite.db", &mut out)?;
    check_eq!(&out[..14], b"test-suite.db\0");

    let mut out = [0u8; 4];
    check_result!(vfs.full_pathname("test-suite.db", &mut out).is_err());
    Ok(())
}

/// Run every check against `vfs`.
pub fn test_vfs<V: Vfs>(vfs: &V) -> VfsResult<()> {
    test_read_write(vfs)?;
    test_shared_handles(vfs)?;
    test_exclusive_create(vfs)?;
    test_delete_on_close(vfs)?;
    test_file_methods(vfs)?;
    test_full_pathname(vfs)?;

    let mut buf = [0u8; 16];
    check_eq!(vfs.randomness(&mut buf), 16);
    check_result!(vfs.epoch_timestamp_in_ms() > 0);
    Ok(())
}
