//! Adapter between the engine's C callback tables and the [`Vfs`] traits.
//!
//! The engine allocates `szOsFile` bytes per open file and hands them to
//! `xOpen`; here that block is a [`SQLiteVfsFile`], carrying the base
//! `sqlite3_file` followed by a pointer to the boxed [`VfsHandle`].

use crate::ffi::*;
use crate::{AccessMode, FileControl, LockLevel, OpenFlags, Vfs, VfsError, VfsHandle};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::TypeId;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};
use std::time::Duration;

/// Julian day number of the Unix epoch.
const UNIX_EPOCH_JULIAN_DAY: f64 = 2440587.5;

/// [`UNIX_EPOCH_JULIAN_DAY`] in milliseconds.
const UNIX_EPOCH_JULIAN_MS: i64 = 210_866_760_000_000;

const MS_PER_DAY: f64 = 86_400_000.0;

/// The per-file block handed out by the engine.
#[repr(C)]
pub struct SQLiteVfsFile<H> {
    /// Must stay first: the engine only knows this part.
    io_methods: sqlite3_file,
    vfs: *mut sqlite3_vfs,
    handle: *mut H,
}

impl<H> SQLiteVfsFile<H> {
    /// Convert a `sqlite3_file` pointer to a `SQLiteVfsFile` pointer.
    ///
    /// # Safety
    ///
    /// `file` must be the block the engine allocated for this VFS.
    unsafe fn from_file<'a>(file: *mut sqlite3_file) -> &'a mut SQLiteVfsFile<H> {
        &mut *file.cast::<Self>()
    }
}

/// Data owned by one registered VFS.
pub struct VfsAppData<V> {
    vfs: V,
    io_methods: sqlite3_io_methods,
    last_err: Mutex<Option<(i32, String)>>,
}

impl<V: Vfs> VfsAppData<V> {
    fn new(vfs: V) -> Self {
        VfsAppData {
            vfs,
            io_methods: SQLiteVfs::<V>::io_methods(),
            last_err: Mutex::new(None),
        }
    }

    pub fn vfs(&self) -> &V {
        &self.vfs
    }

    /// Remember `err` for `xGetLastError` and return its code.
    pub fn store_err(&self, err: VfsError) -> i32 {
        let code = err.code();
        tracing::debug!(code, message = err.message(), "vfs error");
        self.last_err.lock().replace((code, err.message().to_string()));
        code
    }

    /// Take the last stored error.
    pub fn pop_err(&self) -> Option<(i32, String)> {
        self.last_err.lock().take()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RegisterVfsError {
    #[error("An error occurred converting the given vfs name to a CStr")]
    ToCStr(#[from] std::ffi::NulError),
    #[error("An error occurred while registering vfs with sqlite: {0}")]
    RegisterVfs(i32),
    #[error("vfs {0} is already registered with a different implementation")]
    Foreign(String),
}

/// Registered VFS pointers with the Rust type behind each of them.
static REGISTERED: Lazy<Mutex<Vec<(usize, TypeId)>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Look up a VFS registered by [`register_vfs`].
///
/// Returns `Ok(None)` if no VFS of that name exists and an error if the name
/// belongs to a VFS of another type.
pub fn registered_vfs<V: Vfs>(
    vfs_name: &str,
) -> Result<Option<&'static VfsAppData<V>>, RegisterVfsError> {
    let name = CString::new(vfs_name)?;
    let vfs = unsafe { sqlite3_vfs_find(name.as_ptr()) };
    if vfs.is_null() {
        return Ok(None);
    }
    let known = REGISTERED
        .lock()
        .iter()
        .any(|&(ptr, type_id)| ptr == vfs as usize && type_id == TypeId::of::<V>());
    if !known {
        return Err(RegisterVfsError::Foreign(vfs_name.into()));
    }
    Ok(Some(unsafe { SQLiteVfs::<V>::app_data(vfs) }))
}

/// Register `vfs` with the engine under `vfs_name`.
///
/// The VFS lives for the rest of the process.
pub fn register_vfs<V: Vfs>(
    vfs_name: &str,
    vfs: V,
    default_vfs: bool,
) -> Result<&'static VfsAppData<V>, RegisterVfsError> {
    let name = CString::new(vfs_name)?.into_raw();
    let app_data = Box::into_raw(Box::new(VfsAppData::new(vfs)));
    let vfs = Box::into_raw(Box::new(SQLiteVfs::<V>::vfs(name, app_data)));

    let ret = unsafe { sqlite3_vfs_register(vfs, i32::from(default_vfs)) };
    if ret != SQLITE_OK {
        unsafe {
            drop(Box::from_raw(vfs));
            drop(Box::from_raw(app_data));
            drop(CString::from_raw(name));
        }
        return Err(RegisterVfsError::RegisterVfs(ret));
    }

    tracing::debug!(vfs_name, default_vfs, "register vfs");
    REGISTERED.lock().push((vfs as usize, TypeId::of::<V>()));

    Ok(unsafe { &*app_data })
}

/// The `extern "C"` callbacks of a [`Vfs`].
pub struct SQLiteVfs<V>(PhantomData<V>);

impl<V: Vfs> SQLiteVfs<V> {
    fn vfs(name: *mut c_char, app_data: *mut VfsAppData<V>) -> sqlite3_vfs {
        let mx_pathname = unsafe { (*app_data).vfs.max_pathname() };
        sqlite3_vfs {
            iVersion: 2,
            szOsFile: std::mem::size_of::<SQLiteVfsFile<V::Handle>>() as c_int,
            mxPathname: c_int::try_from(mx_pathname).unwrap_or(c_int::MAX),
            pNext: std::ptr::null_mut(),
            zName: name,
            pAppData: app_data.cast(),
            xOpen: Some(Self::xOpen),
            xDelete: Some(Self::xDelete),
            xAccess: Some(Self::xAccess),
            xFullPathname: Some(Self::xFullPathname),
            xDlOpen: None,
            xDlError: None,
            xDlSym: None,
            xDlClose: None,
            xRandomness: Some(Self::xRandomness),
            xSleep: Some(Self::xSleep),
            xCurrentTime: Some(Self::xCurrentTime),
            xGetLastError: Some(Self::xGetLastError),
            xCurrentTimeInt64: Some(Self::xCurrentTimeInt64),
            xSetSystemCall: None,
            xGetSystemCall: None,
            xNextSystemCall: None,
        }
    }

    fn io_methods() -> sqlite3_io_methods {
        sqlite3_io_methods {
            iVersion: 1,
            xClose: Some(Self::xClose),
            xRead: Some(Self::xRead),
            xWrite: Some(Self::xWrite),
            xTruncate: Some(Self::xTruncate),
            xSync: Some(Self::xSync),
            xFileSize: Some(Self::xFileSize),
            xLock: Some(Self::xLock),
            xUnlock: Some(Self::xUnlock),
            xCheckReservedLock: Some(Self::xCheckReservedLock),
            xFileControl: Some(Self::xFileControl),
            xSectorSize: Some(Self::xSectorSize),
            xDeviceCharacteristics: Some(Self::xDeviceCharacteristics),
            xShmMap: None,
            xShmLock: None,
            xShmBarrier: None,
            xShmUnmap: None,
            xFetch: None,
            xUnfetch: None,
        }
    }

    /// # Safety
    ///
    /// `vfs` must have been registered by [`register_vfs`] with this `V`.
    unsafe fn app_data<'a>(vfs: *mut sqlite3_vfs) -> &'a VfsAppData<V> {
        &*(*vfs).pAppData.cast::<VfsAppData<V>>()
    }

    unsafe fn file<'a>(
        pFile: *mut sqlite3_file,
    ) -> (&'a VfsAppData<V>, &'a mut V::Handle) {
        let vfs_file = SQLiteVfsFile::<V::Handle>::from_file(pFile);
        (Self::app_data(vfs_file.vfs), &mut *vfs_file.handle)
    }

    unsafe fn name<'a>(zName: *const c_char) -> Result<&'a str, VfsError> {
        CStr::from_ptr(zName)
            .to_str()
            .map_err(|_| VfsError::new(SQLITE_CANTOPEN, "file name is not valid utf-8".into()))
    }

    unsafe extern "C" fn xOpen(
        pVfs: *mut sqlite3_vfs,
        zName: sqlite3_filename,
        pFile: *mut sqlite3_file,
        flags: c_int,
        pOutFlags: *mut c_int,
    ) -> c_int {
        let app_data = Self::app_data(pVfs);
        let vfs_file = SQLiteVfsFile::<V::Handle>::from_file(pFile);
        // the engine only calls xClose when pMethods is set
        vfs_file.io_methods.pMethods = std::ptr::null();

        let name = if zName.is_null() {
            None
        } else {
            match Self::name(zName) {
                Ok(name) => Some(name),
                Err(err) => return app_data.store_err(err),
            }
        };

        match app_data.vfs.open(name, OpenFlags::from_bits(flags)) {
            Ok(handle) => {
                vfs_file.vfs = pVfs;
                vfs_file.handle = Box::into_raw(Box::new(handle));
                vfs_file.io_methods.pMethods = &app_data.io_methods;
                if !pOutFlags.is_null() {
                    *pOutFlags = flags;
                }
                SQLITE_OK
            }
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xDelete(
        pVfs: *mut sqlite3_vfs,
        zName: *const c_char,
        syncDir: c_int,
    ) -> c_int {
        let app_data = Self::app_data(pVfs);
        if zName.is_null() {
            return app_data.store_err(VfsError::new(SQLITE_IOERR_DELETE, "no file name".into()));
        }
        let ret = Self::name(zName).and_then(|name| app_data.vfs.delete(name, syncDir != 0));
        match ret {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xAccess(
        pVfs: *mut sqlite3_vfs,
        zName: *const c_char,
        flags: c_int,
        pResOut: *mut c_int,
    ) -> c_int {
        let app_data = Self::app_data(pVfs);
        if zName.is_null() {
            *pResOut = 0;
            return SQLITE_OK;
        }
        let ret = Self::name(zName).and_then(|name| {
            let mode = AccessMode::try_from(flags)?;
            app_data.vfs.access(name, mode)
        });
        match ret {
            Ok(found) => {
                *pResOut = c_int::from(found);
                SQLITE_OK
            }
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xFullPathname(
        pVfs: *mut sqlite3_vfs,
        zName: *const c_char,
        nOut: c_int,
        zOut: *mut c_char,
    ) -> c_int {
        let app_data = Self::app_data(pVfs);
        if zName.is_null() || zOut.is_null() || nOut <= 0 {
            return SQLITE_CANTOPEN;
        }
        let out = std::slice::from_raw_parts_mut(zOut.cast::<u8>(), nOut as usize);
        match Self::name(zName).and_then(|name| app_data.vfs.full_pathname(name, out)) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xRandomness(
        pVfs: *mut sqlite3_vfs,
        nByte: c_int,
        zOut: *mut c_char,
    ) -> c_int {
        if zOut.is_null() || nByte <= 0 {
            return 0;
        }
        let buf = std::slice::from_raw_parts_mut(zOut.cast::<u8>(), nByte as usize);
        Self::app_data(pVfs).vfs.randomness(buf) as c_int
    }

    unsafe extern "C" fn xSleep(pVfs: *mut sqlite3_vfs, microseconds: c_int) -> c_int {
        let dur = Duration::from_micros(microseconds.max(0) as u64);
        let slept = Self::app_data(pVfs).vfs.sleep(dur);
        c_int::try_from(slept.as_micros()).unwrap_or(c_int::MAX)
    }

    unsafe extern "C" fn xCurrentTime(pVfs: *mut sqlite3_vfs, pTimeOut: *mut f64) -> c_int {
        let ms = Self::app_data(pVfs).vfs.epoch_timestamp_in_ms();
        *pTimeOut = UNIX_EPOCH_JULIAN_DAY + ms as f64 / MS_PER_DAY;
        SQLITE_OK
    }

    unsafe extern "C" fn xCurrentTimeInt64(
        pVfs: *mut sqlite3_vfs,
        pOut: *mut sqlite3_int64,
    ) -> c_int {
        let ms = Self::app_data(pVfs).vfs.epoch_timestamp_in_ms();
        *pOut = UNIX_EPOCH_JULIAN_MS + ms;
        SQLITE_OK
    }

    unsafe extern "C" fn xGetLastError(
        pVfs: *mut sqlite3_vfs,
        nOut: c_int,
        zOut: *mut c_char,
    ) -> c_int {
        let Some((code, message)) = Self::app_data(pVfs).pop_err() else {
            if !zOut.is_null() && nOut > 0 {
                *zOut = 0;
            }
            return SQLITE_OK;
        };
        if !zOut.is_null() && nOut > 0 {
            let out = std::slice::from_raw_parts_mut(zOut.cast::<u8>(), nOut as usize);
            let len = message.len().min(out.len() - 1);
            out[..len].copy_from_slice(&message.as_bytes()[..len]);
            out[len] = 0;
        }
        code
    }

    unsafe extern "C" fn xClose(pFile: *mut sqlite3_file) -> c_int {
        let vfs_file = SQLiteVfsFile::<V::Handle>::from_file(pFile);
        if vfs_file.handle.is_null() {
            return SQLITE_OK;
        }
        let app_data = Self::app_data(vfs_file.vfs);
        let handle = Box::from_raw(vfs_file.handle);
        vfs_file.handle = std::ptr::null_mut();
        vfs_file.io_methods.pMethods = std::ptr::null();
        match app_data.vfs.close(*handle) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xRead(
        pFile: *mut sqlite3_file,
        zBuf: *mut c_void,
        iAmt: c_int,
        iOfst: sqlite3_int64,
    ) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        let buf = std::slice::from_raw_parts_mut(zBuf.cast::<u8>(), iAmt.max(0) as usize);
        match handle.read(buf, iOfst) {
            Ok(true) => SQLITE_OK,
            Ok(false) => SQLITE_IOERR_SHORT_READ,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xWrite(
        pFile: *mut sqlite3_file,
        zBuf: *const c_void,
        iAmt: c_int,
        iOfst: sqlite3_int64,
    ) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        let buf = std::slice::from_raw_parts(zBuf.cast::<u8>(), iAmt.max(0) as usize);
        match handle.write(buf, iOfst) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xTruncate(pFile: *mut sqlite3_file, size: sqlite3_int64) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        match handle.truncate(size) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xSync(pFile: *mut sqlite3_file, flags: c_int) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        match handle.sync(flags) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xFileSize(pFile: *mut sqlite3_file, pSize: *mut sqlite3_int64) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        match handle.file_size() {
            Ok(size) => {
                *pSize = size;
                SQLITE_OK
            }
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xLock(pFile: *mut sqlite3_file, eLock: c_int) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        match LockLevel::try_from(eLock).and_then(|level| handle.lock(level)) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xUnlock(pFile: *mut sqlite3_file, eLock: c_int) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        match LockLevel::try_from(eLock).and_then(|level| handle.unlock(level)) {
            Ok(()) => SQLITE_OK,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xCheckReservedLock(
        pFile: *mut sqlite3_file,
        pResOut: *mut c_int,
    ) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        match handle.check_reserved_lock() {
            Ok(reserved) => {
                *pResOut = c_int::from(reserved);
                SQLITE_OK
            }
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xFileControl(
        pFile: *mut sqlite3_file,
        op: c_int,
        pArg: *mut c_void,
    ) -> c_int {
        let (app_data, handle) = Self::file(pFile);
        let op = match op {
            SQLITE_FCNTL_SIZE_HINT if !pArg.is_null() => {
                FileControl::SizeHint(*pArg.cast::<sqlite3_int64>())
            }
            other => FileControl::Other(other),
        };
        match handle.file_control(op) {
            Ok(true) => SQLITE_OK,
            Ok(false) => SQLITE_NOTFOUND,
            Err(err) => app_data.store_err(err),
        }
    }

    unsafe extern "C" fn xSectorSize(pFile: *mut sqlite3_file) -> c_int {
        let (_, handle) = Self::file(pFile);
        handle.sector_size()
    }

    unsafe extern "C" fn xDeviceCharacteristics(pFile: *mut sqlite3_file) -> c_int {
        let (_, handle) = Self::file(pFile);
        handle.device_characteristics()
    }
}

#[cfg(test)]
mod tests {
    use super::{register_vfs, registered_vfs, RegisterVfsError, SQLiteVfs};
    use crate::ffi::*;
    use crate::memvfs::{MemVfs, MemVfsCfg};
    use crate::os::{NativeOsCallback, OsCallback};
    use std::ffi::CString;
    use std::os::raw::c_char;

    struct FixedClock;

    impl OsCallback for FixedClock {
        fn random(buf: &mut [u8]) {
            buf.fill(0xab);
        }

        fn epoch_timestamp_in_ms() -> i64 {
            86_400_000
        }
    }

    fn register<C: OsCallback>(name: &str) -> *mut sqlite3_vfs {
        register_vfs(name, MemVfs::<C>::new(&MemVfsCfg::default()), false).unwrap();
        let name = CString::new(name).unwrap();
        let vfs = unsafe { sqlite3_vfs_find(name.as_ptr()) };
        assert!(!vfs.is_null());
        vfs
    }

    #[test]
    fn test_register_and_lookup() {
        let _vfs = register::<NativeOsCallback>("bridge-lookup");
        assert!(registered_vfs::<MemVfs<NativeOsCallback>>("bridge-lookup")
            .unwrap()
            .is_some());
        assert!(registered_vfs::<MemVfs<NativeOsCallback>>("bridge-missing")
            .unwrap()
            .is_none());
        assert!(matches!(
            registered_vfs::<MemVfs<FixedClock>>("bridge-lookup"),
            Err(RegisterVfsError::Foreign(_))
        ));
        assert!(matches!(
            register_vfs("bad\0name", MemVfs::<NativeOsCallback>::new(&MemVfsCfg::default()), false),
            Err(RegisterVfsError::ToCStr(_))
        ));
    }

    #[test]
    fn test_julian_time() {
        let vfs = register::<FixedClock>("bridge-time");
        let mut day = 0f64;
        let mut ms = 0i64;
        unsafe {
            assert_eq!(
                SQLiteVfs::<MemVfs<FixedClock>>::xCurrentTime(vfs, &mut day),
                SQLITE_OK
            );
            assert_eq!(
                SQLiteVfs::<MemVfs<FixedClock>>::xCurrentTimeInt64(vfs, &mut ms),
                SQLITE_OK
            );
        }
        assert_eq!(day, 2440588.5);
        assert_eq!(ms, 210_866_760_000_000 + 86_400_000);
    }

    #[test]
    fn test_last_error_is_reported_once() {
        let vfs = register::<NativeOsCallback>("bridge-last-error");
        let name = CString::new("a-very-long-file-name.db").unwrap();
        let mut out = [0 as c_char; 8];
        let ret = unsafe {
            SQLiteVfs::<MemVfs<NativeOsCallback>>::xFullPathname(
                vfs,
                name.as_ptr(),
                out.len() as i32,
                out.as_mut_ptr(),
            )
        };
        assert_eq!(ret, SQLITE_CANTOPEN);

        let mut msg = [0x7f as c_char; 16];
        let code = unsafe {
            SQLiteVfs::<MemVfs<NativeOsCallback>>::xGetLastError(
                vfs,
                msg.len() as i32,
                msg.as_mut_ptr(),
            )
        };
        assert_eq!(code, SQLITE_CANTOPEN);
        assert!(msg.contains(&0));

        let code = unsafe {
            SQLiteVfs::<MemVfs<NativeOsCallback>>::xGetLastError(
                vfs,
                msg.len() as i32,
                msg.as_mut_ptr(),
            )
        };
        assert_eq!(code, SQLITE_OK);
        assert_eq!(msg[0], 0);
    }
}
