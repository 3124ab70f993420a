use libsqlite3_sys::*;
use sqlite_inmem_vfs::{install, MemVfsCfgBuilder, MemVfsError, MemVfsUtil, NativeOsCallback};
use std::ffi::{CStr, CString};

fn cstr(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn install_vfs(name: &str) -> MemVfsUtil<NativeOsCallback> {
    install::<NativeOsCallback>(&MemVfsCfgBuilder::new().vfs_name(name).build(), false).unwrap()
}

struct Db(*mut sqlite3);

impl Db {
    fn open(path: &str, vfs: &str) -> Result<Db, i32> {
        let mut db = std::ptr::null_mut();
        let path = cstr(path);
        let vfs = cstr(vfs);
        let ret = unsafe {
            sqlite3_open_v2(
                path.as_ptr(),
                &mut db as *mut _,
                SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE,
                vfs.as_ptr(),
            )
        };
        if ret != SQLITE_OK {
            unsafe { sqlite3_close(db) };
            return Err(ret);
        }
        Ok(Db(db))
    }

    fn exec(&self, sql: &str) -> Result<(), String> {
        let sql = cstr(sql);
        let mut errmsg: *mut std::os::raw::c_char = std::ptr::null_mut();
        let ret = unsafe {
            sqlite3_exec(
                self.0,
                sql.as_ptr(),
                None,
                std::ptr::null_mut(),
                &mut errmsg as *mut _,
            )
        };
        if ret == SQLITE_OK {
            return Ok(());
        }
        let msg = if errmsg.is_null() {
            format!("error code {ret}")
        } else {
            let msg = unsafe { CStr::from_ptr(errmsg) }.to_string_lossy().into_owned();
            unsafe { sqlite3_free(errmsg.cast()) };
            msg
        };
        Err(msg)
    }

    fn query_i64(&self, sql: &str) -> i64 {
        let sql = cstr(sql);
        let mut stmt = std::ptr::null_mut();
        let ret = unsafe {
            sqlite3_prepare_v2(
                self.0,
                sql.as_ptr(),
                -1,
                &mut stmt as *mut _,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, SQLITE_OK);
        assert_eq!(unsafe { sqlite3_step(stmt) }, SQLITE_ROW);
        let value = unsafe { sqlite3_column_int64(stmt, 0) };
        assert_eq!(unsafe { sqlite3_finalize(stmt) }, SQLITE_OK);
        value
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        unsafe { sqlite3_close(self.0) };
    }
}

#[test]
fn test_database_survives_reopen() {
    let util = install_vfs("it-reopen");
    {
        let db = Db::open("company.db", "it-reopen").unwrap();
        db.exec("CREATE TABLE company(id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .unwrap();
        db.exec("INSERT INTO company(name) VALUES ('John Doe'), ('Jane Doe');")
            .unwrap();
    }
    assert!(util.exists("company.db"));
    // rollback journal is deleted at commit
    assert_eq!(util.list(), vec!["company.db".to_string()]);

    let db = Db::open("company.db", "it-reopen").unwrap();
    assert_eq!(db.query_i64("SELECT count(*) FROM company;"), 2);
}

#[test]
fn test_two_connections_share_file() {
    let _util = install_vfs("it-shared");
    let a = Db::open("shared.db", "it-shared").unwrap();
    let b = Db::open("shared.db", "it-shared").unwrap();
    a.exec("CREATE TABLE t(v INTEGER); INSERT INTO t VALUES (42);")
        .unwrap();
    assert_eq!(b.query_i64("SELECT v FROM t;"), 42);
}

#[test]
fn test_transactions_and_temp_files() {
    let util = install_vfs("it-temp");
    let db = Db::open("tx.db", "it-temp").unwrap();
    db.exec("PRAGMA temp_store = FILE;").unwrap();
    db.exec("CREATE TABLE t(v INTEGER);").unwrap();
    db.exec(
        "BEGIN;
         WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 5000)
         INSERT INTO t SELECT x FROM c;
         COMMIT;",
    )
    .unwrap();

    db.exec("BEGIN; DELETE FROM t; ROLLBACK;").unwrap();
    assert_eq!(db.query_i64("SELECT count(*) FROM t;"), 5000);

    db.exec("CREATE TEMP TABLE scratch AS SELECT v FROM t ORDER BY v DESC;")
        .unwrap();
    assert_eq!(db.query_i64("SELECT max(v) FROM scratch;"), 5000);
    drop(db);

    // temp files and journals are gone once the connection closes
    assert_eq!(util.list(), vec!["tx.db".to_string()]);
}

#[test]
fn test_import_export_delete() {
    let util = install_vfs("it-util");
    {
        let db = Db::open("src.db", "it-util").unwrap();
        db.exec("CREATE TABLE t(v TEXT); INSERT INTO t VALUES ('copied');")
            .unwrap();
    }

    let bytes = util.export_file("src.db").unwrap();
    assert_eq!(&bytes[..16], b"SQLite format 3\0");
    util.import_file("copy.db", &bytes).unwrap();
    assert_eq!(util.count(), 2);

    let db = Db::open("copy.db", "it-util").unwrap();
    assert_eq!(db.query_i64("SELECT count(*) FROM t WHERE v = 'copied';"), 1);

    assert!(matches!(
        util.delete_file("copy.db"),
        Err(MemVfsError::Busy(_))
    ));
    drop(db);
    assert!(util.delete_file("copy.db").unwrap());
    assert!(!util.delete_file("copy.db").unwrap());
    assert!(matches!(
        util.export_file("copy.db"),
        Err(MemVfsError::NotFound(_))
    ));
    assert_eq!(util.list(), vec!["src.db".to_string()]);
}

#[test]
fn test_install_is_idempotent() {
    let a = install_vfs("it-idempotent");
    a.import_file("x", b"x").unwrap();
    let b = install_vfs("it-idempotent");
    assert!(b.exists("x"));
    assert!(matches!(
        install::<NativeOsCallback>(&MemVfsCfgBuilder::new().vfs_name("bad\0").build(), false),
        Err(MemVfsError::Vfs(_))
    ));
}

#[test]
fn test_memory_limit_surfaces_as_error() {
    let util = install::<NativeOsCallback>(
        &MemVfsCfgBuilder::new()
            .vfs_name("it-limit")
            .memory_limit(256 * 1024)
            .build(),
        false,
    )
    .unwrap();

    let db = Db::open("limited.db", "it-limit").unwrap();
    db.exec("CREATE TABLE t(v BLOB);").unwrap();
    let ret = db.exec("INSERT INTO t VALUES (zeroblob(1048576));");
    assert!(ret.is_err());

    let stats = util.stats();
    assert!(stats.outstanding <= 256 * 1024);
    assert!(stats.high_water <= 256 * 1024);
    assert_eq!(stats.limit, Some(256 * 1024));

    // the store stays usable after a failed write
    db.exec("INSERT INTO t VALUES (x'00');").unwrap();
    assert_eq!(db.query_i64("SELECT count(*) FROM t;"), 1);
}
