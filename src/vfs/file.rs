//! SQLite file I/O methods
//!
//! Implements `sqlite3_io_methods` on top of [`RegionFile`].

use super::vfs::app_data;
use super::BlobVfs;
use crate::error::SbvfsError;
use crate::region::{FileKind, RegionFile};
use libsqlite3_sys as ffi;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::{ptr, slice};
use tracing::{trace, warn};

/// SQLite file backed by one region of a blob
#[repr(C)]
pub struct SbvfsFile {
    /// Base sqlite3_file structure (MUST be first field)
    base: ffi::sqlite3_file,
    /// Facade that opened this handle, for close
    facade: *const BlobVfs,
    region: RegionFile,
}

static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(file_close),
    xRead: Some(file_read),
    xWrite: Some(file_write),
    xTruncate: Some(file_truncate),
    xSync: Some(file_sync),
    xFileSize: Some(file_file_size),
    xLock: Some(file_lock),
    xUnlock: Some(file_unlock),
    xCheckReservedLock: Some(file_check_reserved_lock),
    xFileControl: Some(file_file_control),
    xSectorSize: Some(file_sector_size),
    xDeviceCharacteristics: Some(file_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

unsafe fn handle<'a>(file: *mut ffi::sqlite3_file) -> &'a mut SbvfsFile {
    &mut *(file as *mut SbvfsFile)
}

fn offset_arg(offset: ffi::sqlite3_int64, io_code: c_int) -> Result<u64, c_int> {
    u64::try_from(offset).map_err(|_| SbvfsError::InvalidOffset(offset).sqlite_code(io_code))
}

// File I/O method implementations

unsafe extern "C" fn file_close(file: *mut ffi::sqlite3_file) -> c_int {
    // Move the handle out; SQLite frees the memory itself
    let SbvfsFile { facade, region, .. } = ptr::read(file as *mut SbvfsFile);
    (*file).pMethods = ptr::null();

    match (*facade).close(region) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => {
            warn!(error = %e, "close failed");
            e.sqlite_code(ffi::SQLITE_IOERR_CLOSE)
        }
    }
}

unsafe extern "C" fn file_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let file = handle(file);
    let offset = match offset_arg(offset, ffi::SQLITE_IOERR_READ) {
        Ok(offset) => offset,
        Err(rc) => return rc,
    };
    let buf = slice::from_raw_parts_mut(buf as *mut u8, amt.max(0) as usize);

    match file.region.read(buf, offset) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => {
            if e.is_short_read() {
                // SQLite requires the unread part zeroed; nothing was read
                trace!(error = %e, "short read");
                buf.fill(0);
            } else {
                warn!(error = %e, "read failed");
            }
            e.sqlite_code(ffi::SQLITE_IOERR_READ)
        }
    }
}

unsafe extern "C" fn file_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amt: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    let file = handle(file);
    let offset = match offset_arg(offset, ffi::SQLITE_IOERR_WRITE) {
        Ok(offset) => offset,
        Err(rc) => return rc,
    };
    let data = slice::from_raw_parts(buf as *const u8, amt.max(0) as usize);

    match file.region.write(data, offset) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => e.sqlite_code(ffi::SQLITE_IOERR_WRITE),
    }
}

unsafe extern "C" fn file_truncate(file: *mut ffi::sqlite3_file, size: ffi::sqlite3_int64) -> c_int {
    let file = handle(file);
    let size = match offset_arg(size, ffi::SQLITE_IOERR_TRUNCATE) {
        Ok(size) => size,
        Err(rc) => return rc,
    };

    match file.region.truncate(size) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => e.sqlite_code(ffi::SQLITE_IOERR_TRUNCATE),
    }
}

unsafe extern "C" fn file_sync(file: *mut ffi::sqlite3_file, flags: c_int) -> c_int {
    let file = handle(file);
    match file.region.sync(flags) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => {
            warn!(kind = %file.region.kind(), error = %e, "sync failed");
            e.sqlite_code(ffi::SQLITE_IOERR_FSYNC)
        }
    }
}

unsafe extern "C" fn file_file_size(
    file: *mut ffi::sqlite3_file,
    p_size: *mut ffi::sqlite3_int64,
) -> c_int {
    let file = handle(file);
    *p_size = file.region.file_size() as ffi::sqlite3_int64;
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_lock(file: *mut ffi::sqlite3_file, lock_type: c_int) -> c_int {
    handle(file).region.lock(lock_type);
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_unlock(file: *mut ffi::sqlite3_file, lock_type: c_int) -> c_int {
    handle(file).region.unlock(lock_type);
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_check_reserved_lock(
    file: *mut ffi::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    *p_res_out = handle(file).region.check_reserved_lock() as c_int;
    ffi::SQLITE_OK
}

unsafe extern "C" fn file_file_control(
    file: *mut ffi::sqlite3_file,
    op: c_int,
    _p_arg: *mut c_void,
) -> c_int {
    handle(file).region.file_control(op)
}

unsafe extern "C" fn file_sector_size(file: *mut ffi::sqlite3_file) -> c_int {
    handle(file).region.sector_size()
}

unsafe extern "C" fn file_device_characteristics(file: *mut ffi::sqlite3_file) -> c_int {
    handle(file).region.device_characteristics()
}

// VFS open callback

pub(super) unsafe extern "C" fn file_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    // SQLite only calls xClose when pMethods is set
    (*file).pMethods = ptr::null();

    let app = match app_data(vfs) {
        Some(app) => app,
        None => return ffi::SQLITE_ERROR,
    };

    if z_name.is_null() {
        let e = SbvfsError::UnsupportedFile;
        warn!(flags, error = %e, "refusing temporary file");
        return e.sqlite_code(ffi::SQLITE_IOERR);
    }
    let path = match CStr::from_ptr(z_name).to_str() {
        Ok(p) => p,
        Err(_) => {
            warn!("file name is not valid UTF-8");
            return ffi::SQLITE_IOERR;
        }
    };

    let kind = FileKind::from_open_flags(flags);
    match app.facade.open(path, kind) {
        Ok(region) => {
            ptr::write(
                file as *mut SbvfsFile,
                SbvfsFile {
                    base: ffi::sqlite3_file {
                        pMethods: &IO_METHODS,
                    },
                    facade: &app.facade,
                    region,
                },
            );
            if !p_out_flags.is_null() {
                *p_out_flags = flags;
            }
            ffi::SQLITE_OK
        }
        Err(e) => {
            warn!(path, %kind, error = %e, "open failed");
            e.sqlite_code(ffi::SQLITE_IOERR)
        }
    }
}
