//! SQLite VFS registration
//!
//! Registers a `sqlite3_vfs` whose file callbacks go to [`BlobVfs`] and
//! whose remaining callbacks are forwarded to the default VFS found at
//! registration time.

use super::file::{file_open, SbvfsFile};
use super::BlobVfs;
use crate::config::VfsConfig;
use crate::error::{Result, SbvfsError};
use libsqlite3_sys as ffi;
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use tracing::{debug, info, warn};

/// Data hung off `sqlite3_vfs::pAppData`
pub(super) struct VfsAppData {
    pub(super) facade: BlobVfs,
    /// Default VFS at registration time
    parent: *mut ffi::sqlite3_vfs,
    name: CString,
}

struct Registered {
    name: String,
    vfs: *mut ffi::sqlite3_vfs,
}

// The pointer is only dereferenced under REGISTERED's lock or by SQLite.
unsafe impl Send for Registered {}

static REGISTERED: Mutex<Option<Registered>> = parking_lot::const_mutex(None);

/// Register the blob VFS under `config.name`.
///
/// Registering again under the same name is a no-op. The VFS is never
/// made the default; connections select it by name.
pub fn register_vfs(config: &VfsConfig) -> Result<()> {
    let name = config.validated_name()?;
    let mut registered = REGISTERED.lock();

    if let Some(existing) = registered.as_ref() {
        if existing.name == name.as_str() {
            return Ok(());
        }
        return Err(SbvfsError::AlreadyRegistered(existing.name.clone()));
    }

    let parent = unsafe { ffi::sqlite3_vfs_find(ptr::null()) };
    if parent.is_null() {
        return Err(SbvfsError::NoParentVfs);
    }

    let c_name = CString::new(name.as_str())
        .map_err(|e| SbvfsError::InvalidVfsName(format!("Invalid VFS name: {}", e)))?;

    let app_ptr = Box::into_raw(Box::new(VfsAppData {
        facade: BlobVfs::new(),
        parent,
        name: c_name,
    }));

    let sqlite_vfs = Box::new(ffi::sqlite3_vfs {
        iVersion: 2,
        szOsFile: std::mem::size_of::<SbvfsFile>() as c_int,
        mxPathname: unsafe { (*parent).mxPathname },
        pNext: ptr::null_mut(),
        zName: unsafe { (*app_ptr).name.as_ptr() },
        pAppData: app_ptr as *mut c_void,
        xOpen: Some(vfs_open),
        xDelete: Some(vfs_delete),
        xAccess: Some(vfs_access),
        xFullPathname: Some(vfs_full_pathname),
        xDlOpen: Some(vfs_dl_open),
        xDlError: Some(vfs_dl_error),
        xDlSym: Some(vfs_dl_sym),
        xDlClose: Some(vfs_dl_close),
        xRandomness: Some(vfs_randomness),
        xSleep: Some(vfs_sleep),
        xCurrentTime: Some(vfs_current_time),
        xGetLastError: Some(vfs_get_last_error),
        xCurrentTimeInt64: Some(vfs_current_time_int64),
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    });

    let vfs_ptr = Box::into_raw(sqlite_vfs);

    unsafe {
        let rc = ffi::sqlite3_vfs_register(vfs_ptr, 0);
        if rc != ffi::SQLITE_OK {
            drop(Box::from_raw(vfs_ptr));
            drop(Box::from_raw(app_ptr));
            return Err(SbvfsError::VFSRegistrationFailed(rc));
        }
    }

    info!(vfs = %name, "VFS registered");
    *registered = Some(Registered {
        name: name.into_string(),
        vfs: vfs_ptr,
    });
    Ok(())
}

/// Unregister the blob VFS.
///
/// Fails with [`SbvfsError::Busy`] while any blob is open. Unregistering
/// when nothing is registered is a no-op.
pub fn unregister_vfs() -> Result<()> {
    let mut registered = REGISTERED.lock();
    let vfs_ptr = match registered.as_ref() {
        Some(entry) => entry.vfs,
        None => return Ok(()),
    };

    unsafe {
        let app_ptr = (*vfs_ptr).pAppData as *mut VfsAppData;
        let open = (*app_ptr).facade.open_blobs();
        if open > 0 {
            return Err(SbvfsError::Busy(open));
        }

        let rc = ffi::sqlite3_vfs_unregister(vfs_ptr);
        if rc != ffi::SQLITE_OK {
            return Err(SbvfsError::VFSRegistrationFailed(rc));
        }

        drop(Box::from_raw(app_ptr));
        drop(Box::from_raw(vfs_ptr));
    }

    if let Some(entry) = registered.take() {
        info!(vfs = %entry.name, "VFS unregistered");
    }
    Ok(())
}

pub fn is_registered() -> bool {
    REGISTERED.lock().is_some()
}

/// Name the VFS is currently registered under
pub fn registered_name() -> Option<String> {
    REGISTERED.lock().as_ref().map(|entry| entry.name.clone())
}

/// Run `f` against the registered facade, if any.
///
/// The registration lock is held for the duration of `f`.
pub fn with_registered<R>(f: impl FnOnce(&BlobVfs) -> R) -> Option<R> {
    let registered = REGISTERED.lock();
    registered.as_ref().map(|entry| unsafe {
        let app = &*((*entry.vfs).pAppData as *const VfsAppData);
        f(&app.facade)
    })
}

pub(super) unsafe fn app_data<'a>(vfs: *mut ffi::sqlite3_vfs) -> Option<&'a VfsAppData> {
    if vfs.is_null() {
        return None;
    }
    ((*vfs).pAppData as *const VfsAppData).as_ref()
}

unsafe fn parent_of(vfs: *mut ffi::sqlite3_vfs) -> Option<*mut ffi::sqlite3_vfs> {
    app_data(vfs).map(|app| app.parent)
}

/// Call the parent VFS's `$method`, or evaluate to `$fallback` if it has none
macro_rules! forward {
    ($vfs:expr, $method:ident, $fallback:expr $(, $arg:expr)*) => {
        match parent_of($vfs) {
            Some(parent) => match (*parent).$method {
                Some(method) => method(parent $(, $arg)*),
                None => $fallback,
            },
            None => $fallback,
        }
    };
}

// VFS callback functions

unsafe extern "C" fn vfs_open(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    file_open(vfs, z_name, file, flags, p_out_flags)
}

unsafe extern "C" fn vfs_delete(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _sync_dir: c_int,
) -> c_int {
    let app = match app_data(vfs) {
        Some(app) => app,
        None => return ffi::SQLITE_ERROR,
    };
    if z_name.is_null() {
        return ffi::SQLITE_IOERR_DELETE;
    }
    let path = match CStr::from_ptr(z_name).to_str() {
        Ok(p) => p,
        Err(_) => return ffi::SQLITE_IOERR_DELETE,
    };

    match app.facade.delete(path) {
        Ok(()) => {
            debug!(path, "deleted");
            ffi::SQLITE_OK
        }
        Err(e) => {
            warn!(path, error = %e, "delete failed");
            e.sqlite_code(ffi::SQLITE_IOERR_DELETE)
        }
    }
}

unsafe extern "C" fn vfs_access(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    flags: c_int,
    p_res_out: *mut c_int,
) -> c_int {
    if flags != ffi::SQLITE_ACCESS_EXISTS {
        return forward!(vfs, xAccess, ffi::SQLITE_IOERR_ACCESS, z_name, flags, p_res_out);
    }

    let app = match app_data(vfs) {
        Some(app) => app,
        None => return ffi::SQLITE_ERROR,
    };
    if z_name.is_null() {
        return ffi::SQLITE_IOERR_ACCESS;
    }
    let path = match CStr::from_ptr(z_name).to_str() {
        Ok(p) => p,
        Err(_) => return ffi::SQLITE_IOERR_ACCESS,
    };

    *p_res_out = app.facade.exists(path) as c_int;
    ffi::SQLITE_OK
}

unsafe extern "C" fn vfs_full_pathname(
    vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    forward!(vfs, xFullPathname, ffi::SQLITE_CANTOPEN, z_name, n_out, z_out)
}

unsafe extern "C" fn vfs_dl_open(vfs: *mut ffi::sqlite3_vfs, z_filename: *const c_char) -> *mut c_void {
    forward!(vfs, xDlOpen, ptr::null_mut(), z_filename)
}

unsafe extern "C" fn vfs_dl_error(vfs: *mut ffi::sqlite3_vfs, n_byte: c_int, z_err_msg: *mut c_char) {
    forward!(vfs, xDlError, (), n_byte, z_err_msg)
}

unsafe extern "C" fn vfs_dl_sym(
    vfs: *mut ffi::sqlite3_vfs,
    handle: *mut c_void,
    z_symbol: *const c_char,
) -> Option<unsafe extern "C" fn(*mut ffi::sqlite3_vfs, *mut c_void, *const c_char)> {
    forward!(vfs, xDlSym, None, handle, z_symbol)
}

unsafe extern "C" fn vfs_dl_close(vfs: *mut ffi::sqlite3_vfs, handle: *mut c_void) {
    forward!(vfs, xDlClose, (), handle)
}

unsafe extern "C" fn vfs_randomness(
    vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_out: *mut c_char,
) -> c_int {
    forward!(vfs, xRandomness, 0, n_byte, z_out)
}

unsafe extern "C" fn vfs_sleep(vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    forward!(vfs, xSleep, 0, microseconds)
}

unsafe extern "C" fn vfs_current_time(vfs: *mut ffi::sqlite3_vfs, p_time_out: *mut f64) -> c_int {
    forward!(vfs, xCurrentTime, ffi::SQLITE_ERROR, p_time_out)
}

unsafe extern "C" fn vfs_current_time_int64(
    vfs: *mut ffi::sqlite3_vfs,
    p_time_out: *mut ffi::sqlite3_int64,
) -> c_int {
    forward!(vfs, xCurrentTimeInt64, ffi::SQLITE_ERROR, p_time_out)
}

unsafe extern "C" fn vfs_get_last_error(
    vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_err_msg: *mut c_char,
) -> c_int {
    forward!(vfs, xGetLastError, 0, n_byte, z_err_msg)
}
