use libsqlite3_sys as ffi;
use std::os::raw::c_int;
use thiserror::Error;

use crate::region::FileKind;

#[derive(Error, Debug)]
pub enum SbvfsError {
    #[error("{kind} region full: write of {len} bytes at offset {offset} would overlap")]
    Full {
        kind: FileKind,
        offset: u64,
        len: u64,
    },

    #[error("{kind} short read: {len} bytes at offset {offset}, region holds {available}")]
    ShortRead {
        kind: FileKind,
        offset: u64,
        len: u64,
        available: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of memory allocating blob state")]
    OutOfMemory,

    #[error("Journal opened before its database: {0}")]
    JournalWithoutDatabase(String),

    #[error("Temporary and auxiliary files are not supported")]
    UnsupportedFile,

    #[error("Negative file offset or size: {0}")]
    InvalidOffset(i64),

    #[error("Corrupt blob header: database size {database_len} does not fit a {blob_len} byte blob")]
    CorruptHeader { database_len: u64, blob_len: u64 },

    #[error("Device {name} is too small for a blob: {len} bytes")]
    DeviceTooSmall { name: String, len: u64 },

    #[error("Device is closed")]
    DeviceClosed,

    #[error("Volume control {op} failed: {source}")]
    VolumeControl {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid VFS name: {0}")]
    InvalidVfsName(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("No default VFS available to act as parent")]
    NoParentVfs,

    #[error("VFS already registered as {0}")]
    AlreadyRegistered(String),

    #[error("VFS still has {0} open blob(s)")]
    Busy(usize),

    #[error("VFS registration failed: {0}")]
    VFSRegistrationFailed(i32),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl SbvfsError {
    /// Result code handed back to SQLite for this error.
    ///
    /// `fallback` is the `SQLITE_IOERR_*` extended code matching the
    /// operation in flight; plain I/O failures report it so SQLite can
    /// tell a failed read from a failed fsync.
    pub fn sqlite_code(&self, fallback: c_int) -> c_int {
        match self {
            SbvfsError::Full { .. } => ffi::SQLITE_FULL,
            SbvfsError::ShortRead { .. } => ffi::SQLITE_IOERR_SHORT_READ,
            SbvfsError::OutOfMemory => ffi::SQLITE_NOMEM,
            SbvfsError::Io(_)
            | SbvfsError::DeviceClosed
            | SbvfsError::VolumeControl { .. }
            | SbvfsError::InvalidOffset(_) => fallback,
            _ => ffi::SQLITE_IOERR,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, SbvfsError::Full { .. })
    }

    pub fn is_short_read(&self) -> bool {
        matches!(self, SbvfsError::ShortRead { .. })
    }
}

pub type Result<T> = std::result::Result<T, SbvfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_codes() {
        let full = SbvfsError::Full {
            kind: FileKind::Database,
            offset: 0,
            len: 1,
        };
        assert_eq!(full.sqlite_code(ffi::SQLITE_IOERR_WRITE), ffi::SQLITE_FULL);

        let short = SbvfsError::ShortRead {
            kind: FileKind::Journal,
            offset: 0,
            len: 8,
            available: 0,
        };
        assert_eq!(
            short.sqlite_code(ffi::SQLITE_IOERR_READ),
            ffi::SQLITE_IOERR_SHORT_READ
        );

        let io = SbvfsError::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.sqlite_code(ffi::SQLITE_IOERR_FSYNC), ffi::SQLITE_IOERR_FSYNC);

        assert_eq!(
            SbvfsError::OutOfMemory.sqlite_code(ffi::SQLITE_IOERR),
            ffi::SQLITE_NOMEM
        );
        assert_eq!(
            SbvfsError::UnsupportedFile.sqlite_code(ffi::SQLITE_CANTOPEN),
            ffi::SQLITE_IOERR
        );
    }
}
