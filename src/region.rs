//! Region file handles
//!
//! A [`RegionFile`] is what SQLite sees as an open file. Database and
//! journal handles share one type and dispatch on [`FileKind`]; the
//! byte-map arithmetic lives in [`crate::layout`].

use crate::blob::SharedBlob;
use crate::device::SyncMode;
use crate::error::Result;
use crate::layout::{self, BLOCK};
use libsqlite3_sys as ffi;
use serde::Serialize;
use std::fmt;
use std::os::raw::c_int;
use tracing::{debug, trace, warn};

/// Which logical file of the blob a handle addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileKind {
    Database,
    Journal,
}

impl FileKind {
    /// `SQLITE_OPEN_MAIN_DB` selects the database; every other open is a journal
    pub fn from_open_flags(flags: c_int) -> Self {
        if flags & ffi::SQLITE_OPEN_MAIN_DB != 0 {
            FileKind::Database
        } else {
            FileKind::Journal
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Database => write!(f, "database"),
            FileKind::Journal => write!(f, "journal"),
        }
    }
}

/// Open handle on one region of a blob
pub struct RegionFile {
    kind: FileKind,
    blob: SharedBlob,
    /// Last level passed to `lock`/`unlock`; never enforced
    lock_level: c_int,
}

impl RegionFile {
    pub(crate) fn new(kind: FileKind, blob: SharedBlob) -> Self {
        RegionFile {
            kind,
            blob,
            lock_level: ffi::SQLITE_LOCK_NONE,
        }
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub(crate) fn blob(&self) -> &SharedBlob {
        &self.blob
    }

    /// Fill `buf` from logical `offset`.
    ///
    /// A request reaching past the end of the region fails with a short
    /// read; no prefix is returned.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut state = self.blob.lock();
        let layout = state.layout();
        layout.check_read(self.kind, offset, buf.len() as u64)?;

        let device = state.device()?;
        match self.kind {
            FileKind::Database => device.read_at(buf, layout.database_offset(offset)),
            FileKind::Journal => {
                for chunk in layout.journal_chunks(offset, buf.len()) {
                    let dest = &mut buf[chunk.buf_offset..chunk.buf_offset + chunk.len];
                    device.read_at(dest, chunk.physical)?;
                }
                Ok(())
            }
        }
    }

    /// Write `data` at logical `offset`, growing the region.
    ///
    /// Fails with `Full` instead of letting the database and journal
    /// regions meet. A journal write that runs into the database stops at
    /// the offending chunk; chunks already written stay on the medium and
    /// the journal size is not updated.
    pub fn write(&self, data: &[u8], offset: u64) -> Result<()> {
        let mut state = self.blob.lock();
        let layout = state.layout();
        let end = offset + data.len() as u64;

        match self.kind {
            FileKind::Database => {
                if let Err(e) = layout.check_database_write(offset, data.len() as u64) {
                    warn!(blob = %state.name(), offset, len = data.len(), "database region full");
                    return Err(e);
                }
                state
                    .device()?
                    .write_at(data, layout.database_offset(offset))?;
                let layout = state.layout_mut();
                layout.database_len = layout.database_len.max(end);
            }
            FileKind::Journal => {
                let name = state.name().to_string();
                let device = state.device()?;
                for chunk in layout.journal_chunks(offset, data.len()) {
                    if let Err(e) = layout.check_journal_chunk(&chunk) {
                        warn!(blob = %name, physical = chunk.physical, "journal ran into database region");
                        return Err(e);
                    }
                    trace!(physical = chunk.physical, len = chunk.len, "journal chunk");
                    device.write_at(
                        &data[chunk.buf_offset..chunk.buf_offset + chunk.len],
                        chunk.physical,
                    )?;
                }
                let layout = state.layout_mut();
                layout.journal_len = layout.journal_len.max(end);
            }
        }
        Ok(())
    }

    /// Shrink the region to at most `size` bytes. Nothing is erased.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let mut state = self.blob.lock();
        let layout = state.layout_mut();
        match self.kind {
            FileKind::Database => layout.database_len = layout.database_len.min(size),
            FileKind::Journal => layout.journal_len = layout.journal_len.min(size),
        }
        Ok(())
    }

    /// Make the region durable.
    ///
    /// For the database this is the only point where the header size word
    /// is written. The data-only flag is dropped so the header always goes
    /// out with the data.
    pub fn sync(&self, flags: c_int) -> Result<()> {
        let mode = SyncMode::from_sqlite_flags(flags & !ffi::SQLITE_SYNC_DATAONLY);
        let mut state = self.blob.lock();

        if self.kind == FileKind::Database {
            let database_len = state.database_len();
            state
                .device()?
                .write_at(&layout::encode_size(database_len), 0)?;
            debug!(blob = %state.name(), database_len, "header size word written");
        }

        state.device()?.sync(mode)
    }

    /// Logical size of the region
    pub fn file_size(&self) -> u64 {
        self.blob.lock().layout().region_len(self.kind)
    }

    pub fn lock(&mut self, level: c_int) {
        self.lock_level = self.lock_level.max(level);
    }

    pub fn unlock(&mut self, level: c_int) {
        self.lock_level = self.lock_level.min(level);
    }

    pub fn lock_level(&self) -> c_int {
        self.lock_level
    }

    /// One connection per blob, so nobody else can hold RESERVED
    pub fn check_reserved_lock(&self) -> bool {
        false
    }

    /// Every file control succeeds as a no-op except `SQLITE_FCNTL_PRAGMA`,
    /// which reports `SQLITE_NOTFOUND` so SQLite runs the pragma itself.
    pub fn file_control(&self, op: c_int) -> c_int {
        if op == ffi::SQLITE_FCNTL_PRAGMA {
            ffi::SQLITE_NOTFOUND
        } else {
            ffi::SQLITE_OK
        }
    }

    pub fn sector_size(&self) -> c_int {
        BLOCK as c_int
    }

    pub fn device_characteristics(&self) -> c_int {
        0
    }
}
