//! Block device adapters
//!
//! The blob lives on a medium reached through [`BlockDevice`]: positioned
//! reads and writes of arbitrary byte ranges plus a sync primitive. Two
//! backends exist:
//!
//! - [`FileDevice`]: a regular file (or a Unix block device node) opened
//!   read/write, created if absent
//! - `VolumeDevice` (Windows only): a raw volume such as `\\.\H:`, locked
//!   and dismounted for exclusive access
//!
//! [`MemoryDevice`] keeps the blob in RAM and exists for tests.

mod file;
mod memory;
#[cfg(windows)]
mod volume;

pub use file::FileDevice;
pub use memory::MemoryDevice;
#[cfg(windows)]
pub use volume::VolumeDevice;

use crate::error::Result;
use libsqlite3_sys as ffi;
use std::os::raw::c_int;

/// Sector size reported when the medium does not say otherwise
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// How much of the pending state a sync must make durable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Data and metadata, ordinary barrier
    Normal,
    /// Data and metadata, full flush
    Full,
    /// File data only
    DataOnly,
}

impl SyncMode {
    /// Translate `xSync` flags
    pub fn from_sqlite_flags(flags: c_int) -> Self {
        if flags & ffi::SQLITE_SYNC_DATAONLY != 0 {
            SyncMode::DataOnly
        } else if flags & 0x0F == ffi::SQLITE_SYNC_FULL {
            SyncMode::Full
        } else {
            SyncMode::Normal
        }
    }
}

/// Medium holding one blob
pub trait BlockDevice: Send {
    /// Name the device was opened with
    fn name(&self) -> &str;

    /// Fill `buf` from `offset`. Anything short of a full read is an error.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Write all of `buf` at `offset`, growing file-backed media as needed
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()>;

    /// Flush pending writes
    fn sync(&mut self, mode: SyncMode) -> Result<()>;

    /// Current length of the medium in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sector_size(&self) -> u32 {
        DEFAULT_SECTOR_SIZE
    }

    fn sector_count(&self) -> u64 {
        let sector = u64::from(self.sector_size());
        (self.len() + sector - 1) / sector
    }

    /// Release locks and close the underlying handle
    fn close(self: Box<Self>) -> Result<()>;
}

/// Open the medium called `name`.
///
/// On Windows, names of the form `\\.\X:` select the raw volume backend.
/// Everything else is treated as a file path.
pub fn open(name: &str) -> Result<Box<dyn BlockDevice>> {
    #[cfg(windows)]
    {
        if crate::validation::is_raw_volume_name(name) {
            return Ok(Box::new(VolumeDevice::open(name)?));
        }
    }

    Ok(Box::new(FileDevice::open(name)?))
}

/// Smallest sector-aligned span covering `[offset, offset + len)`.
///
/// Returns `(start, span_len)`; raw volumes only accept transfers of whole
/// sectors at sector boundaries.
pub fn aligned_span(offset: u64, len: usize, sector_size: u32) -> (u64, usize) {
    let sector = u64::from(sector_size);
    let start = offset - offset % sector;
    let end = offset + len as u64;
    let end = (end + sector - 1) / sector * sector;
    (start, (end - start) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_from_flags() {
        assert_eq!(
            SyncMode::from_sqlite_flags(ffi::SQLITE_SYNC_NORMAL),
            SyncMode::Normal
        );
        assert_eq!(
            SyncMode::from_sqlite_flags(ffi::SQLITE_SYNC_FULL),
            SyncMode::Full
        );
        assert_eq!(
            SyncMode::from_sqlite_flags(ffi::SQLITE_SYNC_NORMAL | ffi::SQLITE_SYNC_DATAONLY),
            SyncMode::DataOnly
        );
    }

    #[test]
    fn test_aligned_span() {
        assert_eq!(aligned_span(0, 512, 512), (0, 512));
        assert_eq!(aligned_span(0, 4, 512), (0, 512));
        assert_eq!(aligned_span(510, 4, 512), (0, 1024));
        assert_eq!(aligned_span(10_485_248, 4, 512), (10_485_248, 512));
        assert_eq!(aligned_span(1024, 0, 512), (1024, 0));
        assert_eq!(aligned_span(4095, 2, 4096), (0, 8192));
    }
}
