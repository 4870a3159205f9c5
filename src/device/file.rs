//! File-backed block device

use super::{BlockDevice, SyncMode};
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Blob stored in a regular file or a block device node
pub struct FileDevice {
    file: File,
    name: String,
    len: u64,
    /// File position after the previous transfer, if known
    last_offset: Option<u64>,
}

impl FileDevice {
    /// Open `path` for read/write, creating it if absent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                warn!(path = %path.display(), error = %e, "open failed");
                e
            })?;

        // Seeking to the end also sizes block device nodes, whose
        // metadata length is zero.
        let len = file.seek(SeekFrom::End(0))?;
        debug!(path = %path.display(), len, "opened file device");

        Ok(FileDevice {
            file,
            name: path.display().to_string(),
            len,
            last_offset: Some(len),
        })
    }

    fn position(&mut self, offset: u64) -> io::Result<()> {
        if self.last_offset != Some(offset) {
            self.file.seek(SeekFrom::Start(offset))?;
        }
        Ok(())
    }

    fn transfer_failed(&mut self, op: &'static str, offset: u64, len: usize, e: &io::Error) {
        self.last_offset = None;
        warn!(device = %self.name, op, offset, len, error = %e, "device I/O failed");
    }
}

impl BlockDevice for FileDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        trace!(device = %self.name, offset, len = buf.len(), "read");
        let result = self
            .position(offset)
            .and_then(|_| self.file.read_exact(buf));

        match result {
            Ok(()) => {
                self.last_offset = Some(offset + buf.len() as u64);
                Ok(())
            }
            Err(e) => {
                self.transfer_failed("read", offset, buf.len(), &e);
                Err(e.into())
            }
        }
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        trace!(device = %self.name, offset, len = buf.len(), "write");
        let result = self
            .position(offset)
            .and_then(|_| self.file.write_all(buf));

        match result {
            Ok(()) => {
                let end = offset + buf.len() as u64;
                self.last_offset = Some(end);
                self.len = self.len.max(end);
                Ok(())
            }
            Err(e) => {
                self.transfer_failed("write", offset, buf.len(), &e);
                Err(e.into())
            }
        }
    }

    fn sync(&mut self, mode: SyncMode) -> Result<()> {
        let result = match mode {
            SyncMode::DataOnly => self.file.sync_data(),
            SyncMode::Normal | SyncMode::Full => self.file.sync_all(),
        };
        if let Err(e) = &result {
            warn!(device = %self.name, ?mode, error = %e, "sync failed");
        }
        Ok(result?)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!(device = %self.name, "closing file device");
        Ok(())
    }
}
