//! SQLite VFS
//!
//! [`BlobVfs`] is the safe facade behind the FFI callbacks: it resolves a
//! path to its blob, hands out [`RegionFile`] handles and implements the
//! delete/exists semantics of the journal. `vfs.rs` registers it with
//! SQLite and `file.rs` adapts handles to `sqlite3_io_methods`.

mod file;
#[allow(clippy::module_inception)]
mod vfs;


pub use vfs::{is_registered, register_vfs, registered_name, unregister_vfs, with_registered};

use crate::blob::{BlobRegistry, BlobState};
use crate::device::{self, BlockDevice};
use crate::error::Result;
use crate::layout::Layout;
use crate::region::{FileKind, RegionFile};
use crate::validation::split_journal_suffix;
use tracing::debug;

/// Resolves SQLite file names to blobs
#[derive(Default)]
pub struct BlobVfs {
    registry: BlobRegistry,
}

impl BlobVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the region `kind` of the blob named by `path`, opening the
    /// medium through [`device::open`] if the blob is not open yet.
    pub fn open(&self, path: &str, kind: FileKind) -> Result<RegionFile> {
        self.open_with(path, kind, device::open)
    }

    /// Like [`BlobVfs::open`], with a caller-supplied medium
    pub fn open_with<F>(&self, path: &str, kind: FileKind, open_device: F) -> Result<RegionFile>
    where
        F: FnOnce(&str) -> Result<Box<dyn BlockDevice>>,
    {
        let name = canonical_name(path, kind);
        let blob = self.registry.acquire(name, kind, |name| {
            let device = open_device(name)?;
            BlobState::open(name, device)
        })?;

        debug!(blob = name, %kind, "region opened");
        Ok(RegionFile::new(kind, blob))
    }

    /// Drop a handle; closing the last one closes the medium
    pub fn close(&self, file: RegionFile) -> Result<()> {
        debug!(kind = %file.kind(), "region closed");
        self.registry.release(file.blob())
    }

    /// Delete the journal named by `path`.
    ///
    /// Only journal names do anything, and only while their blob is open.
    /// The database itself is never deleted.
    pub fn delete(&self, path: &str) -> Result<()> {
        let (name, journal) = split_journal_suffix(path);
        if !journal {
            debug!(path, "delete of non-journal ignored");
            return Ok(());
        }

        match self.registry.find(name) {
            Some(blob) => blob.lock().clear_journal(),
            None => Ok(()),
        }
    }

    /// True if `path` names an open blob, or a journal of positive size
    pub fn exists(&self, path: &str) -> bool {
        let (name, journal) = split_journal_suffix(path);
        match self.registry.find(name) {
            Some(blob) => !journal || blob.lock().journal_len() > 0,
            None => false,
        }
    }

    /// Current layout of the open blob `name`
    pub fn stats(&self, name: &str) -> Option<Layout> {
        self.registry.find(name).map(|blob| blob.lock().layout())
    }

    /// Number of blobs with at least one open handle
    pub fn open_blobs(&self) -> usize {
        self.registry.len()
    }
}

fn canonical_name(path: &str, kind: FileKind) -> &str {
    match kind {
        FileKind::Database => path,
        FileKind::Journal => split_journal_suffix(path).0,
    }
}
