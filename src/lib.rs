//! # SBVFS - Single-Blob SQLite VFS
//!
//! `sbvfs` stores one SQLite database and its rollback journal inside a
//! single fixed-size blob: a regular file or, on Windows, a raw volume
//! such as `\\.\H:`. The database grows forward from offset 512 and the
//! journal grows backward from the end of the blob in reversed 512-byte
//! blocks.
//!
//! ```text
//! 0        4                512                                   blob_len
//! | size   |   (reserved)   | database -->          <-- journal | trailer |
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sbvfs::{open_connection, register_default, DEFAULT_VFS_NAME};
//!
//! # fn main() -> sbvfs::Result<()> {
//! register_default()?;
//!
//! let conn = open_connection("/data/nvr.img", DEFAULT_VFS_NAME)?;
//! conn.execute_batch("CREATE TABLE IF NOT EXISTS t (x INTEGER)")?;
//! conn.execute("INSERT INTO t VALUES (?1)", [42])?;
//! # Ok(())
//! # }
//! ```
//!
//! Only the main database and its rollback journal can live in a blob.
//! Temporary files are refused, so connections keep temp storage in
//! memory.

pub mod blob;
pub mod config;
pub mod device;
pub mod error;
pub mod layout;
pub mod region;
pub mod validation;
pub mod vfs;

pub use crate::{
    config::{VfsConfig, DEFAULT_VFS_NAME},
    device::{BlockDevice, FileDevice, MemoryDevice, SyncMode},
    error::{Result, SbvfsError},
    layout::{Layout, BLOB_SIZE, BLOCK},
    region::{FileKind, RegionFile},
    validation::VfsName,
    vfs::BlobVfs,
};

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tracing::debug;

/// Register the VFS with SQLite under `config.name`
pub fn register(config: &VfsConfig) -> Result<()> {
    vfs::register_vfs(config)
}

/// Register the VFS under [`DEFAULT_VFS_NAME`]
pub fn register_default() -> Result<()> {
    register(&VfsConfig::default())
}

/// Unregister the VFS. Fails while any blob is still open.
pub fn unregister() -> Result<()> {
    vfs::unregister_vfs()
}

/// Layout of the open blob `name`, if the VFS is registered and the blob open
///
/// `name` is the path as SQLite resolved it (absolute, no `-journal`).
pub fn stats(name: &str) -> Option<Layout> {
    vfs::with_registered(|facade| facade.stats(name)).flatten()
}

/// Open a read/write connection on the blob at `path` through the VFS
/// registered as `vfs_name`.
///
/// The blob is created if absent. Temp storage is switched to memory.
pub fn open_connection<P: AsRef<Path>>(path: P, vfs_name: &str) -> Result<Connection> {
    let path = path.as_ref();
    let conn = Connection::open_with_flags_and_vfs(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        vfs_name,
    )?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    debug!(path = %path.display(), vfs = vfs_name, "connection opened");
    Ok(conn)
}
