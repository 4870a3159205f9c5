//! Blob state records and the process-wide registry
//!
//! One [`BlobState`] exists per open blob. The database handle creates it,
//! the journal handle opened later shares it, and it is destroyed (closing
//! its device) when the last handle goes away.

use crate::device::{BlockDevice, SyncMode};
use crate::error::{Result, SbvfsError};
use crate::layout::{self, Layout, BLOB_SIZE, BLOCK, SIZE_WORD_LEN, TRAILER_LEN};
use crate::region::FileKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Blob state shared by the handles of one blob
pub type SharedBlob = Arc<Mutex<BlobState>>;

/// In-memory record of one open blob
pub struct BlobState {
    /// Canonical name (journal suffix stripped)
    name: String,
    device: Option<Box<dyn BlockDevice>>,
    layout: Layout,
    /// Live handles on this blob
    refs: usize,
}

impl BlobState {
    /// Take ownership of `device` and recover the blob's region sizes.
    ///
    /// An empty medium is materialized to `BLOB_SIZE` bytes by writing a
    /// single zero at its last offset. If recovery fails the device is
    /// closed before the error is returned.
    pub fn open(name: impl Into<String>, mut device: Box<dyn BlockDevice>) -> Result<Self> {
        let name = name.into();
        match Self::materialize(&name, device.as_mut()) {
            Ok(layout) => {
                info!(
                    blob = %name,
                    blob_len = layout.blob_len,
                    database_len = layout.database_len,
                    journal_len = layout.journal_len,
                    "blob opened"
                );
                Ok(BlobState {
                    name,
                    device: Some(device),
                    layout,
                    refs: 0,
                })
            }
            Err(e) => {
                warn!(blob = %name, error = %e, "blob recovery failed");
                if let Err(close_err) = device.close() {
                    warn!(blob = %name, error = %close_err, "closing device after failed open");
                }
                Err(e)
            }
        }
    }

    fn materialize(name: &str, device: &mut dyn BlockDevice) -> Result<Layout> {
        if device.len() == 0 {
            debug!(blob = name, size = BLOB_SIZE, "materializing fresh blob");
            device.write_at(&[0], BLOB_SIZE - 1)?;
            return Ok(Layout::fresh(BLOB_SIZE));
        }

        let blob_len = blob_window(name, device.len())?;
        let mut header = [0u8; SIZE_WORD_LEN];
        device.read_at(&mut header, 0)?;
        let mut trailer = [0u8; TRAILER_LEN];
        device.read_at(&mut trailer, layout::trailer_offset(blob_len))?;

        let recovered = Layout::recover(blob_len, header, trailer)?;
        if recovered.journal_len > 0 {
            info!(blob = name, "journal trailer present, reporting conservative journal size");
        }
        Ok(recovered)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn database_len(&self) -> u64 {
        self.layout.database_len
    }

    pub fn journal_len(&self) -> u64 {
        self.layout.journal_len
    }

    pub fn blob_len(&self) -> u64 {
        self.layout.blob_len
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub(crate) fn layout_mut(&mut self) -> &mut Layout {
        &mut self.layout
    }

    pub(crate) fn device(&mut self) -> Result<&mut (dyn BlockDevice + 'static)> {
        self.device.as_deref_mut().ok_or(SbvfsError::DeviceClosed)
    }

    /// Delete the journal.
    ///
    /// Zeroes the first word of journal block 0 (where SQLite's journal
    /// header starts) and the trailer word, then forgets the journal size.
    pub fn clear_journal(&mut self) -> Result<()> {
        let blob_len = self.layout.blob_len;
        let device = self.device()?;
        device.write_at(&[0u8; SIZE_WORD_LEN], layout::journal_head_offset(blob_len))?;
        device.write_at(&[0u8; TRAILER_LEN], layout::trailer_offset(blob_len))?;
        self.layout.journal_len = 0;
        debug!(blob = %self.name, "journal cleared");
        Ok(())
    }
}

/// Span of a non-empty medium used as the blob: its first `BLOB_SIZE` bytes
fn blob_window(name: &str, len: u64) -> Result<u64> {
    if len < 2 * BLOCK {
        return Err(SbvfsError::DeviceTooSmall {
            name: name.to_string(),
            len,
        });
    }
    Ok(len.min(BLOB_SIZE))
}

/// Write an empty blob onto `device`, discarding whatever it held.
///
/// Zeroes the header block and the last journal block of the blob window,
/// so a medium carrying foreign data (a filesystem boot sector, say)
/// opens as an empty database with no journal. An empty medium is
/// materialized to `BLOB_SIZE` first.
pub fn initialize(name: &str, device: &mut dyn BlockDevice) -> Result<Layout> {
    let blob_len = match device.len() {
        0 => BLOB_SIZE,
        len => blob_window(name, len)?,
    };

    let zeros = [0u8; BLOCK as usize];
    device.write_at(&zeros, 0)?;
    device.write_at(&zeros, layout::journal_head_offset(blob_len))?;
    device.sync(SyncMode::Full)?;

    info!(blob = name, blob_len, "blob initialized");
    Ok(Layout::fresh(blob_len))
}

/// Open blobs keyed by canonical name
#[derive(Default)]
pub struct BlobRegistry {
    blobs: Mutex<HashMap<String, SharedBlob>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a blob without taking a reference
    pub fn find(&self, name: &str) -> Option<SharedBlob> {
        self.blobs.lock().get(name).cloned()
    }

    /// Take a reference on the blob called `name`.
    ///
    /// Only a database open may create the record; `create` runs while
    /// the registry is locked.
    pub fn acquire<F>(&self, name: &str, kind: FileKind, create: F) -> Result<SharedBlob>
    where
        F: FnOnce(&str) -> Result<BlobState>,
    {
        let mut blobs = self.blobs.lock();

        if let Some(blob) = blobs.get(name) {
            blob.lock().refs += 1;
            return Ok(Arc::clone(blob));
        }

        if kind == FileKind::Journal {
            return Err(SbvfsError::JournalWithoutDatabase(name.to_string()));
        }

        blobs.try_reserve(1).map_err(|_| SbvfsError::OutOfMemory)?;

        let mut state = create(name)?;
        state.refs = 1;
        let blob = Arc::new(Mutex::new(state));
        blobs.insert(name.to_string(), Arc::clone(&blob));
        Ok(blob)
    }

    /// Drop one reference; the last one unlinks the record and closes its device
    pub fn release(&self, blob: &SharedBlob) -> Result<()> {
        let mut blobs = self.blobs.lock();
        let device = {
            let mut state = blob.lock();
            state.refs = state.refs.saturating_sub(1);
            if state.refs > 0 {
                return Ok(());
            }
            blobs.remove(&state.name);
            debug!(blob = %state.name, "last handle closed");
            state.device.take()
        };
        drop(blobs);

        match device {
            Some(device) => device.close(),
            None => Ok(()),
        }
    }

    /// Number of open blobs
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    fn open_memory(device: &MemoryDevice) -> impl FnOnce(&str) -> Result<BlobState> + '_ {
        move |name: &str| BlobState::open(name, Box::new(device.clone()))
    }

    #[test]
    fn test_fresh_blob_is_materialized() {
        let device = MemoryDevice::new("mem");
        let state = BlobState::open("mem", Box::new(device.clone())).unwrap();

        assert_eq!(device.len(), BLOB_SIZE);
        assert_eq!(state.layout(), Layout::fresh(BLOB_SIZE));
        assert_eq!(device.bytes(0, 4), vec![0; 4]);
        assert_eq!(device.bytes(BLOB_SIZE - 4, 4), vec![0; 4]);
    }

    #[test]
    fn test_existing_blob_is_recovered() {
        let device = MemoryDevice::fixed("mem", BLOB_SIZE);
        device.poke(0, &[0, 0, 0, 7]);
        device.poke(BLOB_SIZE - 4, &[0xD9, 0xD5, 0x05, 0xF9]);

        let state = BlobState::open("mem", Box::new(device)).unwrap();
        assert_eq!(state.database_len(), 7);
        assert_eq!(state.journal_len(), BLOB_SIZE);
        assert_eq!(state.blob_len(), BLOB_SIZE);
    }

    #[test]
    fn test_tiny_device_rejected() {
        let device = MemoryDevice::fixed("mem", 100);
        let err = BlobState::open("mem", Box::new(device)).err().unwrap();
        assert!(matches!(err, SbvfsError::DeviceTooSmall { .. }));
    }

    #[test]
    fn test_open_close_leaves_fresh_medium_untouched() {
        let registry = BlobRegistry::new();
        let device = MemoryDevice::new("mem");

        let blob = registry
            .acquire("blob", FileKind::Database, open_memory(&device))
            .unwrap();
        registry.release(&blob).unwrap();

        let first = device.snapshot();
        assert_eq!(first.len() as u64, BLOB_SIZE);
        assert!(first.iter().all(|&b| b == 0));

        let blob = registry
            .acquire("blob", FileKind::Database, open_memory(&device))
            .unwrap();
        assert_eq!(blob.lock().layout(), Layout::fresh(BLOB_SIZE));
        registry.release(&blob).unwrap();

        assert_eq!(device.snapshot(), first);
    }

    #[test]
    fn test_oversized_medium_uses_leading_window() {
        let device = MemoryDevice::fixed("mem", 2 * BLOB_SIZE);
        device.poke(BLOB_SIZE - 4, &[0, 0, 0, 1]);

        let state = BlobState::open("mem", Box::new(device)).unwrap();
        assert_eq!(state.blob_len(), BLOB_SIZE);
        // Trailer is read at the end of the window, not the end of the medium
        assert_eq!(state.journal_len(), BLOB_SIZE);
    }

    #[test]
    fn test_initialize_overwrites_foreign_header() {
        let device = MemoryDevice::fixed("mem", BLOB_SIZE);
        device.poke(0, &[0xEB, 0x52, 0x90, 0x4E, 0x54, 0x46, 0x53]);
        device.poke(BLOB_SIZE - BLOCK, &[0x55; BLOCK as usize]);

        let err = BlobState::open("mem", Box::new(device.clone())).err().unwrap();
        assert!(matches!(err, SbvfsError::CorruptHeader { .. }));

        let layout = initialize("mem", &mut device.clone()).unwrap();
        assert_eq!(layout, Layout::fresh(BLOB_SIZE));
        assert_eq!(device.bytes(0, BLOCK as usize), vec![0; BLOCK as usize]);
        assert_eq!(
            device.bytes(BLOB_SIZE - BLOCK, BLOCK as usize),
            vec![0; BLOCK as usize]
        );
        assert_eq!(device.last_sync_mode(), Some(SyncMode::Full));

        let state = BlobState::open("mem", Box::new(device)).unwrap();
        assert_eq!(state.layout(), Layout::fresh(BLOB_SIZE));
    }

    #[test]
    fn test_initialize_materializes_empty_medium() {
        let device = MemoryDevice::new("mem");
        initialize("mem", &mut device.clone()).unwrap();
        assert_eq!(device.len(), BLOB_SIZE);

        let tiny = MemoryDevice::fixed("tiny", 100);
        let err = initialize("tiny", &mut tiny.clone()).err().unwrap();
        assert!(matches!(err, SbvfsError::DeviceTooSmall { len: 100, .. }));
    }

    #[test]
    fn test_clear_journal_zeroes_head_and_trailer() {
        let device = MemoryDevice::fixed("mem", BLOB_SIZE);
        device.poke(BLOB_SIZE - BLOCK, &[0xAA; BLOCK as usize]);

        let mut state = BlobState::open("mem", Box::new(device.clone())).unwrap();
        assert_eq!(state.journal_len(), BLOB_SIZE);

        state.clear_journal().unwrap();
        assert_eq!(state.journal_len(), 0);
        assert_eq!(device.bytes(BLOB_SIZE - BLOCK, 4), vec![0; 4]);
        assert_eq!(device.bytes(BLOB_SIZE - 4, 4), vec![0; 4]);
        // Bytes between the two words are left alone
        assert_eq!(device.bytes(BLOB_SIZE - BLOCK + 4, 4), vec![0xAA; 4]);
    }

    #[test]
    fn test_registry_refcounting() {
        let registry = BlobRegistry::new();
        let device = MemoryDevice::new("mem");

        let db = registry
            .acquire("blob", FileKind::Database, open_memory(&device))
            .unwrap();
        let journal = registry
            .acquire("blob", FileKind::Journal, |_| unreachable!())
            .unwrap();

        assert!(Arc::ptr_eq(&db, &journal));
        assert_eq!(db.lock().refs(), 2);
        assert_eq!(registry.len(), 1);

        registry.release(&journal).unwrap();
        assert_eq!(registry.len(), 1);
        registry.release(&db).unwrap();
        assert!(registry.is_empty());
        assert!(registry.find("blob").is_none());
        assert!(matches!(db.lock().device(), Err(SbvfsError::DeviceClosed)));
    }

    #[test]
    fn test_journal_cannot_create_blob() {
        let registry = BlobRegistry::new();
        let err = registry
            .acquire("blob", FileKind::Journal, |_| unreachable!())
            .err()
            .unwrap();
        assert!(matches!(err, SbvfsError::JournalWithoutDatabase(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_create_installs_nothing() {
        let registry = BlobRegistry::new();
        let device = MemoryDevice::fixed("mem", 10);
        let err = registry
            .acquire("blob", FileKind::Database, open_memory(&device))
            .err()
            .unwrap();
        assert!(matches!(err, SbvfsError::DeviceTooSmall { .. }));
        assert!(registry.is_empty());
    }
}
