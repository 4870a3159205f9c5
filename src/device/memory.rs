//! RAM-backed block device for tests

use super::{BlockDevice, SyncMode};
use crate::error::Result;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Faults {
    fail_writes: AtomicBool,
    fail_syncs: AtomicBool,
    syncs: AtomicUsize,
    last_sync: Mutex<Option<SyncMode>>,
}

/// In-memory medium.
///
/// Clones share the same bytes, so a test can keep one clone to inspect
/// the medium after handing another to a blob.
#[derive(Clone)]
pub struct MemoryDevice {
    name: String,
    data: Arc<Mutex<Vec<u8>>>,
    /// Fixed geometry: writes past this length fail instead of growing
    capacity: Option<u64>,
    faults: Arc<Faults>,
}

impl MemoryDevice {
    /// Empty, growable device
    pub fn new(name: impl Into<String>) -> Self {
        MemoryDevice {
            name: name.into(),
            data: Arc::new(Mutex::new(Vec::new())),
            capacity: None,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Zero-filled device of exactly `len` bytes that cannot grow
    pub fn fixed(name: impl Into<String>, len: u64) -> Self {
        let device = MemoryDevice::new(name);
        device.data.lock().resize(len as usize, 0);
        MemoryDevice {
            capacity: Some(len),
            ..device
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Copy of `len` bytes at `offset`
    pub fn bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        let data = self.data.lock();
        let start = offset as usize;
        data[start..start + len].to_vec()
    }

    /// Overwrite bytes directly, bypassing fault injection
    pub fn poke(&self, offset: u64, bytes: &[u8]) {
        let mut data = self.data.lock();
        let start = offset as usize;
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_syncs(&self, fail: bool) {
        self.faults.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Number of successful syncs
    pub fn sync_count(&self) -> usize {
        self.faults.syncs.load(Ordering::SeqCst)
    }

    pub fn last_sync_mode(&self) -> Option<SyncMode> {
        *self.faults.last_sync.lock()
    }
}

impl BlockDevice for MemoryDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        let data = self.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {} past end {}", buf.len(), offset, data.len()),
            )
            .into());
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
        }

        let end = offset + buf.len() as u64;
        if let Some(capacity) = self.capacity {
            if end > capacity {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("write ends at {} past fixed capacity {}", end, capacity),
                )
                .into());
            }
        }

        let mut data = self.data.lock();
        if data.len() < end as usize {
            data.resize(end as usize, 0);
        }
        data[offset as usize..end as usize].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self, mode: SyncMode) -> Result<()> {
        if self.faults.fail_syncs.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected sync failure").into());
        }
        self.faults.syncs.fetch_add(1, Ordering::SeqCst);
        *self.faults.last_sync.lock() = Some(mode);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
