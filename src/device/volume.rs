//! Raw Windows volume backend
//!
//! Opening a volume such as `\\.\H:` takes an exclusive lock on it,
//! dismounts the filesystem and enables extended DASD I/O so the whole
//! volume is addressable. The lock is held until [`BlockDevice::close`].
//!
//! Raw volumes only accept sector-aligned transfers; unaligned requests go
//! through a read-modify-write of the covering sectors.

use super::{aligned_span, BlockDevice, SyncMode, DEFAULT_SECTOR_SIZE};
use crate::error::{Result, SbvfsError};
use crate::layout::BLOB_SIZE;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::windows::fs::{FileExt, OpenOptionsExt};
use std::os::windows::io::AsRawHandle;
use std::ptr;
use tracing::{debug, error, warn};
use windows_sys::Win32::System::Ioctl::{
    DISK_GEOMETRY, FSCTL_ALLOW_EXTENDED_DASD_IO, FSCTL_DISMOUNT_VOLUME, FSCTL_LOCK_VOLUME,
    FSCTL_UNLOCK_VOLUME, IOCTL_DISK_GET_DRIVE_GEOMETRY,
};
use windows_sys::Win32::System::IO::DeviceIoControl;

const FILE_SHARE_READ: u32 = 0x0000_0001;
const FILE_SHARE_WRITE: u32 = 0x0000_0002;

/// Exclusively locked raw volume
pub struct VolumeDevice {
    file: File,
    name: String,
    sector_size: u32,
    sector_count: u64,
    /// Bytes of the volume used for the blob
    window: u64,
}

impl VolumeDevice {
    /// Open, lock and dismount the volume called `name`
    pub fn open(name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
            .open(name)
            .map_err(|e| {
                error!(volume = name, error = %e, "could not open volume");
                e
            })?;

        let mut geometry: DISK_GEOMETRY = unsafe { std::mem::zeroed() };
        control(
            &file,
            IOCTL_DISK_GET_DRIVE_GEOMETRY,
            "IOCTL_DISK_GET_DRIVE_GEOMETRY",
            &mut geometry as *mut DISK_GEOMETRY as *mut _,
            std::mem::size_of::<DISK_GEOMETRY>() as u32,
        )?;

        // Dropping `file` on any failure below closes the handle, which
        // also releases a lock that was already taken.
        control(&file, FSCTL_LOCK_VOLUME, "FSCTL_LOCK_VOLUME", ptr::null_mut(), 0)?;
        control(&file, FSCTL_DISMOUNT_VOLUME, "FSCTL_DISMOUNT_VOLUME", ptr::null_mut(), 0)?;
        control(
            &file,
            FSCTL_ALLOW_EXTENDED_DASD_IO,
            "FSCTL_ALLOW_EXTENDED_DASD_IO",
            ptr::null_mut(),
            0,
        )?;

        let sector_size = if geometry.BytesPerSector == 0 {
            DEFAULT_SECTOR_SIZE
        } else {
            geometry.BytesPerSector
        };
        let sector_count = geometry.Cylinders as u64
            * u64::from(geometry.TracksPerCylinder)
            * u64::from(geometry.SectorsPerTrack);
        let window = (sector_count * u64::from(sector_size)).min(BLOB_SIZE);

        debug!(volume = name, sector_size, sector_count, window, "volume locked and dismounted");

        Ok(VolumeDevice {
            file,
            name: name.to_string(),
            sector_size,
            sector_count,
            window,
        })
    }

    fn check_bounds(&self, offset: u64, len: usize) -> io::Result<()> {
        if offset + len as u64 > self.window {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "transfer of {} bytes at {} exceeds volume window {}",
                    len, offset, self.window
                ),
            ));
        }
        Ok(())
    }

    fn read_sectors(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.seek_read(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "volume returned fewer bytes than requested",
                ));
            }
            done += n;
        }
        Ok(())
    }

    fn write_sectors(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.seek_write(&buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "volume accepted fewer bytes than requested",
                ));
            }
            done += n;
        }
        Ok(())
    }

    fn read_unaligned(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.check_bounds(offset, buf.len())?;
        let (start, span) = aligned_span(offset, buf.len(), self.sector_size);
        if start == offset && span == buf.len() {
            return self.read_sectors(buf, offset);
        }

        let mut sectors = vec![0u8; span];
        self.read_sectors(&mut sectors, start)?;
        let skip = (offset - start) as usize;
        buf.copy_from_slice(&sectors[skip..skip + buf.len()]);
        Ok(())
    }

    fn write_unaligned(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.check_bounds(offset, buf.len())?;
        let (start, span) = aligned_span(offset, buf.len(), self.sector_size);
        if start == offset && span == buf.len() {
            return self.write_sectors(buf, offset);
        }

        let mut sectors = vec![0u8; span];
        self.read_sectors(&mut sectors, start)?;
        let skip = (offset - start) as usize;
        sectors[skip..skip + buf.len()].copy_from_slice(buf);
        self.write_sectors(&sectors, start)
    }
}

impl BlockDevice for VolumeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.read_unaligned(buf, offset).map_err(|e| {
            warn!(volume = %self.name, offset, len = buf.len(), error = %e, "volume read failed");
            e.into()
        })
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        self.write_unaligned(buf, offset).map_err(|e| {
            warn!(volume = %self.name, offset, len = buf.len(), error = %e, "volume write failed");
            e.into()
        })
    }

    fn sync(&mut self, mode: SyncMode) -> Result<()> {
        // FlushFileBuffers is the only barrier a raw volume offers
        self.file.sync_all().map_err(|e| {
            warn!(volume = %self.name, ?mode, error = %e, "volume flush failed");
            e.into()
        })
    }

    fn len(&self) -> u64 {
        self.window
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn close(self: Box<Self>) -> Result<()> {
        let result = control(
            &self.file,
            FSCTL_UNLOCK_VOLUME,
            "FSCTL_UNLOCK_VOLUME",
            ptr::null_mut(),
            0,
        );
        debug!(volume = %self.name, "volume released");
        result
    }
}

fn control(
    file: &File,
    code: u32,
    op: &'static str,
    out: *mut core::ffi::c_void,
    out_len: u32,
) -> Result<()> {
    let mut returned: u32 = 0;
    let ok = unsafe {
        DeviceIoControl(
            file.as_raw_handle() as _,
            code,
            ptr::null(),
            0,
            out,
            out_len,
            &mut returned,
            ptr::null_mut(),
        )
    };

    if ok == 0 {
        let source = io::Error::last_os_error();
        error!(op, error = %source, "volume control failed");
        return Err(SbvfsError::VolumeControl { op, source });
    }
    Ok(())
}
