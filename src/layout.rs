//! On-blob byte map
//!
//! A blob is one fixed-size span of the medium shared by two logical files:
//!
//! ```text
//! 0        BLOCK              BLOCK+db_len       blob_len-journal   blob_len
//! | header | database region  | free gap (>0)   | journal region    |
//! ```
//!
//! - bytes `[0, 4)` of the header hold the database size as a big-endian `u32`
//! - database byte `i` lives at physical `BLOCK + i`
//! - the journal grows downward from the end of the blob one `BLOCK` at a
//!   time; inside a block the bytes keep their natural order
//! - the final four bytes of the blob are nonzero while a journal exists
//!
//! Everything in this module is pure arithmetic. Callers hand the resulting
//! physical offsets to a [`crate::device::BlockDevice`].

use crate::error::{Result, SbvfsError};
use crate::region::FileKind;
use serde::Serialize;

/// Journal block size, also the width of the blob header
pub const BLOCK: u64 = 512;

/// Size of a freshly created blob (10 MiB)
pub const BLOB_SIZE: u64 = 10 * 1024 * 1024;

/// Width of the database size word stored at offset 0
pub const SIZE_WORD_LEN: usize = 4;

/// Width of the journal presence marker at the end of the blob
pub const TRAILER_LEN: usize = 4;

/// Largest database a blob of `blob_len` bytes may hold (90%)
pub fn max_database_len(blob_len: u64) -> u64 {
    blob_len / 10 * 9
}

/// Physical offset of the journal presence trailer
pub fn trailer_offset(blob_len: u64) -> u64 {
    blob_len - TRAILER_LEN as u64
}

/// Physical offset of the first journal block (holds the journal header)
pub fn journal_head_offset(blob_len: u64) -> u64 {
    blob_len - BLOCK
}

/// Encode a database size for the header size word
pub fn encode_size(database_len: u64) -> [u8; SIZE_WORD_LEN] {
    (database_len as u32).to_be_bytes()
}

/// Decode the header size word
pub fn decode_size(word: [u8; SIZE_WORD_LEN]) -> u64 {
    u64::from(u32::from_be_bytes(word))
}

/// True if the trailer bytes mark a live journal
pub fn trailer_marks_journal(trailer: [u8; TRAILER_LEN]) -> bool {
    trailer.iter().any(|&b| b != 0)
}

/// Region sizes of one blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub blob_len: u64,
    pub database_len: u64,
    pub journal_len: u64,
}

/// One contiguous physical transfer produced by a logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Offset on the medium
    pub physical: u64,
    /// Bytes in this chunk
    pub len: usize,
    /// Offset of this chunk inside the caller's buffer
    pub buf_offset: usize,
}

impl Layout {
    /// Layout of a blob that was just materialized
    pub fn fresh(blob_len: u64) -> Self {
        Layout {
            blob_len,
            database_len: 0,
            journal_len: 0,
        }
    }

    /// Rebuild region sizes from the on-blob header word and trailer.
    ///
    /// The journal size is not persisted. When the trailer says a journal
    /// exists the whole blob is reported and SQLite's journal header and
    /// checksums bound what it actually replays.
    pub fn recover(
        blob_len: u64,
        header: [u8; SIZE_WORD_LEN],
        trailer: [u8; TRAILER_LEN],
    ) -> Result<Self> {
        let database_len = decode_size(header);
        if database_len + BLOCK > blob_len {
            return Err(SbvfsError::CorruptHeader {
                database_len,
                blob_len,
            });
        }

        let journal_len = if trailer_marks_journal(trailer) {
            blob_len
        } else {
            0
        };

        Ok(Layout {
            blob_len,
            database_len,
            journal_len,
        })
    }

    /// Bytes of the region backing `kind`
    pub fn region_len(&self, kind: FileKind) -> u64 {
        match kind {
            FileKind::Database => self.database_len,
            FileKind::Journal => self.journal_len,
        }
    }

    /// Physical space held by the journal, in whole blocks
    pub fn journal_footprint(&self) -> u64 {
        let blocks = (self.journal_len + BLOCK - 1) / BLOCK;
        (blocks * BLOCK).min(self.blob_len)
    }

    /// Physical offset of database byte `offset`
    pub fn database_offset(&self, offset: u64) -> u64 {
        BLOCK + offset
    }

    /// Split a journal request into reversed-block chunks
    pub fn journal_chunks(&self, offset: u64, len: usize) -> JournalChunks {
        JournalChunks {
            blob_len: self.blob_len,
            logical: offset,
            remaining: len,
            buf_offset: 0,
        }
    }

    /// Short read if `[offset, offset + len)` runs past the end of the region
    pub fn check_read(&self, kind: FileKind, offset: u64, len: u64) -> Result<()> {
        let available = self.region_len(kind);
        if offset + len > available {
            return Err(SbvfsError::ShortRead {
                kind,
                offset,
                len,
                available,
            });
        }
        Ok(())
    }

    /// Full if a database write would reach the journal or the 90% ceiling,
    /// or grow the database past what the header size word can hold
    pub fn check_database_write(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset + len;
        let journal_start = self.blob_len.saturating_sub(self.journal_footprint());
        if end + BLOCK > journal_start
            || end > max_database_len(self.blob_len)
            || end > u64::from(u32::MAX)
        {
            return Err(SbvfsError::Full {
                kind: FileKind::Database,
                offset,
                len,
            });
        }
        Ok(())
    }

    /// Full if a journal chunk would land on the header or database region
    pub fn check_journal_chunk(&self, chunk: &Chunk) -> Result<()> {
        if chunk.physical < self.database_len + BLOCK {
            return Err(SbvfsError::Full {
                kind: FileKind::Journal,
                offset: chunk.physical,
                len: chunk.len as u64,
            });
        }
        Ok(())
    }

    /// Free bytes between the database region and the journal region
    pub fn free_gap(&self) -> u64 {
        self.blob_len
            .saturating_sub(BLOCK + self.database_len)
            .saturating_sub(self.journal_len)
    }
}

/// Iterator over the physical chunks of a journal request
///
/// Logical journal block `k` lives at physical
/// `[blob_len - BLOCK * (k + 1), blob_len - BLOCK * k)`.
#[derive(Debug, Clone)]
pub struct JournalChunks {
    blob_len: u64,
    logical: u64,
    remaining: usize,
    buf_offset: usize,
}

impl Iterator for JournalChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.remaining == 0 {
            return None;
        }

        let block_index = self.logical / BLOCK;
        let block_off = self.logical % BLOCK;
        // Blocks past the front of the blob have no physical home; the
        // caller's overlap check rejects the saturated offset.
        let physical = self
            .blob_len
            .saturating_sub(BLOCK * (block_index + 1))
            + block_off;
        let len = self.remaining.min((BLOCK - block_off) as usize);

        let chunk = Chunk {
            physical,
            len,
            buf_offset: self.buf_offset,
        };

        self.logical += len as u64;
        self.buf_offset += len;
        self.remaining -= len;

        Some(chunk)
    }
}
