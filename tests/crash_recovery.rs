//! Recovery tests
//!
//! Verify what a blob looks like after reopening, including interrupted
//! transactions, using the facade directly on blob files

use sbvfs::layout::{max_database_len, BLOB_SIZE, BLOCK};
use sbvfs::{BlobVfs, FileKind, SbvfsError};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use tempfile::TempDir;

fn blob_path(dir: &TempDir) -> (PathBuf, String) {
    let path = dir.path().join("blob.img");
    let name = path.to_str().unwrap().to_string();
    (path, name)
}

fn poke(path: &PathBuf, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
}

fn read_back(path: &PathBuf, offset: u64, len: usize) -> Vec<u8> {
    let data = std::fs::read(path).unwrap();
    data[offset as usize..offset as usize + len].to_vec()
}

#[test]
fn test_fresh_blob_materialized() {
    let temp_dir = TempDir::new().unwrap();
    let (path, name) = blob_path(&temp_dir);

    let vfs = BlobVfs::new();
    let db = vfs.open(&name, FileKind::Database).unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), BLOB_SIZE);
    assert_eq!(db.file_size(), 0);
    assert_eq!(read_back(&path, 0, 4), vec![0; 4]);
    assert_eq!(read_back(&path, BLOB_SIZE - 4, 4), vec![0; 4]);

    vfs.close(db).unwrap();
}

#[test]
fn test_recovery_with_journal_trailer() {
    let temp_dir = TempDir::new().unwrap();
    let (path, name) = blob_path(&temp_dir);
    let journal_name = format!("{}-journal", name);

    poke(&path, 0, &[0, 0, 0, 7]);
    poke(&path, BLOCK, b"Hello!\n");
    poke(&path, BLOB_SIZE - 4, &[0xD9, 0xD5, 0x05, 0xF9]);

    let vfs = BlobVfs::new();
    let db = vfs.open(&name, FileKind::Database).unwrap();
    let layout = vfs.stats(&name).unwrap();
    assert_eq!(layout.database_len, 7);
    assert_eq!(layout.journal_len, BLOB_SIZE);
    assert!(vfs.exists(&journal_name));

    let mut buf = [0u8; 7];
    db.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"Hello!\n");

    let journal = vfs.open(&journal_name, FileKind::Journal).unwrap();
    assert_eq!(journal.file_size(), BLOB_SIZE);

    // The conservative journal size leaves the database no room
    let err = db.write(&[1; 16], 7).unwrap_err();
    assert!(err.is_full());

    vfs.delete(&journal_name).unwrap();
    assert!(!vfs.exists(&journal_name));
    assert_eq!(read_back(&path, BLOB_SIZE - BLOCK, 4), vec![0; 4]);
    assert_eq!(read_back(&path, BLOB_SIZE - 4, 4), vec![0; 4]);

    db.write(&[1; 16], 7).unwrap();
    assert_eq!(db.file_size(), 23);

    vfs.close(journal).unwrap();
    vfs.close(db).unwrap();
}

#[test]
fn test_unsynced_growth_not_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let (_path, name) = blob_path(&temp_dir);
    let vfs = BlobVfs::new();

    {
        let db = vfs.open(&name, FileKind::Database).unwrap();
        db.write(&[0x11; 4096], 0).unwrap();
        db.sync(0).unwrap();
        db.write(&[0x22; 4096], 4096).unwrap();
        assert_eq!(db.file_size(), 8192);
        vfs.close(db).unwrap();
    }

    let db = vfs.open(&name, FileKind::Database).unwrap();
    assert_eq!(db.file_size(), 4096);

    let mut page = vec![0u8; 4096];
    db.read(&mut page, 0).unwrap();
    assert!(page.iter().all(|&b| b == 0x11));
    assert!(db.read(&mut page, 4096).unwrap_err().is_short_read());

    vfs.close(db).unwrap();
}

#[test]
fn test_journal_round_trip_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let (path, name) = blob_path(&temp_dir);
    let journal_name = format!("{}-journal", name);
    let vfs = BlobVfs::new();

    let record: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
    {
        let db = vfs.open(&name, FileKind::Database).unwrap();
        let journal = vfs.open(&journal_name, FileKind::Journal).unwrap();
        journal.write(&record, 0).unwrap();
        journal.sync(0).unwrap();
        vfs.close(journal).unwrap();
        vfs.close(db).unwrap();
    }

    // Block k of the journal sits k blocks in front of the blob end
    assert_eq!(read_back(&path, BLOB_SIZE - BLOCK, 512), record[..512].to_vec());
    assert_eq!(read_back(&path, BLOB_SIZE - 2 * BLOCK, 512), record[512..1024].to_vec());
    assert_eq!(read_back(&path, BLOB_SIZE - 3 * BLOCK, 476), record[1024..].to_vec());

    let db = vfs.open(&name, FileKind::Database).unwrap();
    let journal = vfs.open(&journal_name, FileKind::Journal).unwrap();
    // Trailer holds record bytes 508..512, which are nonzero
    assert_eq!(journal.file_size(), BLOB_SIZE);

    let mut back = vec![0u8; record.len()];
    journal.read(&mut back, 0).unwrap();
    assert_eq!(back, record);

    vfs.close(journal).unwrap();
    vfs.close(db).unwrap();
}

#[test]
fn test_corrupt_header_refused() {
    let temp_dir = TempDir::new().unwrap();
    let (path, name) = blob_path(&temp_dir);
    poke(&path, BLOB_SIZE - 1, &[0]);
    poke(&path, 0, &[0x7F, 0, 0, 0]);

    let vfs = BlobVfs::new();
    let err = vfs.open(&name, FileKind::Database).err().unwrap();
    assert!(matches!(err, SbvfsError::CorruptHeader { .. }));
    assert_eq!(vfs.open_blobs(), 0);
}

#[test]
fn test_short_file_refused() {
    let temp_dir = TempDir::new().unwrap();
    let (path, name) = blob_path(&temp_dir);
    poke(&path, 0, &[0; 100]);

    let vfs = BlobVfs::new();
    let err = vfs.open(&name, FileKind::Database).err().unwrap();
    assert!(matches!(err, SbvfsError::DeviceTooSmall { len: 100, .. }));
}

#[test]
fn test_database_ceiling() {
    let temp_dir = TempDir::new().unwrap();
    let (_path, name) = blob_path(&temp_dir);
    let vfs = BlobVfs::new();
    let db = vfs.open(&name, FileKind::Database).unwrap();

    let cap = max_database_len(BLOB_SIZE);
    db.write(&[0xEE; 512], cap - 512).unwrap();
    assert_eq!(db.file_size(), cap);
    assert!(db.write(&[0xEE; 1], cap).unwrap_err().is_full());

    vfs.close(db).unwrap();
}

#[test]
fn test_oversized_file_keeps_size_word_exact() {
    let temp_dir = TempDir::new().unwrap();
    let (path, name) = blob_path(&temp_dir);
    // Sparse file far larger than a blob
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(5 << 30)
        .unwrap();

    let vfs = BlobVfs::new();
    let cap = max_database_len(BLOB_SIZE);
    {
        let db = vfs.open(&name, FileKind::Database).unwrap();
        assert_eq!(vfs.stats(&name).unwrap().blob_len, BLOB_SIZE);

        assert!(db.write(&[0x5A], (1 << 32) + 10).unwrap_err().is_full());
        db.write(&[0x5A; 512], cap - 512).unwrap();
        db.sync(0).unwrap();
        vfs.close(db).unwrap();
    }

    let db = vfs.open(&name, FileKind::Database).unwrap();
    assert_eq!(db.file_size(), cap);
    let mut page = [0u8; 512];
    db.read(&mut page, cap - 512).unwrap();
    assert_eq!(page, [0x5A; 512]);
    vfs.close(db).unwrap();
}

#[test]
fn test_open_close_cycle_leaves_blob_file_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let (path, name) = blob_path(&temp_dir);
    let vfs = BlobVfs::new();

    let db = vfs.open(&name, FileKind::Database).unwrap();
    vfs.close(db).unwrap();
    let first = std::fs::read(&path).unwrap();
    assert_eq!(first.len() as u64, BLOB_SIZE);
    assert!(first.iter().all(|&b| b == 0));

    let db = vfs.open(&name, FileKind::Database).unwrap();
    vfs.close(db).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), first);
}
