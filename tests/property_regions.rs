//! Property-based tests for region isolation
//!
//! Random interleavings of database and journal writes on a small blob must
//! never let one region clobber the other.

use proptest::prelude::*;
use sbvfs::layout::{Layout, BLOCK};
use sbvfs::{BlobVfs, BlockDevice, FileKind, MemoryDevice, RegionFile};

const SMALL_BLOB: u64 = 64 * 1024;

#[derive(Debug, Clone)]
enum Op {
    Database { offset: u64, len: usize },
    Journal { offset: u64, len: usize },
    TruncateJournal,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u64..SMALL_BLOB, 1usize..4096).prop_map(|(offset, len)| Op::Database { offset, len }),
        4 => (0u64..SMALL_BLOB / 2, 1usize..4096).prop_map(|(offset, len)| Op::Journal { offset, len }),
        1 => Just(Op::TruncateJournal),
    ]
}

/// Bytes we expect in a region; `None` where the content is not known
struct Model(Vec<Option<u8>>);

impl Model {
    fn write(&mut self, offset: u64, data: &[u8]) {
        let end = offset as usize + data.len();
        if self.0.len() < end {
            self.0.resize(end, None);
        }
        for (slot, &b) in self.0[offset as usize..end].iter_mut().zip(data) {
            *slot = Some(b);
        }
    }

    fn forget(&mut self, offset: u64, len: usize) {
        let start = (offset as usize).min(self.0.len());
        let end = (offset as usize + len).min(self.0.len());
        for slot in &mut self.0[start..end] {
            *slot = None;
        }
    }

    fn truncate(&mut self, len: u64) {
        self.0.truncate(len as usize);
    }

    fn check(&self, file: &RegionFile) -> Result<(), TestCaseError> {
        let mut actual = vec![0u8; file.file_size() as usize];
        file.read(&mut actual, 0).unwrap();
        for (i, expected) in self.0.iter().enumerate().take(actual.len()) {
            if let Some(b) = expected {
                prop_assert_eq!(actual[i], *b, "{} byte {} clobbered", file.kind(), i);
            }
        }
        Ok(())
    }
}

fn pattern(seed: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((seed * 31 + i) % 255 + 1) as u8).collect()
}

fn open_small(vfs: &BlobVfs, device: &MemoryDevice) -> (RegionFile, RegionFile) {
    let device = device.clone();
    let db = vfs
        .open_with("prop.db", FileKind::Database, move |_| {
            Ok(Box::new(device) as Box<dyn BlockDevice>)
        })
        .unwrap();
    let journal = vfs
        .open_with("prop.db-journal", FileKind::Journal, |_| unreachable!())
        .unwrap();
    (db, journal)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_regions_never_overlap(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let vfs = BlobVfs::new();
        let device = MemoryDevice::fixed("prop", SMALL_BLOB);
        let (db, journal) = open_small(&vfs, &device);

        let mut db_model = Model(Vec::new());
        let mut journal_model = Model(Vec::new());

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Database { offset, len } => {
                    let data = pattern(step, len);
                    if db.write(&data, offset).is_ok() {
                        db_model.write(offset, &data);
                    }
                }
                Op::Journal { offset, len } => {
                    let data = pattern(step, len);
                    match journal.write(&data, offset) {
                        Ok(()) => journal_model.write(offset, &data),
                        // Chunks before the failing one may have landed
                        Err(e) => {
                            prop_assert!(e.is_full());
                            journal_model.forget(offset, len);
                        }
                    }
                }
                Op::TruncateJournal => {
                    vfs.delete("prop.db-journal").unwrap();
                    journal_model.truncate(0);
                }
            }

            let layout: Layout = vfs.stats("prop.db").unwrap();
            prop_assert!(layout.database_len + BLOCK <= layout.blob_len);
            db_model.check(&db)?;
            journal_model.check(&journal)?;
        }

        vfs.close(journal).unwrap();
        vfs.close(db).unwrap();
    }
}
