#![no_main]
use libfuzzer_sys::{fuzz_target, arbitrary::{Arbitrary, Unstructured}};
use sbvfs::{BlobVfs, BlockDevice, FileKind, MemoryDevice};

const BLOB: u64 = 64 * 1024;

#[derive(Debug, Arbitrary)]
enum RegionOp {
    Write { journal: bool, offset: u16, data: Vec<u8> },
    Read { journal: bool, offset: u16, len: u16 },
    Truncate { journal: bool, size: u16 },
    Sync { journal: bool },
    DeleteJournal,
}

// Arbitrary region operations on a small blob must never panic
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let ops: Vec<RegionOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let vfs = BlobVfs::new();
    let device = MemoryDevice::fixed("fuzz", BLOB);
    let db = match vfs.open_with("fuzz.db", FileKind::Database, move |_| {
        Ok(Box::new(device) as Box<dyn BlockDevice>)
    }) {
        Ok(db) => db,
        Err(_) => return,
    };
    let journal = match vfs.open_with("fuzz.db-journal", FileKind::Journal, |_| unreachable!()) {
        Ok(journal) => journal,
        Err(_) => return,
    };

    for op in ops.iter().take(64) {
        match op {
            RegionOp::Write { journal: j, offset, data } => {
                let file = if *j { &journal } else { &db };
                let _ = file.write(data, u64::from(*offset));
            }
            RegionOp::Read { journal: j, offset, len } => {
                let file = if *j { &journal } else { &db };
                let mut buf = vec![0u8; *len as usize];
                let _ = file.read(&mut buf, u64::from(*offset));
            }
            RegionOp::Truncate { journal: j, size } => {
                let file = if *j { &journal } else { &db };
                let _ = file.truncate(u64::from(*size));
            }
            RegionOp::Sync { journal: j } => {
                let file = if *j { &journal } else { &db };
                let _ = file.sync(0);
            }
            RegionOp::DeleteJournal => {
                let _ = vfs.delete("fuzz.db-journal");
            }
        }

        let layout = vfs.stats("fuzz.db").unwrap();
        assert!(layout.database_len + 512 <= layout.blob_len);
    }

    vfs.close(journal).unwrap();
    vfs.close(db).unwrap();
});
