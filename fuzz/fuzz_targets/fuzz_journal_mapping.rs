#![no_main]
use libfuzzer_sys::fuzz_target;
use sbvfs::layout::{Layout, BLOCK};

// Journal chunks must tile the request exactly and stay inside one block each
fuzz_target!(|input: (u32, u32, u16)| {
    let (blob_blocks, offset, len) = input;
    let blob_len = (u64::from(blob_blocks % 40_960) + 2) * BLOCK;
    let offset = u64::from(offset) % blob_len;
    let len = len as usize;

    let layout = Layout::fresh(blob_len);
    let mut covered = 0usize;
    for chunk in layout.journal_chunks(offset, len) {
        assert_eq!(chunk.buf_offset, covered);
        assert!(chunk.len > 0 && chunk.len as u64 <= BLOCK);

        let logical = offset + covered as u64;
        if logical < blob_len {
            let block = logical / BLOCK;
            assert_eq!(chunk.physical, blob_len - BLOCK * (block + 1) + logical % BLOCK);
            assert!(chunk.physical + chunk.len as u64 <= blob_len);
        }
        covered += chunk.len;
    }
    assert_eq!(covered, len);
});
