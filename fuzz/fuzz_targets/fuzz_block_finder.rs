#![no_main]

use libfuzzer_sys::fuzz_target;
use parallel_gzip::bit_reader::BitReader;
use parallel_gzip::block_finder::find_next_dynamic_block;
use parallel_gzip::deflate::{read_block_header, read_dynamic_trees, BlockType};
use parallel_gzip::shared_from_vec;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 1_000_000 {
        return;
    }

    let source = shared_from_vec(data.to_vec());
    let mut reader = BitReader::new(source.clone());

    let mut found = 0usize;
    let mut offset = 0u64;
    while let Some(candidate) = {
        reader.seek(offset);
        find_next_dynamic_block(&mut reader, u64::MAX)
    } {
        // Soundness up to the full parse: every accepted offset must be a
        // parseable non-final dynamic header.
        let mut check = BitReader::new(source.clone());
        check.seek(candidate);
        let header = read_block_header(&mut check).expect("accepted offset must parse");
        assert_eq!(header.block_type, BlockType::DynamicHuffman);
        assert!(!header.is_final);
        read_dynamic_trees(&mut check).expect("accepted offset must yield valid trees");

        offset = candidate + 1;
        found += 1;
        if found > 10_000 {
            break;
        }
    }
});
