#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parallel_gzip::deflate::{MAX_PRECODE_LENGTH, PRECODE_BITS};
use parallel_gzip::huffman::check_code_lengths;
use parallel_gzip::precode::check_precode;

#[derive(Debug, Arbitrary)]
struct PrecodeInput {
    count_minus_four: u8,
    lengths: [u8; 19],
}

fuzz_target!(|input: PrecodeInput| {
    let count = 4 + (input.count_minus_four & 0x0F) as usize;
    let lengths: Vec<u8> = input
        .lengths
        .iter()
        .take(count)
        .map(|&l| l & 0x07)
        .collect();

    let mut bits = 0u64;
    for (i, &length) in lengths.iter().enumerate() {
        bits |= (length as u64) << (i * PRECODE_BITS as usize);
    }
    let fast = check_precode((count - 4) as u64, bits);
    let full = check_code_lengths(&lengths, MAX_PRECODE_LENGTH);

    // Completeness: the fast filter never rejects a code-length vector the
    // full validator accepts. (It may accept some the full check rejects;
    // those die in the header parse.)
    if full.is_ok() && !lengths.iter().all(|&l| l == 0) {
        assert!(
            fast.is_ok(),
            "precode filter rejected a valid precode: {lengths:?}"
        );
    }
});
