//! End-to-end scenarios: known byte vectors, multi-member streams, BGZF,
//! truncation, index round-trips, and parallel-vs-serial equivalence.

use std::io::{Read, Seek, SeekFrom, Write};

use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};

use parallel_gzip::gzip::BGZF_EOF_BLOCK;
use parallel_gzip::{
    shared_from_vec, FileFormat, GzipError, GzipIndex, ParallelGzipReader, ReaderOptions,
};

/// The canonical 21-byte gzip member holding the single byte `A`.
const ONE_BYTE_GZIP: [u8; 21] = [
    0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x73, 0x04, 0x00, 0x8B, 0x9E,
    0xD9, 0xD3, 0x01, 0x00, 0x00, 0x00,
];

/// A 20-byte empty gzip member.
const EMPTY_GZIP: [u8; 20] = [
    0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00,
];

fn options(parallelism: usize, chunk_size: usize) -> ReaderOptions {
    ReaderOptions {
        parallelism,
        chunk_size,
        ..ReaderOptions::default()
    }
}

fn reader_with(bytes: Vec<u8>, parallelism: usize, chunk_size: usize) -> ParallelGzipReader {
    ParallelGzipReader::with_options(shared_from_vec(bytes), options(parallelism, chunk_size))
        .unwrap()
}

fn gzip_compress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(9));
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

fn serial_decode(compressed: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    flate2::read::MultiGzDecoder::new(compressed)
        .read_to_end(&mut out)
        .unwrap();
    out
}

/// Builds one BGZF member around the payload.
fn bgzf_member(payload: &[u8]) -> Vec<u8> {
    let mut deflate =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::new(6));
    deflate.write_all(payload).unwrap();
    let deflate = deflate.finish().unwrap();

    let total = 18 + deflate.len() + 8;
    let bsize = (total - 1) as u16;
    let mut member = vec![
        0x1F, 0x8B, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x06, 0x00, b'B', b'C',
        0x02, 0x00,
    ];
    member.extend_from_slice(&bsize.to_le_bytes());
    member.extend_from_slice(&deflate);
    let mut crc = crc32fast::Hasher::new();
    crc.update(payload);
    member.extend_from_slice(&crc.finalize().to_le_bytes());
    member.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    member
}

#[test]
fn one_byte_gzip_decodes_to_a() {
    let mut reader = reader_with(ONE_BYTE_GZIP.to_vec(), 2, 8 * 1024);
    let out = reader.read_to_vec().unwrap();
    assert_eq!(out, b"A");
    assert_eq!(reader.size(), Some(1));
}

#[test]
fn empty_member_then_one_byte_member() {
    let mut bytes = EMPTY_GZIP.to_vec();
    bytes.extend_from_slice(&ONE_BYTE_GZIP);
    let mut reader = reader_with(bytes, 2, 8 * 1024);
    assert_eq!(reader.read_to_vec().unwrap(), b"A");
    assert_eq!(reader.size(), Some(1));
}

#[test]
fn bgzf_eof_marker_only() {
    let mut reader = reader_with(BGZF_EOF_BLOCK.to_vec(), 2, 8 * 1024);
    assert_eq!(reader.format(), FileFormat::Bgzf);
    assert!(reader.read_to_vec().unwrap().is_empty());
    assert_eq!(reader.size(), Some(0));
    let index = reader.gzip_index().unwrap();
    assert_eq!(index.checkpoints.len(), 1);
}

#[test_log::test]
fn large_random_base64_parallel_equals_serial() {
    // Base64-ish alphabet keeps the data compressible enough for dynamic
    // blocks while staying high-entropy.
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
    let data: Vec<u8> = (0..8 * 1024 * 1024)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())])
        .collect();
    let compressed = gzip_compress(&data);
    assert_eq!(serial_decode(&compressed), data);

    // Small chunks force many parallel workers over the single member.
    let mut reader = reader_with(compressed.clone(), 4, 64 * 1024);
    assert_eq!(reader.read_to_vec().unwrap(), data);

    // Export, re-import, re-read: bit-identical.
    let index = reader.gzip_index().unwrap();
    let mut serialized = Vec::new();
    index.write_to(&mut serialized).unwrap();
    let restored = GzipIndex::read_from(&mut serialized.as_slice()).unwrap();

    let mut second = reader_with(compressed, 4, 64 * 1024);
    second.set_block_offsets(&restored).unwrap();
    assert_eq!(second.read_to_vec().unwrap(), data);

    // And over a random read pattern.
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for _ in 0..20 {
        let start = rng.random_range(0..data.len() as u64);
        let len = rng.random_range(1..100_000u64);
        second.seek_to(start).unwrap();
        let mut out = Vec::new();
        second.read_into(&mut out, len).unwrap();
        let end = ((start + len) as usize).min(data.len());
        assert_eq!(out, &data[start as usize..end]);
    }
}

#[test]
fn all_zero_input_uses_degenerate_huffman_trees() {
    let data = vec![0u8; 256 * 1024];
    let compressed = gzip_compress(&data);
    let mut reader = reader_with(compressed, 3, 8 * 1024);
    assert_eq!(reader.read_to_vec().unwrap(), data);
}

#[test]
fn truncated_stream_is_eof_not_checksum_mismatch() {
    let compressed = gzip_compress(b"0123456789");
    let truncated = compressed[..compressed.len() - 2].to_vec();
    let mut reader = reader_with(truncated, 2, 8 * 1024);
    assert!(matches!(
        reader.read_to_vec(),
        Err(GzipError::UnexpectedEof)
    ));
}

#[test]
fn pigz_style_many_tiny_members() {
    let mut bytes = Vec::new();
    let mut expected = Vec::new();
    for i in 0..300u32 {
        let payload = format!("member {i} payload\n").into_bytes();
        bytes.extend_from_slice(&gzip_compress(&payload));
        expected.extend_from_slice(&payload);
    }
    let mut reader = reader_with(bytes, 4, 8 * 1024);
    assert_eq!(reader.read_to_vec().unwrap(), expected);
    assert_eq!(reader.size(), Some(expected.len() as u64));
}

#[test]
fn stored_blocks_empty_and_maximal() {
    // Raw deflate: a non-final empty stored block, then a final stored
    // block of 65 535 bytes.
    let payload: Vec<u8> = (0..65_535u32).map(|i| (i % 251) as u8).collect();
    let mut bytes = vec![0x00, 0x00, 0x00, 0xFF, 0xFF];
    bytes.extend_from_slice(&[0x01, 0xFF, 0xFF, 0x00, 0x00]);
    bytes.extend_from_slice(&payload);

    let mut reader = reader_with(bytes, 2, 8 * 1024);
    assert_eq!(reader.format(), FileFormat::RawDeflate);
    assert_eq!(reader.read_to_vec().unwrap(), payload);
}

#[test]
fn first_block_final_degrades_to_serial() {
    // A tiny member is a single final block: no parallel anchors exist,
    // and decoding must still work with a large worker pool.
    let compressed = gzip_compress(b"tiny");
    let mut reader = reader_with(compressed, 8, 8 * 1024);
    assert_eq!(reader.read_to_vec().unwrap(), b"tiny");
}

#[test_log::test]
fn bgzf_multi_member_with_gzi_round_trip() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut bytes = Vec::new();
    let mut expected = Vec::new();
    for _ in 0..6 {
        let payload: Vec<u8> = (0..50_000).map(|_| rng.random_range(b'a'..=b'p')).collect();
        bytes.extend_from_slice(&bgzf_member(&payload));
        expected.extend_from_slice(&payload);
    }
    bytes.extend_from_slice(&BGZF_EOF_BLOCK);

    let mut reader = reader_with(bytes.clone(), 4, 8 * 1024);
    assert_eq!(reader.format(), FileFormat::Bgzf);
    assert_eq!(reader.read_to_vec().unwrap(), expected);

    // Export as GZI, re-import, and read random ranges.
    let index = reader.gzip_index().unwrap();
    let mut gzi = Vec::new();
    index.write_gzi(&mut gzi).unwrap();
    let restored = GzipIndex::read_from(&mut gzi.as_slice()).unwrap();

    let mut second = reader_with(bytes, 4, 8 * 1024);
    second.set_block_offsets(&restored).unwrap();
    for &(start, len) in &[(0u64, 1000u64), (120_000, 5000), (299_000, 1000)] {
        second.seek_to(start).unwrap();
        let mut out = Vec::new();
        second.read_into(&mut out, len).unwrap();
        let end = ((start + len) as usize).min(expected.len());
        assert_eq!(out, &expected[start as usize..end], "range {start}+{len}");
    }
}

#[test]
fn io_read_seek_interface() {
    let data: Vec<u8> = (0..100_000u32).map(|i| (i / 100) as u8).collect();
    let compressed = gzip_compress(&data);
    let mut reader = reader_with(compressed, 2, 8 * 1024);

    let mut head = [0u8; 16];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(head, data[..16]);

    reader.seek(SeekFrom::Start(50_000)).unwrap();
    let mut mid = [0u8; 16];
    reader.read_exact(&mut mid).unwrap();
    assert_eq!(mid, data[50_000..50_016]);

    reader.seek(SeekFrom::End(-16)).unwrap();
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &data[data.len() - 16..]);
}

#[test]
fn invalid_magic_is_rejected_at_open() {
    let result = ParallelGzipReader::with_options(
        shared_from_vec(vec![0xFF; 64]),
        options(1, 8 * 1024),
    );
    assert!(matches!(result, Err(GzipError::InvalidMagic)));
}
