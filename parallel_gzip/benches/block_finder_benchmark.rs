use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use parallel_gzip::bit_reader::BitReader;
use parallel_gzip::block_finder::find_next_dynamic_block;
use parallel_gzip::shared_from_vec;

fn compressible_data(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| b"abcdefghijklmnop"[(i * i / 777 + i / 5) % 16])
        .collect()
}

fn deflate_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::new(9));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Full-stream scan: how fast the finder walks compressed data while
/// confirming every true block boundary on the way.
fn bench_scan_compressed(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_finder_scan");
    for size_mb in [1usize, 4] {
        let compressed = deflate_compress(&compressible_data(size_mb * 1024 * 1024));
        group.throughput(Throughput::Bytes(compressed.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size_mb}MB")),
            &compressed,
            |b, compressed| {
                b.iter(|| {
                    let source = shared_from_vec(compressed.clone());
                    let mut reader = BitReader::new(source);
                    reader.seek(1);
                    let mut count = 0usize;
                    while let Some(offset) = find_next_dynamic_block(&mut reader, u64::MAX) {
                        count += 1;
                        reader.seek(offset + 1);
                    }
                    black_box(count)
                })
            },
        );
    }
    group.finish();
}

/// Worst case: data with no deflate blocks at all, so every bit position
/// runs through the rejection cascade.
fn bench_scan_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_finder_reject");
    let mut state = 0xDEADBEEFCAFEF00Du64;
    let data: Vec<u8> = (0..1024 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("1MB_random", |b| {
        b.iter(|| {
            let source = shared_from_vec(data.clone());
            let mut reader = BitReader::new(source);
            reader.seek(0);
            black_box(find_next_dynamic_block(&mut reader, u64::MAX))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_scan_compressed, bench_scan_random);
criterion_main!(benches);
