use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use parallel_gzip::{shared_from_vec, ParallelGzipReader, ReaderOptions};

fn base64_like_data(len: usize) -> Vec<u8> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut state = 0x123456789ABCDEFu64;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ALPHABET[(state >> 58) as usize]
        })
        .collect()
}

fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(6));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn bench_parallel_decompression(c: &mut Criterion) {
    let mut group = c.benchmark_group("e2e_decompress");
    group.sample_size(10);

    let data = base64_like_data(32 * 1024 * 1024);
    let compressed = gzip_compress(&data);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for &parallelism in &[1usize, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("p{parallelism}")),
            &parallelism,
            |b, &parallelism| {
                b.iter(|| {
                    let mut reader = ParallelGzipReader::with_options(
                        shared_from_vec(compressed.clone()),
                        ReaderOptions {
                            parallelism,
                            chunk_size: 1024 * 1024,
                            ..ReaderOptions::default()
                        },
                    )
                    .unwrap();
                    black_box(reader.read_to_vec().unwrap().len())
                })
            },
        );
    }
    group.finish();
}

fn bench_indexed_random_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("e2e_random_access");
    group.sample_size(10);

    let data = base64_like_data(16 * 1024 * 1024);
    let compressed = gzip_compress(&data);

    // Build the index once outside the measurement.
    let mut reader = ParallelGzipReader::with_options(
        shared_from_vec(compressed.clone()),
        ReaderOptions {
            parallelism: 4,
            chunk_size: 1024 * 1024,
            ..ReaderOptions::default()
        },
    )
    .unwrap();
    let index = reader.gzip_index().unwrap();

    group.bench_function("seek_and_read_64k", |b| {
        let mut reader = ParallelGzipReader::with_options(
            shared_from_vec(compressed.clone()),
            ReaderOptions {
                parallelism: 4,
                chunk_size: 1024 * 1024,
                ..ReaderOptions::default()
            },
        )
        .unwrap();
        reader.set_block_offsets(&index).unwrap();
        let mut position = 0u64;
        b.iter(|| {
            position = (position * 31 + 1_234_567) % (15 * 1024 * 1024);
            reader.seek_to(position).unwrap();
            let mut out = Vec::new();
            reader.read_into(&mut out, 64 * 1024).unwrap();
            black_box(out.len())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parallel_decompression, bench_indexed_random_access);
criterion_main!(benches);
