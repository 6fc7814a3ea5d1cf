use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use parallel_gzip::bit_reader::BitReader;
use parallel_gzip::shared_from_vec;

fn pseudo_random_bytes(len: usize) -> Vec<u8> {
    let mut state = 0x9E3779B97F4A7C15u64;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

fn bench_sequential_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("bit_reader_sequential");
    let data = pseudo_random_bytes(8 * 1024 * 1024);

    for &bits in &[1u8, 5, 13, 24, 57] {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(bits), &bits, |b, &bits| {
            b.iter(|| {
                let mut reader = BitReader::new(shared_from_vec(data.clone()));
                let mut checksum = 0u64;
                while reader.bits_available() >= u64::from(bits) {
                    checksum ^= reader.read(bits).unwrap();
                }
                black_box(checksum)
            })
        });
    }
    group.finish();
}

fn bench_peek_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("bit_reader_peek_consume");
    let data = pseudo_random_bytes(4 * 1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("peek15_consume_variable", |b| {
        b.iter(|| {
            let mut reader = BitReader::new(shared_from_vec(data.clone()));
            let mut checksum = 0u64;
            while reader.bits_available() >= 15 {
                let bits = reader.peek(15);
                checksum ^= bits;
                // Consume a data-dependent amount, like a Huffman decoder.
                reader.seek_after_peek(1 + (bits & 0x7) as u8);
            }
            black_box(checksum)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_sequential_reads, bench_peek_consume);
criterion_main!(benches);
