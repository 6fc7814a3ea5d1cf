#![no_main]

use std::io::Read;

use libfuzzer_sys::fuzz_target;
use parallel_gzip::{shared_from_vec, ParallelGzipReader, ReaderOptions};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 1_000_000 {
        return;
    }

    let options = ReaderOptions {
        parallelism: 2,
        chunk_size: 8 * 1024,
        ..ReaderOptions::default()
    };
    let Ok(mut reader) =
        ParallelGzipReader::with_options(shared_from_vec(data.to_vec()), options)
    else {
        return;
    };

    // Never panic; either produce bytes or a typed error.
    let ours = reader.read_to_vec();

    // When flate2 agrees the input is a valid gzip stream, the outputs
    // must be identical.
    if data.starts_with(&[0x1F, 0x8B]) {
        let mut expected = Vec::new();
        if flate2::read::MultiGzDecoder::new(data)
            .read_to_end(&mut expected)
            .is_ok()
        {
            if let Ok(ours) = ours {
                assert_eq!(ours, expected, "parallel and serial decode disagree");
            }
        }
    }
});
