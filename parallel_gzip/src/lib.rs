//! Parallel random-access decompression for gzip, BGZF, zlib, and raw
//! deflate.
//!
//! Deflate is a serial format: every block may reference the 32 KiB of
//! output before it, so naive decompression is single-threaded. This
//! library decodes one compressed stream on many cores anyway by finding
//! deflate block boundaries speculatively, decoding disjoint chunks in
//! parallel, and reconstructing the back-references that cross chunk
//! boundaries afterwards.
//!
//! # Features
//!
//! - **Parallel chunk decompression**: a worker pool decodes chunks found
//!   by a bit-level block finder, scaling with available cores
//! - **Random access**: a block/window map built during decoding makes
//!   repeated seeks cheap; it can be exported and re-imported as a seek
//!   index (checkpoint format or BGZF GZI)
//! - **Streaming API**: implements `std::io::Read` and `std::io::Seek`
//! - **Integrity**: per-member CRC32 (gzip) and Adler-32 (zlib)
//!   verification while reading sequentially
//!
//! # Architecture
//!
//! 1. **Finding**: workers locate the next plausible deflate block start
//!    from an arbitrary bit offset via a skip-table and precode-validity
//!    rejection cascade ([`block_finder`], [`precode`])
//! 2. **Decoding**: each chunk decodes without knowing its 32 KiB history,
//!    emitting 16-bit marker symbols for unresolved references
//!    ([`chunk`], [`chunk_decoder`])
//! 3. **Resolution**: once the predecessor finishes, markers are patched
//!    in place and checksums verified ([`reader`])
//!
//! # Quick Start
//!
//! ```no_run
//! use parallel_gzip::ParallelGzipReader;
//! use std::io::Read;
//!
//! let mut reader = ParallelGzipReader::open("file.gz").unwrap();
//! let mut data = Vec::new();
//! reader.read_to_end(&mut data).unwrap();
//! ```
//!
//! # Random access with a seek index
//!
//! ```no_run
//! use parallel_gzip::{GzipIndex, ParallelGzipReader};
//! use std::io::{Read, Seek, SeekFrom};
//!
//! let mut reader = ParallelGzipReader::open("file.gz").unwrap();
//! let index = reader.gzip_index().unwrap();
//! let mut file = std::fs::File::create("file.gz.index").unwrap();
//! index.write_to(&mut file).unwrap();
//!
//! // Later, skip the sequential first pass entirely:
//! let mut reader = ParallelGzipReader::open("file.gz").unwrap();
//! let mut file = std::fs::File::open("file.gz.index").unwrap();
//! let index = GzipIndex::read_from(&mut file).unwrap();
//! reader.set_block_offsets(&index).unwrap();
//! reader.seek(SeekFrom::Start(1 << 30)).unwrap();
//! ```

pub mod bit_reader;
pub mod block_finder;
pub mod block_map;
pub mod cache;
pub mod chunk;
pub mod chunk_decoder;
pub mod deflate;
pub mod error;
pub mod fetcher;
pub mod fetching_strategy;
pub mod gzip;
pub mod huffman;
pub mod index;
pub mod precode;
pub mod reader;
pub mod source;

pub use error::{GzipError, Result};
pub use gzip::FileFormat;
pub use index::GzipIndex;
pub use reader::{ParallelGzipReader, ReaderOptions, DEFAULT_CHUNK_SIZE};
pub use source::{shared_from_file, shared_from_vec, SharedSource, SliceSource, Source};

/// Decompresses a whole file in parallel and returns its contents.
///
/// Convenience wrapper for tests and simple callers; use
/// [`ParallelGzipReader`] for streaming or random access.
pub fn parallel_gzip_cat<P: AsRef<std::path::Path>>(path: P) -> Result<Vec<u8>> {
    let mut reader = ParallelGzipReader::open(path)?;
    reader.read_to_vec()
}
