//! The public random-access reader.
//!
//! The reader owns the worker pool (through the fetcher), the block map,
//! and the window map. Chunks are discovered strictly in order on the
//! owning thread: every chunk start except the first is the previous
//! chunk's exact end, so marker resolution always has the predecessor
//! window at hand. Workers meanwhile prefetch ahead speculatively; their
//! results only need the owning thread's final say (resolution, checksum
//! accounting, publication into the maps).
//!
//! Random access over already-mapped territory needs none of that: the
//! chunk containing a byte offset is found by upper-bound search and
//! decoded with the window stored at its start.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::block_map::{BlockMap, ChunkRange, MapEntry, Window, WindowMap};
use crate::chunk::{ChunkData, StreamFooter};
use crate::deflate::MAX_WINDOW_SIZE;
use crate::error::{GzipError, Result};
use crate::fetcher::{
    ChunkFetcher, ChunkRequest, DecodePlan, FetchStatistics, FetcherConfig, PrefetchTarget,
};
use crate::gzip::{self, Adler32, FileFormat};
use crate::index::GzipIndex;
use crate::source::{shared_from_file, shared_from_vec, SharedSource};

pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;
const MIN_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Worker threads; 0 means one per available core.
    pub parallelism: usize,
    /// Compressed bytes per chunk.
    pub chunk_size: usize,
    /// Verify gzip CRC32 / zlib Adler-32 while reading sequentially.
    pub verify_checksums: bool,
    /// Decompressed bytes between exported index checkpoints.
    pub index_spacing: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            parallelism: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_checksums: true,
            index_spacing: MAX_WINDOW_SIZE as u32,
        }
    }
}

/// Running per-member checksum state, fed in output order.
struct StreamVerifier {
    enabled: bool,
    /// Sequential coverage got broken (index import); footers can no
    /// longer be checked against locally computed state.
    usable: bool,
    crc: crc32fast::Hasher,
    adler: Adler32,
    member_size: u64,
}

impl StreamVerifier {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            usable: true,
            crc: crc32fast::Hasher::new(),
            adler: Adler32::new(),
            member_size: 0,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        if !self.usable {
            return;
        }
        self.member_size += bytes.len() as u64;
        if self.enabled {
            self.crc.update(bytes);
            self.adler.update(bytes);
        }
    }

    fn check_footer(&mut self, footer: &StreamFooter, format: FileFormat) -> Result<()> {
        if !self.usable {
            return Ok(());
        }
        match format {
            FileFormat::Gzip | FileFormat::Bgzf => {
                if let Some(stored_size) = footer.uncompressed_size {
                    if self.member_size as u32 != stored_size {
                        return Err(GzipError::SizeMismatch {
                            stored: u64::from(stored_size),
                            computed: self.member_size,
                        });
                    }
                }
                if self.enabled {
                    let computed = self.crc.clone().finalize();
                    if computed != footer.checksum {
                        return Err(GzipError::ChecksumMismatch {
                            stored: footer.checksum,
                            computed,
                        });
                    }
                }
            }
            FileFormat::Zlib => {
                if self.enabled {
                    let computed = self.adler.finalize();
                    if computed != footer.checksum {
                        return Err(GzipError::ChecksumMismatch {
                            stored: footer.checksum,
                            computed,
                        });
                    }
                }
            }
            FileFormat::RawDeflate => {}
        }
        self.reset_member();
        Ok(())
    }

    fn reset_member(&mut self) {
        self.crc = crc32fast::Hasher::new();
        self.adler = Adler32::new();
        self.member_size = 0;
    }
}

pub struct ParallelGzipReader {
    source: SharedSource,
    format: FileFormat,
    options: ReaderOptions,
    fetcher: ChunkFetcher,
    block_map: BlockMap,
    window_map: WindowMap,
    /// Chunk starts known to be byte-aligned stream boundaries.
    member_aligned: HashSet<u64>,
    verifier: StreamVerifier,

    // Sequential discovery state.
    next_encoded_offset: u64,
    next_member_aligned: bool,
    last_window: Vec<u8>,
    total_decoded: u64,
    split_threshold: u64,

    position: u64,
}

impl ParallelGzipReader {
    /// Memory-maps a file and opens it with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_options(shared_from_file(path)?, ReaderOptions::default())
    }

    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        Self::with_options(shared_from_vec(data), ReaderOptions::default())
    }

    pub fn new(source: SharedSource) -> Result<Self> {
        Self::with_options(source, ReaderOptions::default())
    }

    pub fn with_options(source: SharedSource, options: ReaderOptions) -> Result<Self> {
        let format = gzip::detect_format(&source)?;
        let chunk_size = options.chunk_size.max(MIN_CHUNK_SIZE);
        let parallelism = if options.parallelism == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            options.parallelism
        };
        let fetcher = ChunkFetcher::new(
            source.clone(),
            format,
            FetcherConfig {
                parallelism,
                chunk_size_bits: chunk_size as u64 * 8,
                max_decompressed_size: 16 * chunk_size as u64,
            },
        )?;
        Ok(Self {
            source,
            format,
            options,
            fetcher,
            block_map: BlockMap::new(),
            window_map: WindowMap::new(),
            member_aligned: HashSet::new(),
            verifier: StreamVerifier::new(options.verify_checksums),
            next_encoded_offset: 0,
            next_member_aligned: true,
            last_window: Vec::new(),
            total_decoded: 0,
            split_threshold: (chunk_size as u64).max(128 * 1024),
            position: 0,
        })
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Current uncompressed byte offset.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Total uncompressed size; unknown until the stream is finalized.
    pub fn size(&self) -> Option<u64> {
        self.block_map.total_decoded_size()
    }

    /// Total uncompressed size, decoding to the end if necessary.
    pub fn decompressed_size(&mut self) -> Result<u64> {
        while !self.block_map.is_finalized() {
            self.grow_map_once()?;
        }
        Ok(self.total_decoded_final())
    }

    pub fn set_crc32_enabled(&mut self, enabled: bool) {
        // Turning verification on when part of the current member has
        // already streamed past would produce bogus mismatches.
        if enabled && !self.verifier.enabled && self.verifier.member_size > 0 {
            self.verifier.usable = false;
        }
        self.verifier.enabled = enabled;
    }

    pub fn statistics(&self) -> FetchStatistics {
        self.fetcher.statistics()
    }

    /// Snapshot of the current block map entries.
    pub fn block_offsets(&self) -> Vec<MapEntry> {
        self.block_map.entries().to_vec()
    }

    /// Absolute seek in the uncompressed stream.
    pub fn seek_to(&mut self, offset: u64) -> Result<u64> {
        if let Some(size) = self.size() {
            if offset > size {
                return Err(GzipError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("seek to {offset} past end of stream ({size} bytes)"),
                )));
            }
        }
        self.position = offset;
        Ok(offset)
    }

    /// Reads up to `max_bytes` starting at the current position into any
    /// writer, returning how many bytes were produced. Zero means end of
    /// stream.
    pub fn read_into<W: Write + ?Sized>(&mut self, out: &mut W, max_bytes: u64) -> Result<u64> {
        let mut written = 0u64;
        while written < max_bytes {
            let range = match self.ensure_mapped(self.position)? {
                Some(range) => range,
                None => break,
            };
            let chunk = self.chunk_for(range)?;
            let chunk_position = (self.position - range.decoded_offset) as usize;
            let take = (range.decoded_end_offset - self.position).min(max_bytes - written) as usize;
            out.write_all(&chunk.resolved[chunk_position..chunk_position + take])?;
            self.position += take as u64;
            written += take as u64;
        }
        Ok(written)
    }

    /// Decompresses everything from the current position.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_into(&mut out, u64::MAX)?;
        Ok(out)
    }

    /// Produces an index snapshot, decoding to the end of the stream
    /// first when necessary.
    pub fn gzip_index(&mut self) -> Result<GzipIndex> {
        while !self.block_map.is_finalized() {
            self.grow_map_once()?;
        }
        let spacing = self.options.index_spacing.max(MAX_WINDOW_SIZE as u32);
        GzipIndex::from_block_map(&self.block_map, &self.window_map, spacing)
    }

    /// Replaces the block and window maps with an imported index, making
    /// random access cheap without a sequential first pass.
    pub fn set_block_offsets(&mut self, index: &GzipIndex) -> Result<()> {
        index.validate()?;
        let Some(first) = index.checkpoints.first() else {
            return Err(GzipError::IndexInconsistent("index has no checkpoints".into()));
        };
        if first.compressed_offset_bits != 0 || first.uncompressed_offset_bytes != 0 {
            return Err(GzipError::IndexInconsistent(
                "index must start at the beginning of the stream".into(),
            ));
        }

        // A checkpoint that carries no window at all (GZI) is only usable
        // where no window can be needed: at a byte-aligned stream
        // boundary, which is verified against the actual file. A declared
        // sparse window is different: the producer proved the window
        // unnecessary, and a wrong claim surfaces as a decode error, not
        // as corruption.
        let mut aligned = HashSet::new();
        for checkpoint in &index.checkpoints {
            let bits = checkpoint.compressed_offset_bits;
            let is_member_boundary = |source: &SharedSource| {
                let mut magic = [0u8; 2];
                source.read_at(bits / 8, &mut magic) == 2 && magic == gzip::GZIP_MAGIC
            };
            match &checkpoint.window {
                Some(window) if !window.is_sparse() => {}
                Some(_) => {
                    // Declared sparse; additionally mark verified member
                    // boundaries so they get the faster aligned plan.
                    if bits % 8 == 0
                        && self.format.is_gzip_framed()
                        && is_member_boundary(&self.source)
                    {
                        aligned.insert(bits);
                    }
                }
                None => {
                    if bits % 8 != 0 {
                        return Err(GzipError::IndexInconsistent(
                            "window-less checkpoint at a sub-byte offset".into(),
                        ));
                    }
                    if self.format.is_gzip_framed() {
                        if !is_member_boundary(&self.source) {
                            return Err(GzipError::IndexInconsistent(format!(
                                "window-less checkpoint at bit {bits} is not at a member boundary"
                            )));
                        }
                        aligned.insert(bits);
                    } else if bits == 0 {
                        aligned.insert(bits);
                    } else {
                        return Err(GzipError::IndexInconsistent(
                            "window-less checkpoint inside a single-stream file".into(),
                        ));
                    }
                }
            }
        }
        // Offset zero is the stream start by definition.
        aligned.insert(0);

        let sizes_known = index.uncompressed_size_bytes > 0 || index.compressed_size_bytes > 0;
        if sizes_known && index.compressed_size_bytes != self.source.size() {
            return Err(GzipError::IndexInconsistent(format!(
                "index was built for a {}-byte file, this one has {} bytes",
                index.compressed_size_bytes,
                self.source.size()
            )));
        }

        self.block_map = BlockMap::new();
        self.window_map.clear();
        self.member_aligned = aligned;
        self.fetcher.clear_caches();
        // Imported territory was not decoded here; footer verification
        // state would be wrong.
        self.verifier.usable = false;

        let usable_checkpoints = if sizes_known {
            index.checkpoints.len()
        } else {
            // Without a total size the last checkpoint seeds continued
            // sequential discovery instead of becoming a mapped chunk.
            index.checkpoints.len() - 1
        };
        for checkpoint in index.checkpoints.iter().take(usable_checkpoints) {
            self.block_map.insert(
                checkpoint.compressed_offset_bits,
                checkpoint.uncompressed_offset_bytes,
            )?;
            let window = checkpoint
                .window
                .clone()
                .unwrap_or_else(|| Arc::new(Window::sparse()));
            self.window_map
                .insert(checkpoint.compressed_offset_bits, window);
        }

        if sizes_known {
            self.block_map
                .finalize(self.source.size() * 8, index.uncompressed_size_bytes)?;
            self.total_decoded = index.uncompressed_size_bytes;
            self.next_encoded_offset = self.source.size() * 8;
        } else {
            let last = index.checkpoints.last().unwrap();
            self.next_encoded_offset = last.compressed_offset_bits;
            self.next_member_aligned = self.member_aligned.contains(&last.compressed_offset_bits);
            self.total_decoded = last.uncompressed_offset_bytes;
            self.last_window = match &last.window {
                Some(window) => window.bytes()?,
                None => Vec::new(),
            };
        }
        Ok(())
    }

    fn total_decoded_final(&self) -> u64 {
        self.block_map
            .total_decoded_size()
            .unwrap_or(self.total_decoded)
    }

    fn ensure_mapped(&mut self, position: u64) -> Result<Option<ChunkRange>> {
        loop {
            if let Some(range) = self.block_map.find_data_offset(position) {
                return Ok(Some(range));
            }
            if self.block_map.is_finalized() {
                return Ok(None);
            }
            // The map itself only knows a chunk's extent once its successor
            // is inserted, but the discovery state already knows where the
            // last discovered chunk ends.
            let entries = self.block_map.entries();
            if let Some(last) = entries.last().copied() {
                if position < self.total_decoded {
                    return Ok(Some(ChunkRange {
                        index: entries.len() - 1,
                        encoded_offset: last.encoded_offset,
                        encoded_end_offset: self.next_encoded_offset,
                        decoded_offset: last.decoded_offset,
                        decoded_end_offset: self.total_decoded,
                    }));
                }
            }
            self.grow_map_once()?;
        }
    }

    fn member_boundary_plan(&self) -> DecodePlan {
        if self.format == FileFormat::Bgzf {
            DecodePlan::MemberAligned
        } else {
            DecodePlan::MemberStart
        }
    }

    fn plan_for(&self, offset: u64) -> DecodePlan {
        if offset % 8 == 0 && self.member_aligned.contains(&offset) {
            return self.member_boundary_plan();
        }
        match self.window_map.get(offset) {
            Some(window) if window.is_sparse() => DecodePlan::Markerless,
            Some(window) => DecodePlan::WithWindow(window),
            None => DecodePlan::Markerless,
        }
    }

    fn successor_targets(&self, index: usize) -> Vec<PrefetchTarget> {
        let mut targets = Vec::new();
        for future_index in (index + 1)..=(index + 2 * self.fetcher.parallelism()) {
            if let Some(range) = self.block_map.chunk_at(future_index) {
                targets.push(PrefetchTarget {
                    index: future_index,
                    offset: range.encoded_offset,
                    plan: self.plan_for(range.encoded_offset),
                    until: Some(range.encoded_end_offset),
                });
            }
        }
        targets
    }

    /// Fetches the chunk for a mapped range, resolving markers with the
    /// stored window when a speculative result is still unresolved.
    fn chunk_for(&mut self, range: ChunkRange) -> Result<Arc<ChunkData>> {
        let request = ChunkRequest {
            offset: range.encoded_offset,
            index: range.index,
            plan: self.plan_for(range.encoded_offset),
            until: Some(range.encoded_end_offset),
            known_successors: self.successor_targets(range.index),
        };
        let chunk = self.fetcher.get(request)?;
        if chunk.markers.is_empty() {
            return Ok(chunk);
        }
        let window = match self.window_map.get(range.encoded_offset) {
            Some(window) => window.bytes()?,
            None => Vec::new(),
        };
        let mut resolved = (*chunk).clone();
        resolved.resolve(&window)?;
        let resolved = Arc::new(resolved);
        self.fetcher
            .insert_resolved(range.encoded_offset, resolved.clone());
        Ok(resolved)
    }

    /// Discovers, verifies, and publishes the next sequential chunk.
    fn grow_map_once(&mut self) -> Result<()> {
        let total_bits = self.source.size() * 8;
        let offset = self.next_encoded_offset;
        if offset >= total_bits {
            self.block_map.finalize(total_bits, self.total_decoded)?;
            return Ok(());
        }

        let index = self.block_map.chunk_count();
        let plan = if self.next_member_aligned {
            self.member_boundary_plan()
        } else if self.last_window.is_empty() {
            DecodePlan::Markerless
        } else {
            DecodePlan::WithWindow(Arc::new(Window::raw(self.last_window.clone())))
        };
        let request = ChunkRequest {
            offset,
            index,
            plan,
            until: None,
            known_successors: Vec::new(),
        };
        let chunk = self.fetcher.get(request)?;
        let mut chunk = (*chunk).clone();
        chunk.resolve(&self.last_window)?;

        let end_offset = chunk.encoded_end_offset;
        let ends_at_final_block = chunk.ends_at_final_block;
        if !ends_at_final_block && end_offset <= offset {
            return Err(GzipError::IndexInconsistent(
                "chunk decoder made no progress".into(),
            ));
        }
        self.verify_chunk(&chunk)?;

        // Window classification at this chunk's start: sparse when the
        // chunk provably never read its predecessor.
        let start_window = if self.next_member_aligned || !chunk.needs_predecessor_window {
            Window::sparse()
        } else {
            Window::raw(self.last_window.clone())
        };
        self.window_map.insert(offset, Arc::new(start_window));
        if self.next_member_aligned {
            self.member_aligned.insert(offset);
        }
        self.next_member_aligned = end_offset % 8 == 0
            && chunk
                .footers
                .last()
                .map(|footer| footer.encoded_end_offset == end_offset)
                .unwrap_or(false);

        let base_decoded = self.total_decoded;
        self.total_decoded += chunk.decoded_size();
        self.next_encoded_offset = end_offset;

        // Publish, splitting oversized chunks at recorded boundaries and
        // storing a window at each interior cut for later random access.
        // A cut that coincides with a member end is a stream boundary, not
        // a block boundary: it needs the member-start plan, not a window.
        let member_ends: Vec<u64> = chunk
            .footers
            .iter()
            .map(|footer| footer.encoded_end_offset)
            .collect();
        let mut rolling_window = std::mem::take(&mut self.last_window);
        let mut decoded_cursor = 0u64;
        for (i, subchunk) in chunk.split(self.split_threshold).into_iter().enumerate() {
            let subchunk = Arc::new(subchunk);
            self.block_map
                .insert(subchunk.encoded_offset, base_decoded + decoded_cursor)?;
            if i > 0 {
                if subchunk.encoded_offset % 8 == 0
                    && member_ends.contains(&subchunk.encoded_offset)
                {
                    self.member_aligned.insert(subchunk.encoded_offset);
                    self.window_map
                        .insert(subchunk.encoded_offset, Arc::new(Window::sparse()));
                } else {
                    self.window_map.insert(
                        subchunk.encoded_offset,
                        Arc::new(Window::raw(rolling_window.clone())),
                    );
                }
            }
            decoded_cursor += subchunk.decoded_size();
            append_window(&mut rolling_window, &subchunk.resolved);
            self.fetcher
                .insert_resolved(subchunk.encoded_offset, subchunk);
        }
        self.last_window = rolling_window;

        if ends_at_final_block {
            debug!(
                "stream finalized: {} compressed bits, {} decompressed bytes",
                total_bits, self.total_decoded
            );
            self.block_map.finalize(total_bits, self.total_decoded)?;
        }
        Ok(())
    }

    fn verify_chunk(&mut self, chunk: &ChunkData) -> Result<()> {
        let bytes = &chunk.resolved;
        let mut cursor = 0usize;
        for footer in &chunk.footers {
            let upto = footer.decoded_offset as usize;
            self.verifier.update(&bytes[cursor..upto]);
            self.verifier.check_footer(footer, self.format)?;
            cursor = upto;
        }
        self.verifier.update(&bytes[cursor..]);
        Ok(())
    }
}

impl Drop for ParallelGzipReader {
    fn drop(&mut self) {
        let statistics = self.fetcher.statistics();
        debug!(
            "reader statistics: {} gets, {} cache hits, {} prefetch hits, {} on-demand, \
             {} prefetches, {} failed prefetches",
            statistics.gets,
            statistics.cache_hits,
            statistics.prefetch_direct_hits,
            statistics.on_demand_fetches,
            statistics.prefetches_submitted,
            statistics.failed_prefetches
        );
    }
}

fn append_window(window: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() >= MAX_WINDOW_SIZE {
        window.clear();
        window.extend_from_slice(&bytes[bytes.len() - MAX_WINDOW_SIZE..]);
    } else {
        window.extend_from_slice(bytes);
        if window.len() > MAX_WINDOW_SIZE {
            window.drain(..window.len() - MAX_WINDOW_SIZE);
        }
    }
}

impl Read for ParallelGzipReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let max = buf.len() as u64;
        let mut cursor = std::io::Cursor::new(buf);
        let written = self.read_into(&mut cursor, max)?;
        Ok(written as usize)
    }
}

impl Seek for ParallelGzipReader {
    fn seek(&mut self, position: SeekFrom) -> std::io::Result<u64> {
        let target = match position {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => self.decompressed_size()? as i128 + delta as i128,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        Ok(self.seek_to(target as u64)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options(parallelism: usize) -> ReaderOptions {
        ReaderOptions {
            parallelism,
            chunk_size: 32 * 1024,
            ..ReaderOptions::default()
        }
    }

    fn compressible_data(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| b"abcdefgh"[(i * i / 1000 + i / 3) % 8])
            .collect()
    }

    fn gzip_bytes(payload: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(9));
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[test_log::test]
    fn sequential_read_matches_input() {
        let data = compressible_data(500_000);
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(gzip_bytes(&data)), options(4))
                .unwrap();
        let out = reader.read_to_vec().unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.size(), Some(data.len() as u64));
        assert_eq!(reader.tell(), data.len() as u64);
    }

    #[test]
    fn read_in_small_steps() {
        let data = compressible_data(200_000);
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(gzip_bytes(&data)), options(2))
                .unwrap();
        let mut out = Vec::new();
        loop {
            let before = out.len();
            let n = reader.read_into(&mut out, 12_345).unwrap();
            assert_eq!(out.len() - before, n as usize);
            if n == 0 {
                break;
            }
        }
        assert_eq!(out, data);
    }

    #[test]
    fn random_access_equals_serial() {
        let data = compressible_data(400_000);
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(gzip_bytes(&data)), options(4))
                .unwrap();
        for &(start, len) in &[
            (0u64, 1000usize),
            (399_000, 1000),
            (123_456, 7),
            (65_536, 65_536),
            (1, 1),
        ] {
            reader.seek_to(start).unwrap();
            let mut out = Vec::new();
            reader.read_into(&mut out, len as u64).unwrap();
            let end = (start as usize + len).min(data.len());
            assert_eq!(out, &data[start as usize..end], "range {start}+{len}");
        }
    }

    #[test]
    fn seek_past_end_is_rejected_once_known() {
        let data = compressible_data(10_000);
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(gzip_bytes(&data)), options(1))
                .unwrap();
        reader.decompressed_size().unwrap();
        assert!(reader.seek_to(10_000).is_ok());
        assert!(reader.seek_to(10_001).is_err());
    }

    #[test]
    fn io_traits_roundtrip() {
        let data = compressible_data(100_000);
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(gzip_bytes(&data)), options(2))
                .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);

        let position = reader.seek(SeekFrom::End(-100)).unwrap();
        assert_eq!(position, data.len() as u64 - 100);
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &data[data.len() - 100..]);
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let data = compressible_data(50_000);
        let mut bytes = gzip_bytes(&data);
        // Corrupt the stored CRC32 (first footer field).
        let crc_offset = bytes.len() - 8;
        bytes[crc_offset] ^= 0xFF;
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(bytes), options(2)).unwrap();
        assert!(matches!(
            reader.read_to_vec(),
            Err(GzipError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn size_mismatch_is_detected() {
        let data = compressible_data(50_000);
        let mut bytes = gzip_bytes(&data);
        let isize_offset = bytes.len() - 4;
        bytes[isize_offset] ^= 0x01;
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(bytes), options(2)).unwrap();
        assert!(matches!(
            reader.read_to_vec(),
            Err(GzipError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn disabled_crc_skips_checksum_but_not_size() {
        let data = compressible_data(50_000);
        let mut bytes = gzip_bytes(&data);
        let crc_offset = bytes.len() - 8;
        bytes[crc_offset] ^= 0xFF;
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(bytes), options(2)).unwrap();
        reader.set_crc32_enabled(false);
        assert_eq!(reader.read_to_vec().unwrap(), data);
    }

    #[test_log::test]
    fn index_export_import_random_access() {
        let data = compressible_data(400_000);
        let compressed = gzip_bytes(&data);
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(compressed.clone()), options(4))
                .unwrap();
        let index = reader.gzip_index().unwrap();
        assert!(index.checkpoints.len() > 1);

        let mut bytes = Vec::new();
        index.write_to(&mut bytes).unwrap();
        let restored = GzipIndex::read_from(&mut bytes.as_slice()).unwrap();

        let mut second =
            ParallelGzipReader::with_options(shared_from_vec(compressed), options(4)).unwrap();
        second.set_block_offsets(&restored).unwrap();
        assert_eq!(second.size(), Some(data.len() as u64));

        for &(start, len) in &[(250_000u64, 2000usize), (10, 100), (399_990, 100)] {
            second.seek_to(start).unwrap();
            let mut out = Vec::new();
            second.read_into(&mut out, len as u64).unwrap();
            let end = (start as usize + len).min(data.len());
            assert_eq!(out, &data[start as usize..end], "range {start}+{len}");
        }
    }

    #[test]
    fn zlib_stream_roundtrip() {
        let data = compressible_data(120_000);
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(6));
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(compressed), options(2)).unwrap();
        assert_eq!(reader.format(), FileFormat::Zlib);
        assert_eq!(reader.read_to_vec().unwrap(), data);
    }

    #[test]
    fn raw_deflate_roundtrip() {
        let data = compressible_data(120_000);
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::new(6));
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();
        let mut reader =
            ParallelGzipReader::with_options(shared_from_vec(compressed), options(2)).unwrap();
        assert_eq!(reader.format(), FileFormat::RawDeflate);
        assert_eq!(reader.read_to_vec().unwrap(), data);
    }
}
