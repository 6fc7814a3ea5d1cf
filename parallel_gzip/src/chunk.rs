//! Chunk payloads and marker resolution.
//!
//! A worker that decodes from a speculative block boundary does not know
//! the 32 KiB of history preceding it. Instead of waiting, it emits 16-bit
//! symbols: values up to 255 are plain bytes, values from [`MARKER_BASE`]
//! upward encode "byte at this position of the still-unknown predecessor
//! window". Once the predecessor finishes, [`ChunkData::resolve`] patches
//! the markers in place.
//!
//! As soon as a chunk has produced a full window of output without any
//! marker in it, no future back-reference can reach a marker, and the sink
//! switches to plain byte buffers; the switch is sticky for the rest of the
//! chunk.

use crate::deflate::{DeflateSink, MAX_WINDOW_SIZE};
use crate::error::{GzipError, Result};

/// First 16-bit symbol value that denotes a marker rather than a literal
/// byte. Marker `MARKER_BASE + i` resolves to byte `i` of the 32 KiB
/// predecessor window.
pub const MARKER_BASE: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadState {
    /// Only final bytes.
    Resolved,
    /// Only marker symbols.
    WithMarkers,
    /// A marker-symbol prefix followed by resolved bytes.
    Mixed,
}

/// A deflate block boundary inside a chunk, usable as a split point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBoundary {
    /// Absolute position in the compressed stream, in bits.
    pub encoded_offset: u64,
    /// Position in the chunk's decoded output, in bytes.
    pub decoded_offset: u64,
}

/// End of a gzip/zlib stream observed inside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFooter {
    /// Absolute bit offset just past the stream's footer.
    pub encoded_end_offset: u64,
    /// Chunk-relative byte offset at which the stream's output ends.
    pub decoded_offset: u64,
    /// Stored CRC32 (gzip) or Adler-32 (zlib).
    pub checksum: u32,
    /// Stored ISIZE (gzip only): uncompressed size modulo 2^32.
    pub uncompressed_size: Option<u32>,
}

/// Output of one worker for one contiguous bit range of input.
#[derive(Debug, Default, Clone)]
pub struct ChunkData {
    /// Start of the decoded range, in bits.
    pub encoded_offset: u64,
    /// End of the decoded range, in bits (first bit not consumed).
    pub encoded_end_offset: u64,
    /// Marker-phase symbols; empty once resolved.
    pub markers: Vec<u16>,
    /// Final bytes following the marker prefix.
    pub resolved: Vec<u8>,
    /// Interior block boundaries (the chunk start is not recorded).
    pub block_boundaries: Vec<BlockBoundary>,
    pub footers: Vec<StreamFooter>,
    /// Whether any output of this chunk depends on the predecessor
    /// window. When false, the window was provably unnecessary and the
    /// corresponding index checkpoint may be stored sparse.
    pub needs_predecessor_window: bool,
    /// The chunk ran into the end of the last stream in the file.
    pub ends_at_final_block: bool,
}

impl ChunkData {
    pub fn decoded_size(&self) -> u64 {
        (self.markers.len() + self.resolved.len()) as u64
    }

    pub fn encoded_size(&self) -> u64 {
        self.encoded_end_offset - self.encoded_offset
    }

    pub fn state(&self) -> PayloadState {
        match (self.markers.is_empty(), self.resolved.is_empty()) {
            (true, _) => PayloadState::Resolved,
            (false, true) => PayloadState::WithMarkers,
            (false, false) => PayloadState::Mixed,
        }
    }

    /// Replaces every marker symbol using the predecessor window and
    /// transitions the chunk to the resolved state. Resolving an
    /// already-resolved chunk is a no-op.
    ///
    /// The window is the up-to-32-KiB of output immediately preceding the
    /// chunk, its last byte adjacent to the chunk start. A shorter window
    /// is right-aligned: markers reaching further back than it covers are
    /// invalid back-references.
    pub fn resolve(&mut self, window: &[u8]) -> Result<()> {
        if self.markers.is_empty() {
            return Ok(());
        }
        debug_assert!(window.len() <= MAX_WINDOW_SIZE);
        let missing = MAX_WINDOW_SIZE - window.len();

        let mut bytes = Vec::with_capacity(self.markers.len() + self.resolved.len());
        for &symbol in &self.markers {
            if symbol < MARKER_BASE {
                bytes.push(symbol as u8);
            } else {
                let window_position = (symbol - MARKER_BASE) as usize;
                if window_position < missing {
                    return Err(GzipError::InvalidBackreference);
                }
                bytes.push(window[window_position - missing]);
            }
        }
        bytes.append(&mut self.resolved);
        self.resolved = bytes;
        self.markers = Vec::new();
        Ok(())
    }

    /// Last up-to-32-KiB of this chunk's output, for seeding the successor.
    /// Only valid on resolved chunks that are at least window-sized or
    /// whose shortfall the caller completes from the preceding window.
    pub fn window_tail(&self) -> &[u8] {
        debug_assert!(self.markers.is_empty());
        let start = self.resolved.len().saturating_sub(MAX_WINDOW_SIZE);
        &self.resolved[start..]
    }

    /// Splits the chunk at recorded block boundaries into subchunks of at
    /// most roughly `max_subchunk_size` decoded bytes. Without interior
    /// boundaries the chunk is returned unsplit. The subchunks partition
    /// the parent exactly: payloads concatenate to the parent payload and
    /// the encoded ranges tile the parent range.
    pub fn split(self, max_subchunk_size: u64) -> Vec<ChunkData> {
        if self.decoded_size() <= max_subchunk_size || self.block_boundaries.is_empty() {
            return vec![self];
        }

        // Choose split points greedily: the last boundary before exceeding
        // the target size, always making progress.
        let mut cuts: Vec<BlockBoundary> = Vec::new();
        let mut segment_start = 0u64;
        for &boundary in &self.block_boundaries {
            if boundary.decoded_offset == segment_start {
                continue;
            }
            if boundary.decoded_offset - segment_start >= max_subchunk_size {
                cuts.push(boundary);
                segment_start = boundary.decoded_offset;
            }
        }
        if cuts.is_empty() {
            return vec![self];
        }

        let marker_count = self.markers.len() as u64;
        let total = self.decoded_size();
        let mut subchunks = Vec::with_capacity(cuts.len() + 1);
        let mut decoded_start = 0u64;
        let mut encoded_start = self.encoded_offset;
        let mut boundary_cursor = 0usize;
        let mut footer_cursor = 0usize;

        for i in 0..=cuts.len() {
            let (decoded_end, encoded_end) = if i < cuts.len() {
                (cuts[i].decoded_offset, cuts[i].encoded_offset)
            } else {
                (total, self.encoded_end_offset)
            };

            let markers = slice_range_u16(&self.markers, decoded_start, decoded_end);
            let resolved = slice_range_u8(&self.resolved, marker_count, decoded_start, decoded_end);

            let mut boundaries = Vec::new();
            while boundary_cursor < self.block_boundaries.len()
                && self.block_boundaries[boundary_cursor].decoded_offset < decoded_end
            {
                let boundary = self.block_boundaries[boundary_cursor];
                if boundary.decoded_offset > decoded_start {
                    boundaries.push(BlockBoundary {
                        encoded_offset: boundary.encoded_offset,
                        decoded_offset: boundary.decoded_offset - decoded_start,
                    });
                }
                boundary_cursor += 1;
            }

            // A footer exactly on a cut belongs to the earlier subchunk,
            // whose output it terminates.
            let mut footers = Vec::new();
            while footer_cursor < self.footers.len() {
                let footer = self.footers[footer_cursor];
                let belongs_here = footer.decoded_offset <= decoded_end
                    && (footer.decoded_offset > decoded_start || i == 0);
                if !belongs_here {
                    break;
                }
                footers.push(StreamFooter {
                    decoded_offset: footer.decoded_offset - decoded_start,
                    ..footer
                });
                footer_cursor += 1;
            }

            subchunks.push(ChunkData {
                encoded_offset: encoded_start,
                encoded_end_offset: encoded_end,
                markers,
                resolved,
                block_boundaries: boundaries,
                footers,
                needs_predecessor_window: if i == 0 {
                    self.needs_predecessor_window
                } else {
                    // Later subchunks still inside the marker prefix depend
                    // on the same unknown window.
                    decoded_start < marker_count
                },
                ends_at_final_block: i == cuts.len() && self.ends_at_final_block,
            });
            decoded_start = decoded_end;
            encoded_start = encoded_end;
        }
        subchunks
    }
}

fn slice_range_u16(markers: &[u16], start: u64, end: u64) -> Vec<u16> {
    let len = markers.len() as u64;
    let lo = start.min(len) as usize;
    let hi = end.min(len) as usize;
    markers[lo..hi].to_vec()
}

fn slice_range_u8(resolved: &[u8], marker_count: u64, start: u64, end: u64) -> Vec<u8> {
    let lo = start.saturating_sub(marker_count) as usize;
    let hi = end.saturating_sub(marker_count) as usize;
    resolved[lo.min(resolved.len())..hi.min(resolved.len())].to_vec()
}

/// Sink used by workers decoding without their history window.
///
/// During the marker phase the sliding window is 16 bits wide so it can
/// hold either bytes or markers; after a window-sized marker-free run the
/// sink switches to byte output for the rest of the chunk.
pub struct MarkerSink {
    markers: Vec<u16>,
    resolved: Vec<u8>,
    /// Position just past the most recently emitted marker (0 if none).
    last_marker_end: u64,
    /// Output position of the most recent stream start inside the chunk,
    /// if any; back-references may not reach across it.
    stream_start: Option<u64>,
    transitioned: bool,
}

impl MarkerSink {
    pub fn new() -> Self {
        Self {
            markers: Vec::new(),
            resolved: Vec::new(),
            last_marker_end: 0,
            stream_start: None,
            transitioned: false,
        }
    }

    pub fn mark_stream_start(&mut self) {
        self.stream_start = Some(self.position());
    }

    pub fn marker_count_nonzero(&self) -> bool {
        self.last_marker_end > 0
    }

    /// Called between blocks: once a full window of output exists without a
    /// surviving marker, future output can be stored as plain bytes.
    pub fn maybe_transition(&mut self) {
        if !self.transitioned
            && self.position() - self.last_marker_end >= MAX_WINDOW_SIZE as u64
        {
            self.transitioned = true;
        }
    }

    fn symbol_at(&self, index: u64) -> u16 {
        let marker_count = self.markers.len() as u64;
        if index < marker_count {
            self.markers[index as usize]
        } else {
            u16::from(self.resolved[(index - marker_count) as usize])
        }
    }

    fn push_symbol(&mut self, symbol: u16) {
        if self.transitioned {
            debug_assert!(symbol < MARKER_BASE);
            self.resolved.push(symbol as u8);
        } else {
            self.markers.push(symbol);
            if symbol >= MARKER_BASE {
                self.last_marker_end = self.position();
            }
        }
    }

    pub fn into_payload(self) -> (Vec<u16>, Vec<u8>) {
        (self.markers, self.resolved)
    }
}

impl Default for MarkerSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DeflateSink for MarkerSink {
    fn position(&self) -> u64 {
        (self.markers.len() + self.resolved.len()) as u64
    }

    fn push_literal(&mut self, byte: u8) {
        if self.transitioned {
            self.resolved.push(byte);
        } else {
            self.markers.push(u16::from(byte));
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        if self.transitioned {
            self.resolved.extend_from_slice(bytes);
        } else {
            self.markers.extend(bytes.iter().map(|&b| u16::from(b)));
        }
    }

    fn copy_match(&mut self, distance: u16, length: u16) -> Result<()> {
        let distance = u64::from(distance);
        if let Some(stream_start) = self.stream_start {
            // Streams are self-contained: a reference reaching before the
            // current stream's first byte is corrupt.
            if self.position() < stream_start + distance {
                return Err(GzipError::InvalidBackreference);
            }
        }
        for _ in 0..length {
            let position = self.position();
            let symbol = if distance <= position {
                self.symbol_at(position - distance)
            } else {
                let window_position = MAX_WINDOW_SIZE as u64 - (distance - position);
                MARKER_BASE + window_position as u16
            };
            self.push_symbol(symbol);
        }
        Ok(())
    }
}
