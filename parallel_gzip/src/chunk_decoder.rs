//! The three per-chunk decode paths.
//!
//! The fetcher picks the fastest decoder that is legal for a chunk:
//!
//! 1. [`decode_aligned_chunk`]: the chunk starts byte-aligned at a member
//!    (stream) boundary, so no history window is needed and the raw
//!    deflate payloads can be handed to `flate2` wholesale. BGZF and
//!    pigz-style many-member files spend nearly all their time here.
//! 2. [`decode_window_chunk`]: the chunk starts at a known block boundary
//!    mid-stream and the 32 KiB predecessor window is available; the
//!    internal decoder runs with the window as its seed and produces final
//!    bytes directly.
//! 3. [`decode_marker_chunk`] / [`decode_speculative_chunk`]: no window is
//!    known. The decoder emits marker symbols for unresolved references;
//!    the owning thread patches them once the predecessor completes.
//!
//! All paths stop at the first block (or member) boundary at or past
//! `until_offset`, never mid-block, so chunk ends are always usable as the
//! successor's exact start.

use std::sync::atomic::{AtomicBool, Ordering};

use flate2::{FlushDecompress, Status};

use crate::bit_reader::BitReader;
use crate::block_finder;
use crate::chunk::{BlockBoundary, ChunkData, MarkerSink, StreamFooter};
use crate::deflate::{self, BlockType, ByteSink, DeflateSink};
use crate::error::{GzipError, Result};
use crate::gzip::{self, FileFormat};
use crate::source::SharedSource;

#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    /// Bit offset at or past which no further block is begun.
    pub until_offset: u64,
    /// Decoded-size cap, checked between blocks; bounds speculative
    /// decodes whose true extent is unknown.
    pub max_decompressed_size: u64,
}

impl DecodeLimits {
    pub fn unbounded() -> Self {
        Self {
            until_offset: u64::MAX,
            max_decompressed_size: u64::MAX,
        }
    }
}

/// What the shared block loop needs from a sink beyond plain output.
trait ChunkSink: DeflateSink {
    fn mark_stream_start(&mut self);
    /// Housekeeping between blocks (the marker sink re-evaluates its
    /// byte-output transition here).
    fn on_block_end(&mut self) {}
    /// Whether output so far depends on the predecessor window.
    fn depends_on_window(&self) -> bool {
        false
    }
}

impl ChunkSink for ByteSink {
    fn mark_stream_start(&mut self) {
        ByteSink::mark_stream_start(self);
    }

    fn depends_on_window(&self) -> bool {
        self.seed_referenced()
    }
}

impl ChunkSink for MarkerSink {
    fn mark_stream_start(&mut self) {
        MarkerSink::mark_stream_start(self);
    }

    fn on_block_end(&mut self) {
        self.maybe_transition();
    }

    fn depends_on_window(&self) -> bool {
        self.marker_count_nonzero()
    }
}

struct LoopResult {
    end_offset: u64,
    boundaries: Vec<BlockBoundary>,
    footers: Vec<StreamFooter>,
    ends_at_final_block: bool,
    needs_predecessor_window: bool,
}

/// Decodes blocks (and member footers/headers between streams) until the
/// limits are reached or the last stream ends.
fn run_block_loop<S: ChunkSink>(
    reader: &mut BitReader,
    sink: &mut S,
    format: FileFormat,
    limits: DecodeLimits,
    cancel: &AtomicBool,
) -> Result<LoopResult> {
    let start_offset = reader.tell();
    let mut boundaries = Vec::new();
    let mut footers = Vec::new();
    let mut ends_at_final_block = false;

    loop {
        let block_offset = reader.tell();
        if cancel.load(Ordering::Relaxed) {
            return Err(GzipError::Cancelled);
        }
        if block_offset != start_offset {
            if block_offset >= limits.until_offset
                || sink.position() >= limits.max_decompressed_size
            {
                break;
            }
            boundaries.push(BlockBoundary {
                encoded_offset: block_offset,
                decoded_offset: sink.position(),
            });
        }

        let header = deflate::read_block_header(reader)?;
        match header.block_type {
            BlockType::Stored => {
                deflate::read_stored_block(reader, sink)?;
            }
            BlockType::FixedHuffman => {
                deflate::decode_huffman_block(reader, deflate::fixed_trees(), sink, Some(cancel))?;
            }
            BlockType::DynamicHuffman => {
                let trees = deflate::read_dynamic_trees(reader)?;
                deflate::decode_huffman_block(reader, &trees, sink, Some(cancel))?;
            }
        }
        sink.on_block_end();

        if header.is_final {
            let stream_end_position = sink.position();
            match format {
                FileFormat::Gzip | FileFormat::Bgzf => {
                    reader.align_to_byte()?;
                    let footer = gzip::read_gzip_footer(reader)?;
                    footers.push(StreamFooter {
                        encoded_end_offset: reader.tell(),
                        decoded_offset: stream_end_position,
                        checksum: footer.crc32,
                        uncompressed_size: Some(footer.isize),
                    });
                }
                FileFormat::Zlib => {
                    reader.align_to_byte()?;
                    let adler = gzip::read_zlib_footer(reader)?;
                    footers.push(StreamFooter {
                        encoded_end_offset: reader.tell(),
                        decoded_offset: stream_end_position,
                        checksum: adler,
                        uncompressed_size: None,
                    });
                }
                FileFormat::RawDeflate => {
                    let padding = reader.align_to_byte()?;
                    if padding != 0 {
                        return Err(GzipError::InvalidMagic);
                    }
                }
            }

            let gzip_framed = format.is_gzip_framed();
            if gzip_framed && !reader.eof() {
                // Concatenated members: the next one starts right here.
                if reader.tell() >= limits.until_offset
                    || sink.position() >= limits.max_decompressed_size
                {
                    break;
                }
                gzip::read_gzip_header(reader)?;
                sink.mark_stream_start();
            } else {
                ends_at_final_block = true;
                break;
            }
        }
    }

    Ok(LoopResult {
        end_offset: reader.tell(),
        boundaries,
        footers,
        ends_at_final_block,
        needs_predecessor_window: sink.depends_on_window(),
    })
}

/// Internal decode from a byte-aligned member (stream) boundary: parses
/// the member header, then decodes blocks with an empty window. Unlike
/// [`decode_aligned_chunk`] this stops at block granularity, so one large
/// member still splits into parallel chunks.
pub fn decode_member_start_chunk(
    source: &SharedSource,
    format: FileFormat,
    offset: u64,
    limits: DecodeLimits,
    cancel: &AtomicBool,
) -> Result<ChunkData> {
    debug_assert_eq!(offset % 8, 0);
    let mut reader = BitReader::new(source.clone());
    reader.seek(offset);
    match format {
        FileFormat::Gzip | FileFormat::Bgzf => {
            gzip::read_gzip_header(&mut reader)?;
        }
        FileFormat::Zlib => {
            gzip::read_zlib_header(&mut reader)?;
        }
        FileFormat::RawDeflate => {}
    }
    let mut sink = ByteSink::new(Vec::new());
    let result = run_block_loop(&mut reader, &mut sink, format, limits, cancel)?;
    Ok(ChunkData {
        encoded_offset: offset,
        encoded_end_offset: result.end_offset,
        markers: Vec::new(),
        resolved: sink.into_bytes(),
        block_boundaries: result.boundaries,
        footers: result.footers,
        needs_predecessor_window: false,
        ends_at_final_block: result.ends_at_final_block,
    })
}

/// Window-seeded decode from a known block boundary: produces final bytes.
pub fn decode_window_chunk(
    source: &SharedSource,
    format: FileFormat,
    offset: u64,
    window: Vec<u8>,
    limits: DecodeLimits,
    cancel: &AtomicBool,
) -> Result<ChunkData> {
    let mut reader = BitReader::new(source.clone());
    reader.seek(offset);
    let mut sink = ByteSink::new(window);
    let result = run_block_loop(&mut reader, &mut sink, format, limits, cancel)?;
    Ok(ChunkData {
        encoded_offset: offset,
        encoded_end_offset: result.end_offset,
        markers: Vec::new(),
        resolved: sink.into_bytes(),
        block_boundaries: result.boundaries,
        footers: result.footers,
        needs_predecessor_window: result.needs_predecessor_window,
        ends_at_final_block: result.ends_at_final_block,
    })
}

/// Windowless decode from a known block boundary: emits markers for
/// references into the unknown predecessor window.
pub fn decode_marker_chunk(
    source: &SharedSource,
    format: FileFormat,
    offset: u64,
    limits: DecodeLimits,
    cancel: &AtomicBool,
) -> Result<ChunkData> {
    let mut reader = BitReader::new(source.clone());
    reader.seek(offset);
    let mut sink = MarkerSink::new();
    let result = run_block_loop(&mut reader, &mut sink, format, limits, cancel)?;
    let (markers, resolved) = sink.into_payload();
    Ok(ChunkData {
        encoded_offset: offset,
        encoded_end_offset: result.end_offset,
        markers,
        resolved,
        block_boundaries: result.boundaries,
        footers: result.footers,
        needs_predecessor_window: result.needs_predecessor_window,
        ends_at_final_block: result.ends_at_final_block,
    })
}

/// Library-backed decode of whole members starting at a byte-aligned
/// stream boundary. No window is needed; `flate2` inflates each member's
/// raw deflate payload and the framing is parsed around it.
pub fn decode_aligned_chunk(
    source: &SharedSource,
    format: FileFormat,
    offset_bytes: u64,
    limits: DecodeLimits,
    cancel: &AtomicBool,
) -> Result<ChunkData> {
    let start_bytes = offset_bytes;
    let mut out: Vec<u8> = Vec::new();
    let mut boundaries = Vec::new();
    let mut footers = Vec::new();
    let mut position_bytes = offset_bytes;
    let mut ends_at_final_block = false;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(GzipError::Cancelled);
        }
        if position_bytes >= source.size() {
            ends_at_final_block = true;
            break;
        }
        if position_bytes != start_bytes {
            if position_bytes * 8 >= limits.until_offset
                || out.len() as u64 >= limits.max_decompressed_size
            {
                break;
            }
            boundaries.push(BlockBoundary {
                encoded_offset: position_bytes * 8,
                decoded_offset: out.len() as u64,
            });
        }

        let mut reader = BitReader::new(source.clone());
        reader.seek(position_bytes * 8);
        let data_start = match format {
            FileFormat::Gzip | FileFormat::Bgzf => {
                gzip::read_gzip_header(&mut reader)?;
                reader.tell() / 8
            }
            FileFormat::Zlib => {
                gzip::read_zlib_header(&mut reader)?;
                reader.tell() / 8
            }
            FileFormat::RawDeflate => position_bytes,
        };

        let deflate_length = inflate_raw_member(source, data_start, &mut out, cancel)?;
        let footer_start = data_start + deflate_length;

        match format {
            FileFormat::Gzip | FileFormat::Bgzf => {
                let mut footer = [0u8; 8];
                if source.read_at(footer_start, &mut footer) < footer.len() {
                    return Err(GzipError::UnexpectedEof);
                }
                footers.push(StreamFooter {
                    encoded_end_offset: (footer_start + 8) * 8,
                    decoded_offset: out.len() as u64,
                    checksum: u32::from_le_bytes(footer[0..4].try_into().unwrap()),
                    uncompressed_size: Some(u32::from_le_bytes(footer[4..8].try_into().unwrap())),
                });
                position_bytes = footer_start + 8;
            }
            FileFormat::Zlib => {
                let mut footer = [0u8; 4];
                if source.read_at(footer_start, &mut footer) < footer.len() {
                    return Err(GzipError::UnexpectedEof);
                }
                footers.push(StreamFooter {
                    encoded_end_offset: (footer_start + 4) * 8,
                    decoded_offset: out.len() as u64,
                    checksum: u32::from_be_bytes(footer),
                    uncompressed_size: None,
                });
                position_bytes = footer_start + 4;
                ends_at_final_block = true;
                break;
            }
            FileFormat::RawDeflate => {
                position_bytes = footer_start;
                ends_at_final_block = true;
                break;
            }
        }
    }

    Ok(ChunkData {
        encoded_offset: start_bytes * 8,
        encoded_end_offset: position_bytes * 8,
        markers: Vec::new(),
        resolved: out,
        block_boundaries: boundaries,
        footers,
        needs_predecessor_window: false,
        ends_at_final_block,
    })
}

/// Inflates one raw deflate stream starting at byte `data_start`,
/// appending the output to `out`. Returns the stream's exact compressed
/// length in bytes.
fn inflate_raw_member(
    source: &SharedSource,
    data_start: u64,
    out: &mut Vec<u8>,
    cancel: &AtomicBool,
) -> Result<u64> {
    let mut inflater = flate2::Decompress::new(false);
    let mut input = vec![0u8; 128 * 1024];

    'refill: loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(GzipError::Cancelled);
        }
        let absolute = data_start + inflater.total_in();
        let available = source.read_at(absolute, &mut input);
        if available == 0 {
            return Err(GzipError::UnexpectedEof);
        }

        let mut consumed = 0usize;
        loop {
            out.reserve(64 * 1024);
            let before = inflater.total_in();
            let status = inflater
                .decompress_vec(&input[consumed..available], out, FlushDecompress::None)
                .map_err(|_| GzipError::InvalidCodeLengths)?;
            consumed += (inflater.total_in() - before) as usize;
            match status {
                Status::StreamEnd => return Ok(inflater.total_in()),
                Status::Ok | Status::BufError => {
                    if consumed >= available {
                        continue 'refill;
                    }
                }
            }
        }
    }
}

/// Prefetch decode for a partition whose exact chunk start is unknown:
/// anchors at the earliest of the next member boundary and the next
/// speculative dynamic-block boundary, then decodes from there. Returns
/// `None` when the partition contains no usable anchor.
pub fn decode_speculative_chunk(
    source: &SharedSource,
    format: FileFormat,
    guess_offset: u64,
    limits: DecodeLimits,
    cancel: &AtomicBool,
) -> Result<Option<ChunkData>> {
    let until = limits.until_offset.min(source.size() * 8);
    if guess_offset >= until {
        return Ok(None);
    }

    // Member boundaries are better anchors than bit-level matches: they
    // need no window at all.
    let member_anchor = match format {
        FileFormat::Bgzf => {
            block_finder::find_next_bgzf_member(source, guess_offset.div_ceil(8), until / 8)
                .map(|(byte, _)| byte)
        }
        FileFormat::Gzip => {
            block_finder::find_next_gzip_member(source, guess_offset.div_ceil(8), until / 8)
        }
        _ => None,
    };

    let dynamic_anchor = if format == FileFormat::Bgzf {
        // BGZF members are self-contained; bit-level scanning only risks
        // false positives there.
        None
    } else {
        let mut reader = BitReader::new(source.clone());
        reader.seek(guess_offset);
        block_finder::find_next_dynamic_block(&mut reader, until)
    };

    let decode_member = |member: u64| match format {
        // BGZF members are small; whole-member library decode is ideal.
        FileFormat::Bgzf => decode_aligned_chunk(source, format, member, limits, cancel),
        // Elsewhere stay block-granular so huge members still chunk up.
        _ => decode_member_start_chunk(source, format, member * 8, limits, cancel),
    };

    match (member_anchor, dynamic_anchor) {
        (Some(member), Some(dynamic)) if member * 8 <= dynamic => decode_member(member).map(Some),
        (Some(member), None) => decode_member(member).map(Some),
        (_, Some(dynamic)) => {
            decode_marker_chunk(source, format, dynamic, limits, cancel).map(Some)
        }
        (None, None) => Ok(None),
    }
}
