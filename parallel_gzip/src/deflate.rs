//! Deflate block parsing and decoding (RFC 1951).
//!
//! The decode loop is generic over a [`DeflateSink`] so the same code path
//! serves two consumers: the window-seeded byte sink below, used whenever
//! the 32 KiB history is known, and the marker-emitting sink in
//! [`crate::chunk`], used by workers that start at a speculative block
//! boundary without their history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::bit_reader::BitReader;
use crate::error::{GzipError, Result};
use crate::huffman::ReversedBitsCached;

pub const MAX_WINDOW_SIZE: usize = 32 * 1024;

pub const MAX_PRECODE_COUNT: usize = 19;
pub const PRECODE_COUNT_BITS: u8 = 4;
pub const PRECODE_BITS: u8 = 3;
pub const MAX_PRECODE_LENGTH: u8 = 7;

pub const MAX_LITERAL_OR_LENGTH_SYMBOLS: usize = 286;
pub const MAX_DISTANCE_SYMBOLS: usize = 30;
pub const END_OF_BLOCK_SYMBOL: u16 = 256;

pub const MIN_MATCH_LENGTH: u16 = 3;
pub const MAX_MATCH_LENGTH: u16 = 258;

/// Order in which the precode code lengths are stored in a dynamic header.
pub const PRECODE_ALPHABET_ORDER: [usize; MAX_PRECODE_COUNT] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

const LENGTH_BASES: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];
const LENGTH_EXTRA_BITS: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

const DISTANCE_BASES: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DISTANCE_EXTRA_BITS: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12,
    13, 13,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Stored,
    FixedHuffman,
    DynamicHuffman,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub block_type: BlockType,
    pub is_final: bool,
}

/// Reads the three-bit block header `(BFINAL, BTYPE)`.
pub fn read_block_header(reader: &mut BitReader) -> Result<BlockHeader> {
    let is_final = reader.read(1)? != 0;
    let block_type = match reader.read(2)? {
        0b00 => BlockType::Stored,
        0b01 => BlockType::FixedHuffman,
        0b10 => BlockType::DynamicHuffman,
        _ => return Err(GzipError::InvalidBlockType),
    };
    Ok(BlockHeader {
        block_type,
        is_final,
    })
}

/// The two Huffman codings of one compressed block. `distance` is `None`
/// for literal-only blocks, which deflate encodes as a single zero-length
/// distance code.
pub struct BlockTrees {
    pub literal: ReversedBitsCached,
    pub distance: Option<ReversedBitsCached>,
}

/// Literal/length and distance codings of the fixed-Huffman block type.
pub fn fixed_trees() -> &'static BlockTrees {
    static TREES: OnceLock<BlockTrees> = OnceLock::new();
    TREES.get_or_init(|| {
        let mut literal_lengths = [0u8; 288];
        literal_lengths[0..144].fill(8);
        literal_lengths[144..256].fill(9);
        literal_lengths[256..280].fill(7);
        literal_lengths[280..288].fill(8);
        // The fixed distance coding spans 32 symbols of five bits; 30 and
        // 31 complete the tree but must never occur in a valid stream.
        let distance_lengths = [5u8; 32];
        BlockTrees {
            literal: ReversedBitsCached::from_lengths(&literal_lengths, 15)
                .expect("fixed literal coding is canonical"),
            distance: Some(
                ReversedBitsCached::from_lengths(&distance_lengths, 15)
                    .expect("fixed distance coding is canonical"),
            ),
        }
    })
}

/// Parses the bit-packed dynamic-Huffman header: the three count fields,
/// the precode, and the run-length-encoded literal and distance code
/// lengths.
pub fn read_dynamic_trees(reader: &mut BitReader) -> Result<BlockTrees> {
    let literal_count = 257 + reader.read(5)? as usize;
    let distance_count = 1 + reader.read(5)? as usize;
    if literal_count > MAX_LITERAL_OR_LENGTH_SYMBOLS || distance_count > MAX_DISTANCE_SYMBOLS {
        return Err(GzipError::InvalidCodeLengths);
    }
    let precode_count = 4 + reader.read(PRECODE_COUNT_BITS)? as usize;

    let mut precode_lengths = [0u8; MAX_PRECODE_COUNT];
    for &position in PRECODE_ALPHABET_ORDER.iter().take(precode_count) {
        precode_lengths[position] = reader.read(PRECODE_BITS)? as u8;
    }
    let precode = ReversedBitsCached::from_lengths(&precode_lengths, MAX_PRECODE_LENGTH)?;

    let total = literal_count + distance_count;
    let mut lengths = [0u8; MAX_LITERAL_OR_LENGTH_SYMBOLS + MAX_DISTANCE_SYMBOLS];
    let mut filled = 0usize;
    while filled < total {
        let symbol = precode.decode(reader)?;
        let (value, repeat) = match symbol {
            0..=15 => (symbol as u8, 1),
            16 => {
                if filled == 0 {
                    return Err(GzipError::InvalidCodeLengths);
                }
                (lengths[filled - 1], 3 + reader.read(2)? as usize)
            }
            17 => (0, 3 + reader.read(3)? as usize),
            18 => (0, 11 + reader.read(7)? as usize),
            _ => return Err(GzipError::InvalidCodeLengths),
        };
        if filled + repeat > total {
            return Err(GzipError::InvalidCodeLengths);
        }
        lengths[filled..filled + repeat].fill(value);
        filled += repeat;
    }

    // A block without a codeable end-of-block symbol could never terminate.
    if lengths[END_OF_BLOCK_SYMBOL as usize] == 0 {
        return Err(GzipError::InvalidCodeLengths);
    }

    let literal = ReversedBitsCached::from_lengths(&lengths[..literal_count], 15)?;
    let distance_lengths = &lengths[literal_count..total];
    let distance = if distance_lengths.iter().all(|&length| length == 0) {
        None
    } else {
        Some(ReversedBitsCached::from_lengths(distance_lengths, 15)?)
    };

    Ok(BlockTrees { literal, distance })
}

/// Receiver of decompressed output.
///
/// `position` counts everything pushed into this sink so far; one literal,
/// one stored byte, and one copied match byte each advance it by one.
pub trait DeflateSink {
    fn position(&self) -> u64;
    fn push_literal(&mut self, byte: u8);
    fn push_bytes(&mut self, bytes: &[u8]);
    fn copy_match(&mut self, distance: u16, length: u16) -> Result<()>;
}

/// How often the decode loop polls the cancellation flag, in symbols.
const CANCELLATION_POLL_INTERVAL: u32 = 1 << 16;

/// Decodes the body of one Huffman-coded block (fixed or dynamic) up to and
/// including its end-of-block symbol.
pub fn decode_huffman_block<S: DeflateSink>(
    reader: &mut BitReader,
    trees: &BlockTrees,
    sink: &mut S,
    cancel: Option<&AtomicBool>,
) -> Result<()> {
    let mut poll_countdown = CANCELLATION_POLL_INTERVAL;
    loop {
        let symbol = trees.literal.decode(reader)?;
        if symbol < END_OF_BLOCK_SYMBOL {
            sink.push_literal(symbol as u8);
        } else if symbol == END_OF_BLOCK_SYMBOL {
            return Ok(());
        } else {
            let length_index = (symbol - 257) as usize;
            if length_index >= LENGTH_BASES.len() {
                return Err(GzipError::InvalidCodeLengths);
            }
            let length = LENGTH_BASES[length_index]
                + reader.read(LENGTH_EXTRA_BITS[length_index])? as u16;

            let distance_tree = trees
                .distance
                .as_ref()
                .ok_or(GzipError::EmptyAlphabet)?;
            let distance_symbol = distance_tree.decode(reader)? as usize;
            if distance_symbol >= DISTANCE_BASES.len() {
                return Err(GzipError::InvalidBackreference);
            }
            let distance = DISTANCE_BASES[distance_symbol]
                + reader.read(DISTANCE_EXTRA_BITS[distance_symbol])? as u16;

            sink.copy_match(distance, length)?;
        }

        poll_countdown -= 1;
        if poll_countdown == 0 {
            poll_countdown = CANCELLATION_POLL_INTERVAL;
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(GzipError::Cancelled);
            }
        }
    }
}

/// Reads one uncompressed block: byte alignment, `LEN`/`NLEN`, then `LEN`
/// raw bytes. Returns the payload length.
pub fn read_stored_block<S: DeflateSink>(reader: &mut BitReader, sink: &mut S) -> Result<u16> {
    reader.align_to_byte()?;
    let len = reader.read(16)? as u16;
    let nlen = reader.read(16)? as u16;
    if len != !nlen {
        return Err(GzipError::InvalidBlockType);
    }

    let mut remaining = len as usize;
    let mut scratch = [0u8; 512];
    while remaining > 0 {
        let step = remaining.min(scratch.len());
        reader.read_bytes(&mut scratch[..step])?;
        sink.push_bytes(&scratch[..step]);
        remaining -= step;
    }
    Ok(len)
}

/// Byte sink used when the history window preceding the chunk is known: a
/// growable output buffer seeded with up to 32 KiB of predecessor bytes.
pub struct ByteSink {
    out: Vec<u8>,
    seed: Vec<u8>,
    /// Output position of the most recent stream start inside this chunk.
    /// Back-references may not reach across it (nor into the seed once it
    /// is non-zero) because deflate streams are self-contained.
    stream_start: u64,
    seed_referenced: bool,
}

impl ByteSink {
    pub fn new(seed: Vec<u8>) -> Self {
        debug_assert!(seed.len() <= MAX_WINDOW_SIZE);
        Self {
            out: Vec::new(),
            seed,
            stream_start: 0,
            seed_referenced: false,
        }
    }

    /// Marks the current position as the beginning of a fresh deflate
    /// stream (a new gzip member).
    pub fn mark_stream_start(&mut self) {
        self.stream_start = self.position();
    }

    /// Whether any back-reference so far reached into the seed window.
    pub fn seed_referenced(&self) -> bool {
        self.seed_referenced
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn bytes(&self) -> &[u8] {
        &self.out
    }
}

impl DeflateSink for ByteSink {
    fn position(&self) -> u64 {
        self.out.len() as u64
    }

    fn push_literal(&mut self, byte: u8) {
        self.out.push(byte);
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn copy_match(&mut self, distance: u16, length: u16) -> Result<()> {
        let position = self.out.len() as i64;
        let distance = i64::from(distance);
        let source_start = position - distance;

        let reach_limit = if self.stream_start > 0 {
            self.stream_start as i64
        } else {
            -(self.seed.len() as i64)
        };
        if source_start < reach_limit {
            return Err(GzipError::InvalidBackreference);
        }
        if source_start < 0 {
            self.seed_referenced = true;
        }

        // Byte-by-byte to honor overlap semantics: distance one repeats the
        // previous byte.
        for i in 0..i64::from(length) {
            let source = source_start + i;
            let byte = if source < 0 {
                self.seed[(self.seed.len() as i64 + source) as usize]
            } else {
                self.out[source as usize]
            };
            self.out.push(byte);
        }
        Ok(())
    }
}
