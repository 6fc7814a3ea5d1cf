//! Canonical Huffman codings over implicit alphabets.
//!
//! Three flavours share the same validation rules but trade construction
//! cost against decode speed:
//!
//! - [`check_code_lengths`] only validates a code-length vector; the block
//!   finder uses it to reject candidates without building any tables.
//! - [`SymbolsPerLength`] is the compact construction: a code-length-sorted
//!   symbol vector plus per-length offsets, decoded one bit at a time.
//! - [`ReversedBitsCached`] additionally builds a full `2^maxCodeLength`
//!   lookup table of bit-reversed codes so a symbol costs one peek, one
//!   table load, and one consume.
//!
//! Validation accepts exactly the canonical trees plus the single-symbol
//! half-full tree (one code of length one), which deflate produces for
//! degenerate alphabets.

use crate::bit_reader::BitReader;
use crate::error::{GzipError, Result};

/// Longest code length deflate can express for the literal/length and
/// distance alphabets.
pub const MAX_CODE_LENGTH: u8 = 15;

struct LengthStatistics {
    frequencies: [u16; MAX_CODE_LENGTH as usize + 1],
    min_code_length: u8,
    max_code_length: u8,
    non_zero_count: usize,
}

fn gather_length_statistics(code_lengths: &[u8], max_code_length: u8) -> Result<LengthStatistics> {
    if code_lengths.is_empty() {
        return Err(GzipError::EmptyAlphabet);
    }
    debug_assert!(max_code_length <= MAX_CODE_LENGTH);

    let mut frequencies = [0u16; MAX_CODE_LENGTH as usize + 1];
    for &length in code_lengths {
        if length > max_code_length {
            return Err(GzipError::InvalidCodeLengths);
        }
        frequencies[length as usize] += 1;
    }

    let non_zero_count = code_lengths.len() - frequencies[0] as usize;
    let min_code_length = frequencies[1..]
        .iter()
        .position(|&f| f > 0)
        .map(|i| i as u8 + 1)
        .unwrap_or(0);
    let max_code_length = (1..=max_code_length)
        .rev()
        .find(|&l| frequencies[l as usize] > 0)
        .unwrap_or(0);

    Ok(LengthStatistics {
        frequencies,
        min_code_length,
        max_code_length,
        non_zero_count,
    })
}

fn check_statistics(stats: &LengthStatistics) -> Result<()> {
    if stats.non_zero_count == 0 {
        // All lengths zero: a valid empty coding (deflate emits this for an
        // unused distance alphabet).
        return Ok(());
    }

    let mut unused: u32 = 1 << stats.min_code_length;
    for length in stats.min_code_length..=stats.max_code_length {
        let frequency = u32::from(stats.frequencies[length as usize]);
        if frequency > unused {
            return Err(GzipError::InvalidCodeLengths);
        }
        unused = (unused - frequency) * 2;
    }

    // After the loop `unused` has been doubled once past the deepest level,
    // so a fully occupied tree ends at zero and the single-symbol tree at
    // 2^(maxCodeLength + 1) / 2.
    let single_symbol_ok = stats.non_zero_count == 1
        && unused == (1u32 << stats.max_code_length);
    let full_tree_ok = stats.non_zero_count > 1 && unused == 0;
    if single_symbol_ok || full_tree_ok {
        Ok(())
    } else {
        Err(GzipError::BloatingHuffmanCoding)
    }
}

/// Check-only flavour: validates that `code_lengths` describes a canonical
/// tree without building any decode structures.
pub fn check_code_lengths(code_lengths: &[u8], max_code_length: u8) -> Result<()> {
    let stats = gather_length_statistics(code_lengths, max_code_length)?;
    check_statistics(&stats)
}

/// Compact canonical coding: symbols sorted by code length plus per-length
/// offsets, decoded by walking one bit at a time from the shortest to the
/// longest code.
#[derive(Clone)]
pub struct SymbolsPerLength {
    min_code_length: u8,
    max_code_length: u8,
    /// Smallest canonical code value on each level, indexed by
    /// `length - min_code_length`.
    minimum_code_values: [u16; MAX_CODE_LENGTH as usize + 1],
    /// Start index into `symbols` for each level, with the total appended.
    offsets: [u16; MAX_CODE_LENGTH as usize + 2],
    symbols: Vec<u16>,
}

impl SymbolsPerLength {
    pub fn from_lengths(code_lengths: &[u8], max_code_length: u8) -> Result<Self> {
        let stats = gather_length_statistics(code_lengths, max_code_length)?;
        check_statistics(&stats)?;

        // Length zero means "symbol unused" and must not shift the first
        // level's starting code.
        let frequency_of = |length: u8| {
            if length == 0 {
                0
            } else {
                stats.frequencies[length as usize]
            }
        };

        let mut minimum_code_values = [0u16; MAX_CODE_LENGTH as usize + 1];
        let mut minimum_code = 0u16;
        if stats.non_zero_count > 0 {
            for length in stats.min_code_length.max(1)..=stats.max_code_length {
                minimum_code = (minimum_code + frequency_of(length - 1)) << 1;
                minimum_code_values[(length - stats.min_code_length) as usize] = minimum_code;
            }
        }

        let mut offsets = [0u16; MAX_CODE_LENGTH as usize + 2];
        let mut sum = 0u16;
        if stats.non_zero_count > 0 {
            for length in stats.min_code_length..=stats.max_code_length {
                offsets[(length - stats.min_code_length) as usize] = sum;
                sum += stats.frequencies[length as usize];
            }
            offsets[(stats.max_code_length - stats.min_code_length) as usize + 1] = sum;
        }

        let mut symbols = vec![0u16; stats.non_zero_count];
        let mut cursors = offsets;
        for (symbol, &length) in code_lengths.iter().enumerate() {
            if length != 0 {
                let level = (length - stats.min_code_length) as usize;
                symbols[cursors[level] as usize] = symbol as u16;
                cursors[level] += 1;
            }
        }

        Ok(Self {
            min_code_length: stats.min_code_length,
            max_code_length: stats.max_code_length,
            minimum_code_values,
            offsets,
            symbols,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn max_code_length(&self) -> u8 {
        self.max_code_length
    }

    /// Decodes one symbol by reading single bits. Deflate packs Huffman
    /// codes most-significant-bit first into its otherwise LSB-first
    /// stream, so each new bit is appended at the low end of `code`.
    pub fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        if self.symbols.is_empty() {
            return Err(GzipError::EmptyAlphabet);
        }
        let mut code = 0u32;
        for _ in 0..self.min_code_length {
            code = (code << 1) | reader.read(1)? as u32;
        }
        for level in 0..=(self.max_code_length - self.min_code_length) as usize {
            let minimum_code = u32::from(self.minimum_code_values[level]);
            if minimum_code <= code {
                let index = self.offsets[level] as usize + (code - minimum_code) as usize;
                if index < self.offsets[level + 1] as usize {
                    return Ok(self.symbols[index]);
                }
            }
            code = (code << 1) | reader.read(1)? as u32;
        }
        Err(GzipError::InvalidCodeLengths)
    }
}

#[derive(Clone, Copy, Default)]
struct CacheEntry {
    length: u8,
    symbol: u16,
}

/// LUT-accelerated flavour: a direct-lookup table over the next
/// `maxCodeLength` bits, indexed by bit-reversed padded codes.
#[derive(Clone)]
pub struct ReversedBitsCached {
    base: SymbolsPerLength,
    cached_bits: u8,
    cache: Vec<CacheEntry>,
}

impl ReversedBitsCached {
    pub fn from_lengths(code_lengths: &[u8], max_code_length: u8) -> Result<Self> {
        let base = SymbolsPerLength::from_lengths(code_lengths, max_code_length)?;
        let cached_bits = base.max_code_length.max(1);
        let mut cache = vec![CacheEntry::default(); 1usize << cached_bits];

        let mut code_values = base.minimum_code_values;
        for (symbol, &length) in code_lengths.iter().enumerate() {
            if length == 0 {
                continue;
            }
            let level = (length - base.min_code_length) as usize;
            let code = code_values[level];
            code_values[level] += 1;

            let reversed = code.reverse_bits() >> (16 - length);
            let entry = CacheEntry {
                length,
                symbol: symbol as u16,
            };
            for filler in 0..(1u32 << (cached_bits - length)) {
                let padded = ((filler << length) | u32::from(reversed)) as usize;
                cache[padded] = entry;
            }
        }

        Ok(Self {
            base,
            cached_bits,
            cache,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Decodes one symbol: peek `cached_bits`, look up, consume the entry's
    /// code length. Falls back to the bit-by-bit walk when the peek was
    /// shortened by end of input or hit an unoccupied slot (possible only
    /// for the half-full single-symbol tree or corrupt input).
    #[inline]
    pub fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        let bits = reader.peek(self.cached_bits);
        let entry = self.cache[bits as usize];
        if entry.length == 0 || reader.peeked_bit_count() < entry.length {
            return self.base.decode(reader);
        }
        reader.seek_after_peek(entry.length);
        Ok(entry.symbol)
    }
}
