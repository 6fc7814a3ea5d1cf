//! Speculative search for deflate block boundaries.
//!
//! Workers that start mid-stream have no byte-aligned anchor, so the finder
//! scans bit by bit for the next plausible block start. Only non-final
//! dynamic-Huffman blocks are searched for: final blocks are a serial
//! terminus, fixed-Huffman headers carry almost no redundancy to validate
//! against, and stored blocks are located separately through their
//! `LEN`/`NLEN` complement invariant.
//!
//! The rejection cascade, cheapest first:
//!
//! 1. a 2^15-entry table over the next 15 bits encodes every structural
//!    rejection of the 13-bit header prefix and how many bits may be
//!    skipped outright;
//! 2. the precode leaf-count check ([`crate::precode`]);
//! 3. a full header parse with the deflate core, whose Huffman
//!    constructions are the last line of defence.

use crate::bit_reader::BitReader;
use crate::deflate;
use crate::error::GzipError;
use crate::gzip;
use crate::precode::check_precode;
use crate::source::SharedSource;

/// Bits indexing the skip table.
const CACHED_BITS: u8 = 15;

/// Structural check of a candidate header prefix using only `bit_count`
/// valid low bits: non-final flag, dynamic compression type, literal and
/// distance counts within range. Optimistic when fewer bits than a field
/// needs are available.
const fn is_deflate_candidate(bits: u32, bit_count: u32) -> bool {
    if bit_count == 0 {
        return false;
    }
    if bits & 1 != 0 {
        // BFINAL
        return false;
    }
    if bit_count <= 1 {
        return true;
    }
    let compression_type = (bits >> 1) & 0b11;
    if compression_type & 1 != 0 {
        return false;
    }
    if bit_count <= 2 {
        return true;
    }
    if compression_type != 0b10 {
        return false;
    }
    if bit_count < 8 {
        return true;
    }
    let literal_count = (bits >> 3) & 0b1_1111;
    if literal_count > 29 {
        return false;
    }
    if bit_count < 13 {
        return true;
    }
    let distance_count = (bits >> 8) & 0b1_1111;
    distance_count <= 29
}

/// `SKIP_LUT[bits]` is 0 when the current position is a candidate, else the
/// number of bit positions guaranteed not to start a valid header.
const SKIP_LUT: [u8; 1 << CACHED_BITS] = {
    let mut table = [0u8; 1 << CACHED_BITS];
    let mut i = 0;
    while i < table.len() {
        let mut skip = 0u8;
        let mut bits = i as u32;
        let mut remaining = CACHED_BITS as u32;
        while remaining > 0 && !is_deflate_candidate(bits, remaining) {
            skip += 1;
            bits >>= 1;
            remaining -= 1;
        }
        table[i] = if remaining == 0 { CACHED_BITS } else { skip };
        i += 1;
    }
    table
};

/// Bits of the header prefix preceding the precode count field.
const HEADER_PREFIX_BITS: u64 = 13;

/// Scans forward from the reader's position for the next non-final
/// dynamic-Huffman block start strictly before `until_offset`, returning
/// its bit offset.
pub fn find_next_dynamic_block(reader: &mut BitReader, until_offset: u64) -> Option<u64> {
    let mut offset = reader.tell();
    let until = until_offset.min(reader.size_in_bits());

    while offset < until {
        reader.seek(offset);
        let bits = reader.peek(CACHED_BITS) as usize;
        let skip = SKIP_LUT[bits];
        if skip > 0 {
            offset += u64::from(skip);
            continue;
        }

        reader.seek(offset + HEADER_PREFIX_BITS);
        let count_bits = match reader.read(4) {
            Ok(value) => value,
            Err(_) => return None,
        };
        let precode_bits = reader.peek(57);
        if check_precode(count_bits, precode_bits).is_err() {
            offset += 1;
            continue;
        }

        // Candidate survived the cascade; the full parse decides.
        reader.seek(offset + 3);
        match deflate::read_dynamic_trees(reader) {
            Ok(_) => return Some(offset),
            Err(GzipError::UnexpectedEof) => return None,
            Err(_) => {
                offset += 1;
                continue;
            }
        }
    }
    None
}

/// Scans byte positions for a plausible uncompressed (stored) block:
/// a zero padding byte followed by `LEN`/`NLEN` with `LEN == !NLEN`.
/// Returns the bit offset of the byte holding the block header.
pub fn find_next_stored_block(reader: &mut BitReader, until_offset: u64) -> Option<(u64, u16)> {
    let mut byte = reader.tell() / 8 + 1;
    let until_byte = (until_offset.min(reader.size_in_bits())) / 8;

    while byte < until_byte {
        reader.seek((byte - 1) * 8);
        let word = reader.peek(40);
        let padding = word as u8;
        let len = (word >> 8) as u16;
        let nlen = (word >> 24) as u16;
        // A non-final stored header is three zero bits; encoders zero the
        // padding, so the whole preceding byte reads zero.
        if padding == 0 && len == !nlen && reader.peeked_bit_count() >= 40 {
            return Some(((byte - 1) * 8, len));
        }
        byte += 1;
    }
    None
}

/// Byte-pattern prescan for the next gzip member header at or after
/// `start_byte`. Used for pigz-style files consisting of many small
/// members, where member boundaries are better anchors than speculative
/// bit-level matches.
pub fn find_next_gzip_member(
    source: &SharedSource,
    start_byte: u64,
    until_byte: u64,
) -> Option<u64> {
    let slice = source.as_slice()?;
    let end = (until_byte as usize).min(slice.len());
    let start = start_byte as usize;
    if start >= end {
        return None;
    }

    let needle = [gzip::GZIP_MAGIC[0], gzip::GZIP_MAGIC[1], 0x08];
    for position in memchr::memmem::find_iter(&slice[start..end], &needle) {
        let absolute = (start + position) as u64;
        let mut reader = BitReader::new(source.clone());
        reader.seek(absolute * 8);
        if gzip::read_gzip_header(&mut reader).is_ok() {
            return Some(absolute);
        }
    }
    None
}

/// BGZF specialization: members announce their own size in the fixed
/// `BC` extra subfield, so finding a block means finding the next verified
/// member header.
pub fn find_next_bgzf_member(
    source: &SharedSource,
    start_byte: u64,
    until_byte: u64,
) -> Option<(u64, u32)> {
    let slice = source.as_slice()?;
    let end = (until_byte as usize).min(slice.len());
    let start = start_byte as usize;
    if start >= end {
        return None;
    }

    // BGZF headers always carry FEXTRA, so the fourth byte is 0x04.
    let needle = [gzip::GZIP_MAGIC[0], gzip::GZIP_MAGIC[1], 0x08, 0x04];
    for position in memchr::memmem::find_iter(&slice[start..end], &needle) {
        let absolute = (start + position) as u64;
        let mut reader = BitReader::new(source.clone());
        reader.seek(absolute * 8);
        match gzip::read_gzip_header(&mut reader) {
            Ok(header) => {
                if let Some(size) = header.bgzf_block_size {
                    if absolute + u64::from(size) <= source.size() {
                        return Some((absolute, size));
                    }
                }
            }
            Err(_) => continue,
        }
    }
    None
}
