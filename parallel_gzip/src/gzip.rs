//! Framing around the raw deflate stream: gzip (RFC 1952), zlib
//! (RFC 1950), the BGZF gzip profile, and bare deflate.

use crate::bit_reader::BitReader;
use crate::deflate;
use crate::error::{GzipError, Result};
use crate::source::SharedSource;

pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const DEFLATE_COMPRESSION_METHOD: u8 = 8;

const FLAG_HCRC: u8 = 0b0000_0010;
const FLAG_EXTRA: u8 = 0b0000_0100;
const FLAG_NAME: u8 = 0b0000_1000;
const FLAG_COMMENT: u8 = 0b0001_0000;
const FLAG_RESERVED: u8 = 0b1110_0000;

/// The 28-byte empty BGZF member every BGZF file ends with.
pub const BGZF_EOF_BLOCK: [u8; 28] = [
    0x1F, 0x8B, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1B, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Container format of the whole input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Gzip,
    /// gzip whose members carry the BGZF `BC` extra subfield and are
    /// therefore independently decodable.
    Bgzf,
    Zlib,
    RawDeflate,
}

impl FileFormat {
    pub fn is_gzip_framed(self) -> bool {
        matches!(self, FileFormat::Gzip | FileFormat::Bgzf)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipHeader {
    /// Total member size from the BGZF `BC` subfield (`BSIZE + 1`), when
    /// present.
    pub bgzf_block_size: Option<u32>,
}

/// Parses a gzip member header starting at the reader's current (byte
/// aligned) position.
pub fn read_gzip_header(reader: &mut BitReader) -> Result<GzipHeader> {
    let mut fixed = [0u8; 10];
    reader.read_bytes(&mut fixed)?;
    if fixed[0..2] != GZIP_MAGIC || fixed[2] != DEFLATE_COMPRESSION_METHOD {
        return Err(GzipError::InvalidMagic);
    }
    let flags = fixed[3];
    if flags & FLAG_RESERVED != 0 {
        return Err(GzipError::InvalidMagic);
    }
    // fixed[4..8] = MTIME, fixed[8] = XFL, fixed[9] = OS; all ignored.

    let mut header = GzipHeader::default();
    if flags & FLAG_EXTRA != 0 {
        let extra_length = reader.read(16)? as usize;
        let mut remaining = extra_length;
        while remaining >= 4 {
            let si1 = reader.read(8)? as u8;
            let si2 = reader.read(8)? as u8;
            let subfield_length = reader.read(16)? as usize;
            remaining -= 4;
            if subfield_length > remaining {
                return Err(GzipError::InvalidMagic);
            }
            if (si1, si2) == (b'B', b'C') && subfield_length == 2 {
                let bsize = reader.read(16)? as u32;
                header.bgzf_block_size = Some(bsize + 1);
                remaining -= 2;
            } else {
                let mut skip = subfield_length;
                let mut scratch = [0u8; 64];
                while skip > 0 {
                    let step = skip.min(scratch.len());
                    reader.read_bytes(&mut scratch[..step])?;
                    skip -= step;
                }
                remaining -= subfield_length;
            }
        }
        // A trailing partial subfield header is malformed.
        if remaining != 0 {
            return Err(GzipError::InvalidMagic);
        }
    }
    if flags & FLAG_NAME != 0 {
        skip_zero_terminated(reader)?;
    }
    if flags & FLAG_COMMENT != 0 {
        skip_zero_terminated(reader)?;
    }
    if flags & FLAG_HCRC != 0 {
        let _crc16 = reader.read(16)?;
    }
    Ok(header)
}

fn skip_zero_terminated(reader: &mut BitReader) -> Result<()> {
    loop {
        if reader.read(8)? == 0 {
            return Ok(());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipFooter {
    pub crc32: u32,
    /// Uncompressed size modulo 2^32.
    pub isize: u32,
}

pub fn read_gzip_footer(reader: &mut BitReader) -> Result<GzipFooter> {
    let crc32 = reader.read(32)? as u32;
    let isize = reader.read(32)? as u32;
    Ok(GzipFooter { crc32, isize })
}

/// Parses a zlib header. Preset dictionaries are rejected: decoding would
/// require out-of-band data the container does not carry.
pub fn read_zlib_header(reader: &mut BitReader) -> Result<()> {
    let cmf = reader.read(8)? as u8;
    let flg = reader.read(8)? as u8;
    if !is_zlib_header(cmf, flg) {
        return Err(GzipError::InvalidMagic);
    }
    if flg & 0b0010_0000 != 0 {
        // FDICT
        return Err(GzipError::InvalidMagic);
    }
    Ok(())
}

fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0F == DEFLATE_COMPRESSION_METHOD
        && cmf >> 4 <= 7
        && (u32::from(cmf) * 256 + u32::from(flg)) % 31 == 0
}

/// Reads the big-endian Adler-32 zlib trailer.
pub fn read_zlib_footer(reader: &mut BitReader) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_bytes(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

/// Streaming Adler-32 used to verify zlib trailers.
pub struct Adler32 {
    a: u32,
    b: u32,
}

const ADLER_MODULO: u32 = 65521;
/// Largest block for which the sums cannot overflow a u32.
const ADLER_BLOCK: usize = 5552;

impl Adler32 {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for block in data.chunks(ADLER_BLOCK) {
            for &byte in block {
                self.a += u32::from(byte);
                self.b += self.a;
            }
            self.a %= ADLER_MODULO;
            self.b %= ADLER_MODULO;
        }
    }

    pub fn finalize(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Determines the container format by inspecting the start of the source.
///
/// Raw deflate has no signature, so it is accepted only if the first block
/// header parses; everything else is an [`GzipError::InvalidMagic`].
pub fn detect_format(source: &SharedSource) -> Result<FileFormat> {
    let mut prefix = [0u8; 2];
    let got = source.read_at(0, &mut prefix);
    if got == 0 {
        return Err(GzipError::UnexpectedEof);
    }

    if got >= 2 && prefix == GZIP_MAGIC {
        let mut reader = BitReader::new(source.clone());
        let header = read_gzip_header(&mut reader)?;
        return Ok(if header.bgzf_block_size.is_some() {
            FileFormat::Bgzf
        } else {
            FileFormat::Gzip
        });
    }

    if got >= 2 && is_zlib_header(prefix[0], prefix[1]) {
        return Ok(FileFormat::Zlib);
    }

    if probe_raw_deflate(source) {
        return Ok(FileFormat::RawDeflate);
    }
    Err(GzipError::InvalidMagic)
}

/// Cheap validity probe for headerless deflate: the first block header and,
/// for dynamic blocks, its code lengths must parse.
fn probe_raw_deflate(source: &SharedSource) -> bool {
    let mut reader = BitReader::new(source.clone());
    let header = match deflate::read_block_header(&mut reader) {
        Ok(header) => header,
        Err(_) => return false,
    };
    match header.block_type {
        deflate::BlockType::Stored => {
            if reader.align_to_byte().is_err() {
                return false;
            }
            let len = reader.read(16).unwrap_or(0) as u16;
            let nlen = reader.read(16).unwrap_or(1) as u16;
            len == !nlen
        }
        deflate::BlockType::FixedHuffman => true,
        deflate::BlockType::DynamicHuffman => deflate::read_dynamic_trees(&mut reader).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::shared_from_vec;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn reader(bytes: &[u8]) -> BitReader {
        BitReader::new(shared_from_vec(bytes.to_vec()))
    }

    #[test]
    fn parses_minimal_header() {
        let bytes = [0x1F, 0x8B, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0x03, 0xAA];
        let mut r = reader(&bytes);
        let header = read_gzip_header(&mut r).unwrap();
        assert_eq!(header.bgzf_block_size, None);
        assert_eq!(r.tell(), 80);
    }

    #[test]
    fn parses_header_with_name_extra_and_hcrc() {
        let mut encoder = flate2::GzBuilder::new()
            .filename("data.bin")
            .comment("roundtrip")
            .extra(vec![b'X', b'Y', 4, 0, 1, 2, 3, 4])
            .write(Vec::new(), flate2::Compression::fast());
        encoder.write_all(b"payload").unwrap();
        let bytes = encoder.finish().unwrap();

        let mut r = reader(&bytes);
        let header = read_gzip_header(&mut r).unwrap();
        assert_eq!(header.bgzf_block_size, None);
        assert_eq!(r.tell() % 8, 0);
    }

    #[test]
    fn rejects_wrong_magic_and_method() {
        let mut r = reader(&[0x1F, 0x8C, 0x08, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            read_gzip_header(&mut r),
            Err(GzipError::InvalidMagic)
        ));
        let mut r = reader(&[0x1F, 0x8B, 0x07, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            read_gzip_header(&mut r),
            Err(GzipError::InvalidMagic)
        ));
    }

    #[test]
    fn truncated_header_is_eof() {
        let mut r = reader(&[0x1F, 0x8B, 0x08]);
        assert!(matches!(
            read_gzip_header(&mut r),
            Err(GzipError::UnexpectedEof)
        ));
    }

    #[test]
    fn bgzf_eof_block_parses() {
        let mut r = reader(&BGZF_EOF_BLOCK);
        let header = read_gzip_header(&mut r).unwrap();
        assert_eq!(header.bgzf_block_size, Some(28));
    }

    #[test]
    fn footer_fields_are_little_endian() {
        let mut r = reader(&[0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00]);
        let footer = read_gzip_footer(&mut r).unwrap();
        assert_eq!(footer.crc32, 0x12345678);
        assert_eq!(footer.isize, 1);
    }

    #[test]
    fn zlib_header_accepts_and_rejects() {
        // 0x78 0x9C is the most common zlib header.
        let mut r = reader(&[0x78, 0x9C]);
        read_zlib_header(&mut r).unwrap();

        // FDICT set (and checksum-corrected): rejected.
        let cmf = 0x78u32;
        let flg = (0x20..0x40u32)
            .find(|f| (cmf * 256 + f) % 31 == 0 && f & 0x20 != 0)
            .unwrap();
        let mut r = reader(&[cmf as u8, flg as u8]);
        assert!(matches!(
            read_zlib_header(&mut r),
            Err(GzipError::InvalidMagic)
        ));
    }

    #[test]
    fn adler32_known_vector() {
        let mut adler = Adler32::new();
        adler.update(b"Wikipedia");
        assert_eq!(adler.finalize(), 0x11E6_0398);
    }

    #[test]
    fn detects_gzip_zlib_and_raw() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello").unwrap();
        let gzip_bytes = encoder.finish().unwrap();
        let source = shared_from_vec(gzip_bytes);
        assert_eq!(detect_format(&source).unwrap(), FileFormat::Gzip);

        let source = shared_from_vec(BGZF_EOF_BLOCK.to_vec());
        assert_eq!(detect_format(&source).unwrap(), FileFormat::Bgzf);

        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello").unwrap();
        let source = shared_from_vec(encoder.finish().unwrap());
        assert_eq!(detect_format(&source).unwrap(), FileFormat::Zlib);

        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello hello hello").unwrap();
        let source = shared_from_vec(encoder.finish().unwrap());
        assert_eq!(detect_format(&source).unwrap(), FileFormat::RawDeflate);

        let source = shared_from_vec(vec![0xFF, 0xFE, 0xFD, 0xFC]);
        assert!(matches!(
            detect_format(&source),
            Err(GzipError::InvalidMagic)
        ));
    }
}
