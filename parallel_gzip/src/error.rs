//! Error kinds shared by the whole decompression pipeline.
//!
//! The block finder treats most of these as "not a block boundary, keep
//! scanning" while the main decode path surfaces them to the caller, so the
//! kinds are deliberately fine-grained.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GzipError>;

/// All error conditions that decoding, index handling, or the reader itself
/// can produce.
#[derive(Debug, Error)]
pub enum GzipError {
    /// The input ended before a structure (header, block, footer) was
    /// complete.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The stream does not start with a recognized gzip/zlib signature and
    /// does not parse as raw deflate either.
    #[error("invalid magic bytes: not a gzip, zlib, or deflate stream")]
    InvalidMagic,

    /// A deflate block header used the reserved block type 0b11.
    #[error("invalid deflate block type")]
    InvalidBlockType,

    /// A Huffman code-length sequence describes an overfull or otherwise
    /// non-canonical tree.
    #[error("invalid Huffman code lengths")]
    InvalidCodeLengths,

    /// A Huffman code-length sequence describes an underfull tree, i.e. one
    /// that wastes code space.
    #[error("bloating (non-optimal) Huffman coding")]
    BloatingHuffmanCoding,

    /// A Huffman alphabet contained no symbols at all.
    #[error("empty Huffman alphabet")]
    EmptyAlphabet,

    /// A back-reference pointed before the start of the available window.
    #[error("back-reference before start of window")]
    InvalidBackreference,

    /// The CRC32 in a gzip footer (or the zlib Adler-32) did not match the
    /// decompressed data.
    #[error("stream checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    /// The ISIZE field in a gzip footer did not match the decompressed size.
    #[error("stream size mismatch: stored {stored}, computed {computed}")]
    SizeMismatch { stored: u64, computed: u64 },

    /// A seek index failed validation (non-monotone offsets, missing
    /// windows, wrong sizes, truncated file).
    #[error("inconsistent seek index: {0}")]
    IndexInconsistent(String),

    /// Cooperative cancellation. Never surfaces through the public reader
    /// API; it only travels from a worker back to the owning thread during
    /// shutdown.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GzipError {
    /// Whether the block finder may recover from this error by advancing
    /// one bit and trying again.
    pub fn is_recoverable_during_scan(&self) -> bool {
        matches!(
            self,
            GzipError::InvalidBlockType
                | GzipError::InvalidCodeLengths
                | GzipError::BloatingHuffmanCoding
                | GzipError::EmptyAlphabet
        )
    }
}

impl From<GzipError> for std::io::Error {
    fn from(error: GzipError) -> Self {
        match error {
            GzipError::Io(inner) => inner,
            GzipError::UnexpectedEof => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, error.to_string())
            }
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_recoverable_kinds() {
        assert!(GzipError::InvalidBlockType.is_recoverable_during_scan());
        assert!(GzipError::InvalidCodeLengths.is_recoverable_during_scan());
        assert!(GzipError::BloatingHuffmanCoding.is_recoverable_during_scan());
        assert!(GzipError::EmptyAlphabet.is_recoverable_during_scan());
        assert!(!GzipError::UnexpectedEof.is_recoverable_during_scan());
        assert!(!GzipError::InvalidBackreference.is_recoverable_during_scan());
    }

    #[test]
    fn converts_to_io_error_kind() {
        let io: std::io::Error = GzipError::UnexpectedEof.into();
        assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof);

        let io: std::io::Error = GzipError::InvalidMagic.into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);
    }
}
