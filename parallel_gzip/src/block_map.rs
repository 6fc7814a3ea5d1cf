//! The block map ties compressed-bit offsets to uncompressed-byte offsets;
//! the window map stores the 32 KiB of history needed to start decoding at
//! each of those offsets.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use crate::deflate::MAX_WINDOW_SIZE;
use crate::error::{GzipError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    /// Chunk start in the compressed stream, in bits.
    pub encoded_offset: u64,
    /// Chunk start in the decompressed output, in bytes.
    pub decoded_offset: u64,
}

/// A chunk's full coordinates, derived from two adjacent map entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub encoded_offset: u64,
    pub encoded_end_offset: u64,
    pub decoded_offset: u64,
    pub decoded_end_offset: u64,
}

impl ChunkRange {
    pub fn decoded_size(&self) -> u64 {
        self.decoded_end_offset - self.decoded_offset
    }
}

/// Append-only map of chunk starts, strictly ordered in the compressed
/// coordinate. Once finalized it carries a sentinel entry at the very end
/// of the file whose decoded offset is the total uncompressed size.
#[derive(Debug, Default)]
pub struct BlockMap {
    entries: Vec<MapEntry>,
    finalized: bool,
}

impl BlockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, encoded_offset: u64, decoded_offset: u64) -> Result<()> {
        if self.finalized {
            return Err(GzipError::IndexInconsistent(
                "insertion into a finalized block map".into(),
            ));
        }
        if let Some(last) = self.entries.last() {
            // Strictly increasing in the compressed coordinate; the
            // decoded coordinate may stall for empty chunks (e.g. the BGZF
            // end-of-file member).
            if encoded_offset <= last.encoded_offset || decoded_offset < last.decoded_offset {
                return Err(GzipError::IndexInconsistent(format!(
                    "non-monotone block map insertion: ({encoded_offset}, {decoded_offset}) \
                     after ({}, {})",
                    last.encoded_offset, last.decoded_offset
                )));
            }
        }
        self.entries.push(MapEntry {
            encoded_offset,
            decoded_offset,
        });
        Ok(())
    }

    /// Appends the end-of-file sentinel and freezes the map.
    pub fn finalize(&mut self, total_encoded_bits: u64, total_decoded_bytes: u64) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if let Some(last) = self.entries.last() {
            if total_encoded_bits < last.encoded_offset
                || total_decoded_bytes < last.decoded_offset
            {
                return Err(GzipError::IndexInconsistent(
                    "file end before the last block map entry".into(),
                ));
            }
        }
        self.entries.push(MapEntry {
            encoded_offset: total_encoded_bits,
            decoded_offset: total_decoded_bytes,
        });
        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Number of chunks (the sentinel is not a chunk).
    pub fn chunk_count(&self) -> usize {
        if self.finalized {
            self.entries.len() - 1
        } else {
            self.entries.len()
        }
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Total uncompressed size; known only once finalized.
    pub fn total_decoded_size(&self) -> Option<u64> {
        if self.finalized {
            self.entries.last().map(|e| e.decoded_offset)
        } else {
            None
        }
    }

    /// The uncompressed offset one past the last fully mapped chunk.
    pub fn mapped_decoded_end(&self) -> u64 {
        self.entries.last().map(|e| e.decoded_offset).unwrap_or(0)
    }

    /// Where the next sequentially discovered chunk starts, in bits.
    pub fn mapped_encoded_end(&self) -> u64 {
        self.entries.last().map(|e| e.encoded_offset).unwrap_or(0)
    }

    /// Finds the chunk containing the given uncompressed byte offset by
    /// upper-bound search. Only offsets whose chunk end is already known
    /// (a successor entry exists) can be returned.
    pub fn find_data_offset(&self, decoded_offset: u64) -> Option<ChunkRange> {
        let upper = self
            .entries
            .partition_point(|e| e.decoded_offset <= decoded_offset);
        if upper == 0 {
            return None;
        }
        let index = upper - 1;
        if index + 1 >= self.entries.len() {
            // Last known entry: its end is unknown (or it is the sentinel).
            return None;
        }
        let start = self.entries[index];
        let end = self.entries[index + 1];
        Some(ChunkRange {
            index,
            encoded_offset: start.encoded_offset,
            encoded_end_offset: end.encoded_offset,
            decoded_offset: start.decoded_offset,
            decoded_end_offset: end.decoded_offset,
        })
    }

    /// Chunk coordinates by chunk index.
    pub fn chunk_at(&self, index: usize) -> Option<ChunkRange> {
        if index + 1 >= self.entries.len() {
            return None;
        }
        let start = self.entries[index];
        let end = self.entries[index + 1];
        Some(ChunkRange {
            index,
            encoded_offset: start.encoded_offset,
            encoded_end_offset: end.encoded_offset,
            decoded_offset: start.decoded_offset,
            decoded_end_offset: end.decoded_offset,
        })
    }
}

/// A 32 KiB (or smaller, near stream start) history window, possibly held
/// deflate-compressed, possibly sparse.
#[derive(Debug, Clone)]
pub struct Window {
    storage: WindowStorage,
}

#[derive(Debug, Clone)]
enum WindowStorage {
    Raw(Vec<u8>),
    Compressed {
        data: Vec<u8>,
        decompressed_size: usize,
    },
    /// The successor provably never reads the window.
    Sparse,
}

impl Window {
    pub fn raw(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() <= MAX_WINDOW_SIZE);
        Self {
            storage: WindowStorage::Raw(bytes),
        }
    }

    pub fn sparse() -> Self {
        Self {
            storage: WindowStorage::Sparse,
        }
    }

    pub fn from_compressed(data: Vec<u8>, decompressed_size: usize) -> Self {
        Self {
            storage: WindowStorage::Compressed {
                data,
                decompressed_size,
            },
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, WindowStorage::Sparse)
    }

    /// The window bytes, decompressing on demand. Sparse windows read as
    /// empty.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match &self.storage {
            WindowStorage::Raw(bytes) => Ok(bytes.clone()),
            WindowStorage::Sparse => Ok(Vec::new()),
            WindowStorage::Compressed {
                data,
                decompressed_size,
            } => {
                let mut out = Vec::with_capacity(*decompressed_size);
                flate2::read::DeflateDecoder::new(data.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|_| {
                        GzipError::IndexInconsistent("corrupt compressed window".into())
                    })?;
                if out.len() != *decompressed_size {
                    return Err(GzipError::IndexInconsistent(
                        "compressed window size mismatch".into(),
                    ));
                }
                Ok(out)
            }
        }
    }

    /// Deflate-compresses the window payload for index serialization.
    /// Returns `(compressed bytes, decompressed size)`.
    pub fn to_compressed(&self) -> Result<(Vec<u8>, usize)> {
        let bytes = self.bytes()?;
        let size = bytes.len();
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::new(6));
        encoder.write_all(&bytes)?;
        Ok((encoder.finish()?, size))
    }
}

/// Concurrent one-shot mapping from compressed-bit offset to window.
/// Inserting twice at the same key keeps the first value.
#[derive(Debug, Default)]
pub struct WindowMap {
    windows: Mutex<BTreeMap<u64, Arc<Window>>>,
}

impl WindowMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, encoded_offset: u64, window: Arc<Window>) {
        let mut windows = self.windows.lock().unwrap();
        windows.entry(encoded_offset).or_insert(window);
    }

    pub fn get(&self, encoded_offset: u64) -> Option<Arc<Window>> {
        self.windows.lock().unwrap().get(&encoded_offset).cloned()
    }

    pub fn contains(&self, encoded_offset: u64) -> bool {
        self.windows.lock().unwrap().contains_key(&encoded_offset)
    }

    pub fn len(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.windows.lock().unwrap().clear();
    }
}
