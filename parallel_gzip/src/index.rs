//! Seek-index import and export.
//!
//! Two interchangeable on-disk forms are supported, both read and written
//! whole:
//!
//! - the checkpoint format: sizes, spacing, and explicit
//!   `(compressed-bit offset, uncompressed-byte offset, window)` triples,
//!   windows stored deflate-compressed or sparse;
//! - BGZF GZI: a bare `u64` count followed by
//!   `(compressed-byte, uncompressed-byte)` pairs. Windows are implicitly
//!   empty since BGZF members are self-contained. As bgzip does, the
//!   implicit first block at offset zero is not written; it is restored on
//!   import.
//!
//! Format detection is by magic prefix.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::block_map::{BlockMap, Window, WindowMap};
use crate::deflate::MAX_WINDOW_SIZE;
use crate::error::{GzipError, Result};

pub const INDEX_MAGIC: &[u8; 6] = b"GZIDX\x01";

const WINDOW_FLAG_SPARSE: u8 = 0;
const WINDOW_FLAG_RAW: u8 = 1;
const WINDOW_FLAG_COMPRESSED: u8 = 2;

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub compressed_offset_bits: u64,
    pub uncompressed_offset_bytes: u64,
    /// `Some(sparse)` declares that the chunk at this offset provably does
    /// not read its predecessor window. `None` means the index simply
    /// carries no window (GZI), which is only sound at stream boundaries.
    pub window: Option<Arc<Window>>,
}

#[derive(Debug, Clone, Default)]
pub struct GzipIndex {
    pub compressed_size_bytes: u64,
    /// Zero when unknown (a GZI import does not carry sizes).
    pub uncompressed_size_bytes: u64,
    pub window_size: u32,
    pub checkpoint_spacing: u32,
    pub checkpoints: Vec<Checkpoint>,
}

impl GzipIndex {
    /// Builds an index snapshot from the in-memory block and window maps,
    /// keeping only checkpoints at least `spacing` decompressed bytes
    /// apart.
    pub fn from_block_map(map: &BlockMap, windows: &WindowMap, spacing: u32) -> Result<Self> {
        let total_decoded = map.total_decoded_size().ok_or_else(|| {
            GzipError::IndexInconsistent("cannot export an index before the stream end is known".into())
        })?;
        let entries = map.entries();
        let chunk_count = map.chunk_count();

        let mut checkpoints = Vec::new();
        let mut last_emitted: Option<u64> = None;
        for entry in entries.iter().take(chunk_count) {
            if let Some(last) = last_emitted {
                if entry.decoded_offset - last < u64::from(spacing) {
                    continue;
                }
            }
            let window = match windows.get(entry.encoded_offset) {
                Some(window) => Some(window),
                // Without a recorded window only byte-aligned stream
                // boundaries are usable as checkpoints.
                None if entry.encoded_offset % 8 == 0 => None,
                None => continue,
            };
            checkpoints.push(Checkpoint {
                compressed_offset_bits: entry.encoded_offset,
                uncompressed_offset_bytes: entry.decoded_offset,
                window,
            });
            last_emitted = Some(entry.decoded_offset);
        }

        Ok(Self {
            compressed_size_bytes: entries
                .last()
                .map(|e| e.encoded_offset.div_ceil(8))
                .unwrap_or(0),
            uncompressed_size_bytes: total_decoded,
            window_size: MAX_WINDOW_SIZE as u32,
            checkpoint_spacing: spacing,
            checkpoints,
        })
    }

    /// Structural validation shared by both import paths.
    pub fn validate(&self) -> Result<()> {
        if self.window_size != MAX_WINDOW_SIZE as u32 {
            return Err(GzipError::IndexInconsistent(format!(
                "unsupported window size {}",
                self.window_size
            )));
        }
        let mut previous: Option<&Checkpoint> = None;
        for checkpoint in &self.checkpoints {
            if let Some(prev) = previous {
                if checkpoint.compressed_offset_bits <= prev.compressed_offset_bits
                    || checkpoint.uncompressed_offset_bytes < prev.uncompressed_offset_bytes
                {
                    return Err(GzipError::IndexInconsistent(
                        "checkpoint offsets are not monotone".into(),
                    ));
                }
            }
            if self.compressed_size_bytes > 0
                && checkpoint.compressed_offset_bits > self.compressed_size_bytes * 8
            {
                return Err(GzipError::IndexInconsistent(
                    "checkpoint past the compressed end".into(),
                ));
            }
            if self.uncompressed_size_bytes > 0
                && checkpoint.uncompressed_offset_bytes > self.uncompressed_size_bytes
            {
                return Err(GzipError::IndexInconsistent(
                    "checkpoint past the uncompressed end".into(),
                ));
            }
            previous = Some(checkpoint);
        }
        Ok(())
    }

    /// Serializes in the checkpoint format, windows deflate-compressed.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(INDEX_MAGIC)?;
        writer.write_all(&self.compressed_size_bytes.to_le_bytes())?;
        writer.write_all(&self.uncompressed_size_bytes.to_le_bytes())?;
        writer.write_all(&self.checkpoint_spacing.to_le_bytes())?;
        writer.write_all(&self.window_size.to_le_bytes())?;
        writer.write_all(&(self.checkpoints.len() as u64).to_le_bytes())?;

        for checkpoint in &self.checkpoints {
            writer.write_all(&checkpoint.compressed_offset_bits.to_le_bytes())?;
            writer.write_all(&checkpoint.uncompressed_offset_bytes.to_le_bytes())?;
            match &checkpoint.window {
                Some(window) if !window.is_sparse() => {
                    let (compressed, size) = window.to_compressed()?;
                    writer.write_all(&[WINDOW_FLAG_COMPRESSED])?;
                    writer.write_all(&(size as u32).to_le_bytes())?;
                    writer.write_all(&(compressed.len() as u32).to_le_bytes())?;
                    writer.write_all(&compressed)?;
                }
                _ => writer.write_all(&[WINDOW_FLAG_SPARSE])?,
            }
        }
        Ok(())
    }

    /// Serializes as BGZF GZI. Every checkpoint must sit on a byte
    /// boundary, which holds exactly when the input is BGZF.
    pub fn write_gzi<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut entries = Vec::new();
        for checkpoint in &self.checkpoints {
            if checkpoint.compressed_offset_bits % 8 != 0 {
                return Err(GzipError::IndexInconsistent(
                    "GZI requires byte-aligned checkpoints".into(),
                ));
            }
            if checkpoint.compressed_offset_bits == 0 {
                // The first block is implicit in GZI.
                continue;
            }
            entries.push((
                checkpoint.compressed_offset_bits / 8,
                checkpoint.uncompressed_offset_bytes,
            ));
        }
        writer.write_all(&(entries.len() as u64).to_le_bytes())?;
        for (compressed, uncompressed) in entries {
            writer.write_all(&compressed.to_le_bytes())?;
            writer.write_all(&uncompressed.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads an index in either format, detected by magic prefix.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if data.starts_with(INDEX_MAGIC) {
            Self::parse_checkpoint_format(&data[INDEX_MAGIC.len()..])
        } else {
            Self::parse_gzi(&data)
        }
    }

    fn parse_checkpoint_format(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let compressed_size_bytes = cursor.read_u64()?;
        let uncompressed_size_bytes = cursor.read_u64()?;
        let checkpoint_spacing = cursor.read_u32()?;
        let window_size = cursor.read_u32()?;
        let count = cursor.read_u64()?;
        if count > data.len() as u64 {
            return Err(GzipError::IndexInconsistent(
                "checkpoint count exceeds file size".into(),
            ));
        }

        let mut checkpoints = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let compressed_offset_bits = cursor.read_u64()?;
            let uncompressed_offset_bytes = cursor.read_u64()?;
            let window = match cursor.read_u8()? {
                WINDOW_FLAG_SPARSE => Some(Arc::new(Window::sparse())),
                WINDOW_FLAG_RAW => {
                    let length = cursor.read_u32()? as usize;
                    if length > MAX_WINDOW_SIZE {
                        return Err(GzipError::IndexInconsistent(
                            "window larger than 32 KiB".into(),
                        ));
                    }
                    Some(Arc::new(Window::raw(cursor.read_bytes(length)?.to_vec())))
                }
                WINDOW_FLAG_COMPRESSED => {
                    let decompressed_size = cursor.read_u32()? as usize;
                    let compressed_length = cursor.read_u32()? as usize;
                    if decompressed_size > MAX_WINDOW_SIZE {
                        return Err(GzipError::IndexInconsistent(
                            "window larger than 32 KiB".into(),
                        ));
                    }
                    Some(Arc::new(Window::from_compressed(
                        cursor.read_bytes(compressed_length)?.to_vec(),
                        decompressed_size,
                    )))
                }
                flag => {
                    return Err(GzipError::IndexInconsistent(format!(
                        "unknown window flag {flag}"
                    )))
                }
            };
            checkpoints.push(Checkpoint {
                compressed_offset_bits,
                uncompressed_offset_bytes,
                window,
            });
        }

        let index = Self {
            compressed_size_bytes,
            uncompressed_size_bytes,
            window_size,
            checkpoint_spacing,
            checkpoints,
        };
        index.validate()?;
        Ok(index)
    }

    fn parse_gzi(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let count = cursor.read_u64()?;
        let expected_size = count
            .checked_mul(16)
            .and_then(|entries| entries.checked_add(8));
        if expected_size != Some(data.len() as u64) {
            return Err(GzipError::IndexInconsistent(
                "GZI size does not match its entry count".into(),
            ));
        }

        let mut checkpoints = vec![Checkpoint {
            compressed_offset_bits: 0,
            uncompressed_offset_bytes: 0,
            window: None,
        }];
        for _ in 0..count {
            let compressed = cursor.read_u64()?;
            let uncompressed = cursor.read_u64()?;
            if compressed == 0 && uncompressed == 0 {
                // Some writers include the implicit first entry.
                continue;
            }
            checkpoints.push(Checkpoint {
                compressed_offset_bits: compressed * 8,
                uncompressed_offset_bytes: uncompressed,
                window: None,
            });
        }

        let index = Self {
            compressed_size_bytes: 0,
            uncompressed_size_bytes: 0,
            window_size: MAX_WINDOW_SIZE as u32,
            checkpoint_spacing: 0,
            checkpoints,
        };
        index.validate()?;
        Ok(index)
    }
}

struct ByteCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.position + count > self.data.len() {
            return Err(GzipError::IndexInconsistent("truncated index".into()));
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_index() -> GzipIndex {
        let window_bytes: Vec<u8> = (0..MAX_WINDOW_SIZE).map(|i| (i % 251) as u8).collect();
        GzipIndex {
            compressed_size_bytes: 10_000,
            uncompressed_size_bytes: 50_000,
            window_size: MAX_WINDOW_SIZE as u32,
            checkpoint_spacing: 32 * 1024,
            checkpoints: vec![
                Checkpoint {
                    compressed_offset_bits: 0,
                    uncompressed_offset_bytes: 0,
                    window: None,
                },
                Checkpoint {
                    compressed_offset_bits: 40_003,
                    uncompressed_offset_bytes: 33_000,
                    window: Some(Arc::new(Window::raw(window_bytes))),
                },
            ],
        }
    }

    #[test]
    fn checkpoint_format_round_trips() {
        let index = sample_index();
        let mut bytes = Vec::new();
        index.write_to(&mut bytes).unwrap();
        assert!(bytes.starts_with(INDEX_MAGIC));

        let restored = GzipIndex::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.compressed_size_bytes, index.compressed_size_bytes);
        assert_eq!(
            restored.uncompressed_size_bytes,
            index.uncompressed_size_bytes
        );
        assert_eq!(restored.checkpoints.len(), 2);
        // A window-less checkpoint reads back as declared-sparse.
        assert!(restored.checkpoints[0]
            .window
            .as_ref()
            .is_some_and(|window| window.is_sparse()));
        let restored_window = restored.checkpoints[1].window.as_ref().unwrap();
        let original_window = index.checkpoints[1].window.as_ref().unwrap();
        assert_eq!(
            restored_window.bytes().unwrap(),
            original_window.bytes().unwrap()
        );
    }

    #[test]
    fn gzi_round_trips_with_implicit_first_entry() {
        let index = GzipIndex {
            compressed_size_bytes: 0,
            uncompressed_size_bytes: 0,
            window_size: MAX_WINDOW_SIZE as u32,
            checkpoint_spacing: 0,
            checkpoints: vec![
                Checkpoint {
                    compressed_offset_bits: 0,
                    uncompressed_offset_bytes: 0,
                    window: None,
                },
                Checkpoint {
                    compressed_offset_bits: 28 * 8,
                    uncompressed_offset_bytes: 1000,
                    window: None,
                },
                Checkpoint {
                    compressed_offset_bits: 56 * 8,
                    uncompressed_offset_bytes: 2000,
                    window: None,
                },
            ],
        };
        let mut bytes = Vec::new();
        index.write_gzi(&mut bytes).unwrap();
        // Two explicit entries: the zero entry is implicit.
        assert_eq!(bytes.len(), 8 + 2 * 16);

        let restored = GzipIndex::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.checkpoints.len(), 3);
        assert_eq!(restored.checkpoints[0].compressed_offset_bits, 0);
        assert_eq!(restored.checkpoints[1].compressed_offset_bits, 28 * 8);
        assert_eq!(restored.checkpoints[2].uncompressed_offset_bytes, 2000);
    }

    #[test]
    fn gzi_rejects_unaligned_checkpoints() {
        let index = sample_index();
        let mut bytes = Vec::new();
        assert!(matches!(
            index.write_gzi(&mut bytes),
            Err(GzipError::IndexInconsistent(_))
        ));
    }

    #[test]
    fn malformed_inputs_are_inconsistent() {
        // Truncated checkpoint file.
        let index = sample_index();
        let mut bytes = Vec::new();
        index.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 7);
        assert!(matches!(
            GzipIndex::read_from(&mut bytes.as_slice()),
            Err(GzipError::IndexInconsistent(_))
        ));

        // A GZI whose length does not match its count.
        let mut bytes = 3u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            GzipIndex::read_from(&mut bytes.as_slice()),
            Err(GzipError::IndexInconsistent(_))
        ));
    }

    #[test]
    fn non_monotone_checkpoints_rejected() {
        let mut index = sample_index();
        index.checkpoints[1].compressed_offset_bits = 0;
        assert!(index.validate().is_err());

        let mut bytes = Vec::new();
        // write_to does not validate; the reader must.
        sample_index().write_to(&mut bytes).unwrap();
        let mut swapped = GzipIndex::read_from(&mut bytes.as_slice()).unwrap();
        swapped.checkpoints.swap(0, 1);
        assert!(swapped.validate().is_err());
    }

    #[test]
    fn from_block_map_respects_spacing_and_windows() {
        let mut map = BlockMap::new();
        let windows = WindowMap::new();
        for i in 0..10u64 {
            map.insert(i * 8000 + 160, i * 20_000).unwrap();
            windows.insert(
                i * 8000 + 160,
                Arc::new(Window::raw(vec![i as u8; 100])),
            );
        }
        map.finalize(100_000, 200_000).unwrap();

        let index = GzipIndex::from_block_map(&map, &windows, 50_000).unwrap();
        index.validate().unwrap();
        assert_eq!(index.uncompressed_size_bytes, 200_000);
        // Spacing filter: entries every 20 000 decoded bytes, spacing
        // 50 000 keeps every third one.
        assert!(index.checkpoints.len() >= 3);
        for pair in index.checkpoints.windows(2) {
            assert!(
                pair[1].uncompressed_offset_bytes - pair[0].uncompressed_offset_bytes >= 50_000
            );
        }
    }
}
