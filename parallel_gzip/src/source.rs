//! Shared byte sources for the bit readers and workers.
//!
//! Every worker owns its own [`crate::bit_reader::BitReader`] with an
//! independent position, but all of them read from one shared, immutable
//! byte source. The source is reference-counted so that cloning a reader is
//! cheap and never copies file contents.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

/// A shared, random-access byte source.
///
/// Implementations must be cheap to read from concurrently; positions are
/// kept by the callers, not by the source.
pub trait Source: Send + Sync {
    /// Copies bytes starting at `offset` into `out` and returns how many
    /// were copied. Short reads happen only at end of input.
    fn read_at(&self, offset: u64, out: &mut [u8]) -> usize;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// The whole source as one contiguous slice, when the backing storage
    /// supports it. Byte-pattern prescans use this fast path and fall back
    /// to `read_at` otherwise.
    fn as_slice(&self) -> Option<&[u8]> {
        None
    }
}

/// Source backed by any in-memory byte slice owner: a `Vec<u8>`, a
/// memory-mapped file, a static slice.
///
/// The inner `Arc<dyn AsRef<[u8]>>` keeps mmaps alive for as long as any
/// worker still holds a reader onto them.
pub struct SliceSource {
    data: Arc<dyn AsRef<[u8]> + Send + Sync>,
}

impl SliceSource {
    pub fn new<T>(data: Arc<T>) -> Self
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
    {
        Self { data }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(Arc::new(data))
    }

    /// Memory-maps a file read-only.
    ///
    /// The map stays valid while any clone of the returned source is alive;
    /// the file must not be truncated concurrently.
    pub fn map_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
        Ok(Self::new(Arc::new(mmap)))
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_ref().as_ref()
    }
}

impl Source for SliceSource {
    fn read_at(&self, offset: u64, out: &mut [u8]) -> usize {
        let bytes = self.bytes();
        if offset >= bytes.len() as u64 {
            return 0;
        }
        let start = offset as usize;
        let count = out.len().min(bytes.len() - start);
        out[..count].copy_from_slice(&bytes[start..start + count]);
        count
    }

    fn size(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(self.bytes())
    }
}

/// Convenience alias: what the readers and workers actually pass around.
pub type SharedSource = Arc<dyn Source>;

pub fn shared_from_vec(data: Vec<u8>) -> SharedSource {
    Arc::new(SliceSource::from_vec(data))
}

pub fn shared_from_file<P: AsRef<Path>>(path: P) -> Result<SharedSource> {
    Ok(Arc::new(SliceSource::map_file(path)?))
}
