//! Chunk fetching: worker pool, twin caches, and prefetching.
//!
//! The owning thread asks for chunks by their exact start offset; the
//! fetcher serves them from its caches, from an in-flight prefetch, or by
//! submitting an on-demand task. Prefetch tasks for not-yet-discovered
//! chunks are speculative: they decode from a partition-sized guess offset
//! and the result only counts as a hit if the boundary the worker found is
//! the boundary the reader later asks for.
//!
//! One invariant keeps the queue sane: an offset (exact or partition
//! guess) present in the in-flight map is never scheduled again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, warn};

use crate::block_map::Window;
use crate::cache::{CacheStatistics, LruCache};
use crate::chunk::ChunkData;
use crate::chunk_decoder::{
    decode_aligned_chunk, decode_marker_chunk, decode_member_start_chunk,
    decode_speculative_chunk, decode_window_chunk, DecodeLimits,
};
use crate::error::{GzipError, Result};
use crate::fetching_strategy::FetchingStrategy;
use crate::gzip::FileFormat;
use crate::source::SharedSource;

/// How long `get` sleeps on a pending future before servicing prefetch
/// maintenance again.
const WAIT_SLICE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct FetcherConfig {
    pub parallelism: usize,
    pub chunk_size_bits: u64,
    /// Decoded-size cap applied to every chunk decode.
    pub max_decompressed_size: u64,
}

/// How to decode a chunk whose exact start offset is known.
#[derive(Clone)]
pub enum DecodePlan {
    /// Byte-aligned stream boundary, whole members via the library-backed
    /// path (the BGZF fast path).
    MemberAligned,
    /// Byte-aligned stream boundary, internal decoder with block-granular
    /// stopping; used where members can be large.
    MemberStart,
    /// Known predecessor window: the window-seeded internal decoder.
    WithWindow(Arc<Window>),
    /// No window yet: emit markers.
    Markerless,
}

/// An exact request from the owning thread.
pub struct ChunkRequest {
    pub offset: u64,
    pub index: usize,
    pub plan: DecodePlan,
    /// Explicit decode end (bits) for chunks whose extent is already
    /// mapped; `None` falls back to the partition rule.
    pub until: Option<u64>,
    /// Exact coordinates of already-mapped successor chunks, used instead
    /// of partition guesses when prefetching over known territory.
    pub known_successors: Vec<PrefetchTarget>,
}

#[derive(Clone)]
pub struct PrefetchTarget {
    pub index: usize,
    pub offset: u64,
    pub plan: DecodePlan,
    pub until: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStatistics {
    pub gets: u64,
    pub cache_hits: u64,
    pub prefetch_direct_hits: u64,
    pub on_demand_fetches: u64,
    pub prefetches_submitted: u64,
    pub failed_prefetches: u64,
    pub cache: CacheStatistics,
    pub prefetch_cache: CacheStatistics,
}

type ChunkResult = Result<Option<ChunkData>>;

struct Inflight {
    receiver: Receiver<ChunkResult>,
    /// Speculative tasks are keyed by their partition guess; exact tasks
    /// by their start offset.
    speculative: bool,
}

pub struct ChunkFetcher {
    source: SharedSource,
    format: FileFormat,
    config: FetcherConfig,
    pool: Option<rayon::ThreadPool>,
    cache: LruCache<u64, Arc<ChunkData>>,
    prefetch_cache: LruCache<u64, Arc<ChunkData>>,
    failed_prefetches: LruCache<u64, ()>,
    /// Partitions already speculated on, so a miss is not retried forever.
    attempted_partitions: LruCache<u64, ()>,
    inflight: HashMap<u64, Inflight>,
    strategy: FetchingStrategy,
    cancel: Arc<AtomicBool>,
    statistics: FetchStatistics,
}

impl ChunkFetcher {
    pub fn new(source: SharedSource, format: FileFormat, config: FetcherConfig) -> Result<Self> {
        let parallelism = config.parallelism.max(1);
        let pool = if parallelism == 1 {
            None
        } else {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(parallelism)
                    .thread_name(|i| format!("gzip-chunk-{i}"))
                    .build()
                    .map_err(|e| GzipError::Io(std::io::Error::other(e)))?,
            )
        };
        let cache_capacity = parallelism.max(16);
        let prefetch_capacity = 2 * parallelism;
        Ok(Self {
            source,
            format,
            config,
            pool,
            cache: LruCache::new(cache_capacity),
            prefetch_cache: LruCache::new(prefetch_capacity.max(1)),
            failed_prefetches: LruCache::new(prefetch_capacity.max(1)),
            attempted_partitions: LruCache::new(4 * parallelism.max(4)),
            inflight: HashMap::new(),
            strategy: FetchingStrategy::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            statistics: FetchStatistics::default(),
        })
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn statistics(&self) -> FetchStatistics {
        let mut statistics = self.statistics;
        statistics.cache = self.cache.statistics();
        statistics.prefetch_cache = self.prefetch_cache.statistics();
        statistics
    }

    pub fn parallelism(&self) -> usize {
        self.config.parallelism.max(1)
    }

    fn partition_of(&self, offset: u64) -> u64 {
        offset / self.config.chunk_size_bits * self.config.chunk_size_bits
    }

    fn limits_for(&self, offset: u64, until: Option<u64>) -> DecodeLimits {
        match until {
            // A mapped chunk must be decoded over its whole known range.
            Some(until_offset) => DecodeLimits {
                until_offset,
                max_decompressed_size: u64::MAX,
            },
            None => DecodeLimits {
                until_offset: (offset / self.config.chunk_size_bits + 1)
                    * self.config.chunk_size_bits,
                max_decompressed_size: self.config.max_decompressed_size,
            },
        }
    }

    /// Fetches the chunk starting exactly at `request.offset`.
    pub fn get(&mut self, request: ChunkRequest) -> Result<Arc<ChunkData>> {
        self.statistics.gets += 1;
        self.strategy.fetch(request.index);
        self.harvest_completed_prefetches();

        let from_caches = self.take_from_caches(request.offset)?;
        self.issue_prefetches(&request);

        if let Some(chunk) = from_caches {
            self.statistics.cache_hits += 1;
            self.insert_into_cache(request.offset, chunk.clone());
            return Ok(chunk);
        }

        self.statistics.on_demand_fetches += 1;
        let failed_before = self.failed_prefetches.evict(&request.offset).is_some()
            || self
                .failed_prefetches
                .evict(&self.partition_of(request.offset))
                .is_some();

        let chunk = if failed_before || self.pool.is_none() {
            // Decode on the calling thread so errors surface synchronously.
            self.decode_exact_here(&request)?
        } else {
            let receiver = self.spawn_exact(&request);
            match self.wait_for(receiver)? {
                Some(chunk) => chunk,
                None => return Err(GzipError::UnexpectedEof),
            }
        };

        if chunk.encoded_offset != request.offset {
            return Err(GzipError::IndexInconsistent(format!(
                "worker decoded offset {} for request {}",
                chunk.encoded_offset, request.offset
            )));
        }
        let chunk = Arc::new(chunk);
        self.insert_into_cache(request.offset, chunk.clone());
        Ok(chunk)
    }

    /// Publishes an already-resolved chunk (e.g. a split product) so
    /// follow-up requests for its offset hit the cache.
    pub fn insert_resolved(&mut self, offset: u64, chunk: Arc<ChunkData>) {
        self.cache.insert(offset, chunk);
    }

    /// Whether the offset is cached or being worked on.
    pub fn is_cached_or_inflight(&self, offset: u64) -> bool {
        self.inflight.contains_key(&offset)
            || self.inflight.contains_key(&self.partition_of(offset))
            || self.cache.test(&offset)
            || self.prefetch_cache.test(&offset)
    }

    pub fn clear_caches(&mut self) {
        self.cache.clear();
        self.prefetch_cache.clear();
    }

    fn decode_exact_here(&self, request: &ChunkRequest) -> Result<ChunkData> {
        let limits = self.limits_for(request.offset, request.until);
        decode_exact(
            &self.source,
            self.format,
            request.offset,
            request.plan.clone(),
            limits,
            &self.cancel,
        )
    }

    fn spawn_exact(&mut self, request: &ChunkRequest) -> Receiver<ChunkResult> {
        let (sender, receiver) = bounded(1);
        let source = self.source.clone();
        let format = self.format;
        let offset = request.offset;
        let plan = request.plan.clone();
        let limits = self.limits_for(offset, request.until);
        let cancel = self.cancel.clone();
        self.pool
            .as_ref()
            .expect("spawn_exact requires a pool")
            .spawn(move || {
                let result = decode_exact(&source, format, offset, plan, limits, &cancel);
                let _ = sender.send(result.map(Some));
            });
        receiver
    }

    /// Waits for one in-flight prefetch and classifies its outcome: a hit
    /// when the worker's chunk starts exactly at the wanted offset, a
    /// prefetch-cache insert otherwise, a failed-prefetch record on error.
    /// Prefetch errors stay silent here; the on-demand retry on the
    /// calling thread surfaces them synchronously.
    fn settle_inflight(
        &mut self,
        key: u64,
        inflight: Inflight,
        wanted_offset: u64,
    ) -> Option<Arc<ChunkData>> {
        match self.wait_for(inflight.receiver) {
            Ok(Some(chunk)) => {
                if chunk.encoded_offset == wanted_offset {
                    self.statistics.prefetch_direct_hits += 1;
                    return Some(Arc::new(chunk));
                }
                // A guess that found some other boundary may still match a
                // later request.
                self.prefetch_cache
                    .insert(chunk.encoded_offset, Arc::new(chunk));
            }
            Ok(None) => {}
            Err(error) => {
                debug!("in-flight decode for {key} failed: {error}");
                self.statistics.failed_prefetches += 1;
                self.failed_prefetches.insert(key, ());
            }
        }
        None
    }

    fn take_from_caches(&mut self, offset: u64) -> Result<Option<Arc<ChunkData>>> {
        // In-flight task keyed by this exact offset.
        if let Some(inflight) = self.inflight.remove(&offset) {
            if let Some(chunk) = self.settle_inflight(offset, inflight, offset) {
                return Ok(Some(chunk));
            }
        }

        // Speculative task for the partition containing this offset.
        let partition = self.partition_of(offset);
        if partition != offset {
            if let Some(inflight) = self.inflight.remove(&partition) {
                if inflight.speculative {
                    if let Some(chunk) = self.settle_inflight(partition, inflight, offset) {
                        return Ok(Some(chunk));
                    }
                } else {
                    self.inflight.insert(partition, inflight);
                }
            }
        }

        if let Some(chunk) = self.cache.get(&offset) {
            return Ok(Some(chunk));
        }
        if let Some(chunk) = self.prefetch_cache.get(&offset) {
            self.prefetch_cache.evict(&offset);
            return Ok(Some(chunk));
        }
        Ok(None)
    }

    fn insert_into_cache(&mut self, offset: u64, chunk: Arc<ChunkData>) {
        // Sequential readers never revisit; pinning consumed chunks would
        // only push out the ones still coming.
        if self.strategy.is_sequential() && !self.cache.test(&offset) {
            self.cache.clear();
        }
        self.cache.insert(offset, chunk);
    }

    fn issue_prefetches(&mut self, request: &ChunkRequest) {
        if self.pool.is_none() {
            return;
        }
        let pool_capacity = self.config.parallelism.max(1);
        let list = self
            .strategy
            .prefetch_list(self.prefetch_cache.capacity());

        // Protect still-wanted entries from LRU eviction while the new
        // prefetches complete.
        for target in &request.known_successors {
            self.cache.touch(&target.offset);
            self.prefetch_cache.touch(&target.offset);
        }

        let mut spawned = 0usize;
        // Guesses walk consecutive partitions past the requested one;
        // chunk indices and partitions need not line up one-to-one.
        let mut next_guess = self.partition_of(request.offset) + self.config.chunk_size_bits;
        for future_index in list {
            if self.inflight.len() + 1 >= pool_capacity {
                break;
            }
            let target = request
                .known_successors
                .iter()
                .find(|t| t.index == future_index)
                .cloned();

            match target {
                Some(target) => {
                    if self.is_cached_or_inflight(target.offset) {
                        continue;
                    }
                    let receiver = self.spawn_prefetch_exact(&target);
                    self.inflight.insert(
                        target.offset,
                        Inflight {
                            receiver,
                            speculative: false,
                        },
                    );
                    spawned += 1;
                }
                None => {
                    let guess = next_guess;
                    next_guess += self.config.chunk_size_bits;
                    if guess >= self.source.size() * 8 {
                        break;
                    }
                    if self.inflight.contains_key(&guess)
                        || self.attempted_partitions.test(&guess)
                        || self.failed_prefetches.test(&guess)
                    {
                        continue;
                    }
                    // Livelock guard: if completing this prefetch would
                    // evict a result we still want, stop scheduling.
                    if self.prefetch_cache.len() + self.inflight.len() + 1
                        > self.prefetch_cache.capacity()
                    {
                        if let Some(&victim) =
                            self.prefetch_cache.nth_eviction_candidate(self.inflight.len())
                        {
                            if self.partition_of(victim) >= self.partition_of(request.offset) {
                                break;
                            }
                        }
                    }
                    let receiver = self.spawn_prefetch_speculative(guess);
                    self.attempted_partitions.insert(guess, ());
                    self.inflight.insert(
                        guess,
                        Inflight {
                            receiver,
                            speculative: true,
                        },
                    );
                    spawned += 1;
                }
            }
        }
        if spawned > 0 {
            self.statistics.prefetches_submitted += spawned as u64;
            debug!("submitted {spawned} prefetch task(s)");
        }
    }

    fn spawn_prefetch_exact(&self, target: &PrefetchTarget) -> Receiver<ChunkResult> {
        let (sender, receiver) = bounded(1);
        let source = self.source.clone();
        let format = self.format;
        let offset = target.offset;
        let plan = target.plan.clone();
        let limits = self.limits_for(offset, target.until);
        let cancel = self.cancel.clone();
        self.pool
            .as_ref()
            .expect("prefetching requires a pool")
            .spawn(move || {
                let result = decode_exact(&source, format, offset, plan, limits, &cancel);
                let _ = sender.send(result.map(Some));
            });
        receiver
    }

    fn spawn_prefetch_speculative(&self, guess: u64) -> Receiver<ChunkResult> {
        let (sender, receiver) = bounded(1);
        let source = self.source.clone();
        let format = self.format;
        let limits = self.limits_for(guess, None);
        let cancel = self.cancel.clone();
        self.pool
            .as_ref()
            .expect("prefetching requires a pool")
            .spawn(move || {
                let result = decode_speculative_chunk(&source, format, guess, limits, &cancel);
                let _ = sender.send(result);
            });
        receiver
    }

    /// Moves finished prefetch results into the prefetch cache and records
    /// failures so they are not speculatively retried.
    fn harvest_completed_prefetches(&mut self) {
        let keys: Vec<u64> = self.inflight.keys().copied().collect();
        for key in keys {
            let outcome = match self.inflight.get(&key) {
                Some(inflight) => match inflight.receiver.try_recv() {
                    Ok(result) => Some(Some(result)),
                    // A dropped sender means the worker died; forget it.
                    Err(crossbeam_channel::TryRecvError::Disconnected) => Some(None),
                    Err(crossbeam_channel::TryRecvError::Empty) => None,
                },
                None => None,
            };
            let Some(result) = outcome else { continue };
            self.inflight.remove(&key);
            match result {
                Some(Ok(Some(chunk))) => {
                    debug!(
                        "prefetch for {key} completed with chunk at {}",
                        chunk.encoded_offset
                    );
                    self.prefetch_cache
                        .insert(chunk.encoded_offset, Arc::new(chunk));
                }
                Some(Ok(None)) => {}
                Some(Err(error)) => {
                    warn!("prefetch for offset {key} failed: {error}");
                    self.statistics.failed_prefetches += 1;
                    self.failed_prefetches.insert(key, ());
                }
                None => {}
            }
        }
    }

    /// Blocks on one future, waking regularly to keep harvesting finished
    /// prefetches.
    fn wait_for(&mut self, receiver: Receiver<ChunkResult>) -> Result<Option<ChunkData>> {
        loop {
            match receiver.recv_timeout(WAIT_SLICE) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => self.harvest_completed_prefetches(),
                Err(RecvTimeoutError::Disconnected) => return Err(GzipError::Cancelled),
            }
        }
    }
}

impl Drop for ChunkFetcher {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        // Drain outstanding futures so workers never outlive the fetcher's
        // caller-visible lifetime.
        for (_, inflight) in self.inflight.drain() {
            let _ = inflight.receiver.recv_timeout(Duration::from_secs(10));
        }
    }
}

fn decode_exact(
    source: &SharedSource,
    format: FileFormat,
    offset: u64,
    plan: DecodePlan,
    limits: DecodeLimits,
    cancel: &AtomicBool,
) -> Result<ChunkData> {
    match plan {
        DecodePlan::MemberAligned => {
            debug_assert_eq!(offset % 8, 0);
            decode_aligned_chunk(source, format, offset / 8, limits, cancel)
        }
        DecodePlan::MemberStart => {
            debug_assert_eq!(offset % 8, 0);
            decode_member_start_chunk(source, format, offset, limits, cancel)
        }
        DecodePlan::WithWindow(window) => {
            let bytes = window.bytes()?;
            decode_window_chunk(source, format, offset, bytes, limits, cancel)
        }
        DecodePlan::Markerless => decode_marker_chunk(source, format, offset, limits, cancel),
    }
}
