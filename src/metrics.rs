//! Lightweight global metrics.
//!
//! Thread-safe atomic counters for the subsystems:
//! - chunk cache
//! - block allocator
//! - lock controller
//! - deferred deletion

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ----- Chunk cache -----
static CHUNK_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CHUNK_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static CHUNK_CACHE_EVICTIONS: AtomicU64 = AtomicU64::new(0);
static CHUNK_READS: AtomicU64 = AtomicU64::new(0);
static CHUNK_FLUSHES: AtomicU64 = AtomicU64::new(0);
static CHUNK_FLUSH_FAILURES: AtomicU64 = AtomicU64::new(0);

// ----- Allocator -----
static MALLOC_CALLS: AtomicU64 = AtomicU64::new(0);
static MALLOC_BYTES: AtomicU64 = AtomicU64::new(0);
static FREE_CALLS: AtomicU64 = AtomicU64::new(0);
static FREE_BYTES: AtomicU64 = AtomicU64::new(0);
static CHUNKS_CREATED: AtomicU64 = AtomicU64::new(0);

// ----- Locks -----
static READ_LOCKS_ACQUIRED: AtomicU64 = AtomicU64::new(0);
static WRITE_LOCKS_ACQUIRED: AtomicU64 = AtomicU64::new(0);
static LOCK_CANCELLATIONS: AtomicU64 = AtomicU64::new(0);

// ----- Deferred deletion -----
static DELETIONS_PROCESSED: AtomicU64 = AtomicU64::new(0);
static DELETIONS_SKIPPED: AtomicU64 = AtomicU64::new(0);
static DELETIONS_DUPLICATE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    // Chunk cache
    pub chunk_cache_hits: u64,
    pub chunk_cache_misses: u64,
    pub chunk_cache_evictions: u64,
    pub chunk_reads: u64,
    pub chunk_flushes: u64,
    pub chunk_flush_failures: u64,

    // Allocator
    pub malloc_calls: u64,
    pub malloc_bytes: u64,
    pub free_calls: u64,
    pub free_bytes: u64,
    pub chunks_created: u64,

    // Locks
    pub read_locks_acquired: u64,
    pub write_locks_acquired: u64,
    pub lock_cancellations: u64,

    // Deferred deletion
    pub deletions_processed: u64,
    pub deletions_skipped: u64,
    pub deletions_duplicate: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.chunk_cache_hits + self.chunk_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.chunk_cache_hits as f64 / total as f64
        }
    }

    /// Bytes currently handed out by all allocators of the process.
    pub fn live_bytes(&self) -> u64 {
        self.malloc_bytes.saturating_sub(self.free_bytes)
    }
}

// ----- Recorders (Chunk cache) -----
pub fn record_cache_hit() {
    CHUNK_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cache_miss() {
    CHUNK_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cache_eviction() {
    CHUNK_CACHE_EVICTIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_chunk_read() {
    CHUNK_READS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_chunk_flush() {
    CHUNK_FLUSHES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_chunk_flush_failure() {
    CHUNK_FLUSH_FAILURES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Allocator) -----
pub fn record_malloc(bytes: usize) {
    MALLOC_CALLS.fetch_add(1, Ordering::Relaxed);
    MALLOC_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}
pub fn record_free(bytes: usize) {
    FREE_CALLS.fetch_add(1, Ordering::Relaxed);
    FREE_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}
pub fn record_chunk_created() {
    CHUNKS_CREATED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Locks) -----
pub fn record_read_lock() {
    READ_LOCKS_ACQUIRED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_write_lock() {
    WRITE_LOCKS_ACQUIRED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_lock_cancelled() {
    LOCK_CANCELLATIONS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Deferred deletion) -----
pub fn record_deletion_processed() {
    DELETIONS_PROCESSED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_deletion_skipped() {
    DELETIONS_SKIPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_deletion_duplicate() {
    DELETIONS_DUPLICATE.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        chunk_cache_hits: CHUNK_CACHE_HITS.load(Ordering::Relaxed),
        chunk_cache_misses: CHUNK_CACHE_MISSES.load(Ordering::Relaxed),
        chunk_cache_evictions: CHUNK_CACHE_EVICTIONS.load(Ordering::Relaxed),
        chunk_reads: CHUNK_READS.load(Ordering::Relaxed),
        chunk_flushes: CHUNK_FLUSHES.load(Ordering::Relaxed),
        chunk_flush_failures: CHUNK_FLUSH_FAILURES.load(Ordering::Relaxed),

        malloc_calls: MALLOC_CALLS.load(Ordering::Relaxed),
        malloc_bytes: MALLOC_BYTES.load(Ordering::Relaxed),
        free_calls: FREE_CALLS.load(Ordering::Relaxed),
        free_bytes: FREE_BYTES.load(Ordering::Relaxed),
        chunks_created: CHUNKS_CREATED.load(Ordering::Relaxed),

        read_locks_acquired: READ_LOCKS_ACQUIRED.load(Ordering::Relaxed),
        write_locks_acquired: WRITE_LOCKS_ACQUIRED.load(Ordering::Relaxed),
        lock_cancellations: LOCK_CANCELLATIONS.load(Ordering::Relaxed),

        deletions_processed: DELETIONS_PROCESSED.load(Ordering::Relaxed),
        deletions_skipped: DELETIONS_SKIPPED.load(Ordering::Relaxed),
        deletions_duplicate: DELETIONS_DUPLICATE.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    CHUNK_CACHE_HITS.store(0, Ordering::Relaxed);
    CHUNK_CACHE_MISSES.store(0, Ordering::Relaxed);
    CHUNK_CACHE_EVICTIONS.store(0, Ordering::Relaxed);
    CHUNK_READS.store(0, Ordering::Relaxed);
    CHUNK_FLUSHES.store(0, Ordering::Relaxed);
    CHUNK_FLUSH_FAILURES.store(0, Ordering::Relaxed);

    MALLOC_CALLS.store(0, Ordering::Relaxed);
    MALLOC_BYTES.store(0, Ordering::Relaxed);
    FREE_CALLS.store(0, Ordering::Relaxed);
    FREE_BYTES.store(0, Ordering::Relaxed);
    CHUNKS_CREATED.store(0, Ordering::Relaxed);

    READ_LOCKS_ACQUIRED.store(0, Ordering::Relaxed);
    WRITE_LOCKS_ACQUIRED.store(0, Ordering::Relaxed);
    LOCK_CANCELLATIONS.store(0, Ordering::Relaxed);

    DELETIONS_PROCESSED.store(0, Ordering::Relaxed);
    DELETIONS_SKIPPED.store(0, Ordering::Relaxed);
    DELETIONS_DUPLICATE.store(0, Ordering::Relaxed);
}
