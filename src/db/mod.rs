//! Storage layer: one backing file, cached in chunks, carved into blocks.
//!
//! Submodules:
//! - file.rs   : backing file I/O and the writer's advisory lock
//! - chunk.rs  : a cached 4 KiB page with dirty/pinned flags
//! - cache.rs  : LRU chunk cache shared between databases
//! - core.rs   : `Database`: open/close/flush, exclusive lock, field API
//! - header.rs : version, write number and free-list heads in chunk 0
//! - alloc.rs  : malloc/free over size-class free lists
//! - doctor.rs : block tiling / free-list consistency scan

pub mod alloc;
pub mod cache;
pub mod chunk;
pub mod core;
pub mod doctor;
pub(crate) mod file;
pub mod header;

pub use self::cache::ChunkCache;
pub use self::chunk::Chunk;
pub use self::core::Database;
pub use self::doctor::{DoctorReport, FreeListSummary};

use serde::Serialize;

/// Diagnostic label of an allocation. Never influences placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PoolTag(pub u16);

impl PoolTag {
    pub const MISC: PoolTag = PoolTag(0);
    pub const BTREE: PoolTag = PoolTag(1);
    pub const DB_PROPERTIES: PoolTag = PoolTag(2);
    pub const STRING_LONG: PoolTag = PoolTag(3);
    pub const STRING_SHORT: PoolTag = PoolTag(4);
    pub const LINKED_LIST: PoolTag = PoolTag(5);
    pub const GROWABLE_ARRAY: PoolTag = PoolTag(6);

    /// Tags from here on belong to node types.
    pub const FIRST_NODE_TAG: u16 = 0x100;

    pub fn node(type_code: u16) -> PoolTag {
        PoolTag(Self::FIRST_NODE_TAG.wrapping_add(type_code))
    }
}

/// Live allocations of one pool, since the database was opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub allocations: u64,
    pub bytes: u64,
    pub total_allocations: u64,
}

impl Database {
    pub(crate) fn account_malloc(&self, pool: PoolTag, bytes: usize) {
        let mut pools = self.pools.lock();
        let s = pools.entry(pool.0).or_default();
        s.allocations += 1;
        s.total_allocations += 1;
        s.bytes += bytes as u64;
    }

    pub(crate) fn account_free(&self, pool: PoolTag, bytes: usize) {
        let mut pools = self.pools.lock();
        let s = pools.entry(pool.0).or_default();
        s.allocations = s.allocations.saturating_sub(1);
        s.bytes = s.bytes.saturating_sub(bytes as u64);
    }

    /// Per-pool accounting, sorted by tag.
    pub fn pool_stats(&self) -> Vec<(PoolTag, PoolStats)> {
        let pools = self.pools.lock();
        let mut out: Vec<(PoolTag, PoolStats)> =
            pools.iter().map(|(k, v)| (PoolTag(*k), *v)).collect();
        out.sort_by_key(|(t, _)| t.0);
        out
    }
}
