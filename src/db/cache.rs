//! O(1) LRU cache of chunks, shared by every database attached to it.
//!
//! Design:
//! - HashMap<(db_id, chunk_index), Entry> stores the chunk and doubly-linked
//!   pointers (prev/next by key).
//! - head = MRU, tail = LRU.
//! - Eviction walks from the tail, skips pinned chunks, flushes dirty ones
//!   first and skips those whose flush fails.
//! - Capacity is a soft bound: when every chunk is pinned the cache grows.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::NdConfig;
use crate::consts::CHUNK_SIZE;
use crate::db::chunk::Chunk;
use crate::error::Result;
use crate::metrics::{record_cache_eviction, record_cache_hit, record_cache_miss};

type Key = (u64, u64);

pub struct ChunkCache {
    inner: Mutex<Inner>,
}

struct Inner {
    cap: usize,
    map: HashMap<Key, Entry>,
    head: Option<Key>, // Most-recently used
    tail: Option<Key>, // Least-recently used
}

struct Entry {
    chunk: Arc<Chunk>,
    prev: Option<Key>,
    next: Option<Key>,
}

static SHARED: OnceLock<Arc<ChunkCache>> = OnceLock::new();

impl ChunkCache {
    /// Create an isolated cache holding about `capacity_bytes` of chunks.
    pub fn new(capacity_bytes: usize) -> Self {
        let cap = chunks_for(capacity_bytes);
        Self {
            inner: Mutex::new(Inner {
                cap,
                map: HashMap::with_capacity(cap.min(1 << 16)),
                head: None,
                tail: None,
            }),
        }
    }

    /// Process-wide instance, sized from the environment on first use.
    pub fn shared() -> Arc<ChunkCache> {
        SHARED
            .get_or_init(|| Arc::new(ChunkCache::new(NdConfig::from_env().chunk_cache_bytes)))
            .clone()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.inner.lock().cap * CHUNK_SIZE
    }

    /// Resize; shrinking evicts immediately where possible.
    pub fn set_capacity_bytes(&self, bytes: usize) {
        let mut g = self.inner.lock();
        g.cap = chunks_for(bytes);
        g.evict_over_capacity(None);
    }

    /// Number of chunks currently cached (all databases).
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a chunk, loading it on a miss. With `pin`, the chunk is
    /// pinned before the cache lock is released; the flag in the result
    /// tells whether this call pinned it.
    pub(crate) fn get_or_load<F>(
        &self,
        db_id: u64,
        index: u64,
        pin: bool,
        load: F,
    ) -> Result<(Arc<Chunk>, bool)>
    where
        F: FnOnce() -> Result<Chunk>,
    {
        let key = (db_id, index);
        let mut g = self.inner.lock();

        if let Some(e) = g.map.get(&key) {
            let chunk = e.chunk.clone();
            g.detach(key);
            g.attach_front(key);
            record_cache_hit();
            let newly = pin && chunk.pin();
            return Ok((chunk, newly));
        }

        record_cache_miss();
        let chunk = Arc::new(load()?);
        let newly = pin && chunk.pin();
        g.map.insert(
            key,
            Entry {
                chunk: chunk.clone(),
                prev: None,
                next: None,
            },
        );
        g.attach_front(key);
        g.evict_over_capacity(Some(key));
        Ok((chunk, newly))
    }

    /// Chunks of one database currently in the cache (any order).
    pub(crate) fn chunks_of(&self, db_id: u64) -> Vec<Arc<Chunk>> {
        let g = self.inner.lock();
        g.map
            .iter()
            .filter(|(k, _)| k.0 == db_id)
            .map(|(_, e)| e.chunk.clone())
            .collect()
    }

    /// Drop every chunk of a database without flushing.
    pub(crate) fn remove_db(&self, db_id: u64) {
        let mut g = self.inner.lock();
        let keys: Vec<Key> = g.map.keys().filter(|k| k.0 == db_id).copied().collect();
        for k in keys {
            g.detach(k);
            g.map.remove(&k);
        }
        debug!("purged db {} from chunk cache", db_id);
    }
}

fn chunks_for(bytes: usize) -> usize {
    (bytes / CHUNK_SIZE).max(1)
}

impl Inner {
    fn evict_over_capacity(&mut self, keep: Option<Key>) {
        let mut cursor = self.tail;
        while self.map.len() > self.cap {
            let key = match cursor {
                Some(k) => k,
                None => break,
            };
            let (chunk, prev) = match self.map.get(&key) {
                Some(e) => (e.chunk.clone(), e.prev),
                None => break,
            };
            cursor = prev;

            if Some(key) == keep || chunk.is_locked() {
                continue;
            }
            if let Err(e) = chunk.flush() {
                warn!(
                    "chunk {} of db {} not evicted, flush failed: {}",
                    chunk.index(),
                    chunk.db_id(),
                    e
                );
                continue;
            }
            self.detach(key);
            self.map.remove(&key);
            record_cache_eviction();
        }
    }

    fn detach(&mut self, key: Key) {
        let (prev, next) = match self.map.get(&key) {
            Some(e) => (e.prev, e.next),
            None => return,
        };

        if self.head == Some(key) {
            self.head = next;
        }
        if self.tail == Some(key) {
            self.tail = prev;
        }

        if let Some(p) = prev {
            if let Some(pe) = self.map.get_mut(&p) {
                pe.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(ne) = self.map.get_mut(&n) {
                ne.prev = prev;
            }
        }

        if let Some(e) = self.map.get_mut(&key) {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, key: Key) {
        if self.head == Some(key) {
            return;
        }

        if let Some(e) = self.map.get_mut(&key) {
            e.prev = None;
            e.next = self.head;
        }

        if let Some(old_head) = self.head {
            if let Some(he) = self.map.get_mut(&old_head) {
                he.prev = Some(key);
            }
        }

        self.head = Some(key);

        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::file::BackingFile;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ndstore-{prefix}-{pid}-{t}.db"))
    }

    fn load(cache: &ChunkCache, file: &Arc<BackingFile>, idx: u64, pin: bool) -> Arc<Chunk> {
        let f = file.clone();
        cache
            .get_or_load(7, idx, pin, move || Chunk::load(7, idx, f))
            .unwrap()
            .0
    }

    #[test]
    fn evicts_least_recently_used() {
        let path = temp_file("cache-lru");
        let file = Arc::new(BackingFile::open(&path, false, false).unwrap());
        let cache = ChunkCache::new(3 * CHUNK_SIZE);

        load(&cache, &file, 1, false);
        load(&cache, &file, 2, false);
        load(&cache, &file, 3, false);
        // touch 1 so that 2 becomes the LRU
        load(&cache, &file, 1, false);
        load(&cache, &file, 4, false);

        let mut idx: Vec<u64> = cache.chunks_of(7).iter().map(|c| c.index()).collect();
        idx.sort_unstable();
        assert_eq!(idx, vec![1, 3, 4]);

        drop(file);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pinned_chunks_survive_and_dirty_ones_are_flushed() {
        let path = temp_file("cache-pin");
        let file = Arc::new(BackingFile::open(&path, false, false).unwrap());
        let cache = ChunkCache::new(2 * CHUNK_SIZE);

        let pinned = load(&cache, &file, 1, true);
        pinned.put_int(0, 11);
        let dirty = load(&cache, &file, 2, false);
        dirty.put_int(0, 22);
        drop(dirty);

        // 3 forces an eviction: 1 is pinned, so 2 goes after being flushed
        load(&cache, &file, 3, false);
        let mut idx: Vec<u64> = cache.chunks_of(7).iter().map(|c| c.index()).collect();
        idx.sort_unstable();
        assert_eq!(idx, vec![1, 3]);

        let reread = load(&cache, &file, 2, false);
        assert_eq!(reread.get_int(0), 22);
        assert!(pinned.is_locked());
        assert_eq!(pinned.get_int(0), 11);

        pinned.unpin();
        cache.remove_db(7);
        assert!(cache.is_empty());

        drop(file);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn grows_when_everything_is_pinned() {
        let path = temp_file("cache-grow");
        let file = Arc::new(BackingFile::open(&path, false, false).unwrap());
        let cache = ChunkCache::new(CHUNK_SIZE);
        for i in 1..=4 {
            load(&cache, &file, i, true);
        }
        assert_eq!(cache.len(), 4);
        for c in cache.chunks_of(7) {
            c.unpin();
        }
        cache.set_capacity_bytes(2 * CHUNK_SIZE);
        assert_eq!(cache.len(), 2);
        drop(file);
        let _ = std::fs::remove_file(&path);
    }
}
