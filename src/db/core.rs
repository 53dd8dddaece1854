//! db/core: the `Database` type. Open/close/flush, exclusive lock and
//! pinning, chunk lookup and the fixed-offset field API.
//!
//! Addresses are byte offsets into the file; the chunk is `address >> 12`.
//! Fields must not straddle a chunk boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::NdConfig;
use crate::consts::{
    BLOCK_HEADER_SIZE, BLOCK_SIZE_DELTA, BLOCK_SIZE_DELTA_BITS, CHUNK_SIZE, CHUNK_SIZE_U64,
    OFFSET_IN_CHUNK_MASK, VERSION_OFFSET,
};
use crate::db::cache::ChunkCache;
use crate::db::chunk::Chunk;
use crate::db::file::BackingFile;
use crate::db::PoolStats;
use crate::error::{NdError, Result};

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

pub struct Database {
    pub(crate) id: u64,
    path: PathBuf,
    pub(crate) file: Arc<BackingFile>,
    cache: Arc<ChunkCache>,
    /// Chunk 0 stays resident for the lifetime of the database.
    pub(crate) header: Arc<Chunk>,
    pub(crate) chunk_count: AtomicU64,
    exclusive: AtomicBool,
    read_only: bool,
    pinned: Mutex<Vec<Arc<Chunk>>>,
    pub(crate) pools: Mutex<HashMap<u16, PoolStats>>,
    closed: AtomicBool,
}

impl Database {
    /// Open (or create) a database file with the default configuration.
    pub fn open(
        path: &Path,
        cache: Arc<ChunkCache>,
        version: i32,
        read_only: bool,
    ) -> Result<Self> {
        Self::open_with_config(path, cache, version, read_only, &NdConfig::default())
    }

    /// Open (or create) a database file. A new or empty file gets `version`
    /// in its header; an existing file keeps whatever version it has.
    pub fn open_with_config(
        path: &Path,
        cache: Arc<ChunkCache>,
        version: i32,
        read_only: bool,
        cfg: &NdConfig,
    ) -> Result<Self> {
        let file = Arc::new(BackingFile::open(path, read_only, cfg.data_fsync)?);
        let id = NEXT_DB_ID.fetch_add(1, Ordering::Relaxed);
        let len = file.len()?;
        let header = Arc::new(Chunk::load(id, 0, file.clone())?);

        let chunk_count = if len == 0 {
            // empty file: the header only exists in memory until the first flush
            header.put_int(VERSION_OFFSET as usize, version);
            1
        } else {
            len.div_ceil(CHUNK_SIZE_U64)
        };

        let db = Self {
            id,
            path: path.to_path_buf(),
            file,
            cache,
            header,
            chunk_count: AtomicU64::new(chunk_count),
            exclusive: AtomicBool::new(false),
            read_only,
            pinned: Mutex::new(Vec::new()),
            pools: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        if len == 0 && !read_only {
            db.header.flush()?;
        }
        info!(
            "opened database {} ({} chunks, version {}, read_only={})",
            path.display(),
            chunk_count,
            db.version(),
            read_only
        );
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count.load(Ordering::Acquire)
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    // ----- exclusive lock -----

    /// Mark the database as exclusively owned by the current writer. Every
    /// chunk touched from now on is pinned in the cache.
    pub fn set_exclusive_lock(&self) -> Result<()> {
        if self.read_only {
            return Err(NdError::ReadOnlyDatabase);
        }
        self.exclusive.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Acquire)
    }

    /// Leave exclusive mode and unpin every chunk pinned since
    /// `set_exclusive_lock`. With `flush`, dirty chunks are written first;
    /// the locks are released even when the flush fails.
    pub fn give_up_exclusive_lock(&self, flush: bool) -> Result<()> {
        let res = if flush { self.flush() } else { Ok(()) };
        let pinned = std::mem::take(&mut *self.pinned.lock());
        for chunk in &pinned {
            chunk.unpin();
        }
        self.exclusive.store(false, Ordering::Release);
        debug!("db {} gave up exclusive lock ({} chunks unpinned)", self.id, pinned.len());
        res
    }

    pub(crate) fn assert_exclusive(&self) {
        assert!(
            self.is_exclusive(),
            "database {} modified without the exclusive lock",
            self.path.display()
        );
    }

    // ----- chunks -----

    pub(crate) fn get_chunk(&self, index: u64) -> Result<Arc<Chunk>> {
        if index == 0 {
            return Ok(self.header.clone());
        }
        if index >= self.chunk_count() {
            return Err(NdError::CorruptBlock {
                address: index * CHUNK_SIZE_U64,
                reason: format!("chunk {} is beyond the end of the database", index),
            });
        }
        let exclusive = self.is_exclusive();
        let file = self.file.clone();
        let id = self.id;
        let (chunk, newly_pinned) = self
            .cache
            .get_or_load(id, index, exclusive, move || Chunk::load(id, index, file))?;
        if newly_pinned {
            self.pinned.lock().push(chunk.clone());
        }
        Ok(chunk)
    }

    /// Register a freshly created chunk with the cache (pinned, since
    /// chunks are only created under the exclusive lock).
    pub(crate) fn insert_new_chunk(&self, index: u64) -> Result<Arc<Chunk>> {
        let file = self.file.clone();
        let id = self.id;
        let (chunk, newly_pinned) = self.cache.get_or_load(id, index, true, move || {
            let c = Chunk::new_empty(id, index, file);
            c.mark_dirty();
            Ok(c)
        })?;
        if newly_pinned {
            self.pinned.lock().push(chunk.clone());
        }
        Ok(chunk)
    }

    fn chunk_for(&self, address: u64) -> Result<(Arc<Chunk>, usize)> {
        let chunk = self.get_chunk(address / CHUNK_SIZE_U64)?;
        Ok((chunk, (address & OFFSET_IN_CHUNK_MASK) as usize))
    }

    fn chunk_for_write(&self, address: u64) -> Result<(Arc<Chunk>, usize)> {
        self.assert_exclusive();
        self.chunk_for(address)
    }

    // ----- flush / close -----

    /// Write every dirty chunk of this database. Keeps going after a
    /// failure and returns the first error; failed chunks stay dirty.
    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let mut first_err: Option<NdError> = None;
        let mut chunks = self.cache.chunks_of(self.id);
        chunks.sort_by_key(|c| c.index());
        for chunk in std::iter::once(&self.header).chain(chunks.iter()) {
            if let Err(e) = chunk.flush() {
                warn!("flush of chunk {} of {} failed: {}", chunk.index(), self.path.display(), e);
                first_err.get_or_insert(e);
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        self.file.sync()
    }

    /// Flush and drop this database's chunks from the shared cache.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let res = self.flush();
        for chunk in std::mem::take(&mut *self.pinned.lock()) {
            chunk.unpin();
        }
        self.exclusive.store(false, Ordering::Release);
        self.cache.remove_db(self.id);
        debug!("closed database {}", self.path.display());
        res
    }

    // ----- field API -----

    pub fn get_byte(&self, address: u64) -> Result<u8> {
        let (c, off) = self.chunk_for(address)?;
        Ok(c.get_byte(off))
    }

    pub fn put_byte(&self, address: u64, value: u8) -> Result<()> {
        let (c, off) = self.chunk_for_write(address)?;
        c.put_byte(off, value);
        Ok(())
    }

    pub fn get_short(&self, address: u64) -> Result<i16> {
        let (c, off) = self.chunk_for(address)?;
        Ok(c.get_short(off))
    }

    pub fn put_short(&self, address: u64, value: i16) -> Result<()> {
        let (c, off) = self.chunk_for_write(address)?;
        c.put_short(off, value);
        Ok(())
    }

    pub fn get_char(&self, address: u64) -> Result<u16> {
        let (c, off) = self.chunk_for(address)?;
        Ok(c.get_char(off))
    }

    pub fn put_char(&self, address: u64, value: u16) -> Result<()> {
        let (c, off) = self.chunk_for_write(address)?;
        c.put_char(off, value);
        Ok(())
    }

    /// Unsigned 24-bit value.
    pub fn get_3byte(&self, address: u64) -> Result<u32> {
        let (c, off) = self.chunk_for(address)?;
        Ok(c.get_3byte(off))
    }

    pub fn put_3byte(&self, address: u64, value: u32) -> Result<()> {
        let (c, off) = self.chunk_for_write(address)?;
        c.put_3byte(off, value);
        Ok(())
    }

    pub fn get_int(&self, address: u64) -> Result<i32> {
        let (c, off) = self.chunk_for(address)?;
        Ok(c.get_int(off))
    }

    pub fn put_int(&self, address: u64, value: i32) -> Result<()> {
        let (c, off) = self.chunk_for_write(address)?;
        c.put_int(off, value);
        Ok(())
    }

    pub fn get_long(&self, address: u64) -> Result<i64> {
        let (c, off) = self.chunk_for(address)?;
        Ok(c.get_long(off))
    }

    pub fn put_long(&self, address: u64, value: i64) -> Result<()> {
        let (c, off) = self.chunk_for_write(address)?;
        c.put_long(off, value);
        Ok(())
    }

    pub fn get_float(&self, address: u64) -> Result<f32> {
        Ok(f32::from_bits(self.get_int(address)? as u32))
    }

    pub fn put_float(&self, address: u64, value: f32) -> Result<()> {
        self.put_int(address, value.to_bits() as i32)
    }

    pub fn get_double(&self, address: u64) -> Result<f64> {
        Ok(f64::from_bits(self.get_long(address)? as u64))
    }

    pub fn put_double(&self, address: u64, value: f64) -> Result<()> {
        self.put_long(address, value.to_bits() as i64)
    }

    pub fn get_bytes(&self, address: u64, out: &mut [u8]) -> Result<()> {
        let (c, off) = self.chunk_for(address)?;
        c.get_bytes(off, out);
        Ok(())
    }

    pub fn put_bytes(&self, address: u64, src: &[u8]) -> Result<()> {
        let (c, off) = self.chunk_for_write(address)?;
        c.put_bytes(off, src);
        Ok(())
    }

    /// Zero `len` bytes starting at `address`.
    pub fn clear(&self, address: u64, len: usize) -> Result<()> {
        debug_assert!((address & OFFSET_IN_CHUNK_MASK) as usize + len <= CHUNK_SIZE);
        let (c, off) = self.chunk_for_write(address)?;
        c.clear(off, len);
        Ok(())
    }

    /// Read a record pointer stored in its compressed 4-byte form.
    pub fn get_rec_ptr(&self, address: u64) -> Result<u64> {
        let (c, off) = self.chunk_for(address)?;
        Ok(expand_rec_ptr(c.get_u32(off)))
    }

    pub fn put_rec_ptr(&self, address: u64, value: u64) -> Result<()> {
        let compressed = compress_rec_ptr(value)?;
        let (c, off) = self.chunk_for_write(address)?;
        c.put_u32(off, compressed);
        Ok(())
    }

    /// Read a free-block pointer (a raw, 8-aligned block address).
    pub fn get_free_rec_ptr(&self, address: u64) -> Result<u64> {
        let (c, off) = self.chunk_for(address)?;
        Ok(u64::from(c.get_u32(off)) << BLOCK_SIZE_DELTA_BITS)
    }

    pub fn put_free_rec_ptr(&self, address: u64, value: u64) -> Result<()> {
        debug_assert_eq!(value % BLOCK_SIZE_DELTA as u64, 0);
        let compressed = (value >> BLOCK_SIZE_DELTA_BITS) as u32;
        let (c, off) = self.chunk_for_write(address)?;
        c.put_u32(off, compressed);
        Ok(())
    }

    /// CRC32 of every chunk, in index order (header first).
    pub fn chunk_checksums(&self) -> Result<Vec<(u64, u32)>> {
        let mut out = Vec::with_capacity(self.chunk_count() as usize);
        for index in 0..self.chunk_count() {
            out.push((index, self.get_chunk(index)?.crc()));
        }
        Ok(out)
    }
}

pub(crate) fn expand_rec_ptr(stored: u32) -> u64 {
    if stored == 0 {
        0
    } else {
        (u64::from(stored) << BLOCK_SIZE_DELTA_BITS)
            + BLOCK_HEADER_SIZE as u64
    }
}

pub(crate) fn compress_rec_ptr(value: u64) -> Result<u32> {
    if value == 0 {
        return Ok(0);
    }
    let block = value - BLOCK_HEADER_SIZE as u64;
    let compressed = block >> BLOCK_SIZE_DELTA_BITS;
    u32::try_from(compressed).map_err(|_| NdError::CorruptBlock {
        address: value,
        reason: "record address outside the compressed pointer range".into(),
    })
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("closing {} failed: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("chunks", &self.chunk_count())
            .field("read_only", &self.read_only)
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}
