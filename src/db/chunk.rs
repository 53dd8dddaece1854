//! db/chunk: one cached 4 KiB page of the backing file.
//!
//! A chunk is a dumb byte array plus two flags:
//! - `dirty`: modified since the last successful flush.
//! - `locked`: pinned by an exclusive writer; the cache never evicts it.
//!
//! Accessors take the offset within the chunk; all values are big-endian.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use parking_lot::RwLock;

use crate::consts::CHUNK_SIZE;
use crate::db::file::BackingFile;
use crate::error::Result;
use crate::metrics::{record_chunk_flush, record_chunk_flush_failure, record_chunk_read};

pub struct Chunk {
    index: u64,
    db_id: u64,
    file: Arc<BackingFile>,
    data: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
    locked: AtomicBool,
}

impl Chunk {
    /// A zero-filled chunk that only exists in memory so far.
    pub(crate) fn new_empty(db_id: u64, index: u64, file: Arc<BackingFile>) -> Self {
        Self {
            index,
            db_id,
            file,
            data: RwLock::new(vec![0u8; CHUNK_SIZE].into_boxed_slice()),
            dirty: AtomicBool::new(false),
            locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn load(db_id: u64, index: u64, file: Arc<BackingFile>) -> Result<Self> {
        let chunk = Self::new_empty(db_id, index, file);
        {
            let mut buf = chunk.data.write();
            chunk.file.read_chunk(index, &mut buf)?;
        }
        record_chunk_read();
        debug!("chunk {} of db {} loaded", index, db_id);
        Ok(chunk)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub(crate) fn db_id(&self) -> u64 {
        self.db_id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Pin the chunk. Returns true if it was not pinned before.
    pub(crate) fn pin(&self) -> bool {
        !self.locked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn unpin(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Write the chunk back if dirty. On failure it stays dirty.
    pub(crate) fn flush(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let buf = self.data.read();
        match self.file.write_chunk(self.index, &buf) {
            Ok(()) => {
                self.dirty.store(false, Ordering::Release);
                record_chunk_flush();
                Ok(())
            }
            Err(e) => {
                record_chunk_flush_failure();
                Err(e)
            }
        }
    }

    /// CRC32 over the chunk bytes.
    pub fn crc(&self) -> u32 {
        crc32fast::hash(&self.data.read())
    }

    // ----- accessors -----

    pub(crate) fn get_byte(&self, off: usize) -> u8 {
        self.data.read()[off]
    }

    pub(crate) fn put_byte(&self, off: usize, v: u8) {
        self.data.write()[off] = v;
        self.mark_dirty();
    }

    pub(crate) fn get_short(&self, off: usize) -> i16 {
        BigEndian::read_i16(&self.data.read()[off..off + 2])
    }

    pub(crate) fn put_short(&self, off: usize, v: i16) {
        BigEndian::write_i16(&mut self.data.write()[off..off + 2], v);
        self.mark_dirty();
    }

    pub(crate) fn get_char(&self, off: usize) -> u16 {
        BigEndian::read_u16(&self.data.read()[off..off + 2])
    }

    pub(crate) fn put_char(&self, off: usize, v: u16) {
        BigEndian::write_u16(&mut self.data.write()[off..off + 2], v);
        self.mark_dirty();
    }

    pub(crate) fn get_3byte(&self, off: usize) -> u32 {
        BigEndian::read_u24(&self.data.read()[off..off + 3])
    }

    pub(crate) fn put_3byte(&self, off: usize, v: u32) {
        BigEndian::write_u24(&mut self.data.write()[off..off + 3], v & 0x00ff_ffff);
        self.mark_dirty();
    }

    pub(crate) fn get_int(&self, off: usize) -> i32 {
        BigEndian::read_i32(&self.data.read()[off..off + 4])
    }

    pub(crate) fn put_int(&self, off: usize, v: i32) {
        BigEndian::write_i32(&mut self.data.write()[off..off + 4], v);
        self.mark_dirty();
    }

    pub(crate) fn get_u32(&self, off: usize) -> u32 {
        BigEndian::read_u32(&self.data.read()[off..off + 4])
    }

    pub(crate) fn put_u32(&self, off: usize, v: u32) {
        BigEndian::write_u32(&mut self.data.write()[off..off + 4], v);
        self.mark_dirty();
    }

    pub(crate) fn get_long(&self, off: usize) -> i64 {
        BigEndian::read_i64(&self.data.read()[off..off + 8])
    }

    pub(crate) fn put_long(&self, off: usize, v: i64) {
        BigEndian::write_i64(&mut self.data.write()[off..off + 8], v);
        self.mark_dirty();
    }

    pub(crate) fn get_bytes(&self, off: usize, out: &mut [u8]) {
        out.copy_from_slice(&self.data.read()[off..off + out.len()]);
    }

    pub(crate) fn put_bytes(&self, off: usize, src: &[u8]) {
        self.data.write()[off..off + src.len()].copy_from_slice(src);
        self.mark_dirty();
    }

    pub(crate) fn clear(&self, off: usize, len: usize) {
        self.data.write()[off..off + len].fill(0);
        self.mark_dirty();
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("index", &self.index)
            .field("db_id", &self.db_id)
            .field("dirty", &self.is_dirty())
            .field("locked", &self.is_locked())
            .finish()
    }
}
