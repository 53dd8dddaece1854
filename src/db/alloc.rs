//! db/alloc: block allocator on top of the chunk cache.
//!
//! Blocks are measured in 8-byte deltas and never span chunks. Each size
//! class (2..=512 deltas) has a doubly linked free list; the links live in
//! the freed blocks themselves and the heads in the header chunk. Adjacent
//! free blocks are not coalesced.
//!
//! Block header: i16 size, negative while allocated, positive while free.

use log::trace;

use crate::consts::{
    BLOCK_HEADER_SIZE, BLOCK_NEXT_OFFSET, BLOCK_PREV_OFFSET, BLOCK_SIZE_DELTA, CHUNK_SIZE_U64,
    MAX_BLOCK_DELTAS, MAX_CHUNK_COUNT, MAX_MALLOC_SIZE, MIN_BLOCK_DELTAS,
};
use crate::db::core::Database;
use crate::db::PoolTag;
use crate::error::{NdError, Result};
use crate::metrics::{record_chunk_created, record_free, record_malloc};

/// Number of deltas a block needs to hold `size` payload bytes.
pub(crate) fn deltas_for(size: usize) -> usize {
    (size + BLOCK_HEADER_SIZE)
        .div_ceil(BLOCK_SIZE_DELTA)
        .max(MIN_BLOCK_DELTAS)
}

impl Database {
    /// Allocate `size` zeroed bytes and return the record address.
    pub fn malloc(&self, size: usize, pool: PoolTag) -> Result<u64> {
        if size > MAX_MALLOC_SIZE {
            return Err(NdError::MallocTooLarge {
                requested: size,
                max: MAX_MALLOC_SIZE,
            });
        }
        self.assert_exclusive();

        let need = deltas_for(size);
        let mut found = None;
        for deltas in need..=MAX_BLOCK_DELTAS {
            let head = self.free_list_head(deltas)?;
            if head != 0 {
                found = Some((head, deltas));
                break;
            }
        }

        let (block, mut use_deltas) = match found {
            Some((block, deltas)) => {
                self.remove_block(block, deltas)?;
                (block, deltas)
            }
            None => (self.create_new_chunk()?, MAX_BLOCK_DELTAS),
        };

        let unused = use_deltas - need;
        if unused >= MIN_BLOCK_DELTAS {
            self.add_block(block + (need * BLOCK_SIZE_DELTA) as u64, unused)?;
            use_deltas = need;
        }

        let used_size = use_deltas * BLOCK_SIZE_DELTA;
        self.put_short(block, -(used_size as i16))?;
        self.clear(
            block + BLOCK_HEADER_SIZE as u64,
            used_size - BLOCK_HEADER_SIZE,
        )?;

        self.account_malloc(pool, used_size);
        record_malloc(used_size);
        let address = block + BLOCK_HEADER_SIZE as u64;
        trace!("malloc {} bytes ({} deltas) at {} pool {:?}", size, use_deltas, address, pool);
        Ok(address)
    }

    /// Return a record to its size-class free list.
    pub fn free(&self, address: u64, pool: PoolTag) -> Result<()> {
        self.assert_exclusive();
        if address < CHUNK_SIZE_U64 + BLOCK_HEADER_SIZE as u64 {
            return Err(NdError::CorruptBlock {
                address,
                reason: "not a data record address".into(),
            });
        }
        let block = address - BLOCK_HEADER_SIZE as u64;
        let header = self.get_short(block)?;
        if header >= 0 {
            return Err(NdError::DoubleFree { address });
        }
        let size = usize::from(header.unsigned_abs());
        if size % BLOCK_SIZE_DELTA != 0 || size / BLOCK_SIZE_DELTA < MIN_BLOCK_DELTAS {
            return Err(NdError::CorruptBlock {
                address,
                reason: format!("invalid block size {}", size),
            });
        }
        self.add_block(block, size / BLOCK_SIZE_DELTA)?;

        self.account_free(pool, size);
        record_free(size);
        trace!("free {} ({} bytes) pool {:?}", address, size, pool);
        Ok(())
    }

    /// Raw block header of the record at `address` (negative while in use).
    pub fn block_info(&self, address: u64) -> Result<i16> {
        self.get_short(address - BLOCK_HEADER_SIZE as u64)
    }

    pub fn set_block_info(&self, address: u64, value: i16) -> Result<()> {
        self.put_short(address - BLOCK_HEADER_SIZE as u64, value)
    }

    /// Push a block on the head of its class list and mark it free.
    fn add_block(&self, block: u64, deltas: usize) -> Result<()> {
        let size = deltas * BLOCK_SIZE_DELTA;
        self.put_short(block, size as i16)?;

        let old_head = self.free_list_head(deltas)?;
        self.put_free_rec_ptr(block + BLOCK_PREV_OFFSET, 0)?;
        self.put_free_rec_ptr(block + BLOCK_NEXT_OFFSET, old_head)?;
        if old_head != 0 {
            self.put_free_rec_ptr(old_head + BLOCK_PREV_OFFSET, block)?;
        }
        self.set_free_list_head(deltas, block)
    }

    /// Unlink a free block from its class list.
    fn remove_block(&self, block: u64, deltas: usize) -> Result<()> {
        let prev = self.get_free_rec_ptr(block + BLOCK_PREV_OFFSET)?;
        let next = self.get_free_rec_ptr(block + BLOCK_NEXT_OFFSET)?;
        if prev != 0 {
            self.put_free_rec_ptr(prev + BLOCK_NEXT_OFFSET, next)?;
        } else {
            self.set_free_list_head(deltas, next)?;
        }
        if next != 0 {
            self.put_free_rec_ptr(next + BLOCK_PREV_OFFSET, prev)?;
        }
        Ok(())
    }

    /// Append a zeroed chunk and return the address of its first block.
    fn create_new_chunk(&self) -> Result<u64> {
        let index = self.chunk_count();
        if index >= MAX_CHUNK_COUNT {
            return Err(NdError::DatabaseFull { chunk: index });
        }
        self.insert_new_chunk(index)?;
        self.chunk_count
            .store(index + 1, std::sync::atomic::Ordering::Release);
        record_chunk_created();
        trace!("db {} grew to {} chunks", self.id, index + 1);
        Ok(index * CHUNK_SIZE_U64)
    }
}
