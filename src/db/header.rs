//! db/header: fields of chunk 0.
//!
//! Layout:
//! - 0     i32 format version
//! - 4     free-list heads, one compressed block pointer per size class
//! - 2048  i64 write number
//! - 2056  free for callers (index roots and similar)

use crate::consts::{
    FREE_BLOCK_OFFSET, INT_SIZE, MAX_BLOCK_DELTAS, MIN_BLOCK_DELTAS, VERSION_OFFSET,
    WRITE_NUMBER_OFFSET,
};
use crate::db::core::Database;
use crate::error::Result;

/// Header address of the free-list head for blocks of `deltas` deltas.
pub(crate) fn free_list_slot(deltas: usize) -> u64 {
    debug_assert!((MIN_BLOCK_DELTAS..=MAX_BLOCK_DELTAS).contains(&deltas));
    FREE_BLOCK_OFFSET + ((deltas - MIN_BLOCK_DELTAS) * INT_SIZE) as u64
}

impl Database {
    pub fn version(&self) -> i32 {
        self.header.get_int(VERSION_OFFSET as usize)
    }

    pub fn set_version(&self, version: i32) -> Result<()> {
        self.put_int(VERSION_OFFSET, version)
    }

    pub fn write_number(&self) -> i64 {
        self.header.get_long(WRITE_NUMBER_OFFSET as usize)
    }

    pub(crate) fn set_write_number(&self, value: i64) -> Result<()> {
        self.put_long(WRITE_NUMBER_OFFSET, value)
    }

    /// First free block of the given size class, or 0.
    pub fn free_list_head(&self, deltas: usize) -> Result<u64> {
        self.get_free_rec_ptr(free_list_slot(deltas))
    }

    pub(crate) fn set_free_list_head(&self, deltas: usize, block: u64) -> Result<()> {
        self.put_free_rec_ptr(free_list_slot(deltas), block)
    }
}
