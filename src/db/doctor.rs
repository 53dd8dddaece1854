//! db/doctor: consistency scan of the block layout.
//!
//! - Every data chunk must be tiled exactly by blocks whose headers hold a
//!   non-zero multiple of the delta size.
//! - Every free list must be a well-formed doubly linked list of positive
//!   blocks of its class, and must contain every free block found by tiling.
//!
//! Only reads; safe on databases opened read-only.

use std::collections::HashSet;

use serde::Serialize;

use crate::consts::{
    BLOCK_NEXT_OFFSET, BLOCK_PREV_OFFSET, BLOCK_SIZE_DELTA, CHUNK_SIZE, CHUNK_SIZE_U64,
    MAX_BLOCK_DELTAS, MIN_BLOCK_DELTAS, NUM_HEADER_CHUNKS,
};
use crate::db::core::Database;
use crate::error::Result;

/// Report entries are capped so a badly damaged file stays readable.
const MAX_ISSUES: usize = 100;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    pub chunks_total: u64,
    pub blocks_used: u64,
    pub blocks_free: u64,
    pub bytes_used: u64,
    pub bytes_free: u64,
    pub free_list_blocks: u64,
    pub issues: Vec<String>,
}

impl DoctorReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn issue(&mut self, msg: String) {
        if self.issues.len() < MAX_ISSUES {
            self.issues.push(msg);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FreeListSummary {
    pub deltas: usize,
    pub block_size: usize,
    pub blocks: u64,
}

impl Database {
    pub fn doctor(&self) -> Result<DoctorReport> {
        let mut rep = DoctorReport {
            chunks_total: self.chunk_count(),
            ..Default::default()
        };

        let mut free_blocks: HashSet<u64> = HashSet::new();
        for index in NUM_HEADER_CHUNKS..self.chunk_count() {
            let base = index * CHUNK_SIZE_U64;
            let mut off = 0usize;
            while off < CHUNK_SIZE {
                let block = base + off as u64;
                let h = self.get_short(block)?;
                let size = usize::from(h.unsigned_abs());
                if size == 0 || size % BLOCK_SIZE_DELTA != 0 || off + size > CHUNK_SIZE {
                    rep.issue(format!(
                        "chunk {}: bad block header {} at offset {}",
                        index, h, off
                    ));
                    break;
                }
                if h < 0 {
                    rep.blocks_used += 1;
                    rep.bytes_used += size as u64;
                } else {
                    rep.blocks_free += 1;
                    rep.bytes_free += size as u64;
                    free_blocks.insert(block);
                }
                off += size;
            }
        }

        let mut listed: HashSet<u64> = HashSet::new();
        for deltas in MIN_BLOCK_DELTAS..=MAX_BLOCK_DELTAS {
            let mut prev = 0u64;
            let mut cur = self.free_list_head(deltas)?;
            while cur != 0 {
                if !listed.insert(cur) {
                    rep.issue(format!("free list {}: block {} linked twice", deltas, cur));
                    break;
                }
                if cur < NUM_HEADER_CHUNKS * CHUNK_SIZE_U64 || cur / CHUNK_SIZE_U64 >= self.chunk_count() {
                    rep.issue(format!("free list {}: pointer {} out of range", deltas, cur));
                    break;
                }
                let h = self.get_short(cur)?;
                if h as i64 != (deltas * BLOCK_SIZE_DELTA) as i64 {
                    rep.issue(format!(
                        "free list {}: block {} has header {}",
                        deltas, cur, h
                    ));
                }
                let back = self.get_free_rec_ptr(cur + BLOCK_PREV_OFFSET)?;
                if back != prev {
                    rep.issue(format!(
                        "free list {}: block {} prev is {} expected {}",
                        deltas, cur, back, prev
                    ));
                }
                if !free_blocks.contains(&cur) {
                    rep.issue(format!(
                        "free list {}: block {} is not a free block of the tiling",
                        deltas, cur
                    ));
                }
                rep.free_list_blocks += 1;
                prev = cur;
                cur = self.get_free_rec_ptr(cur + BLOCK_NEXT_OFFSET)?;
            }
        }

        let mut orphans: Vec<u64> = free_blocks.difference(&listed).copied().collect();
        orphans.sort_unstable();
        for block in orphans {
            rep.issue(format!("free block {} is on no free list", block));
        }

        Ok(rep)
    }

    /// Non-empty free lists with their lengths.
    pub fn free_list_summary(&self) -> Result<Vec<FreeListSummary>> {
        let mut out = Vec::new();
        let limit = self.chunk_count() * (CHUNK_SIZE / (MIN_BLOCK_DELTAS * BLOCK_SIZE_DELTA)) as u64;
        for deltas in MIN_BLOCK_DELTAS..=MAX_BLOCK_DELTAS {
            let mut blocks = 0u64;
            let mut cur = self.free_list_head(deltas)?;
            // a cycle would never end; the bound is the most blocks that can exist
            while cur != 0 && blocks <= limit {
                blocks += 1;
                cur = self.get_free_rec_ptr(cur + BLOCK_NEXT_OFFSET)?;
            }
            if blocks > 0 {
                out.push(FreeListSummary {
                    deltas,
                    block_size: deltas * BLOCK_SIZE_DELTA,
                    blocks,
                });
            }
        }
        Ok(out)
    }
}
