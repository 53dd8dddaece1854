//! Layout constants of the database file (header chunk, blocks, pointers).

// -------- Primitive sizes --------
pub const BYTE_SIZE: usize = 1;
pub const SHORT_SIZE: usize = 2;
pub const CHAR_SIZE: usize = 2;
pub const INT_SIZE: usize = 4;
pub const LONG_SIZE: usize = 8;
pub const FLOAT_SIZE: usize = 4;
pub const DOUBLE_SIZE: usize = 8;
/// Stored size of a (compressed) record pointer.
pub const PTR_SIZE: usize = 4;

// -------- Chunks --------
pub const CHUNK_SIZE: usize = 4096;
pub const CHUNK_SIZE_U64: u64 = CHUNK_SIZE as u64;
pub const OFFSET_IN_CHUNK_MASK: u64 = CHUNK_SIZE_U64 - 1;
/// Chunk 0 holds the header; data starts at chunk 1.
pub const NUM_HEADER_CHUNKS: u64 = 1;

// -------- Blocks --------
pub const BLOCK_HEADER_SIZE: usize = SHORT_SIZE;
pub const BLOCK_SIZE_DELTA_BITS: u32 = 3;
pub const BLOCK_SIZE_DELTA: usize = 1 << BLOCK_SIZE_DELTA_BITS;
// Free blocks keep [size i16][prev ptr][next ptr]
pub const BLOCK_PREV_OFFSET: u64 = BLOCK_HEADER_SIZE as u64;
pub const BLOCK_NEXT_OFFSET: u64 = BLOCK_PREV_OFFSET + INT_SIZE as u64;
pub const FREE_BLOCK_HEADER_SIZE: usize = BLOCK_NEXT_OFFSET as usize + INT_SIZE;
pub const MIN_BLOCK_DELTAS: usize = (FREE_BLOCK_HEADER_SIZE + BLOCK_SIZE_DELTA - 1) / BLOCK_SIZE_DELTA;
pub const MAX_BLOCK_DELTAS: usize = CHUNK_SIZE / BLOCK_SIZE_DELTA;
pub const MAX_MALLOC_SIZE: usize = MAX_BLOCK_DELTAS * BLOCK_SIZE_DELTA - BLOCK_HEADER_SIZE;

/// Highest chunk index whose addresses still fit the 32-bit compressed pointers.
pub const MAX_CHUNK_COUNT: u64 = (1u64 << (32 + BLOCK_SIZE_DELTA_BITS)) / CHUNK_SIZE_U64;

// -------- Header chunk --------
pub const VERSION_OFFSET: u64 = 0;
pub const FREE_BLOCK_OFFSET: u64 = VERSION_OFFSET + INT_SIZE as u64;
pub const FREE_LIST_CLASSES: usize = MAX_BLOCK_DELTAS - MIN_BLOCK_DELTAS + 1;
pub const WRITE_NUMBER_OFFSET: u64 = FREE_BLOCK_OFFSET + (FREE_LIST_CLASSES * INT_SIZE) as u64;
/// First header byte available to callers for their own roots (B-tree root pointers etc.).
pub const DATA_AREA_OFFSET: u64 = WRITE_NUMBER_OFFSET + LONG_SIZE as u64;

// -------- Graph nodes --------
/// Every node record starts with its u16 type code.
pub const NODE_TYPE_OFFSET: u64 = 0;
pub const NODE_HEADER_SIZE: usize = SHORT_SIZE;

// -------- Lock controller --------
pub const CANCELLATION_CHECK_INTERVAL_MS: u64 = 500;
pub const BLOCKED_WRITE_LOCK_OUTPUT_INTERVAL_MS: u64 = 30_000;
pub const LONG_WRITE_LOCK_REPORT_THRESHOLD_MS: u64 = 1_000;
pub const LONG_READ_LOCK_WAIT_REPORT_THRESHOLD_MS: u64 = 1_000;

// -------- Chunk cache --------
pub const DEFAULT_CHUNK_CACHE_BYTES: usize = 64 * 1024 * 1024;
