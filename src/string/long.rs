//! Chained strings for payloads that do not fit one record.
//!
//! Head record:         `[i32 length][ptr next][payload]`
//! Continuation record: `[ptr next][payload]`
//!
//! Every record but the last is a full `MAX_MALLOC_SIZE` block.

use crate::consts::{INT_SIZE, MAX_MALLOC_SIZE, PTR_SIZE};
use crate::db::{Database, PoolTag};
use crate::error::{NdError, Result};

use super::{decode, encode, record_capacity, signed_len};

const LENGTH: u64 = 0;
const NEXT1: u64 = INT_SIZE as u64;
const CHARS1: u64 = NEXT1 + PTR_SIZE as u64;
const NEXTN: u64 = 0;
const CHARSN: u64 = PTR_SIZE as u64;

/// Bytes in front of the head payload.
pub(crate) const HEAD_HEADER_SIZE: usize = CHARS1 as usize;
/// Payload bytes of the head record.
pub(crate) const HEAD_CAPACITY: usize = MAX_MALLOC_SIZE - CHARS1 as usize;
/// Payload bytes of a continuation record.
pub(crate) const CONTINUATION_CAPACITY: usize = MAX_MALLOC_SIZE - CHARSN as usize;

pub(super) fn write(db: &Database, chars: &[u16], wide: bool) -> Result<u64> {
    let bytes = encode(chars, wide);
    let head_len = bytes.len().min(HEAD_CAPACITY);

    let head = db.malloc(CHARS1 as usize + head_len, PoolTag::STRING_LONG)?;
    db.put_int(head + LENGTH, signed_len(chars.len(), wide))?;
    db.put_bytes(head + CHARS1, &bytes[..head_len])?;

    let mut link = head + NEXT1;
    let mut rest = &bytes[head_len..];
    while !rest.is_empty() {
        let n = rest.len().min(CONTINUATION_CAPACITY);
        let rec = db.malloc(CHARSN as usize + n, PoolTag::STRING_LONG)?;
        db.put_bytes(rec + CHARSN, &rest[..n])?;
        db.put_rec_ptr(link, rec)?;
        link = rec + NEXTN;
        rest = &rest[n..];
    }
    Ok(head)
}

pub(super) fn read(db: &Database, record: u64, len: usize, wide: bool) -> Result<Vec<u16>> {
    let total = if wide { len * 2 } else { len };
    let mut buf = vec![0u8; total];

    let head_len = total.min(HEAD_CAPACITY);
    db.get_bytes(record + CHARS1, &mut buf[..head_len])?;

    let mut filled = head_len;
    let mut next = db.get_rec_ptr(record + NEXT1)?;
    while filled < total && next != 0 {
        let n = (total - filled).min(CONTINUATION_CAPACITY);
        if record_capacity(db, next)? < CHARSN as usize + n {
            return Err(NdError::CorruptBlock {
                address: next,
                reason: format!("string continuation too small for {} bytes", n),
            });
        }
        db.get_bytes(next + CHARSN, &mut buf[filled..filled + n])?;
        filled += n;
        next = db.get_rec_ptr(next + NEXTN)?;
    }
    if filled < total {
        return Err(NdError::CorruptBlock {
            address: record,
            reason: format!("string chain ends after {} of {} bytes", filled, total),
        });
    }
    Ok(decode(&buf, wide))
}

pub(super) fn delete(db: &Database, record: u64) -> Result<()> {
    let mut next = db.get_rec_ptr(record + NEXT1)?;
    db.free(record, PoolTag::STRING_LONG)?;
    while next != 0 {
        let after = db.get_rec_ptr(next + NEXTN)?;
        db.free(next, PoolTag::STRING_LONG)?;
        next = after;
    }
    Ok(())
}
