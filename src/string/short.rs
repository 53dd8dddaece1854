//! Single-record strings: `[i32 length][payload]`.

use crate::consts::INT_SIZE;
use crate::db::{Database, PoolTag};
use crate::error::Result;

use super::{decode, encode, signed_len};

const LENGTH: u64 = 0;
const CHARS: u64 = INT_SIZE as u64;

pub(super) fn write(db: &Database, chars: &[u16], wide: bool) -> Result<u64> {
    let bytes = encode(chars, wide);
    let record = db.malloc(CHARS as usize + bytes.len(), PoolTag::STRING_SHORT)?;
    db.put_int(record + LENGTH, signed_len(chars.len(), wide))?;
    db.put_bytes(record + CHARS, &bytes)?;
    Ok(record)
}

pub(super) fn read(db: &Database, record: u64, len: usize, wide: bool) -> Result<Vec<u16>> {
    let mut buf = vec![0u8; if wide { len * 2 } else { len }];
    db.get_bytes(record + CHARS, &mut buf)?;
    Ok(decode(&buf, wide))
}

pub(super) fn delete(db: &Database, record: u64) -> Result<()> {
    db.free(record, PoolTag::STRING_SHORT)
}
