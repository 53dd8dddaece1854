//! string: immutable UTF-16 strings stored in database records.
//!
//! The record starts with an i32 length in code units. A negative length
//! means one byte per unit (every unit < 0x100), a positive one two bytes
//! per unit (big-endian). Payloads up to `MAX_BYTE_LENGTH` bytes use a single
//! record, longer ones a chain (see `long.rs`). Equal strings are not shared.

pub mod compare;
mod long;
mod short;

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder};

use crate::consts::{
    BLOCK_HEADER_SIZE, CHUNK_SIZE, CHUNK_SIZE_U64, INT_SIZE, MAX_MALLOC_SIZE, OFFSET_IN_CHUNK_MASK,
};
use crate::db::Database;
use crate::error::{NdError, Result};

pub use self::compare::{fold_case, string_hash};

/// Largest payload, in bytes, stored in a single record.
pub const MAX_BYTE_LENGTH: usize = MAX_MALLOC_SIZE - INT_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Form {
    Short,
    Long,
}

/// Handle to a string record.
#[derive(Clone, Copy)]
pub struct DbString<'a> {
    db: &'a Database,
    record: u64,
    form: Form,
    len: usize,
    wide: bool,
}

impl Database {
    pub fn new_string(&self, s: &str) -> Result<DbString<'_>> {
        let chars: Vec<u16> = s.encode_utf16().collect();
        self.new_string_from_chars(&chars)
    }

    pub fn new_string_from_chars(&self, chars: &[u16]) -> Result<DbString<'_>> {
        let wide = chars.iter().any(|&c| c >= 0x100);
        let form = if byte_len(chars.len(), wide) > MAX_BYTE_LENGTH {
            Form::Long
        } else {
            Form::Short
        };
        let record = match form {
            Form::Short => short::write(self, chars, wide)?,
            Form::Long => long::write(self, chars, wide)?,
        };
        Ok(DbString {
            db: self,
            record,
            form,
            len: chars.len(),
            wide,
        })
    }

    /// Reopen a string record of either form.
    pub fn get_string(&self, record: u64) -> Result<DbString<'_>> {
        if record == 0 {
            return Err(NdError::CorruptBlock {
                address: 0,
                reason: "null string record".into(),
            });
        }
        let capacity = record_capacity(self, record)?;
        if capacity < INT_SIZE {
            return Err(corrupt(record, "record too small for a string"));
        }
        let raw = self.get_int(record)?;
        let wide = raw >= 0;
        let len = raw.unsigned_abs() as usize;
        let bytes = byte_len(len, wide);
        let (form, needed) = if bytes > MAX_BYTE_LENGTH {
            (Form::Long, long::HEAD_HEADER_SIZE + bytes.min(long::HEAD_CAPACITY))
        } else {
            (Form::Short, INT_SIZE + bytes)
        };
        if needed > capacity {
            return Err(corrupt(
                record,
                &format!("string of {} bytes does not fit a {} byte record", bytes, capacity),
            ));
        }
        if bytes as u64 > self.chunk_count() * CHUNK_SIZE_U64 {
            return Err(corrupt(record, &format!("string length {} exceeds the file", len)));
        }
        Ok(DbString {
            db: self,
            record,
            form,
            len,
            wide,
        })
    }
}

impl<'a> DbString<'a> {
    pub fn record(&self) -> u64 {
        self.record
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_long(&self) -> bool {
        self.form == Form::Long
    }

    pub fn chars(&self) -> Result<Vec<u16>> {
        match self.form {
            Form::Short => short::read(self.db, self.record, self.len, self.wide),
            Form::Long => long::read(self.db, self.record, self.len, self.wide),
        }
    }

    /// Decoded content; unpaired surrogates become U+FFFD.
    pub fn to_string_lossy(&self) -> Result<String> {
        Ok(String::from_utf16_lossy(&self.chars()?))
    }

    pub fn hash_code(&self) -> Result<i32> {
        Ok(string_hash(&self.chars()?))
    }

    pub fn compare(&self, other: &DbString<'_>, case_sensitive: bool) -> Result<Ordering> {
        Ok(compare::compare(&self.chars()?, &other.chars()?, case_sensitive))
    }

    pub fn compare_chars(&self, other: &[u16], case_sensitive: bool) -> Result<Ordering> {
        Ok(compare::compare(&self.chars()?, other, case_sensitive))
    }

    pub fn compare_str(&self, other: &str, case_sensitive: bool) -> Result<Ordering> {
        let other: Vec<u16> = other.encode_utf16().collect();
        self.compare_chars(&other, case_sensitive)
    }

    /// `Equal` when this string starts with `prefix`; a shorter string that
    /// matches so far is `Less`.
    pub fn compare_prefix(&self, prefix: &[u16], case_sensitive: bool) -> Result<Ordering> {
        Ok(compare::compare_prefix(&self.chars()?, prefix, case_sensitive))
    }

    pub fn compare_prefix_str(&self, prefix: &str, case_sensitive: bool) -> Result<Ordering> {
        let prefix: Vec<u16> = prefix.encode_utf16().collect();
        self.compare_prefix(&prefix, case_sensitive)
    }

    /// Total order consistent with the case-insensitive one.
    pub fn compare_compatible_with_ignore_case(&self, other: &DbString<'_>) -> Result<Ordering> {
        Ok(compare::compare_compatible_with_ignore_case(
            &self.chars()?,
            &other.chars()?,
        ))
    }

    pub fn compare_compatible_with_ignore_case_chars(&self, other: &[u16]) -> Result<Ordering> {
        Ok(compare::compare_compatible_with_ignore_case(&self.chars()?, other))
    }

    pub fn eq_chars(&self, other: &[u16]) -> Result<bool> {
        if other.len() != self.len {
            return Ok(false);
        }
        Ok(self.chars()? == other)
    }

    pub fn eq_str(&self, other: &str) -> Result<bool> {
        let other: Vec<u16> = other.encode_utf16().collect();
        self.eq_chars(&other)
    }

    /// Free every record of the string.
    pub fn delete(self) -> Result<()> {
        match self.form {
            Form::Short => short::delete(self.db, self.record),
            Form::Long => long::delete(self.db, self.record),
        }
    }
}

impl std::fmt::Debug for DbString<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbString")
            .field("record", &self.record)
            .field("len", &self.len)
            .field("long", &self.is_long())
            .finish()
    }
}

fn corrupt(address: u64, reason: &str) -> NdError {
    NdError::CorruptBlock {
        address,
        reason: reason.to_string(),
    }
}

/// Payload bytes of the allocated block behind `record`.
fn record_capacity(db: &Database, record: u64) -> Result<usize> {
    let in_chunk = (record & OFFSET_IN_CHUNK_MASK) as usize;
    if in_chunk < BLOCK_HEADER_SIZE {
        return Err(corrupt(record, "not a record address"));
    }
    let info = db.block_info(record)?;
    let size = usize::from(info.unsigned_abs());
    if info >= 0 || size < BLOCK_HEADER_SIZE || in_chunk - BLOCK_HEADER_SIZE + size > CHUNK_SIZE {
        return Err(corrupt(record, "not an allocated record"));
    }
    Ok(size - BLOCK_HEADER_SIZE)
}

fn byte_len(len: usize, wide: bool) -> usize {
    if wide {
        len * 2
    } else {
        len
    }
}

fn signed_len(len: usize, wide: bool) -> i32 {
    if wide {
        len as i32
    } else {
        -(len as i32)
    }
}

fn encode(chars: &[u16], wide: bool) -> Vec<u8> {
    if wide {
        let mut out = vec![0u8; chars.len() * 2];
        BigEndian::write_u16_into(chars, &mut out);
        out
    } else {
        chars.iter().map(|&c| c as u8).collect()
    }
}

fn decode(bytes: &[u8], wide: bool) -> Vec<u16> {
    if wide {
        let mut out = vec![0u16; bytes.len() / 2];
        BigEndian::read_u16_into(&bytes[..out.len() * 2], &mut out);
        out
    } else {
        bytes.iter().map(|&b| u16::from(b)).collect()
    }
}
