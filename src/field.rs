//! Typed fields at fixed offsets inside a record.
//!
//! A `StructLayout` hands out descriptors at consecutive offsets; each one
//! knows its offset and how to read and write its value through a
//! `Database`. Node layouts start after the type code.
//!
//! Edge fields:
//! - `PointerField`: plain record pointer, no ownership
//! - `OwnedPointerField`: the holder owns the target and destroys it
//! - `ReferenceField`: counted edge maintaining the target's `RefCountField`
//! - `StringField`: owned `DbString`

use std::marker::PhantomData;

use crate::consts::{
    BYTE_SIZE, CHAR_SIZE, DOUBLE_SIZE, FLOAT_SIZE, INT_SIZE, LONG_SIZE, NODE_HEADER_SIZE,
    NODE_TYPE_OFFSET, PTR_SIZE, SHORT_SIZE,
};
use crate::db::Database;
use crate::error::Result;
use crate::nd::Nd;
use crate::string::DbString;

/// Primitive that can live in a record field.
pub trait FieldValue: Copy {
    const SIZE: usize;

    fn read(db: &Database, address: u64) -> Result<Self>;
    fn write(db: &Database, address: u64, value: Self) -> Result<()>;
}

macro_rules! field_value {
    ($t:ty, $size:expr, $get:ident, $put:ident) => {
        impl FieldValue for $t {
            const SIZE: usize = $size;

            fn read(db: &Database, address: u64) -> Result<Self> {
                db.$get(address)
            }

            fn write(db: &Database, address: u64, value: Self) -> Result<()> {
                db.$put(address, value)
            }
        }
    };
}

field_value!(u8, BYTE_SIZE, get_byte, put_byte);
field_value!(i16, SHORT_SIZE, get_short, put_short);
field_value!(u16, CHAR_SIZE, get_char, put_char);
field_value!(i32, INT_SIZE, get_int, put_int);
field_value!(i64, LONG_SIZE, get_long, put_long);
field_value!(f32, FLOAT_SIZE, get_float, put_float);
field_value!(f64, DOUBLE_SIZE, get_double, put_double);

/// Type code stored at the start of every node.
pub const NODE_TYPE: Field<u16> = Field {
    offset: NODE_TYPE_OFFSET,
    _t: PhantomData,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct StructLayout {
    size: usize,
}

impl StructLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout of a graph node: the type code comes first.
    pub fn node() -> Self {
        Self { size: NODE_HEADER_SIZE }
    }

    /// Continue after the fields of a parent layout.
    pub fn extending(parent: &StructLayout) -> Self {
        Self { size: parent.size }
    }

    fn reserve(&mut self, bytes: usize) -> u64 {
        let offset = self.size as u64;
        self.size += bytes;
        offset
    }

    pub fn add<T: FieldValue>(&mut self) -> Field<T> {
        Field {
            offset: self.reserve(T::SIZE),
            _t: PhantomData,
        }
    }

    pub fn add_pointer(&mut self) -> PointerField {
        PointerField {
            offset: self.reserve(PTR_SIZE),
        }
    }

    pub fn add_ref_count(&mut self) -> RefCountField {
        RefCountField {
            count: self.add::<i32>(),
        }
    }

    pub fn add_owned_pointer(&mut self) -> OwnedPointerField {
        OwnedPointerField {
            ptr: self.add_pointer(),
        }
    }

    /// Counted edge to nodes whose reference count lives in `target_count`.
    pub fn add_reference(&mut self, target_count: RefCountField) -> ReferenceField {
        ReferenceField {
            ptr: self.add_pointer(),
            target_count,
        }
    }

    pub fn add_string(&mut self) -> StringField {
        StringField {
            ptr: self.add_pointer(),
        }
    }

    /// Bytes a record of this layout needs.
    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Debug)]
pub struct Field<T> {
    offset: u64,
    _t: PhantomData<T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T: FieldValue> Field<T> {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get(&self, db: &Database, record: u64) -> Result<T> {
        T::read(db, record + self.offset)
    }

    pub fn put(&self, db: &Database, record: u64, value: T) -> Result<()> {
        T::write(db, record + self.offset, value)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PointerField {
    offset: u64,
}

impl PointerField {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get(&self, db: &Database, record: u64) -> Result<u64> {
        db.get_rec_ptr(record + self.offset)
    }

    pub fn put(&self, db: &Database, record: u64, value: u64) -> Result<()> {
        db.put_rec_ptr(record + self.offset, value)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RefCountField {
    count: Field<i32>,
}

impl RefCountField {
    pub fn get(&self, db: &Database, record: u64) -> Result<i32> {
        self.count.get(db, record)
    }

    pub fn increment(&self, db: &Database, record: u64) -> Result<i32> {
        let n = self.count.get(db, record)? + 1;
        self.count.put(db, record, n)?;
        Ok(n)
    }

    pub fn decrement(&self, db: &Database, record: u64) -> Result<i32> {
        let n = self.count.get(db, record)? - 1;
        debug_assert!(n >= 0, "reference count of {} went negative", record);
        self.count.put(db, record, n)?;
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OwnedPointerField {
    ptr: PointerField,
}

impl OwnedPointerField {
    pub fn get(&self, db: &Database, record: u64) -> Result<u64> {
        self.ptr.get(db, record)
    }

    /// Point at a new child. A previous child is scheduled for deletion.
    pub fn put(&self, nd: &Nd, record: u64, child: u64) -> Result<()> {
        let old = self.ptr.get(nd.db(), record)?;
        if old == child {
            return Ok(());
        }
        self.ptr.put(nd.db(), record, child)?;
        if old != 0 {
            nd.schedule_deletion(old);
        }
        Ok(())
    }

    /// Detach the child and queue it for deletion.
    pub fn destruct(&self, nd: &Nd, record: u64) -> Result<()> {
        self.put(nd, record, 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReferenceField {
    ptr: PointerField,
    target_count: RefCountField,
}

impl ReferenceField {
    pub fn get(&self, db: &Database, record: u64) -> Result<u64> {
        self.ptr.get(db, record)
    }

    /// Retarget the edge. The new target gains a reference; the old one
    /// loses one and is scheduled for deletion when nothing refers to it.
    pub fn put(&self, nd: &Nd, record: u64, target: u64) -> Result<()> {
        let db = nd.db();
        let old = self.ptr.get(db, record)?;
        if old == target {
            return Ok(());
        }
        if target != 0 {
            self.target_count.increment(db, target)?;
        }
        self.ptr.put(db, record, target)?;
        if old != 0 && self.target_count.decrement(db, old)? == 0 {
            nd.schedule_deletion(old);
        }
        Ok(())
    }

    pub fn destruct(&self, nd: &Nd, record: u64) -> Result<()> {
        self.put(nd, record, 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StringField {
    ptr: PointerField,
}

impl StringField {
    pub fn get<'a>(&self, db: &'a Database, record: u64) -> Result<Option<DbString<'a>>> {
        match self.ptr.get(db, record)? {
            0 => Ok(None),
            s => db.get_string(s).map(Some),
        }
    }

    /// Store a copy of `value`, deleting the previous string.
    pub fn put(&self, db: &Database, record: u64, value: Option<&str>) -> Result<()> {
        if let Some(old) = self.get(db, record)? {
            if let Some(v) = value {
                if old.eq_str(v)? {
                    return Ok(());
                }
            }
            old.delete()?;
        }
        let new = match value {
            Some(v) => db.new_string(v)?.record(),
            None => 0,
        };
        self.ptr.put(db, record, new)
    }

    pub fn destruct(&self, db: &Database, record: u64) -> Result<()> {
        self.put(db, record, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets() {
        let mut base = StructLayout::node();
        let count = base.add_ref_count();
        let flags = base.add::<u8>();
        let mut child = StructLayout::extending(&base);
        let name = child.add_string();
        let weight = child.add::<f64>();
        let owner = child.add_reference(count);

        assert_eq!(NODE_TYPE.offset(), 0);
        assert_eq!(count.count.offset(), 2);
        assert_eq!(flags.offset(), 6);
        assert_eq!(name.ptr.offset(), 7);
        assert_eq!(weight.offset(), 11);
        assert_eq!(owner.ptr.offset(), 19);
        assert_eq!(base.size(), 7);
        assert_eq!(child.size(), 23);
    }
}
