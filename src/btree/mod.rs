//! btree: disk-resident B-tree over allocator records.
//!
//! The tree stores record addresses only; their order comes from a
//! caller-supplied comparator. Nodes are allocator records of 15 record
//! pointers followed by 16 child pointers (minimum degree 8). The root
//! node address lives at a caller-chosen `root_pointer`.
//!
//! Insertion splits full nodes on the way down. Deletion borrows from or
//! merges with a sibling before descending into a minimal child, so every
//! non-root node keeps at least `MIN_RECORDS` entries.

use std::cmp::Ordering;

use crate::consts::PTR_SIZE;
use crate::db::{Database, PoolTag};
use crate::error::{NdError, Result};

const DEGREE: usize = 8;
pub const MAX_RECORDS: usize = 2 * DEGREE - 1;
pub const MAX_CHILDREN: usize = 2 * DEGREE;
pub const MIN_RECORDS: usize = DEGREE - 1;
const MEDIAN_RECORD: usize = DEGREE - 1;
const OFFSET_CHILDREN: u64 = (MAX_RECORDS * PTR_SIZE) as u64;
pub const NODE_SIZE: usize = (MAX_RECORDS + MAX_CHILDREN) * PTR_SIZE;

/// Orders two records of the tree.
pub trait BTreeComparator {
    fn compare(&self, db: &Database, record1: u64, record2: u64) -> Result<Ordering>;
}

impl<F> BTreeComparator for F
where
    F: Fn(&Database, u64, u64) -> Result<Ordering>,
{
    fn compare(&self, db: &Database, record1: u64, record2: u64) -> Result<Ordering> {
        self(db, record1, record2)
    }
}

/// Drives `BTree::accept`.
pub trait BTreeVisitor {
    /// How `record` relates to what is searched for: `Less` if it sorts
    /// before the target range, `Greater` if after, `Equal` if inside.
    fn compare(&mut self, record: u64) -> Result<Ordering>;

    /// Called for each record comparing `Equal`; `false` stops the traversal.
    fn visit(&mut self, record: u64) -> Result<bool>;
}

pub struct BTree<'a, C> {
    db: &'a Database,
    root_pointer: u64,
    cmp: C,
}

impl<'a, C: BTreeComparator> BTree<'a, C> {
    pub fn new(db: &'a Database, root_pointer: u64, cmp: C) -> Self {
        Self {
            db,
            root_pointer,
            cmp,
        }
    }

    pub fn root(&self) -> Result<u64> {
        self.db.get_rec_ptr(self.root_pointer)
    }

    fn set_root(&self, node: u64) -> Result<()> {
        self.db.put_rec_ptr(self.root_pointer, node)
    }

    // ----- node access -----

    fn rec(&self, node: u64, i: usize) -> Result<u64> {
        self.db.get_rec_ptr(node + (i * PTR_SIZE) as u64)
    }

    fn set_rec(&self, node: u64, i: usize, record: u64) -> Result<()> {
        self.db.put_rec_ptr(node + (i * PTR_SIZE) as u64, record)
    }

    fn child(&self, node: u64, i: usize) -> Result<u64> {
        self.db
            .get_rec_ptr(node + OFFSET_CHILDREN + (i * PTR_SIZE) as u64)
    }

    fn set_child(&self, node: u64, i: usize, child: u64) -> Result<()> {
        self.db
            .put_rec_ptr(node + OFFSET_CHILDREN + (i * PTR_SIZE) as u64, child)
    }

    fn count(&self, node: u64) -> Result<usize> {
        for i in 0..MAX_RECORDS {
            if self.rec(node, i)? == 0 {
                return Ok(i);
            }
        }
        Ok(MAX_RECORDS)
    }

    fn is_leaf(&self, node: u64) -> Result<bool> {
        Ok(self.child(node, 0)? == 0)
    }

    fn allocate_node(&self) -> Result<u64> {
        self.db.malloc(NODE_SIZE, PoolTag::BTREE)
    }

    fn compare(&self, r1: u64, r2: u64) -> Result<Ordering> {
        self.cmp.compare(self.db, r1, r2)
    }

    // ----- insert -----

    /// Insert `record` unless an equal one exists. Returns the record that
    /// is in the tree afterwards: `record` or the equal one found.
    pub fn insert(&self, record: u64) -> Result<u64> {
        let root = self.root()?;
        if root == 0 {
            let node = self.allocate_node()?;
            self.set_rec(node, 0, record)?;
            self.set_root(node)?;
            return Ok(record);
        }
        self.insert_at(0, 0, root, record)
    }

    fn insert_at(&self, mut parent: u64, i_parent: usize, mut node: u64, record: u64) -> Result<u64> {
        if self.rec(node, MAX_RECORDS - 1)? != 0 {
            let median = self.rec(node, MEDIAN_RECORD)?;
            let newnode = self.allocate_node()?;
            for i in MEDIAN_RECORD + 1..MAX_RECORDS {
                self.set_rec(newnode, i - MEDIAN_RECORD - 1, self.rec(node, i)?)?;
                self.set_rec(node, i, 0)?;
            }
            for i in MEDIAN_RECORD + 1..MAX_CHILDREN {
                self.set_child(newnode, i - MEDIAN_RECORD - 1, self.child(node, i)?)?;
                self.set_child(node, i, 0)?;
            }
            self.set_rec(node, MEDIAN_RECORD, 0)?;

            if parent == 0 {
                parent = self.allocate_node()?;
                self.set_root(parent)?;
                self.set_child(parent, 0, node)?;
            } else {
                for i in (i_parent..MAX_RECORDS - 1).rev() {
                    let r = self.rec(parent, i)?;
                    if r != 0 {
                        self.set_rec(parent, i + 1, r)?;
                        self.set_child(parent, i + 2, self.child(parent, i + 1)?)?;
                    }
                }
            }
            self.set_rec(parent, i_parent, median)?;
            self.set_child(parent, i_parent + 1, newnode)?;

            match self.compare(median, record)? {
                Ordering::Equal => return Ok(median),
                Ordering::Less => node = newnode,
                Ordering::Greater => {}
            }
        }

        // binary search over the used prefix of the node
        let mut lower = 0usize;
        let mut upper = self.count(node)?;
        while lower < upper {
            let middle = (lower + upper) / 2;
            let check = self.rec(node, middle)?;
            match self.compare(check, record)? {
                Ordering::Greater => upper = middle,
                Ordering::Less => lower = middle + 1,
                Ordering::Equal => return Ok(check),
            }
        }

        let child = self.child(node, lower)?;
        if child == 0 {
            for j in (lower..MAX_RECORDS - 1).rev() {
                let r = self.rec(node, j)?;
                if r != 0 {
                    self.set_rec(node, j + 1, r)?;
                }
            }
            self.set_rec(node, lower, record)?;
            return Ok(record);
        }
        self.insert_at(node, lower, child, record)
    }

    // ----- delete -----

    /// Remove the entry comparing equal to `record`. Returns whether one
    /// was found. The removed record itself is not freed.
    pub fn delete(&self, record: u64) -> Result<bool> {
        let root = self.root()?;
        if root == 0 {
            return Ok(false);
        }
        let found = self.delete_from(root, record)?;

        if self.count(root)? == 0 {
            let only_child = self.child(root, 0)?;
            self.set_root(only_child)?;
            self.db.free(root, PoolTag::BTREE)?;
        }
        Ok(found)
    }

    fn delete_from(&self, node: u64, key: u64) -> Result<bool> {
        let n = self.count(node)?;
        let mut i = 0usize;
        let mut ord = Ordering::Greater;
        while i < n {
            ord = self.compare(self.rec(node, i)?, key)?;
            if ord != Ordering::Less {
                break;
            }
            i += 1;
        }
        let leaf = self.is_leaf(node)?;

        if i < n && ord == Ordering::Equal {
            if leaf {
                self.remove_from_leaf(node, i, n)?;
                return Ok(true);
            }
            let left = self.child(node, i)?;
            let right = self.child(node, i + 1)?;
            if self.count(left)? > MIN_RECORDS {
                let pred = self.last_record(left)?;
                self.set_rec(node, i, pred)?;
                return self.delete_from(left, pred);
            }
            if self.count(right)? > MIN_RECORDS {
                let succ = self.first_record(right)?;
                self.set_rec(node, i, succ)?;
                return self.delete_from(right, succ);
            }
            self.merge(node, i, n)?;
            return self.delete_from(left, key);
        }

        if leaf {
            return Ok(false);
        }
        let child = self.fill_child(node, i, n)?;
        self.delete_from(child, key)
    }

    fn remove_from_leaf(&self, node: u64, i: usize, n: usize) -> Result<()> {
        for j in i..n - 1 {
            self.set_rec(node, j, self.rec(node, j + 1)?)?;
        }
        self.set_rec(node, n - 1, 0)
    }

    fn first_record(&self, mut node: u64) -> Result<u64> {
        loop {
            let c = self.child(node, 0)?;
            if c == 0 {
                return self.rec(node, 0);
            }
            node = c;
        }
    }

    fn last_record(&self, mut node: u64) -> Result<u64> {
        loop {
            let n = self.count(node)?;
            let c = self.child(node, n)?;
            if c == 0 {
                return self.rec(node, n - 1);
            }
            node = c;
        }
    }

    /// Make sure child `i` of `node` holds more than the minimum before
    /// descending; returns the child to descend into.
    fn fill_child(&self, node: u64, i: usize, n: usize) -> Result<u64> {
        let child = self.child(node, i)?;
        if self.count(child)? > MIN_RECORDS {
            return Ok(child);
        }
        if i > 0 {
            let left = self.child(node, i - 1)?;
            if self.count(left)? > MIN_RECORDS {
                self.borrow_from_left(node, i, left, child)?;
                return Ok(child);
            }
        }
        if i < n {
            let right = self.child(node, i + 1)?;
            if self.count(right)? > MIN_RECORDS {
                self.borrow_from_right(node, i, child, right)?;
                return Ok(child);
            }
        }
        if i < n {
            self.merge(node, i, n)?;
            Ok(child)
        } else {
            self.merge(node, i - 1, n)?;
            self.child(node, i - 1)
        }
    }

    fn borrow_from_left(&self, node: u64, i: usize, left: u64, child: u64) -> Result<()> {
        let cn = self.count(child)?;
        let ln = self.count(left)?;
        for j in (0..cn).rev() {
            self.set_rec(child, j + 1, self.rec(child, j)?)?;
        }
        for j in (0..=cn).rev() {
            self.set_child(child, j + 1, self.child(child, j)?)?;
        }
        self.set_rec(child, 0, self.rec(node, i - 1)?)?;
        self.set_child(child, 0, self.child(left, ln)?)?;
        self.set_rec(node, i - 1, self.rec(left, ln - 1)?)?;
        self.set_rec(left, ln - 1, 0)?;
        self.set_child(left, ln, 0)
    }

    fn borrow_from_right(&self, node: u64, i: usize, child: u64, right: u64) -> Result<()> {
        let cn = self.count(child)?;
        let rn = self.count(right)?;
        self.set_rec(child, cn, self.rec(node, i)?)?;
        self.set_child(child, cn + 1, self.child(right, 0)?)?;
        self.set_rec(node, i, self.rec(right, 0)?)?;
        for j in 0..rn - 1 {
            self.set_rec(right, j, self.rec(right, j + 1)?)?;
        }
        self.set_rec(right, rn - 1, 0)?;
        for j in 0..rn {
            self.set_child(right, j, self.child(right, j + 1)?)?;
        }
        self.set_child(right, rn, 0)
    }

    /// Fold record `i` of `node` and child `i + 1` into child `i`.
    fn merge(&self, node: u64, i: usize, n: usize) -> Result<()> {
        let left = self.child(node, i)?;
        let right = self.child(node, i + 1)?;
        let ln = self.count(left)?;
        let rn = self.count(right)?;

        self.set_rec(left, ln, self.rec(node, i)?)?;
        for j in 0..rn {
            self.set_rec(left, ln + 1 + j, self.rec(right, j)?)?;
        }
        for j in 0..=rn {
            self.set_child(left, ln + 1 + j, self.child(right, j)?)?;
        }

        for j in i..n - 1 {
            self.set_rec(node, j, self.rec(node, j + 1)?)?;
            self.set_child(node, j + 1, self.child(node, j + 2)?)?;
        }
        self.set_rec(node, n - 1, 0)?;
        self.set_child(node, n, 0)?;
        self.db.free(right, PoolTag::BTREE)
    }

    // ----- traversal -----

    /// Visit records comparing `Equal` under `visitor.compare`, in order.
    /// Returns `false` if the visitor stopped the traversal.
    pub fn accept<V: BTreeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<bool> {
        let root = self.root()?;
        self.accept_node(root, visitor)
    }

    fn accept_node<V: BTreeVisitor + ?Sized>(&self, node: u64, visitor: &mut V) -> Result<bool> {
        if node == 0 {
            return Ok(true);
        }
        // first record comparing greater or equal
        let mut lower = 0usize;
        let mut upper = self.count(node)?;
        while lower < upper {
            let middle = (lower + upper) / 2;
            if visitor.compare(self.rec(node, middle)?)? != Ordering::Less {
                upper = middle;
            } else {
                lower = middle + 1;
            }
        }

        let mut i = lower;
        while i < MAX_RECORDS {
            let record = self.rec(node, i)?;
            if record == 0 {
                break;
            }
            match visitor.compare(record)? {
                Ordering::Greater => return self.accept_node(self.child(node, i)?, visitor),
                Ordering::Equal => {
                    if !self.accept_node(self.child(node, i)?, visitor)? {
                        return Ok(false);
                    }
                    if !visitor.visit(record)? {
                        return Ok(false);
                    }
                }
                Ordering::Less => {}
            }
            i += 1;
        }
        self.accept_node(self.child(node, i)?, visitor)
    }

    /// First record for which `compare` is `Equal`.
    pub fn find<F>(&self, compare: F) -> Result<Option<u64>>
    where
        F: FnMut(u64) -> Result<Ordering>,
    {
        struct Finder<F> {
            compare: F,
            found: Option<u64>,
        }
        impl<F: FnMut(u64) -> Result<Ordering>> BTreeVisitor for Finder<F> {
            fn compare(&mut self, record: u64) -> Result<Ordering> {
                (self.compare)(record)
            }
            fn visit(&mut self, record: u64) -> Result<bool> {
                self.found = Some(record);
                Ok(false)
            }
        }
        let mut f = Finder {
            compare,
            found: None,
        };
        self.accept(&mut f)?;
        Ok(f.found)
    }

    /// In-order iterator. The tree must not change while it is alive.
    pub fn iter(&self) -> BTreeIter<'_, 'a, C> {
        BTreeIter {
            tree: self,
            stack: Vec::new(),
            started: false,
            done: false,
        }
    }

    // ----- maintenance -----

    /// Free every node (not the records) and clear the root.
    pub fn destruct(&self) -> Result<()> {
        let root = self.root()?;
        if root != 0 {
            self.destruct_node(root)?;
            self.set_root(0)?;
        }
        Ok(())
    }

    fn destruct_node(&self, node: u64) -> Result<()> {
        let n = self.count(node)?;
        for i in 0..=n {
            let c = self.child(node, i)?;
            if c != 0 {
                self.destruct_node(c)?;
            }
        }
        self.db.free(node, PoolTag::BTREE)
    }

    /// Check ordering, fill and balance. Returns the number of records.
    pub fn validate(&self) -> Result<usize> {
        let root = self.root()?;
        if root == 0 {
            return Ok(0);
        }
        let mut leaf_depth = None;
        self.validate_node(root, true, 0, &mut leaf_depth, None, None)
    }

    fn validate_node(
        &self,
        node: u64,
        is_root: bool,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        lo: Option<u64>,
        hi: Option<u64>,
    ) -> Result<usize> {
        let bad = |reason: String| NdError::CorruptBlock {
            address: node,
            reason,
        };
        let n = self.count(node)?;
        if n == 0 || (!is_root && n < MIN_RECORDS) {
            return Err(bad(format!("node holds {} records", n)));
        }
        for i in n..MAX_RECORDS {
            if self.rec(node, i)? != 0 {
                return Err(bad(format!("record slot {} used after a gap", i)));
            }
        }
        for i in 0..n {
            let r = self.rec(node, i)?;
            if i > 0 && self.compare(self.rec(node, i - 1)?, r)? != Ordering::Less {
                return Err(bad(format!("records {} and {} out of order", i - 1, i)));
            }
            if let Some(lo) = lo {
                if self.compare(lo, r)? != Ordering::Less {
                    return Err(bad(format!("record {} below its separator", i)));
                }
            }
            if let Some(hi) = hi {
                if self.compare(r, hi)? != Ordering::Less {
                    return Err(bad(format!("record {} above its separator", i)));
                }
            }
        }

        let leaf = self.is_leaf(node)?;
        if leaf {
            for i in 0..MAX_CHILDREN {
                if self.child(node, i)? != 0 {
                    return Err(bad("leaf with a child".into()));
                }
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(d) if d != depth => return Err(bad(format!("leaf at depth {} expected {}", depth, d))),
                Some(_) => {}
            }
            return Ok(n);
        }

        let mut total = n;
        for i in 0..=n {
            let c = self.child(node, i)?;
            if c == 0 {
                return Err(bad(format!("missing child {}", i)));
            }
            let clo = if i == 0 { lo } else { Some(self.rec(node, i - 1)?) };
            let chi = if i == n { hi } else { Some(self.rec(node, i)?) };
            total += self.validate_node(c, false, depth + 1, leaf_depth, clo, chi)?;
        }
        Ok(total)
    }
}

/// Lazy in-order traversal of a `BTree`.
pub struct BTreeIter<'t, 'a, C> {
    tree: &'t BTree<'a, C>,
    stack: Vec<(u64, usize)>,
    started: bool,
    done: bool,
}

impl<'t, 'a, C: BTreeComparator> BTreeIter<'t, 'a, C> {
    fn push_left(&mut self, mut node: u64) -> Result<()> {
        while node != 0 {
            self.stack.push((node, 0));
            node = self.tree.child(node, 0)?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<u64>> {
        if !self.started {
            self.started = true;
            let root = self.tree.root()?;
            self.push_left(root)?;
        }
        while let Some(&(node, idx)) = self.stack.last() {
            if idx < MAX_RECORDS {
                let record = self.tree.rec(node, idx)?;
                if record != 0 {
                    if let Some(top) = self.stack.last_mut() {
                        top.1 = idx + 1;
                    }
                    let right = self.tree.child(node, idx + 1)?;
                    self.push_left(right)?;
                    return Ok(Some(record));
                }
            }
            self.stack.pop();
        }
        Ok(None)
    }
}

impl<C: BTreeComparator> Iterator for BTreeIter<'_, '_, C> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(r)) => Some(Ok(r)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
