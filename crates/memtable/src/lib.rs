//! # Memtable
//!
//! The mutable, in-memory half of the sector index. Keys and values are
//! [`ByteBuffer`]s held in a balanced ordered tree (`BTreeMap`) that sorts by
//! the length-first [`compare_bytes`] rule, so an in-order walk yields exactly
//! the order an SSTable stores on disk.
//!
//! A removal is recorded as a tombstone (an entry whose value is `None`) so
//! that, once flushed, it keeps shadowing older values held in SSTables.
//!
//! The memtable tracks its resident size as the sum of `key.len() +
//! value.len()` over its entries, with a tombstone counting its key only.
//! The owner flushes it into an SSTable once that size crosses its threshold.
mod buffer;

use std::collections::btree_map;
use std::collections::BTreeMap;

pub use buffer::{compare_bytes, ByteBuffer, KeySlice};

#[derive(Debug, thiserror::Error)]
pub enum MemtableError {
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },
}

pub type Result<T> = std::result::Result<T, MemtableError>;

/// Sorted iterator returned by [`Memtable::drain`]. A `None` value is a
/// tombstone.
pub type Drain = btree_map::IntoIter<ByteBuffer, Option<ByteBuffer>>;

#[derive(Debug, Default)]
pub struct Memtable {
    map: BTreeMap<ByteBuffer, Option<ByteBuffer>>,
    byte_size: usize,
}

fn occupied(key: &ByteBuffer, value: Option<&ByteBuffer>) -> usize {
    key.len() + value.map_or(0, ByteBuffer::len)
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            byte_size: 0,
        }
    }

    /// Copies `key` and `value` in and inserts or overwrites the entry.
    ///
    /// Returns the number of bytes the previous entry occupied
    /// (`key.len() + old_value.len()`), or 0 if the key was new.
    ///
    /// # Errors
    ///
    /// [`MemtableError::OutOfMemory`] if either copy cannot be allocated. Both
    /// copies are made before the tree is touched, so a failure leaves the
    /// table unchanged.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<usize> {
        let key = ByteBuffer::copy_from(key)?;
        let value = ByteBuffer::copy_from(value)?;
        Ok(self.put_owned(key, value))
    }

    /// Inserts already-owned buffers. Same return value as [`put`](Self::put).
    pub fn put_owned(&mut self, key: ByteBuffer, value: ByteBuffer) -> usize {
        self.insert(key, Some(value))
    }

    /// Records a tombstone for `key`, replacing any value held here.
    ///
    /// Returns the bytes the previous entry occupied, or 0 if the key was new.
    ///
    /// # Errors
    ///
    /// [`MemtableError::OutOfMemory`] if the key copy cannot be allocated.
    pub fn delete(&mut self, key: &[u8]) -> Result<usize> {
        let key = ByteBuffer::copy_from(key)?;
        Ok(self.insert(key, None))
    }

    fn insert(&mut self, key: ByteBuffer, value: Option<ByteBuffer>) -> usize {
        let added = occupied(&key, value.as_ref());
        let key_len = key.len();
        let overwritten = match self.map.insert(key, value) {
            Some(old) => key_len + old.map_or(0, |v| v.len()),
            None => 0,
        };
        self.byte_size = self.byte_size - overwritten + added;
        overwritten
    }

    /// Returns the live value for `key`. A tombstone reads as `None`.
    pub fn get(&self, key: &[u8]) -> Option<&ByteBuffer> {
        self.get_entry(key).flatten()
    }

    /// Like [`get`](Self::get) but tells a tombstone (`Some(None)`) apart
    /// from a key this table knows nothing about (`None`).
    pub fn get_entry(&self, key: &[u8]) -> Option<Option<&ByteBuffer>> {
        self.map.get(KeySlice::new(key)).map(Option::as_ref)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Drops whatever entry `key` has, tombstone included, and returns its
    /// live value. Absent keys are a no-op.
    pub fn remove(&mut self, key: &[u8]) -> Option<ByteBuffer> {
        let (k, v) = self.map.remove_entry(KeySlice::new(key))?;
        self.byte_size -= occupied(&k, v.as_ref());
        v
    }

    /// Takes every entry out in ascending key order and leaves the table
    /// empty with `byte_size() == 0`.
    pub fn drain(&mut self) -> Drain {
        self.byte_size = 0;
        std::mem::take(&mut self.map).into_iter()
    }

    /// Puts previously drained entries back, e.g. after a failed flush.
    ///
    /// Entries already present win over restored ones, since they were
    /// written after the drain.
    pub fn restore<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (ByteBuffer, Option<ByteBuffer>)>,
    {
        for (key, value) in entries {
            if !self.map.contains_key(&key) {
                self.insert(key, value);
            }
        }
    }

    /// Ordered iterator over `(key, value)`, tombstones yielding `None`.
    pub fn iter(&self) -> impl Iterator<Item = (&ByteBuffer, Option<&ByteBuffer>)> {
        self.map.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sum of `key.len() + value.len()` over entries.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn first_key(&self) -> Option<&ByteBuffer> {
        self.map.keys().next()
    }

    pub fn last_key(&self) -> Option<&ByteBuffer> {
        self.map.keys().next_back()
    }
}
