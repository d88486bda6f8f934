//! Two-way merge of SSTable generations.
//!
//! Produces `(key, value)` pairs in ascending [`compare_bytes`] order. When
//! the same key appears in both inputs only the entry from the **newer**
//! source is emitted; which source is newer is fixed at construction, never
//! inferred from the data. A tombstone takes part like any other entry, so
//! a newer tombstone shadows an older value.
//!
//! This is the core primitive for compaction: walk both inputs in sorted
//! order, deduplicate, and stream the result into a new SSTable.

use memtable::compare_bytes;
use std::cmp::Ordering;
use std::iter::Fuse;
use std::path::Path;

use crate::writer::{SSTableWriter, TableOptions};
use crate::{Entry, Result, SSTable, SSTableError};

/// Merges a newer and an older sorted stream into one sorted, deduplicated
/// stream. Both inputs must be strictly ascending.
///
/// Heads are pulled lazily, so an error from either side surfaces only
/// after every entry that sorts before it has been returned.
pub struct MergeIterator<N, O> {
    newer: Fuse<N>,
    older: Fuse<O>,
    newer_head: Option<Entry>,
    older_head: Option<Entry>,
    drop_tombstones: bool,
    failed: bool,
}

impl<N, O> MergeIterator<N, O>
where
    N: Iterator<Item = Result<Entry>>,
    O: Iterator<Item = Result<Entry>>,
{
    pub fn new(newer: N, older: O) -> Self {
        Self {
            newer: newer.fuse(),
            older: older.fuse(),
            newer_head: None,
            older_head: None,
            drop_tombstones: false,
            failed: false,
        }
    }

    /// Leaves tombstones out of the output. Only correct when nothing older
    /// than both inputs exists for them to shadow.
    #[must_use]
    pub fn dropping_tombstones(mut self) -> Self {
        self.drop_tombstones = true;
        self
    }

    /// Returns the next entry in sorted order, or `None` when both sides are
    /// exhausted. On a key present in both, the newer value wins and the
    /// older entry is skipped.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        loop {
            match self.next_winner()? {
                Some((_, None)) if self.drop_tombstones => continue,
                other => return Ok(other),
            }
        }
    }

    fn next_winner(&mut self) -> Result<Option<Entry>> {
        if self.newer_head.is_none() {
            self.newer_head = self.newer.next().transpose()?;
        }
        if self.older_head.is_none() {
            self.older_head = self.older.next().transpose()?;
        }

        let order = match (&self.newer_head, &self.older_head) {
            (None, None) => return Ok(None),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((n, _)), Some((o, _))) => compare_bytes(n.as_bytes(), o.as_bytes()),
        };

        let out = match order {
            Ordering::Less => self.newer_head.take(),
            Ordering::Greater => self.older_head.take(),
            Ordering::Equal => {
                // Shadowed by the newer generation.
                self.older_head = None;
                self.newer_head.take()
            }
        };
        Ok(out)
    }
}

impl<N, O> Iterator for MergeIterator<N, O>
where
    N: Iterator<Item = Result<Entry>>,
    O: Iterator<Item = Result<Entry>>,
{
    type Item = Result<Entry>;

    /// Stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_entry().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

impl SSTable {
    /// Merges two generations into a new generation `output_generation` in
    /// `dir` and opens it.
    ///
    /// The key set of the result is the union of both inputs. For keys in
    /// both, the entry from the input with the larger [`generation`] wins,
    /// regardless of argument order. Tombstones are carried over. Bounds are
    /// recomputed, and the bloom filter is rebuilt for the merged key count
    /// rather than OR-ed together.
    ///
    /// The inputs are left untouched on disk; retiring them with
    /// [`delete_files`] is the caller's job once no reader still needs them.
    ///
    /// # Errors
    ///
    /// [`SSTableError::InvalidArgument`] if both inputs share a generation,
    /// or if `output_generation` is not newer than both inputs (the merged
    /// table must take precedence over whatever the inputs shadowed).
    /// Otherwise any read, checksum or write error; a failed merge leaves
    /// no output files behind.
    ///
    /// [`generation`]: SSTable::generation
    /// [`delete_files`]: SSTable::delete_files
    pub fn merge(
        lhs: &SSTable,
        rhs: &SSTable,
        dir: &Path,
        output_generation: u64,
        opts: &TableOptions,
    ) -> Result<SSTable> {
        Self::merge_with(lhs, rhs, dir, output_generation, opts, false)?.ok_or_else(|| {
            SSTableError::InvalidArgument("merge of two empty tables".into())
        })
    }

    /// Like [`merge`](SSTable::merge), for inputs that are the two oldest
    /// generations left: tombstones have nothing older to hide and are
    /// dropped. Returns `Ok(None)`, writing nothing, if no live record
    /// remains.
    pub fn merge_bottom(
        lhs: &SSTable,
        rhs: &SSTable,
        dir: &Path,
        output_generation: u64,
        opts: &TableOptions,
    ) -> Result<Option<SSTable>> {
        Self::merge_with(lhs, rhs, dir, output_generation, opts, true)
    }

    fn merge_with(
        lhs: &SSTable,
        rhs: &SSTable,
        dir: &Path,
        output_generation: u64,
        opts: &TableOptions,
        drop_tombstones: bool,
    ) -> Result<Option<SSTable>> {
        let (newer, older) = match lhs.generation().cmp(&rhs.generation()) {
            Ordering::Greater => (lhs, rhs),
            Ordering::Less => (rhs, lhs),
            Ordering::Equal => {
                return Err(SSTableError::InvalidArgument(format!(
                    "cannot merge generation {} with itself",
                    lhs.generation()
                )))
            }
        };
        if output_generation <= newer.generation() {
            return Err(SSTableError::InvalidArgument(format!(
                "output generation {} must be newer than inputs {} and {}",
                output_generation,
                newer.generation(),
                older.generation()
            )));
        }

        let mut merged = MergeIterator::new(newer.iter()?, older.iter()?);
        if drop_tombstones {
            merged = merged.dropping_tombstones();
        }
        let mut merged = merged.peekable();
        if merged.peek().is_none() {
            tracing::info!(
                newer = newer.generation(),
                older = older.generation(),
                "merge left no live records"
            );
            return Ok(None);
        }

        let expected = newer.len() + older.len();
        SSTableWriter::write_from_iterator(dir, output_generation, expected, merged, opts)?;

        let table = SSTable::open(dir, output_generation)?;
        tracing::info!(
            newer = newer.generation(),
            older = older.generation(),
            output = output_generation,
            records = table.len(),
            "merged sstables"
        );
        Ok(Some(table))
    }
}
