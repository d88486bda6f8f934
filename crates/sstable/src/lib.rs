//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk generations of the sector index.
//!
//! When the in-memory [`memtable::Memtable`] exceeds its size threshold the
//! owner flushes it to disk as a new SSTable generation. SSTables are
//! *write-once, read-many*: once created they are never modified, only
//! replaced when two generations are merged.
//!
//! ## Files
//!
//! Every generation is three companion files sharing a base name:
//!
//! ```text
//! 00000000000000000007.data    sorted key/value and tombstone records + footer
//! 00000000000000000007.bloom   serialized BloomFilter over every key
//! 00000000000000000007.index   bounds, counts, sparse key -> offset samples
//! ```
//!
//! The `.index` file is renamed into place last and acts as the commit
//! point: a generation without a valid `.index` does not exist as far as
//! [`list_generations`] and [`SSTable::open`] are concerned. See [`format`]
//! for the byte layouts.
//!
//! ## Ordering
//!
//! Keys are ordered by [`memtable::compare_bytes`] (length first, then
//! bytes). Bounds checks and the sparse-index binary search use the same
//! rule.
//!
//! ## Merge precedence
//!
//! [`SSTable::merge`] resolves duplicate keys by **generation**: the table
//! with the larger generation id wins, whatever the argument order.
//!
//! ## Tombstones
//!
//! A removed key is stored as a record with no value. Lookups report it as
//! absent, and it hides the key in every older generation. Merges keep
//! tombstones, except [`SSTable::merge_bottom`], which is only used when no
//! older generation remains for them to hide anything in.

pub mod format;
mod merge;
mod reader;
mod writer;

use bloom::BloomError;
use memtable::{ByteBuffer, MemtableError};
use std::io;
use std::path::{Path, PathBuf};

pub use format::TablePaths;
pub use merge::MergeIterator;
pub use reader::{SSTable, TableIter};
pub use writer::{BloomPolicy, SSTableWriter, TableOptions};

#[derive(Debug, thiserror::Error)]
pub enum SSTableError {
    #[error("sstable file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("corrupt sstable: {0}")]
    Corrupt(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Bloom(#[from] BloomError),

    #[error(transparent)]
    Memtable(#[from] MemtableError),

    #[error("sstable I/O: {0}")]
    Io(#[from] io::Error),

    #[error("sstable file handle lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SSTableError>;

/// A stored record: `(key, Some(value))`, or `(key, None)` for a tombstone.
pub type Entry = (ByteBuffer, Option<ByteBuffer>);

/// Returns the committed generation ids in `dir` in ascending order.
///
/// A generation counts as committed once its `.index` file exists.
pub fn list_generations(dir: &Path) -> Result<Vec<u64>> {
    let mut generations: Vec<u64> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| format::parse_index_name(&e.path()))
        .collect();
    generations.sort_unstable();
    Ok(generations)
}

/// Deletes `*.tmp` files left behind by interrupted writes and returns how
/// many were removed.
pub fn remove_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|x| x == format::TMP_SUFFIX).unwrap_or(false) {
            std::fs::remove_file(&path)?;
            tracing::debug!(path = %path.display(), "removed leftover temp file");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests;
