//! # Engine - sector index
//!
//! Ties the [`memtable`] and [`sstable`] crates together into the index that
//! maps logical sectors to physical ones.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs → Memtable insert                    │
//! │              |                                │
//! │              |  (threshold exceeded?)         │
//! │              |            yes                 │
//! │              v                                │
//! │           flush() → new SSTable generation    │
//! │              |                                │
//! │              |  (table count >= trigger?)     │
//! │              |            yes                 │
//! │              v                                │
//! │           compact() → pairwise merges         │
//! │                                               │
//! │ read.rs → Memtable → SSTables newest→oldest   │
//! │            (first entry wins, tombstone=miss) │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                 |
//! |----------------|---------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, accessors, `Debug`, `Drop`             |
//! | [`recovery`]   | `Engine::open`: temp cleanup, loading generations       |
//! | [`write`]      | `put()`, `remove()`, `flush()`                          |
//! | [`read`]       | `get()`                                                 |
//! | [`compaction`] | `compact()`: merge the two newest tables until one left |
//! | [`shared`]     | `SharedEngine`, the engine behind a read/write lock     |
//! | [`remap`]      | `SectorRemapper`, logical → physical sector mapping     |
//!
//! ## Precedence
//!
//! Every SSTable carries a generation id. Flushes and merges always write a
//! generation larger than any live one, so "newest" is simply "largest id".
//! `remove` writes a tombstone that hides the key in every older generation
//! until compaction reaches the oldest table and drops it.

mod compaction;
mod read;
mod recovery;
mod remap;
mod shared;
mod write;

use config::Config;
use memtable::Memtable;
use sstable::{BloomPolicy, SSTable, TableOptions};
use std::path::{Path, PathBuf};

pub use remap::SectorRemapper;
pub use shared::SharedEngine;

/// The sector index: one memtable in front of a stack of SSTables.
///
/// Owns everything it touches; there is no global state. Wrap it in a
/// [`SharedEngine`] to use it from several threads.
pub struct Engine {
    pub(crate) mem: Memtable,
    /// Live tables, newest (largest generation) first.
    pub(crate) tables: Vec<SSTable>,
    pub(crate) dir: PathBuf,
    pub(crate) opts: TableOptions,
    /// Memtable byte size that triggers a flush.
    pub(crate) flush_threshold: usize,
    /// Table count that triggers compaction after a flush. `0` disables it.
    pub(crate) compaction_trigger: usize,
    /// Generation id the next flush or merge will use.
    pub(crate) next_generation: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.dir)
            .field("flush_threshold", &self.flush_threshold)
            .field("compaction_trigger", &self.compaction_trigger)
            .field("memtable_size", &self.mem.byte_size())
            .field("memtable_entries", &self.mem.len())
            .field("table_count", &self.tables.len())
            .field(
                "generations",
                &self.tables.iter().map(SSTable::generation).collect::<Vec<_>>(),
            )
            .field("next_generation", &self.next_generation)
            .finish()
    }
}

/// Table parameters derived from the runtime config.
pub fn table_options(cfg: &Config) -> TableOptions {
    TableOptions {
        bloom: BloomPolicy {
            bits_per_key: cfg.bloom_bits_per_key,
            num_hashes: cfg.bloom_hashes,
            ..BloomPolicy::default()
        },
        index_interval: cfg.index_interval,
    }
}

impl Engine {
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the current flush threshold in bytes.
    #[must_use]
    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Updates the flush threshold. Useful for testing or runtime tuning.
    pub fn set_flush_threshold(&mut self, threshold: usize) {
        self.flush_threshold = threshold;
    }

    #[must_use]
    pub fn compaction_trigger(&self) -> usize {
        self.compaction_trigger
    }

    /// Updates the compaction trigger. Set to `0` to disable auto-compaction.
    pub fn set_compaction_trigger(&mut self, trigger: usize) {
        self.compaction_trigger = trigger;
    }

    /// Number of live SSTables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Generations of the live tables, newest first.
    #[must_use]
    pub fn generations(&self) -> Vec<u64> {
        self.tables.iter().map(SSTable::generation).collect()
    }

    /// Bytes of key and value data held in the memtable.
    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.mem.byte_size()
    }

    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.mem.len()
    }

    #[must_use]
    pub fn next_generation(&self) -> u64 {
        self.next_generation
    }

    /// Hands out a generation id and advances the counter.
    pub(crate) fn allocate_generation(&mut self) -> anyhow::Result<u64> {
        let generation = self.next_generation;
        self.next_generation = generation
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("generation id overflow (u64::MAX reached)"))?;
        Ok(generation)
    }
}

/// Best-effort flush on drop.
///
/// Errors are logged and otherwise ignored because `Drop` cannot propagate
/// them; a failed flush leaves the entries in the memtable that is being
/// dropped, so they are lost.
impl Drop for Engine {
    fn drop(&mut self) {
        if !self.mem.is_empty() {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "flush on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests;
