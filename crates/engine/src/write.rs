/// Write path: `put()`, `remove()`, and `flush()`.
///
/// Every mutation lands in the memtable, a removal as a tombstone. Once the
/// memtable reaches the flush threshold it is persisted as a new SSTable
/// generation.
use anyhow::Result;
use memtable::ByteBuffer;
use sstable::format::{MAX_KEY_BYTES, MAX_VALUE_BYTES};
use sstable::SSTable;

use crate::Engine;

impl Engine {
    /// Inserts or updates `key` and returns the number of bytes the previous
    /// memtable entry held (0 if the key was not in the memtable).
    ///
    /// Triggers a flush when the memtable reaches the flush threshold. A
    /// failed automatic flush does not fail the put: the entry is already
    /// stored, the error is logged, and the next write tries again. Call
    /// [`flush`](Engine::flush) to see the error.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<usize> {
        check_key(key)?;
        anyhow::ensure!(
            value.len() <= MAX_VALUE_BYTES,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_BYTES
        );

        let overwritten = self.mem.put(key, value)?;
        self.flush_if_full();
        Ok(overwritten)
    }

    /// Deletes `key` and returns the value it had, or `None` (and does
    /// nothing) if it was absent.
    ///
    /// While older generations exist the deletion is recorded as a
    /// tombstone, which is flushed like any other entry and hides the key in
    /// every older table.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<ByteBuffer>> {
        check_key(key)?;
        let Some(previous) = self.get(key)? else {
            return Ok(None);
        };

        if self.tables.is_empty() {
            self.mem.remove(key);
        } else {
            self.mem.delete(key)?;
            self.flush_if_full();
        }
        Ok(Some(previous))
    }

    /// Persists the memtable as a new generation.
    ///
    /// No-op if the memtable is empty. On failure the memtable keeps its
    /// entries. Afterwards, if auto-compaction is enabled and the table count
    /// has reached the trigger, [`compact`](Engine::compact) runs; its
    /// failure is logged and does not undo or fail the flush.
    pub fn flush(&mut self) -> Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }
        let generation = self.allocate_generation()?;
        let table = SSTable::flush_from(&mut self.mem, &self.dir, generation, &self.opts)?;
        self.tables.insert(0, table);

        if self.compaction_trigger > 0 && self.tables.len() >= self.compaction_trigger {
            if let Err(e) = self.compact() {
                tracing::warn!(generation, error = %e, "automatic compaction failed");
            }
        }
        Ok(())
    }

    fn flush_if_full(&mut self) {
        if self.mem.byte_size() < self.flush_threshold {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::warn!(
                memtable_size = self.mem.byte_size(),
                error = %e,
                "automatic flush failed, will retry on next write"
            );
        }
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    anyhow::ensure!(
        key.len() <= MAX_KEY_BYTES,
        "key too large: {} bytes (max {})",
        key.len(),
        MAX_KEY_BYTES
    );
    Ok(())
}
