/// Read path: point lookups.
///
/// The memtable is checked first (freshest data), then the SSTables from
/// newest to oldest generation. The first entry found wins, and a tombstone
/// ends the search with "absent".
use anyhow::Result;
use memtable::ByteBuffer;

use crate::Engine;

impl Engine {
    /// Looks up `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an SSTable read fails (e.g. checksum mismatch,
    /// I/O). A key that is absent or deleted is `Ok(None)`.
    pub fn get(&self, key: &[u8]) -> Result<Option<ByteBuffer>> {
        if let Some(entry) = self.mem.get_entry(key) {
            return Ok(entry.cloned());
        }

        for table in &self.tables {
            if let Some(entry) = table.get_entry(key)? {
                tracing::trace!(
                    generation = table.generation(),
                    tombstone = entry.is_none(),
                    "hit in sstable"
                );
                return Ok(entry);
            }
        }
        Ok(None)
    }

    /// Returns `true` if `key` is visible anywhere.
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
