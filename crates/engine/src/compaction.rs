/// Compaction: folds the live SSTables into one.
///
/// Repeatedly merges the two newest tables into a fresh generation. Since
/// the output id is larger than every live one, it keeps the precedence of
/// its newer input over everything left below it. Tombstones survive until
/// the last merge, which has nothing older left for them to hide.
use anyhow::Result;
use sstable::SSTable;

use crate::Engine;

impl Engine {
    /// Merges all live tables into a single one, or none if every record
    /// turns out to be deleted.
    ///
    /// No-op with fewer than two tables. Retired inputs are dropped from the
    /// table list before their files are deleted, and `&mut self` keeps
    /// readers out for the whole swap.
    ///
    /// # Errors
    ///
    /// Returns an error if a merge fails. Tables merged before the failure
    /// stay merged; the rest are untouched.
    pub fn compact(&mut self) -> Result<()> {
        if self.tables.len() < 2 {
            return Ok(());
        }
        let before = self.tables.len();

        while self.tables.len() >= 2 {
            let generation = self.allocate_generation()?;
            let (newer, older) = (&self.tables[0], &self.tables[1]);
            let merged = if self.tables.len() == 2 {
                SSTable::merge_bottom(newer, older, &self.dir, generation, &self.opts)?
            } else {
                Some(SSTable::merge(newer, older, &self.dir, generation, &self.opts)?)
            };

            let retired: Vec<SSTable> = self.tables.drain(..2).collect();
            if let Some(merged) = merged {
                self.tables.insert(0, merged);
            }

            // Oldest first: if a delete fails, the newer input stays on disk
            // and its tombstones keep hiding what the failed one still holds.
            for table in retired.iter().rev() {
                if let Err(e) = table.delete_files() {
                    tracing::warn!(generation = table.generation(), error = %e, "could not delete retired sstable");
                    break;
                }
            }
        }

        tracing::info!(
            tables_before = before,
            generation = self.tables.first().map(SSTable::generation),
            "compaction finished"
        );
        Ok(())
    }
}
