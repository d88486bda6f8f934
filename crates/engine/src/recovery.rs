/// Startup: directory setup, temp cleanup, and loading committed generations.
use anyhow::{Context, Result};
use config::Config;
use memtable::Memtable;
use sstable::SSTable;

use crate::{table_options, Engine};

impl Engine {
    /// Opens (or creates) the index stored under `cfg.data_dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the table directory if it does not exist.
    /// 2. Remove `*.tmp` files left by interrupted flushes or merges.
    /// 3. Open every committed generation (one with an `.index` file),
    ///    newest first.
    /// 4. Continue numbering at the largest generation + 1.
    ///
    /// The memtable starts empty: entries that were never flushed are gone.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or read, or if any committed
    /// generation is missing a companion file or is corrupt.
    pub fn open(cfg: &Config) -> Result<Self> {
        let dir = cfg.data_dir.clone();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating table directory {}", dir.display()))?;

        let removed = sstable::remove_temp_files(&dir)?;
        if removed > 0 {
            tracing::info!(removed, "removed leftovers of interrupted writes");
        }

        let generations = sstable::list_generations(&dir)?;
        let mut tables = Vec::with_capacity(generations.len());
        for &generation in generations.iter().rev() {
            let table = SSTable::open(&dir, generation)
                .with_context(|| format!("opening generation {}", generation))?;
            tables.push(table);
        }

        let next_generation = match generations.last() {
            Some(&max) => max
                .checked_add(1)
                .ok_or_else(|| anyhow::anyhow!("generation id overflow (u64::MAX reached)"))?,
            None => 1,
        };

        tracing::info!(
            dir = %dir.display(),
            tables = tables.len(),
            next_generation,
            "opened sector index"
        );

        Ok(Self {
            mem: Memtable::new(),
            tables,
            dir,
            opts: table_options(cfg),
            flush_threshold: cfg.flush_threshold,
            compaction_trigger: cfg.compaction_trigger,
            next_generation,
        })
    }
}
