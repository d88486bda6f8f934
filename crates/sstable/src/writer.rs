use bloom::BloomFilter;
use memtable::{compare_bytes, Memtable};
use std::cmp::Ordering;
use std::fs::{rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{
    encode_bloom, write_data_footer, write_record, IndexBlock, TablePaths, MAX_KEY_BYTES,
    MAX_VALUE_BYTES,
};
use crate::{Result, SSTableError};

/// How a table's bloom filter is sized: `max(entries * bits_per_key,
/// min_bits)` bits checked by `num_hashes` hash functions. Integer-only; the
/// caller picks the trade-off between size and false-positive rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomPolicy {
    pub bits_per_key: u64,
    pub num_hashes: u32,
    pub min_bits: u64,
}

impl Default for BloomPolicy {
    /// 10 bits per key with 7 hash functions, roughly a 1% false-positive rate.
    fn default() -> Self {
        Self {
            bits_per_key: 10,
            num_hashes: 7,
            min_bits: 64,
        }
    }
}

impl BloomPolicy {
    /// Builds an empty filter sized for `expected_items` keys.
    pub fn filter_for(&self, expected_items: u64) -> Result<BloomFilter> {
        if self.bits_per_key == 0 {
            return Err(SSTableError::InvalidArgument(
                "bloom bits_per_key must be > 0".into(),
            ));
        }
        let num_bits = expected_items
            .saturating_mul(self.bits_per_key)
            .max(self.min_bits)
            .clamp(1, bloom::MAX_BLOOM_BITS);
        Ok(BloomFilter::new(num_bits, self.num_hashes)?)
    }
}

/// Parameters shared by flush and merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    pub bloom: BloomPolicy,
    /// Every `index_interval`-th record (and always the first) is sampled
    /// into the sparse index.
    pub index_interval: u32,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            bloom: BloomPolicy::default(),
            index_interval: 16,
        }
    }
}

/// Writes sorted entries to disk as one immutable SSTable generation.
///
/// The writer is stateless. The write is crash-safe: all three files are
/// written to `*.tmp` siblings and fsynced, then renamed into place with the
/// `.index` last. Until that final rename the generation is invisible, and
/// any failure removes every file this write created.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Writes the contents of `mem` as generation `generation` in `dir`,
    /// leaving `mem` untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the memtable is empty (writing an empty SSTable is
    /// not useful and likely indicates a logic bug) or on any I/O failure.
    pub fn write_from_memtable(
        dir: &Path,
        generation: u64,
        mem: &Memtable,
        opts: &TableOptions,
    ) -> Result<()> {
        if mem.is_empty() {
            return Err(SSTableError::InvalidArgument(
                "refusing to write an empty SSTable (empty memtable)".into(),
            ));
        }
        let iter = mem.iter().map(Ok);
        Self::write_internal(dir, generation, mem.len() as u64, iter, opts)
    }

    /// Writes an SSTable from a fallible iterator of `(key, value)` pairs,
    /// where a `None` value is written as a tombstone.
    ///
    /// This is the streaming entry point used by merge: entries are consumed
    /// one at a time, so memory stays proportional to the bloom filter and
    /// the sparse index rather than the data.
    ///
    /// # Arguments
    ///
    /// * `expected_count` – estimated number of entries, used to size the
    ///   bloom filter. Over-estimating is safe; under-estimating raises the
    ///   false-positive rate.
    /// * `iter` – entries in strictly ascending [`compare_bytes`] order. The
    ///   first `Err` aborts the write.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator yields zero entries, yields keys out
    /// of order, yields an error, or on I/O failure.
    pub fn write_from_iterator<I, K, V>(
        dir: &Path,
        generation: u64,
        expected_count: u64,
        iter: I,
        opts: &TableOptions,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<(K, Option<V>)>>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        Self::write_internal(dir, generation, expected_count.max(1), iter, opts)
    }

    fn write_internal<I, K, V>(
        dir: &Path,
        generation: u64,
        expected_count: u64,
        iter: I,
        opts: &TableOptions,
    ) -> Result<()>
    where
        I: Iterator<Item = Result<(K, Option<V>)>>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        if opts.index_interval == 0 {
            return Err(SSTableError::InvalidArgument(
                "index_interval must be > 0".into(),
            ));
        }
        let paths = TablePaths::new(dir, generation);
        if paths.index.exists() {
            return Err(SSTableError::InvalidArgument(format!(
                "generation {} already exists in {}",
                generation,
                dir.display()
            )));
        }
        let tmp = paths.temporary();
        let mut pending = PendingFiles::default();

        pending.track(tmp.data.clone());
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp.data)?;
        let mut file = BufWriter::new(raw_file);

        let mut bloom = opts.bloom.filter_for(expected_count)?;
        let mut samples: Vec<(Vec<u8>, u64)> = Vec::new();
        let mut min_key: Vec<u8> = Vec::new();
        let mut max_key: Vec<u8> = Vec::new();
        let mut offset: u64 = 0;
        let mut count: u64 = 0;

        // Reusable buffer for computing per-record CRC32 checksums.
        let mut record_buf: Vec<u8> = Vec::with_capacity(256);

        // Write DATA section
        for item in iter {
            let (key, value) = item?;
            let key = key.as_ref();
            let value: Option<&[u8]> = value.as_ref().map(|v| v.as_ref());
            let value_len = value.map_or(0, <[u8]>::len);

            if key.len() > MAX_KEY_BYTES || value_len > MAX_VALUE_BYTES {
                return Err(SSTableError::InvalidArgument(format!(
                    "entry too large: key {} bytes, value {} bytes",
                    key.len(),
                    value_len
                )));
            }
            if count > 0 && compare_bytes(&max_key, key) != Ordering::Less {
                return Err(SSTableError::InvalidArgument(
                    "keys must be written in strictly ascending order".into(),
                ));
            }

            if count % u64::from(opts.index_interval) == 0 {
                samples.push((key.to_vec(), offset));
            }
            bloom.insert(key);
            offset += write_record(&mut file, key, value, &mut record_buf)?;

            if count == 0 {
                min_key = key.to_vec();
            }
            max_key.clear();
            max_key.extend_from_slice(key);
            count += 1;
        }

        if count == 0 {
            return Err(SSTableError::InvalidArgument(
                "refusing to write an empty SSTable (no entries)".into(),
            ));
        }

        write_data_footer(&mut file, count)?;
        file.flush()?;
        file.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        // Write BLOOM companion
        pending.track(tmp.bloom.clone());
        write_synced(&tmp.bloom, &encode_bloom(&bloom)?)?;

        // Write INDEX companion
        let index = IndexBlock {
            generation,
            record_count: count,
            data_len: offset,
            interval: opts.index_interval,
            min_key,
            max_key,
            samples,
        };
        pending.track(tmp.index.clone());
        write_synced(&tmp.index, &index.encode()?)?;

        // Move into place; the index rename commits the generation.
        rename(&tmp.data, &paths.data)?;
        pending.track(paths.data.clone());
        rename(&tmp.bloom, &paths.bloom)?;
        pending.track(paths.bloom.clone());
        rename(&tmp.index, &paths.index)?;
        pending.commit();

        // Fsync the parent directory so the renames survive a crash.
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }

        tracing::debug!(
            generation,
            records = count,
            samples = index.samples.len(),
            bloom_bits = bloom.num_bits(),
            "wrote sstable"
        );
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = File::create(path)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}

/// Files created by an in-progress write. Dropping without [`commit`]
/// removes them, so every early return cleans up after itself.
///
/// [`commit`]: PendingFiles::commit
#[derive(Default)]
struct PendingFiles {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl PendingFiles {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingFiles {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}
