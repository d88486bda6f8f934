use bloom::BloomFilter;
use memtable::{compare_bytes, ByteBuffer, Memtable};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use crate::format::{
    decode_bloom, read_data_footer, read_record, IndexBlock, TablePaths, DATA_FOOTER_BYTES,
};
use crate::writer::{SSTableWriter, TableOptions};
use crate::{Entry, Result, SSTableError};

/// An open, immutable SSTable generation.
///
/// On [`open`](SSTable::open) the bloom filter, the key bounds and the sparse
/// index are loaded into memory; the data section stays on disk. A lookup
/// costs at most one seek plus a scan of one index interval.
///
/// The data file handle is wrapped in a `Mutex` so that `get` works through
/// a shared `&self`; concurrent readers of one table serialise on it, readers
/// of different tables do not interact.
pub struct SSTable {
    generation: u64,
    paths: TablePaths,
    bloom: BloomFilter,
    min_key: ByteBuffer,
    max_key: ByteBuffer,
    /// Sparse index: `(key, offset)` of every `interval`-th record, ascending.
    samples: Vec<(ByteBuffer, u64)>,
    record_count: u64,
    /// End of the record area (start of the data footer).
    data_len: u64,
    file: Mutex<BufReader<File>>,
    /// Number of lookups that touched the data file.
    io_reads: AtomicU64,
}

impl SSTable {
    /// Drains `mem` into a new generation `generation` under `dir` and opens
    /// it.
    ///
    /// If writing fails the drained entries are put back, so the memtable is
    /// observably unchanged. On success it is left empty.
    pub fn flush_from(
        mem: &mut Memtable,
        dir: &Path,
        generation: u64,
        opts: &TableOptions,
    ) -> Result<Self> {
        if mem.is_empty() {
            return Err(SSTableError::InvalidArgument(
                "refusing to write an empty SSTable (empty memtable)".into(),
            ));
        }
        let entries: Vec<Entry> = mem.drain().collect();
        let written = SSTableWriter::write_from_iterator(
            dir,
            generation,
            entries.len() as u64,
            entries.iter().map(|(k, v)| Ok((k, v.as_ref()))),
            opts,
        )
        .and_then(|()| {
            Self::open(dir, generation).map_err(|e| {
                // Never leave a committed generation whose entries also went
                // back into the memtable.
                let _ = remove_paths(&TablePaths::new(dir, generation));
                e
            })
        });

        match written {
            Ok(table) => {
                tracing::info!(
                    generation,
                    records = entries.len(),
                    "flushed memtable to sstable"
                );
                Ok(table)
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "flush failed, restoring memtable");
                mem.restore(entries);
                Err(e)
            }
        }
    }

    /// Opens generation `generation` stored in `dir`.
    ///
    /// # Validation
    ///
    /// All three companion files must exist ([`SSTableError::NotFound`]
    /// otherwise). Magics and checksums must verify, and the files must
    /// agree with each other: same generation, same record count, a data
    /// length matching the `.data` file, and strictly ascending samples that
    /// point inside the data section. Anything else is
    /// [`SSTableError::Corrupt`].
    pub fn open(dir: &Path, generation: u64) -> Result<Self> {
        let paths = TablePaths::new(dir, generation);
        let index_bytes = read_existing(&paths.index)?;
        let bloom_bytes = read_existing(&paths.bloom)?;
        let mut f = open_existing(&paths.data)?;

        let index = IndexBlock::decode(&index_bytes)?;
        let bloom = decode_bloom(&bloom_bytes)?;
        let record_count = read_data_footer(&mut f)?;
        let filesize = f.metadata()?.len();

        let checks = [
            (index.generation == generation, "generation does not match file name"),
            (index.record_count == record_count, "index and data record counts differ"),
            (bloom.len() == record_count, "bloom item count differs from record count"),
            (
                index.data_len.checked_add(DATA_FOOTER_BYTES) == Some(filesize),
                "data length does not match data file",
            ),
            (record_count > 0 && !index.samples.is_empty(), "table has no records"),
            (index.interval > 0, "zero index interval"),
            (compare_bytes(&index.min_key, &index.max_key) != Ordering::Greater, "min_key > max_key"),
        ];
        if let Some((_, what)) = checks.iter().find(|(ok, _)| !ok) {
            tracing::warn!(generation, problem = what, "rejecting sstable");
            return Err(SSTableError::Corrupt(format!("generation {}: {}", generation, what)));
        }
        validate_samples(&index)?;

        let samples = index
            .samples
            .into_iter()
            .map(|(k, off)| (ByteBuffer::from(k), off))
            .collect();

        f.seek(SeekFrom::Start(0))?;
        tracing::debug!(generation, records = record_count, "opened sstable");

        Ok(Self {
            generation,
            paths,
            bloom,
            min_key: ByteBuffer::from(index.min_key),
            max_key: ByteBuffer::from(index.max_key),
            samples,
            record_count,
            data_len: index.data_len,
            file: Mutex::new(BufReader::new(f)),
            io_reads: AtomicU64::new(0),
        })
    }

    /// Point lookup for a single key. A tombstone reads as `Ok(None)`; use
    /// [`get_entry`](SSTable::get_entry) to tell it apart from a miss.
    pub fn get(&self, key: &[u8]) -> Result<Option<ByteBuffer>> {
        Ok(self.get_entry(key)?.flatten())
    }

    /// Looks `key` up and returns `Some(Some(value))` for a live record,
    /// `Some(None)` for a tombstone and `None` if this table has no record
    /// for it.
    ///
    /// Keys outside `[min_key, max_key]` and keys the bloom filter rules out
    /// return `Ok(None)` without any file I/O. Otherwise the sparse index
    /// picks the interval that could hold the key and only that interval is
    /// scanned.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if a scanned record fails its
    /// checksum.
    pub fn get_entry(&self, key: &[u8]) -> Result<Option<Option<ByteBuffer>>> {
        if self.min_key.compare_bytes(key) == Ordering::Greater
            || self.max_key.compare_bytes(key) == Ordering::Less
        {
            return Ok(None);
        }
        // Fast path: bloom filter says "definitely not here"
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }

        // Last sample <= key; the bounds check guarantees one exists.
        let slot = self
            .samples
            .partition_point(|(k, _)| k.compare_bytes(key) != Ordering::Greater);
        let Some(&(_, start)) = slot.checked_sub(1).and_then(|i| self.samples.get(i)) else {
            return Ok(None);
        };
        let end = self.samples.get(slot).map_or(self.data_len, |(_, off)| *off);

        let mut f = self.file.lock().map_err(|_| SSTableError::LockPoisoned)?;
        self.io_reads.fetch_add(1, AtomicOrdering::Relaxed);
        f.seek(SeekFrom::Start(start))?;

        let mut pos = start;
        while pos < end {
            let record = read_record(&mut *f)?;
            pos += record.encoded_len;
            match compare_bytes(&record.key, key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(record.value.map(ByteBuffer::from))),
                Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Sequential scan over every record in key order, tombstones included.
    ///
    /// Opens its own file handle, so iterating does not block `get`.
    pub fn iter(&self) -> Result<TableIter> {
        let f = open_existing(&self.paths.data)?;
        Ok(TableIter {
            reader: BufReader::new(f),
            remaining: self.record_count,
        })
    }

    /// Removes the three backing files. Files that are already gone are
    /// skipped, so calling this twice is fine.
    pub fn delete_files(&self) -> Result<()> {
        remove_paths(&self.paths)?;
        tracing::debug!(generation = self.generation, "deleted sstable files");
        Ok(())
    }

    /// Releases the in-memory handle. Equivalent to dropping it.
    pub fn close(self) {}

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the number of records in this table, tombstones included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.record_count
    }

    /// Always `false`: empty tables are never written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    #[must_use]
    pub fn min_key(&self) -> &ByteBuffer {
        &self.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> &ByteBuffer {
        &self.max_key
    }

    #[must_use]
    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    #[must_use]
    pub fn paths(&self) -> &TablePaths {
        &self.paths
    }

    /// Size of the record area in bytes.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.data_len
    }

    /// Number of sparse index samples.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// How many `get` calls had to read the data file.
    #[must_use]
    pub fn io_reads(&self) -> u64 {
        self.io_reads.load(AtomicOrdering::Relaxed)
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("generation", &self.generation)
            .field("records", &self.record_count)
            .field("min_key", &self.min_key)
            .field("max_key", &self.max_key)
            .field("samples", &self.samples.len())
            .field("bloom", &self.bloom)
            .finish()
    }
}

/// Iterator returned by [`SSTable::iter`]. Yields verified records in
/// ascending key order; a `None` value is a tombstone.
pub struct TableIter {
    reader: BufReader<File>,
    remaining: u64,
}

impl Iterator for TableIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match read_record(&mut self.reader) {
            Ok(r) => Some(Ok((ByteBuffer::from(r.key), r.value.map(ByteBuffer::from)))),
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

fn validate_samples(index: &IndexBlock) -> Result<()> {
    let first = &index.samples[0];
    if first.1 != 0 || first.0 != index.min_key {
        return Err(SSTableError::Corrupt(
            "first sample must be the first record".into(),
        ));
    }
    for pair in index.samples.windows(2) {
        if compare_bytes(&pair[0].0, &pair[1].0) != Ordering::Less || pair[0].1 >= pair[1].1 {
            return Err(SSTableError::Corrupt("sparse index is not ascending".into()));
        }
    }
    let last = &index.samples[index.samples.len() - 1];
    if last.1 >= index.data_len || compare_bytes(&last.0, &index.max_key) == Ordering::Greater {
        return Err(SSTableError::Corrupt(
            "sparse index points past the data section".into(),
        ));
    }
    Ok(())
}

fn remove_paths(paths: &TablePaths) -> Result<()> {
    for path in paths.in_delete_order() {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| not_found_or_io(e, path))
}

fn read_existing(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| not_found_or_io(e, path))
}

fn not_found_or_io(e: io::Error, path: &Path) -> SSTableError {
    if e.kind() == io::ErrorKind::NotFound {
        SSTableError::NotFound(path.to_path_buf())
    } else {
        SSTableError::Io(e)
    }
}
