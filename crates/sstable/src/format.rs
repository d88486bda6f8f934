//! SSTable binary format: file naming, record codec, and the encodings of the
//! `.bloom` and `.index` companions.
//!
//! ## `.data`
//!
//! ```text
//! [crc32: u32][key_len: u32][key][present: u8][val_len: u32][val]   ... repeated
//! [record_count: u64][magic: u32 = "SLD1"]                          footer
//! ```
//!
//! The CRC32 covers everything after itself in the record. A tombstone has
//! `present = 0` and no `val_len`/`val`.
//!
//! ## `.bloom`
//!
//! ```text
//! [magic: u32 = "SLB1"][serialized BloomFilter][crc32: u32]
//! ```
//!
//! ## `.index`
//!
//! ```text
//! [magic: u32 = "SLI1"][generation: u64][record_count: u64][data_len: u64]
//! [interval: u32][min_key_len: u32][min_key][max_key_len: u32][max_key]
//! [sample_count: u32]([key_len: u32][key][offset: u64]) * sample_count
//! [crc32: u32]
//! ```
//!
//! The trailing CRC32 covers every byte before it. All integers are
//! little-endian.

use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{Result, SSTableError};

/// Magic number closing a `.data` file (ASCII "SLD1").
pub const DATA_MAGIC: u32 = 0x534C_4431;

/// Magic number opening a `.bloom` file (ASCII "SLB1").
pub const BLOOM_MAGIC: u32 = 0x534C_4231;

/// Magic number opening an `.index` file (ASCII "SLI1").
pub const INDEX_MAGIC: u32 = 0x534C_4931;

/// Size of the `.data` footer: 8 (`record_count`) + 4 (`magic`).
pub const DATA_FOOTER_BYTES: u64 = 8 + 4;

pub const DATA_EXTENSION: &str = "data";
pub const BLOOM_EXTENSION: &str = "bloom";
pub const INDEX_EXTENSION: &str = "index";
pub const TMP_SUFFIX: &str = "tmp";

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during reads (10 MiB). Prevents OOM on corrupt files.
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// The three companion files of one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    pub data: PathBuf,
    pub bloom: PathBuf,
    pub index: PathBuf,
}

impl TablePaths {
    /// `<dir>/<generation:020>.{data,bloom,index}`.
    pub fn new(dir: &Path, generation: u64) -> Self {
        Self {
            data: dir.join(file_name(generation, DATA_EXTENSION)),
            bloom: dir.join(file_name(generation, BLOOM_EXTENSION)),
            index: dir.join(file_name(generation, INDEX_EXTENSION)),
        }
    }

    /// Sibling `*.tmp` paths used while a generation is being written.
    pub fn temporary(&self) -> Self {
        Self {
            data: tmp_path(&self.data),
            bloom: tmp_path(&self.bloom),
            index: tmp_path(&self.index),
        }
    }

    /// Paths in deletion order: the index goes first so that a half-deleted
    /// generation is never picked up again.
    pub fn in_delete_order(&self) -> [&Path; 3] {
        [&self.index, &self.bloom, &self.data]
    }
}

fn file_name(generation: u64, ext: &str) -> String {
    format!("{:020}.{}", generation, ext)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(TMP_SUFFIX);
    PathBuf::from(os)
}

/// Extracts the generation id from a `<generation>.index` file name.
pub fn parse_index_name(path: &Path) -> Option<u64> {
    if path.extension()? != INDEX_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

// -------------------- Records --------------------

/// A record decoded from the data section.
#[derive(Debug)]
pub struct RawRecord {
    pub key: Vec<u8>,
    /// `None` for a tombstone.
    pub value: Option<Vec<u8>>,
    /// Bytes the record occupies on disk, CRC prefix included.
    pub encoded_len: u64,
}

/// Appends one record to `w` and returns its encoded length. A `None` value
/// writes a tombstone. `scratch` is reused between calls.
pub fn write_record<W: Write>(
    w: &mut W,
    key: &[u8],
    value: Option<&[u8]>,
    scratch: &mut Vec<u8>,
) -> io::Result<u64> {
    scratch.clear();
    scratch.write_u32::<LittleEndian>(key.len() as u32)?;
    scratch.extend_from_slice(key);
    match value {
        Some(value) => {
            scratch.write_u8(1)?;
            scratch.write_u32::<LittleEndian>(value.len() as u32)?;
            scratch.extend_from_slice(value);
        }
        None => scratch.write_u8(0)?,
    }

    w.write_u32::<LittleEndian>(crc32fast::hash(scratch))?;
    w.write_all(scratch)?;
    Ok(4 + scratch.len() as u64)
}

/// Reads and verifies one record.
pub fn read_record<R: Read>(r: &mut R) -> Result<RawRecord> {
    let stored_crc = r.read_u32::<LittleEndian>().map_err(truncated)?;

    let key_len = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let key = read_bounded(r, key_len as usize, MAX_KEY_BYTES, "key")?;
    let present = r.read_u8().map_err(truncated)?;

    let mut hasher = Crc32::new();
    hasher.update(&key_len.to_le_bytes());
    hasher.update(&key);
    hasher.update(&[present]);
    let mut encoded_len = 4 + 4 + u64::from(key_len) + 1;

    let value = match present {
        0 => None,
        1 => {
            let val_len = r.read_u32::<LittleEndian>().map_err(truncated)?;
            let value = read_bounded(r, val_len as usize, MAX_VALUE_BYTES, "value")?;
            hasher.update(&val_len.to_le_bytes());
            hasher.update(&value);
            encoded_len += 4 + u64::from(val_len);
            Some(value)
        }
        other => {
            return Err(SSTableError::Corrupt(format!(
                "invalid present flag {:#04x}",
                other
            )))
        }
    };

    let actual_crc = hasher.finalize();
    if actual_crc != stored_crc {
        return Err(SSTableError::Corrupt(format!(
            "record CRC32 mismatch: expected {:#010x}, got {:#010x}",
            stored_crc, actual_crc
        )));
    }

    Ok(RawRecord {
        key,
        value,
        encoded_len,
    })
}

fn read_bounded<R: Read>(r: &mut R, len: usize, max: usize, what: &str) -> Result<Vec<u8>> {
    if len > max {
        return Err(SSTableError::Corrupt(format!(
            "{} length {} exceeds maximum {}",
            what, len, max
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

/// Short reads inside a section mean the file was cut off.
fn truncated(e: io::Error) -> SSTableError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SSTableError::Corrupt("unexpected end of file".into())
    } else {
        SSTableError::Io(e)
    }
}

// -------------------- Data footer --------------------

pub fn write_data_footer<W: Write>(w: &mut W, record_count: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(record_count)?;
    w.write_u32::<LittleEndian>(DATA_MAGIC)?;
    Ok(())
}

/// Reads the footer at the end of a `.data` file and returns the record count.
pub fn read_data_footer<R: Read + Seek>(r: &mut R) -> Result<u64> {
    let filesize = r.seek(SeekFrom::End(0))?;
    if filesize < DATA_FOOTER_BYTES {
        return Err(SSTableError::Corrupt(
            "data file too small for footer".into(),
        ));
    }
    r.seek(SeekFrom::End(-(DATA_FOOTER_BYTES as i64)))?;
    let record_count = r.read_u64::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != DATA_MAGIC {
        return Err(SSTableError::Corrupt(format!(
            "unknown data magic: {:#x}",
            magic
        )));
    }
    Ok(record_count)
}

// -------------------- Bloom file --------------------

pub fn encode_bloom(bloom: &BloomFilter) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4 + bloom.serialized_size() + 4);
    buf.write_u32::<LittleEndian>(BLOOM_MAGIC)?;
    bloom.write_to(&mut buf)?;
    let crc = crc32fast::hash(&buf);
    buf.write_u32::<LittleEndian>(crc)?;
    Ok(buf)
}

pub fn decode_bloom(bytes: &[u8]) -> Result<BloomFilter> {
    let body = verify_trailing_crc(bytes, "bloom")?;
    let mut cur = Cursor::new(body);
    let magic = cur.read_u32::<LittleEndian>().map_err(truncated)?;
    if magic != BLOOM_MAGIC {
        return Err(SSTableError::Corrupt(format!(
            "unknown bloom magic: {:#x}",
            magic
        )));
    }
    let bloom = BloomFilter::read_from(&mut cur).map_err(|e| SSTableError::Corrupt(e.to_string()))?;
    expect_consumed(&cur, "bloom")?;
    Ok(bloom)
}

// -------------------- Index file --------------------

/// Decoded contents of an `.index` file: table metadata plus the sparse
/// key -> data offset samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub generation: u64,
    pub record_count: u64,
    /// Length of the record area of `.data`, footer excluded.
    pub data_len: u64,
    pub interval: u32,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub samples: Vec<(Vec<u8>, u64)>,
}

impl IndexBlock {
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(INDEX_MAGIC)?;
        buf.write_u64::<LittleEndian>(self.generation)?;
        buf.write_u64::<LittleEndian>(self.record_count)?;
        buf.write_u64::<LittleEndian>(self.data_len)?;
        buf.write_u32::<LittleEndian>(self.interval)?;
        write_bytes(&mut buf, &self.min_key)?;
        write_bytes(&mut buf, &self.max_key)?;
        buf.write_u32::<LittleEndian>(self.samples.len() as u32)?;
        for (key, offset) in &self.samples {
            write_bytes(&mut buf, key)?;
            buf.write_u64::<LittleEndian>(*offset)?;
        }
        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let body = verify_trailing_crc(bytes, "index")?;
        let mut cur = Cursor::new(body);

        let magic = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        if magic != INDEX_MAGIC {
            return Err(SSTableError::Corrupt(format!(
                "unknown index magic: {:#x}",
                magic
            )));
        }
        let generation = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let record_count = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let data_len = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let interval = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        let min_key = read_bytes(&mut cur)?;
        let max_key = read_bytes(&mut cur)?;

        let sample_count = cur.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        // Each sample needs at least 12 bytes, so a larger count is garbage.
        if sample_count > body.len() / 12 {
            return Err(SSTableError::Corrupt(format!(
                "sample count {} does not fit in {} bytes",
                sample_count,
                body.len()
            )));
        }
        let mut samples = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            let key = read_bytes(&mut cur)?;
            let offset = cur.read_u64::<LittleEndian>().map_err(truncated)?;
            samples.push((key, offset));
        }
        expect_consumed(&cur, "index")?;

        Ok(Self {
            generation,
            record_count,
            data_len,
            interval,
            min_key,
            max_key,
            samples,
        })
    }
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>().map_err(truncated)?;
    read_bounded(r, len as usize, MAX_KEY_BYTES, "key")
}

/// Splits off and checks the trailing CRC32, returning the covered body.
fn verify_trailing_crc<'a>(bytes: &'a [u8], what: &str) -> Result<&'a [u8]> {
    if bytes.len() < 8 {
        return Err(SSTableError::Corrupt(format!("{} file too small", what)));
    }
    let (body, tail) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let actual = crc32fast::hash(body);
    if stored != actual {
        return Err(SSTableError::Corrupt(format!(
            "{} CRC32 mismatch: expected {:#010x}, got {:#010x}",
            what, stored, actual
        )));
    }
    Ok(body)
}

fn expect_consumed(cur: &Cursor<&[u8]>, what: &str) -> Result<()> {
    let len = cur.get_ref().len() as u64;
    if cur.position() != len {
        return Err(SSTableError::Corrupt(format!(
            "{} has {} trailing bytes",
            what,
            len - cur.position()
        )));
    }
    Ok(())
}
