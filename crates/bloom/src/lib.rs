//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits, the number of hash functions and how many items went in.
//!
//! Sizing is the caller's job: both the bit count and the hash count are
//! passed in directly and nothing here does floating-point arithmetic.
//!
//! ## Usage in the sector index
//!
//! Each SSTable generation persists a bloom filter built from its keys. A
//! lookup consults the filter first, and if it says "not present" the table
//! is skipped without touching its data file.
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(64, 3).unwrap();
//! bf.insert(b"x");
//! assert!(bf.may_contain(b"x"));
//! ```
mod bitvec;
mod hash;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub use bitvec::{BitVector, WORD_BITS};
pub use hash::murmur3_32;

/// Cap on the serialized word array (128 MiB), checked before allocating.
const MAX_BLOOM_BYTES: u64 = 128 * 1024 * 1024;

/// Largest filter [`BloomFilter::new`] accepts; its word count fits the
/// `u32` length field of the serialized form.
pub const MAX_BLOOM_BITS: u64 = MAX_BLOOM_BYTES * 8;

#[derive(Debug, thiserror::Error)]
pub enum BloomError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bit index {index} out of range for capacity {capacity}")]
    OutOfRange { index: u64, capacity: u64 },

    #[error("out of memory allocating a {bits}-bit vector")]
    OutOfMemory { bits: u64 },

    #[error("corrupt bloom filter: {0}")]
    Corrupt(String),

    #[error("bloom filter I/O: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BloomError>;

/// A bloom filter over a [`BitVector`] with `k` seeded hash functions.
///
/// Probe `i` (for `i` in `0..k`) sets bit `murmur3_32(key, i) % num_bits`.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: BitVector,
    num_hashes: u32,
    num_items: u64,
}

impl BloomFilter {
    /// Creates an empty filter of `num_bits` bits checked by `num_hashes`
    /// hash functions.
    ///
    /// # Errors
    ///
    /// [`BloomError::InvalidArgument`] if either parameter is zero or
    /// `num_bits` exceeds [`MAX_BLOOM_BITS`].
    pub fn new(num_bits: u64, num_hashes: u32) -> Result<Self> {
        if num_hashes == 0 {
            return Err(BloomError::InvalidArgument(
                "bloom filter needs at least one hash function".into(),
            ));
        }
        if num_bits > MAX_BLOOM_BITS {
            return Err(BloomError::InvalidArgument(format!(
                "bloom filter of {} bits exceeds the {}-bit limit",
                num_bits, MAX_BLOOM_BITS
            )));
        }
        Ok(Self {
            bits: BitVector::new(num_bits)?,
            num_hashes,
            num_items: 0,
        })
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        for seed in 0..self.num_hashes {
            self.bits.set_reduced(u64::from(murmur3_32(key, seed)));
        }
        self.num_items += 1;
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        (0..self.num_hashes).all(|seed| self.bits.get_reduced(u64::from(murmur3_32(key, seed))))
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.bits.len()
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Number of insertions so far (duplicates included).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.num_items
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_items == 0
    }

    /// The underlying bit storage.
    #[must_use]
    pub fn bits(&self) -> &BitVector {
        &self.bits
    }

    /// Returns the size of the serialized bloom filter in bytes.
    ///
    /// Layout: `num_bits(u64) + num_hashes(u32) + num_items(u64) + word_count(u32) + words`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + 4 + 8 + 4 + self.bits.words().len() * 4
    }

    /// Serializes the bloom filter to a writer.
    ///
    /// Wire format (all little-endian):
    /// ```text
    /// [num_bits: u64][num_hashes: u32][num_items: u64][word_count: u32][words: u32 * word_count]
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.bits.len())?;
        w.write_u32::<LittleEndian>(self.num_hashes)?;
        w.write_u64::<LittleEndian>(self.num_items)?;
        let word_count = u32::try_from(self.bits.words().len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "bloom word count overflows u32")
        })?;
        w.write_u32::<LittleEndian>(word_count)?;
        for word in self.bits.words() {
            w.write_u32::<LittleEndian>(*word)?;
        }
        Ok(())
    }

    /// Deserializes a bloom filter from a reader.
    ///
    /// # Errors
    ///
    /// [`BloomError::Corrupt`] if the header is inconsistent (zero bits or
    /// hashes, a word count that does not match `num_bits`, or an oversized
    /// word array), [`BloomError::Io`] on short reads.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let num_bits = r.read_u64::<LittleEndian>()?;
        let num_hashes = r.read_u32::<LittleEndian>()?;
        let num_items = r.read_u64::<LittleEndian>()?;
        let word_count = r.read_u32::<LittleEndian>()?;

        if num_hashes == 0 {
            return Err(BloomError::Corrupt("zero hash functions".into()));
        }
        if u64::from(word_count) * 4 > MAX_BLOOM_BYTES {
            return Err(BloomError::Corrupt(format!(
                "bloom filter too large: {} words",
                word_count
            )));
        }

        let mut words = vec![0u32; word_count as usize];
        r.read_u32_into::<LittleEndian>(&mut words)?;

        Ok(Self {
            bits: BitVector::from_words(words, num_bits)?,
            num_hashes,
            num_items,
        })
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.bits.len())
            .field("num_hashes", &self.num_hashes)
            .field("num_items", &self.num_items)
            .finish()
    }
}
