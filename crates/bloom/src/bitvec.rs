use crate::{BloomError, Result};

/// Width of one storage word in bits.
pub const WORD_BITS: u64 = u32::BITS as u64;

/// Dense, fixed-capacity bitset packed into `u32` words.
///
/// Bit `i` lives in word `i / 32` at position `i % 32` (LSB first). Capacity
/// is fixed at construction and every access is bounds-checked.
#[derive(Clone, PartialEq, Eq)]
pub struct BitVector {
    words: Vec<u32>,
    num_bits: u64,
}

impl BitVector {
    /// Creates a zeroed vector holding `num_bits` bits in
    /// `ceil(num_bits / 32)` words.
    ///
    /// # Errors
    ///
    /// [`BloomError::InvalidArgument`] if `num_bits == 0`,
    /// [`BloomError::OutOfMemory`] if the word array cannot be allocated.
    pub fn new(num_bits: u64) -> Result<Self> {
        if num_bits == 0 {
            return Err(BloomError::InvalidArgument(
                "bit vector must hold at least one bit".into(),
            ));
        }
        let word_count = usize::try_from(words_for(num_bits))
            .map_err(|_| BloomError::OutOfMemory { bits: num_bits })?;
        let mut words = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| BloomError::OutOfMemory { bits: num_bits })?;
        words.resize(word_count, 0);
        Ok(Self { words, num_bits })
    }

    /// Rebuilds a vector from its serialized words.
    pub(crate) fn from_words(words: Vec<u32>, num_bits: u64) -> Result<Self> {
        if num_bits == 0 || words.len() as u64 != words_for(num_bits) {
            return Err(BloomError::Corrupt(format!(
                "{} words cannot hold exactly {} bits",
                words.len(),
                num_bits
            )));
        }
        Ok(Self { words, num_bits })
    }

    pub fn get(&self, index: u64) -> Result<bool> {
        let (word, mask) = self.locate(index)?;
        Ok(self.words[word] & mask != 0)
    }

    pub fn set(&mut self, index: u64, value: bool) -> Result<()> {
        let (word, mask) = self.locate(index)?;
        if value {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }
        Ok(())
    }

    /// Number of addressable bits.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.num_bits
    }

    /// Always `false`: a vector holds at least one bit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    #[must_use]
    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Resets every bit to zero.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub(crate) fn words(&self) -> &[u32] {
        &self.words
    }

    /// Sets bit `hash % len()`; the reduced index is always in range.
    pub(crate) fn set_reduced(&mut self, hash: u64) {
        let idx = hash % self.num_bits;
        self.words[(idx / WORD_BITS) as usize] |= 1 << (idx % WORD_BITS);
    }

    /// Reads bit `hash % len()`.
    pub(crate) fn get_reduced(&self, hash: u64) -> bool {
        let idx = hash % self.num_bits;
        self.words[(idx / WORD_BITS) as usize] & (1 << (idx % WORD_BITS)) != 0
    }

    fn locate(&self, index: u64) -> Result<(usize, u32)> {
        if index >= self.num_bits {
            return Err(BloomError::OutOfRange {
                index,
                capacity: self.num_bits,
            });
        }
        Ok(((index / WORD_BITS) as usize, 1 << (index % WORD_BITS)))
    }
}

/// `ceil(num_bits / 32)`.
pub(crate) fn words_for(num_bits: u64) -> u64 {
    num_bits.div_ceil(WORD_BITS)
}

impl std::fmt::Debug for BitVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitVector")
            .field("num_bits", &self.num_bits)
            .field("words", &self.words.len())
            .field("ones", &self.count_ones())
            .finish()
    }
}
