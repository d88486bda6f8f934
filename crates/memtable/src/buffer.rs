use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{MemtableError, Result};

/// Immutable, owned byte sequence used for every key and value in the index.
///
/// Ordering is **length-first**: a shorter buffer always sorts before a longer
/// one, and only buffers of equal length are compared byte by byte. This is
/// not the same order as `[u8]`'s lexicographic `Ord`, so `ByteBuffer`
/// borrows as [`KeySlice`] rather than `[u8]`: a `BTreeMap` searched with a
/// plain slice would use the wrong comparator.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteBuffer(Box<[u8]>);

impl ByteBuffer {
    /// Copies `data` into a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MemtableError::OutOfMemory`] if the allocation cannot be
    /// satisfied. Nothing is allocated in that case.
    pub fn copy_from(data: &[u8]) -> Result<Self> {
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(data.len())
            .map_err(|_| MemtableError::OutOfMemory {
                requested: data.len(),
            })?;
        owned.extend_from_slice(data);
        Ok(Self(owned.into_boxed_slice()))
    }

    /// Returns the buffer contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length-first comparison against a borrowed slice.
    #[must_use]
    pub fn compare_bytes(&self, other: &[u8]) -> Ordering {
        compare_bytes(&self.0, other)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.0.into_vec()
    }
}

/// Length-first ordering shared by the memtable, SSTable bounds and the
/// sparse index: shorter sorts first, equal lengths compare byte by byte.
#[must_use]
pub fn compare_bytes(lhs: &[u8], rhs: &[u8]) -> Ordering {
    lhs.len().cmp(&rhs.len()).then_with(|| lhs.cmp(rhs))
}

impl Ord for ByteBuffer {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_bytes(&self.0, &other.0)
    }
}

impl PartialOrd for ByteBuffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Borrowed, unsized view of a key with the same length-first order as
/// [`ByteBuffer`]. Lets ordered maps keyed by `ByteBuffer` be searched with a
/// `&[u8]` without allocating.
#[repr(transparent)]
pub struct KeySlice([u8]);

impl KeySlice {
    pub fn new(bytes: &[u8]) -> &KeySlice {
        // SAFETY: `KeySlice` is `repr(transparent)` over `[u8]`, so the two
        // fat pointers have identical layout and metadata.
        unsafe { &*(bytes as *const [u8] as *const KeySlice) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for KeySlice {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for KeySlice {}

impl Ord for KeySlice {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_bytes(&self.0, &other.0)
    }
}

impl PartialOrd for KeySlice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Must hash exactly like `ByteBuffer`, whose derived impl hashes the slice.
impl Hash for KeySlice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Borrow<KeySlice> for ByteBuffer {
    fn borrow(&self) -> &KeySlice {
        KeySlice::new(&self.0)
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self(v.into_boxed_slice())
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(v: &[u8]) -> Self {
        Self(v.into())
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteBuffer({:?})", String::from_utf8_lossy(&self.0))
    }
}
