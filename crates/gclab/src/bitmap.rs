//! Dense bit-sets keyed by small integer identifiers.
//!
//! The replay tracks queued and marked objects for every object the heap has
//! ever handed out an id to. Object ids are dense, so a bit per id is far
//! cheaper than a hash set, and snapshots are a plain copy of the words.

use std::fmt;
use std::marker::PhantomData;

use bitvec::prelude::*;

/// A type that can be used as a dense bit index.
pub trait Index: Copy {
    /// The bit position for this value.
    fn index(self) -> usize;
    /// The value at bit position `index`.
    fn from_index(index: usize) -> Self;
}

impl Index for usize {
    fn index(self) -> usize {
        self
    }

    fn from_index(index: usize) -> Self {
        index
    }
}

/// A growable set of dense indices.
///
/// # Example
///
/// ```
/// use gclab::bitmap::Set;
///
/// let mut set: Set<usize> = Set::new(128);
/// assert!(set.add(3));
/// assert!(!set.add(3));
/// assert!(set.has(3));
/// assert!(!set.has(1000));
/// assert_eq!(set.len(), 1);
/// ```
pub struct Set<T> {
    bits: BitVec<u64, Lsb0>,
    /// Number of set bits, kept so `len` does not need a popcount pass.
    count: usize,
    _marker: PhantomData<T>,
}

impl<T: Index> Set<T> {
    /// Create an empty set with room for indices below `capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bits: bitvec![u64, Lsb0; 0; capacity],
            count: 0,
            _marker: PhantomData,
        }
    }

    /// Build a set from raw 64-bit words, keeping only the first `len` bits.
    #[must_use]
    pub fn from_words(words: &[u64], len: usize) -> Self {
        let mut bits = BitVec::<u64, Lsb0>::from_slice(words);
        bits.resize(len, false);
        let count = bits.count_ones();
        Self {
            bits,
            count,
            _marker: PhantomData,
        }
    }

    /// Insert `value`, growing the set as needed.
    ///
    /// Returns `true` if the value was not already present.
    pub fn add(&mut self, value: T) -> bool {
        let i = value.index();
        if i >= self.bits.len() {
            // Grow in whole words so repeated adds near the end stay cheap.
            let new_len = (i + 1).next_multiple_of(64).max(self.bits.len() * 2);
            self.bits.resize(new_len, false);
        }
        if self.bits.replace(i, true) {
            false
        } else {
            self.count += 1;
            true
        }
    }

    /// Whether `value` is present.
    #[must_use]
    pub fn has(&self, value: T) -> bool {
        self.bits.get(value.index()).is_some_and(|b| *b)
    }

    /// Number of values present.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the set is empty.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Remove every value, keeping the allocation.
    pub fn clear(&mut self) {
        self.bits.fill(false);
        self.count = 0;
    }

    /// A frozen copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            bits: self.bits.clone(),
            count: self.count,
            _marker: PhantomData,
        }
    }

    /// Iterate present values in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.bits.iter_ones().map(T::from_index)
    }

    /// Values present in `self` but not in `other`, ascending.
    pub fn difference<'a>(&'a self, other: &'a Self) -> impl Iterator<Item = T> + 'a {
        self.iter().filter(move |&v| !other.has(v))
    }
}

impl<T: Index> Default for Set<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: Index> Clone for Set<T> {
    fn clone(&self) -> Self {
        self.snapshot()
    }
}

impl<T: Index> fmt::Debug for Set<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Set")
            .field("len", &self.count)
            .field("capacity", &self.bits.len())
            .finish()
    }
}

impl<T: Index> FromIterator<T> for Set<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new(0);
        for v in iter {
            set.add(v);
        }
        set
    }
}
