//! Address arithmetic for the simulated address space.
//!
//! Every quantity that crosses the trace boundary is a `u64`, but mixing up a
//! byte count with a word count or a virtual address with a dense logical
//! address is an easy way to corrupt a replay. These newtypes keep them apart
//! and make every arithmetic step overflow-checked.

use std::fmt;

use crate::heap::{ArenaId, ARENA_BYTES, PAGE_BYTES, WORD_BYTES};

// ============================================================================
// Bytes / Words
// ============================================================================

/// A count of bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bytes(pub u64);

impl Bytes {
    /// Multiply by an element count.
    ///
    /// # Panics
    ///
    /// Panics on overflow.
    #[must_use]
    pub const fn mul(self, n: u64) -> Self {
        match self.0.checked_mul(n) {
            Some(v) => Self(v),
            None => panic!("Bytes overflow in mul"),
        }
    }

    /// Number of whole `per`-sized elements that fit in `self` (rounds down).
    ///
    /// # Panics
    ///
    /// Panics if `per` is zero.
    #[must_use]
    pub const fn div(self, per: Self) -> u64 {
        assert!(per.0 != 0, "Bytes division by zero");
        self.0 / per.0
    }

    /// Convert to a word count.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not a multiple of [`WORD_BYTES`].
    #[must_use]
    pub const fn words(self) -> Words {
        assert!(
            self.0 % WORD_BYTES.0 == 0,
            "byte count is not a whole number of words"
        );
        Words(self.0 / WORD_BYTES.0)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

/// A count of pointer-sized words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Words(pub u64);

impl Words {
    /// Multiply by an element count.
    ///
    /// # Panics
    ///
    /// Panics on overflow.
    #[must_use]
    pub const fn mul(self, n: u64) -> Self {
        match self.0.checked_mul(n) {
            Some(v) => Self(v),
            None => panic!("Words overflow in mul"),
        }
    }

    /// Convert to a byte count.
    #[must_use]
    pub const fn bytes(self) -> Bytes {
        WORD_BYTES.mul(self.0)
    }
}

impl fmt::Display for Words {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}W", self.0)
    }
}

// ============================================================================
// VAddr / VPage
// ============================================================================

/// A byte address in the simulated (sparse) virtual address space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VAddr(pub u64);

impl VAddr {
    /// Index of the arena containing this address.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn arena_index(self) -> usize {
        (self.0 / ARENA_BYTES.0) as usize
    }

    /// Split into arena index and offset within that arena.
    #[must_use]
    pub const fn arena(self) -> (usize, Bytes) {
        (self.arena_index(), Bytes(self.0 % ARENA_BYTES.0))
    }

    /// The page containing this address.
    #[must_use]
    pub const fn page(self) -> VPage {
        VPage(self.0 / PAGE_BYTES.0)
    }

    /// Advance by `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the result wraps around the address space.
    #[must_use]
    pub const fn plus(self, n: Bytes) -> Self {
        match self.0.checked_add(n.0) {
            Some(v) => Self(v),
            None => panic!("VAddr overflow in plus"),
        }
    }

    /// Distance from `base` up to `self`.
    ///
    /// # Panics
    ///
    /// Panics if `base` is above `self`.
    #[must_use]
    pub const fn minus(self, base: Self) -> Bytes {
        match self.0.checked_sub(base.0) {
            Some(v) => Bytes(v),
            None => panic!("VAddr underflow in minus"),
        }
    }
}

impl fmt::Display for VAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A virtual page number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VPage(pub u64);

/// Pages per arena.
pub const PAGES_PER_ARENA: u64 = ARENA_BYTES.0 / PAGE_BYTES.0;

impl VPage {
    /// First byte of the page.
    #[must_use]
    pub const fn start(self) -> VAddr {
        VAddr(PAGE_BYTES.mul(self.0).0)
    }

    /// Advance by `n` pages.
    ///
    /// # Panics
    ///
    /// Panics on overflow.
    #[must_use]
    pub const fn plus(self, n: u64) -> Self {
        match self.0.checked_add(n) {
            Some(v) => Self(v),
            None => panic!("VPage overflow in plus"),
        }
    }

    /// Index of the arena containing this page.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn arena_index(self) -> usize {
        (self.0 / PAGES_PER_ARENA) as usize
    }

    /// Index of this page within its arena.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn arena_offset(self) -> usize {
        (self.0 % PAGES_PER_ARENA) as usize
    }
}

// ============================================================================
// LAddr - dense logical addresses
// ============================================================================

/// A dense address: arena id times [`ARENA_BYTES`] plus the arena offset.
///
/// Unlike [`VAddr`], the logical space has no holes for unregistered arenas,
/// so it can index bitmaps sized to the live heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LAddr(pub u64);

/// Logical address of a virtual address that has no arena.
pub const NO_LADDR: LAddr = LAddr(u64::MAX);

impl LAddr {
    /// Split into arena id and offset within that arena.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn arena(self) -> (ArenaId, Bytes) {
        (
            ArenaId((self.0 / ARENA_BYTES.0) as u32),
            Bytes(self.0 % ARENA_BYTES.0),
        )
    }
}

impl fmt::Display for LAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NO_LADDR {
            return f.write_str("NoLAddr");
        }
        write!(f, "L{:#x}", self.0)
    }
}

// ============================================================================
// Range
// ============================================================================

/// A half-open byte range `[start, start + len)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Range {
    /// First byte.
    pub start: VAddr,
    /// Length in bytes.
    pub len: Bytes,
}

impl Range {
    /// Create a range.
    #[must_use]
    pub const fn new(start: VAddr, len: Bytes) -> Self {
        Self { start, len }
    }

    /// Byte just past the end of the range.
    #[must_use]
    pub const fn end(&self) -> VAddr {
        self.start.plus(self.len)
    }

    /// Whether `addr` falls inside the range.
    #[must_use]
    pub const fn contains(&self, addr: VAddr) -> bool {
        addr.0 >= self.start.0 && addr.0 < self.end().0
    }

    /// Whether the two ranges share at least one byte.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start.0 < other.end().0 && other.start.0 < self.end().0
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vaddr_decomposition() {
        let addr = VAddr(ARENA_BYTES.0 * 3 + PAGE_BYTES.0 * 5 + 24);
        assert_eq!(addr.arena_index(), 3);
        assert_eq!(addr.arena(), (3, Bytes(PAGE_BYTES.0 * 5 + 24)));
        assert_eq!(addr.page().arena_index(), 3);
        assert_eq!(addr.page().arena_offset(), 5);
        assert_eq!(addr.page().start(), VAddr(ARENA_BYTES.0 * 3 + PAGE_BYTES.0 * 5));
    }

    #[test]
    fn test_plus_minus() {
        let base = VAddr(0x1000);
        let end = base.plus(Bytes(0x20));
        assert_eq!(end, VAddr(0x1020));
        assert_eq!(end.minus(base), Bytes(0x20));
    }

    #[test]
    #[should_panic(expected = "VAddr overflow")]
    fn test_plus_overflow() {
        let _ = VAddr(u64::MAX - 1).plus(Bytes(2));
    }

    #[test]
    #[should_panic(expected = "VAddr underflow")]
    fn test_minus_underflow() {
        let _ = VAddr(8).minus(VAddr(16));
    }

    #[test]
    fn test_bytes_words() {
        assert_eq!(Bytes(64).words(), Words(8));
        assert_eq!(Words(3).bytes(), Bytes(24));
        assert_eq!(PAGE_BYTES.div(Bytes(48)), 170);
    }

    #[test]
    #[should_panic(expected = "not a whole number of words")]
    fn test_inexact_words() {
        let _ = Bytes(12).words();
    }

    #[test]
    fn test_range_overlap() {
        let a = Range::new(VAddr(0), Bytes(16));
        let b = Range::new(VAddr(15), Bytes(1));
        let c = Range::new(VAddr(16), Bytes(16));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.contains(VAddr(15)));
        assert!(!a.contains(VAddr(16)));
        assert_eq!(a.to_string(), "[0x0,0x10)");
    }

    #[test]
    fn test_laddr_split() {
        let l = LAddr(ARENA_BYTES.0 * 2 + 40);
        assert_eq!(l.arena(), (ArenaId(2), Bytes(40)));
        assert_eq!(NO_LADDR.to_string(), "NoLAddr");
    }
}
