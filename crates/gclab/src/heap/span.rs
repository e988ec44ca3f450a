//! Spans, object identifiers and pointer-layout types.

use std::fmt;

use crate::addr::{Bytes, Range, VAddr, Words};
use crate::bitmap::{self, Set};

use super::size_class::{HeapBitsType, SizeClass};
use super::PAGE_BYTES;

/// Dense identifier of an object slot.
///
/// Ids are handed out in contiguous runs, one run per span, and are never
/// reused for the lifetime of a [`Heap`](super::Heap).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

impl bitmap::Index for ObjectId {
    #[allow(clippy::cast_possible_truncation)]
    fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(index as u64)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Index of a span in its heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpanId(pub u32);

/// A run of pages holding either one large object or many objects of one
/// size class.
#[derive(Debug)]
pub struct Span {
    /// This span's index in the heap.
    pub id: SpanId,
    /// First byte of the span.
    pub start: VAddr,
    /// Byte just past the last object in the span.
    ///
    /// For classed spans this is generally not page aligned: the tail of the
    /// last page that cannot hold a whole object is not part of any object.
    pub end: VAddr,
    /// Number of pages backing the span.
    pub npages: u64,
    /// Size class, or `None` for a large-object span.
    pub size_class: Option<SizeClass>,
    /// Layout of the pointer information for objects in this span.
    pub heap_bits_type: HeapBitsType,
    /// Pointer/scalar information. The meaning depends on `heap_bits_type`:
    ///
    /// - `None`: empty.
    /// - `Packed`: bit i says whether word i of the span holds a pointer.
    /// - `Header`: entry i is the type id of object i. The runtime keeps these
    ///   in a header word in front of each object.
    /// - `Oob`: like `Header`, but stored in the span metadata.
    pub heap_bits: Vec<u64>,
    /// Which object slots are allocated.
    pub alloc_bits: Set<usize>,
    /// Id of object 0; object i has id `first_object + i`.
    pub first_object: ObjectId,
}

impl Span {
    /// The byte range covered by objects.
    #[must_use]
    pub const fn range(&self) -> Range {
        Range::new(self.start, self.end.minus(self.start))
    }

    /// Size of each object in the span.
    #[must_use]
    pub const fn object_bytes(&self) -> Bytes {
        match &self.size_class {
            Some(sc) => sc.object_bytes,
            None => PAGE_BYTES.mul(self.npages),
        }
    }

    /// Number of object slots in the span.
    #[must_use]
    pub const fn object_count(&self) -> u64 {
        match &self.size_class {
            Some(sc) => sc.objects_per_span(),
            None => 1,
        }
    }

    /// Bytes reserved by the span's pages.
    #[must_use]
    pub const fn page_bytes(&self) -> Bytes {
        PAGE_BYTES.mul(self.npages)
    }

    /// Range of the `i`th object.
    ///
    /// # Panics
    ///
    /// Panics if `i` is not a valid object index.
    #[must_use]
    pub fn object_range(&self, i: u64) -> Range {
        assert!(
            i < self.object_count(),
            "object {i} out of range [0,{})",
            self.object_count()
        );
        let size = self.object_bytes();
        Range::new(self.start.plus(size.mul(i)), size)
    }

    /// Id of the `i`th object.
    #[must_use]
    pub const fn object_id(&self, i: u64) -> ObjectId {
        ObjectId(self.first_object.0 + i)
    }

    /// Index of the object containing `addr`, which must be in the span.
    #[must_use]
    pub const fn object_index(&self, addr: VAddr) -> u64 {
        match &self.size_class {
            // Intentionally rounds down.
            Some(sc) => addr.minus(self.start).div(sc.object_bytes),
            None => 0,
        }
    }

    /// Whether the allocation bitmap has marked slot `i` allocated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_allocated(&self, i: u64) -> bool {
        self.alloc_bits.has(i as usize)
    }

    /// Every object slot as `(base, id)`, in address order.
    pub fn objects(&self) -> impl Iterator<Item = (VAddr, ObjectId)> + '_ {
        let size = self.object_bytes();
        (0..self.object_count()).map(move |i| (self.start.plus(size.mul(i)), self.object_id(i)))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.size_class {
            Some(sc) => write!(
                f,
                "span {} class {} ({} x {})",
                self.range(),
                sc.id,
                self.object_count(),
                sc.object_bytes
            ),
            None => write!(f, "span {} large", self.range()),
        }
    }
}

/// Pointer layout of a type the runtime reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    /// Runtime-assigned type id; 0 is reserved for "no type".
    pub id: u64,
    /// Size of one value of the type.
    pub size: Bytes,
    /// Number of leading words that may contain pointers.
    pub ptr_words: Words,
    /// Bit i says whether word i holds a pointer.
    pub ptr_mask: Vec<u64>,
}

impl Type {
    /// Whether word `i` of a value of this type holds a pointer.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_pointer(&self, i: Words) -> bool {
        if i >= self.ptr_words {
            return false;
        }
        let word = (i.0 / 64) as usize;
        self.ptr_mask
            .get(word)
            .is_some_and(|bits| bits & (1 << (i.0 % 64)) != 0)
    }
}
