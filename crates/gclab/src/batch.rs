//! The per-generation batch wire format.
//!
//! The runtime writes the bulk of each cycle's data as byte batches rather
//! than individual trace events. Every batch starts with a header:
//!
//! ```text
//! kind: u8  generation: uvarint  records...
//! ```
//!
//! and records run to the end of the batch. Integers are unsigned LEB128
//! varints except for bitmap words, which are fixed 8-byte little-endian.
//!
//! | kind   | record                                                            |
//! |--------|-------------------------------------------------------------------|
//! | Sizes  | `size, pages, heap_bits: u8`                                      |
//! | Spans  | `base, span_class_word`                                           |
//! | Scan   | `base\|kind, n, n x (offset delta, ptr\|found)`                   |
//! | Allocs | `base, n_elems, ceil(n_elems/64) x u64, heap bits section`        |
//! | Types  | `id, size, (ptr_words \| mask_offset), len<<1\|partial, len x u64` |
//!
//! The `process_*` functions decode every batch of one kind and generation
//! and feed the records to an [`Eventer`]. [`BatchWriter`] produces the same
//! format.

use std::fmt;
use std::sync::Arc;

use crate::addr::{Bytes, VAddr, Words};
use crate::error::{Error, Result};
use crate::event::{Eventer, ScanKind};
use crate::heap::{HeapBitsType, SizeClass};

// ============================================================================
// Batch kinds and headers
// ============================================================================

/// What a batch holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BatchKind {
    /// The size-class table.
    Sizes = 0,
    /// Spans that existed when the cycle started.
    Spans = 1,
    /// Root and object scans.
    Scan = 2,
    /// Allocation and heap bits of each span.
    Allocs = 3,
    /// Type pointer layouts.
    Types = 4,
}

impl TryFrom<u8> for BatchKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Sizes),
            1 => Ok(Self::Spans),
            2 => Ok(Self::Scan),
            3 => Ok(Self::Allocs),
            4 => Ok(Self::Types),
            other => Err(Error::UnknownBatchKind(other)),
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sizes => "sizes",
            Self::Spans => "spans",
            Self::Scan => "scan",
            Self::Allocs => "allocs",
            Self::Types => "types",
        })
    }
}

/// One batch with its header parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// What the batch holds.
    pub kind: BatchKind,
    /// The GC cycle the batch belongs to.
    pub generation: u64,
    data: Vec<u8>,
    records: usize,
}

impl Batch {
    /// Parse a batch header.
    ///
    /// # Errors
    ///
    /// Fails if the header is truncated or names an unknown kind.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let mut r = BatchReader::new(&data);
        let kind = BatchKind::try_from(r.byte()?)?;
        let generation = r.varint()?;
        let records = r.position();
        Ok(Self {
            kind,
            generation,
            data,
            records,
        })
    }

    /// A reader over the batch's records.
    #[must_use]
    pub fn records(&self) -> BatchReader<'_> {
        BatchReader {
            data: &self.data,
            pos: self.records,
        }
    }

    /// The whole batch, header included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Every batch in `batches` of `kind` and `generation`, as record readers.
fn batches_of<'a>(
    batches: &'a [Batch],
    kind: BatchKind,
    generation: u64,
) -> impl Iterator<Item = BatchReader<'a>> + 'a {
    batches
        .iter()
        .filter(move |b| b.kind == kind && b.generation == generation)
        .map(|b| {
            crate::tracing::log_batch(b.kind, b.generation, b.data.len());
            b.records()
        })
}

// ============================================================================
// BatchReader
// ============================================================================

/// A cursor over batch bytes.
#[derive(Debug, Clone)]
pub struct BatchReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BatchReader<'a> {
    /// A reader positioned at the start of `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                want: n,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Fails at the end of the batch.
    pub fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read an unsigned LEB128 varint.
    ///
    /// # Errors
    ///
    /// Fails at the end of the batch or if the value does not fit in a u64.
    pub fn varint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..10 {
            let b = self.byte()?;
            // The tenth byte may only carry the top bit of the value.
            if i == 9 && b > 1 {
                return Err(Error::VarintOverflow { offset: start });
            }
            value |= u64::from(b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::VarintOverflow { offset: start })
    }

    /// Read a fixed 8-byte little-endian word.
    ///
    /// # Errors
    ///
    /// Fails at the end of the batch.
    pub fn uint64(&mut self) -> Result<u64> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(word))
    }

    fn words(&mut self, n: u64) -> Result<Vec<u64>> {
        let n = usize::try_from(n).map_err(|_| Error::ValueOverflow { what: "word count" })?;
        // Check before allocating so a corrupt count cannot reserve gigabytes.
        if self.remaining() / 8 < n {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                want: n.saturating_mul(8),
            });
        }
        (0..n).map(|_| self.uint64()).collect()
    }
}

// ============================================================================
// Span classes
// ============================================================================

/// A decoded span-class word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanClass {
    /// Size class index; 0 for a large-object span.
    pub size_class: u64,
    /// Whether the span's objects contain no pointers.
    pub no_scan: bool,
    /// Page count of a large-object span; 0 otherwise.
    pub pages: u64,
}

impl SpanClass {
    /// Decode a span-class word: bit 0 is the no-scan flag, bits 1..8 the
    /// size class, and for size class 0 the bits above 8 are the page count.
    #[must_use]
    pub const fn decode(word: u64) -> Self {
        let span_class = word & 0xff;
        let size_class = span_class >> 1;
        Self {
            size_class,
            no_scan: span_class & 1 != 0,
            pages: if size_class == 0 { word >> 8 } else { 0 },
        }
    }

    /// Encode back into a span-class word.
    #[must_use]
    pub const fn encode(self) -> u64 {
        let word = (self.size_class << 1) | self.no_scan as u64;
        if self.size_class == 0 {
            word | (self.pages << 8)
        } else {
            word
        }
    }

    /// Send this span to `eventer`, resolving the size class in `classes`.
    ///
    /// # Errors
    ///
    /// Fails if the size class is not in `classes`.
    pub fn emit<E: Eventer>(self, eventer: &mut E, base: VAddr, classes: &[SizeClass]) -> Result<()> {
        if self.size_class == 0 {
            eventer.new_span(base, None, self.pages, self.no_scan);
            return Ok(());
        }
        let sc = usize::try_from(self.size_class)
            .ok()
            .and_then(|i| classes.get(i))
            .ok_or(Error::UnknownSizeClass {
                class: self.size_class,
                known: classes.len(),
            })?;
        eventer.new_span(base, Some(sc), sc.span_pages, self.no_scan);
        Ok(())
    }
}

// ============================================================================
// Decoders
// ============================================================================

/// Decode the size-class table of `generation`.
///
/// Returns `None` if the generation has no size batch. If it has several,
/// the last one wins.
///
/// # Errors
///
/// Fails on malformed records or sizes that are not strictly ascending.
pub fn decode_size_classes(batches: &[Batch], generation: u64) -> Result<Option<Vec<SizeClass>>> {
    let mut table = None;
    for mut r in batches_of(batches, BatchKind::Sizes, generation) {
        let mut classes: Vec<SizeClass> = Vec::new();
        while !r.is_empty() {
            let id = classes.len();
            let size = Bytes(r.varint()?);
            let span_pages = r.varint()?;
            let raw = r.byte()?;
            let heap_bits_type = HeapBitsType::try_from(raw).map_err(Error::UnknownHeapBits)?;
            if let Some(prev) = classes.last() {
                if prev.object_bytes >= size {
                    return Err(Error::SizeClassOrder {
                        id,
                        size,
                        prev: prev.object_bytes,
                    });
                }
            }
            classes.push(SizeClass {
                id,
                object_bytes: size,
                span_pages,
                heap_bits_type,
            });
        }
        table = Some(classes);
    }
    Ok(table)
}

/// Feed the span batches of `generation` to `eventer`.
///
/// # Errors
///
/// Fails on malformed records or unknown size classes.
pub fn process_spans<E: Eventer>(
    eventer: &mut E,
    batches: &[Batch],
    generation: u64,
    classes: &Arc<[SizeClass]>,
) -> Result<()> {
    for mut r in batches_of(batches, BatchKind::Spans, generation) {
        while !r.is_empty() {
            let base = VAddr(r.varint()?);
            SpanClass::decode(r.varint()?).emit(eventer, base, classes)?;
        }
    }
    Ok(())
}

struct PendingType {
    id: u64,
    size: Bytes,
    ptr_words: Words,
    ptr_mask: Vec<u64>,
}

/// Feed the type batches of `generation` to `eventer`.
///
/// A type whose pointer mask does not fit one record is split into a start
/// record and continuation records (size 0). A partial type may continue in
/// a later batch of the same generation.
///
/// # Errors
///
/// Fails on malformed records or continuations that do not line up.
pub fn process_types<E: Eventer>(eventer: &mut E, batches: &[Batch], generation: u64) -> Result<()> {
    let mut pending: Option<PendingType> = None;
    for mut r in batches_of(batches, BatchKind::Types, generation) {
        while !r.is_empty() {
            let id = r.varint()?;
            let size = Bytes(r.varint()?);
            let mut ty = if size.0 == 0 {
                let ty = pending.take().ok_or(Error::TypeContinuationOrphan { id })?;
                if ty.id != id {
                    return Err(Error::TypeContinuationMismatch { pending: ty.id, id });
                }
                let offset = r.varint()?;
                if ty.ptr_mask.len() as u64 != offset {
                    return Err(Error::TypeMaskOffset {
                        id,
                        have: ty.ptr_mask.len(),
                        offset,
                    });
                }
                ty
            } else {
                if let Some(ty) = &pending {
                    return Err(Error::TypeStartWhilePending { pending: ty.id, id });
                }
                PendingType {
                    id,
                    size,
                    ptr_words: Words(r.varint()?),
                    ptr_mask: Vec::new(),
                }
            };

            let len_and_partial = r.varint()?;
            let partial = len_and_partial & 1 != 0;
            ty.ptr_mask.extend(r.words(len_and_partial >> 1)?);

            if partial {
                pending = Some(ty);
            } else {
                eventer.new_type(ty.id, ty.size, ty.ptr_words, &ty.ptr_mask);
            }
        }
    }
    match pending {
        Some(ty) => Err(Error::UnterminatedType { id: ty.id }),
        None => Ok(()),
    }
}

/// Heap-bits header byte for a span with no pointers.
pub const HEAP_BITS_NONE: u8 = 0;
/// Largest packed heap-bits word count a header byte can carry.
pub const HEAP_BITS_MAX_PACKED: u8 = 0xfd;
/// Heap-bits header byte for per-object type ids stored out of band.
pub const HEAP_BITS_OOB: u8 = 0xfe;
/// Heap-bits header byte for per-object type ids stored in object headers.
pub const HEAP_BITS_HEADER: u8 = 0xff;

/// Feed the alloc batches of `generation` to `eventer` as span info.
///
/// Per-object heap bits are expanded to one entry per object slot, 0 for
/// free slots. A single-object span whose type id is 0 is reported as having
/// no heap bits.
///
/// # Errors
///
/// Fails on malformed records.
pub fn process_allocs<E: Eventer>(eventer: &mut E, batches: &[Batch], generation: u64) -> Result<()> {
    for mut r in batches_of(batches, BatchKind::Allocs, generation) {
        while !r.is_empty() {
            let base = VAddr(r.varint()?);
            let n_elems = r.varint()?;
            let alloc_bits = r.words(n_elems.div_ceil(64))?;

            let header = r.byte()?;
            let (heap_bits_type, heap_bits) = match header {
                HEAP_BITS_NONE => (HeapBitsType::None, Vec::new()),
                HEAP_BITS_OOB | HEAP_BITS_HEADER => {
                    let heap_bits_type = if header == HEAP_BITS_OOB {
                        HeapBitsType::Oob
                    } else {
                        HeapBitsType::Header
                    };
                    let n = usize::try_from(n_elems)
                        .map_err(|_| Error::ValueOverflow { what: "element count" })?;
                    let mut heap_bits = vec![0u64; n];
                    for (i, slot) in heap_bits.iter_mut().enumerate() {
                        if alloc_bits[i / 64] & (1 << (i % 64)) != 0 {
                            *slot = r.varint()?;
                        }
                    }
                    if heap_bits == [0] {
                        // Large object not yet zeroed: no type to scan with.
                        (HeapBitsType::None, Vec::new())
                    } else {
                        (heap_bits_type, heap_bits)
                    }
                }
                packed => (HeapBitsType::Packed, r.words(u64::from(packed))?),
            };

            eventer.span_info(base, &alloc_bits, heap_bits_type, &heap_bits);
        }
    }
    Ok(())
}

/// Feed the scan batches of `generation` to `eventer`.
///
/// # Errors
///
/// Fails on malformed records or unknown scan kinds.
pub fn process_scans<E: Eventer>(eventer: &mut E, batches: &[Batch], generation: u64) -> Result<()> {
    let mut offsets = Vec::new();
    let mut pointers = Vec::new();
    let mut found = Vec::new();
    for mut r in batches_of(batches, BatchKind::Scan, generation) {
        while !r.is_empty() {
            let base_and_kind = r.varint()?;
            let base = VAddr(base_and_kind & !0b11);
            let kind = ScanKind::try_from(base_and_kind & 0b11)?;
            let n = r.varint()?;

            offsets.clear();
            pointers.clear();
            found.clear();
            let mut offset = 0u64;
            for _ in 0..n {
                offset = offset
                    .checked_add(r.varint()?)
                    .ok_or(Error::ValueOverflow { what: "scan offset" })?;
                let ptr = r.varint()?;
                offsets.push(offset);
                pointers.push(VAddr(ptr & !0b11));
                found.push(ptr & 1 != 0);
            }

            eventer.scan(base, kind, &offsets, &pointers, &found);
        }
    }
    Ok(())
}

// ============================================================================
// BatchWriter
// ============================================================================

/// Heap bits of one alloc record, for [`BatchWriter::alloc`].
#[derive(Debug, Clone, Copy)]
pub enum AllocHeapBits<'a> {
    /// The span holds no pointers.
    None,
    /// Raw packed heap-bit words.
    Packed(&'a [u64]),
    /// One type id per allocated object, in slot order.
    PerObject {
        /// Ids stored out of band rather than in object headers.
        oob: bool,
        /// Type ids, one per set allocation bit.
        type_ids: &'a [u64],
    },
}

/// Builds one batch.
///
/// # Example
///
/// ```
/// use gclab::batch::{Batch, BatchKind, BatchWriter};
///
/// let mut w = BatchWriter::new(BatchKind::Spans, 3);
/// w.span(0x2000, 5 << 1);
/// let batch = Batch::parse(w.finish()).unwrap();
/// assert_eq!(batch.kind, BatchKind::Spans);
/// assert_eq!(batch.generation, 3);
/// ```
#[derive(Debug, Clone)]
pub struct BatchWriter {
    buf: Vec<u8>,
}

impl BatchWriter {
    /// Start a batch of `kind` for `generation`.
    #[must_use]
    pub fn new(kind: BatchKind, generation: u64) -> Self {
        let mut w = Self { buf: Vec::new() };
        w.byte(kind as u8);
        w.varint(generation);
        w
    }

    /// Append one byte.
    pub fn byte(&mut self, b: u8) -> &mut Self {
        self.buf.push(b);
        self
    }

    /// Append an unsigned LEB128 varint.
    #[allow(clippy::cast_possible_truncation)]
    pub fn varint(&mut self, mut v: u64) -> &mut Self {
        while v >= 0x80 {
            self.buf.push(v as u8 | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
        self
    }

    /// Append a fixed 8-byte little-endian word.
    pub fn uint64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append a size-class record.
    pub fn size_class(&mut self, size: Bytes, pages: u64, heap_bits_type: HeapBitsType) -> &mut Self {
        self.varint(size.0).varint(pages).byte(heap_bits_type as u8)
    }

    /// Append the whole size-class table, one record per class.
    pub fn size_classes(&mut self, classes: &[SizeClass]) -> &mut Self {
        for sc in classes {
            self.size_class(sc.object_bytes, sc.span_pages, sc.heap_bits_type);
        }
        self
    }

    /// Append a span record.
    pub fn span(&mut self, base: u64, span_class_word: u64) -> &mut Self {
        self.varint(base).varint(span_class_word)
    }

    /// Append a scan record. `slots` are `(offset, pointer, found)` with
    /// ascending offsets.
    ///
    /// # Panics
    ///
    /// Panics if `base` or a pointer has either of its low two bits set, or
    /// if offsets are not ascending.
    pub fn scan(&mut self, base: VAddr, kind: ScanKind, slots: &[(u64, VAddr, bool)]) -> &mut Self {
        assert!(base.0 & 0b11 == 0, "scan base {base} is not 4-byte aligned");
        self.varint(base.0 | kind as u64).varint(slots.len() as u64);
        let mut prev = 0;
        for &(offset, ptr, found) in slots {
            assert!(offset >= prev, "scan offsets not ascending");
            assert!(ptr.0 & 0b11 == 0, "scan pointer {ptr} is not 4-byte aligned");
            self.varint(offset - prev).varint(ptr.0 | u64::from(found));
            prev = offset;
        }
        self
    }

    /// Append a type start record.
    pub fn type_start(
        &mut self,
        id: u64,
        size: Bytes,
        ptr_words: Words,
        mask: &[u64],
        partial: bool,
    ) -> &mut Self {
        assert!(size.0 != 0, "type start must have a non-zero size");
        self.varint(id).varint(size.0).varint(ptr_words.0);
        self.mask(mask, partial)
    }

    /// Append a type continuation record, `offset` mask words into the type.
    pub fn type_continuation(&mut self, id: u64, offset: u64, mask: &[u64], partial: bool) -> &mut Self {
        self.varint(id).varint(0).varint(offset);
        self.mask(mask, partial)
    }

    fn mask(&mut self, mask: &[u64], partial: bool) -> &mut Self {
        self.varint(((mask.len() as u64) << 1) | u64::from(partial));
        for &w in mask {
            self.uint64(w);
        }
        self
    }

    /// Append an alloc record.
    ///
    /// # Panics
    ///
    /// Panics if `alloc_bits` is not `ceil(n_elems / 64)` words, if packed
    /// heap bits exceed [`HEAP_BITS_MAX_PACKED`] words, or if the number of
    /// per-object type ids differs from the number of allocated slots.
    pub fn alloc(
        &mut self,
        base: VAddr,
        n_elems: u64,
        alloc_bits: &[u64],
        heap_bits: AllocHeapBits<'_>,
    ) -> &mut Self {
        assert_eq!(alloc_bits.len() as u64, n_elems.div_ceil(64), "alloc bitmap length");
        self.varint(base.0).varint(n_elems);
        for &w in alloc_bits {
            self.uint64(w);
        }
        match heap_bits {
            AllocHeapBits::None => {
                self.byte(HEAP_BITS_NONE);
            }
            AllocHeapBits::Packed(words) => {
                let n = u8::try_from(words.len())
                    .ok()
                    .filter(|&n| n <= HEAP_BITS_MAX_PACKED)
                    .unwrap_or_else(|| panic!("{} packed heap-bit words", words.len()));
                self.byte(n);
                for &w in words {
                    self.uint64(w);
                }
            }
            AllocHeapBits::PerObject { oob, type_ids } => {
                let allocated: u64 = alloc_bits.iter().map(|w| u64::from(w.count_ones())).sum();
                assert_eq!(allocated, type_ids.len() as u64, "one type id per allocated object");
                self.byte(if oob { HEAP_BITS_OOB } else { HEAP_BITS_HEADER });
                for &id in type_ids {
                    self.varint(id);
                }
            }
        }
        self
    }

    /// The encoded batch.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_of(bytes: &[u8]) -> BatchReader<'_> {
        BatchReader::new(bytes)
    }

    #[test]
    fn test_varint_edges() {
        let mut w = BatchWriter { buf: Vec::new() };
        w.varint(0).varint(127).varint(128).varint(u64::MAX);
        let buf = w.finish();
        let mut r = reader_of(&buf);
        assert_eq!(r.varint(), Ok(0));
        assert_eq!(r.varint(), Ok(127));
        assert_eq!(r.varint(), Ok(128));
        assert_eq!(r.varint(), Ok(u64::MAX));
        assert!(r.is_empty());
    }

    #[test]
    fn test_varint_overflow() {
        let bytes = [0xff; 10];
        assert_eq!(
            reader_of(&bytes).varint(),
            Err(Error::VarintOverflow { offset: 0 })
        );
        // A tenth byte of 2 would set bit 64.
        let mut bytes = [0x80u8; 10];
        bytes[9] = 0x02;
        assert_eq!(
            reader_of(&bytes).varint(),
            Err(Error::VarintOverflow { offset: 0 })
        );
    }

    #[test]
    fn test_truncated_reads() {
        assert_eq!(
            reader_of(&[0x80]).varint(),
            Err(Error::UnexpectedEof { offset: 1, want: 1 })
        );
        assert_eq!(
            reader_of(&[1, 2, 3]).uint64(),
            Err(Error::UnexpectedEof { offset: 0, want: 8 })
        );
    }

    #[test]
    fn test_uint64_little_endian() {
        let bytes = [1, 0, 0, 0, 0, 0, 0, 0x80];
        assert_eq!(reader_of(&bytes).uint64(), Ok(0x8000_0000_0000_0001));
    }

    #[test]
    fn test_batch_header() {
        assert_eq!(Batch::parse(Vec::new()), Err(Error::EmptyBatch));
        assert_eq!(Batch::parse(vec![9, 0]), Err(Error::UnknownBatchKind(9)));
        let b = Batch::parse(vec![2, 0x81, 0x01, 7]).unwrap();
        assert_eq!(b.kind, BatchKind::Scan);
        assert_eq!(b.generation, 129);
        assert_eq!(b.records().remaining(), 1);
    }

    #[test]
    fn test_span_class_word() {
        let large = SpanClass::decode((12 << 8) | 1);
        assert_eq!(
            large,
            SpanClass {
                size_class: 0,
                no_scan: true,
                pages: 12
            }
        );
        let small = SpanClass::decode((5 << 1) | (3 << 8));
        assert_eq!(small.size_class, 5);
        assert!(!small.no_scan);
        assert_eq!(small.pages, 0);
        assert_eq!(SpanClass::decode(large.encode()), large);
    }
}
