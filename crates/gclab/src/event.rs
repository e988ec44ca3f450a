//! The event interface between trace decoding and its consumers.

use std::fmt;
use std::sync::Arc;

use crate::addr::{Bytes, VAddr, Words};
use crate::error::Error;
use crate::heap::{HeapBitsType, SizeClass};

/// Where and when a per-event record was emitted.
///
/// Only write-barrier and black-allocation events carry this; everything
/// else arrives in batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventInfo {
    /// The processor the event was emitted on, if known.
    pub proc: Option<u32>,
    /// Trace timestamp.
    pub timestamp: u64,
}

/// What a scan record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScanKind {
    /// Invalid: never emitted by a well-formed trace.
    None = 0,
    /// A root; the record's pointers are roots.
    Root = 1,
    /// A heap object being scanned.
    Object = 2,
}

impl TryFrom<u64> for ScanKind {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Root),
            2 => Ok(Self::Object),
            other => Err(Error::UnknownScanKind(other)),
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Root => "root",
            Self::Object => "object",
        })
    }
}

/// A consumer of decoded GC events.
///
/// Events for one generation always arrive as `gc_start`, spans and
/// per-event records, then types, span info and scans, then `gc_end`.
pub trait Eventer {
    /// A GC cycle begins.
    fn gc_start(&mut self, generation: u64, size_classes: &Arc<[SizeClass]>, parallelism: u32);

    /// The GC cycle ends.
    fn gc_end(&mut self);

    /// A span of `pages` pages at `base`. `size_class` is `None` for a
    /// large-object span.
    fn new_span(&mut self, base: VAddr, size_class: Option<&SizeClass>, pages: u64, no_scan: bool);

    /// Allocation and pointer bits for the span starting at `base`.
    fn span_info(
        &mut self,
        base: VAddr,
        alloc_bits: &[u64],
        heap_bits_type: HeapBitsType,
        heap_bits: &[u64],
    );

    /// A type's pointer layout.
    fn new_type(&mut self, id: u64, size: Bytes, ptr_words: Words, ptr_mask: &[u64]);

    /// A scan of a root or object. `offsets`, `pointers` and `found` are
    /// parallel; `offsets` are byte offsets from `base`.
    fn scan(
        &mut self,
        base: VAddr,
        kind: ScanKind,
        offsets: &[u64],
        pointers: &[VAddr],
        found: &[bool],
    );

    /// A write barrier saw `ptr`. `found` is set if the barrier shaded it.
    fn scan_wb(&mut self, info: EventInfo, ptr: VAddr, found: bool);

    /// An object was allocated black during the cycle.
    fn alloc_black(&mut self, info: EventInfo, ptr: VAddr);
}

impl<E: Eventer + ?Sized> Eventer for &mut E {
    fn gc_start(&mut self, generation: u64, size_classes: &Arc<[SizeClass]>, parallelism: u32) {
        (**self).gc_start(generation, size_classes, parallelism);
    }

    fn gc_end(&mut self) {
        (**self).gc_end();
    }

    fn new_span(&mut self, base: VAddr, size_class: Option<&SizeClass>, pages: u64, no_scan: bool) {
        (**self).new_span(base, size_class, pages, no_scan);
    }

    fn span_info(
        &mut self,
        base: VAddr,
        alloc_bits: &[u64],
        heap_bits_type: HeapBitsType,
        heap_bits: &[u64],
    ) {
        (**self).span_info(base, alloc_bits, heap_bits_type, heap_bits);
    }

    fn new_type(&mut self, id: u64, size: Bytes, ptr_words: Words, ptr_mask: &[u64]) {
        (**self).new_type(id, size, ptr_words, ptr_mask);
    }

    fn scan(
        &mut self,
        base: VAddr,
        kind: ScanKind,
        offsets: &[u64],
        pointers: &[VAddr],
        found: &[bool],
    ) {
        (**self).scan(base, kind, offsets, pointers, found);
    }

    fn scan_wb(&mut self, info: EventInfo, ptr: VAddr, found: bool) {
        (**self).scan_wb(info, ptr, found);
    }

    fn alloc_black(&mut self, info: EventInfo, ptr: VAddr) {
        (**self).alloc_black(info, ptr);
    }
}

/// Fan every event out to both eventers, first `A` then `B`.
impl<A: Eventer, B: Eventer> Eventer for (A, B) {
    fn gc_start(&mut self, generation: u64, size_classes: &Arc<[SizeClass]>, parallelism: u32) {
        self.0.gc_start(generation, size_classes, parallelism);
        self.1.gc_start(generation, size_classes, parallelism);
    }

    fn gc_end(&mut self) {
        self.0.gc_end();
        self.1.gc_end();
    }

    fn new_span(&mut self, base: VAddr, size_class: Option<&SizeClass>, pages: u64, no_scan: bool) {
        self.0.new_span(base, size_class, pages, no_scan);
        self.1.new_span(base, size_class, pages, no_scan);
    }

    fn span_info(
        &mut self,
        base: VAddr,
        alloc_bits: &[u64],
        heap_bits_type: HeapBitsType,
        heap_bits: &[u64],
    ) {
        self.0.span_info(base, alloc_bits, heap_bits_type, heap_bits);
        self.1.span_info(base, alloc_bits, heap_bits_type, heap_bits);
    }

    fn new_type(&mut self, id: u64, size: Bytes, ptr_words: Words, ptr_mask: &[u64]) {
        self.0.new_type(id, size, ptr_words, ptr_mask);
        self.1.new_type(id, size, ptr_words, ptr_mask);
    }

    fn scan(
        &mut self,
        base: VAddr,
        kind: ScanKind,
        offsets: &[u64],
        pointers: &[VAddr],
        found: &[bool],
    ) {
        self.0.scan(base, kind, offsets, pointers, found);
        self.1.scan(base, kind, offsets, pointers, found);
    }

    fn scan_wb(&mut self, info: EventInfo, ptr: VAddr, found: bool) {
        self.0.scan_wb(info, ptr, found);
        self.1.scan_wb(info, ptr, found);
    }

    fn alloc_black(&mut self, info: EventInfo, ptr: VAddr) {
        self.0.alloc_black(info, ptr);
        self.1.alloc_black(info, ptr);
    }
}
