//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use gclab::heap::default_size_classes;
use gclab::{Bytes, EventInfo, Eventer, HeapBitsType, ScanKind, SizeClass, VAddr, Words};

/// Every event an [`Eventer`] can receive, with owned arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    GcStart {
        generation: u64,
        classes: usize,
        parallelism: u32,
    },
    GcEnd,
    NewSpan {
        base: VAddr,
        size_class: Option<usize>,
        pages: u64,
        no_scan: bool,
    },
    SpanInfo {
        base: VAddr,
        alloc_bits: Vec<u64>,
        heap_bits_type: HeapBitsType,
        heap_bits: Vec<u64>,
    },
    NewType {
        id: u64,
        size: Bytes,
        ptr_words: Words,
        ptr_mask: Vec<u64>,
    },
    Scan {
        base: VAddr,
        kind: ScanKind,
        offsets: Vec<u64>,
        pointers: Vec<VAddr>,
        found: Vec<bool>,
    },
    ScanWb {
        ptr: VAddr,
        found: bool,
    },
    AllocBlack {
        ptr: VAddr,
    },
}

/// An eventer that records what it is told.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl Eventer for Recorder {
    fn gc_start(&mut self, generation: u64, size_classes: &Arc<[SizeClass]>, parallelism: u32) {
        self.events.push(Event::GcStart {
            generation,
            classes: size_classes.len(),
            parallelism,
        });
    }

    fn gc_end(&mut self) {
        self.events.push(Event::GcEnd);
    }

    fn new_span(&mut self, base: VAddr, size_class: Option<&SizeClass>, pages: u64, no_scan: bool) {
        self.events.push(Event::NewSpan {
            base,
            size_class: size_class.map(|sc| sc.id),
            pages,
            no_scan,
        });
    }

    fn span_info(
        &mut self,
        base: VAddr,
        alloc_bits: &[u64],
        heap_bits_type: HeapBitsType,
        heap_bits: &[u64],
    ) {
        self.events.push(Event::SpanInfo {
            base,
            alloc_bits: alloc_bits.to_vec(),
            heap_bits_type,
            heap_bits: heap_bits.to_vec(),
        });
    }

    fn new_type(&mut self, id: u64, size: Bytes, ptr_words: Words, ptr_mask: &[u64]) {
        self.events.push(Event::NewType {
            id,
            size,
            ptr_words,
            ptr_mask: ptr_mask.to_vec(),
        });
    }

    fn scan(
        &mut self,
        base: VAddr,
        kind: ScanKind,
        offsets: &[u64],
        pointers: &[VAddr],
        found: &[bool],
    ) {
        self.events.push(Event::Scan {
            base,
            kind,
            offsets: offsets.to_vec(),
            pointers: pointers.to_vec(),
            found: found.to_vec(),
        });
    }

    fn scan_wb(&mut self, _info: EventInfo, ptr: VAddr, found: bool) {
        self.events.push(Event::ScanWb { ptr, found });
    }

    fn alloc_black(&mut self, _info: EventInfo, ptr: VAddr) {
        self.events.push(Event::AllocBlack { ptr });
    }
}

/// The default size-class table, shared.
pub fn classes() -> Arc<[SizeClass]> {
    default_size_classes().into()
}
