//! The heap-rebuilding event consumer.
//!
//! A [`Heaper`] is idle until `gc_start`, then owns one [`Heap`] and one
//! [`GcInfo`] until `gc_end`. Within a cycle it tracks two sets of object
//! ids:
//!
//! - *queued*: objects the collector discovered (greyed),
//! - *marked*: objects the collector scanned or otherwise blackened.
//!
//! At the end of the cycle every object should be in both or neither. The
//! exception is an object in a no-scan span: there is nothing to scan, so the
//! collector blackens it directly when it is discovered and never queues it.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::addr::{Bytes, VAddr, Words};
use crate::bitmap::Set;
use crate::event::{EventInfo, Eventer, ScanKind};
use crate::fatal;
use crate::gc_info::{Diagnostic, DiagnosticKind, GcInfo};
use crate::heap::{Heap, HeapBitsType, ObjectId, SizeClass, Span, WORD_BYTES};
use crate::metrics::CycleMetrics;
use crate::tracing::CycleSpan;

/// A completion callback, invoked once per finished cycle.
pub type CycleCallback = Box<dyn FnMut(&Heap, &GcInfo)>;

// ============================================================================
// Cycle state
// ============================================================================

struct Cycle {
    heap: Heap,
    info: GcInfo,
    queued: Set<ObjectId>,
    marked: Set<ObjectId>,
    /// Objects marked on discovery because their span is no-scan.
    direct_black: Set<ObjectId>,
    started: Instant,
    span: CycleSpan,
}

impl Cycle {
    /// Resolve `ptr` to an object that must exist.
    fn resolve(&self, ptr: VAddr, what: &str) -> (VAddr, ObjectId, HeapBitsType) {
        match self.heap.find_object(ptr) {
            Some((base, span, id)) => (base, id, span.heap_bits_type),
            None => fatal!("{what}: {ptr} is not in any span"),
        }
    }

    /// Record that `ptr` was discovered and needs scanning.
    fn grey_enqueue(&mut self, ptr: VAddr) {
        let (_, id, heap_bits_type) = self.resolve(ptr, "grey enqueue");
        if heap_bits_type == HeapBitsType::None {
            // Nothing to scan: straight to black.
            self.marked.add(id);
            self.direct_black.add(id);
        } else {
            self.queued.add(id);
        }
    }

    fn diagnose(&mut self, kind: DiagnosticKind, object: ObjectId, addr: VAddr) {
        let diagnostic = Diagnostic { kind, object, addr };
        crate::tracing::log_diagnostic(&diagnostic);
        self.info.diagnostics.push(diagnostic);
    }

    fn scan_object(&mut self, base: VAddr, offsets: &[u64], pointers: &[VAddr], found: &[bool]) {
        let (obj_base, id, heap_bits_type) = self.resolve(base, "scan object");
        if heap_bits_type == HeapBitsType::None {
            self.diagnose(DiagnosticKind::ScannedNoScan, id, obj_base);
        }
        // Rescanning (for example one oblet of a large object at a time) may
        // mark an object more than once.
        self.marked.add(id);

        for ((&offset, &ptr), &found) in offsets.iter().zip(pointers).zip(found) {
            let slot = base.plus(Bytes(offset));
            let written = self.heap.write_word(slot, ptr.0);
            debug_assert!(written, "scanned object at {base} has no arena");
            if found {
                self.grey_enqueue(ptr);
            }
        }
    }

    fn scan_root(&mut self, pointers: &[VAddr], found: &[bool]) {
        for (&ptr, &found) in pointers.iter().zip(found) {
            self.info.roots.push(ptr);
            if found {
                self.grey_enqueue(ptr);
            }
        }
    }

    /// Run the end-of-cycle self-check, returning the new diagnostics.
    fn self_check(&mut self) -> Vec<Diagnostic> {
        let mut found = Vec::new();
        for id in self.queued.difference(&self.marked) {
            found.push((DiagnosticKind::Grey, id));
        }
        for id in self.marked.difference(&self.queued) {
            if !self.direct_black.has(id) {
                found.push((DiagnosticKind::ScannedWithoutQueuing, id));
            }
        }

        let mut diagnostics = Vec::with_capacity(found.len());
        for (kind, id) in found {
            let Some(addr) = self.heap.object_base(id) else {
                fatal!("{kind} object {id} belongs to no span");
            };
            self.diagnose(kind, id, addr);
            diagnostics.push(Diagnostic { kind, object: id, addr });
        }
        diagnostics
    }

    fn metrics(&self) -> CycleMetrics {
        CycleMetrics {
            duration: self.started.elapsed(),
            object_slots: self.heap.spans().iter().map(Span::object_count).sum(),
            marked: self.marked.len(),
            queued: self.queued.len(),
            direct_to_black: self.direct_black.len(),
            roots: self.info.roots.len(),
            wb_roots: self.info.wb_roots.len(),
            alloc_black: self.info.alloc_black.len(),
            spans: self.heap.spans().len(),
            arenas: self.heap.arenas().len(),
            diagnostics: self.info.diagnostics.len(),
        }
    }
}

// ============================================================================
// Heaper
// ============================================================================

/// Rebuilds the heap and the collector's mark state from GC events.
#[derive(Default)]
pub struct Heaper {
    cycle: Option<Cycle>,
    callbacks: Vec<CycleCallback>,
    cycles_completed: u64,
}

impl Heaper {
    /// Create an idle heaper with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run at the end of every cycle, after the
    /// self-check.
    pub fn on_cycle_end(&mut self, callback: impl FnMut(&Heap, &GcInfo) + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Whether a cycle is in progress.
    #[must_use]
    pub const fn in_cycle(&self) -> bool {
        self.cycle.is_some()
    }

    /// Number of cycles completed so far.
    #[must_use]
    pub const fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// The heap of the cycle in progress.
    #[must_use]
    pub fn heap(&self) -> Option<&Heap> {
        self.cycle.as_ref().map(|c| &c.heap)
    }

    /// Mutable access to the heap of the cycle in progress.
    pub fn heap_mut(&mut self) -> Option<&mut Heap> {
        self.cycle.as_mut().map(|c| &mut c.heap)
    }

    /// The `GcInfo` of the cycle in progress.
    #[must_use]
    pub fn gc_info(&self) -> Option<&GcInfo> {
        self.cycle.as_ref().map(|c| &c.info)
    }

    /// Whether `id` has been queued in the cycle in progress.
    #[must_use]
    pub fn is_queued(&self, id: ObjectId) -> bool {
        self.cycle.as_ref().is_some_and(|c| c.queued.has(id))
    }

    /// Whether `id` has been marked in the cycle in progress.
    #[must_use]
    pub fn is_marked(&self, id: ObjectId) -> bool {
        self.cycle.as_ref().is_some_and(|c| c.marked.has(id))
    }

    fn cycle_mut(&mut self, event: &str) -> &mut Cycle {
        match &mut self.cycle {
            Some(cycle) => cycle,
            None => fatal!("{event} outside of a GC cycle"),
        }
    }

    /// Finish the cycle in progress.
    ///
    /// Runs the self-check, freezes the mark set into the cycle's
    /// [`GcInfo`], runs every completion callback and returns to idle.
    /// Returns the diagnostics the self-check found; diagnostics raised
    /// earlier in the cycle are in [`GcInfo::diagnostics`] along with them.
    ///
    /// # Panics
    ///
    /// Panics if no cycle is in progress.
    pub fn end_cycle(&mut self) -> Vec<Diagnostic> {
        let Some(mut cycle) = self.cycle.take() else {
            fatal!("gc_end outside of a GC cycle");
        };
        let span = cycle.span.clone();
        let _entered = span.enter();

        let diagnostics = cycle.self_check();
        cycle.info.metrics = cycle.metrics();
        cycle.info.marked = std::mem::take(&mut cycle.marked);
        crate::tracing::log_cycle_end(cycle.info.generation, &cycle.info.metrics);

        for callback in &mut self.callbacks {
            callback(&cycle.heap, &cycle.info);
        }
        self.cycles_completed += 1;
        diagnostics
    }
}

impl fmt::Debug for Heaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heaper")
            .field("in_cycle", &self.in_cycle())
            .field("callbacks", &self.callbacks.len())
            .field("cycles_completed", &self.cycles_completed)
            .finish_non_exhaustive()
    }
}

impl Eventer for Heaper {
    /// # Panics
    ///
    /// Panics if a cycle is already in progress or the size-class table is
    /// malformed.
    fn gc_start(&mut self, generation: u64, size_classes: &Arc<[SizeClass]>, parallelism: u32) {
        if self.cycle.is_some() {
            fatal!("gc_start of GC {generation} during a GC cycle");
        }
        let span = crate::tracing::cycle_span(generation, parallelism);
        let _entered = span.enter();
        crate::tracing::log_cycle_start(generation, size_classes.len());

        self.cycle = Some(Cycle {
            heap: Heap::new(Arc::clone(size_classes)),
            info: GcInfo::new(generation, parallelism),
            queued: Set::default(),
            marked: Set::default(),
            direct_black: Set::default(),
            started: Instant::now(),
            span: span.clone(),
        });
    }

    fn gc_end(&mut self) {
        self.end_cycle();
    }

    fn new_span(&mut self, base: VAddr, size_class: Option<&SizeClass>, pages: u64, no_scan: bool) {
        let cycle = self.cycle_mut("new_span");
        match size_class {
            Some(sc) => {
                if pages != sc.span_pages {
                    fatal!(
                        "span at {base} has {pages} pages, but size class {} has {}",
                        sc.id,
                        sc.span_pages
                    );
                }
                cycle.heap.new_span(base, sc, no_scan);
            }
            None => {
                cycle.heap.new_span_large(base, pages, no_scan);
            }
        }
    }

    fn span_info(
        &mut self,
        base: VAddr,
        alloc_bits: &[u64],
        heap_bits_type: HeapBitsType,
        heap_bits: &[u64],
    ) {
        let cycle = self.cycle_mut("span_info");
        let span = match cycle.heap.find_span_mut(base) {
            Some(span) if span.start == base => span,
            _ => fatal!("span_info for {base}, which does not start a span"),
        };

        if heap_bits_type != span.heap_bits_type {
            // A single object whose type is still zero (a large object the
            // runtime has not zeroed yet) is reported as no-scan.
            let delayed_zero = heap_bits_type == HeapBitsType::None
                && span.object_count() == 1
                && matches!(span.heap_bits_type, HeapBitsType::Oob | HeapBitsType::Header);
            if !delayed_zero {
                fatal!(
                    "span_info for {span} reports heap bits {heap_bits_type}, but span has {}",
                    span.heap_bits_type
                );
            }
            crate::tracing::log_span_layout_downgrade(base);
            span.heap_bits_type = HeapBitsType::None;
        }

        #[allow(clippy::cast_possible_truncation)]
        let count = span.object_count() as usize;
        span.alloc_bits = Set::from_words(alloc_bits, count);
        span.heap_bits = heap_bits.to_vec();
    }

    fn new_type(&mut self, id: u64, size: Bytes, ptr_words: Words, ptr_mask: &[u64]) {
        self.cycle_mut("new_type")
            .heap
            .new_type(id, size, ptr_words, ptr_mask);
    }

    fn scan(
        &mut self,
        base: VAddr,
        kind: ScanKind,
        offsets: &[u64],
        pointers: &[VAddr],
        found: &[bool],
    ) {
        let cycle = self.cycle_mut("scan");
        if offsets.len() != pointers.len() || pointers.len() != found.len() {
            fatal!(
                "scan of {base}: {} offsets, {} pointers, {} found flags",
                offsets.len(),
                pointers.len(),
                found.len()
            );
        }
        let span = cycle.span.clone();
        let _entered = span.enter();
        match kind {
            ScanKind::Object => cycle.scan_object(base, offsets, pointers, found),
            ScanKind::Root => cycle.scan_root(pointers, found),
            ScanKind::None => fatal!("scan of {base} has no scan kind"),
        }
    }

    fn scan_wb(&mut self, _info: EventInfo, ptr: VAddr, found: bool) {
        let cycle = self.cycle_mut("scan_wb");
        crate::tracing::log_write_barrier(ptr, found);
        // Barriers that shaded nothing discovered nothing.
        if found {
            cycle.grey_enqueue(ptr);
            cycle.info.wb_roots.push(ptr);
        }
    }

    fn alloc_black(&mut self, _info: EventInfo, ptr: VAddr) {
        let cycle = self.cycle_mut("alloc_black");
        let (base, id, _) = cycle.resolve(ptr, "alloc black");
        crate::tracing::log_alloc_black(ptr, base);
        cycle.marked.add(id);
        cycle.queued.add(id);
        cycle.info.alloc_black.push(base);
    }
}
