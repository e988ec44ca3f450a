//! Replay tracing support.
//!
//! When the `tracing` feature is enabled, this module emits structured spans
//! and events for each replayed GC cycle. Without it every helper compiles
//! to nothing, so call sites never need their own `cfg`.

#[cfg(feature = "tracing")]
mod internal {
    use ::tracing::{span, Level};

    use crate::addr::{Range, VAddr};
    use crate::batch::BatchKind;
    use crate::gc_info::{Diagnostic, MarkComparison};
    use crate::heap::Arena;
    use crate::metrics::CycleMetrics;

    /// The span covering one replayed GC cycle.
    #[derive(Debug, Clone)]
    pub struct CycleSpan(::tracing::Span);

    /// Guard returned by [`CycleSpan::enter`].
    pub struct Entered<'a>(#[allow(dead_code)] span::Entered<'a>);

    impl CycleSpan {
        /// Enter the span until the guard is dropped.
        #[must_use]
        pub fn enter(&self) -> Entered<'_> {
            Entered(self.0.enter())
        }
    }

    /// Create the span for cycle `generation`.
    #[must_use]
    pub fn cycle_span(generation: u64, parallelism: u32) -> CycleSpan {
        CycleSpan(span!(Level::DEBUG, "gc_cycle", generation, parallelism))
    }

    pub fn log_cycle_start(generation: u64, size_classes: usize) {
        ::tracing::debug!(generation, size_classes, "cycle_start");
    }

    pub fn log_cycle_end(generation: u64, metrics: &CycleMetrics) {
        ::tracing::debug!(
            generation,
            duration_us = u64::try_from(metrics.duration.as_micros()).unwrap_or(u64::MAX),
            object_slots = metrics.object_slots,
            marked = metrics.marked,
            queued = metrics.queued,
            direct_to_black = metrics.direct_to_black,
            spans = metrics.spans,
            arenas = metrics.arenas,
            diagnostics = metrics.diagnostics,
            "cycle_end"
        );
    }

    pub fn log_diagnostic(diagnostic: &Diagnostic) {
        ::tracing::warn!(
            kind = %diagnostic.kind,
            object = diagnostic.object.0,
            addr = %diagnostic.addr,
            "{diagnostic}"
        );
    }

    pub fn log_fatal(msg: &str) {
        ::tracing::error!("{msg}");
    }

    pub fn log_new_arena(arena: &Arena) {
        ::tracing::trace!(id = arena.id.0, start = %arena.start, "new_arena");
    }

    pub fn log_materialize(range: Range, merged: usize) {
        ::tracing::debug!(range = %range, merged, "materialize_memory");
    }

    pub fn log_write_barrier(ptr: VAddr, found: bool) {
        ::tracing::trace!(ptr = %ptr, found, "write_barrier");
    }

    pub fn log_alloc_black(ptr: VAddr, base: VAddr) {
        ::tracing::trace!(ptr = %ptr, base = %base, "alloc_black");
    }

    pub fn log_span_layout_downgrade(base: VAddr) {
        ::tracing::debug!(base = %base, "delayed-zero object treated as noscan");
    }

    pub fn log_batch(kind: BatchKind, generation: u64, len: usize) {
        ::tracing::trace!(kind = %kind, generation, len, "batch");
    }

    pub fn log_unknown_batch(kind: u8, len: usize) {
        ::tracing::warn!(kind, len, "skipping batch of unknown kind");
    }

    pub fn log_generation_mismatch(started: u64, done: u64) {
        ::tracing::warn!(started, done, "GC done does not match the open cycle");
    }

    pub fn log_mark_comparison(generation: u64, comparison: &MarkComparison) {
        ::tracing::info!(
            generation,
            both = comparison.both,
            only_reconstructed = comparison.only_reconstructed.len(),
            only_expected = comparison.only_expected.len(),
            "mark_comparison"
        );
    }
}

#[cfg(not(feature = "tracing"))]
mod internal {
    use crate::addr::{Range, VAddr};
    use crate::batch::BatchKind;
    use crate::gc_info::{Diagnostic, MarkComparison};
    use crate::heap::Arena;
    use crate::metrics::CycleMetrics;

    /// Stub span when tracing is disabled.
    #[derive(Debug, Clone)]
    pub struct CycleSpan;

    /// Stub guard when tracing is disabled.
    pub struct Entered;

    impl CycleSpan {
        /// Stub function when tracing is disabled.
        #[must_use]
        pub const fn enter(&self) -> Entered {
            Entered
        }
    }

    /// Stub function when tracing is disabled.
    #[must_use]
    pub const fn cycle_span(_generation: u64, _parallelism: u32) -> CycleSpan {
        CycleSpan
    }

    pub const fn log_cycle_start(_generation: u64, _size_classes: usize) {}
    pub const fn log_cycle_end(_generation: u64, _metrics: &CycleMetrics) {}
    pub const fn log_diagnostic(_diagnostic: &Diagnostic) {}
    pub const fn log_fatal(_msg: &str) {}
    pub const fn log_new_arena(_arena: &Arena) {}
    pub const fn log_materialize(_range: Range, _merged: usize) {}
    pub const fn log_write_barrier(_ptr: VAddr, _found: bool) {}
    pub const fn log_alloc_black(_ptr: VAddr, _base: VAddr) {}
    pub const fn log_span_layout_downgrade(_base: VAddr) {}
    pub const fn log_batch(_kind: BatchKind, _generation: u64, _len: usize) {}
    pub const fn log_unknown_batch(_kind: u8, _len: usize) {}
    pub const fn log_generation_mismatch(_started: u64, _done: u64) {}
    pub const fn log_mark_comparison(_generation: u64, _comparison: &MarkComparison) {}
}

pub use internal::{cycle_span, CycleSpan, Entered};
pub(crate) use internal::{
    log_alloc_black, log_batch, log_cycle_end, log_cycle_start, log_diagnostic, log_fatal,
    log_generation_mismatch, log_mark_comparison, log_materialize, log_new_arena,
    log_span_layout_downgrade, log_unknown_batch, log_write_barrier,
};
