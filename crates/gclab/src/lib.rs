//! A trace-driven simulator of a generational, size-classed allocator and its
//! concurrent mark phase.
//!
//! `gclab` consumes the allocator and scanner events a runtime records during
//! each GC cycle and rebuilds, one generation at a time, the heap layout
//! (arenas, spans, size classes, types) and the object graph the collector
//! walked. While doing so it cross-checks that every object the collector
//! marked was also queued for scanning, and the other way round.
//!
//! # Layers
//!
//! - [`batch`] decodes (and encodes) the per-generation byte batches.
//! - [`replay::Replayer`] drives a trace: it buffers batches, gates events
//!   until the first cycle boundary and decodes batches in the order the
//!   runtime produced them.
//! - [`Eventer`] is the event interface every consumer implements.
//! - [`Heaper`] is the consumer that rebuilds the [`Heap`] and a [`GcInfo`]
//!   for each cycle and hands them to completion callbacks.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use gclab::heap::default_size_classes;
//! use gclab::{Eventer, Heaper, ScanKind, VAddr};
//!
//! let classes: Arc<[_]> = default_size_classes().into();
//! let mut heaper = Heaper::new();
//! heaper.on_cycle_end(|heap, info| {
//!     println!("gc {}: {} spans, {} marked", info.generation, heap.spans().len(), info.marked.len());
//! });
//!
//! heaper.gc_start(1, &classes, 4);
//! heaper.new_span(VAddr(0x10000), Some(&classes[4]), 1, false);
//! heaper.scan(VAddr(0x10000), ScanKind::Root, &[0], &[VAddr(0x10020)], &[true]);
//! heaper.scan(VAddr(0x10020), ScanKind::Object, &[], &[], &[]);
//! let diagnostics = heaper.end_cycle();
//! assert!(diagnostics.is_empty());
//! ```
//!
//! # Failure model
//!
//! Malformed batch bytes and protocol violations surface as [`Error`].
//! A trace that contradicts the heap's structure (overlapping spans, an
//! address that resolves to no object where one is required, a size-class
//! table of the wrong shape) cannot be replayed meaningfully; those panic.
//! Anomalies in the traced collector itself are reported as [`Diagnostic`]s.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Log a fatal replay condition and panic with the same message.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::tracing::log_fatal(&msg);
        panic!("{}", msg)
    }};
}
pub(crate) use fatal;

pub mod addr;
pub mod batch;
pub mod bitmap;
mod error;
mod event;
mod gc_info;
pub mod heap;
mod heaper;
mod metrics;
pub mod replay;
pub mod tracing;

pub use addr::{Bytes, LAddr, Range, VAddr, VPage, Words, NO_LADDR};
pub use error::{Error, Result};
pub use event::{EventInfo, Eventer, ScanKind};
pub use gc_info::{Diagnostic, DiagnosticKind, GcInfo, MarkComparison};
pub use heap::{Heap, HeapBitsType, ObjectId, SizeClass, Span};
pub use heaper::{CycleCallback, Heaper};
pub use metrics::CycleMetrics;
pub use replay::{ReplayOptions, Replayer, TraceEvent};
