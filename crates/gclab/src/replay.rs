//! Driving an [`Eventer`] from a stream of trace events.
//!
//! A trace interleaves three things: metric samples, batches of bulk data,
//! and per-event records. The [`Replayer`] buffers batches as they arrive
//! and decodes them at the cycle boundaries where the runtime guarantees
//! they are complete:
//!
//! - at GC start: the size table, then the spans that already exist;
//! - at GC done: types, then span info, then scans, then the end of the
//!   cycle.
//!
//! Span, write-barrier and black-allocation events in between are passed
//! straight through.
//!
//! A trace may begin in the middle of a cycle. Until the first cycle
//! boundary the replayer is *unsynced* and drops per-event records, and a
//! GC done seen while unsynced only syncs.
//!
//! Batches may arrive ahead of their cycle. A GC done drops the batches of
//! its own and earlier generations and keeps the rest. Batches of a kind
//! this crate does not know are skipped.

use std::sync::Arc;

use crate::addr::VAddr;
use crate::batch::{self, Batch, SpanClass};
use crate::error::{Error, Result};
use crate::event::{EventInfo, Eventer};
use crate::heap::{SizeClass, NUM_SIZE_CLASSES};

/// One event of a decoded trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A sample of the runtime's processor-count metric.
    Parallelism(u32),
    /// A raw batch, header included.
    Batch(Vec<u8>),
    /// GC `generation` begins with `parallelism` processors.
    GcStart {
        /// GC number.
        generation: u64,
        /// Processor count.
        parallelism: u32,
    },
    /// A span was allocated during the cycle.
    Span {
        /// Span base.
        base: VAddr,
        /// Span-class word, as in span batches.
        span_class: u64,
    },
    /// A write barrier fired. `arg` carries the pointer with the found flag
    /// in bit 0.
    WriteBarrier {
        /// Emitting processor and time.
        info: EventInfo,
        /// Pointer and flags.
        arg: u64,
    },
    /// An object was allocated black.
    AllocBlack {
        /// Emitting processor and time.
        info: EventInfo,
        /// The object.
        base: VAddr,
    },
    /// GC `generation` finished marking.
    GcDone {
        /// GC number.
        generation: u64,
    },
}

/// Replay configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Whether a GC start whose parallelism disagrees with the last
    /// [`TraceEvent::Parallelism`] sample is an error.
    pub check_parallelism: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            check_parallelism: true,
        }
    }
}

/// Replays trace events into an [`Eventer`].
#[derive(Debug)]
pub struct Replayer<E> {
    eventer: E,
    options: ReplayOptions,
    batches: Vec<Batch>,
    parallelism: Option<u32>,
    size_classes: Option<Arc<[SizeClass]>>,
    /// The generation of the last cycle boundary.
    generation: u64,
    synced: bool,
}

impl<E: Eventer> Replayer<E> {
    /// A replayer with default options.
    pub fn new(eventer: E) -> Self {
        Self::with_options(eventer, ReplayOptions::default())
    }

    /// A replayer with `options`.
    pub const fn with_options(eventer: E, options: ReplayOptions) -> Self {
        Self {
            eventer,
            options,
            batches: Vec::new(),
            parallelism: None,
            size_classes: None,
            generation: 0,
            synced: false,
        }
    }

    /// The eventer being driven.
    pub const fn eventer(&self) -> &E {
        &self.eventer
    }

    /// Mutable access to the eventer being driven.
    pub fn eventer_mut(&mut self) -> &mut E {
        &mut self.eventer
    }

    /// Stop replaying and return the eventer.
    pub fn into_inner(self) -> E {
        self.eventer
    }

    /// Whether a cycle boundary has been seen.
    pub const fn is_synced(&self) -> bool {
        self.synced
    }

    /// The size-class table in effect, once one has been decoded.
    pub fn size_classes(&self) -> Option<&Arc<[SizeClass]>> {
        self.size_classes.as_ref()
    }

    /// Batches buffered for the current and later cycles.
    pub fn buffered(&self) -> usize {
        self.batches.len()
    }

    /// Replay every event in `events`.
    ///
    /// # Errors
    ///
    /// Stops at the first event that fails; see [`Replayer::handle`].
    pub fn run(&mut self, events: impl IntoIterator<Item = TraceEvent>) -> Result<()> {
        events.into_iter().try_for_each(|ev| self.handle(ev))
    }

    /// Replay one event.
    ///
    /// # Errors
    ///
    /// Fails on malformed batches, a cycle with no size classes, an unknown
    /// span class, or a parallelism mismatch. A batch of unknown kind is
    /// logged and skipped.
    pub fn handle(&mut self, event: TraceEvent) -> Result<()> {
        match event {
            TraceEvent::Parallelism(n) => self.parallelism = Some(n),
            TraceEvent::Batch(data) => {
                let len = data.len();
                match Batch::parse(data) {
                    Err(Error::UnknownBatchKind(kind)) => {
                        crate::tracing::log_unknown_batch(kind, len);
                    }
                    parsed => self.batches.push(parsed?),
                }
            }
            TraceEvent::GcStart {
                generation,
                parallelism,
            } => self.gc_start(generation, parallelism)?,
            TraceEvent::Span { base, span_class } => {
                if self.synced {
                    let classes = self.classes()?;
                    SpanClass::decode(span_class).emit(&mut self.eventer, base, &classes)?;
                }
            }
            TraceEvent::WriteBarrier { info, arg } => {
                if self.synced {
                    self.eventer
                        .scan_wb(info, VAddr(arg & !0b11), arg & 1 != 0);
                }
            }
            TraceEvent::AllocBlack { info, base } => {
                if self.synced {
                    self.eventer.alloc_black(info, base);
                }
            }
            TraceEvent::GcDone { generation } => self.gc_done(generation)?,
        }
        Ok(())
    }

    fn classes(&self) -> Result<Arc<[SizeClass]>> {
        self.size_classes.clone().ok_or(Error::MissingSizeClasses {
            generation: self.generation,
        })
    }

    fn gc_start(&mut self, generation: u64, parallelism: u32) -> Result<()> {
        self.synced = true;
        self.generation = generation;

        if self.options.check_parallelism {
            if let Some(reported) = self.parallelism {
                if reported != parallelism {
                    return Err(Error::ParallelismMismatch {
                        reported,
                        gc_start: parallelism,
                    });
                }
            }
        }

        if let Some(table) = batch::decode_size_classes(&self.batches, generation)? {
            if table.len() != NUM_SIZE_CLASSES {
                return Err(Error::SizeClassCount {
                    got: table.len(),
                    want: NUM_SIZE_CLASSES,
                });
            }
            self.size_classes = Some(table.into());
        }
        let classes = self.classes()?;

        self.eventer.gc_start(generation, &classes, parallelism);
        batch::process_spans(&mut self.eventer, &self.batches, generation, &classes)
    }

    fn gc_done(&mut self, generation: u64) -> Result<()> {
        if !self.synced {
            self.synced = true;
            self.generation = generation;
            self.drop_batches_through(generation);
            return Ok(());
        }
        if generation != self.generation {
            crate::tracing::log_generation_mismatch(self.generation, generation);
        }
        self.generation = generation;

        batch::process_types(&mut self.eventer, &self.batches, generation)?;
        batch::process_allocs(&mut self.eventer, &self.batches, generation)?;
        batch::process_scans(&mut self.eventer, &self.batches, generation)?;
        self.eventer.gc_end();

        self.drop_batches_through(generation);
        Ok(())
    }

    /// Forget batches of `generation` and earlier.
    fn drop_batches_through(&mut self, generation: u64) {
        self.batches.retain(|b| b.generation > generation);
    }
}
