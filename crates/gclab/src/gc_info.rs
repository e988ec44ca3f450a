//! What one replayed GC cycle found.

use std::fmt;

use crate::addr::VAddr;
use crate::bitmap::Set;
use crate::heap::{Heap, ObjectId};
use crate::metrics::CycleMetrics;

/// An anomaly in the traced collector.
///
/// Diagnostics point at the traced program or runtime, not at the replay,
/// so they never stop a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Queued for scanning but never marked.
    Grey,
    /// Marked without ever having been queued.
    ScannedWithoutQueuing,
    /// Scanned although its span holds no pointers.
    ScannedNoScan,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grey => "grey",
            Self::ScannedWithoutQueuing => "scanned without queuing",
            Self::ScannedNoScan => "scanned noscan object",
        })
    }
}

/// One anomaly and the object it concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    /// What went wrong.
    pub kind: DiagnosticKind,
    /// The object.
    pub object: ObjectId,
    /// Base address of the object.
    pub addr: VAddr,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} at {}", self.kind, self.object, self.addr)
    }
}

/// The per-cycle record handed to completion callbacks.
#[derive(Debug, Clone, Default)]
pub struct GcInfo {
    /// GC number of the cycle.
    pub generation: u64,
    /// Number of processors the cycle ran with.
    pub parallelism: u32,
    /// Root pointers, in the order reported.
    pub roots: Vec<VAddr>,
    /// Pointers shaded by write barriers.
    pub wb_roots: Vec<VAddr>,
    /// Bases of objects allocated black.
    pub alloc_black: Vec<VAddr>,
    /// Objects marked by the end of the cycle. Empty until the cycle ends.
    pub marked: Set<ObjectId>,
    /// Anomalies found during and at the end of the cycle.
    pub diagnostics: Vec<Diagnostic>,
    /// Statistics. Zero until the cycle ends.
    pub metrics: CycleMetrics,
}

/// The result of [`GcInfo::compare_marks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkComparison {
    /// Objects marked in both.
    pub both: usize,
    /// Objects the replay marked that the other mark set did not.
    pub only_reconstructed: Vec<ObjectId>,
    /// Objects the other mark set marked that the replay did not.
    pub only_expected: Vec<ObjectId>,
}

impl MarkComparison {
    /// Whether both mark sets agree exactly.
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.only_reconstructed.is_empty() && self.only_expected.is_empty()
    }
}

impl GcInfo {
    /// A fresh record for cycle `generation`.
    #[must_use]
    pub fn new(generation: u64, parallelism: u32) -> Self {
        Self {
            generation,
            parallelism,
            ..Self::default()
        }
    }

    /// Compare the replay's mark set with `expected`, computed by some other
    /// marking of the same `heap` (for example a simulated scanner).
    ///
    /// Ids in `expected` that `heap` never handed out are reported as
    /// expected-only. Differences are logged with their addresses.
    #[must_use]
    pub fn compare_marks(&self, heap: &Heap, expected: &Set<ObjectId>) -> MarkComparison {
        let comparison = MarkComparison {
            both: self.marked.iter().filter(|&id| expected.has(id)).count(),
            only_reconstructed: self.marked.difference(expected).collect(),
            only_expected: expected.difference(&self.marked).collect(),
        };
        crate::tracing::log_mark_comparison(self.generation, &comparison);

        #[cfg(feature = "tracing")]
        {
            // Enough to start debugging without flooding the log.
            const EXAMPLES: usize = 10;
            for &id in comparison.only_reconstructed.iter().take(EXAMPLES) {
                ::tracing::info!(object = id.0, addr = ?heap.object_base(id), "marked only by replay");
            }
            for &id in comparison.only_expected.iter().take(EXAMPLES) {
                ::tracing::info!(object = id.0, addr = ?heap.object_base(id), "marked only by expected");
            }
        }
        #[cfg(not(feature = "tracing"))]
        let _ = heap;

        comparison
    }
}
