//! Per-cycle replay statistics.

use std::fmt;
use std::time::Duration;

/// Statistics for one replayed GC cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    /// Wall-clock time from `gc_start` to the end of the self-check.
    pub duration: Duration,
    /// Object slots in all spans of the cycle's heap.
    pub object_slots: u64,
    /// Objects marked.
    pub marked: usize,
    /// Objects queued for scanning.
    pub queued: usize,
    /// Objects in no-scan spans that were marked without being queued.
    pub direct_to_black: usize,
    /// Root pointers reported.
    pub roots: usize,
    /// Write-barrier pointers that discovered an object.
    pub wb_roots: usize,
    /// Objects allocated black.
    pub alloc_black: usize,
    /// Spans registered.
    pub spans: usize,
    /// Arenas created.
    pub arenas: usize,
    /// Diagnostics raised.
    pub diagnostics: usize,
}

impl CycleMetrics {
    /// Create metrics with every counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            object_slots: 0,
            marked: 0,
            queued: 0,
            direct_to_black: 0,
            roots: 0,
            wb_roots: 0,
            alloc_black: 0,
            spans: 0,
            arenas: 0,
            diagnostics: 0,
        }
    }

    /// Fraction of object slots that ended the cycle marked.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mark_density(&self) -> f64 {
        if self.object_slots == 0 {
            return 0.0;
        }
        self.marked as f64 / self.object_slots as f64
    }
}

impl fmt::Display for CycleMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} spans, {} arenas, {}/{} marked ({} direct), {} queued, {} roots, {} wb, {} black, {} diagnostics in {:?}",
            self.spans,
            self.arenas,
            self.marked,
            self.object_slots,
            self.direct_to_black,
            self.queued,
            self.roots,
            self.wb_roots,
            self.alloc_black,
            self.diagnostics,
            self.duration,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_density() {
        let mut m = CycleMetrics::new();
        assert!(m.mark_density().abs() < f64::EPSILON);
        m.object_slots = 4;
        m.marked = 1;
        assert!((m.mark_density() - 0.25).abs() < f64::EPSILON);
    }
}
