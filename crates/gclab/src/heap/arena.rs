//! Arenas: fixed-size chunks of the simulated address space.

use std::fmt;

use crate::addr::{Range, VAddr, PAGES_PER_ARENA};

use super::memory::RegionId;
use super::span::SpanId;
use super::ARENA_BYTES;

/// Sequential identifier of an arena, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaId(pub u32);

/// Id used in the arena index map for "no arena here".
pub const NO_ARENA: ArenaId = ArenaId(u32::MAX);

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NO_ARENA {
            return f.write_str("NoArena");
        }
        write!(f, "ArenaId({})", self.0)
    }
}

/// One [`ARENA_BYTES`]-sized chunk of the address space.
#[derive(Debug)]
pub struct Arena {
    /// This arena's id.
    pub id: ArenaId,
    /// First byte of the arena.
    pub start: VAddr,
    /// Page index within the arena -> owning span.
    pub span_map: Vec<Option<SpanId>>,
    /// Backing memory, once something has asked for it. Contiguous arenas
    /// share one region.
    pub(crate) region: Option<RegionId>,
}

impl Arena {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn new(id: ArenaId, start: VAddr) -> Self {
        Self {
            id,
            start,
            span_map: vec![None; PAGES_PER_ARENA as usize],
            region: None,
        }
    }

    /// The bytes covered by this arena.
    #[must_use]
    pub const fn range(&self) -> Range {
        Range::new(self.start, ARENA_BYTES)
    }

    /// Whether backing memory has been materialized for this arena.
    #[must_use]
    pub const fn has_memory(&self) -> bool {
        self.region.is_some()
    }
}

impl fmt::Display for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arena[{}]/{}", self.id.0, self.range())
    }
}
