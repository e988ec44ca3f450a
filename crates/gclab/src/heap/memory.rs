//! Backing storage for simulated heap memory.
//!
//! Memory is only needed for objects whose contents the replay writes, so it
//! is created lazily. A region always covers a maximal run of virtually
//! contiguous arenas, which keeps accesses that straddle an arena boundary
//! contiguous. When a new arena appears next to an existing region, the next
//! access builds a larger region and moves the old contents into it.

use sys_alloc::{Mmap, MmapOptions};

use crate::addr::{Bytes, Range, VAddr};

/// Index of a region in [`Memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub(crate) usize);

/// One anonymous mapping standing in for a contiguous run of arenas.
pub(crate) struct Region {
    start: VAddr,
    map: Mmap,
}

impl Region {
    fn map(start: VAddr, len: Bytes) -> Self {
        let len = usize::try_from(len.0).unwrap_or_else(|_| {
            crate::fatal!("region of {len} does not fit the host address space")
        });
        // SAFETY: an anonymous private mapping aliases nothing; `Mmap` owns
        // it and unmaps it on drop.
        let map = unsafe { MmapOptions::new().len(len).no_reserve(true).map_anon() };
        let map = map.unwrap_or_else(|err| {
            crate::fatal!("failed to map {len} bytes of heap memory at {start}: {err}")
        });
        Self { start, map }
    }

    pub(crate) fn range(&self) -> Range {
        Range::new(self.start, Bytes(self.map.len() as u64))
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.map.as_slice()
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.map.as_mut_slice()
    }
}

/// All live regions of one heap.
#[derive(Default)]
pub(crate) struct Memory {
    /// Regions superseded by a merge are dropped and leave a `None` behind,
    /// so ids held by arenas stay stable until they are rewritten. The next
    /// merge reuses the first free slot.
    regions: Vec<Option<Region>>,
}

impl Memory {
    pub(crate) fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Map a zeroed region covering `range` and move the contents of the
    /// `old` regions into it. Every old region must lie inside `range`.
    pub(crate) fn merge(&mut self, range: Range, old: &[RegionId]) -> RegionId {
        let mut region = Region::map(range.start, range.len);
        for &id in old {
            let Some(prev) = self.regions.get_mut(id.0).and_then(Option::take) else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let off = prev.start.minus(range.start).0 as usize;
            let src = prev.bytes();
            region.bytes_mut()[off..off + src.len()].copy_from_slice(src);
        }
        if let Some(slot) = self.regions.iter().position(Option::is_none) {
            self.regions[slot] = Some(region);
            return RegionId(slot);
        }
        self.regions.push(Some(region));
        RegionId(self.regions.len() - 1)
    }

    /// Number of region slots, mapped or free.
    #[cfg(test)]
    pub(crate) fn slots(&self) -> usize {
        self.regions.len()
    }

    /// Number of regions currently mapped.
    pub(crate) fn live_regions(&self) -> usize {
        self.regions.iter().flatten().count()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.regions.iter().flatten().map(Region::range))
            .finish()
    }
}
