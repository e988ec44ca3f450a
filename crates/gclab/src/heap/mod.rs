//! Heap registry: size classes, arenas, spans and types.
//!
//! The heap mirrors the bookkeeping of a size-classed page allocator without
//! allocating anything on behalf of the traced program:
//!
//! - The address space is split into [`ARENA_BYTES`] arenas, created lazily
//!   the first time a span touches them.
//! - Each arena maps its pages to the [`Span`] that owns them.
//! - Each span holds either one large object or `floor(pages * PAGE_BYTES /
//!   object_bytes)` objects of one [`SizeClass`].
//! - Objects are named by dense [`ObjectId`]s reserved per span at creation
//!   time, so per-object state lives in bitmaps rather than in the spans.

use std::collections::HashMap;
use std::sync::Arc;

use crate::addr::{Bytes, LAddr, Range, VAddr, VPage, Words, NO_LADDR, PAGES_PER_ARENA};
use crate::fatal;

mod arena;
mod memory;
mod size_class;
mod span;

pub use arena::{Arena, ArenaId, NO_ARENA};
pub use size_class::{default_size_classes, HeapBitsType, SizeClass};
pub use span::{ObjectId, Span, SpanId, Type};

use memory::{Memory, RegionId};

// ============================================================================
// Constants
// ============================================================================

/// Size of a pointer-sized word.
pub const WORD_BYTES: Bytes = Bytes(8);

/// Size of an allocator page.
pub const PAGE_BYTES: Bytes = Bytes(8 << 10);

/// Size of an arena.
pub const ARENA_BYTES: Bytes = Bytes(64 << 20);

/// Words per page.
pub const PAGE_WORDS: Words = Words(PAGE_BYTES.0 / WORD_BYTES.0);

/// Words per arena.
pub const ARENA_WORDS: Words = Words(ARENA_BYTES.0 / WORD_BYTES.0);

/// Most objects any size class may pack into one span.
pub const MAX_OBJS_PER_SPAN: u64 = 1024;

/// Most pages a classed span may have. Large-object spans are unbounded.
pub const MAX_PAGES_PER_SPAN: u64 = 10;

/// Number of entries in a size-class table, including the large class 0.
pub const NUM_SIZE_CLASSES: usize = 68;

/// The first object id of every span is aligned to this.
pub const OBJECT_ID_ALIGN: u64 = 64;

// ============================================================================
// Heap
// ============================================================================

/// The reconstructed heap of one GC cycle.
#[derive(Debug)]
pub struct Heap {
    size_classes: Arc<[SizeClass]>,
    types: HashMap<u64, Type>,
    /// Arena index -> arena id + 1, so a zero-filled entry means "no arena".
    arena_map: Vec<u32>,
    arenas: Vec<Arena>,
    spans: Vec<Span>,
    memory: Memory,
    next_object: ObjectId,
}

impl Heap {
    /// Create an empty heap using `size_classes`.
    ///
    /// # Panics
    ///
    /// Panics if the table does not have [`NUM_SIZE_CLASSES`] entries, if ids
    /// are not sequential from 0, if class 0 is not [`SizeClass::LARGE`], or
    /// if any class exceeds [`MAX_PAGES_PER_SPAN`] or [`MAX_OBJS_PER_SPAN`].
    #[must_use]
    pub fn new(size_classes: Arc<[SizeClass]>) -> Self {
        if size_classes.len() != NUM_SIZE_CLASSES {
            fatal!(
                "expected {NUM_SIZE_CLASSES} size classes, got {}",
                size_classes.len()
            );
        }
        for (i, sc) in size_classes.iter().enumerate() {
            if sc.id != i {
                fatal!("bad size class id {} at index {i}", sc.id);
            }
            if i == 0 {
                if *sc != SizeClass::LARGE {
                    fatal!("bad 0th size class: {sc:?}");
                }
                continue;
            }
            if sc.object_bytes.0 == 0 {
                fatal!("size class {i} has zero-byte objects");
            }
            if sc.span_pages > MAX_PAGES_PER_SPAN {
                fatal!(
                    "too many pages in size class {sc:?}: {} > {MAX_PAGES_PER_SPAN}",
                    sc.span_pages
                );
            }
            if sc.objects_per_span() > MAX_OBJS_PER_SPAN {
                fatal!(
                    "too many objects in size class {sc:?}: {} > {MAX_OBJS_PER_SPAN}",
                    sc.objects_per_span()
                );
            }
        }

        Self {
            size_classes,
            types: HashMap::new(),
            arena_map: Vec::new(),
            arenas: Vec::new(),
            spans: Vec::new(),
            memory: Memory::default(),
            next_object: ObjectId(OBJECT_ID_ALIGN),
        }
    }

    /// The size-class table this heap was built with.
    #[must_use]
    pub fn size_classes(&self) -> &[SizeClass] {
        &self.size_classes
    }

    /// All arenas, indexed by [`ArenaId`].
    #[must_use]
    pub fn arenas(&self) -> &[Arena] {
        &self.arenas
    }

    /// All spans, in creation order.
    #[must_use]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// The span with id `id`.
    #[must_use]
    pub fn span(&self, id: SpanId) -> &Span {
        &self.spans[id.0 as usize]
    }

    /// All registered types, by id.
    #[must_use]
    pub const fn types(&self) -> &HashMap<u64, Type> {
        &self.types
    }

    /// Exclusive upper bound of the object ids handed out so far.
    #[must_use]
    pub const fn object_ids(&self) -> ObjectId {
        self.next_object
    }

    // ------------------------------------------------------------------------
    // Arenas
    // ------------------------------------------------------------------------

    /// The id of the arena at arena index `idx`, or [`NO_ARENA`].
    #[must_use]
    pub fn arena_index_to_id(&self, idx: usize) -> ArenaId {
        match self.arena_map.get(idx) {
            Some(&slot) if slot != 0 => ArenaId(slot - 1),
            _ => NO_ARENA,
        }
    }

    /// The arena covering `addr`, creating it if needed.
    pub fn ensure_arena(&mut self, addr: VAddr) -> &Arena {
        let idx = addr.arena_index();
        if idx >= self.arena_map.len() {
            // The real runtime preallocates this map.
            self.arena_map.resize(idx + 1, 0);
        }

        let id = self.arena_index_to_id(idx);
        if id != NO_ARENA {
            return &self.arenas[id.0 as usize];
        }

        let id = ArenaId(
            u32::try_from(self.arenas.len()).unwrap_or_else(|_| fatal!("too many arenas")),
        );
        self.arenas
            .push(Arena::new(id, VAddr(ARENA_BYTES.mul(idx as u64).0)));
        self.arena_map[idx] = id.0 + 1;
        crate::tracing::log_new_arena(&self.arenas[id.0 as usize]);
        &self.arenas[id.0 as usize]
    }

    /// The arena covering `addr`, if any.
    #[must_use]
    pub fn find_arena(&self, addr: VAddr) -> Option<&Arena> {
        let id = self.arena_index_to_id(addr.arena_index());
        (id != NO_ARENA).then(|| &self.arenas[id.0 as usize])
    }

    // ------------------------------------------------------------------------
    // Spans and types
    // ------------------------------------------------------------------------

    /// Register a span of size class `sc` starting at `base`.
    ///
    /// `no_scan` forces [`HeapBitsType::None`] regardless of the class layout.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not page aligned or if any page of the span is
    /// already owned by another span.
    pub fn new_span(&mut self, base: VAddr, sc: &SizeClass, no_scan: bool) -> &Span {
        let heap_bits_type = if no_scan {
            HeapBitsType::None
        } else {
            sc.heap_bits_type
        };
        self.set_span(base, sc.span_pages, Some(*sc), heap_bits_type)
    }

    /// Register a large-object span of `pages` pages starting at `base`.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`Heap::new_span`].
    pub fn new_span_large(&mut self, base: VAddr, pages: u64, no_scan: bool) -> &Span {
        let heap_bits_type = if no_scan {
            HeapBitsType::None
        } else {
            HeapBitsType::Oob
        };
        self.set_span(base, pages, None, heap_bits_type)
    }

    fn set_span(
        &mut self,
        base: VAddr,
        npages: u64,
        size_class: Option<SizeClass>,
        heap_bits_type: HeapBitsType,
    ) -> &Span {
        if base.0 % PAGE_BYTES.0 != 0 {
            fatal!("unaligned span base {base}");
        }
        if npages == 0 {
            fatal!("span at {base} has no pages");
        }

        let id = SpanId(
            u32::try_from(self.spans.len()).unwrap_or_else(|_| fatal!("too many spans")),
        );

        // Record page -> span.
        let first = base.page();
        for i in 0..npages {
            let page = first.plus(i);
            self.ensure_arena(page.start());
            let arena_id = self.arena_index_to_id(page.arena_index());
            let arena = &mut self.arenas[arena_id.0 as usize];
            let slot = &mut arena.span_map[page.arena_offset()];
            if let Some(old) = *slot {
                let old = &self.spans[old.0 as usize];
                fatal!(
                    "span overlap at page {}: new span at {base} ({npages} pages), old {old}",
                    page.start()
                );
            }
            *slot = Some(id);
        }

        // Reserve object ids.
        let (count, end) = match &size_class {
            None => (1, base.plus(PAGE_BYTES.mul(npages))),
            Some(sc) => {
                // Intentionally rounds down.
                let count = PAGE_BYTES.mul(npages).div(sc.object_bytes);
                (count, base.plus(sc.object_bytes.mul(count)))
            }
        };
        let first_object = self.next_object;
        self.next_object = ObjectId((first_object.0 + count).next_multiple_of(OBJECT_ID_ALIGN));

        self.spans.push(Span {
            id,
            start: base,
            end,
            npages,
            size_class,
            heap_bits_type,
            heap_bits: Vec::new(),
            alloc_bits: crate::bitmap::Set::default(),
            first_object,
        });
        &self.spans[id.0 as usize]
    }

    /// Register a type.
    ///
    /// # Panics
    ///
    /// Panics if a type with the same id already exists.
    pub fn new_type(&mut self, id: u64, size: Bytes, ptr_words: Words, ptr_mask: &[u64]) {
        if self.types.contains_key(&id) {
            fatal!("duplicate type ID {id}");
        }
        self.types.insert(
            id,
            Type {
                id,
                size,
                ptr_words,
                ptr_mask: ptr_mask.to_vec(),
            },
        );
    }

    /// The type with id `id`, if registered.
    #[must_use]
    pub fn find_type(&self, id: u64) -> Option<&Type> {
        self.types.get(&id)
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    fn span_id_at(&self, addr: VAddr) -> Option<SpanId> {
        let arena = self.find_arena(addr)?;
        arena.span_map[addr.page().arena_offset()]
    }

    /// The span owning the page containing `addr`.
    #[must_use]
    pub fn find_span(&self, addr: VAddr) -> Option<&Span> {
        self.span_id_at(addr).map(|id| self.span(id))
    }

    /// Mutable access to the span owning the page containing `addr`.
    pub fn find_span_mut(&mut self, addr: VAddr) -> Option<&mut Span> {
        let id = self.span_id_at(addr)?;
        Some(&mut self.spans[id.0 as usize])
    }

    /// The arena containing `addr` and the span owning its page, if any.
    #[must_use]
    pub fn find_arena_and_span(&self, addr: VAddr) -> (Option<&Arena>, Option<&Span>) {
        let Some(arena) = self.find_arena(addr) else {
            return (None, None);
        };
        let span = arena.span_map[addr.page().arena_offset()].map(|id| self.span(id));
        (Some(arena), span)
    }

    /// Resolve `addr` to the object containing it: `(object base, span, id)`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is in a span's pages but at or past the span's end.
    #[must_use]
    pub fn find_object(&self, addr: VAddr) -> Option<(VAddr, &Span, ObjectId)> {
        let span = self.find_span(addr)?;
        if addr >= span.end {
            fatal!(
                "find_object({addr}) after end of span [{},{})",
                span.start,
                span.end
            );
        }
        let index = span.object_index(addr);
        let base = span.start.plus(span.object_bytes().mul(index));
        Some((base, span, span.object_id(index)))
    }

    /// Resolve an object id back to `(object base, span)`.
    #[must_use]
    pub fn find_object_by_id(&self, id: ObjectId) -> Option<(VAddr, &Span)> {
        // Spans are created with ascending first ids.
        let i = self
            .spans
            .partition_point(|s| s.first_object <= id)
            .checked_sub(1)?;
        let span = &self.spans[i];
        let index = id.0 - span.first_object.0;
        (index < span.object_count())
            .then(|| (span.start.plus(span.object_bytes().mul(index)), span))
    }

    /// Base address of object `id`.
    #[must_use]
    pub fn object_base(&self, id: ObjectId) -> Option<VAddr> {
        self.find_object_by_id(id).map(|(base, _)| base)
    }

    // ------------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------------

    /// Directly addressable memory for `[base, base + len)`.
    ///
    /// Returns `None` if `base` is not in any arena.
    ///
    /// # Panics
    ///
    /// Panics if the range runs past the end of the contiguous run of arenas
    /// containing `base`.
    pub fn mem(&mut self, base: VAddr, len: Bytes) -> Option<&mut [u8]> {
        let arena_id = self.find_arena(base)?.id;
        let want = Range::new(base, len);

        let covered = self.arenas[arena_id.0 as usize]
            .region
            .and_then(|id| self.memory.get(id))
            .is_some_and(|region| {
                let have = region.range();
                have.contains(base) && want.end() <= have.end()
            });
        if !covered {
            self.materialize(base.arena_index());
        }

        let region_id = self.arenas[arena_id.0 as usize].region?;
        let region = self.memory.get_mut(region_id)?;
        let have = region.range();
        if want.end() > have.end() {
            fatal!("memory range {want} runs past mapped arenas {have}");
        }
        #[allow(clippy::cast_possible_truncation)]
        let off = base.minus(have.start).0 as usize;
        #[allow(clippy::cast_possible_truncation)]
        let len = len.0 as usize;
        Some(&mut region.bytes_mut()[off..off + len])
    }

    /// Read the word at `addr`, or `None` if `addr` is not in any arena.
    pub fn read_word(&mut self, addr: VAddr) -> Option<u64> {
        let bytes = self.mem(addr, WORD_BYTES)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Some(u64::from_le_bytes(word))
    }

    /// Write `value` to the word at `addr`. Returns `false` if `addr` is not
    /// in any arena.
    pub fn write_word(&mut self, addr: VAddr, value: u64) -> bool {
        match self.mem(addr, WORD_BYTES) {
            Some(bytes) => {
                bytes.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Map one region for the maximal contiguous run of arenas around arena
    /// index `idx`, carrying over any memory those arenas already had.
    fn materialize(&mut self, idx: usize) {
        let mut start = idx;
        while start > 0 && self.arena_index_to_id(start - 1) != NO_ARENA {
            start -= 1;
        }
        let mut end = idx + 1;
        while self.arena_index_to_id(end) != NO_ARENA {
            end += 1;
        }

        let mut old: Vec<RegionId> = Vec::new();
        for i in start..end {
            let id = self.arena_index_to_id(i);
            if let Some(region) = self.arenas[id.0 as usize].region {
                if !old.contains(&region) {
                    old.push(region);
                }
            }
        }

        let range = Range::new(
            VAddr(ARENA_BYTES.mul(start as u64).0),
            ARENA_BYTES.mul((end - start) as u64),
        );
        let region = self.memory.merge(range, &old);
        for i in start..end {
            let id = self.arena_index_to_id(i);
            self.arenas[id.0 as usize].region = Some(region);
        }
        crate::tracing::log_materialize(range, old.len());
    }

    /// Number of backing regions currently mapped.
    #[must_use]
    pub fn mapped_regions(&self) -> usize {
        self.memory.live_regions()
    }

    // ------------------------------------------------------------------------
    // Logical addresses
    // ------------------------------------------------------------------------

    /// Translate a virtual address to its dense logical address, or
    /// [`NO_LADDR`] if its arena does not exist.
    #[must_use]
    pub fn vaddr_to_laddr(&self, addr: VAddr) -> LAddr {
        let (idx, off) = addr.arena();
        let id = self.arena_index_to_id(idx);
        if id == NO_ARENA {
            return NO_LADDR;
        }
        LAddr(ARENA_BYTES.mul(u64::from(id.0)).0 + off.0)
    }

    /// Translate a logical address back to its virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the logical address names an arena that does not exist.
    #[must_use]
    pub fn laddr_to_vaddr(&self, addr: LAddr) -> VAddr {
        let (id, off) = addr.arena();
        match self.arenas.get(id.0 as usize) {
            Some(arena) => arena.start.plus(off),
            None => fatal!("logical address {addr} names missing arena {id}"),
        }
    }

    // ------------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------------

    /// Every span, in address order.
    pub fn spans_by_address(&self) -> impl Iterator<Item = &Span> + '_ {
        self.arena_map
            .iter()
            .filter(|&&slot| slot != 0)
            .map(move |&slot| &self.arenas[(slot - 1) as usize])
            .flat_map(move |arena| {
                let first_page = arena.start.page();
                arena
                    .span_map
                    .iter()
                    .enumerate()
                    .filter_map(move |(i, slot)| {
                        let span = self.span((*slot)?);
                        // Yield each span once, from the page it starts on.
                        (span.start.page() == first_page.plus(i as u64)).then_some(span)
                    })
            })
    }

    /// Every object slot of every span as `(base, id)`, in address order.
    pub fn objects(&self) -> impl Iterator<Item = (VAddr, ObjectId)> + '_ {
        self.spans_by_address().flat_map(Span::objects)
    }

    /// Every arena overlapping `range`, in address order.
    pub fn arenas_in(&self, range: Range) -> impl Iterator<Item = &Arena> + '_ {
        let start_idx = range.start.arena_index();
        let end_idx = usize::try_from(range.end().0.div_ceil(ARENA_BYTES.0))
            .unwrap_or(usize::MAX)
            .min(self.arena_map.len());
        self.arena_map
            .get(start_idx..end_idx)
            .unwrap_or_default()
            .iter()
            .filter(|&&slot| slot != 0)
            .map(move |&slot| &self.arenas[(slot - 1) as usize])
    }

    /// Every span overlapping `range`, in address order.
    #[must_use]
    pub fn spans_in(&self, range: Range) -> SpansIn<'_> {
        let mut end_page = range.end().page();
        if range.end().0 % PAGE_BYTES.0 != 0 {
            end_page = end_page.plus(1);
        }
        SpansIn {
            heap: self,
            range,
            page: range.start.page(),
            end_page,
        }
    }
}

/// Iterator returned by [`Heap::spans_in`].
///
/// Holes in the arena map are skipped an arena at a time and spans are
/// skipped whole, so the cost is proportional to the number of spans and
/// arenas visited rather than the number of pages in the range.
pub struct SpansIn<'a> {
    heap: &'a Heap,
    range: Range,
    page: VPage,
    end_page: VPage,
}

impl<'a> Iterator for SpansIn<'a> {
    type Item = &'a Span;

    fn next(&mut self) -> Option<&'a Span> {
        while self.page < self.end_page {
            let idx = self.page.arena_index();
            let id = self.heap.arena_index_to_id(idx);
            if id == NO_ARENA {
                if idx >= self.heap.arena_map.len() {
                    self.page = self.end_page;
                    return None;
                }
                // Skip to the next arena.
                self.page = VPage((idx as u64 + 1) * PAGES_PER_ARENA);
                continue;
            }

            let arena = &self.heap.arenas[id.0 as usize];
            let arena_end = arena.start.plus(ARENA_BYTES).page();
            let loop_end = self.end_page.min(arena_end);
            while self.page < loop_end {
                let Some(span_id) = arena.span_map[self.page.arena_offset()] else {
                    self.page = self.page.plus(1);
                    continue;
                };
                let span = self.heap.span(span_id);
                self.page = span.start.page().plus(span.npages);
                if span.range().overlaps(&self.range) {
                    return Some(span);
                }
            }
        }
        None
    }
}
