//! Property tests for the heap registry.

mod common;

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use proptest::prelude::*;

use gclab::heap::{ARENA_BYTES, MAX_OBJS_PER_SPAN, NUM_SIZE_CLASSES, OBJECT_ID_ALIGN, PAGE_BYTES};
use gclab::{Bytes, Heap, VAddr};

use common::classes;

fn page(n: u64) -> VAddr {
    VAddr(PAGE_BYTES.0 * n)
}

/// Build a heap from `(page, class)` requests, skipping any that would
/// overlap an earlier span.
fn build(requests: &[(u64, usize)]) -> Heap {
    let classes = classes();
    let mut heap = Heap::new(classes.clone());
    let mut used = HashSet::new();
    for &(first, class) in requests {
        let sc = classes[class];
        let pages: Vec<u64> = (first..first + sc.span_pages).collect();
        if pages.iter().any(|p| used.contains(p)) {
            continue;
        }
        used.extend(pages);
        heap.new_span(page(first), &sc, false);
    }
    heap
}

fn requests() -> impl Strategy<Value = Vec<(u64, usize)>> {
    // Spread over three arenas so some spans land in each.
    prop::collection::vec((0u64..3 * 8192, 1usize..NUM_SIZE_CLASSES), 1..8)
}

proptest! {
    #[test]
    fn find_object_agrees_with_objects(reqs in requests(), offset in 0u64..u64::MAX) {
        let heap = build(&reqs);
        for (base, id) in heap.objects() {
            let (found, span, found_id) = heap.find_object(base).unwrap();
            prop_assert_eq!(found, base);
            prop_assert_eq!(found_id, id);

            // Any interior byte resolves to the same object.
            let inside = base.plus(Bytes(offset % span.object_bytes().0));
            let (found, _, found_id) = heap.find_object(inside).unwrap();
            prop_assert_eq!(found, base);
            prop_assert_eq!(found_id, id);
            prop_assert_eq!(heap.object_base(id), Some(base));
        }
    }

    #[test]
    fn objects_are_in_address_order(reqs in requests()) {
        let heap = build(&reqs);
        let bases: Vec<VAddr> = heap.objects().map(|(base, _)| base).collect();
        prop_assert!(bases.windows(2).all(|w| w[0] < w[1]));
        let slots: u64 = heap.spans().iter().map(|s| s.object_count()).sum();
        prop_assert_eq!(bases.len() as u64, slots);
    }

    #[test]
    fn object_ids_are_aligned_and_disjoint(reqs in requests()) {
        let heap = build(&reqs);
        let mut next = OBJECT_ID_ALIGN;
        for span in heap.spans() {
            prop_assert_eq!(span.first_object.0 % OBJECT_ID_ALIGN, 0);
            prop_assert!(span.first_object.0 >= next);
            next = span.first_object.0 + span.object_count();
        }
        prop_assert!(heap.object_ids().0 >= next);
    }

    #[test]
    fn spans_fit_their_pages(first in 0u64..8192, class in 1usize..NUM_SIZE_CLASSES) {
        let classes = classes();
        let mut heap = Heap::new(classes.clone());
        let span = heap.new_span(page(first), &classes[class], false);
        prop_assert!(span.object_count() >= 1);
        prop_assert!(span.object_count() <= MAX_OBJS_PER_SPAN);
        prop_assert!(span.end <= page(first + span.npages));
        prop_assert_eq!(
            span.end.minus(span.start),
            span.object_bytes().mul(span.object_count())
        );
    }

    #[test]
    fn overlapping_spans_are_rejected(
        a in 0u64..64,
        a_pages in 1u64..16,
        b in 0u64..64,
        b_pages in 1u64..16,
    ) {
        let mut heap = Heap::new(classes());
        heap.new_span_large(page(a), a_pages, false);
        let second = panic::catch_unwind(AssertUnwindSafe(|| {
            heap.new_span_large(page(b), b_pages, false);
        }));
        let overlaps = a < b + b_pages && b < a + a_pages;
        prop_assert_eq!(second.is_err(), overlaps);
    }

    #[test]
    fn laddr_round_trips(
        arenas in prop::collection::btree_set(0u64..64, 1..6),
        offset in 0u64..ARENA_BYTES.0,
    ) {
        let mut heap = Heap::new(classes());
        for &idx in &arenas {
            heap.ensure_arena(VAddr(idx * ARENA_BYTES.0));
        }
        let limit = heap.arenas().len() as u64 * ARENA_BYTES.0;
        for &idx in &arenas {
            let addr = VAddr(idx * ARENA_BYTES.0 + offset);
            let laddr = heap.vaddr_to_laddr(addr);
            prop_assert!(laddr.0 < limit);
            prop_assert_eq!(heap.laddr_to_vaddr(laddr), addr);
        }
    }
}
