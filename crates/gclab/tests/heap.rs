//! Integration tests for the heap registry.

mod common;

use gclab::heap::{
    default_size_classes, ArenaId, HeapBitsType, ObjectId, SizeClass, ARENA_BYTES, NO_ARENA,
    OBJECT_ID_ALIGN, PAGE_BYTES,
};
use gclab::{Bytes, Heap, LAddr, Range, VAddr, Words, NO_LADDR};

use common::classes;

fn heap() -> Heap {
    Heap::new(classes())
}

fn page(n: u64) -> VAddr {
    VAddr(PAGE_BYTES.0 * n)
}

// ============================================================================
// Construction
// ============================================================================

/// A table whose entry 0 is not the out-of-band large class is rejected.
#[test]
#[should_panic(expected = "bad 0th size class")]
fn test_new_heap_rejects_bad_class_zero() {
    let mut table = default_size_classes();
    table[0].heap_bits_type = HeapBitsType::Packed;
    let _ = Heap::new(table.into());
}

#[test]
#[should_panic(expected = "expected 68 size classes")]
fn test_new_heap_rejects_short_table() {
    let mut table = default_size_classes();
    table.pop();
    let _ = Heap::new(table.into());
}

#[test]
#[should_panic(expected = "too many pages in size class")]
fn test_new_heap_rejects_oversized_span() {
    let mut table = default_size_classes();
    table[67].span_pages = 11;
    let _ = Heap::new(table.into());
}

#[test]
#[should_panic(expected = "zero-byte objects")]
fn test_new_heap_rejects_zero_byte_objects() {
    let mut table = default_size_classes();
    table[12].object_bytes = Bytes(0);
    let _ = Heap::new(table.into());
}

/// Two pages of 8-byte objects is twice the per-span object limit.
#[test]
#[should_panic(expected = "too many objects in size class")]
fn test_new_heap_rejects_crowded_span() {
    let mut table = default_size_classes();
    table[1].span_pages = 2;
    let _ = Heap::new(table.into());
}

#[test]
#[should_panic(expected = "bad size class id")]
fn test_new_heap_rejects_out_of_sequence_ids() {
    let mut table = default_size_classes();
    table[3].id = 4;
    let _ = Heap::new(table.into());
}

// ============================================================================
// Spans and objects
// ============================================================================

/// A 32-byte, one-page span holds 256 objects and the last one ends exactly
/// at the span's end.
#[test]
fn test_small_span_layout() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    assert_eq!(sc.object_bytes, Bytes(32));
    assert_eq!(sc.span_pages, 1);

    let span = h.new_span(page(3), &sc, false);
    assert_eq!(span.object_count(), 256);
    assert_eq!(span.object_range(255).end(), span.end);
    assert_eq!(span.end, page(4));
    assert_eq!(span.heap_bits_type, HeapBitsType::Packed);
    assert_eq!(span.first_object, ObjectId(OBJECT_ID_ALIGN));
}

#[test]
fn test_fragmented_span_end() {
    let mut h = heap();
    let sc = h.size_classes()[5];
    let span = h.new_span(page(0), &sc, false);
    // 8192 / 48 = 170 objects, 32 bytes of tail.
    assert_eq!(span.object_count(), 170);
    assert_eq!(span.end, VAddr(170 * 48));
}

#[test]
fn test_no_scan_forces_layout() {
    let mut h = heap();
    let sc = h.size_classes()[30];
    assert_eq!(h.new_span(page(0), &sc, true).heap_bits_type, HeapBitsType::None);
    assert_eq!(
        h.new_span_large(page(10), 3, false).heap_bits_type,
        HeapBitsType::Oob
    );
    assert_eq!(
        h.new_span_large(page(20), 3, true).heap_bits_type,
        HeapBitsType::None
    );
}

#[test]
fn test_find_object() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    let first = h.new_span(page(7), &sc, false).first_object;

    let (base, span, id) = h.find_object(page(7).plus(Bytes(32 * 10 + 5))).unwrap();
    assert_eq!(base, page(7).plus(Bytes(320)));
    assert_eq!(id, ObjectId(first.0 + 10));
    assert_eq!(span.start, page(7));

    assert!(h.find_object(page(8)).is_none());
    assert!(h.find_object(VAddr(ARENA_BYTES.0 * 9)).is_none());
}

#[test]
fn test_find_object_large() {
    let mut h = heap();
    let first = h.new_span_large(page(2), 4, false).first_object;
    let (base, span, id) = h.find_object(page(5).plus(Bytes(100))).unwrap();
    assert_eq!(base, page(2));
    assert_eq!(id, first);
    assert_eq!(span.object_count(), 1);
    assert_eq!(span.end, page(6));
}

#[test]
#[should_panic(expected = "after end of span")]
fn test_find_object_in_span_tail() {
    let mut h = heap();
    let sc = h.size_classes()[5];
    h.new_span(page(0), &sc, false);
    let _ = h.find_object(VAddr(170 * 48 + 8));
}

#[test]
fn test_find_object_by_id() {
    let mut h = heap();
    let sc = h.size_classes()[5];
    let first = h.new_span(page(0), &sc, false).first_object;
    let large = h.new_span_large(page(1), 2, false).first_object;

    assert_eq!(h.object_base(ObjectId(first.0 + 3)), Some(VAddr(144)));
    assert_eq!(h.object_base(large), Some(page(1)));
    // Ids in the alignment gap between spans belong to nothing.
    assert_eq!(h.object_base(ObjectId(first.0 + 170)), None);
    assert_eq!(h.object_base(ObjectId(0)), None);
}

#[test]
#[should_panic(expected = "span overlap")]
fn test_overlapping_spans_rejected() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    h.new_span(page(5), &sc, false);
    h.new_span_large(page(4), 2, false);
}

#[test]
#[should_panic(expected = "unaligned span base")]
fn test_unaligned_span_rejected() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    h.new_span(VAddr(64), &sc, false);
}

#[test]
fn test_object_ids_monotonic_and_aligned() {
    let mut h = heap();
    let table: Vec<SizeClass> = h.size_classes().to_vec();
    let mut prev_end = 0;
    for (i, sc) in table.iter().enumerate().skip(1).take(20) {
        let span = h.new_span(page(i as u64 * 16), sc, false);
        assert_eq!(span.first_object.0 % OBJECT_ID_ALIGN, 0);
        assert!(span.first_object.0 >= prev_end);
        prev_end = span.first_object.0 + span.object_count();
    }
    assert!(h.object_ids().0 >= prev_end);
}

#[test]
#[should_panic(expected = "duplicate type ID 7")]
fn test_duplicate_type_rejected() {
    let mut h = heap();
    h.new_type(7, Bytes(16), Words(1), &[1]);
    h.new_type(7, Bytes(16), Words(1), &[1]);
}

#[test]
fn test_type_pointer_mask() {
    let mut h = heap();
    h.new_type(3, Bytes(80 * 8), Words(70), &[0b101, 1 << 4]);
    let ty = h.find_type(3).unwrap();
    assert!(ty.is_pointer(Words(0)));
    assert!(!ty.is_pointer(Words(1)));
    assert!(ty.is_pointer(Words(2)));
    assert!(ty.is_pointer(Words(68)));
    assert!(!ty.is_pointer(Words(75)));
    assert_eq!(h.types().len(), 1);
}

// ============================================================================
// Arenas and addresses
// ============================================================================

#[test]
fn test_arenas_created_once() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    h.new_span(VAddr(ARENA_BYTES.0 * 3), &sc, false);
    h.new_span(VAddr(ARENA_BYTES.0 * 3 + PAGE_BYTES.0), &sc, false);
    assert_eq!(h.arenas().len(), 1);
    assert_eq!(h.arena_index_to_id(3), ArenaId(0));
    assert_eq!(h.arena_index_to_id(2), NO_ARENA);
    assert!(h.find_arena(VAddr(ARENA_BYTES.0 * 3 + 5)).is_some());
    assert!(h.find_arena(VAddr(0)).is_none());
}

#[test]
fn test_large_span_spans_arenas() {
    let mut h = heap();
    let base = VAddr(ARENA_BYTES.0 * 2 - PAGE_BYTES.0 * 2);
    h.new_span_large(base, 4, false);
    assert_eq!(h.arenas().len(), 2);

    let (arena, span) = h.find_arena_and_span(VAddr(ARENA_BYTES.0 * 2 + 100));
    assert_eq!(arena.unwrap().start, VAddr(ARENA_BYTES.0 * 2));
    assert_eq!(span.unwrap().start, base);

    // Yielded once, even though both arenas map its pages.
    assert_eq!(h.objects().count(), 1);
    assert_eq!(h.spans_in(Range::new(VAddr(0), Bytes(ARENA_BYTES.0 * 4))).count(), 1);
}

#[test]
fn test_laddr_translation() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    h.new_span(VAddr(ARENA_BYTES.0 * 5), &sc, false);
    h.new_span(VAddr(ARENA_BYTES.0 * 2), &sc, false);

    let a = VAddr(ARENA_BYTES.0 * 5 + 100);
    let b = VAddr(ARENA_BYTES.0 * 2 + 100);
    assert_eq!(h.vaddr_to_laddr(a), LAddr(100));
    assert_eq!(h.vaddr_to_laddr(b), LAddr(ARENA_BYTES.0 + 100));
    assert_eq!(h.laddr_to_vaddr(h.vaddr_to_laddr(b)), b);
    assert_eq!(h.vaddr_to_laddr(VAddr(0)), NO_LADDR);
}

#[test]
fn test_arenas_in_skips_holes() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    for idx in [1u64, 3, 4] {
        h.new_span(VAddr(ARENA_BYTES.0 * idx), &sc, false);
    }
    let starts: Vec<VAddr> = h
        .arenas_in(Range::new(VAddr(0), Bytes(ARENA_BYTES.0 * 4)))
        .map(|a| a.start)
        .collect();
    assert_eq!(starts, vec![VAddr(ARENA_BYTES.0), VAddr(ARENA_BYTES.0 * 3)]);
    assert_eq!(h.arenas_in(Range::new(VAddr(ARENA_BYTES.0 * 9), ARENA_BYTES)).count(), 0);
}

#[test]
fn test_spans_in_range() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    for p in [0u64, 1, 5, 9] {
        h.new_span(page(p), &sc, false);
    }
    h.new_span(VAddr(ARENA_BYTES.0 * 3), &sc, false);

    let starts = |r: Range| h.spans_in(r).map(|s| s.start).collect::<Vec<_>>();
    assert_eq!(
        starts(Range::new(page(1).plus(Bytes(10)), PAGE_BYTES.mul(5))),
        vec![page(1), page(5)]
    );
    assert_eq!(
        starts(Range::new(VAddr(0), Bytes(ARENA_BYTES.0 * 4))),
        vec![page(0), page(1), page(5), page(9), VAddr(ARENA_BYTES.0 * 3)]
    );
    assert!(starts(Range::new(page(2), PAGE_BYTES.mul(3))).is_empty());
}

#[test]
fn test_objects_in_address_order() {
    let mut h = heap();
    let sc = h.size_classes()[26];
    // Created out of address order.
    h.new_span(page(4), &sc, false);
    h.new_span(page(1), &sc, false);
    let bases: Vec<VAddr> = h.objects().map(|(base, _)| base).collect();
    assert_eq!(bases.len(), 32);
    assert!(bases.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(bases[0], page(1));
}

// ============================================================================
// Memory
// ============================================================================

#[test]
fn test_mem_read_write() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    h.new_span(page(2), &sc, false);

    assert_eq!(h.read_word(page(2)), Some(0));
    assert!(h.write_word(page(2).plus(Bytes(8)), 0x1234));
    let bytes = h.mem(page(2), Bytes(16)).unwrap();
    assert_eq!(&bytes[8..10], &[0x34, 0x12]);
    assert!(h.arenas()[0].has_memory());
}

#[test]
fn test_mem_merges_new_neighbour() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    h.new_span(VAddr(ARENA_BYTES.0 * 2), &sc, false);
    assert!(h.write_word(VAddr(ARENA_BYTES.0 * 2), 0xfeed));

    h.new_span(VAddr(ARENA_BYTES.0 * 3), &sc, false);
    let straddle = VAddr(ARENA_BYTES.0 * 3 - 8);
    assert_eq!(h.mem(straddle, Bytes(16)).map(|b| b.len()), Some(16));
    assert_eq!(h.read_word(VAddr(ARENA_BYTES.0 * 2)), Some(0xfeed));
    assert_eq!(h.mapped_regions(), 1);
}

#[test]
#[should_panic(expected = "runs past mapped arenas")]
fn test_mem_past_arena_run() {
    let mut h = heap();
    let sc = h.size_classes()[4];
    h.new_span(VAddr(ARENA_BYTES.0), &sc, false);
    let _ = h.mem(VAddr(ARENA_BYTES.0 * 2 - 8), Bytes(16));
}
