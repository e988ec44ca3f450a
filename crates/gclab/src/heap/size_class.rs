//! Size classes and heap-bitmap layouts.

use std::fmt;

use crate::addr::Bytes;

use super::{NUM_SIZE_CLASSES, PAGE_BYTES};

/// How pointer/scalar information is stored for the objects of a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeapBitsType {
    /// No heap bits: the objects contain no pointers.
    #[default]
    None = 0,
    /// One bit per word of the span, packed at the end of the span.
    Packed = 1,
    /// A type id in a header word at the start of each object.
    Header = 2,
    /// A type id in the span metadata (one object per span).
    Oob = 3,
}

impl TryFrom<u8> for HeapBitsType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Packed),
            2 => Ok(Self::Header),
            3 => Ok(Self::Oob),
            other => Err(other),
        }
    }
}

impl fmt::Display for HeapBitsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Packed => "packed",
            Self::Header => "header",
            Self::Oob => "oob",
        })
    }
}

/// Static description of one allocator size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SizeClass {
    /// Index of this class in the table.
    pub id: usize,
    /// Size of each object.
    pub object_bytes: Bytes,
    /// Pages in each span of this class.
    pub span_pages: u64,
    /// Declared heap-bitmap layout of spans in this class.
    pub heap_bits_type: HeapBitsType,
}

impl SizeClass {
    /// The reserved class 0, used for large objects that get a span each.
    pub const LARGE: Self = Self {
        id: 0,
        object_bytes: Bytes(0),
        span_pages: 0,
        heap_bits_type: HeapBitsType::Oob,
    };

    /// Objects that fit in one span of this class (rounds down).
    #[must_use]
    pub const fn objects_per_span(&self) -> u64 {
        PAGE_BYTES.mul(self.span_pages).div(self.object_bytes)
    }
}

/// Object sizes of the Go runtime's size classes.
const CLASS_TO_SIZE: [u64; NUM_SIZE_CLASSES] = [
    0, 8, 16, 24, 32, 48, 64, 80, 96, 112, 128, 144, 160, 176, 192, 208, 224, 240, 256, 288, 320,
    352, 384, 416, 448, 480, 512, 576, 640, 704, 768, 896, 1024, 1152, 1280, 1408, 1536, 1792,
    2048, 2304, 2688, 3072, 3200, 3456, 4096, 4864, 5376, 6144, 6528, 6784, 6912, 8192, 9472,
    9728, 10240, 10880, 12288, 13568, 14336, 16384, 18432, 19072, 20480, 21760, 24576, 27264,
    28672, 32768,
];

/// Pages per span of the Go runtime's size classes.
const CLASS_TO_PAGES: [u64; NUM_SIZE_CLASSES] = [
    0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 2, 1, 2, 1, 2, 1, 3, 2, 3, 1, 3, 2, 3, 4, 5, 6, 1, 7, 6, 5, 4, 3, 5, 7, 2, 9, 7, 5,
    8, 3, 10, 7, 4,
];

/// Largest object size whose pointer bits are packed at the end of the span.
const MAX_PACKED_OBJECT_BYTES: u64 = 512;

/// The size-class table of the Go runtime the traces come from.
///
/// Real traces carry their own table in a size batch; this one is for tests,
/// benchmarks and hand-built replays.
#[must_use]
pub fn default_size_classes() -> Vec<SizeClass> {
    CLASS_TO_SIZE
        .iter()
        .zip(CLASS_TO_PAGES)
        .enumerate()
        .map(|(id, (&size, pages))| {
            if id == 0 {
                return SizeClass::LARGE;
            }
            let heap_bits_type = if size <= MAX_PACKED_OBJECT_BYTES {
                HeapBitsType::Packed
            } else {
                HeapBitsType::Header
            };
            SizeClass {
                id,
                object_bytes: Bytes(size),
                span_pages: pages,
                heap_bits_type,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{MAX_OBJS_PER_SPAN, MAX_PAGES_PER_SPAN};

    #[test]
    fn test_default_table_shape() {
        let table = default_size_classes();
        assert_eq!(table.len(), NUM_SIZE_CLASSES);
        assert_eq!(table[0], SizeClass::LARGE);
        for (i, sc) in table.iter().enumerate().skip(1) {
            assert_eq!(sc.id, i);
            assert!(sc.span_pages <= MAX_PAGES_PER_SPAN);
            assert!(sc.objects_per_span() <= MAX_OBJS_PER_SPAN);
            assert!(sc.objects_per_span() >= 1);
            assert!(table[i - 1].object_bytes < sc.object_bytes);
        }
        assert_eq!(table[1].objects_per_span(), MAX_OBJS_PER_SPAN);
    }

    #[test]
    fn test_heap_bits_type_round_trip() {
        for raw in 0..4u8 {
            let hbt = HeapBitsType::try_from(raw).unwrap();
            assert_eq!(hbt as u8, raw);
        }
        assert_eq!(HeapBitsType::try_from(4), Err(4));
    }
}
