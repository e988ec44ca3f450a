//! Recoverable replay errors.

use thiserror::Error;

use crate::addr::Bytes;

/// An error decoding a batch or driving a replay.
///
/// These describe input the replay cannot make sense of. Conditions that
/// mean the reconstructed heap itself is inconsistent panic instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A record ran past the end of its batch.
    #[error("unexpected end of batch: need {want} bytes at offset {offset}")]
    UnexpectedEof {
        /// Offset of the read that failed.
        offset: usize,
        /// Bytes the read needed.
        want: usize,
    },

    /// A varint did not terminate within 10 bytes or overflowed 64 bits.
    #[error("varint overflows u64 at offset {offset}")]
    VarintOverflow {
        /// Offset of the first byte of the varint.
        offset: usize,
    },

    /// A decoded value overflowed while being accumulated.
    #[error("{what} overflows u64")]
    ValueOverflow {
        /// The quantity that overflowed.
        what: &'static str,
    },

    /// A batch had no header at all.
    #[error("empty batch")]
    EmptyBatch,

    /// A batch header named a kind this decoder does not know.
    #[error("unknown batch kind {0}")]
    UnknownBatchKind(u8),

    /// A size-class record named an unknown heap-bits layout.
    #[error("unknown heap bits type {0}")]
    UnknownHeapBits(u8),

    /// A scan record had kind bits 3.
    #[error("unknown scan kind {0}")]
    UnknownScanKind(u64),

    /// A span referenced a size class outside the table.
    #[error("span class refers to size class {class}, but only {known} are known")]
    UnknownSizeClass {
        /// The size class referenced.
        class: u64,
        /// Length of the table in effect.
        known: usize,
    },

    /// Size classes were not strictly ascending.
    #[error("size class {id} of {size} does not follow {prev}: size classes out of order or duplicated")]
    SizeClassOrder {
        /// Index of the offending class.
        id: usize,
        /// Its object size.
        size: Bytes,
        /// The previous class's object size.
        prev: Bytes,
    },

    /// A size batch decoded to a table of the wrong length.
    #[error("size batch has {got} size classes, expected {want}")]
    SizeClassCount {
        /// Classes decoded.
        got: usize,
        /// Classes required.
        want: usize,
    },

    /// A cycle started before any size batch was seen.
    #[error("GC {generation} started with no size classes decoded")]
    MissingSizeClasses {
        /// The generation that started.
        generation: u64,
    },

    /// A type continuation arrived with no partial type pending.
    #[error("continuation of type {id} following a complete type")]
    TypeContinuationOrphan {
        /// Id carried by the continuation.
        id: u64,
    },

    /// A type continuation's id did not match the pending type.
    #[error("partial type {pending} followed by continuation of type {id}")]
    TypeContinuationMismatch {
        /// Id of the pending partial type.
        pending: u64,
        /// Id carried by the continuation.
        id: u64,
    },

    /// A type continuation did not start where the pending mask ended.
    #[error("type {id} has {have} pointer mask words, but continuation starts at word {offset}")]
    TypeMaskOffset {
        /// Type id.
        id: u64,
        /// Mask words accumulated so far.
        have: usize,
        /// Offset claimed by the continuation.
        offset: u64,
    },

    /// A new type started while another was still partial.
    #[error("partial type {pending} followed by start of type {id}")]
    TypeStartWhilePending {
        /// Id of the pending partial type.
        pending: u64,
        /// Id of the new type.
        id: u64,
    },

    /// The type batches of a generation ended mid-type.
    #[error("type {id} is still partial at the end of its generation's type batches")]
    UnterminatedType {
        /// Id of the pending partial type.
        id: u64,
    },

    /// The parallelism in a cycle start disagreed with the reported metric.
    #[error("parallelism is {reported}, but GC start reports {gc_start}")]
    ParallelismMismatch {
        /// Last reported parallelism metric.
        reported: u32,
        /// Parallelism carried by the cycle start.
        gc_start: u32,
    },
}

/// `Result` specialized to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
