//! Zero-filled anonymous memory regions.
//!
//! The heap simulator needs byte-addressable stand-ins for arenas that can be
//! tens of megabytes each but are mostly never touched. Anonymous mappings
//! give that for free: pages are only backed once written.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// An owned, zero-filled, read-write anonymous mapping.
///
/// The region is unmapped when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the mapping.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the mapping is empty. Mappings are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mapping as a byte slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `inner` owns `len` readable bytes for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr(), self.len()) }
    }

    /// The mapping as a mutable byte slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` rules out other live slices.
        unsafe { std::slice::from_raw_parts_mut(self.ptr(), self.len()) }
    }
}

// SAFETY: the mapping is plain memory owned by this handle.
unsafe impl Send for Mmap {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for Mmap {}

impl std::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmap")
            .field("ptr", &self.ptr())
            .field("len", &self.len())
            .finish()
    }
}

/// Configuration for creating an anonymous mapping.
#[derive(Debug, Clone, Default)]
pub struct MmapOptions {
    len: usize,
    no_reserve: bool,
}

impl MmapOptions {
    /// Creates options with length 0. A length must be set before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            no_reserve: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets whether to skip reserving swap (`MAP_NORESERVE` where supported).
    ///
    /// Sparse simulated arenas want this: most of each mapping is never
    /// written.
    #[must_use]
    pub const fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Creates a zero-filled anonymous mapping.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the length is 0, or the OS error if the
    /// mapping cannot be created.
    ///
    /// # Safety
    ///
    /// The caller must not use [`Mmap::ptr`] after the `Mmap` is dropped.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        // SAFETY: forwarded to the caller.
        let inner = unsafe { os::MmapInner::map_anon(self.len, self.no_reserve)? };
        Ok(Mmap { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size() {
        let ps = page_size();
        assert!(ps > 0);
        assert_eq!(ps & (ps - 1), 0, "Page size should be power of 2");
    }

    #[test]
    fn test_map_is_zeroed_and_writable() {
        let len = page_size() * 4;
        let mut mmap = unsafe { MmapOptions::new().len(len).no_reserve(true).map_anon() }
            .expect("failed to map");
        assert_eq!(mmap.len(), len);
        assert_eq!(mmap.ptr() as usize % page_size(), 0);
        assert!(mmap.as_slice().iter().all(|&b| b == 0));

        mmap.as_mut_slice()[len - 1] = 42;
        assert_eq!(mmap.as_slice()[len - 1], 42);
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = unsafe { MmapOptions::new().map_anon() }.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
