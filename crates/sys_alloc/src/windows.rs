use std::io;
use std::mem;
use std::ptr;
use std::sync::OnceLock;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Returns the system page size.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: GetSystemInfo only writes to the struct it is given.
        let size = unsafe {
            let mut info: SYSTEM_INFO = mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        };
        if size == 0 {
            4096
        } else {
            size
        }
    })
}

pub struct MmapInner {
    ptr: *mut std::ffi::c_void,
    len: usize,
}

impl MmapInner {
    /// Committed memory from `VirtualAlloc` is zero-filled and only backed on
    /// first touch, so the no-reserve hint has no equivalent.
    ///
    /// # Safety
    ///
    /// `len` must be non-zero.
    pub unsafe fn map_anon(len: usize, _no_reserve: bool) -> io::Result<Self> {
        // SAFETY: a fresh allocation at an OS-chosen address aliases nothing.
        let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        if ptr.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { ptr, len })
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from VirtualAlloc; MEM_RELEASE requires size 0.
        unsafe {
            VirtualFree(self.ptr, 0, MEM_RELEASE);
        }
    }
}
