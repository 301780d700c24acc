use std::ptr::NonNull;

#[cfg(unix)]
#[allow(unused)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_NONE: i32 = 0x0;
    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap, mprotect and munmap
    /// # Safety
    /// see valid mmap, mprotect and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn mprotect(addr: *mut c_void, length: usize, prot: i32) -> i32;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// reserves address space nobody may touch yet
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_reserve(len: usize) -> *mut u8 {
        // SAFETY: safe if contract holds
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_NONE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// # Safety
    /// range must be page aligned and inside a mapping
    #[inline]
    pub unsafe fn protect(ptr: *mut u8, len: usize, prot: i32) -> bool {
        // SAFETY: safe if contract holds
        unsafe { mprotect(ptr.cast(), len, prot) == 0 }
    }

    /// posix memory deallocation using munmap
    /// # Safety
    /// must be allocated by mmmap
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

#[must_use]
pub const fn round_to_page(size: usize) -> usize {
    size.div_ceil(OS_PAGE_SIZE) * OS_PAGE_SIZE
}

/// Maps `size` bytes with no access rights at all.
#[must_use]
pub fn reserve_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: this is safe
    let ptr = unsafe { unix::anonymous_reserve(size) };
    NonNull::new(ptr)
}

/// Flips a page aligned range of a reservation to read-write.
#[must_use]
pub fn open_read_write(ptr: NonNull<u8>, size: usize) -> bool {
    debug_assert!((ptr.as_ptr() as usize).is_multiple_of(OS_PAGE_SIZE));
    // SAFETY: ptr must be inside a reservation made by reserve_memory
    unsafe {
        unix::protect(ptr.as_ptr(), size, unix::PROT_READ | unix::PROT_WRITE)
    }
}

pub fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: ptr must be from mmap allocation
    unsafe { unix::anonymous_munmap(ptr.as_ptr(), size) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opened_range_is_writable() {
        let size = round_to_page(1) * 2;
        let base = reserve_memory(size).expect("reserve");
        assert!(open_read_write(base, OS_PAGE_SIZE));
        // SAFETY: first page was opened above
        unsafe {
            base.as_ptr().write(0xAB);
            assert_eq!(base.as_ptr().read(), 0xAB);
        }
        unmap_memory(base, size);
    }

    #[test]
    fn round_to_page_rounds_up() {
        assert_eq!(round_to_page(0), 0);
        assert_eq!(round_to_page(1), OS_PAGE_SIZE);
        assert_eq!(round_to_page(OS_PAGE_SIZE), OS_PAGE_SIZE);
        assert_eq!(round_to_page(OS_PAGE_SIZE + 1), 2 * OS_PAGE_SIZE);
    }
}
