//! Thin bindings for the `mmap` helpers in `c/map.c`.  Every call
//! reports failure as a positive `errno` value.
use std::ffi::c_void;
use std::ptr::NonNull;

extern "C" {
    fn chunkmap__page_size() -> i64;
    fn chunkmap__reserve_region(size: usize, OUT_errno: *mut i32) -> Option<NonNull<c_void>>;
    fn chunkmap__release_region(base: NonNull<c_void>, size: usize) -> i32;
    fn chunkmap__allocate_region(base: NonNull<c_void>, size: usize) -> i32;
}

lazy_static::lazy_static! {
    static ref PAGE_SIZE: usize = match unsafe { chunkmap__page_size() } {
        size if size > 0 && (size & (size - 1)) == 0 => size as usize,
        _ => crate::pal::error("Unable to find the page size"),
    };
}

/// Returns the system page size.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Region sizes must be whole pages; anything else is `EINVAL`.
fn check_region_size(size: usize) -> Result<(), i32> {
    if size % page_size() == 0 {
        Ok(())
    } else {
        Err(crate::pal::einval())
    }
}

/// Converts a `0 / -errno` return value.
fn errno_result(ret: i32) -> Result<(), i32> {
    if ret == 0 {
        Ok(())
    } else {
        Err(-ret)
    }
}

/// Reserves `size` bytes of inaccessible address space.
pub fn reserve_region(size: usize) -> Result<NonNull<c_void>, i32> {
    check_region_size(size)?;
    if size == 0 {
        return Err(crate::pal::einval());
    }

    let mut errno: i32 = 0;
    unsafe { chunkmap__reserve_region(size, &mut errno) }.ok_or(errno)
}

/// Returns `[base, base + size)` to the operating system.
pub fn release_region(base: NonNull<c_void>, size: usize) -> Result<(), i32> {
    check_region_size(size)?;
    errno_result(unsafe { chunkmap__release_region(base, size) })
}

/// Replaces `[base, base + size)`, which must be reserved, with
/// zero-filled, demand-faulted, read-write memory.
pub fn allocate_region(base: NonNull<c_void>, size: usize) -> Result<(), i32> {
    check_region_size(size)?;
    errno_result(unsafe { chunkmap__allocate_region(base, size) })
}

#[test]
fn test_page_size() {
    assert!(page_size().is_power_of_two());
    assert_eq!(reserve_region(page_size() + 1).err(), Some(crate::pal::einval()));
    assert_eq!(reserve_region(0).err(), Some(crate::pal::einval()));
}

// Reserve a range, back part of it with memory, check that it's
// zero-filled and writable, then release everything.
#[test]
fn test_reserve_allocate_release() {
    let region_size = 16 * page_size();
    let base = reserve_region(region_size).expect("reserve should succeed");

    allocate_region(base, 4 * page_size()).expect("should allocate the bottom");

    let bytes = base.as_ptr() as *mut u8;
    unsafe {
        assert_eq!(std::ptr::read(bytes), 0);
        assert_eq!(std::ptr::read(bytes.add(4 * page_size() - 1)), 0);
        std::ptr::write(bytes.add(page_size()), 42u8);
        assert_eq!(std::ptr::read(bytes.add(page_size())), 42);
    }

    // Empty releases are no-ops.
    release_region(base, 0).expect("empty release must succeed");
    release_region(base, region_size).expect("should release everything");
}
