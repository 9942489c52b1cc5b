//! The `Heap` is the allocation back end the C entry points dispatch
//! to.  Real allocators carve slabs and large allocations and keep the
//! chunk map up to date; the entry points only need these three calls.
use std::ffi::c_void;
use std::ptr::NonNull;

/// Why an allocation call failed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AllocError {
    /// Not enough memory, or a size computation overflowed.
    OutOfMemory,
    /// The caller passed an argument the call does not accept.
    InvalidArgument,
}

impl AllocError {
    /// Returns the `errno` value for this failure.
    pub fn errno(self) -> i32 {
        match self {
            AllocError::OutOfMemory => crate::pal::enomem(),
            AllocError::InvalidArgument => crate::pal::einval(),
        }
    }
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::OutOfMemory => f.write_str("out of memory"),
            AllocError::InvalidArgument => f.write_str("invalid argument"),
        }
    }
}

impl std::error::Error for AllocError {}

pub trait Heap: Sync {
    /// Allocates at least `size` bytes, zero-filled if `zero`.  The
    /// result is aligned to the natural alignment of
    /// `allocation_size(size)`, and at least `MIN_ALLOC_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns `Err(AllocError::OutOfMemory)` when there is no memory.
    fn alloc(&self, size: usize, zero: bool) -> Result<NonNull<c_void>, AllocError>;

    /// Releases an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `alloc` on this heap, and not
    /// released since.
    unsafe fn dealloc(&self, ptr: NonNull<c_void>);

    /// Returns the number of usable bytes in the allocation that
    /// starts at `ptr`, or 0 if `ptr` does not belong to this heap.
    fn alloc_size(&self, ptr: NonNull<c_void>) -> usize;
}

#[test]
fn test_errno() {
    assert_eq!(AllocError::OutOfMemory.errno(), crate::pal::enomem());
    assert_eq!(AllocError::InvalidArgument.errno(), crate::pal::einval());
    assert_eq!(format!("{}", AllocError::OutOfMemory), "out of memory");
}
