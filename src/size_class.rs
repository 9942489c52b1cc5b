//! Size classes are an opaque, totally ordered set of allocation
//! sizes.  Requests too large for any class go to the large allocation
//! path, where sizes are rounded up to a power of two of at least one
//! chunk.
use crate::address::next_pow2;
use crate::address::next_pow2_bits;
use crate::tag::CHUNK_BITS;
use crate::tag::CHUNK_SIZE;

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SizeClass(usize);

impl SizeClass {
    #[inline]
    pub const fn new(index: usize) -> SizeClass {
        SizeClass(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

pub trait SizeClassTable {
    /// Returns the smallest class that fits `size`, or `None` if `size`
    /// is too large for any class.
    fn class_of(&self, size: usize) -> Option<SizeClass>;

    /// Returns the exact allocation size for `class`.
    fn size_of(&self, class: SizeClass) -> usize;

    /// Classes are `SizeClass::new(0)` .. `SizeClass::new(num_classes())`,
    /// in increasing size order.
    fn num_classes(&self) -> usize;

    /// Returns the number of bytes a request for `size` bytes actually
    /// occupies, or `None` if that does not fit in the address space.
    fn allocation_size(&self, size: usize) -> Option<usize> {
        match self.class_of(size) {
            Some(class) => Some(self.size_of(class)),
            None => large_rounded_size(size),
        }
    }
}

/// Returns the size of a large allocation for `size` bytes: the next
/// power of two, and at least one chunk.
#[inline]
pub fn large_rounded_size(size: usize) -> Option<usize> {
    next_pow2(size.max(CHUNK_SIZE))
}

/// The smallest class holds this many bytes.
pub const MIN_ALLOC_BITS: u32 = 4;
pub const MIN_ALLOC_SIZE: usize = 1 << MIN_ALLOC_BITS;

/// Powers of two from `MIN_ALLOC_SIZE` up to half a chunk.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSizeClasses {}

static_assertions::const_assert!(MIN_ALLOC_BITS < CHUNK_BITS - 1);

impl SizeClassTable for DefaultSizeClasses {
    #[inline]
    fn class_of(&self, size: usize) -> Option<SizeClass> {
        let bits = next_pow2_bits(size).max(MIN_ALLOC_BITS);

        if bits >= CHUNK_BITS {
            None
        } else {
            Some(SizeClass((bits - MIN_ALLOC_BITS) as usize))
        }
    }

    #[inline]
    fn size_of(&self, class: SizeClass) -> usize {
        debug_assert!(class.0 < self.num_classes());
        MIN_ALLOC_SIZE << class.0
    }

    #[inline]
    fn num_classes(&self) -> usize {
        (CHUNK_BITS - MIN_ALLOC_BITS) as usize
    }
}
