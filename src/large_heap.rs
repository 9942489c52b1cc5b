//! The `LargeHeap` serves every request as a large allocation: a fresh
//! mapping, naturally aligned to its power-of-two size, and tagged in
//! the chunk map with the redirect slide.  It is the simplest heap that
//! keeps the chunk map honest, and what the C entry points use by
//! default.
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::address::address_cast;
use crate::address::align_up;
use crate::address::pointer_cast;
use crate::chunkmap::ChunkMap;
use crate::heap::AllocError;
use crate::heap::Heap;
use crate::mapper::Mapper;
use crate::size_class::large_rounded_size;

pub struct LargeHeap<C> {
    map: C,
    mapper: &'static dyn Mapper,
}

impl<C: std::fmt::Debug> std::fmt::Debug for LargeHeap<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeHeap")
            .field("map", &self.map)
            .field("mapper", &self.mapper)
            .finish()
    }
}

/// We reserve twice the allocation size, and trim the range around
/// the naturally aligned `data` region.  The space looks like:
///
/// - slop: [base, data)
/// - data: [data, data_end)
/// - slop: [data_end, top)
///
/// Once `data` is backed with memory, both slop regions go back to
/// the mapper.  On failure, we release everything from `base` to `top`.
#[derive(Debug)]
struct AlignedRegion<'a> {
    mapper: &'a dyn Mapper,
    // All these `usize` are page-aligned addresses.
    base: usize,
    top: usize,
    data: usize,
    data_end: usize,
}

impl<'a> AlignedRegion<'a> {
    /// Reserves a range with room for `size` bytes aligned to `size`.
    ///
    /// # Errors
    ///
    /// Returns `Err` when the mapper itself fails.  Failures downstream
    /// indicate that the mapper returned an invalid range, and are
    /// fatal.
    fn new(mapper: &'a dyn Mapper, size: usize) -> Result<AlignedRegion<'a>, i32> {
        let reserved_size = size.checked_mul(2).ok_or_else(crate::pal::enomem)?;
        let region = mapper.reserve(reserved_size)?;

        match AlignedRegion::new_from_range(mapper, address_cast(region.as_ptr()), reserved_size, size)
        {
            Ok(region) => Ok(region),
            Err(message) => crate::pal::error(message),
        }
    }

    /// Attempts to carve out `data_size` aligned bytes in
    /// `[base, base + size)`.
    fn new_from_range(
        mapper: &'a dyn Mapper,
        base: usize,
        size: usize,
        data_size: usize,
    ) -> Result<AlignedRegion<'a>, &'static str> {
        let page_size = mapper.page_size();

        if base % page_size != 0 {
            return Err("base is incorrectly aligned");
        }

        if size % page_size != 0 || data_size % page_size != 0 {
            return Err("size is incorrectly aligned");
        }

        if !data_size.is_power_of_two() {
            return Err("data size is not a power of 2");
        }

        let top = base.checked_add(size).ok_or("input region wraps around")?;
        let data = align_up(base, data_size).ok_or("overflow in alignment")?;
        let data_end = data
            .checked_add(data_size)
            .ok_or("overflow in data_end")?;

        if data_end > top {
            return Err("region too small");
        }

        Ok(AlignedRegion {
            mapper,
            base,
            top,
            data,
            data_end,
        })
    }

    /// Asserts against internal invariants.
    fn check_rep(&self) {
        let page_size = self.mapper.page_size();

        assert_eq!(self.base % page_size, 0, "self: {:?}", self);
        assert_eq!(self.top % page_size, 0, "self: {:?}", self);
        assert!(self.base <= self.data, "self: {:?}", self);
        assert!(self.data < self.data_end, "self: {:?}", self);
        assert!(self.data_end <= self.top, "self: {:?}", self);

        let data_size = self.data_end - self.data;
        assert_eq!(self.data % data_size, 0, "self: {:?}", self);
    }

    /// Backs the data region with memory and trims the slop.  On
    /// success, the data region is all that remains of the reservation.
    fn commit(self) -> Result<NonNull<c_void>, i32> {
        let data = NonNull::new(pointer_cast::<c_void>(self.data)).ok_or_else(crate::pal::einval)?;

        if let Err(errno) = self.mapper.allocate(data, self.data_end - self.data) {
            if let Some(base) = NonNull::new(pointer_cast::<c_void>(self.base)) {
                let _ = self.mapper.release(base, self.top - self.base);
            }

            return Err(errno);
        }

        // Releasing slop can only fail on a broken mapper; the range
        // stays reserved and unused in that case.
        if self.data > self.base {
            if let Some(base) = NonNull::new(pointer_cast::<c_void>(self.base)) {
                let _ = self.mapper.release(base, self.data - self.base);
            }
        }

        if self.top > self.data_end {
            if let Some(suffix) = NonNull::new(pointer_cast::<c_void>(self.data_end)) {
                let _ = self.mapper.release(suffix, self.top - self.data_end);
            }
        }

        Ok(data)
    }
}

impl<C: ChunkMap<Pointer = *mut c_void>> LargeHeap<C> {
    pub fn new(map: C, mapper: &'static dyn Mapper) -> Self {
        Self { map, mapper }
    }

    pub fn chunk_map(&self) -> &C {
        &self.map
    }

    /// Returns the rounded size of the allocation at `address`, if
    /// `address` is the start of one.
    fn owned_size(&self, address: usize) -> Option<usize> {
        if self.map.large_head(address) != Some(address) {
            return None;
        }

        self.map.large_size(address)
    }
}

impl<C: ChunkMap<Pointer = *mut c_void> + Sync> Heap for LargeHeap<C> {
    /// Fresh mappings are always zero-filled, so `zero` is free.
    fn alloc(&self, size: usize, _zero: bool) -> Result<NonNull<c_void>, AllocError> {
        let rounded = large_rounded_size(size).ok_or(AllocError::OutOfMemory)?;
        let region =
            AlignedRegion::new(self.mapper, rounded).map_err(|_| AllocError::OutOfMemory)?;

        if cfg!(test) {
            region.check_rep();
        }

        let data = region.commit().map_err(|_| AllocError::OutOfMemory)?;
        self.map.set_large_size(data.as_ptr(), rounded);
        Ok(data)
    }

    unsafe fn dealloc(&self, ptr: NonNull<c_void>) {
        let size = match self.owned_size(C::address_of(ptr.as_ptr())) {
            Some(size) => size,
            None => crate::pal::error("Released a pointer that was not allocated"),
        };

        self.map.clear_large_size(ptr.as_ptr(), size);
        if self.mapper.release(ptr, size).is_err() {
            crate::pal::error("Unable to release a large allocation");
        }
    }

    fn alloc_size(&self, ptr: NonNull<c_void>) -> usize {
        self.owned_size(C::address_of(ptr.as_ptr())).unwrap_or(0)
    }
}
