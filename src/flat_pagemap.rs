//! The flat pagemap is a single array with one slot for every chunk
//! in the address space.  On platforms that commit memory lazily, only
//! the pages of the array that hold non-default entries ever consume
//! physical memory.
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::mapper::Mapper;
use crate::pagemap::chunk_index_or_die;
use crate::pagemap::last_index_or_die;
use crate::pagemap::Entry;
use crate::pagemap::Pagemap;
use crate::pagemap::PagemapConfig;
use crate::pagemap::PAGEMAP_ENTRIES;
use crate::tag::CHUNK_BITS;

pub struct FlatPagemap<E: Entry> {
    entries: NonNull<E::Slot>,
    // Actual size of the mapping, rounded up to whole pages.
    mapped_size: usize,
    mapper: &'static dyn Mapper,
    _entry: PhantomData<E>,
}

// Slots are `Sync`, and the array itself is never reallocated.
unsafe impl<E: Entry> Send for FlatPagemap<E> {}
unsafe impl<E: Entry> Sync for FlatPagemap<E> {}

impl<E: Entry> std::fmt::Debug for FlatPagemap<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatPagemap")
            .field("entries", &self.entries)
            .field("mapped_size", &self.mapped_size)
            .finish()
    }
}

impl<E: Entry> FlatPagemap<E> {
    /// Number of bytes in the array.
    pub const BYTES: usize = PAGEMAP_ENTRIES * std::mem::size_of::<E::Slot>();

    #[inline(always)]
    fn slot(&self, index: usize) -> &E::Slot {
        debug_assert!(index < PAGEMAP_ENTRIES);
        unsafe { &*self.entries.as_ptr().add(index) }
    }
}

impl<E: Entry> Pagemap for FlatPagemap<E> {
    type Entry = E;

    const CONFIG: PagemapConfig = PagemapConfig::new::<E>(true);

    fn new_in(mapper: &'static dyn Mapper) -> Result<Self, i32> {
        let (base, mapped_size) = crate::mapper::reserve_zeroed(mapper, Self::BYTES)?;

        Ok(Self {
            entries: base.cast(),
            mapped_size,
            mapper,
            _entry: PhantomData,
        })
    }

    #[inline(always)]
    fn get(&self, address: usize) -> E {
        let index = address >> CHUNK_BITS;

        if index < PAGEMAP_ENTRIES {
            E::load(self.slot(index))
        } else {
            E::DEFAULT
        }
    }

    #[inline(always)]
    fn set(&self, address: usize, value: E) {
        E::store(self.slot(chunk_index_or_die(address)), value);
    }

    fn set_range(&self, address: usize, value: E, count: usize) {
        if count == 0 {
            return;
        }

        let first = chunk_index_or_die(address);
        let last = last_index_or_die(address, count);

        for index in first..=last {
            E::store(self.slot(index), value);
        }
    }
}

impl<E: Entry> Drop for FlatPagemap<E> {
    fn drop(&mut self) {
        let _ = self.mapper.release(self.entries.cast(), self.mapped_size);
    }
}
