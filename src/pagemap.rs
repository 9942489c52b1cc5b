//! A `Pagemap` is the raw key-value store underneath the chunk map:
//! it maps every chunk-aligned address to one `Entry`.  Addresses
//! that were never `set` read as `Entry::DEFAULT`.
//!
//! There are two interchangeable backends, picked at compile time:
//! the `FlatPagemap` is one array covering the whole address space,
//! and the `HierarchicalPagemap` is a radix tree whose nodes are
//! allocated on first write.  The flat array wins whenever the
//! platform commits memory lazily (its virtual size is then cheap),
//! or when it fits in `MAX_FLAT_PAGEMAP_SIZE` bytes anyway.
//!
//! Pagemaps are immortal: they are created once per process and
//! shared by reference.
use std::ffi::c_void;
use std::fmt::Debug;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use crate::mapper::Mapper;
use crate::pal::ADDRESS_BITS;
use crate::tag::CHUNK_BITS;

pub use crate::flat_pagemap::FlatPagemap;
pub use crate::hierarchical_pagemap::HierarchicalPagemap;

/// Radix tree nodes are this many bytes.
pub const PAGEMAP_NODE_BITS: u32 = 16;
pub const PAGEMAP_NODE_SIZE: usize = 1 << PAGEMAP_NODE_BITS;

/// Without lazy commit, only use a flat pagemap if it fits in one node.
pub const MAX_FLAT_PAGEMAP_SIZE: usize = PAGEMAP_NODE_SIZE;

/// Bump this whenever the layout of a pagemap or its entries changes.
pub const PAGEMAP_VERSION: u32 = 1;

/// Number of chunks (and thus pagemap entries) in the address space.
pub const PAGEMAP_ENTRIES: usize = 1 << (ADDRESS_BITS - CHUNK_BITS);

/// A value that can be stored in a pagemap.
///
/// Pagemaps are built from zero-filled memory, and readers may run
/// concurrently with writers (of other entries), so each entry lives
/// in a `Slot` with interior mutability.
///
/// # Safety
///
/// The all-zero bit pattern must be a valid `Slot`, and must `load`
/// as `Self::DEFAULT`.
pub unsafe trait Entry: Copy + PartialEq + Debug + Send + Sync + 'static {
    type Slot: Sync;

    /// The value of every entry that was never written.
    const DEFAULT: Self;

    fn load(slot: &Self::Slot) -> Self;

    fn store(slot: &Self::Slot, value: Self);
}

/// One byte per chunk: the plain chunk map's tags.
unsafe impl Entry for u8 {
    type Slot = AtomicU8;

    const DEFAULT: u8 = 0;

    #[inline(always)]
    fn load(slot: &AtomicU8) -> u8 {
        slot.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn store(slot: &AtomicU8, value: u8) {
        slot.store(value, Ordering::Release)
    }
}

/// Describes the layout of a pagemap, so that independently built
/// modules can check they agree on it before sharing one.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PagemapConfig {
    pub version: u32,
    pub is_flat_pagemap: bool,
    pub sizeof_pointer: u8,
    pub chunk_bits: u8,
    pub address_bits: u8,
    pub size_of_entry: usize,
}

impl PagemapConfig {
    /// Returns the descriptor for a pagemap of `E` entries.
    pub const fn new<E: Entry>(is_flat_pagemap: bool) -> Self {
        Self {
            version: PAGEMAP_VERSION,
            is_flat_pagemap,
            sizeof_pointer: std::mem::size_of::<usize>() as u8,
            chunk_bits: CHUNK_BITS as u8,
            address_bits: ADDRESS_BITS as u8,
            size_of_entry: std::mem::size_of::<E::Slot>(),
        }
    }

    /// Checks that `self` describes the same layout as `expected`.
    ///
    /// # Errors
    ///
    /// Returns `Err` naming the first field that differs.
    pub fn check(&self, expected: &PagemapConfig) -> Result<(), &'static str> {
        if self.version != expected.version {
            return Err("pagemap version mismatch");
        }

        if self.is_flat_pagemap != expected.is_flat_pagemap {
            return Err("pagemap implementation mismatch");
        }

        if self.sizeof_pointer != expected.sizeof_pointer {
            return Err("pagemap pointer size mismatch");
        }

        if self.chunk_bits != expected.chunk_bits || self.address_bits != expected.address_bits {
            return Err("pagemap granularity mismatch");
        }

        if self.size_of_entry != expected.size_of_entry {
            return Err("pagemap entry size mismatch");
        }

        Ok(())
    }
}

/// The storage interface shared by all pagemap backends.  Every
/// method takes arbitrary addresses, and works on the chunk that
/// contains them.
pub trait Pagemap: Sync + Sized + 'static {
    type Entry: Entry;

    /// The layout descriptor for this backend.
    const CONFIG: PagemapConfig;

    /// Builds an empty pagemap whose storage comes from `mapper`.
    ///
    /// # Errors
    ///
    /// Returns `Err` with an errno value if the mapper fails.
    fn new_in(mapper: &'static dyn Mapper) -> Result<Self, i32>;

    /// Returns the entry for the chunk containing `address`, or the
    /// default for addresses outside the mapped address space.
    fn get(&self, address: usize) -> Self::Entry;

    /// Overwrites the entry for the chunk containing `address`.
    fn set(&self, address: usize, value: Self::Entry);

    /// Overwrites the entries for the `count` consecutive chunks
    /// starting with the one containing `address`.
    fn set_range(&self, address: usize, value: Self::Entry, count: usize);

    /// Attempts to convert an opaque pagemap pointer, received along
    /// with its `config`, to a reference to this backend.
    ///
    /// Returns `None` if either pointer is NULL, or if the layouts
    /// disagree.
    ///
    /// # Safety
    ///
    /// `config` must be NULL or valid, and if `config` matches
    /// `Self::CONFIG`, `pagemap` must be NULL or point to an immortal
    /// instance of `Self`.
    unsafe fn cast_to_pagemap(
        pagemap: *mut c_void,
        config: *const PagemapConfig,
    ) -> Option<&'static Self> {
        if pagemap.is_null() || config.is_null() {
            return None;
        }

        if (*config).check(&Self::CONFIG).is_err() {
            return None;
        }

        Some(&*(pagemap as *const Self))
    }
}

/// Dies if `address` is outside the range a pagemap can represent.
#[inline]
pub(crate) fn chunk_index_or_die(address: usize) -> usize {
    let index = address >> CHUNK_BITS;

    if index >= PAGEMAP_ENTRIES {
        crate::pal::error("address outside the pagemap's range");
    }

    index
}

/// Returns the index of the last chunk in a run of `count` chunks
/// starting at `address`, or dies if the run leaves the pagemap.
#[inline]
pub(crate) fn last_index_or_die(address: usize, count: usize) -> usize {
    let first = chunk_index_or_die(address);

    match first.checked_add(count.saturating_sub(1)) {
        Some(last) if last < PAGEMAP_ENTRIES => last,
        _ => crate::pal::error("chunk range outside the pagemap's range"),
    }
}

/// The default pagemap backend for this platform and configuration.
#[cfg(all(
    not(feature = "hierarchical_pagemap"),
    any(unix, not(target_pointer_width = "64"))
))]
pub type DefaultPagemap<E> = FlatPagemap<E>;

/// The default pagemap backend for this platform and configuration.
#[cfg(not(all(
    not(feature = "hierarchical_pagemap"),
    any(unix, not(target_pointer_width = "64"))
)))]
pub type DefaultPagemap<E> = HierarchicalPagemap<E>;

// Without lazy commit, a flat pagemap must stay under budget.
#[cfg(all(not(unix), not(feature = "hierarchical_pagemap")))]
static_assertions::const_assert!(
    crate::pal::SUPPORTS_LAZY_COMMIT || PAGEMAP_ENTRIES <= MAX_FLAT_PAGEMAP_SIZE
);
