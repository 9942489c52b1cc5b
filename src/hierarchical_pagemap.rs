//! The hierarchical pagemap is a radix tree over chunk indices.  Only
//! the root exists up front; interior nodes and leaves are allocated
//! the first time an entry under them is written.  Reading an entry
//! under a missing node returns the default without allocating.
//!
//! Missing nodes are published with a compare-and-swap, so concurrent
//! writers under the same missing node agree on a single winner, and
//! the losers return their fresh node to the mapper.
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::address::next_pow2_bits;
use crate::mapper::Mapper;
use crate::pagemap::chunk_index_or_die;
use crate::pagemap::last_index_or_die;
use crate::pagemap::Entry;
use crate::pagemap::Pagemap;
use crate::pagemap::PagemapConfig;
use crate::pagemap::PAGEMAP_NODE_BITS;
use crate::pal::ADDRESS_BITS;
use crate::tag::CHUNK_BITS;

type Child = AtomicPtr<u8>;

pub struct HierarchicalPagemap<E: Entry> {
    root: NonNull<u8>,
    mapper: &'static dyn Mapper,
    // Number of nodes allocated after the root.
    nodes: AtomicUsize,
    _entry: PhantomData<E>,
}

// All shared state is atomic, and nodes are never freed before drop.
unsafe impl<E: Entry> Send for HierarchicalPagemap<E> {}
unsafe impl<E: Entry> Sync for HierarchicalPagemap<E> {}

impl<E: Entry> std::fmt::Debug for HierarchicalPagemap<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalPagemap")
            .field("root", &self.root)
            .field("levels", &Self::LEVELS)
            .field("nodes", &self.nodes.load(Ordering::Relaxed))
            .finish()
    }
}

impl<E: Entry> HierarchicalPagemap<E> {
    const INDEX_BITS: u32 = ADDRESS_BITS - CHUNK_BITS;
    const INTERIOR_BITS: u32 =
        PAGEMAP_NODE_BITS - next_pow2_bits(std::mem::size_of::<Child>());

    const LEAF_BITS: u32 = {
        let max = PAGEMAP_NODE_BITS - next_pow2_bits(std::mem::size_of::<E::Slot>());
        if max < Self::INDEX_BITS {
            max
        } else {
            Self::INDEX_BITS
        }
    };

    /// Number of interior levels, including the root.  When zero, the
    /// root is the only leaf.
    const LEVELS: u32 = {
        let upper = Self::INDEX_BITS - Self::LEAF_BITS;
        (upper + Self::INTERIOR_BITS - 1) / Self::INTERIOR_BITS
    };

    /// The root takes whatever index bits the other levels leave.
    const ROOT_BITS: u32 = if Self::LEVELS == 0 {
        Self::LEAF_BITS
    } else {
        Self::INDEX_BITS - Self::LEAF_BITS - (Self::LEVELS - 1) * Self::INTERIOR_BITS
    };

    const LEAF_MASK: usize = (1 << Self::LEAF_BITS) - 1;
    const LEAF_SIZE: usize = (1 << Self::LEAF_BITS) * std::mem::size_of::<E::Slot>();
    const INTERIOR_SIZE: usize = (1 << Self::INTERIOR_BITS) * std::mem::size_of::<Child>();
    const ROOT_SIZE: usize = if Self::LEVELS == 0 {
        Self::LEAF_SIZE
    } else {
        (1 << Self::ROOT_BITS) * std::mem::size_of::<Child>()
    };

    /// Returns the number of nodes allocated since construction,
    /// not counting the root.
    pub fn materialized_nodes(&self) -> usize {
        self.nodes.load(Ordering::Relaxed)
    }

    fn node_size(level: u32) -> usize {
        if level == 0 {
            Self::ROOT_SIZE
        } else if level < Self::LEVELS {
            Self::INTERIOR_SIZE
        } else {
            Self::LEAF_SIZE
        }
    }

    fn fanout(level: u32) -> usize {
        if level == 0 {
            1 << Self::ROOT_BITS
        } else {
            1 << Self::INTERIOR_BITS
        }
    }

    /// Returns the child pointer for `index` in `node`, an interior
    /// node at depth `level`.
    #[inline(always)]
    fn child(&self, node: NonNull<u8>, level: u32, index: usize) -> &Child {
        let shift = Self::LEAF_BITS + (Self::LEVELS - 1 - level) * Self::INTERIOR_BITS;
        let slot = (index >> shift) & (Self::fanout(level) - 1);

        unsafe { &*(node.as_ptr() as *const Child).add(slot) }
    }

    #[inline(always)]
    fn leaf_slot(&self, leaf: NonNull<E::Slot>, index: usize) -> &E::Slot {
        unsafe { &*leaf.as_ptr().add(index & Self::LEAF_MASK) }
    }

    /// Returns the leaf for `index`, if it exists.
    #[inline(always)]
    fn find_leaf(&self, index: usize) -> Option<NonNull<E::Slot>> {
        let mut node = self.root;

        for level in 0..Self::LEVELS {
            node = NonNull::new(self.child(node, level, index).load(Ordering::Acquire))?;
        }

        Some(node.cast())
    }

    /// Returns the leaf for `index`, allocating any missing node on
    /// the way.
    fn find_or_create_leaf(&self, index: usize) -> NonNull<E::Slot> {
        let mut node = self.root;

        for level in 0..Self::LEVELS {
            let slot = self.child(node, level, index);

            node = match NonNull::new(slot.load(Ordering::Acquire)) {
                Some(child) => child,
                None => self.materialize(slot, level + 1),
            };
        }

        node.cast()
    }

    /// Allocates a zero-filled node for depth `level` and attempts to
    /// publish it in `slot`.  Returns whichever node won.
    #[cold]
    fn materialize(&self, slot: &Child, level: u32) -> NonNull<u8> {
        let (fresh, mapped_size) =
            match crate::mapper::reserve_zeroed(self.mapper, Self::node_size(level)) {
                Ok(node) => node,
                Err(_) => crate::pal::error("Unable to allocate a pagemap node"),
            };

        match slot.compare_exchange(
            std::ptr::null_mut(),
            fresh.as_ptr() as *mut u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.nodes.fetch_add(1, Ordering::Relaxed);
                fresh.cast()
            }
            Err(winner) => {
                let _ = self.mapper.release(fresh, mapped_size);
                // The exchange only fails on a non-null value.
                unsafe { NonNull::new_unchecked(winner) }
            }
        }
    }

    fn release_subtree(&self, node: NonNull<u8>, level: u32) {
        if level < Self::LEVELS {
            for i in 0..Self::fanout(level) {
                let child = unsafe { &*(node.as_ptr() as *const Child).add(i) };

                if let Some(child) = NonNull::new(child.load(Ordering::Acquire)) {
                    self.release_subtree(child, level + 1);
                }
            }
        }

        let page_size = self.mapper.page_size();
        if let Some(size) = crate::address::align_up(Self::node_size(level), page_size) {
            let _ = self.mapper.release(node.cast(), size);
        }
    }
}

impl<E: Entry> Pagemap for HierarchicalPagemap<E> {
    type Entry = E;

    const CONFIG: PagemapConfig = PagemapConfig::new::<E>(false);

    fn new_in(mapper: &'static dyn Mapper) -> Result<Self, i32> {
        let (root, _) = crate::mapper::reserve_zeroed(mapper, Self::ROOT_SIZE)?;

        Ok(Self {
            root: root.cast(),
            mapper,
            nodes: AtomicUsize::new(0),
            _entry: PhantomData,
        })
    }

    #[inline(always)]
    fn get(&self, address: usize) -> E {
        let index = address >> CHUNK_BITS;

        if index >> Self::INDEX_BITS != 0 {
            return E::DEFAULT;
        }

        match self.find_leaf(index) {
            Some(leaf) => E::load(self.leaf_slot(leaf, index)),
            None => E::DEFAULT,
        }
    }

    fn set(&self, address: usize, value: E) {
        let index = chunk_index_or_die(address);
        let leaf = self.find_or_create_leaf(index);

        E::store(self.leaf_slot(leaf, index), value);
    }

    fn set_range(&self, address: usize, value: E, count: usize) {
        if count == 0 {
            return;
        }

        let mut index = chunk_index_or_die(address);
        let last = last_index_or_die(address, count);

        // One walk per leaf, then a run of stores within it.
        loop {
            let leaf = self.find_or_create_leaf(index);
            let leaf_last = (index | Self::LEAF_MASK).min(last);

            for i in index..=leaf_last {
                E::store(self.leaf_slot(leaf, i), value);
            }

            if leaf_last == last {
                break;
            }

            index = leaf_last + 1;
        }
    }
}

impl<E: Entry> Drop for HierarchicalPagemap<E> {
    fn drop(&mut self) {
        self.release_subtree(self.root, 0);
    }
}
