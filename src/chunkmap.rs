//! The chunk map classifies every chunk of the address space: not
//! ours, slab head, or part of a large allocation.  It is a thin
//! encoding layer over a `Pagemap`.
//!
//! Large allocations are tagged with a *redirect slide*: the head
//! chunk stores `log2(size)`, and the interior chunks are split in
//! runs of 1, 2, 4, ... chunks, where run `i` starts `2^i` chunks
//! after the head and is tagged with the distance class `i`.  From
//! any interior chunk, stepping back `2^i` chunks lands in an earlier
//! run (or on the head), so finding the head takes at most
//! `log2(size / CHUNK_SIZE)` steps.
//!
//! # Write ownership
//!
//! The map itself does not lock.  Callers must only `set_*` or
//! `clear_*` a chunk while they own it exclusively (after carving it,
//! and before publishing any pointer into it; or after the last
//! reference is gone), and must publish the chunk to other threads
//! with release/acquire ordering after classifying it.  Concurrent
//! `get`s of other chunks are always fine.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use std::ffi::c_void;

use crate::address::address_cast;
use crate::address::next_pow2_bits;
use crate::address::pointer_cast;
use crate::pagemap::DefaultPagemap;
use crate::pagemap::Pagemap;
use crate::provider::PagemapProvider;
use crate::tag::chunk_base;
use crate::tag::is_chunk_aligned;
use crate::tag::ChunkKind;
use crate::tag::Slab;
use crate::tag::Tag;
use crate::tag::CHUNK_BITS;
use crate::tag::CHUNK_SIZE;

/// The operations every chunk map implements, whether it stores
/// scalar tags or capabilities.
pub trait ChunkMap {
    /// What the map's callers hand in to classify, and what `getp`
    /// returns.
    type Pointer: Copy;

    fn address_of(p: Self::Pointer) -> usize;

    /// Returns the tag of the chunk containing `address`.  Never fails:
    /// unknown addresses are `Tag::NOT_OURS`.
    fn get(&self, address: usize) -> Tag;

    /// Rederives a pointer for internal use from `p`.  With `OFFSET`,
    /// the result points exactly at `p`'s address; without, it points
    /// at the start of the chunk or large allocation containing `p`.
    fn getp<const OFFSET: bool>(&self, p: Self::Pointer) -> Self::Pointer;

    /// Tags the chunk at `slab` as an `S` head.
    fn set_slab<S: Slab>(&self, slab: Self::Pointer);

    /// Resets the chunk at `slab`, which must be tagged as an `S` head.
    fn clear_slab<S: Slab>(&self, slab: Self::Pointer);

    /// Tags the chunks of a large allocation of `size` bytes (rounded
    /// up to a power of two) at `p`.
    fn set_large_size(&self, p: Self::Pointer, size: usize);

    /// Resets every chunk of the large allocation of `size` bytes at
    /// `p`.
    fn clear_large_size(&self, p: Self::Pointer, size: usize);

    /// Returns the head chunk of the large allocation containing
    /// `address`, or `None` if `address` is not in one.
    fn large_head(&self, address: usize) -> Option<usize> {
        let mut chunk = chunk_base(address);
        let mut first = true;

        loop {
            match self.get(chunk).kind() {
                ChunkKind::LargeHead { .. } => return Some(chunk),
                ChunkKind::LargeInterior { distance_bits } => {
                    chunk = step_back(chunk, distance_bits);
                }
                ChunkKind::Reserved(_) => crate::pal::error("Reserved chunk tag"),
                _ if first => return None,
                _ => crate::pal::error("Broken redirect slide"),
            }

            first = false;
        }
    }

    /// Returns the rounded size of the large allocation containing
    /// `address`.
    fn large_size(&self, address: usize) -> Option<usize> {
        let head = self.large_head(address)?;

        match self.get(head).kind() {
            ChunkKind::LargeHead { size_bits } => Some(1usize << size_bits),
            _ => None,
        }
    }
}

/// Returns the chunk `2^distance_bits` chunks before `chunk`.
#[inline]
fn step_back(chunk: usize, distance_bits: u32) -> usize {
    1usize
        .checked_shl(distance_bits + CHUNK_BITS)
        .and_then(|distance| chunk.checked_sub(distance))
        .unwrap_or_else(|| crate::pal::error("Redirect slide points below address 0"))
}

/// Returns the head tag for a large allocation of `size` bytes, or
/// dies if `size` is too small to be a large allocation.
pub(crate) fn large_head_tag(size: usize) -> Tag {
    match Tag::large_head(next_pow2_bits(size)) {
        Some(tag) => tag,
        None => crate::pal::error("Large allocation smaller than a chunk"),
    }
}

/// Calls `write(address, tag, count)` for each interior run of the
/// redirect slide for a large allocation at `head` tagged `head_tag`.
pub(crate) fn for_each_redirect_run(
    head: usize,
    head_tag: Tag,
    mut write: impl FnMut(usize, Tag, usize),
) {
    let runs = head_tag.raw() as u32 - CHUNK_BITS;

    for i in 0..runs {
        let count = 1usize << i;
        let tag = match Tag::large_interior(i) {
            Some(tag) => tag,
            None => crate::pal::error("Large allocation too large to tag"),
        };

        write(head + count * CHUNK_SIZE, tag, count);
    }
}

/// The chunk map that stores one byte per chunk.
pub struct ScalarChunkMap<M: Pagemap<Entry = u8>> {
    pagemap: &'static M,
}

impl<M: Pagemap<Entry = u8>> Clone for ScalarChunkMap<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Pagemap<Entry = u8>> Copy for ScalarChunkMap<M> {}

impl<M: Pagemap<Entry = u8> + std::fmt::Debug> std::fmt::Debug for ScalarChunkMap<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarChunkMap")
            .field("pagemap", self.pagemap)
            .finish()
    }
}

/// The scalar chunk map over this module's own global pagemap.
pub type DefaultChunkMap = ScalarChunkMap<DefaultPagemap<u8>>;

impl<M: Pagemap<Entry = u8>> ScalarChunkMap<M> {
    pub fn new(pagemap: &'static M) -> Self {
        Self { pagemap }
    }

    pub fn from_provider<P: PagemapProvider<Pagemap = M>>(provider: &P) -> Self {
        Self::new(provider.pagemap())
    }

    pub fn pagemap(&self) -> &'static M {
        self.pagemap
    }

    /// Checks that the chunk at `address` is tagged `expected`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the chunk has any other tag.
    pub fn expect_tag(&self, address: usize, expected: Tag) -> Result<(), &'static str> {
        if self.get(address) == expected {
            Ok(())
        } else {
            Err("Chunk tag does not match the kind being cleared")
        }
    }

    fn check_tag_or_die(&self, address: usize, expected: Tag) {
        if let Err(message) = self.expect_tag(address, expected) {
            crate::pal::error(message);
        }
    }
}

impl<M: Pagemap<Entry = u8>> ChunkMap for ScalarChunkMap<M> {
    type Pointer = *mut c_void;

    #[inline(always)]
    fn address_of(p: *mut c_void) -> usize {
        address_cast(p)
    }

    #[inline(always)]
    fn get(&self, address: usize) -> Tag {
        Tag::from_raw(self.pagemap.get(address))
    }

    #[inline]
    fn getp<const OFFSET: bool>(&self, p: *mut c_void) -> *mut c_void {
        if OFFSET {
            return p;
        }

        let address = address_cast(p);
        match self.get(address).kind() {
            ChunkKind::LargeHead { .. } | ChunkKind::LargeInterior { .. } => {
                match self.large_head(address) {
                    Some(head) => pointer_cast(head),
                    None => p,
                }
            }
            ChunkKind::NotOurs => p,
            _ => pointer_cast(chunk_base(address)),
        }
    }

    #[requires(is_chunk_aligned(address_cast(slab)), "slabs are chunk-aligned")]
    #[requires(self.get(address_cast(slab)) == Tag::NOT_OURS, "only unclassified chunks become slabs")]
    #[ensures(self.get(address_cast(slab)) == S::TAG)]
    fn set_slab<S: Slab>(&self, slab: *mut c_void) {
        self.pagemap.set(address_cast(slab), S::TAG.raw());
    }

    #[requires(is_chunk_aligned(address_cast(slab)), "slabs are chunk-aligned")]
    #[ensures(self.get(address_cast(slab)) == Tag::NOT_OURS)]
    fn clear_slab<S: Slab>(&self, slab: *mut c_void) {
        self.check_tag_or_die(address_cast(slab), S::TAG);
        self.pagemap.set(address_cast(slab), Tag::NOT_OURS.raw());
    }

    #[requires(is_chunk_aligned(address_cast(p)), "large allocations are chunk-aligned")]
    #[ensures(self.get(address_cast(p)) == large_head_tag(size))]
    #[ensures(self.large_head(address_cast(p) + size - 1) == Some(address_cast(p)),
              "the last byte leads back to the head")]
    fn set_large_size(&self, p: *mut c_void, size: usize) {
        let head = address_cast(p);
        let head_tag = large_head_tag(size);

        self.pagemap.set(head, head_tag.raw());
        for_each_redirect_run(head, head_tag, |address, tag, count| {
            self.pagemap.set_range(address, tag.raw(), count)
        });
    }

    #[requires(is_chunk_aligned(address_cast(p)), "large allocations are chunk-aligned")]
    #[ensures(self.get(address_cast(p)) == Tag::NOT_OURS)]
    fn clear_large_size(&self, p: *mut c_void, size: usize) {
        let head = address_cast(p);
        let head_tag = large_head_tag(size);

        self.check_tag_or_die(head, head_tag);
        self.pagemap.set_range(
            head,
            Tag::NOT_OURS.raw(),
            1usize << (head_tag.raw() as u32 - CHUNK_BITS),
        );
    }
}
