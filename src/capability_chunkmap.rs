//! The chunk map for capability hardware stores a whole capability for
//! each chunk.  The tag lives in the low bits of the stored address
//! (so NULL still means "not ours"), while the capability itself covers
//! the whole slab or large allocation.  That lets `getp` rederive a
//! wide, privileged capability from the narrow one handed to users.
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

use crate::capability::Capability;
use crate::chunkmap::for_each_redirect_run;
use crate::chunkmap::large_head_tag;
use crate::chunkmap::ChunkMap;
use crate::pagemap::DefaultPagemap;
use crate::pagemap::Pagemap;
use crate::provider::PagemapProvider;
use crate::tag::is_chunk_aligned;
use crate::tag::Slab;
use crate::tag::Tag;
use crate::tag::CHUNK_BITS;
use crate::tag::CHUNK_SIZE;

/// Stored capabilities point this far apart at least; the tag goes in
/// the bits below.
pub const PAGEMAP_PTR_ALIGN: usize = 0x100;

static_assertions::const_assert!(PAGEMAP_PTR_ALIGN > u8::MAX as usize);
static_assertions::const_assert!(PAGEMAP_PTR_ALIGN <= CHUNK_SIZE);

pub struct CapabilityChunkMap<M: Pagemap<Entry = Capability>> {
    pagemap: &'static M,
}

impl<M: Pagemap<Entry = Capability>> Clone for CapabilityChunkMap<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Pagemap<Entry = Capability>> Copy for CapabilityChunkMap<M> {}

pub type DefaultCapabilityChunkMap = CapabilityChunkMap<DefaultPagemap<Capability>>;

impl<M: Pagemap<Entry = Capability>> CapabilityChunkMap<M> {
    pub fn new(pagemap: &'static M) -> Self {
        Self { pagemap }
    }

    pub fn from_provider<P: PagemapProvider<Pagemap = M>>(provider: &P) -> Self {
        Self::new(provider.pagemap())
    }

    fn check_tag_or_die(&self, address: usize, expected: Tag) {
        if self.get(address) != expected {
            crate::pal::error("Chunk tag does not match the kind being cleared");
        }
    }
}

impl<M: Pagemap<Entry = Capability>> ChunkMap for CapabilityChunkMap<M> {
    type Pointer = Capability;

    #[inline(always)]
    fn address_of(p: Capability) -> usize {
        p.address()
    }

    #[inline(always)]
    fn get(&self, address: usize) -> Tag {
        let stored = self.pagemap.get(address);

        Tag::from_raw((stored.address() & (PAGEMAP_PTR_ALIGN - 1)) as u8)
    }

    /// Returns the stored capability for `p`'s chunk without its tag,
    /// re-pointed at `p`'s address when `OFFSET`.  Chunks that are not
    /// ours yield NULL.
    #[inline]
    fn getp<const OFFSET: bool>(&self, p: Capability) -> Capability {
        let stored = self.pagemap.get(p.address()).align_down(PAGEMAP_PTR_ALIGN);

        if OFFSET && !stored.is_null() {
            stored.with_address(p.address())
        } else {
            stored
        }
    }

    #[requires(is_chunk_aligned(slab.address()), "slabs are chunk-aligned")]
    #[requires(slab.is_in_bounds(slab.address(), CHUNK_SIZE), "slab capabilities cover the chunk")]
    #[requires(self.get(slab.address()) == Tag::NOT_OURS, "only unclassified chunks become slabs")]
    #[ensures(self.get(slab.address()) == S::TAG)]
    fn set_slab<S: Slab>(&self, slab: Capability) {
        self.pagemap
            .set(slab.address(), slab.offset(S::TAG.raw() as usize));
    }

    #[requires(is_chunk_aligned(slab.address()), "slabs are chunk-aligned")]
    #[ensures(self.get(slab.address()) == Tag::NOT_OURS)]
    fn clear_slab<S: Slab>(&self, slab: Capability) {
        self.check_tag_or_die(slab.address(), S::TAG);
        self.pagemap.set(slab.address(), Capability::NULL);
    }

    #[requires(is_chunk_aligned(p.address()), "large allocations are chunk-aligned")]
    #[requires(p.is_valid())]
    #[ensures(self.get(p.address()) == large_head_tag(size))]
    fn set_large_size(&self, p: Capability, size: usize) {
        let head_tag = large_head_tag(size);

        self.pagemap
            .set(p.address(), p.offset(head_tag.raw() as usize));
        for_each_redirect_run(p.address(), head_tag, |address, tag, count| {
            self.pagemap
                .set_range(address, p.offset(tag.raw() as usize), count)
        });
    }

    #[requires(is_chunk_aligned(p.address()), "large allocations are chunk-aligned")]
    #[ensures(self.get(p.address()) == Tag::NOT_OURS)]
    fn clear_large_size(&self, p: Capability, size: usize) {
        let head_tag = large_head_tag(size);

        self.check_tag_or_die(p.address(), head_tag);
        self.pagemap.set_range(
            p.address(),
            Capability::NULL,
            1usize << (head_tag.raw() as u32 - CHUNK_BITS),
        );
    }
}
