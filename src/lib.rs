mod address;
mod capability;
mod capability_chunkmap;
mod chunkmap;
mod config;
mod flat_pagemap;
mod heap;
mod hierarchical_pagemap;
mod large_heap;
mod malloc;
mod map;
mod mapper;
mod pagemap;
mod pal;
mod provider;
mod resize;
mod size_class;
mod tag;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
mod debug_arange_map;

pub use address::*;

pub use tag::chunk_base;
pub use tag::is_chunk_aligned;
pub use tag::ChunkKind;
pub use tag::Mediumslab;
pub use tag::Slab;
pub use tag::Superslab;
pub use tag::Tag;
pub use tag::CHUNK_BITS;
pub use tag::CHUNK_SIZE;

pub use pal::ADDRESS_BITS;
pub use pal::SUPPORTS_LAZY_COMMIT;

pub use mapper::get_default_mapper;
pub use mapper::reserve_zeroed;
pub use mapper::Mapper;

pub use pagemap::DefaultPagemap;
pub use pagemap::Entry;
pub use pagemap::FlatPagemap;
pub use pagemap::HierarchicalPagemap;
pub use pagemap::Pagemap;
pub use pagemap::PagemapConfig;
pub use pagemap::MAX_FLAT_PAGEMAP_SIZE;
pub use pagemap::PAGEMAP_NODE_BITS;
pub use pagemap::PAGEMAP_VERSION;

pub use provider::pagemap_global_get;
pub use provider::ExternalPagemap;
pub use provider::GlobalInstance;
pub use provider::GlobalPagemap;
pub use provider::LocalScalarPagemap;
pub use provider::PagemapAccessor;
pub use provider::PagemapProvider;

pub use chunkmap::ChunkMap;
pub use chunkmap::DefaultChunkMap;
pub use chunkmap::ScalarChunkMap;

pub use capability::Capability;
pub use capability::CapabilitySlot;
pub use capability::Permissions;
pub use capability_chunkmap::CapabilityChunkMap;
pub use capability_chunkmap::DefaultCapabilityChunkMap;
pub use capability_chunkmap::PAGEMAP_PTR_ALIGN;

pub use heap::AllocError;
pub use heap::Heap;
pub use large_heap::LargeHeap;
pub use size_class::large_rounded_size;
pub use size_class::DefaultSizeClasses;
pub use size_class::SizeClass;
pub use size_class::SizeClassTable;

pub use resize::rebound_in_place;
pub use resize::resize_decision;
pub use resize::resize_in_place;
pub use resize::Resize;
pub use resize::ResizePolicy;

pub use config::announce;
pub use config::describe;

pub use malloc::global_frontend;
pub use malloc::Frontend;
pub use malloc::GlobalChunkMap;
pub use malloc::GlobalFrontend;
