//! Chunk geometry and the one-byte tag stored for every chunk.
//!
//! Tag values partition into mutually exclusive ranges:
//!
//! | value                  | meaning                                        |
//! |------------------------|------------------------------------------------|
//! | 0                      | not owned by this allocator                    |
//! | 1                      | superslab head                                 |
//! | 2                      | mediumslab head                                |
//! | 3 .. `CHUNK_BITS`      | reserved                                       |
//! | `CHUNK_BITS` .. 64     | large allocation head, `log2(rounded size)`    |
//! | 64 .. 128              | large allocation interior, `64 + d`: the head  |
//! |                        | is at least `2^d` and less than `2^(d + 1)`    |
//! |                        | chunks before this one                         |
//! | 128 ..= 255            | reserved                                       |
//!
//! The reserved ranges are not free for ad hoc use: decoding one
//! where the chunk map expects a valid tag is an invariant violation.
use crate::address::align_down;
use crate::address::Address;

#[cfg(not(feature = "test_only_small_constants"))]
pub const CHUNK_BITS: u32 = 24;

#[cfg(feature = "test_only_small_constants")]
pub const CHUNK_BITS: u32 = 20;

/// Chunks are the unit of classification: every address belongs to
/// exactly one `CHUNK_SIZE`-aligned chunk.
pub const CHUNK_SIZE: usize = 1 << CHUNK_BITS;

/// First interior tag value; `LARGE_INTERIOR_BASE + d` marks a chunk
/// `[2^d, 2^(d+1))` chunks after its head.
pub const LARGE_INTERIOR_BASE: u8 = 64;

/// First tag value of the upper reserved range.
pub const RESERVED_HIGH_BASE: u8 = 128;

// Large heads must not collide with the slab kinds...
static_assertions::const_assert!(CHUNK_BITS > 2);
// ... and must fit below the interior range.
static_assertions::const_assert!(CHUNK_BITS < LARGE_INTERIOR_BASE as u32);

/// The raw classification of one chunk.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
pub struct Tag(u8);

/// The decoded form of a `Tag`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChunkKind {
    NotOurs,
    Superslab,
    Mediumslab,
    /// Head of a large allocation of `2^size_bits` bytes.
    LargeHead { size_bits: u32 },
    /// Interior chunk of a large allocation, at least
    /// `2^distance_bits` and less than `2^(distance_bits + 1)` chunks
    /// after the head.
    LargeInterior { distance_bits: u32 },
    Reserved(u8),
}

impl Tag {
    pub const NOT_OURS: Tag = Tag(0);
    pub const SUPERSLAB: Tag = Tag(1);
    pub const MEDIUMSLAB: Tag = Tag(2);

    #[inline(always)]
    pub const fn from_raw(raw: u8) -> Tag {
        Tag(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Returns the head tag for a large allocation of `2^size_bits`
    /// bytes, if `size_bits` is in the large head range.
    pub const fn large_head(size_bits: u32) -> Option<Tag> {
        if size_bits >= CHUNK_BITS && size_bits < LARGE_INTERIOR_BASE as u32 {
            Some(Tag(size_bits as u8))
        } else {
            None
        }
    }

    /// Returns the tag for an interior chunk `[2^distance_bits,
    /// 2^(distance_bits + 1))` chunks after its head.
    pub const fn large_interior(distance_bits: u32) -> Option<Tag> {
        if distance_bits < (RESERVED_HIGH_BASE - LARGE_INTERIOR_BASE) as u32 {
            Some(Tag(LARGE_INTERIOR_BASE + distance_bits as u8))
        } else {
            None
        }
    }

    pub fn kind(self) -> ChunkKind {
        match self.0 {
            0 => ChunkKind::NotOurs,
            1 => ChunkKind::Superslab,
            2 => ChunkKind::Mediumslab,
            raw if raw >= RESERVED_HIGH_BASE => ChunkKind::Reserved(raw),
            raw if raw >= LARGE_INTERIOR_BASE => ChunkKind::LargeInterior {
                distance_bits: (raw - LARGE_INTERIOR_BASE) as u32,
            },
            raw if raw as u32 >= CHUNK_BITS => ChunkKind::LargeHead {
                size_bits: raw as u32,
            },
            raw => ChunkKind::Reserved(raw),
        }
    }

    #[inline]
    pub fn is_ours(self) -> bool {
        self != Tag::NOT_OURS
    }
}

/// Marker for the kinds of slab whose head chunk gets a tag of its
/// own.  The slab allocators themselves live outside this crate.
pub trait Slab {
    const TAG: Tag;
    const NAME: &'static str;
}

/// A superslab: a chunk carved into small size-class slabs.
#[derive(Debug)]
pub enum Superslab {}

/// A mediumslab: a chunk serving one medium size class.
#[derive(Debug)]
pub enum Mediumslab {}

impl Slab for Superslab {
    const TAG: Tag = Tag::SUPERSLAB;
    const NAME: &'static str = "superslab";
}

impl Slab for Mediumslab {
    const TAG: Tag = Tag::MEDIUMSLAB;
    const NAME: &'static str = "mediumslab";
}

/// Returns the base address of the chunk containing `address`.
#[inline(always)]
pub const fn chunk_base(address: Address) -> Address {
    align_down(address, CHUNK_SIZE)
}

/// Returns whether `address` is the first byte of a chunk.
#[inline(always)]
pub const fn is_chunk_aligned(address: Address) -> bool {
    address % CHUNK_SIZE == 0
}

#[test]
fn test_decode() {
    assert_eq!(Tag::NOT_OURS.kind(), ChunkKind::NotOurs);
    assert_eq!(Tag::SUPERSLAB.kind(), ChunkKind::Superslab);
    assert_eq!(Tag::MEDIUMSLAB.kind(), ChunkKind::Mediumslab);
    assert_eq!(Tag::from_raw(3).kind(), ChunkKind::Reserved(3));
    assert_eq!(
        Tag::from_raw(CHUNK_BITS as u8 - 1).kind(),
        ChunkKind::Reserved(CHUNK_BITS as u8 - 1)
    );
    assert_eq!(
        Tag::from_raw(CHUNK_BITS as u8).kind(),
        ChunkKind::LargeHead {
            size_bits: CHUNK_BITS
        }
    );
    assert_eq!(
        Tag::from_raw(63).kind(),
        ChunkKind::LargeHead { size_bits: 63 }
    );
    assert_eq!(
        Tag::from_raw(64).kind(),
        ChunkKind::LargeInterior { distance_bits: 0 }
    );
    assert_eq!(
        Tag::from_raw(127).kind(),
        ChunkKind::LargeInterior { distance_bits: 63 }
    );
    assert_eq!(Tag::from_raw(128).kind(), ChunkKind::Reserved(128));
    assert_eq!(Tag::from_raw(255).kind(), ChunkKind::Reserved(255));
}

#[test]
fn test_constructors() {
    assert_eq!(Tag::large_head(CHUNK_BITS - 1), None);
    assert_eq!(Tag::large_head(CHUNK_BITS), Some(Tag::from_raw(CHUNK_BITS as u8)));
    assert_eq!(Tag::large_head(64), None);

    assert_eq!(Tag::large_interior(0), Some(Tag::from_raw(64)));
    assert_eq!(Tag::large_interior(63), Some(Tag::from_raw(127)));
    assert_eq!(Tag::large_interior(64), None);

    assert!(!Tag::NOT_OURS.is_ours());
    assert!(Tag::SUPERSLAB.is_ours());
}

#[test]
fn test_chunk_base() {
    assert_eq!(chunk_base(0), 0);
    assert_eq!(chunk_base(CHUNK_SIZE - 1), 0);
    assert_eq!(chunk_base(CHUNK_SIZE), CHUNK_SIZE);
    assert_eq!(chunk_base(5 * CHUNK_SIZE + 17), 5 * CHUNK_SIZE);

    assert!(is_chunk_aligned(3 * CHUNK_SIZE));
    assert!(!is_chunk_aligned(3 * CHUNK_SIZE + 1));
}
