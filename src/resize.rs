//! Decides whether a resized allocation can stay where it is.
//!
//! An allocation holds still iff the size it already occupies is
//! exactly what a fresh allocation of the new size would occupy.
//! Under quarantine, it never holds still: only the most recently
//! issued capability for a region may be live, so every resize hands
//! out fresh memory.
use crate::capability::Capability;
use crate::capability::Permissions;
use crate::chunkmap::ChunkMap;
use crate::heap::AllocError;
use crate::size_class::SizeClassTable;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ResizePolicy {
    /// Freed memory is quarantined until outstanding capabilities to
    /// it are revoked.
    pub quarantine: bool,
}

impl ResizePolicy {
    /// Returns the policy selected by this build's features.
    pub const fn from_features() -> ResizePolicy {
        ResizePolicy {
            quarantine: cfg!(feature = "quarantine"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Resize {
    /// Keep the allocation; nothing moves.
    HoldStill,
    /// Allocate anew, copy `copy` bytes, and release the old block.
    Move { copy: usize },
}

/// Returns what to do with an allocation that occupies `current_size`
/// bytes when it is resized to `new_size` bytes.
///
/// # Errors
///
/// Returns `Err(AllocError::OutOfMemory)` if no allocation could ever
/// hold `new_size` bytes.
pub fn resize_decision<T: SizeClassTable + ?Sized>(
    policy: &ResizePolicy,
    table: &T,
    current_size: usize,
    new_size: usize,
) -> Result<Resize, AllocError> {
    let target = table
        .allocation_size(new_size)
        .ok_or(AllocError::OutOfMemory)?;

    if !policy.quarantine && current_size == target {
        Ok(Resize::HoldStill)
    } else {
        Ok(Resize::Move {
            copy: current_size.min(new_size),
        })
    }
}

/// The hold-still path on capability hardware: `user` keeps pointing at
/// the same memory, but its bounds must match the new size exactly.
/// Rederives a wide capability through `map`, narrows it to
/// `[user, user + size)`, and drops everything but data permissions.
///
/// Returns `None` if `map` has no capability covering that range.
pub fn rebound_in_place<C: ChunkMap<Pointer = Capability>>(
    map: &C,
    user: Capability,
    size: usize,
) -> Option<Capability> {
    map.getp::<true>(user)
        .set_bounds_exact(size)
        .map(|cap| cap.and_permissions(Permissions::USER_DATA))
}

/// The capability-hardware `realloc` check: if `user`, which occupies
/// `current_size` bytes, may hold still at `new_size` bytes, returns it
/// rederived through `map` and bounded to exactly `new_size` bytes.
/// Returns `Ok(None)` when the allocation must move instead.
///
/// # Errors
///
/// Returns `Err(AllocError::OutOfMemory)` if no allocation could ever
/// hold `new_size` bytes.
pub fn resize_in_place<C, T>(
    map: &C,
    policy: &ResizePolicy,
    table: &T,
    user: Capability,
    current_size: usize,
    new_size: usize,
) -> Result<Option<Capability>, AllocError>
where
    C: ChunkMap<Pointer = Capability>,
    T: SizeClassTable + ?Sized,
{
    match resize_decision(policy, table, current_size, new_size)? {
        Resize::HoldStill => Ok(rebound_in_place(map, user, new_size)),
        Resize::Move { .. } => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use crate::capability_chunkmap::CapabilityChunkMap;
    use crate::chunkmap::test::fresh_pagemap;
    use crate::pagemap::test::test_base;
    use crate::size_class::DefaultSizeClasses;
    use crate::size_class::SizeClass;
    use crate::tag::CHUNK_SIZE;

    const FREE: ResizePolicy = ResizePolicy { quarantine: false };
    const QUARANTINE: ResizePolicy = ResizePolicy { quarantine: true };

    #[test]
    fn decisions() {
        let table = DefaultSizeClasses {};

        assert_eq!(resize_decision(&FREE, &table, 128, 100), Ok(Resize::HoldStill));
        assert_eq!(
            resize_decision(&FREE, &table, 128, 200),
            Ok(Resize::Move { copy: 128 })
        );
        assert_eq!(
            resize_decision(&FREE, &table, 128, 10),
            Ok(Resize::Move { copy: 10 })
        );
        assert_eq!(
            resize_decision(&FREE, &table, 4 * CHUNK_SIZE, 3 * CHUNK_SIZE),
            Ok(Resize::HoldStill)
        );
        assert_eq!(
            resize_decision(&QUARANTINE, &table, 128, 100),
            Ok(Resize::Move { copy: 100 })
        );
        assert_eq!(
            resize_decision(&FREE, &table, 128, usize::MAX),
            Err(AllocError::OutOfMemory)
        );
    }

    #[test]
    fn rebound() {
        let map = CapabilityChunkMap::new(fresh_pagemap::<crate::pagemap::DefaultPagemap<Capability>>());
        let head = test_base();
        let allocation = Capability::root()
            .with_address(head)
            .set_bounds_exact(2 * CHUNK_SIZE)
            .unwrap();
        map.set_large_size(allocation, 2 * CHUNK_SIZE);

        let user = allocation
            .set_bounds_exact(CHUNK_SIZE + 10)
            .unwrap()
            .and_permissions(Permissions::USER_DATA);

        // Growing the user capability in place needs the wide one.
        assert_eq!(user.set_bounds_exact(CHUNK_SIZE + 100), None);
        let grown = rebound_in_place(&map, user, CHUNK_SIZE + 100).expect("covered by the map");
        assert_eq!(grown.address(), head);
        assert_eq!(grown.base(), head);
        assert_eq!(grown.length(), CHUNK_SIZE + 100);
        assert_eq!(grown.permissions(), Permissions::USER_DATA);

        // Not past the end of the allocation.
        assert_eq!(rebound_in_place(&map, user, 2 * CHUNK_SIZE + 1), None);

        // Nor for memory the map does not know.
        let stranger = user.with_address(head + 8 * CHUNK_SIZE);
        assert_eq!(rebound_in_place(&map, stranger, 16), None);
    }

    // A large capability allocation resized within its rounded size
    // keeps its address and gets exact bounds; anything else moves.
    #[test]
    fn capability_realloc() {
        let table = DefaultSizeClasses {};
        let map = CapabilityChunkMap::new(fresh_pagemap::<crate::pagemap::DefaultPagemap<Capability>>());
        let head = test_base() + 16 * CHUNK_SIZE;
        let allocation = Capability::root()
            .with_address(head)
            .set_bounds_exact(4 * CHUNK_SIZE)
            .unwrap();
        map.set_large_size(allocation, 3 * CHUNK_SIZE + 10);

        let user = allocation
            .set_bounds_exact(3 * CHUNK_SIZE + 10)
            .unwrap()
            .and_permissions(Permissions::USER_DATA);
        let current = table.allocation_size(3 * CHUNK_SIZE + 10).unwrap();
        assert_eq!(current, 4 * CHUNK_SIZE);

        let grown = resize_in_place(&map, &FREE, &table, user, current, 3 * CHUNK_SIZE + 100)
            .expect("fits the address space")
            .expect("same rounded size holds still");
        assert_eq!(grown.address(), head);
        assert_eq!(grown.base(), head);
        assert_eq!(grown.length(), 3 * CHUNK_SIZE + 100);
        assert_eq!(grown.permissions(), Permissions::USER_DATA);

        assert_eq!(
            resize_in_place(&map, &QUARANTINE, &table, user, current, 3 * CHUNK_SIZE + 100),
            Ok(None)
        );
        assert_eq!(
            resize_in_place(&map, &FREE, &table, user, current, 5 * CHUNK_SIZE),
            Ok(None)
        );
        assert_eq!(
            resize_in_place(&map, &FREE, &table, user, current, usize::MAX),
            Err(AllocError::OutOfMemory)
        );

        map.clear_large_size(allocation, 3 * CHUNK_SIZE + 10);
    }

    proptest! {
        // Any resize within the class of the current size holds still...
        #[test]
        fn same_class_holds_still(class in 0..19usize, fraction in 0.0..1.0f64) {
            let table = DefaultSizeClasses {};
            let class = SizeClass::new(class % table.num_classes());
            let size = table.size_of(class);
            let lower = if class.index() == 0 { 0 } else { size / 2 + 1 };
            let new_size = lower + ((size - lower) as f64 * fraction) as usize;

            prop_assert_eq!(table.class_of(new_size), Some(class));
            prop_assert_eq!(resize_decision(&FREE, &table, size, new_size), Ok(Resize::HoldStill));
            // ... unless quarantine is on.
            prop_assert_eq!(
                resize_decision(&QUARANTINE, &table, size, new_size),
                Ok(Resize::Move { copy: new_size })
            );
        }

        // ... and any other size moves, copying the smaller size.
        #[test]
        fn other_class_moves(current in 1..(4 * CHUNK_SIZE), new_size in 0..(4 * CHUNK_SIZE)) {
            let table = DefaultSizeClasses {};
            let current = table.allocation_size(current).unwrap();
            prop_assume!(table.allocation_size(new_size) != Some(current));

            prop_assert_eq!(
                resize_decision(&FREE, &table, current, new_size),
                Ok(Resize::Move { copy: current.min(new_size) })
            );
        }
    }
}
