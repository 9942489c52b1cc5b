//! A software model of a hardware capability: a pointer that carries
//! its own bounds and permissions.  Narrowing is always allowed, while
//! widening is impossible; the only way back to a wider capability is
//! to rederive it from one stored in trusted metadata, which is what
//! the capability chunk map is for.
//!
//! The all-zero representation is the NULL capability, so a
//! zero-filled pagemap of capabilities reads as "not ours" everywhere.
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::address::align_down;
use crate::pagemap::Entry;

/// A set of capability permission bits.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Permissions(usize);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const LOAD: Permissions = Permissions(1 << 0);
    pub const STORE: Permissions = Permissions(1 << 1);
    pub const EXECUTE: Permissions = Permissions(1 << 2);
    pub const LOAD_CAPABILITY: Permissions = Permissions(1 << 3);
    pub const STORE_CAPABILITY: Permissions = Permissions(1 << 4);
    /// Authority to manage the memory itself (e.g., rebounding).
    pub const SYSTEM: Permissions = Permissions(1 << 5);

    pub const ALL: Permissions = Permissions((1 << 6) - 1);

    /// What a user of `malloc` may do with its allocation.
    pub const USER_DATA: Permissions = Permissions(
        Self::LOAD.0 | Self::STORE.0 | Self::LOAD_CAPABILITY.0 | Self::STORE_CAPABILITY.0,
    );

    #[inline]
    pub const fn bits(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersection(self, other: Permissions) -> Permissions {
        Permissions(self.0 & other.0)
    }
}

/// A bounded, permissioned pointer.  A capability is valid
/// (dereferenceable) iff it has any permission; operations that would
/// widen one return `None` instead.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Capability {
    address: usize,
    base: usize,
    length: usize,
    permissions: Permissions,
}

impl Capability {
    pub const NULL: Capability = Capability {
        address: 0,
        base: 0,
        length: 0,
        permissions: Permissions::NONE,
    };

    /// Returns the capability the platform hands out at startup, which
    /// covers the whole address space with every permission.
    pub const fn root() -> Capability {
        Capability {
            address: 0,
            base: 0,
            length: usize::MAX,
            permissions: Permissions::ALL,
        }
    }

    #[inline(always)]
    pub const fn address(&self) -> usize {
        self.address
    }

    #[inline(always)]
    pub const fn base(&self) -> usize {
        self.base
    }

    #[inline(always)]
    pub const fn length(&self) -> usize {
        self.length
    }

    #[inline(always)]
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Capability::NULL
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.permissions != Permissions::NONE
    }

    /// Returns a copy of `self` that points at `address`.  The bounds
    /// do not change, so the result may point out of bounds.
    #[inline]
    pub const fn with_address(self, address: usize) -> Capability {
        Capability { address, ..self }
    }

    #[inline]
    pub const fn offset(self, diff: usize) -> Capability {
        self.with_address(self.address.wrapping_add(diff))
    }

    /// Rounds the address down to a multiple of `align`, a power of 2.
    #[inline]
    pub const fn align_down(self, align: usize) -> Capability {
        self.with_address(align_down(self.address, align))
    }

    /// Returns whether `[address, address + size)` is within bounds.
    pub fn is_in_bounds(&self, address: usize, size: usize) -> bool {
        let offset = address.wrapping_sub(self.base);

        address >= self.base && offset <= self.length && size <= self.length - offset
    }

    /// Narrows the bounds to exactly `[address, address + length)`.
    ///
    /// Returns `None` if `self` is invalid, or if the new bounds are
    /// not a subset of the current ones.
    pub fn set_bounds_exact(self, length: usize) -> Option<Capability> {
        if !self.is_valid() || !self.is_in_bounds(self.address, length) {
            return None;
        }

        Some(Capability {
            base: self.address,
            length,
            ..self
        })
    }

    /// Drops every permission not in `mask`.
    #[inline]
    pub const fn and_permissions(self, mask: Permissions) -> Capability {
        Capability {
            permissions: self.permissions.intersection(mask),
            ..self
        }
    }
}

/// Pagemap storage for one capability.
///
/// Fields are loaded and stored one at a time: a reader may only race
/// with writers of *other* chunks, so it never sees a torn capability.
#[derive(Debug, Default)]
#[repr(C)]
pub struct CapabilitySlot {
    address: AtomicUsize,
    base: AtomicUsize,
    length: AtomicUsize,
    permissions: AtomicUsize,
}

unsafe impl Entry for Capability {
    type Slot = CapabilitySlot;

    const DEFAULT: Capability = Capability::NULL;

    #[inline]
    fn load(slot: &CapabilitySlot) -> Capability {
        Capability {
            address: slot.address.load(Ordering::Acquire),
            base: slot.base.load(Ordering::Relaxed),
            length: slot.length.load(Ordering::Relaxed),
            permissions: Permissions(slot.permissions.load(Ordering::Relaxed)),
        }
    }

    #[inline]
    fn store(slot: &CapabilitySlot, value: Capability) {
        slot.base.store(value.base, Ordering::Relaxed);
        slot.length.store(value.length, Ordering::Relaxed);
        slot.permissions
            .store(value.permissions.bits(), Ordering::Relaxed);
        slot.address.store(value.address, Ordering::Release);
    }
}
