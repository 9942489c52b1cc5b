//! Address arithmetic shared by every layer of the chunk map: pointer
//! to integer conversions, pointer offsets, and power-of-two
//! alignment.
//!
//! Pointer-returning helpers derive their result from the input
//! pointer (never from a bare integer), so they keep provenance.
//! Granularity arguments that are const generics are checked to be
//! powers of two when the function is instantiated.

/// The integer representation of an address.
pub type Address = usize;

/// Compile-time witness that `N` is a power of two.
struct Granule<const N: usize>;

impl<const N: usize> Granule<N> {
    const CHECK: () = assert!(N > 0 && N & (N - 1) == 0, "granule must be a power of 2");
}

/// Converts a pointer to its address.
#[inline(always)]
pub fn address_cast<T>(ptr: *const T) -> Address {
    ptr as Address
}

/// Converts an address back to a pointer.  This is the only helper
/// that fabricates a pointer from an integer.
#[inline(always)]
pub fn pointer_cast<T>(address: Address) -> *mut T {
    address as *mut T
}

/// Returns `base` advanced by `diff` bytes.
#[inline(always)]
pub fn pointer_offset<T>(base: *mut T, diff: usize) -> *mut T {
    (base as *mut u8).wrapping_add(diff) as *mut T
}

/// Returns the number of bytes from `base` to `cursor`; `cursor`
/// must not be below `base`.
#[inline(always)]
pub fn pointer_diff<T, U>(base: *const T, cursor: *const U) -> usize {
    debug_assert!(address_cast(cursor) >= address_cast(base));
    address_cast(cursor) - address_cast(base)
}

/// Returns whether both `p` and `size` are multiples of `ALIGNMENT`.
#[inline(always)]
pub fn is_aligned_block<const ALIGNMENT: usize, T>(p: *const T, size: usize) -> bool {
    #[allow(clippy::let_unit_value)]
    let () = Granule::<ALIGNMENT>::CHECK;

    ((address_cast(p) | size) & (ALIGNMENT - 1)) == 0
}

/// Rounds `p` down to a multiple of `GRANULE`.
#[inline(always)]
pub fn pointer_align_down<const GRANULE: usize, T>(p: *mut T) -> *mut T {
    #[allow(clippy::let_unit_value)]
    let () = Granule::<GRANULE>::CHECK;

    let slop = address_cast(p) & (GRANULE - 1);
    (p as *mut u8).wrapping_sub(slop) as *mut T
}

/// Rounds `p` up to a multiple of `GRANULE`.
#[inline(always)]
pub fn pointer_align_up<const GRANULE: usize, T>(p: *mut T) -> *mut T {
    #[allow(clippy::let_unit_value)]
    let () = Granule::<GRANULE>::CHECK;

    let bump = GRANULE.wrapping_sub(address_cast(p)) & (GRANULE - 1);
    pointer_offset(p, bump)
}

/// Rounds `value` down to a multiple of `align`, a power of two.
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align`, a power of two.
///
/// Returns `None` on overflow.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

/// Returns `ceil(log2(value))`, i.e., the number of bits in the
/// smallest power of two at least `value`.  Zero and one both map to 0.
#[inline(always)]
pub const fn next_pow2_bits(value: usize) -> u32 {
    if value <= 1 {
        return 0;
    }

    usize::BITS - (value - 1).leading_zeros()
}

/// Returns the smallest power of two at least `value`, or `None` if
/// that does not fit in a `usize`.
#[inline(always)]
pub const fn next_pow2(value: usize) -> Option<usize> {
    let bits = next_pow2_bits(value);
    if bits >= usize::BITS {
        None
    } else {
        Some(1usize << bits)
    }
}

/// Returns the largest power of two dividing `value` (its lowest set
/// bit), i.e., the natural alignment of a block of `value` bytes.
#[inline(always)]
pub const fn natural_alignment(value: usize) -> usize {
    value & value.wrapping_neg()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::ffi::c_void;

    #[test]
    fn pointer_round_trip() {
        let address: Address = 0x1234_5678;
        let ptr: *mut c_void = pointer_cast(address);

        assert_eq!(address_cast(ptr), address);
        assert_eq!(address_cast(pointer_offset(ptr, 8)), address + 8);
        assert_eq!(pointer_diff(ptr, pointer_offset(ptr, 40)), 40);
    }

    #[test]
    fn alignment() {
        let ptr: *mut u8 = pointer_cast(0x1_1001);

        assert_eq!(address_cast(pointer_align_down::<0x1000, _>(ptr)), 0x1_1000);
        assert_eq!(address_cast(pointer_align_up::<0x1000, _>(ptr)), 0x1_2000);

        let aligned: *mut u8 = pointer_cast(0x4000);
        assert_eq!(pointer_align_down::<0x1000, _>(aligned), aligned);
        assert_eq!(pointer_align_up::<0x1000, _>(aligned), aligned);

        assert!(is_aligned_block::<0x1000, _>(aligned, 0x2000));
        assert!(!is_aligned_block::<0x1000, _>(aligned, 0x2001));
        assert!(!is_aligned_block::<0x1000, _>(ptr, 0x1000));

        assert_eq!(align_down(4097, 4096), 4096);
        assert_eq!(align_up(4097, 4096), Some(8192));
        assert_eq!(align_up(usize::MAX, 4096), None);
    }

    #[test]
    fn powers_of_two() {
        assert_eq!(next_pow2_bits(0), 0);
        assert_eq!(next_pow2_bits(1), 0);
        assert_eq!(next_pow2_bits(2), 1);
        assert_eq!(next_pow2_bits(3), 2);
        assert_eq!(next_pow2_bits(20000), 15);
        assert_eq!(next_pow2_bits(32768), 15);
        assert_eq!(next_pow2_bits(32769), 16);

        assert_eq!(next_pow2(20000), Some(32768));
        assert_eq!(next_pow2(usize::MAX), None);

        assert_eq!(natural_alignment(96), 32);
        assert_eq!(natural_alignment(4096), 4096);
    }
}
