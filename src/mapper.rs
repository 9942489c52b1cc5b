//! A `Mapper` is responsible for acquiring address space and backing
//! memory from the operating system.  Pagemap backends get their
//! storage from a `Mapper`, and so does the `LargeHeap`.
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
use std::ptr::NonNull;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use crate::debug_arange_map;

#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait Mapper: std::fmt::Debug + Sync {
    /// Returns the mapping granularity for this mapper.  All calls
    /// into the mapper will align addresses and sizes to that page
    /// size.
    ///
    /// The page size must be constant for the lifetime of a process.
    #[ensures(ret > 0 && ret & (ret - 1) == 0, "page size must be a power of 2")]
    fn page_size(&self) -> usize;

    /// Attempts to reserve `size` bytes of address space.  On
    /// success, returns the address of the first byte in the
    /// reserved range; the range is inaccessible until `allocate`d.
    #[requires(size > 0)]
    #[requires(size % self.page_size() == 0)]
    #[ensures(ret.is_ok() -> debug_arange_map::reserve_range(ret.unwrap().as_ptr() as usize, size).is_ok())]
    #[ensures(ret.is_ok() -> size < usize::MAX - ret.unwrap().as_ptr() as usize,
              "The reserved range never overflows")]
    fn reserve(&self, size: usize) -> Result<NonNull<c_void>, i32>;

    /// Releases a page-aligned range that was previously obtained
    /// with a single call to `reserve`.  The `release`d range is
    /// always the whole reservation, or a prefix or suffix of what
    /// remains of it.
    ///
    /// The range is unregistered before the mapping goes away: once it
    /// is gone, another thread may reserve the same addresses.
    #[requires(base.as_ptr() as usize % self.page_size() == 0)]
    #[requires(size % self.page_size() == 0)]
    #[requires(debug_arange_map::release_range(base.as_ptr() as usize, size).is_ok())]
    fn release(&self, base: NonNull<c_void>, size: usize) -> Result<(), i32>;

    /// Backs a page-aligned subrange of a reservation with memory.
    ///
    /// On successful return, the range must be zero-filled.
    #[requires(base.as_ptr() as usize % self.page_size() == 0)]
    #[requires(size % self.page_size() == 0)]
    #[requires(debug_arange_map::is_reserved(base.as_ptr() as usize, size).is_ok())]
    fn allocate(&self, base: NonNull<c_void>, size: usize) -> Result<(), i32>;
}

#[derive(Debug)]
struct DefaultMapper {}

static DEFAULT_MAPPER: DefaultMapper = DefaultMapper {};

/// Returns the mapper that calls straight into `mmap`.
pub fn get_default_mapper() -> &'static dyn Mapper {
    &DEFAULT_MAPPER
}

/// Reserves and backs at least `size` bytes of zero-filled memory.
/// Returns the base address and the actual (page-rounded) size.
///
/// # Errors
///
/// Returns `Err` with an errno value when the mapper fails; nothing
/// stays reserved in that case.
pub fn reserve_zeroed(mapper: &dyn Mapper, size: usize) -> Result<(NonNull<c_void>, usize), i32> {
    let page_size = mapper.page_size();
    let size = crate::address::align_up(size.max(1), page_size).ok_or(crate::pal::enomem())?;

    let base = mapper.reserve(size)?;
    if let Err(errno) = mapper.allocate(base, size) {
        // The reservation is useless; report the allocation failure.
        let _ = mapper.release(base, size);
        return Err(errno);
    }

    Ok((base, size))
}

#[contract_trait]
impl Mapper for DefaultMapper {
    fn page_size(&self) -> usize {
        crate::map::page_size()
    }

    fn reserve(&self, size: usize) -> Result<NonNull<c_void>, i32> {
        crate::map::reserve_region(size)
    }

    fn release(&self, base: NonNull<c_void>, size: usize) -> Result<(), i32> {
        crate::map::release_region(base, size)
    }

    fn allocate(&self, base: NonNull<c_void>, size: usize) -> Result<(), i32> {
        crate::map::allocate_region(base, size)
    }
}

#[test]
fn test_reserve_zeroed() {
    let mapper = get_default_mapper();
    let (base, size) = reserve_zeroed(mapper, 3 * mapper.page_size() + 1).expect("must reserve");

    assert_eq!(size, 4 * mapper.page_size());
    assert_eq!(base.as_ptr() as usize % mapper.page_size(), 0);

    let bytes = base.as_ptr() as *mut u8;
    for offset in (0..size).step_by(mapper.page_size()) {
        assert_eq!(unsafe { std::ptr::read(bytes.add(offset)) }, 0);
    }

    mapper.release(base, size).expect("must release");
}

#[cfg(feature = "check_contracts_in_tests")]
#[test]
#[should_panic]
fn test_release_unknown_range() {
    let mapper = get_default_mapper();
    let (base, size) = reserve_zeroed(mapper, mapper.page_size()).expect("must reserve");

    mapper.release(base, size).expect("must release");
    // The range was already released: the contract must reject it.
    let _ = mapper.release(base, size);
}

// Threads that reserve and release at the same time keep getting
// each other's recycled addresses.
#[test]
fn test_concurrent_reserve_release() {
    let workers: Vec<_> = (0..8)
        .map(|_| {
            std::thread::spawn(|| {
                let mapper = get_default_mapper();

                for _ in 0..2000 {
                    let (base, size) =
                        reserve_zeroed(mapper, mapper.page_size()).expect("must reserve");
                    mapper.release(base, size).expect("must release");
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker must succeed");
    }
}
