//! The C allocation entry points.  `Frontend` validates arguments,
//! applies the resize policy, and forwards to a `Heap`; the `extern
//! "C"` wrappers below run a global `Frontend` and translate failures
//! to `errno` and NULL.
//!
//! Without the `override` feature, the wrappers are exported as
//! `chunkmap_malloc`, `chunkmap_free`, etc.; with it, they replace
//! `malloc`, `free`, etc.
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::address::align_up;
use crate::address::natural_alignment;
use crate::chunkmap::ScalarChunkMap;
use crate::heap::AllocError;
use crate::heap::Heap;
use crate::large_heap::LargeHeap;
use crate::mapper::get_default_mapper;
use crate::provider::LocalScalarPagemap;
use crate::resize::resize_decision;
use crate::resize::Resize;
use crate::resize::ResizePolicy;
use crate::size_class::DefaultSizeClasses;
use crate::size_class::SizeClass;
use crate::size_class::SizeClassTable;
use crate::tag::CHUNK_SIZE;

#[derive(Debug)]
pub struct Frontend<H, T> {
    heap: H,
    table: T,
    policy: ResizePolicy,
}

impl<H: Heap, T: SizeClassTable> Frontend<H, T> {
    pub fn new(heap: H, table: T, policy: ResizePolicy) -> Self {
        Self {
            heap,
            table,
            policy,
        }
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn policy(&self) -> ResizePolicy {
        self.policy
    }

    pub fn malloc(&self, size: usize) -> Result<NonNull<c_void>, AllocError> {
        self.heap.alloc(size, false)
    }

    /// # Safety
    ///
    /// `ptr` must be NULL or a live allocation from this front end.
    pub unsafe fn free(&self, ptr: *mut c_void) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.heap.dealloc(ptr);
        }
    }

    pub fn calloc(&self, nmemb: usize, size: usize) -> Result<NonNull<c_void>, AllocError> {
        let total = nmemb.checked_mul(size).ok_or(AllocError::OutOfMemory)?;

        self.heap.alloc(total, true)
    }

    /// Resizes `ptr` to `size` bytes.  Returns `Ok(None)` when `size`
    /// is 0: the allocation is freed.  On failure, `ptr` is untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be NULL or a live allocation from this front end.
    pub unsafe fn realloc(
        &self,
        ptr: *mut c_void,
        size: usize,
    ) -> Result<Option<NonNull<c_void>>, AllocError> {
        if size == usize::MAX {
            return Err(AllocError::OutOfMemory);
        }

        let old = match NonNull::new(ptr) {
            Some(old) => old,
            None => return self.malloc(size).map(Some),
        };

        if size == 0 {
            self.heap.dealloc(old);
            return Ok(None);
        }

        let current = self.heap.alloc_size(old);
        match resize_decision(&self.policy, &self.table, current, size)? {
            Resize::HoldStill => Ok(Some(old)),
            Resize::Move { copy } => {
                let new = self.heap.alloc(size, false)?;

                std::ptr::copy_nonoverlapping(
                    old.as_ptr() as *const u8,
                    new.as_ptr() as *mut u8,
                    copy,
                );
                self.heap.dealloc(old);
                Ok(Some(new))
            }
        }
    }

    /// # Safety
    ///
    /// Same as `realloc`.
    pub unsafe fn reallocarray(
        &self,
        ptr: *mut c_void,
        nmemb: usize,
        size: usize,
    ) -> Result<Option<NonNull<c_void>>, AllocError> {
        let total = nmemb.checked_mul(size).ok_or(AllocError::OutOfMemory)?;

        self.realloc(ptr, total)
    }

    /// Allocates `size` bytes aligned to `alignment`, a power of two
    /// no larger than a chunk.
    pub fn memalign(&self, alignment: usize, size: usize) -> Result<NonNull<c_void>, AllocError> {
        if alignment == 0
            || alignment == usize::MAX
            || alignment > CHUNK_SIZE
            || !alignment.is_power_of_two()
        {
            return Err(AllocError::InvalidArgument);
        }

        if size.checked_add(alignment).is_none() {
            return Err(AllocError::OutOfMemory);
        }

        let size = size.max(alignment);
        let first = match self.table.class_of(size) {
            Some(class) => class,
            // Large allocations are aligned to at least a chunk.
            None => return self.malloc(size),
        };

        // Every allocation is aligned to its size's lowest set bit.
        for index in first.index()..self.table.num_classes() {
            let class_size = self.table.size_of(SizeClass::new(index));

            if natural_alignment(class_size) >= alignment {
                return self.malloc(class_size);
            }
        }

        self.malloc(CHUNK_SIZE)
    }

    pub fn aligned_alloc(
        &self,
        alignment: usize,
        size: usize,
    ) -> Result<NonNull<c_void>, AllocError> {
        self.memalign(alignment, size)
    }

    /// Like `memalign`, but `alignment` must also be a multiple of the
    /// size of a pointer.  Once `alignment` passes that check, every
    /// failure is out of memory, including alignments `memalign`
    /// itself refuses.
    pub fn posix_memalign(
        &self,
        alignment: usize,
        size: usize,
    ) -> Result<NonNull<c_void>, AllocError> {
        if alignment % std::mem::size_of::<usize>() != 0 || !alignment.is_power_of_two() {
            return Err(AllocError::InvalidArgument);
        }

        self.memalign(alignment, size)
            .map_err(|_| AllocError::OutOfMemory)
    }

    pub fn valloc(&self, size: usize) -> Result<NonNull<c_void>, AllocError> {
        self.memalign(crate::map::page_size(), size)
    }

    pub fn pvalloc(&self, size: usize) -> Result<NonNull<c_void>, AllocError> {
        let page_size = crate::map::page_size();

        if size == usize::MAX {
            return Err(AllocError::OutOfMemory);
        }

        let size = align_up(size, page_size).ok_or(AllocError::OutOfMemory)?;
        self.memalign(page_size, size)
    }

    pub fn malloc_usable_size(&self, ptr: *const c_void) -> usize {
        match NonNull::new(ptr as *mut c_void) {
            Some(ptr) => self.heap.alloc_size(ptr),
            None => 0,
        }
    }
}

pub type GlobalChunkMap = ScalarChunkMap<LocalScalarPagemap>;
pub type GlobalFrontend = Frontend<LargeHeap<GlobalChunkMap>, DefaultSizeClasses>;

#[cfg(not(feature = "external_pagemap"))]
fn global_chunk_map() -> GlobalChunkMap {
    ScalarChunkMap::from_provider(&crate::provider::GlobalPagemap::<LocalScalarPagemap>::new())
}

#[cfg(feature = "external_pagemap")]
fn global_chunk_map() -> GlobalChunkMap {
    use crate::pagemap::PagemapConfig;

    extern "C" {
        // Exported by the module that owns the pagemap.
        fn chunkmap_pagemap_global_get(config_out: *mut *const PagemapConfig) -> *mut c_void;
    }

    let provider = unsafe {
        crate::provider::ExternalPagemap::<LocalScalarPagemap>::new(chunkmap_pagemap_global_get)
    };
    ScalarChunkMap::from_provider(&provider)
}

lazy_static::lazy_static! {
    static ref GLOBAL: GlobalFrontend = {
        crate::config::announce();
        Frontend::new(
            LargeHeap::new(global_chunk_map(), get_default_mapper()),
            DefaultSizeClasses {},
            ResizePolicy::from_features(),
        )
    };
}

/// Returns the front end behind the C entry points.
pub fn global_frontend() -> &'static GlobalFrontend {
    &GLOBAL
}

fn into_raw(result: Result<NonNull<c_void>, AllocError>) -> *mut c_void {
    match result {
        Ok(ptr) => ptr.as_ptr(),
        Err(error) => {
            crate::pal::set_errno(error.errno());
            std::ptr::null_mut()
        }
    }
}

fn option_into_raw(result: Result<Option<NonNull<c_void>>, AllocError>) -> *mut c_void {
    match result {
        Ok(Some(ptr)) => ptr.as_ptr(),
        Ok(None) => std::ptr::null_mut(),
        Err(error) => {
            crate::pal::set_errno(error.errno());
            std::ptr::null_mut()
        }
    }
}

#[cfg_attr(feature = "override", export_name = "malloc")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_malloc")]
pub extern "C" fn chunkmap_malloc(size: usize) -> *mut c_void {
    into_raw(GLOBAL.malloc(size))
}

/// # Safety
///
/// `ptr` must be NULL or a live allocation from `chunkmap_malloc` & co.
#[cfg_attr(feature = "override", export_name = "free")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_free")]
pub unsafe extern "C" fn chunkmap_free(ptr: *mut c_void) {
    GLOBAL.free(ptr)
}

#[cfg_attr(feature = "override", export_name = "calloc")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_calloc")]
pub extern "C" fn chunkmap_calloc(nmemb: usize, size: usize) -> *mut c_void {
    into_raw(GLOBAL.calloc(nmemb, size))
}

/// # Safety
///
/// `ptr` must be NULL or a live allocation from `chunkmap_malloc` & co.
#[cfg_attr(feature = "override", export_name = "realloc")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_realloc")]
pub unsafe extern "C" fn chunkmap_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    option_into_raw(GLOBAL.realloc(ptr, size))
}

/// # Safety
///
/// `ptr` must be NULL or a live allocation from `chunkmap_malloc` & co.
#[cfg_attr(feature = "override", export_name = "reallocarray")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_reallocarray")]
pub unsafe extern "C" fn chunkmap_reallocarray(
    ptr: *mut c_void,
    nmemb: usize,
    size: usize,
) -> *mut c_void {
    option_into_raw(GLOBAL.reallocarray(ptr, nmemb, size))
}

#[cfg_attr(feature = "override", export_name = "memalign")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_memalign")]
pub extern "C" fn chunkmap_memalign(alignment: usize, size: usize) -> *mut c_void {
    into_raw(GLOBAL.memalign(alignment, size))
}

#[cfg_attr(feature = "override", export_name = "aligned_alloc")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_aligned_alloc")]
pub extern "C" fn chunkmap_aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    into_raw(GLOBAL.aligned_alloc(alignment, size))
}

/// Stores a new allocation in `*memptr` and returns 0, or returns an
/// `errno` value without touching `errno` itself.
///
/// # Safety
///
/// `memptr` must be valid for writes.
#[cfg_attr(feature = "override", export_name = "posix_memalign")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_posix_memalign")]
pub unsafe extern "C" fn chunkmap_posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> i32 {
    match GLOBAL.posix_memalign(alignment, size) {
        Ok(ptr) => {
            *memptr = ptr.as_ptr();
            0
        }
        Err(error) => error.errno(),
    }
}

#[cfg_attr(feature = "override", export_name = "valloc")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_valloc")]
pub extern "C" fn chunkmap_valloc(size: usize) -> *mut c_void {
    into_raw(GLOBAL.valloc(size))
}

#[cfg_attr(feature = "override", export_name = "pvalloc")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_pvalloc")]
pub extern "C" fn chunkmap_pvalloc(size: usize) -> *mut c_void {
    into_raw(GLOBAL.pvalloc(size))
}

#[cfg_attr(feature = "override", export_name = "malloc_usable_size")]
#[cfg_attr(not(feature = "override"), export_name = "chunkmap_malloc_usable_size")]
pub extern "C" fn chunkmap_malloc_usable_size(ptr: *const c_void) -> usize {
    GLOBAL.malloc_usable_size(ptr)
}

#[cfg(test)]
mod test {
    use std::alloc::Layout;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use super::*;
    use crate::address::address_cast;
    use crate::pal::einval;
    use crate::pal::enomem;
    use crate::pal::errno;
    use crate::pal::set_errno;

    /// A heap over the system allocator that sizes allocations like
    /// the size class table, and counts calls.
    #[derive(Debug, Default)]
    struct MockHeap {
        table: DefaultSizeClasses,
        blocks: Mutex<BTreeMap<usize, Layout>>,
        allocs: AtomicUsize,
    }

    impl MockHeap {
        fn live(&self) -> usize {
            self.blocks.lock().unwrap().len()
        }

        fn allocs(&self) -> usize {
            self.allocs.load(Ordering::Relaxed)
        }
    }

    impl Heap for MockHeap {
        fn alloc(&self, size: usize, zero: bool) -> Result<NonNull<c_void>, AllocError> {
            let size = self
                .table
                .allocation_size(size)
                .ok_or(AllocError::OutOfMemory)?;
            let align = natural_alignment(size).min(crate::map::page_size());
            let layout =
                Layout::from_size_align(size, align).map_err(|_| AllocError::OutOfMemory)?;
            let ptr = unsafe {
                if zero {
                    std::alloc::alloc_zeroed(layout)
                } else {
                    std::alloc::alloc(layout)
                }
            };
            let ptr = NonNull::new(ptr as *mut c_void).ok_or(AllocError::OutOfMemory)?;

            self.allocs.fetch_add(1, Ordering::Relaxed);
            self.blocks
                .lock()
                .unwrap()
                .insert(address_cast(ptr.as_ptr()), layout);
            Ok(ptr)
        }

        unsafe fn dealloc(&self, ptr: NonNull<c_void>) {
            let layout = self
                .blocks
                .lock()
                .unwrap()
                .remove(&address_cast(ptr.as_ptr()))
                .expect("must be live");

            std::alloc::dealloc(ptr.as_ptr() as *mut u8, layout);
        }

        fn alloc_size(&self, ptr: NonNull<c_void>) -> usize {
            self.blocks
                .lock()
                .unwrap()
                .get(&address_cast(ptr.as_ptr()))
                .map_or(0, |layout| layout.size())
        }
    }

    fn frontend(quarantine: bool) -> Frontend<MockHeap, DefaultSizeClasses> {
        Frontend::new(
            MockHeap::default(),
            DefaultSizeClasses {},
            ResizePolicy { quarantine },
        )
    }

    fn fill(ptr: NonNull<c_void>, size: usize) {
        let bytes = ptr.as_ptr() as *mut u8;

        for i in 0..size {
            unsafe { std::ptr::write(bytes.add(i), i as u8) };
        }
    }

    fn check_fill(ptr: NonNull<c_void>, size: usize) {
        let bytes = ptr.as_ptr() as *const u8;

        for i in 0..size {
            assert_eq!(unsafe { std::ptr::read(bytes.add(i)) }, i as u8, "i={}", i);
        }
    }

    #[test]
    fn malloc_free() {
        let frontend = frontend(false);
        let ptr = frontend.malloc(100).expect("must allocate");

        assert_eq!(frontend.malloc_usable_size(ptr.as_ptr()), 128);
        assert_eq!(frontend.malloc_usable_size(std::ptr::null()), 0);

        unsafe { frontend.free(ptr.as_ptr()) };
        unsafe { frontend.free(std::ptr::null_mut()) };
        assert_eq!(frontend.heap().live(), 0);
    }

    #[test]
    fn realloc_holds_still_within_class() {
        let frontend = frontend(false);
        let ptr = frontend.malloc(100).expect("must allocate");
        fill(ptr, 100);

        let same = unsafe { frontend.realloc(ptr.as_ptr(), 120) }.expect("must resize");
        assert_eq!(same, Some(ptr));
        assert_eq!(frontend.heap().allocs(), 1);
        check_fill(ptr, 100);

        unsafe { frontend.free(ptr.as_ptr()) };
    }

    #[test]
    fn realloc_moves_across_classes() {
        let frontend = frontend(false);
        let ptr = frontend.malloc(100).expect("must allocate");
        fill(ptr, 128);

        let grown = unsafe { frontend.realloc(ptr.as_ptr(), 300) }
            .expect("must resize")
            .expect("non-zero size");
        assert_ne!(grown, ptr);
        assert_eq!(frontend.heap().allocs(), 2);
        assert_eq!(frontend.heap().live(), 1);
        assert_eq!(frontend.malloc_usable_size(ptr.as_ptr()), 0);
        check_fill(grown, 128);

        let shrunk = unsafe { frontend.realloc(grown.as_ptr(), 10) }
            .expect("must resize")
            .expect("non-zero size");
        assert_ne!(shrunk, grown);
        assert_eq!(frontend.malloc_usable_size(shrunk.as_ptr()), 16);
        check_fill(shrunk, 10);

        unsafe { frontend.free(shrunk.as_ptr()) };
        assert_eq!(frontend.heap().live(), 0);
    }

    #[test]
    fn quarantine_never_holds_still() {
        let frontend = frontend(true);
        let ptr = frontend.malloc(100).expect("must allocate");
        fill(ptr, 100);

        let moved = unsafe { frontend.realloc(ptr.as_ptr(), 100) }
            .expect("must resize")
            .expect("non-zero size");
        assert_ne!(moved, ptr);
        check_fill(moved, 100);

        unsafe { frontend.free(moved.as_ptr()) };
        assert_eq!(frontend.heap().live(), 0);
    }

    #[test]
    fn realloc_edge_cases() {
        let frontend = frontend(false);

        // NULL is malloc.
        let ptr = unsafe { frontend.realloc(std::ptr::null_mut(), 50) }
            .expect("must allocate")
            .expect("non-zero size");
        assert_eq!(frontend.malloc_usable_size(ptr.as_ptr()), 64);

        // Impossible sizes fail and leave the allocation alone.
        assert_eq!(
            unsafe { frontend.realloc(ptr.as_ptr(), usize::MAX) },
            Err(AllocError::OutOfMemory)
        );
        assert_eq!(
            unsafe { frontend.reallocarray(ptr.as_ptr(), usize::MAX / 2, 3) },
            Err(AllocError::OutOfMemory)
        );
        assert_eq!(frontend.heap().live(), 1);

        let same = unsafe { frontend.reallocarray(ptr.as_ptr(), 6, 10) }.expect("must resize");
        assert_eq!(same, Some(ptr));

        // Zero frees.
        assert_eq!(unsafe { frontend.realloc(ptr.as_ptr(), 0) }, Ok(None));
        assert_eq!(frontend.heap().live(), 0);
    }

    #[test]
    fn calloc_checks_overflow() {
        let frontend = frontend(false);

        assert_eq!(
            frontend.calloc(usize::MAX / 2, 3),
            Err(AllocError::OutOfMemory)
        );

        let ptr = frontend.calloc(10, 30).expect("must allocate");
        let bytes = ptr.as_ptr() as *const u8;
        for i in 0..300 {
            assert_eq!(unsafe { std::ptr::read(bytes.add(i)) }, 0);
        }

        unsafe { frontend.free(ptr.as_ptr()) };
    }

    #[test]
    fn memalign_validation() {
        let frontend = frontend(false);

        for &alignment in &[0, usize::MAX, 2 * CHUNK_SIZE, 48] {
            assert_eq!(
                frontend.memalign(alignment, 16),
                Err(AllocError::InvalidArgument),
                "alignment={}",
                alignment
            );
        }

        assert_eq!(
            frontend.memalign(64, usize::MAX - 10),
            Err(AllocError::OutOfMemory)
        );

        // `posix_memalign` also wants a multiple of the pointer size.
        assert_eq!(
            frontend.posix_memalign(std::mem::size_of::<usize>() / 2, 16),
            Err(AllocError::InvalidArgument)
        );
        assert_eq!(
            frontend.posix_memalign(3 * std::mem::size_of::<usize>(), 16),
            Err(AllocError::InvalidArgument)
        );
        assert_eq!(
            frontend.posix_memalign(2 * CHUNK_SIZE, 16),
            Err(AllocError::OutOfMemory)
        );
        assert_eq!(frontend.heap().live(), 0);
    }

    #[test]
    fn memalign_aligns() {
        let frontend = frontend(false);

        let page_size = crate::map::page_size();

        for &(alignment, size) in &[(16, 1), (64, 10), (256, 1000), (page_size, 100), (8, 24)] {
            let ptr = frontend.memalign(alignment, size).expect("must allocate");

            assert_eq!(address_cast(ptr.as_ptr()) % alignment, 0, "alignment={}", alignment);
            assert!(frontend.malloc_usable_size(ptr.as_ptr()) >= size);
            unsafe { frontend.free(ptr.as_ptr()) };
        }

        let ptr = frontend
            .posix_memalign(std::mem::size_of::<usize>(), 3)
            .expect("must allocate");
        unsafe { frontend.free(ptr.as_ptr()) };
    }

    #[test]
    fn page_allocations() {
        let frontend = frontend(false);
        let page_size = crate::map::page_size();

        assert_eq!(frontend.pvalloc(usize::MAX), Err(AllocError::OutOfMemory));

        let ptr = frontend.valloc(1).expect("must allocate");
        assert_eq!(address_cast(ptr.as_ptr()) % page_size, 0);
        unsafe { frontend.free(ptr.as_ptr()) };

        let ptr = frontend.pvalloc(page_size + 1).expect("must allocate");
        assert!(frontend.malloc_usable_size(ptr.as_ptr()) >= 2 * page_size);
        unsafe { frontend.free(ptr.as_ptr()) };
    }

    // End to end, through the global heap and chunk map.
    #[test]
    fn c_entry_points() {
        let ptr = chunkmap_malloc(3 * CHUNK_SIZE);
        assert!(!ptr.is_null());
        assert_eq!(address_cast(ptr) % (4 * CHUNK_SIZE), 0);
        assert_eq!(chunkmap_malloc_usable_size(ptr), 4 * CHUNK_SIZE);
        unsafe { std::ptr::write_bytes(ptr as *mut u8, 0xa5, 3 * CHUNK_SIZE) };

        // Same rounded size: nothing moves, unless quarantine forces
        // fresh memory.
        let same = unsafe { chunkmap_realloc(ptr, 4 * CHUNK_SIZE) };
        if ResizePolicy::from_features().quarantine {
            assert!(!same.is_null());
            assert_ne!(same, ptr);
            assert_eq!(unsafe { std::ptr::read((same as *const u8).add(3 * CHUNK_SIZE - 1)) }, 0xa5);
        } else {
            assert_eq!(same, ptr);
        }

        let moved = unsafe { chunkmap_realloc(same, 5 * CHUNK_SIZE) };
        assert!(!moved.is_null());
        assert_ne!(moved, same);
        assert_eq!(unsafe { std::ptr::read((moved as *const u8).add(3 * CHUNK_SIZE - 1)) }, 0xa5);
        assert_eq!(chunkmap_malloc_usable_size(moved), 8 * CHUNK_SIZE);

        assert!(unsafe { chunkmap_realloc(moved, 0) }.is_null());
        assert_eq!(chunkmap_malloc_usable_size(moved), 0);
    }

    #[test]
    fn c_entry_points_report_errors() {
        set_errno(0);
        assert!(chunkmap_calloc(usize::MAX / 2, 3).is_null());
        assert_eq!(errno(), enomem());

        set_errno(0);
        assert!(chunkmap_memalign(48, 16).is_null());
        assert_eq!(errno(), einval());

        set_errno(0);
        assert!(chunkmap_aligned_alloc(0, 16).is_null());
        assert_eq!(errno(), einval());

        set_errno(0);
        assert!(chunkmap_pvalloc(usize::MAX).is_null());
        assert_eq!(errno(), enomem());

        let mut out: *mut c_void = std::ptr::null_mut();
        set_errno(0);
        assert_eq!(unsafe { chunkmap_posix_memalign(&mut out, 12, 16) }, einval());
        assert!(out.is_null());
        // `posix_memalign` reports through its return value only.
        assert_eq!(errno(), 0);

        assert_eq!(unsafe { chunkmap_posix_memalign(&mut out, 2 * CHUNK_SIZE, 16) }, enomem());
        assert!(out.is_null());

        assert_eq!(unsafe { chunkmap_posix_memalign(&mut out, 64, 16) }, 0);
        assert!(!out.is_null());
        assert_eq!(address_cast(out) % 64, 0);
        unsafe { chunkmap_free(out) };

        set_errno(0);
        let ptr = chunkmap_valloc(10);
        assert!(!ptr.is_null());
        assert!(unsafe { chunkmap_reallocarray(ptr, usize::MAX, 2) }.is_null());
        assert_eq!(errno(), enomem());
        unsafe { std::ptr::write(ptr as *mut u8, 42u8) };
        // Still one chunk.
        let same = unsafe { chunkmap_reallocarray(ptr, 2, CHUNK_SIZE / 2) };
        assert!(!same.is_null());
        if ResizePolicy::from_features().quarantine {
            assert_ne!(same, ptr);
        } else {
            assert_eq!(same, ptr);
        }
        assert_eq!(unsafe { std::ptr::read(same as *const u8) }, 42);
        unsafe { chunkmap_free(same) };
    }
}
