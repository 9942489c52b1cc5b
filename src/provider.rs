//! A `PagemapProvider` hands out the process-wide pagemap a chunk map
//! classifies with.  There are two policies:
//!
//! - `GlobalPagemap` owns one private instance per backend type,
//!   created on first use and never destroyed;
//! - `ExternalPagemap` attaches to a pagemap exported by another,
//!   independently built, module through a `PagemapAccessor`, after
//!   checking that both modules agree on its layout.
//!
//! `pagemap_global_get` is the accessor for this module's own scalar
//! pagemap; the `expose_pagemap` feature exports it to C.
use std::ffi::c_void;
use std::marker::PhantomData;

use crate::capability::Capability;
use crate::mapper::get_default_mapper;
use crate::pagemap::DefaultPagemap;
use crate::pagemap::FlatPagemap;
use crate::pagemap::HierarchicalPagemap;
use crate::pagemap::Pagemap;
use crate::pagemap::PagemapConfig;

pub trait PagemapProvider {
    type Pagemap: Pagemap;

    /// Returns the provider's pagemap.  Every call returns the same
    /// instance.
    fn pagemap(&self) -> &'static Self::Pagemap;
}

/// The type of cross-module accessors: returns an opaque pointer to a
/// pagemap, and stores its descriptor in `*config_out`.
pub type PagemapAccessor =
    unsafe extern "C" fn(config_out: *mut *const PagemapConfig) -> *mut c_void;

/// Pagemap backends with a private process-wide instance.
pub trait GlobalInstance: Pagemap {
    fn global() -> &'static Self;
}

/// Builds a global pagemap, or dies trying: nothing works without one.
fn new_global<P: Pagemap>() -> P {
    match P::new_in(get_default_mapper()) {
        Ok(pagemap) => pagemap,
        Err(_) => crate::pal::error("Unable to allocate the global pagemap"),
    }
}

macro_rules! global_instance {
    ($name:ident, $type:ty) => {
        lazy_static::lazy_static! {
            static ref $name: $type = new_global::<$type>();
        }

        impl GlobalInstance for $type {
            #[inline]
            fn global() -> &'static Self {
                &$name
            }
        }
    };
}

global_instance!(FLAT_SCALAR, FlatPagemap<u8>);
global_instance!(HIERARCHICAL_SCALAR, HierarchicalPagemap<u8>);
global_instance!(FLAT_CAPABILITY, FlatPagemap<Capability>);
global_instance!(HIERARCHICAL_CAPABILITY, HierarchicalPagemap<Capability>);

/// Provides the private global instance of `P`.
pub struct GlobalPagemap<P>(PhantomData<fn() -> P>);

impl<P> GlobalPagemap<P> {
    pub const fn new() -> Self {
        GlobalPagemap(PhantomData)
    }
}

impl<P> Clone for GlobalPagemap<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for GlobalPagemap<P> {}

impl<P> std::fmt::Debug for GlobalPagemap<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GlobalPagemap")
    }
}

impl<P: GlobalInstance> PagemapProvider for GlobalPagemap<P> {
    type Pagemap = P;

    #[inline]
    fn pagemap(&self) -> &'static P {
        P::global()
    }
}

/// Provides a pagemap obtained, and validated, once from an accessor.
pub struct ExternalPagemap<P: 'static> {
    pagemap: &'static P,
}

impl<P: 'static> Clone for ExternalPagemap<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: 'static> Copy for ExternalPagemap<P> {}

impl<P: std::fmt::Debug + 'static> std::fmt::Debug for ExternalPagemap<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalPagemap")
            .field("pagemap", self.pagemap)
            .finish()
    }
}

impl<P: Pagemap> ExternalPagemap<P> {
    /// Calls `accessor` and checks its descriptor against `P::CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns `Err` describing the mismatch if the accessor's pagemap
    /// is missing or has another layout.
    ///
    /// # Safety
    ///
    /// `accessor` must return a descriptor that stays valid for the
    /// process lifetime, and, when that descriptor matches, a pointer
    /// to an immortal instance of the pagemap it describes.
    pub unsafe fn try_new(accessor: PagemapAccessor) -> Result<Self, &'static str> {
        let mut config: *const PagemapConfig = std::ptr::null();
        let raw = accessor(&mut config);

        if config.is_null() {
            return Err("pagemap accessor returned no descriptor");
        }

        (*config).check(&P::CONFIG)?;

        let pagemap = P::cast_to_pagemap(raw, config).ok_or("pagemap accessor returned NULL")?;
        Ok(ExternalPagemap { pagemap })
    }

    /// Like `try_new`, but aborts the process on mismatch: sharing a
    /// pagemap with the wrong layout would silently misclassify.
    ///
    /// # Safety
    ///
    /// Same as `try_new`.
    pub unsafe fn new(accessor: PagemapAccessor) -> Self {
        match Self::try_new(accessor) {
            Ok(provider) => provider,
            Err(message) => crate::pal::error(message),
        }
    }
}

impl<P: Pagemap> PagemapProvider for ExternalPagemap<P> {
    type Pagemap = P;

    #[inline]
    fn pagemap(&self) -> &'static P {
        self.pagemap
    }
}

/// The scalar pagemap this module owns.
pub type LocalScalarPagemap = DefaultPagemap<u8>;

static LOCAL_SCALAR_CONFIG: PagemapConfig = <LocalScalarPagemap as Pagemap>::CONFIG;

/// Returns this module's global scalar pagemap, and stores its
/// descriptor in `*config_out` when `config_out` is non-NULL.
///
/// # Safety
///
/// `config_out` must be NULL or valid for writes.
pub unsafe extern "C" fn pagemap_global_get(config_out: *mut *const PagemapConfig) -> *mut c_void {
    if !config_out.is_null() {
        *config_out = &LOCAL_SCALAR_CONFIG;
    }

    LocalScalarPagemap::global() as *const LocalScalarPagemap as *mut c_void
}

/// Exports `pagemap_global_get` for other modules and debuggers.
///
/// # Safety
///
/// `config_out` must be NULL or valid for writes.
#[cfg(feature = "expose_pagemap")]
#[no_mangle]
pub unsafe extern "C" fn chunkmap_pagemap_global_get(
    config_out: *mut *const PagemapConfig,
) -> *mut c_void {
    pagemap_global_get(config_out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pagemap::test::test_base;
    use crate::tag::CHUNK_SIZE;

    lazy_static::lazy_static! {
        static ref HOST_PAGEMAP: HierarchicalPagemap<u8> = new_global();
        static ref WRONG_CONFIG: PagemapConfig = {
            let mut config = HierarchicalPagemap::<u8>::CONFIG;
            config.is_flat_pagemap = true;
            config
        };
    }

    static HOST_CONFIG: PagemapConfig = <HierarchicalPagemap<u8> as Pagemap>::CONFIG;

    unsafe extern "C" fn host_accessor(config_out: *mut *const PagemapConfig) -> *mut c_void {
        *config_out = &HOST_CONFIG;
        &*HOST_PAGEMAP as *const HierarchicalPagemap<u8> as *mut c_void
    }

    unsafe extern "C" fn wrong_accessor(config_out: *mut *const PagemapConfig) -> *mut c_void {
        *config_out = &*WRONG_CONFIG;
        &*HOST_PAGEMAP as *const HierarchicalPagemap<u8> as *mut c_void
    }

    unsafe extern "C" fn silent_accessor(_config_out: *mut *const PagemapConfig) -> *mut c_void {
        std::ptr::null_mut()
    }

    #[test]
    fn global_is_singleton() {
        let provider = GlobalPagemap::<HierarchicalPagemap<u8>>::new();
        let copy = provider;

        assert!(std::ptr::eq(provider.pagemap(), copy.pagemap()));
        assert!(std::ptr::eq(
            provider.pagemap(),
            HierarchicalPagemap::<u8>::global()
        ));
    }

    // Two consumers that attach independently see each other's writes.
    #[test]
    fn external_consumers_share() {
        let first = unsafe { ExternalPagemap::<HierarchicalPagemap<u8>>::try_new(host_accessor) }
            .expect("layouts must agree");
        let second = unsafe { ExternalPagemap::<HierarchicalPagemap<u8>>::try_new(host_accessor) }
            .expect("layouts must agree");
        let address = test_base() + 101 * CHUNK_SIZE;

        assert_eq!(second.pagemap().get(address), 0);
        first.pagemap().set(address, 42);
        assert_eq!(second.pagemap().get(address), 42);
        assert_eq!(HOST_PAGEMAP.get(address), 42);

        second.pagemap().set(address, 0);
        assert_eq!(first.pagemap().get(address), 0);
    }

    #[test]
    fn external_layout_mismatch() {
        assert_eq!(
            unsafe { ExternalPagemap::<HierarchicalPagemap<u8>>::try_new(wrong_accessor) }
                .err(),
            Some("pagemap implementation mismatch")
        );

        // The flat backend is a different layout altogether.
        assert!(unsafe { ExternalPagemap::<FlatPagemap<u8>>::try_new(host_accessor) }.is_err());

        assert_eq!(
            unsafe { ExternalPagemap::<HierarchicalPagemap<u8>>::try_new(silent_accessor) }
                .err(),
            Some("pagemap accessor returned no descriptor")
        );
    }

    // The local accessor round-trips through the external provider.
    #[test]
    fn local_accessor() {
        let mut config: *const PagemapConfig = std::ptr::null();
        let raw = unsafe { pagemap_global_get(&mut config) };

        assert!(!config.is_null());
        assert_eq!(unsafe { *config }, LocalScalarPagemap::CONFIG);
        assert!(std::ptr::eq(
            raw as *const LocalScalarPagemap,
            LocalScalarPagemap::global()
        ));

        // NULL `config_out` is fine.
        assert_eq!(unsafe { pagemap_global_get(std::ptr::null_mut()) }, raw);

        let external = unsafe { ExternalPagemap::<LocalScalarPagemap>::try_new(pagemap_global_get) }
            .expect("must accept its own descriptor");
        let address = test_base() + 202 * CHUNK_SIZE;

        external.pagemap().set(address, 7);
        assert_eq!(GlobalPagemap::<LocalScalarPagemap>::new().pagemap().get(address), 7);
        external.pagemap().set(address, 0);
    }
}
