//! Platform facts the pagemap and the C entry points depend on: the
//! size of the address space, whether large reservations are
//! committed lazily, the fatal error path, and `errno`.
use std::io::Write;

#[cfg(target_pointer_width = "64")]
pub const ADDRESS_BITS: u32 = 48;

#[cfg(not(target_pointer_width = "64"))]
pub const ADDRESS_BITS: u32 = usize::BITS;

/// Whether reserving (and mapping) a large range only consumes
/// physical memory for the pages actually touched.  The flat pagemap
/// relies on this to be affordable.
pub const SUPPORTS_LAZY_COMMIT: bool = cfg!(unix);

static_assertions::const_assert!(ADDRESS_BITS <= usize::BITS);
static_assertions::const_assert!(ADDRESS_BITS > crate::tag::CHUNK_BITS);

// These helpers are declared in `c/error.h`.
extern "C" {
    fn chunkmap__set_errno(value: i32);
    fn chunkmap__get_errno() -> i32;
    fn chunkmap__enomem() -> i32;
    fn chunkmap__einval() -> i32;
}

/// Reports an invariant violation and aborts the process.
///
/// This is only for states that indicate memory corruption or a build
/// mismatch; there is no recovery.  The message is written without
/// allocating.
#[cold]
#[inline(never)]
pub fn error(message: &str) -> ! {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();

    let _ = handle.write_all(b"chunkmap: ");
    let _ = handle.write_all(message.as_bytes());
    let _ = handle.write_all(b"\n");
    let _ = handle.flush();
    std::process::abort()
}

/// Stores `value` in the calling thread's `errno`.
#[inline]
pub fn set_errno(value: i32) {
    unsafe { chunkmap__set_errno(value) }
}

/// Returns the calling thread's `errno`.
#[inline]
pub fn errno() -> i32 {
    unsafe { chunkmap__get_errno() }
}

pub fn enomem() -> i32 {
    unsafe { chunkmap__enomem() }
}

pub fn einval() -> i32 {
    unsafe { chunkmap__einval() }
}

#[test]
fn test_errno_round_trip() {
    set_errno(enomem());
    assert_eq!(errno(), enomem());

    set_errno(einval());
    assert_eq!(errno(), einval());
    assert_ne!(enomem(), einval());

    set_errno(0);
    assert_eq!(errno(), 0);
}
