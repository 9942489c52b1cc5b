//! Describes how this build was configured, for humans.
//!
//! Nothing here allocates: the description may be printed while the
//! global allocator itself is being built.
use std::io::Write;

use crate::pagemap::Pagemap;
use crate::provider::LocalScalarPagemap;
use crate::tag::CHUNK_BITS;

/// Returns the name of the default pagemap backend.
pub fn pagemap_kind() -> &'static str {
    if LocalScalarPagemap::CONFIG.is_flat_pagemap {
        "flat"
    } else {
        "hierarchical"
    }
}

/// Writes a one-line description of the build configuration.
pub fn describe_to<W: Write>(out: &mut W) -> std::io::Result<()> {
    write!(
        out,
        "chunkmap {} pagemap, 2^{} byte chunks",
        pagemap_kind(),
        CHUNK_BITS
    )?;

    if cfg!(feature = "quarantine") {
        write!(out, " +quarantine")?;
    }

    if cfg!(feature = "external_pagemap") {
        write!(out, " +external")?;
    }

    if cfg!(feature = "expose_pagemap") {
        write!(out, " +expose")?;
    }

    if cfg!(feature = "override") {
        write!(out, " +override")?;
    }

    Ok(())
}

pub fn describe() -> String {
    let mut out = Vec::new();

    // Writes to a `Vec` only fail on allocation failure, which aborts.
    let _ = describe_to(&mut out);
    String::from_utf8_lossy(&out).into_owned()
}

/// Prints the build description to stderr, if the `announce` feature
/// is enabled.
pub fn announce() {
    if !cfg!(feature = "announce") {
        return;
    }

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();

    let _ = describe_to(&mut handle);
    let _ = handle.write_all(b"\n");
}

#[test]
fn test_describe() {
    let description = describe();

    assert!(description.starts_with("chunkmap "));
    assert!(description.contains(pagemap_kind()));
    assert!(description.contains(&format!("2^{} byte chunks", CHUNK_BITS)));
    assert_eq!(
        description.contains("+quarantine"),
        cfg!(feature = "quarantine")
    );
}
