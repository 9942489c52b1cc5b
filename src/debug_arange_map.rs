//! This module tracks the address ranges reserved through a `Mapper`
//! in debug builds.
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Clone, Copy)]
struct AddressRange {
    begin: usize,
    size: usize,
}

impl AddressRange {
    fn end(&self) -> usize {
        self.begin + self.size
    }
}

lazy_static::lazy_static! {
    static ref ADDRESS_RANGE_MAP: Mutex<BTreeMap<usize, AddressRange>> = Default::default();
}

/// Returns the address range associated with the highest key less
/// than or equal to `ptr`.
fn predecessor(map: &BTreeMap<usize, AddressRange>, ptr: usize) -> Option<AddressRange> {
    map.range(0..=ptr).last().map(|x| *x.1)
}

/// Returns the reservation that fully contains `[begin, begin + size)`.
fn parent(
    map: &BTreeMap<usize, AddressRange>,
    begin: usize,
    size: usize,
) -> Result<AddressRange, &'static str> {
    if size > usize::MAX - begin {
        return Err("Range too large");
    }

    let reserved = predecessor(map, begin).ok_or("Parent range not found")?;

    if begin >= reserved.end() {
        return Err("Parent range too short for begin");
    }

    if begin + size > reserved.end() {
        return Err("Parent range too short for size");
    }

    Ok(reserved)
}

/// Registers a new address range.  It must not overlap with any other
/// registered range: `Mapper::release` unregisters before unmapping,
/// so a recycled address is never still registered.
pub fn reserve_range(begin: usize, size: usize) -> Result<(), &'static str> {
    if usize::MAX - begin < size {
        return Err("Address is too high.");
    }

    let mut map = ADDRESS_RANGE_MAP.lock().unwrap();

    // The highest range that starts below our end is the only
    // candidate for an overlap.
    if let Some(info) = predecessor(&map, begin + size - 1) {
        if info.end() > begin {
            return Err("Found overlapping address range");
        }
    }

    map.insert(begin, AddressRange { begin, size });
    Ok(())
}

/// Unregisters a fragment of a pre-existing address range.  The
/// fragment must be at either end of the registered range.
pub fn release_range(begin: usize, size: usize) -> Result<(), &'static str> {
    let mut map = ADDRESS_RANGE_MAP.lock().unwrap();
    let reserved = parent(&map, begin, size)?;

    if reserved.begin == begin && reserved.size == size {
        map.remove(&begin);
        return Ok(());
    }

    if reserved.begin == begin {
        map.remove(&begin);
        map.insert(
            begin + size,
            AddressRange {
                begin: begin + size,
                size: reserved.size - size,
            },
        );
        return Ok(());
    }

    if reserved.end() == begin + size {
        let entry: &mut _ = map
            .get_mut(&reserved.begin)
            .ok_or("Parent range not found on second lookup")?;

        entry.size -= size;
        return Ok(());
    }

    Err("Released range is in the middle of the reservation")
}

/// Returns Ok if the range is fully inside one registered range.
pub fn is_reserved(begin: usize, size: usize) -> Result<(), &'static str> {
    let map = ADDRESS_RANGE_MAP.lock().unwrap();

    parent(&map, begin, size).map(|_| ())
}

#[test]
fn test_reserve_and_trim() {
    // Pick addresses no real mapping would use.
    let base = usize::MAX / 2 + 0x1000_0000;

    assert!(reserve_range(base, 0x10000).is_ok());
    assert!(reserve_range(base + 0x8000, 0x1000).is_err());
    assert!(is_reserved(base + 0x1000, 0x2000).is_ok());

    // Trim both ends.
    assert!(release_range(base + 0x4000, 0x1000).is_err());
    assert!(release_range(base, 0x1000).is_ok());
    assert!(is_reserved(base, 0x1000).is_err());
    assert!(release_range(base + 0xf000, 0x1000).is_ok());
    assert!(is_reserved(base + 0xe000, 0x2000).is_err());

    // And now release the remainder.
    assert!(release_range(base + 0x1000, 0xe000).is_ok());
    assert!(is_reserved(base + 0x1000, 0x1000).is_err());
}
