use super::*;

const BASE: Addr = 0x10_0000;

fn heap(mode: SanitizerMode) -> ShadowMemory {
    ShadowMemory::new("heap", RegionKind::Heap, BASE, 16 * PAGE_SIZE, 16, mode)
}

#[test]
fn test_reserve_maps_whole_pages() {
    let mut mem = heap(SanitizerMode::Halt);
    let region = mem.reserve("a", 10).expect("reserve failed");

    assert_eq!(region.base, BASE);
    assert_eq!(region.size, 10);
    assert_eq!(mem.mapped_len(), PAGE_SIZE);

    // Next region starts after the redzone, rounded up to the alignment
    let next = mem.reserve("b", 4).expect("reserve failed");
    assert_eq!(next.base, BASE + 32);
}

#[test]
fn test_reserve_exhausted() {
    let mut mem = heap(SanitizerMode::Halt);
    let err = mem.reserve("huge", 16 * PAGE_SIZE).unwrap_err();
    assert_eq!(
        err,
        MemoryError::Exhausted {
            requested: 16 * PAGE_SIZE,
            available: 16 * PAGE_SIZE,
            capacity: 16 * PAGE_SIZE,
        }
    );
    assert_eq!(mem.mapped_len(), 0);
}

#[test]
fn test_in_bounds_store_is_clean() {
    let mut mem = heap(SanitizerMode::Halt);
    let region = mem.reserve("a", 8).unwrap();

    mem.store_unchecked(region.base + 4, &[1, 2, 3, 4]).unwrap();

    assert!(mem.violations().is_empty());
    assert_eq!(mem.region_slice(&region).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
}

#[test]
fn test_halt_stops_before_store_lands() {
    let mut mem = heap(SanitizerMode::Halt);
    let region = mem.reserve("a", 4).unwrap();

    let err = mem.store_unchecked(region.end(), &[0xAA; 4]).unwrap_err();
    match err {
        MemoryError::Sanitizer(violation) => {
            assert_eq!(violation.kind, ViolationKind::BufferOverflow);
            assert_eq!(violation.offset_past_end(), Some(0));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mem.peek(region.end(), 4).unwrap(), &[0; 4]);
    assert_eq!(mem.violations().len(), 1);
}

#[test]
fn test_report_lets_store_land() {
    let mut mem = heap(SanitizerMode::Report);
    let region = mem.reserve("a", 4).unwrap();

    mem.store_unchecked(region.base + 2, &[7; 4]).unwrap();

    assert_eq!(mem.peek(region.base + 2, 4).unwrap(), &[7; 4]);
    assert_eq!(mem.violations().len(), 1);
    assert_eq!(mem.violations()[0].kind, ViolationKind::BufferOverflow);
}

#[test]
fn test_off_is_silent() {
    let mut mem = heap(SanitizerMode::Off);
    let region = mem.reserve("a", 4).unwrap();

    mem.store_unchecked(region.end() + 8, &[9]).unwrap();

    assert!(mem.violations().is_empty());
    assert_eq!(mem.peek(region.end() + 8, 1).unwrap(), &[9]);
}

#[test]
fn test_store_past_mapping_faults() {
    let mut mem = heap(SanitizerMode::Off);
    mem.reserve("a", 4).unwrap();

    let err = mem.store_unchecked(BASE + PAGE_SIZE - 2, &[0; 4]).unwrap_err();
    assert_eq!(
        err,
        MemoryError::Unmapped {
            addr: BASE + PAGE_SIZE - 2,
            size: 4,
            kind: AccessKind::Write,
        }
    );

    // Below the base is never mapped either
    assert!(mem.store_unchecked(BASE - 1, &[0]).is_err());
}

#[test]
fn test_use_after_free() {
    let mut mem = heap(SanitizerMode::Halt);
    let region = mem.reserve("a", 8).unwrap();
    mem.release(region.base).unwrap();

    let violation = mem
        .classify(region.base, 4, AccessKind::Write)
        .expect("freed memory must be flagged");
    assert_eq!(violation.kind, ViolationKind::UseAfterFree);
    assert!(mem.region_slice(&region).is_err());

    // Double free
    assert_eq!(
        mem.release(region.base),
        Err(MemoryError::InvalidFree { addr: region.base })
    );
}

#[test]
fn test_overflow_into_neighbour_without_redzone_is_missed() {
    let mut mem = ShadowMemory::new(
        "bss",
        RegionKind::Global,
        BASE,
        PAGE_SIZE,
        0,
        SanitizerMode::Report,
    );
    let first = mem.reserve("first", 16).unwrap();
    let second = mem.reserve("second", 4).unwrap();
    assert_eq!(second.base, first.end());

    // Lands inside `second`, so it looks like a legitimate store
    mem.store_unchecked(second.base, &[1, 2, 3, 4]).unwrap();
    assert!(mem.violations().is_empty());

    // A single store straddling the boundary is still caught
    mem.store_unchecked(first.end() - 2, &[0; 4]).unwrap();
    assert_eq!(mem.violations().len(), 1);
}

#[test]
fn test_wild_access() {
    let mem = heap(SanitizerMode::Halt);
    let violation = mem.classify(BASE, 1, AccessKind::Read).unwrap();
    assert_eq!(violation.kind, ViolationKind::Wild);
    assert!(violation.region.is_none());
}

#[test]
fn test_capacity_rounds_to_pages() {
    let mem = ShadowMemory::new("h", RegionKind::Heap, BASE, 10, 0, SanitizerMode::Halt);
    assert_eq!(mem.capacity(), PAGE_SIZE);
}

#[test]
fn test_huge_capacity_saturates() {
    let mut mem = ShadowMemory::new(
        "h",
        RegionKind::Heap,
        BASE,
        u64::MAX,
        16,
        SanitizerMode::Halt,
    );
    assert_eq!(mem.capacity(), (u64::MAX - BASE) & !(PAGE_SIZE - 1));

    let region = mem.reserve("a", 40).unwrap();
    assert_eq!(region.base, BASE);
    assert_eq!(mem.mapped_len(), PAGE_SIZE);
    mem.store_unchecked(region.base, &[1; 40]).unwrap();
    assert!(mem.violations().is_empty());
}

#[test]
fn test_space_ending_at_top_of_address_range() {
    let top = u64::MAX & !(PAGE_SIZE - 1);
    let mut mem = ShadowMemory::new("h", RegionKind::Global, top, PAGE_SIZE, 0, SanitizerMode::Halt);
    // The last page cannot be covered without its end wrapping
    assert_eq!(mem.capacity(), 0);
    assert!(matches!(mem.reserve("a", 4), Err(MemoryError::Exhausted { .. })));
}
