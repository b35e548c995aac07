use std::collections::BTreeMap;

use common::{
    AccessKind, AccessRecord, Addr, AllocationRecord, MemoryError, RegionKind, SanitizerMode,
    Violation, ViolationKind,
};

/// Mapping granularity; stores past the last mapped page fault
pub const PAGE_SIZE: u64 = 4096;

/// Alignment of every reserved region
const REGION_ALIGN: u64 = 16;

/// Round up to a multiple of `align` (a power of two), saturating at the
/// highest aligned value
fn align_up(value: u64, align: u64) -> u64 {
    value
        .checked_next_multiple_of(align)
        .unwrap_or(u64::MAX & !(align - 1))
}

/// A contiguous simulated address space
///
/// Regions are bump-allocated and followed by `redzone` bytes of padding.
/// Memory is mapped page by page as regions are reserved, so stores that run
/// far enough past the last region hit unmapped memory.
#[derive(Debug)]
pub struct ShadowMemory {
    name: String,
    kind: RegionKind,
    base: Addr,
    capacity: u64,
    redzone: u64,
    mode: SanitizerMode,
    bytes: Vec<u8>,
    cursor: u64,
    regions: BTreeMap<Addr, AllocationRecord>,
    violations: Vec<Violation>,
    stores: u64,
}

impl ShadowMemory {
    pub fn new(
        name: impl Into<String>,
        kind: RegionKind,
        base: Addr,
        capacity: u64,
        redzone: u64,
        mode: SanitizerMode,
    ) -> Self {
        // Every address in the space must be representable
        let addressable = (Addr::MAX - base) & !(PAGE_SIZE - 1);
        Self {
            name: name.into(),
            kind,
            base,
            capacity: align_up(capacity, PAGE_SIZE).min(addressable),
            redzone,
            mode,
            bytes: Vec::new(),
            cursor: 0,
            regions: BTreeMap::new(),
            violations: Vec::new(),
            stores: 0,
        }
    }

    /// Size of the address space after page rounding
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of currently mapped bytes
    pub fn mapped_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn regions(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.regions.values()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Instrumented stores performed so far
    pub fn store_count(&self) -> u64 {
        self.stores
    }

    /// Reserve a new region of `size` bytes
    pub fn reserve(&mut self, name: &str, size: u64) -> Result<AllocationRecord, MemoryError> {
        let start = align_up(self.cursor, REGION_ALIGN);
        let end = start
            .checked_add(size)
            .and_then(|end| end.checked_add(self.redzone))
            .filter(|end| *end <= self.capacity)
            .ok_or(MemoryError::Exhausted {
                requested: size,
                available: self.capacity.saturating_sub(start),
                capacity: self.capacity,
            })?;

        let mapped = align_up(end.max(1), PAGE_SIZE).min(self.capacity);
        if mapped > self.mapped_len() {
            self.bytes.resize(mapped as usize, 0);
        }
        self.cursor = end;

        let record = AllocationRecord {
            name: name.to_string(),
            base: self.base + start,
            size,
            kind: self.kind,
            is_freed: false,
        };
        log::debug!(
            "{}: reserved `{}` at {:#x} ({} bytes, {} byte redzone)",
            self.name,
            name,
            record.base,
            size,
            self.redzone
        );
        self.regions.insert(record.base, record.clone());
        Ok(record)
    }

    /// Mark the region starting at `addr` as freed
    ///
    /// Freed memory is never handed out again, so later accesses stay
    /// attributable to the freed region.
    pub fn release(&mut self, addr: Addr) -> Result<(), MemoryError> {
        match self.regions.get_mut(&addr) {
            Some(region) if !region.is_freed => {
                region.is_freed = true;
                log::debug!("{}: released `{}` at {:#x}", self.name, region.name, addr);
                Ok(())
            }
            _ => Err(MemoryError::InvalidFree { addr }),
        }
    }

    /// Region whose base is the closest one at or below `addr`
    pub fn region_at(&self, addr: Addr) -> Option<&AllocationRecord> {
        self.regions.range(..=addr).next_back().map(|(_, r)| r)
    }

    /// Classify an access against the region map
    ///
    /// Accesses entirely inside a live region are fine. Anything else is
    /// attributed to the closest preceding region. An overflow that jumps
    /// clean over the redzone into a neighbouring live region is not
    /// detected.
    pub fn classify(&self, addr: Addr, size: u64, kind: AccessKind) -> Option<Violation> {
        let access = AccessRecord { addr, size, kind };
        let Some(region) = self.region_at(addr) else {
            return Some(Violation {
                kind: ViolationKind::Wild,
                access,
                region: None,
            });
        };

        if region.is_freed && addr < region.end() {
            return Some(Violation {
                kind: ViolationKind::UseAfterFree,
                access,
                region: Some(region.clone()),
            });
        }
        if region.contains(addr, size) {
            return None;
        }
        Some(Violation {
            kind: ViolationKind::BufferOverflow,
            access,
            region: Some(region.clone()),
        })
    }

    fn offset_of(&self, addr: Addr, size: u64, kind: AccessKind) -> Result<usize, MemoryError> {
        addr.checked_sub(self.base)
            .filter(|offset| {
                offset
                    .checked_add(size)
                    .is_some_and(|end| end <= self.mapped_len())
            })
            .map(|offset| offset as usize)
            .ok_or(MemoryError::Unmapped { addr, size, kind })
    }

    /// Raw store to an arbitrary address, instrumented per the sanitizer mode
    ///
    /// This is the path unchecked code takes: nothing but the mapping stops
    /// the bytes from landing.
    pub fn store_unchecked(&mut self, addr: Addr, data: &[u8]) -> Result<(), MemoryError> {
        let size = data.len() as u64;
        let offset = match self.offset_of(addr, size, AccessKind::Write) {
            Ok(offset) => offset,
            Err(fault) => {
                log::error!("{}: {fault}", self.name);
                return Err(fault);
            }
        };
        self.stores += 1;

        if self.mode != SanitizerMode::Off {
            if let Some(violation) = self.classify(addr, size, AccessKind::Write) {
                if self.violations.is_empty() {
                    log::warn!("{}: {violation}", self.name);
                } else {
                    log::debug!("{}: {violation}", self.name);
                }
                self.violations.push(violation.clone());
                if self.mode == SanitizerMode::Halt {
                    return Err(MemoryError::Sanitizer(violation));
                }
            }
        }

        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Uninstrumented read of mapped bytes
    pub fn peek(&self, addr: Addr, len: u64) -> Result<&[u8], MemoryError> {
        let offset = self.offset_of(addr, len, AccessKind::Read)?;
        Ok(&self.bytes[offset..offset + len as usize])
    }

    fn live_range(&self, region: &AllocationRecord) -> Result<std::ops::Range<usize>, MemoryError> {
        match self.regions.get(&region.base) {
            Some(live) if !live.is_freed && live.size == region.size => {
                let offset = self.offset_of(region.base, region.size, AccessKind::Read)?;
                Ok(offset..offset + region.size as usize)
            }
            Some(live) => Err(MemoryError::Sanitizer(Violation {
                kind: ViolationKind::UseAfterFree,
                access: AccessRecord {
                    addr: region.base,
                    size: region.size,
                    kind: AccessKind::Read,
                },
                region: Some(live.clone()),
            })),
            None => Err(MemoryError::Unmapped {
                addr: region.base,
                size: region.size,
                kind: AccessKind::Read,
            }),
        }
    }

    /// Bytes of a live region, bounds validated once up front
    pub fn region_slice(&self, region: &AllocationRecord) -> Result<&[u8], MemoryError> {
        let range = self.live_range(region)?;
        Ok(&self.bytes[range])
    }

    /// Mutable bytes of a live region, bounds validated once up front
    pub fn region_slice_mut(&mut self, region: &AllocationRecord) -> Result<&mut [u8], MemoryError> {
        let range = self.live_range(region)?;
        Ok(&mut self.bytes[range])
    }
}
