use common::{Addr, AllocationRecord, MemoryError, RegionKind};
use shadow::ShadowMemory;

use crate::config::HeapConfig;

/// Where the simulated heap starts
pub const HEAP_BASE: Addr = 0x5555_5555_0000;

/// Pointer returned by [`Heap::malloc`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapPtr {
    record: AllocationRecord,
}

impl HeapPtr {
    pub fn addr(&self) -> Addr {
        self.record.base
    }

    /// Bytes actually allocated
    pub fn size(&self) -> u64 {
        self.record.size
    }
}

/// `malloc`/`free` over shadow memory
#[derive(Debug)]
pub struct Heap {
    memory: ShadowMemory,
}

impl Heap {
    pub fn new(config: &HeapConfig) -> Self {
        Self {
            memory: ShadowMemory::new(
                "heap",
                RegionKind::Heap,
                HEAP_BASE,
                config.capacity,
                config.redzone,
                config.sanitizer,
            ),
        }
    }

    /// Allocate `size` bytes; `None` when the heap is exhausted
    pub fn malloc(&mut self, size: u32) -> Option<HeapPtr> {
        match self.memory.reserve(&format!("malloc({size})"), u64::from(size)) {
            Ok(record) => Some(HeapPtr { record }),
            Err(err) => {
                log::warn!("malloc({size}) failed: {err}");
                None
            }
        }
    }

    pub fn free(&mut self, ptr: HeapPtr) -> Result<(), MemoryError> {
        self.memory.release(ptr.addr())
    }

    /// Bounds-checked view of an allocation as `i32` elements
    pub fn int_slice_mut(&mut self, ptr: &HeapPtr) -> Result<IntSliceMut<'_>, MemoryError> {
        let name = ptr.record.name.clone();
        let bytes = self.memory.region_slice_mut(&ptr.record)?;
        Ok(IntSliceMut { name, bytes })
    }

    /// `*(int *)addr = value` with nothing checking `addr`
    pub fn store_i32_unchecked(&mut self, addr: Addr, value: i32) -> Result<(), MemoryError> {
        self.memory.store_unchecked(addr, &value.to_le_bytes())
    }

    pub fn read_i32(&self, addr: Addr) -> Result<i32, MemoryError> {
        let bytes = self.memory.peek(addr, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn memory(&self) -> &ShadowMemory {
        &self.memory
    }
}

/// Mutable `i32` view over one allocation
pub struct IntSliceMut<'a> {
    name: String,
    bytes: &'a mut [u8],
}

impl IntSliceMut<'_> {
    const WIDTH: usize = std::mem::size_of::<i32>();

    pub fn len(&self) -> usize {
        self.bytes.len() / Self::WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `array[index] = value`, refusing indices past the allocation
    pub fn set(&mut self, index: u32, value: i32) -> Result<(), MemoryError> {
        let len = self.len();
        let slot = (index as usize)
            .checked_mul(Self::WIDTH)
            .and_then(|start| self.bytes.get_mut(start..start + Self::WIDTH))
            .ok_or_else(|| MemoryError::IndexOutOfRange {
                region: self.name.clone(),
                index: u64::from(index),
                len: len as u64,
            })?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SanitizerMode;

    fn small_heap(sanitizer: SanitizerMode) -> Heap {
        Heap::new(&HeapConfig {
            capacity: 8192,
            sanitizer,
            ..HeapConfig::default()
        })
    }

    #[test]
    fn test_malloc_exact_size() {
        let mut heap = small_heap(SanitizerMode::Halt);
        let ptr = heap.malloc(12).expect("malloc failed");
        assert_eq!(ptr.size(), 12);
        assert_eq!(ptr.addr(), HEAP_BASE);
    }

    #[test]
    fn test_malloc_exhausted() {
        let mut heap = small_heap(SanitizerMode::Halt);
        assert!(heap.malloc(8192).is_none());
        assert!(heap.malloc(100).is_some());
    }

    #[test]
    fn test_checked_slice_refuses_past_end() {
        let mut heap = small_heap(SanitizerMode::Halt);
        let ptr = heap.malloc(8).unwrap();

        let mut array = heap.int_slice_mut(&ptr).unwrap();
        assert_eq!(array.len(), 2);
        array.set(0, 10).unwrap();
        array.set(1, 11).unwrap();
        assert!(matches!(
            array.set(2, 12),
            Err(MemoryError::IndexOutOfRange { index: 2, len: 2, .. })
        ));

        assert_eq!(heap.read_i32(ptr.addr() + 4).unwrap(), 11);
        assert!(heap.memory().violations().is_empty());
    }

    #[test]
    fn test_unchecked_store_past_end_is_caught() {
        let mut heap = small_heap(SanitizerMode::Halt);
        let ptr = heap.malloc(4).unwrap();

        heap.store_i32_unchecked(ptr.addr(), 1).unwrap();
        let err = heap.store_i32_unchecked(ptr.addr() + 4, 2).unwrap_err();
        assert!(matches!(err, MemoryError::Sanitizer(_)));
    }

    #[test]
    fn test_free_then_view_fails() {
        let mut heap = small_heap(SanitizerMode::Halt);
        let ptr = heap.malloc(4).unwrap();
        heap.free(ptr.clone()).unwrap();
        assert!(heap.int_slice_mut(&ptr).is_err());
    }
}
