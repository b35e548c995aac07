//! Byte-addressed simulated memory with sanitizer-style shadow tracking.
//!
//! Both the user-space heap and kernel module data live in a [`ShadowMemory`].
//! Checked accessors go through region slices; unchecked stores take a raw
//! address and are classified against the region map the way ASan and KASAN
//! classify instrumented stores.

/// Region bookkeeping and instrumented stores
pub mod memory;

pub use memory::{ShadowMemory, PAGE_SIZE};

pub use common::{
    AccessKind, AccessRecord, Addr, AllocationRecord, MemoryError, RegionKind, SanitizerMode,
    Violation, ViolationKind,
};

#[cfg(test)]
mod tests;
