//! Integer-overflow-to-buffer-overflow (CWE-190 / CWE-680).
//!
//! The allocation size is `count * ELEMENT_WIDTH` computed in `u32`, the
//! width of C's `unsigned int`. [`checked_total_size`] refuses counts whose
//! product is not representable; [`wrapping_total_size`] is the same
//! arithmetic with the check left out, so large counts silently wrap to a
//! small size.

pub mod heap;
pub mod program;

pub use heap::{Heap, HeapPtr, IntSliceMut, HEAP_BASE};
pub use program::{AllocationProgram, Outcome};

use thiserror::Error;

/// `sizeof(int)`
pub const ELEMENT_WIDTH: u32 = std::mem::size_of::<i32>() as u32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("{count} elements of {width} bytes does not fit in u32 (limit is {limit} elements)")]
    Overflow { count: u32, width: u32, limit: u32 },
    #[error("element width must be non-zero")]
    ZeroWidth,
}

/// Largest count whose total size is representable
pub fn max_elements(width: u32) -> Result<u32, SizeError> {
    u32::MAX.checked_div(width).ok_or(SizeError::ZeroWidth)
}

/// Total allocation size, validated before the multiplication happens
///
/// The limit is derived by division so the check itself cannot wrap.
pub fn checked_total_size(count: u32, width: u32) -> Result<u32, SizeError> {
    let limit = max_elements(width)?;
    if count > limit {
        return Err(SizeError::Overflow {
            count,
            width,
            limit,
        });
    }
    Ok(count * width)
}

/// Total allocation size with no validation; wraps modulo 2^32
pub fn wrapping_total_size(count: u32, width: u32) -> u32 {
    count.wrapping_mul(width)
}
