//! Copying bytes in from user space.

use common::MemoryError;

/// Bytes moved per store while copying
pub const COPY_CHUNK: usize = 8;

/// The part of a user buffer that is actually mapped.
///
/// A caller of `write(2)` may claim a longer length than it has mapped; the
/// shortfall shows up as uncopied bytes.
#[derive(Debug, Clone, Copy)]
pub struct UserSlice<'a> {
    data: &'a [u8],
}

impl<'a> UserSlice<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Copy `len` bytes from `src` into kernel memory through `store`.
///
/// `store` receives the destination offset and the next chunk. Returns the
/// number of bytes that could not be copied because the user range ran out,
/// like the kernel primitive. Nothing here looks at how big the destination
/// is; that is the caller's job.
pub fn copy_from_user<F>(src: &UserSlice<'_>, len: usize, mut store: F) -> Result<usize, MemoryError>
where
    F: FnMut(usize, &[u8]) -> Result<(), MemoryError>,
{
    let available = len.min(src.len());
    for (i, chunk) in src.data[..available].chunks(COPY_CHUNK).enumerate() {
        store(i * COPY_CHUNK, chunk)?;
    }
    Ok(len - available)
}
