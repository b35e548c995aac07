use common::MemoryError;
use thiserror::Error;

/// The handful of errno values the device layer hands back
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    #[error("ENXIO: no such device or address")]
    Nxio,
    #[error("EFAULT: bad address")]
    Fault,
    #[error("EBUSY: device or resource busy")]
    Busy,
    #[error("EEXIST: file exists")]
    Exist,
    #[error("EINVAL: invalid argument")]
    Inval,
}

impl Errno {
    pub fn code(self) -> i32 {
        match self {
            Errno::Nxio => 6,
            Errno::Fault => 14,
            Errno::Busy => 16,
            Errno::Exist => 17,
            Errno::Inval => 22,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error(transparent)]
    Errno(#[from] Errno),
    /// A bad kernel memory access; the calling task would not survive it
    #[error("kernel oops: {0}")]
    Oops(#[from] MemoryError),
}
