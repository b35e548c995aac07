//! Character-device write handlers over a fixed module buffer (CWE-787).
//!
//! [`VulnDevice`] copies however many bytes the caller asks for into a
//! 32-byte module global. [`BoundedDevice`] is the corrected handler; it is
//! an inferred fix, not something the vulnerable driver ever shipped with.

pub mod bounded;
pub mod errno;
pub mod module;
pub mod registry;
pub mod uaccess;
pub mod vuln;

pub use bounded::{BoundedDevice, BoundedModule, OverflowPolicy};
pub use errno::{Errno, KernelError};
pub use module::{Device, DeviceModule, DeviceState, Kernel, KernelModule, ModuleData};
pub use registry::{ChrdevRegistry, FileOperations, OpenFile};
pub use uaccess::{copy_from_user, UserSlice};
pub use vuln::{VulnDevice, VulnModule};

/// Capacity of `kernel_buffer`
pub const BUF_LEN: usize = 32;
