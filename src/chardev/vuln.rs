use std::sync::Arc;

use common::{AccessKind, Addr, MemoryError};

use super::errno::KernelError;
use super::module::{Device, DeviceModule, ModuleData};
use super::registry::FileOperations;
use super::uaccess::{copy_from_user, UserSlice};
use super::BUF_LEN;
use crate::config::KernelConfig;

/// The `vuln` driver: `len` is never compared against `BUF_LEN`.
///
/// Each chunk of the copy takes the data lock on its own, so concurrent
/// writers interleave inside `kernel_buffer`. That race is left in on purpose
/// alongside the overflow.
pub struct VulnDevice {
    data: Arc<ModuleData>,
}

pub type VulnModule = DeviceModule<VulnDevice>;

impl Device for VulnDevice {
    const NAME: &'static str = "vuln";

    fn create(data: Arc<ModuleData>, _config: &KernelConfig) -> Self {
        Self { data }
    }
}

impl FileOperations for VulnDevice {
    fn write(&self, buf: &UserSlice<'_>, len: usize, _offset: &mut i64) -> Result<usize, KernelError> {
        log::info!(
            target: "kernel",
            "[vuln] Writing {len} bytes (max: {BUF_LEN}) to kernel buffer."
        );
        let dst = self.data.buffer_region().base;
        // The uncopied count is dropped and `len` reported regardless
        let _uncopied = copy_from_user(buf, len, |offset, chunk| {
            let addr = dst
                .checked_add(offset as u64)
                .ok_or(MemoryError::Unmapped {
                    addr: Addr::MAX,
                    size: chunk.len() as u64,
                    kind: AccessKind::Write,
                })?;
            self.data.store_unchecked(addr, chunk)
        })?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chardev::{Kernel, KernelModule};
    use common::{SanitizerMode, ViolationKind};

    fn kernel(sanitizer: SanitizerMode) -> Kernel {
        Kernel::new(KernelConfig {
            sanitizer,
            ..KernelConfig::default()
        })
    }

    #[test]
    fn test_write_within_buffer() {
        let kernel = kernel(SanitizerMode::Report);
        let module: VulnModule = kernel.insmod().unwrap();
        let mut file = kernel.registry().open(module.major()).unwrap();

        assert_eq!(file.write(&[0x41; 32], 32), Ok(32));
        assert_eq!(module.data().kernel_buffer().unwrap(), vec![0x41; 32]);
        assert!(module.data().violations().is_empty());
    }

    #[test]
    fn test_overflow_reported() {
        let kernel = kernel(SanitizerMode::Report);
        let module: VulnModule = kernel.insmod().unwrap();
        let mut file = kernel.registry().open(module.major()).unwrap();

        assert_eq!(file.write(&[0x41; 1000], 1000), Ok(1000));

        let violations = module.data().violations();
        let first = violations.first().expect("overflow must be reported");
        assert_eq!(first.kind, ViolationKind::BufferOverflow);
        assert_eq!(first.access.addr, module.data().buffer_region().end());
        assert_eq!(
            first.region.as_ref().map(|r| r.name.as_str()),
            Some("kernel_buffer")
        );
        // Bytes well past the buffer were written
        let tail = module.data().peek(module.data().buffer_region().base + 999, 1).unwrap();
        assert_eq!(tail, vec![0x41]);
    }

    #[test]
    fn test_overflow_halts_at_buffer_end() {
        let kernel = kernel(SanitizerMode::Halt);
        let module: VulnModule = kernel.insmod().unwrap();
        let mut file = kernel.registry().open(module.major()).unwrap();

        let err = file.write(&[0x41; 1000], 1000).unwrap_err();
        assert!(matches!(err, KernelError::Oops(MemoryError::Sanitizer(_))));
        assert_eq!(module.data().kernel_buffer().unwrap(), vec![0x41; BUF_LEN]);
        assert_eq!(module.data().load_major().unwrap(), module.major());
    }

    #[test]
    fn test_short_user_buffer_still_reports_len() {
        let kernel = kernel(SanitizerMode::Report);
        let module: VulnModule = kernel.insmod().unwrap();
        let mut file = kernel.registry().open(module.major()).unwrap();

        assert_eq!(file.write(&[7; 4], 16), Ok(16));
        let buffer = module.data().kernel_buffer().unwrap();
        assert_eq!(&buffer[..4], &[7; 4]);
        assert_eq!(&buffer[4..], &[0; BUF_LEN - 4]);
    }

    #[test]
    fn test_past_the_page_oopses() {
        let kernel = kernel(SanitizerMode::Off);
        let module: VulnModule = kernel.insmod().unwrap();
        let mut file = kernel.registry().open(module.major()).unwrap();

        let err = file.write(&vec![0; 5000], 5000).unwrap_err();
        assert!(matches!(err, KernelError::Oops(MemoryError::Unmapped { .. })));
        assert_eq!(<VulnModule as KernelModule>::NAME, "vuln");
    }
}
