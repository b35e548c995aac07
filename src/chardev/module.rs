use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{Addr, AllocationRecord, MemoryError, RegionKind, SanitizerMode, Violation};
use shadow::{ShadowMemory, PAGE_SIZE};

use super::errno::{Errno, KernelError};
use super::registry::{ChrdevRegistry, FileOperations};
use super::BUF_LEN;
use crate::config::KernelConfig;

/// Start of the area module data is placed in
pub const MODULE_AREA_BASE: Addr = 0xffff_ffff_c000_0000;

/// Length of the module area; it ends at `0xffff_ffff_ff00_0000`
pub const MODULE_AREA_SIZE: u64 = 0x3f00_0000;

/// Page-sized slots handed out to loaded modules, reused round robin
const MODULE_SLOTS: u64 = MODULE_AREA_SIZE / PAGE_SIZE;

/// Padding KASAN puts after each instrumented global
pub const KASAN_GLOBAL_REDZONE: u64 = 32;

/// A module's static data: `kernel_buffer` followed by `major`.
///
/// Without instrumentation the two globals sit back to back, so running
/// off the end of the buffer lands in `major`.
pub struct ModuleData {
    memory: Mutex<ShadowMemory>,
    kernel_buffer: AllocationRecord,
    major: AllocationRecord,
}

impl ModuleData {
    pub fn new(module: &str, base: Addr, sanitizer: SanitizerMode) -> Result<Self, MemoryError> {
        let redzone = match sanitizer {
            SanitizerMode::Off => 0,
            _ => KASAN_GLOBAL_REDZONE,
        };
        let mut memory = ShadowMemory::new(
            format!("{module}.bss"),
            RegionKind::Global,
            base,
            PAGE_SIZE,
            redzone,
            sanitizer,
        );
        let kernel_buffer = memory.reserve("kernel_buffer", BUF_LEN as u64)?;
        let major = memory.reserve("major", 4)?;
        Ok(Self {
            memory: Mutex::new(memory),
            kernel_buffer,
            major,
        })
    }

    /// Exclusive access to the whole data segment
    pub fn lock(&self) -> MutexGuard<'_, ShadowMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn buffer_region(&self) -> &AllocationRecord {
        &self.kernel_buffer
    }

    pub fn major_region(&self) -> &AllocationRecord {
        &self.major
    }

    /// Snapshot of `kernel_buffer`
    pub fn kernel_buffer(&self) -> Result<Vec<u8>, MemoryError> {
        Ok(self.lock().region_slice(&self.kernel_buffer)?.to_vec())
    }

    pub fn store_major(&self, major: u32) -> Result<(), MemoryError> {
        let mut memory = self.lock();
        memory
            .region_slice_mut(&self.major)?
            .copy_from_slice(&major.to_le_bytes());
        Ok(())
    }

    /// Current contents of the `major` global
    pub fn load_major(&self) -> Result<u32, MemoryError> {
        let memory = self.lock();
        let bytes = memory.region_slice(&self.major)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Raw store; takes the lock for this store only
    pub fn store_unchecked(&self, addr: Addr, data: &[u8]) -> Result<(), MemoryError> {
        self.lock().store_unchecked(addr, data)
    }

    pub fn peek(&self, addr: Addr, len: u64) -> Result<Vec<u8>, MemoryError> {
        Ok(self.lock().peek(addr, len)?.to_vec())
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.lock().violations().to_vec()
    }
}

/// Registration state of a module's device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Registered,
    Unregistered,
}

/// Load and unload hooks
pub trait KernelModule: Sized {
    const NAME: &'static str;

    fn init(kernel: &Kernel) -> Result<Self, KernelError>;

    fn exit(&mut self, kernel: &Kernel);
}

/// The pieces of a kernel the device modules need
pub struct Kernel {
    config: KernelConfig,
    registry: ChrdevRegistry,
    loaded: Mutex<BTreeSet<&'static str>>,
    next_module_slot: AtomicU64,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            registry: ChrdevRegistry::new(),
            loaded: Mutex::new(BTreeSet::new()),
            next_module_slot: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChrdevRegistry {
        &self.registry
    }

    fn loaded(&self) -> MutexGuard<'_, BTreeSet<&'static str>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh, zeroed static data for a module being loaded
    pub fn alloc_module_data(&self, module: &str) -> Result<ModuleData, MemoryError> {
        let slot = self.next_module_slot.fetch_add(1, Ordering::Relaxed) % MODULE_SLOTS;
        ModuleData::new(module, MODULE_AREA_BASE + slot * PAGE_SIZE, self.config.sanitizer)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded().contains(name)
    }

    pub fn insmod<M: KernelModule>(&self) -> Result<M, KernelError> {
        if !self.loaded().insert(M::NAME) {
            return Err(Errno::Exist.into());
        }
        M::init(self).inspect_err(|err| {
            log::error!(target: "kernel", "{}: init failed: {err}", M::NAME);
            self.loaded().remove(M::NAME);
        })
    }

    pub fn rmmod<M: KernelModule>(&self, module: &mut M) {
        if self.loaded().remove(M::NAME) {
            module.exit(self);
        } else {
            log::warn!(target: "kernel", "{}: not loaded", M::NAME);
        }
    }
}

/// A character device driver built on a module's static data
pub trait Device: FileOperations + Sized + 'static {
    /// Module and device name
    const NAME: &'static str;

    fn create(data: Arc<ModuleData>, config: &KernelConfig) -> Self;
}

/// Module that registers one [`Device`] on load and unregisters it on unload
pub struct DeviceModule<D> {
    data: Arc<ModuleData>,
    registered_major: u32,
    state: DeviceState,
    _device: PhantomData<D>,
}

impl<D: Device> DeviceModule<D> {
    pub fn data(&self) -> &Arc<ModuleData> {
        &self.data
    }

    /// Major handed out by the registry at load time
    pub fn major(&self) -> u32 {
        self.registered_major
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }
}

impl<D: Device> KernelModule for DeviceModule<D> {
    const NAME: &'static str = D::NAME;

    fn init(kernel: &Kernel) -> Result<Self, KernelError> {
        let data = Arc::new(kernel.alloc_module_data(D::NAME)?);
        let fops: Arc<dyn FileOperations> = Arc::new(D::create(Arc::clone(&data), kernel.config()));
        let major = kernel.registry().register_chrdev(0, D::NAME, fops)?;
        data.store_major(major)?;

        log::info!(target: "kernel", "[{}] Module loaded. Major number: {major}", D::NAME);
        Ok(Self {
            data,
            registered_major: major,
            state: DeviceState::Registered,
            _device: PhantomData,
        })
    }

    fn exit(&mut self, kernel: &Kernel) {
        if self.state == DeviceState::Unregistered {
            return;
        }
        // The global is read back, so a corrupted value unregisters the wrong major
        let major = match self.data.load_major() {
            Ok(major) => major,
            Err(err) => {
                log::error!(target: "kernel", "[{}] cannot read major: {err}", D::NAME);
                self.registered_major
            }
        };
        if major != self.registered_major {
            log::warn!(
                target: "kernel",
                "[{}] major global reads {major:#x}, device was registered at {}",
                D::NAME,
                self.registered_major
            );
        }
        kernel.registry().unregister_chrdev(major, D::NAME);
        self.state = DeviceState::Unregistered;
        log::info!(target: "kernel", "[{}] Module unloaded.", D::NAME);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chardev::VulnModule;

    #[test]
    fn test_layout_without_kasan_is_packed() {
        let data = ModuleData::new("m", MODULE_AREA_BASE, SanitizerMode::Off).unwrap();
        assert_eq!(data.buffer_region().base, MODULE_AREA_BASE);
        assert_eq!(data.major_region().base, MODULE_AREA_BASE + BUF_LEN as u64);
    }

    #[test]
    fn test_layout_with_kasan_has_redzone() {
        let data = ModuleData::new("m", MODULE_AREA_BASE, SanitizerMode::Report).unwrap();
        assert_eq!(
            data.major_region().base,
            MODULE_AREA_BASE + BUF_LEN as u64 + KASAN_GLOBAL_REDZONE
        );
    }

    #[test]
    fn test_major_round_trip_and_zeroed_buffer() {
        let data = ModuleData::new("m", MODULE_AREA_BASE, SanitizerMode::Halt).unwrap();
        assert_eq!(data.kernel_buffer().unwrap(), vec![0u8; BUF_LEN]);
        data.store_major(254).unwrap();
        assert_eq!(data.load_major().unwrap(), 254);
    }

    #[test]
    fn test_module_data_gets_distinct_pages() {
        let kernel = Kernel::new(KernelConfig::default());
        let a = kernel.alloc_module_data("a").unwrap();
        let b = kernel.alloc_module_data("b").unwrap();
        assert_eq!(b.buffer_region().base - a.buffer_region().base, PAGE_SIZE);
    }

    #[test]
    fn test_module_area_wraps() {
        let kernel = Kernel::new(KernelConfig::default());
        kernel.next_module_slot.store(MODULE_SLOTS - 1, Ordering::Relaxed);

        let last = kernel.alloc_module_data("last").unwrap();
        assert_eq!(
            last.buffer_region().base,
            MODULE_AREA_BASE + MODULE_AREA_SIZE - PAGE_SIZE
        );
        let next = kernel.alloc_module_data("next").unwrap();
        assert_eq!(next.buffer_region().base, MODULE_AREA_BASE);
    }

    #[test]
    fn test_long_write_in_last_slot_oopses() {
        let kernel = Kernel::new(KernelConfig {
            sanitizer: SanitizerMode::Off,
            ..KernelConfig::default()
        });
        kernel.next_module_slot.store(MODULE_SLOTS - 1, Ordering::Relaxed);
        let module: VulnModule = kernel.insmod().unwrap();
        let mut file = kernel.registry().open(module.major()).unwrap();

        let err = file.write(&[0x41; 5000], 5000).unwrap_err();
        assert!(matches!(err, KernelError::Oops(MemoryError::Unmapped { .. })));
    }

    #[test]
    fn test_data_at_top_of_address_space_is_refused() {
        let top = Addr::MAX & !(PAGE_SIZE - 1);
        assert!(matches!(
            ModuleData::new("m", top, SanitizerMode::Off),
            Err(MemoryError::Exhausted { .. })
        ));
    }
}
