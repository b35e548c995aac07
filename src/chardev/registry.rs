use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::errno::{Errno, KernelError};
use super::uaccess::UserSlice;

/// Highest major number accepted by `register_chrdev`
pub const CHRDEV_MAJOR_MAX: u32 = 512;

/// Dynamic majors are handed out top-down from these ranges, in order
const DYNAMIC_MAJORS: [std::ops::RangeInclusive<u32>; 2] = [234..=254, 384..=511];

/// Handlers a character device provides
///
/// Only `write` is required; a device without a read handler answers
/// `EINVAL`.
pub trait FileOperations: Send + Sync {
    fn write(&self, buf: &UserSlice<'_>, len: usize, offset: &mut i64) -> Result<usize, KernelError>;

    fn read(&self, _buf: &mut [u8], _offset: &mut i64) -> Result<usize, KernelError> {
        Err(Errno::Inval.into())
    }
}

struct Registration {
    name: String,
    fops: Arc<dyn FileOperations>,
}

/// Major number table for character devices
#[derive(Default)]
pub struct ChrdevRegistry {
    devices: Mutex<BTreeMap<u32, Registration>>,
}

impl ChrdevRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, BTreeMap<u32, Registration>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `fops` under `major`, or under a free dynamic major when
    /// `major` is 0. Returns the major in use.
    pub fn register_chrdev(
        &self,
        major: u32,
        name: &str,
        fops: Arc<dyn FileOperations>,
    ) -> Result<u32, Errno> {
        let mut devices = self.devices();
        let major = match major {
            0 => DYNAMIC_MAJORS
                .iter()
                .flat_map(|range| range.clone().rev())
                .find(|candidate| !devices.contains_key(candidate))
                .ok_or_else(|| {
                    log::warn!("register_chrdev: no free dynamic major for `{name}`");
                    Errno::Busy
                })?,
            m if m >= CHRDEV_MAJOR_MAX => return Err(Errno::Inval),
            m if devices.contains_key(&m) => return Err(Errno::Busy),
            m => m,
        };
        devices.insert(
            major,
            Registration {
                name: name.to_string(),
                fops,
            },
        );
        log::debug!("registered char device `{name}` at major {major}");
        Ok(major)
    }

    /// Remove the registration for `major` if it belongs to `name`.
    ///
    /// Returns whether anything was removed; a mismatch leaves the table alone.
    pub fn unregister_chrdev(&self, major: u32, name: &str) -> bool {
        let mut devices = self.devices();
        match devices.get(&major) {
            Some(reg) if reg.name == name => {
                devices.remove(&major);
                log::debug!("unregistered char device `{name}` at major {major}");
                true
            }
            _ => {
                log::warn!("unregister_chrdev: no device `{name}` at major {major}");
                false
            }
        }
    }

    /// Name registered under `major`
    pub fn name_of(&self, major: u32) -> Option<String> {
        self.devices().get(&major).map(|reg| reg.name.clone())
    }

    pub fn is_registered(&self, major: u32) -> bool {
        self.devices().contains_key(&major)
    }

    /// Open the device node for `major`
    pub fn open(&self, major: u32) -> Result<OpenFile, Errno> {
        let fops = self
            .devices()
            .get(&major)
            .map(|reg| Arc::clone(&reg.fops))
            .ok_or(Errno::Nxio)?;
        Ok(OpenFile { fops, pos: 0 })
    }
}

/// An open device node
pub struct OpenFile {
    fops: Arc<dyn FileOperations>,
    pos: i64,
}

impl OpenFile {
    /// `write(fd, buf, len)`: `buf` is what the caller has mapped, `len` is
    /// what it claims
    pub fn write(&mut self, buf: &[u8], len: usize) -> Result<usize, KernelError> {
        self.fops.write(&UserSlice::new(buf), len, &mut self.pos)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.fops.read(buf, &mut self.pos)
    }
}
