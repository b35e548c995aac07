//! Corrected write handler.
//!
//! The vulnerable driver never had a fixed counterpart; this one is inferred
//! from what the defect needs: compare `len` with `BUF_LEN` before copying,
//! fail on a short user buffer, report the bytes accepted, and hold the data
//! lock for the whole copy.

use std::str::FromStr;
use std::sync::Arc;

use common::MemoryError;
use serde::{Deserialize, Serialize};

use super::errno::{Errno, KernelError};
use super::module::{Device, DeviceModule, ModuleData};
use super::registry::FileOperations;
use super::uaccess::{copy_from_user, UserSlice};
use super::BUF_LEN;
use crate::config::KernelConfig;

/// What the bounded handler does with a write longer than `BUF_LEN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Accept the first `BUF_LEN` bytes
    #[default]
    Truncate,
    /// Refuse the whole write with `EINVAL`
    Reject,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown overflow policy `{other}` (expected truncate or reject)")),
        }
    }
}

pub struct BoundedDevice {
    data: Arc<ModuleData>,
    policy: OverflowPolicy,
}

pub type BoundedModule = DeviceModule<BoundedDevice>;

impl Device for BoundedDevice {
    const NAME: &'static str = "bounded";

    fn create(data: Arc<ModuleData>, config: &KernelConfig) -> Self {
        Self {
            data,
            policy: config.overflow_policy,
        }
    }
}

impl FileOperations for BoundedDevice {
    fn write(&self, buf: &UserSlice<'_>, len: usize, _offset: &mut i64) -> Result<usize, KernelError> {
        let accepted = match self.policy {
            OverflowPolicy::Reject if len > BUF_LEN => {
                log::warn!(
                    target: "kernel",
                    "[bounded] Rejecting {len} byte write (max: {BUF_LEN})."
                );
                return Err(Errno::Inval.into());
            }
            _ => len.min(BUF_LEN),
        };
        log::info!(
            target: "kernel",
            "[bounded] Writing {accepted} of {len} bytes (max: {BUF_LEN}) to kernel buffer."
        );

        let region = self.data.buffer_region();
        let mut memory = self.data.lock();
        let dst = memory.region_slice_mut(region)?;
        let uncopied = copy_from_user(buf, accepted, |offset, chunk| {
            dst.get_mut(offset..offset + chunk.len())
                .ok_or_else(|| MemoryError::IndexOutOfRange {
                    region: region.name.clone(),
                    index: (offset + chunk.len()) as u64,
                    len: region.size,
                })?
                .copy_from_slice(chunk);
            Ok(())
        })?;
        if uncopied != 0 {
            return Err(Errno::Fault.into());
        }
        Ok(accepted)
    }
}
