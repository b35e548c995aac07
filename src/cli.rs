//! Command-line plumbing shared by the demonstration binaries.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use common::SanitizerMode;

use crate::allocation::{AllocationProgram, Outcome};
use crate::chardev::{Device, DeviceModule, Kernel, KernelError, OverflowPolicy};
use crate::config::{ConfigBuilder, ConfigManager, LabConfig};

/// Flags every binary accepts
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sanitizer behaviour: halt, report or off
    #[arg(short, long)]
    pub sanitizer: Option<SanitizerMode>,
}

impl CommonArgs {
    pub fn base_config(&self) -> Result<LabConfig> {
        ConfigManager::load_or_default(self.config.as_deref())
    }
}

/// Flags for the two allocation binaries
#[derive(Args, Debug, Clone, Default)]
pub struct AllocationArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Heap size in bytes
    #[arg(long)]
    pub heap_capacity: Option<u64>,
}

impl AllocationArgs {
    pub fn load_config(&self) -> Result<LabConfig> {
        let mut builder = ConfigBuilder::from_config(self.common.base_config()?);
        if let Some(mode) = self.common.sanitizer {
            builder = builder.heap_sanitizer(mode);
        }
        if let Some(capacity) = self.heap_capacity {
            builder = builder.heap_capacity(capacity);
        }
        Ok(builder.build())
    }
}

/// Which allocation path a binary runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    Checked,
    Unchecked,
}

/// Body of `int_overflow_safe` / `int_overflow_vuln`
pub fn run_allocation<R: BufRead, W: Write>(
    check: SizeCheck,
    config: &LabConfig,
    input: &mut R,
    out: &mut W,
) -> Result<Outcome> {
    let mut program = AllocationProgram::new(&config.heap);
    let outcome = match check {
        SizeCheck::Checked => program.run_checked(input, out)?,
        SizeCheck::Unchecked => program.run_unchecked(input, out)?,
    };
    out.flush()?;

    let violations = program.heap().memory().violations();
    if !violations.is_empty() {
        log::warn!("{} out-of-bounds stores recorded", violations.len());
    }
    match &outcome {
        Outcome::SanitizerAbort { .. } | Outcome::Segfault { .. } | Outcome::InvalidInput(_) => {
            eprintln!("{outcome}");
        }
        _ => log::debug!("{outcome}"),
    }
    Ok(outcome)
}

/// Map a status code onto a process exit code
pub fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(u8::try_from(status).unwrap_or(1))
}

/// Flags for the device binary
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Overlong-write handling for the bounded device: truncate or reject
    #[arg(long)]
    pub policy: Option<OverflowPolicy>,
}

impl DeviceArgs {
    pub fn load_config(&self) -> Result<LabConfig> {
        let mut builder = ConfigBuilder::from_config(self.common.base_config()?);
        if let Some(mode) = self.common.sanitizer {
            builder = builder.kernel_sanitizer(mode);
        }
        if let Some(policy) = self.policy {
            builder = builder.overflow_policy(policy);
        }
        Ok(builder.build())
    }
}

/// Load the module for `D`, write `len` bytes of `fill` to its device,
/// dump the module's globals and unload it. Returns the exit status.
pub fn run_device_write<D: Device, W: Write>(
    kernel: &Kernel,
    len: usize,
    fill: u8,
    out: &mut W,
) -> Result<i32> {
    let mut module: DeviceModule<D> = kernel.insmod()?;
    let major = module.major();
    writeln!(out, "loaded `{}`, major {major}", D::NAME)?;

    let payload = vec![fill; len];
    let mut file = kernel.registry().open(major)?;
    let status = match file.write(&payload, len) {
        Ok(written) => {
            writeln!(out, "write({len}) returned {written}")?;
            0
        }
        Err(KernelError::Errno(errno)) => {
            writeln!(out, "write({len}) failed: {errno}")?;
            1
        }
        Err(KernelError::Oops(err)) => {
            writeln!(out, "write({len}) oopsed: {err}")?;
            139
        }
    };

    let data = module.data();
    writeln!(out, "kernel_buffer: {}", hex(&data.kernel_buffer()?))?;
    let stored_major = data.load_major()?;
    writeln!(out, "major global:  {stored_major:#010x} (registered {major})")?;
    for violation in data.violations().iter().take(4) {
        writeln!(out, "KASAN: {violation}")?;
    }

    kernel.rmmod(&mut module);
    if kernel.registry().is_registered(major) {
        writeln!(out, "device still registered at major {major} after unload")?;
    }
    out.flush()?;
    Ok(status)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}
