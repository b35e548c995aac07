//! Minimal, self-contained demonstrations of two memory-safety defect classes,
//! each paired with its corrected form:
//!
//! - [`allocation`]: an element count multiplied into a 32-bit size without
//!   (and with) an overflow check, then filled element by element.
//! - [`chardev`]: a character-device write handler that copies a
//!   caller-chosen length into a 32-byte module buffer without (and with) a
//!   bounds check.
//!
//! All memory involved is simulated by the `shadow` crate, so the unchecked
//! paths really write out of bounds and the damage can be inspected.

pub mod allocation;
pub mod chardev;
pub mod cli;
pub mod config;
pub mod input;

pub use config::{ConfigBuilder, ConfigManager, HeapConfig, KernelConfig, LabConfig};
