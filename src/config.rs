// Configuration for overflow-lab
//
// Heap and kernel settings shared by the three demonstration binaries.
// Values come from defaults, an optional JSON file, then command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::chardev::OverflowPolicy;
use common::SanitizerMode;

/// Settings for the user-space heap the allocation demos run on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Largest number of bytes the heap will hand out
    pub capacity: u64,
    /// Poisoned bytes placed after every allocation
    pub redzone: u64,
    /// What happens when a store lands outside its allocation
    pub sanitizer: SanitizerMode,
    /// Print a progress line every this many elements
    pub progress_interval: u32,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
            redzone: 16,
            sanitizer: SanitizerMode::Halt,
            progress_interval: 100_000_000,
        }
    }
}

/// Settings for the simulated kernel the device demos run in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// KASAN-style instrumentation of module globals.
    ///
    /// With `off` the globals are packed back to back; otherwise each one is
    /// followed by a redzone.
    pub sanitizer: SanitizerMode,
    /// How the bounded device treats writes longer than its buffer
    pub overflow_policy: OverflowPolicy,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            sanitizer: SanitizerMode::Report,
            overflow_policy: OverflowPolicy::Truncate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub heap: HeapConfig,
    pub kernel: KernelConfig,
}

/// Configuration manager for overflow-lab
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<LabConfig> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_json::from_str(&config_str)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(config: &LabConfig, path: P) -> Result<()> {
        let config_str = serde_json::to_string_pretty(config)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Defaults, or the file's contents when a path is given
    pub fn load_or_default(path: Option<&Path>) -> Result<LabConfig> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(LabConfig::default()),
        }
    }

    /// Create a builder for configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for creating configurations
#[derive(Default)]
pub struct ConfigBuilder {
    config: LabConfig,
}

impl ConfigBuilder {
    /// Start from an existing configuration
    pub fn from_config(config: LabConfig) -> Self {
        Self { config }
    }

    pub fn heap_capacity(mut self, value: u64) -> Self {
        self.config.heap.capacity = value;
        self
    }

    pub fn heap_redzone(mut self, value: u64) -> Self {
        self.config.heap.redzone = value;
        self
    }

    pub fn heap_sanitizer(mut self, value: SanitizerMode) -> Self {
        self.config.heap.sanitizer = value;
        self
    }

    pub fn progress_interval(mut self, value: u32) -> Self {
        self.config.heap.progress_interval = value;
        self
    }

    pub fn kernel_sanitizer(mut self, value: SanitizerMode) -> Self {
        self.config.kernel.sanitizer = value;
        self
    }

    pub fn overflow_policy(mut self, value: OverflowPolicy) -> Self {
        self.config.kernel.overflow_policy = value;
        self
    }

    /// Build the configuration
    pub fn build(self) -> LabConfig {
        self.config
    }
}
