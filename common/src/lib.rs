use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address in simulated memory
pub type Addr = u64;

/// Errors raised by simulated memory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("out of memory: requested {requested} bytes, {available} of {capacity} bytes available")]
    Exhausted {
        requested: u64,
        available: u64,
        capacity: u64,
    },
    #[error("{0}")]
    Sanitizer(Violation),
    #[error("segmentation fault: {kind} of {size} bytes at unmapped address {addr:#x}")]
    Unmapped {
        addr: Addr,
        size: u64,
        kind: AccessKind,
    },
    #[error("index {index} out of range for region `{region}` of {len} elements")]
    IndexOutOfRange {
        region: String,
        index: u64,
        len: u64,
    },
    #[error("attempting free on address {addr:#x} which was not allocated")]
    InvalidFree { addr: Addr },
}

/// How instrumented stores react to a bad address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizerMode {
    /// Report the first bad store before it lands and stop
    #[default]
    Halt,
    /// Record every bad store and let it land
    Report,
    /// No instrumentation; bad stores land silently
    Off,
}

impl std::str::FromStr for SanitizerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "halt" => Ok(Self::Halt),
            "report" => Ok(Self::Report),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown sanitizer mode `{other}` (expected halt, report or off)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "READ"),
            AccessKind::Write => write!(f, "WRITE"),
        }
    }
}

/// Where a region lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    /// `malloc`-style allocation
    Heap,
    /// Static storage (module globals)
    Global,
}

/// A single memory access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub addr: Addr,
    pub size: u64,
    pub kind: AccessKind,
}

/// A named span of simulated memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub name: String,
    pub base: Addr,
    pub size: u64,
    pub kind: RegionKind,
    pub is_freed: bool,
}

impl AllocationRecord {
    /// One past the last addressable byte
    pub fn end(&self) -> Addr {
        self.base + self.size
    }

    pub fn contains(&self, addr: Addr, size: u64) -> bool {
        addr >= self.base && addr.saturating_add(size) <= self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    BufferOverflow,
    UseAfterFree,
    /// Access that is not near any known region
    Wild,
}

/// A bad access caught by the sanitizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub access: AccessRecord,
    /// Region the access was attributed to
    pub region: Option<AllocationRecord>,
}

impl Violation {
    /// Distance from the end of the attributed region to the bad access
    pub fn offset_past_end(&self) -> Option<u64> {
        let region = self.region.as_ref()?;
        self.access.addr.checked_sub(region.end())
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.region.as_ref().map(|r| r.kind) {
            Some(RegionKind::Heap) => "heap-",
            Some(RegionKind::Global) => "global-",
            None => "",
        };
        let kind = match self.kind {
            ViolationKind::BufferOverflow => "buffer-overflow",
            ViolationKind::UseAfterFree => "use-after-free",
            ViolationKind::Wild => "wild-access",
        };
        write!(
            f,
            "{prefix}{kind}: {} of size {} at {:#x}",
            self.access.kind, self.access.size, self.access.addr
        )?;
        if let Some(region) = &self.region {
            if self.access.addr >= region.end() {
                write!(
                    f,
                    ", {} bytes after {}-byte region `{}` [{:#x}, {:#x})",
                    self.access.addr - region.end(),
                    region.size,
                    region.name,
                    region.base,
                    region.end()
                )?;
            } else {
                write!(
                    f,
                    ", inside {}-byte region `{}` [{:#x}, {:#x})",
                    region.size,
                    region.name,
                    region.base,
                    region.end()
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_region() -> AllocationRecord {
        AllocationRecord {
            name: "array".to_string(),
            base: 0x1000,
            size: 4,
            kind: RegionKind::Heap,
            is_freed: false,
        }
    }

    #[test]
    fn test_region_contains() {
        let region = heap_region();
        assert!(region.contains(0x1000, 4));
        assert!(!region.contains(0x1000, 5));
        assert!(!region.contains(0x0fff, 1));
        assert!(!region.contains(u64::MAX, 2));
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            kind: ViolationKind::BufferOverflow,
            access: AccessRecord {
                addr: 0x1004,
                size: 4,
                kind: AccessKind::Write,
            },
            region: Some(heap_region()),
        };
        assert_eq!(violation.offset_past_end(), Some(0));
        assert_eq!(
            violation.to_string(),
            "heap-buffer-overflow: WRITE of size 4 at 0x1004, 0 bytes after 4-byte region `array` [0x1000, 0x1004)"
        );
    }

    #[test]
    fn test_sanitizer_mode_parse() {
        assert_eq!("HALT".parse::<SanitizerMode>(), Ok(SanitizerMode::Halt));
        assert_eq!("off".parse::<SanitizerMode>(), Ok(SanitizerMode::Off));
        assert!("loud".parse::<SanitizerMode>().is_err());
    }
}
