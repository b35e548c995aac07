use std::fmt;
use std::io::{BufRead, Write};

use anyhow::Result;
use common::{Addr, MemoryError, Violation};

use super::{checked_total_size, wrapping_total_size, Heap, SizeError, ELEMENT_WIDTH};
use crate::config::HeapConfig;
use crate::input::{scan_u32, InputError};

const PROMPT: &str = "Enter number of integers to allocate: ";

/// How a run of an allocation program ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every element was written and the array freed
    Completed { total_size: u32, written: u32 },
    /// The size check refused the count; nothing was allocated
    OverflowRejected(SizeError),
    AllocationFailed { total_size: u32 },
    /// Standard input held no usable number
    InvalidInput(String),
    /// The sanitizer stopped the write loop at its first bad store
    SanitizerAbort {
        total_size: u32,
        written: u32,
        violation: Violation,
    },
    /// The write loop ran off the end of mapped memory
    Segfault {
        total_size: u32,
        written: u32,
        addr: Addr,
    },
}

impl Outcome {
    /// Process exit status for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed { .. } => 0,
            Outcome::OverflowRejected(_)
            | Outcome::AllocationFailed { .. }
            | Outcome::InvalidInput(_)
            | Outcome::SanitizerAbort { .. } => 1,
            // 128 + SIGSEGV
            Outcome::Segfault { .. } => 139,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed { total_size, written } => {
                write!(f, "wrote {written} elements into {total_size} bytes")
            }
            Outcome::OverflowRejected(err) => write!(f, "rejected: {err}"),
            Outcome::AllocationFailed { total_size } => {
                write!(f, "allocation of {total_size} bytes failed")
            }
            Outcome::InvalidInput(reason) => write!(f, "invalid input: {reason}"),
            Outcome::SanitizerAbort {
                written, violation, ..
            } => write!(f, "ERROR: AddressSanitizer: {violation} (after {written} elements)"),
            Outcome::Segfault { written, addr, .. } => write!(
                f,
                "Segmentation fault at {addr:#x} (after {written} elements)"
            ),
        }
    }
}

/// One process worth of state for the allocation demos
pub struct AllocationProgram {
    heap: Heap,
    progress_interval: u32,
}

impl AllocationProgram {
    pub fn new(config: &HeapConfig) -> Self {
        Self {
            heap: Heap::new(config),
            progress_interval: config.progress_interval,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Prompt, read a count and run the checked path
    pub fn run_checked<R: BufRead, W: Write>(&mut self, input: &mut R, out: &mut W) -> Result<Outcome> {
        match prompt_count(input, out)? {
            Ok(count) => self.allocate_and_fill_checked(count, out),
            Err(outcome) => Ok(outcome),
        }
    }

    /// Prompt, read a count and run the unchecked path
    pub fn run_unchecked<R: BufRead, W: Write>(&mut self, input: &mut R, out: &mut W) -> Result<Outcome> {
        match prompt_count(input, out)? {
            Ok(count) => self.allocate_and_fill_unchecked(count, out),
            Err(outcome) => Ok(outcome),
        }
    }

    fn report_progress<W: Write>(&self, index: u32, out: &mut W) -> Result<()> {
        if self.progress_interval != 0 && index % self.progress_interval == 0 {
            writeln!(out, "Wrote {index} elements...")?;
        }
        Ok(())
    }

    /// Validate the size, allocate exactly that much and fill it through a
    /// bounds-checked view
    pub fn allocate_and_fill_checked<W: Write>(&mut self, count: u32, out: &mut W) -> Result<Outcome> {
        let total_size = match checked_total_size(count, ELEMENT_WIDTH) {
            Ok(size) => size,
            Err(err) => {
                log::warn!("refusing allocation: {err}");
                writeln!(out, "Integer overflow detected! Allocation aborted.")?;
                return Ok(Outcome::OverflowRejected(err));
            }
        };

        writeln!(out, "Allocating {total_size} bytes")?;
        let Some(ptr) = self.heap.malloc(total_size) else {
            writeln!(out, "Memory allocation failed")?;
            return Ok(Outcome::AllocationFailed { total_size });
        };

        let interval = self.progress_interval;
        let mut array = self.heap.int_slice_mut(&ptr)?;
        for i in 0..count {
            array.set(i, i as i32)?;
            if interval != 0 && i % interval == 0 {
                writeln!(out, "Wrote {i} elements...")?;
            }
        }

        writeln!(out, "Memory write completed")?;
        self.heap.free(ptr)?;
        Ok(Outcome::Completed {
            total_size,
            written: count,
        })
    }

    /// Same shape as the checked path, but the size is allowed to wrap and
    /// the writes go through raw address arithmetic
    pub fn allocate_and_fill_unchecked<W: Write>(&mut self, count: u32, out: &mut W) -> Result<Outcome> {
        let total_size = wrapping_total_size(count, ELEMENT_WIDTH);
        if u64::from(total_size) < u64::from(count) * u64::from(ELEMENT_WIDTH) {
            log::debug!("size of {count} elements wrapped to {total_size} bytes");
        }

        writeln!(out, "Allocating {total_size} bytes")?;
        let Some(ptr) = self.heap.malloc(total_size) else {
            writeln!(out, "Memory allocation failed")?;
            return Ok(Outcome::AllocationFailed { total_size });
        };

        let base = ptr.addr();
        for i in 0..count {
            let addr = base + u64::from(i) * u64::from(ELEMENT_WIDTH);
            match self.heap.store_i32_unchecked(addr, i as i32) {
                Ok(()) => {}
                Err(MemoryError::Sanitizer(violation)) => {
                    return Ok(Outcome::SanitizerAbort {
                        total_size,
                        written: i,
                        violation,
                    });
                }
                Err(MemoryError::Unmapped { addr, .. }) => {
                    return Ok(Outcome::Segfault {
                        total_size,
                        written: i,
                        addr,
                    });
                }
                Err(other) => return Err(other.into()),
            }
            self.report_progress(i, out)?;
        }

        writeln!(out, "Memory write completed")?;
        self.heap.free(ptr)?;
        Ok(Outcome::Completed {
            total_size,
            written: count,
        })
    }
}

/// `printf` the prompt and `scanf` the count
fn prompt_count<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<std::result::Result<u32, Outcome>> {
    write!(out, "{PROMPT}")?;
    out.flush()?;
    match scan_u32(input) {
        Ok(count) => Ok(Ok(count)),
        Err(InputError::Io(err)) => Err(err.into()),
        Err(err) => {
            writeln!(out)?;
            Ok(Err(Outcome::InvalidInput(err.to_string())))
        }
    }
}
