//! Memoria: simulated RAM, frame allocation and per-process page tables.

pub mod config;
pub mod frames;
pub mod manager;
pub mod page_table;
pub mod process;
pub mod server;

use std::fmt;

use sim_common::Pid;

pub use config::MemoriaConfig;
pub use frames::FrameBitmap;
pub use manager::{MemoryManager, EXIT_INSTRUCTION};
pub use page_table::{PageTableTree, TableEntries, TableRef};
pub use process::{ProcessMetrics, ProcessRecord};

/// Errors reported by the memory manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Not enough free frames for the requested size.
    AllocationFailed { needed: u32, free: u32 },
    /// No record exists for the pid.
    NotFound(Pid),
    /// A record already exists for the pid.
    AlreadyLoaded(Pid),
    /// The pseudocode file could not be read.
    InstructionsUnreadable(String),
    /// The address or page lies outside what Memoria manages.
    OutOfRange,
    /// The dump file could not be written.
    DumpFailed(String),
}

impl MemoryError {
    /// Returns a stable, human-readable error label.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryError::AllocationFailed { .. } => "allocation failed",
            MemoryError::NotFound(_) => "process not found",
            MemoryError::AlreadyLoaded(_) => "process already loaded",
            MemoryError::InstructionsUnreadable(_) => "instructions unreadable",
            MemoryError::OutOfRange => "out of range",
            MemoryError::DumpFailed(_) => "dump failed",
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed { needed, free } => {
                write!(f, "{}: needs {} pages, {} free", self.as_str(), needed, free)
            }
            MemoryError::NotFound(pid) | MemoryError::AlreadyLoaded(pid) => {
                write!(f, "{}: {}", self.as_str(), pid)
            }
            MemoryError::InstructionsUnreadable(path) | MemoryError::DumpFailed(path) => {
                write!(f, "{}: {}", self.as_str(), path)
            }
            MemoryError::OutOfRange => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for MemoryError {}
