//! CPU: MMU with TLB and page cache, plus the instruction cycle.

pub mod cache;
pub mod config;
pub mod cycle;
pub mod instruction;
pub mod links;
pub mod mmu;
pub mod tlb;

use std::fmt;

use sim_common::ConfigError;
use sim_protocol::ProtocolError;

pub use cache::PageCache;
pub use config::CpuConfig;
pub use cycle::{Cpu, CycleEnd, InterruptLatch, KernelLink};
pub use instruction::{decode, Instruction};
pub use mmu::{MemoryPort, Mmu};
pub use tlb::{Replacement, Tlb, TlbEntry};

/// Errors produced by address translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmuError {
    /// No mapping exists for the page; `level` is where the walk stopped
    /// (0 when the address range itself overflows).
    SegFault { page: u32, level: u32 },
    /// Memoria refused the access to a translated physical address.
    Rejected { address: u32 },
    /// The Memoria link failed.
    Link(ProtocolError),
}

impl MmuError {
    /// Returns a stable, human-readable error label.
    pub fn as_str(&self) -> &'static str {
        match self {
            MmuError::SegFault { .. } => "segmentation fault",
            MmuError::Rejected { .. } => "access rejected",
            MmuError::Link(_) => "memory link failed",
        }
    }
}

impl From<ProtocolError> for MmuError {
    fn from(err: ProtocolError) -> Self {
        MmuError::Link(err)
    }
}

impl fmt::Display for MmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmuError::SegFault { page, level } => {
                write!(f, "{} (page {}, level {})", self.as_str(), page, level)
            }
            MmuError::Rejected { address } => {
                write!(f, "{} (physical address {})", self.as_str(), address)
            }
            MmuError::Link(err) => write!(f, "{}: {}", self.as_str(), err),
        }
    }
}

impl std::error::Error for MmuError {}

/// Errors that stop a CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    Protocol(ProtocolError),
    Config(ConfigError),
}

impl CpuError {
    /// Returns a stable, human-readable error label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuError::Protocol(_) => "protocol error",
            CpuError::Config(_) => "config error",
        }
    }
}

impl From<ProtocolError> for CpuError {
    fn from(err: ProtocolError) -> Self {
        CpuError::Protocol(err)
    }
}

impl From<ConfigError> for CpuError {
    fn from(err: ConfigError) -> Self {
        CpuError::Config(err)
    }
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuError::Protocol(err) => write!(f, "{}: {}", self.as_str(), err),
            CpuError::Config(err) => write!(f, "{}: {}", self.as_str(), err),
        }
    }
}

impl std::error::Error for CpuError {}
