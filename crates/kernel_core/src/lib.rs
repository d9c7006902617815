//! Kernel: process table, CPU and I/O registries, and the scheduler that
//! drives them.

pub mod config;
pub mod cpus;
pub mod io;
pub mod process;
pub mod runtime;
pub mod scheduler;
pub mod table;

use std::fmt;

use sim_common::ConfigError;
use sim_protocol::ProtocolError;

pub use config::{AdmissionPolicy, DispatchPolicy, KernelConfig, SchedulerConfig};
pub use cpus::{CpuLink, CpuRegistry, CpuSlot};
pub use io::{InstanceId, IoDevice, IoRegistry, IoRequest, Submission};
pub use process::{BurstEstimate, Pcb, ProcessState, StateMetrics};
pub use runtime::KernelRuntime;
pub use scheduler::{KernelEvent, KernelPort, Scheduler};
pub use table::ProcessTable;

/// Errors that stop the Kernel service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    Config(ConfigError),
    Protocol(ProtocolError),
    /// The event loop is gone.
    Stopped,
}

impl SchedulerError {
    /// Returns a stable, human-readable error label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerError::Config(_) => "config error",
            SchedulerError::Protocol(_) => "protocol error",
            SchedulerError::Stopped => "scheduler stopped",
        }
    }
}

impl From<ConfigError> for SchedulerError {
    fn from(err: ConfigError) -> Self {
        SchedulerError::Config(err)
    }
}

impl From<ProtocolError> for SchedulerError {
    fn from(err: ProtocolError) -> Self {
        SchedulerError::Protocol(err)
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Config(err) => write!(f, "{}: {}", self.as_str(), err),
            SchedulerError::Protocol(err) => write!(f, "{}: {}", self.as_str(), err),
            SchedulerError::Stopped => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_labels_are_stable() {
        assert_eq!(SchedulerError::Stopped.as_str(), "scheduler stopped");
        assert_eq!(
            SchedulerError::from(ProtocolError::Closed).as_str(),
            "protocol error"
        );
        assert_eq!(
            SchedulerError::from(ConfigError::MissingKey("ALFA".into())).to_string(),
            format!("config error: {}", ConfigError::MissingKey("ALFA".into()))
        );
    }
}
