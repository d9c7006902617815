//! Types and plumbing shared by the Kernel, CPU, Memoria and I/O services.

pub mod clock;
pub mod config;
pub mod logging;
pub mod paging;

pub use clock::milliseconds;
pub use config::{ConfigError, ConfigFile};
pub use paging::PagingGeometry;

/// Process identifier, assigned by the Kernel and used as the only key shared
/// across services.
pub type Pid = u32;

/// Byte offset inside Memoria's simulated RAM.
pub type PhysAddr = u32;

/// Byte offset inside a process's logical address space.
pub type LogicalAddr = u32;

/// Simulator service a binary runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Kernel,
    Cpu,
    Memoria,
    Io,
}

impl Module {
    /// Returns the upper-case module label used in logs and config names.
    pub fn as_str(self) -> &'static str {
        match self {
            Module::Kernel => "KERNEL",
            Module::Cpu => "CPU",
            Module::Memoria => "MEMORIA",
            Module::Io => "IO",
        }
    }

    /// Returns the config file a module reads when none is given.
    pub fn default_config_file(self) -> String {
        format!("{}.config", self.as_str().to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_labels_are_stable() {
        assert_eq!(Module::Kernel.as_str(), "KERNEL");
        assert_eq!(Module::Cpu.as_str(), "CPU");
        assert_eq!(Module::Memoria.as_str(), "MEMORIA");
        assert_eq!(Module::Io.as_str(), "IO");
    }

    #[test]
    fn default_config_file_is_lower_case() {
        assert_eq!(Module::Memoria.default_config_file(), "memoria.config");
        assert_eq!(Module::Io.default_config_file(), "io.config");
    }
}
