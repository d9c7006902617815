//! I/O device service: serves "busy for N ms" requests from the Kernel.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn, LevelFilter};
use sim_common::logging::level_from_config;
use sim_common::{milliseconds, ConfigError, ConfigFile};
use sim_protocol::{Connection, Message, ProtocolError};

/// I/O device settings read from its config file.
#[derive(Debug, Clone, PartialEq)]
pub struct IoConfig {
    pub kernel_ip: String,
    pub kernel_port: u16,
    pub log_level: LevelFilter,
}

impl IoConfig {
    /// Builds the settings from a parsed config file.
    pub fn from_file(config: &ConfigFile) -> Result<Self, ConfigError> {
        Ok(Self {
            kernel_ip: config.get("IP_KERNEL")?,
            kernel_port: config.get("PUERTO_KERNEL")?,
            log_level: level_from_config(config)?,
        })
    }
}

/// One physical instance of a named device.
pub struct Device<F> {
    name: String,
    busy: F,
    served: u64,
}

impl Device<fn(Duration)> {
    /// Creates a device that really sleeps for each request.
    pub fn new(name: &str) -> Self {
        Self::with_busy(name, thread::sleep)
    }
}

impl<F: FnMut(Duration)> Device<F> {
    /// Creates a device that spends each request in `busy`.
    pub fn with_busy(name: &str, busy: F) -> Self {
        Self {
            name: name.to_string(),
            busy,
            served: 0,
        }
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns how many requests were completed.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Answers use requests until the Kernel closes the link.
    pub fn serve<S: Read + Write>(&mut self, conn: &mut Connection<S>) -> Result<(), ProtocolError> {
        while let Some(message) = conn.recv()? {
            match message {
                Message::IoUseRequest { pid, duration_ms } => {
                    info!("## PID: {} - IO started - Time: {}", pid, duration_ms);
                    let started = milliseconds();
                    (self.busy)(Duration::from_millis(u64::from(duration_ms)));
                    info!("## PID: {} - IO finished", pid);
                    debug!(
                        "{}: PID {} took {} ms",
                        self.name,
                        pid,
                        milliseconds().saturating_sub(started)
                    );
                    conn.send(&Message::IoCompleted { pid })?;
                    self.served += 1;
                }
                other => warn!("{}: ignoring {:?}", self.name, other.op_code()),
            }
        }
        info!("{}: Kernel closed the link", self.name);
        Ok(())
    }
}
