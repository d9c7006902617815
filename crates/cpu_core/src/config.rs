use std::time::Duration;

use log::LevelFilter;
use sim_common::logging::level_from_config;
use sim_common::{ConfigError, ConfigFile};

use crate::tlb::Replacement;

/// CPU settings read from its config file.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuConfig {
    pub memoria_ip: String,
    pub memoria_port: u16,
    pub kernel_ip: String,
    pub kernel_dispatch_port: u16,
    pub kernel_interrupt_port: u16,
    pub tlb_entries: usize,
    pub tlb_replacement: Replacement,
    pub cache_entries: usize,
    pub cache_replacement: Replacement,
    pub cache_delay: Duration,
    pub log_level: LevelFilter,
}

fn replacement(config: &ConfigFile, key: &str) -> Result<Replacement, ConfigError> {
    if !config.contains(key) {
        return Ok(Replacement::Fifo);
    }
    let value = config.get_str(key)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl CpuConfig {
    /// Builds the settings from a parsed config file.
    pub fn from_file(config: &ConfigFile) -> Result<Self, ConfigError> {
        Ok(Self {
            memoria_ip: config.get("IP_MEMORIA")?,
            memoria_port: config.get("PUERTO_MEMORIA")?,
            kernel_ip: config.get("IP_KERNEL")?,
            kernel_dispatch_port: config.get("PUERTO_KERNEL_DISPATCH")?,
            kernel_interrupt_port: config.get("PUERTO_KERNEL_INTERRUPT")?,
            tlb_entries: config.get_or("ENTRADAS_TLB", 0)?,
            tlb_replacement: replacement(config, "REEMPLAZO_TLB")?,
            cache_entries: config.get_or("ENTRADAS_CACHE", 0)?,
            cache_replacement: replacement(config, "REEMPLAZO_CACHE")?,
            cache_delay: Duration::from_millis(config.get_or("RETARDO_CACHE", 0)?),
            log_level: level_from_config(config)?,
        })
    }
}
