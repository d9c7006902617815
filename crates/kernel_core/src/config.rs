use std::str::FromStr;

use log::LevelFilter;
use sim_common::logging::level_from_config;
use sim_common::{ConfigError, ConfigFile};

/// Long-term policy deciding which waiting process is loaded next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    Fifo,
    /// Smallest process first.
    Pmcp,
}

impl FromStr for AdmissionPolicy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(AdmissionPolicy::Fifo),
            "PMCP" => Ok(AdmissionPolicy::Pmcp),
            _ => Err(()),
        }
    }
}

/// Short-term policy ordering READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    Fifo,
    Sjf,
    Srt,
}

impl DispatchPolicy {
    /// Returns true if READY is ordered by remaining burst estimate.
    pub fn orders_by_burst(self) -> bool {
        self != DispatchPolicy::Fifo
    }
}

impl FromStr for DispatchPolicy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(DispatchPolicy::Fifo),
            "SJF" => Ok(DispatchPolicy::Sjf),
            "SRT" => Ok(DispatchPolicy::Srt),
            _ => Err(()),
        }
    }
}

/// Scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub admission: AdmissionPolicy,
    pub dispatch: DispatchPolicy,
    pub alpha: f64,
    pub initial_estimate: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionPolicy::Fifo,
            dispatch: DispatchPolicy::Fifo,
            alpha: 0.5,
            initial_estimate: 10_000.0,
        }
    }
}

/// Kernel settings read from its config file.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    pub memoria_ip: String,
    pub memoria_port: u16,
    pub dispatch_port: u16,
    pub interrupt_port: u16,
    pub io_port: u16,
    pub scheduler: SchedulerConfig,
    pub suspension_ms: u64,
    pub log_level: LevelFilter,
}

fn policy<T: FromStr>(config: &ConfigFile, key: &str) -> Result<T, ConfigError> {
    let value = config.get_str(key)?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl KernelConfig {
    /// Builds the settings from a parsed config file.
    pub fn from_file(config: &ConfigFile) -> Result<Self, ConfigError> {
        let alpha: f64 = config.get("ALFA")?;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::InvalidValue {
                key: "ALFA".to_string(),
                value: alpha.to_string(),
            });
        }
        Ok(Self {
            memoria_ip: config.get("IP_MEMORIA")?,
            memoria_port: config.get("PUERTO_MEMORIA")?,
            dispatch_port: config.get("PUERTO_ESCUCHA_DISPATCH")?,
            interrupt_port: config.get("PUERTO_ESCUCHA_INTERRUPT")?,
            io_port: config.get("PUERTO_ESCUCHA_IO")?,
            scheduler: SchedulerConfig {
                admission: policy(config, "ALGORITMO_INGRESO_A_READY")?,
                dispatch: policy(config, "ALGORITMO_CORTO_PLAZO")?,
                alpha,
                initial_estimate: config.get("ESTIMACION_INICIAL")?,
            },
            suspension_ms: config.get_or("TIEMPO_SUSPENSION", 0)?,
            log_level: level_from_config(config)?,
        })
    }
}
