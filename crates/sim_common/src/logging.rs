use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

use crate::clock::milliseconds;
use crate::config::{ConfigError, ConfigFile};
use crate::Module;

/// `log` backend writing one line per record to stderr and an optional file.
pub struct SimLogger {
    module: Module,
    level: LevelFilter,
    file: Mutex<Option<File>>,
}

impl SimLogger {
    /// Creates a logger for `module` that drops records above `level`.
    pub fn new(module: Module, level: LevelFilter, file: Option<File>) -> Self {
        Self {
            module,
            level,
            file: Mutex::new(file),
        }
    }

    /// Formats a record line.
    pub fn format_line(&self, level: Level, message: &str) -> String {
        format!(
            "[{}] [{}] [{}] {}",
            level_label(level),
            self.module.as_str(),
            milliseconds(),
            message
        )
    }
}

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.format_line(record.level(), &record.args().to_string());
        let mut file = self.file.lock();
        eprintln!("{line}");
        if let Some(file) = file.as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.flush();
        }
    }
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Parses a `LOG_LEVEL` value. Accepts `WARNING` as well as `WARN`.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::Trace),
        "DEBUG" => Some(LevelFilter::Debug),
        "INFO" => Some(LevelFilter::Info),
        "WARN" | "WARNING" => Some(LevelFilter::Warn),
        "ERROR" => Some(LevelFilter::Error),
        "OFF" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// Reads `LOG_LEVEL` from a service config, defaulting to INFO.
pub fn level_from_config(config: &ConfigFile) -> Result<LevelFilter, ConfigError> {
    if !config.contains("LOG_LEVEL") {
        return Ok(LevelFilter::Info);
    }
    let value = config.get_str("LOG_LEVEL")?;
    parse_level(value).ok_or_else(|| ConfigError::InvalidValue {
        key: "LOG_LEVEL".to_string(),
        value: value.to_string(),
    })
}

/// Installs the global logger for a service. `log_file` is truncated if it
/// exists; a file that cannot be created is skipped and only stderr is used.
pub fn init(
    module: Module,
    level: LevelFilter,
    log_file: Option<&Path>,
) -> Result<(), SetLoggerError> {
    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .ok()
    });
    log::set_boxed_logger(Box::new(SimLogger::new(module, level, file)))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_both_warning_spellings() {
        assert_eq!(parse_level("WARNING"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("warn"), Some(LevelFilter::Warn));
        assert_eq!(parse_level(" info "), Some(LevelFilter::Info));
        assert_eq!(parse_level("LOUD"), None);
    }

    #[test]
    fn level_from_config_defaults_to_info() {
        let empty = ConfigFile::parse("").expect("config should parse");
        assert_eq!(level_from_config(&empty), Ok(LevelFilter::Info));
        let debug = ConfigFile::parse("LOG_LEVEL=DEBUG").expect("config should parse");
        assert_eq!(level_from_config(&debug), Ok(LevelFilter::Debug));
        let bad = ConfigFile::parse("LOG_LEVEL=LOUD").expect("config should parse");
        assert!(level_from_config(&bad).is_err());
    }

    #[test]
    fn format_line_carries_level_and_module() {
        let logger = SimLogger::new(Module::Cpu, LevelFilter::Info, None);
        let line = logger.format_line(Level::Warn, "TLB MISS");
        assert!(line.starts_with("[WARNING] [CPU] ["));
        assert!(line.ends_with("] TLB MISS"));
    }

    #[test]
    fn enabled_respects_filter() {
        let logger = SimLogger::new(Module::Kernel, LevelFilter::Info, None);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
    }
}
