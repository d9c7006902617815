use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Errors produced while loading or reading a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read.
    Unreadable(String),
    /// A required key is absent.
    MissingKey(String),
    /// A key is present but its value does not parse.
    InvalidValue { key: String, value: String },
    /// A non-comment line has no `=` separator (1-based line number).
    MalformedLine(usize),
}

impl ConfigError {
    /// Returns a stable, human-readable error label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigError::Unreadable(_) => "config unreadable",
            ConfigError::MissingKey(_) => "missing key",
            ConfigError::InvalidValue { .. } => "invalid value",
            ConfigError::MalformedLine(_) => "malformed line",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Unreadable(path) => write!(f, "{}: {}", self.as_str(), path),
            ConfigError::MissingKey(key) => write!(f, "{}: {}", self.as_str(), key),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{}: {}={}", self.as_str(), key, value)
            }
            ConfigError::MalformedLine(line) => write!(f, "{} at line {}", self.as_str(), line),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parsed `KEY=VALUE` config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    values: BTreeMap<String, String>,
}

impl ConfigFile {
    /// Reads and parses the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::Unreadable(path.display().to_string()))?;
        Self::parse(&text)
    }

    /// Parses config text. Blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(ConfigError::MalformedLine(index + 1))?;
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the raw string value for `key`.
    pub fn get_str(&self, key: &str) -> Result<&str, ConfigError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Returns `key` parsed as `T`.
    pub fn get<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.get_str(key)?;
        value.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Returns `key` parsed as `T`, or `default` when the key is absent.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        if self.contains(key) {
            self.get(key)
        } else {
            Ok(default)
        }
    }

    /// Inserts or replaces a value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}
