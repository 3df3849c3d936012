//! TianHe runtime configuration
//!
//! Node-level knobs for the transport substrate, loaded from TOML with
//! per-field defaults. Process bootstrap and CLI parsing live outside the
//! substrate; callers hand in a string or a path.
//!
//! # Usage
//!
//! ```rust
//! use tianhe::util::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_toml_str("execution_units = 8").unwrap();
//! assert_eq!(config.execution_units, 8);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Node-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Size in bytes of every pool buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum number of simultaneously outstanding buffers
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Number of execution units (worker threads)
    #[serde(default = "default_execution_units")]
    pub execution_units: usize,
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_pool_capacity() -> usize {
    1024
}

fn default_execution_units() -> usize {
    4
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            pool_capacity: default_pool_capacity(),
            execution_units: default_execution_units(),
        }
    }
}

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid TOML
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Config could not be serialized
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// A field value is out of range
    #[error("invalid config: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl RuntimeConfig {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Write the configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check field ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                reason: "must be non-zero",
            });
        }
        if self.pool_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "pool_capacity",
                reason: "must be non-zero",
            });
        }
        if self.execution_units == 0 {
            return Err(ConfigError::Invalid {
                field: "execution_units",
                reason: "must be non-zero",
            });
        }
        Ok(())
    }
}
