//! TOML configuration.
//!
//! ```toml
//! [pool]
//! min_size = 2
//! max_size = 8      # 0 = unbounded
//!
//! [locks]
//! blocking = true
//! timeout_ms = 30000 # omit to wait forever
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::LockOptions;
use crate::pool::{PoolConfig, PoolError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] PoolError),
}

/// Defaults for named-lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub blocking: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            blocking: true,
            timeout_ms: None,
        }
    }
}

impl From<LockConfig> for LockOptions {
    fn from(config: LockConfig) -> Self {
        LockOptions {
            blocking: config.blocking,
            timeout: config.timeout_ms.map(Duration::from_millis),
            ..LockOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub locks: LockConfig,
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(input)?;
        config.pool.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&input)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn lock_options(&self) -> LockOptions {
        self.locks.into()
    }
}
