use serde::{Deserialize, Serialize};

use super::PoolError;

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened by `initialize`.
    pub min_size: usize,
    /// Upper bound on pooled connections. `0` means unbounded.
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 0,
        }
    }
}

impl PoolConfig {
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self { min_size, max_size }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_size > 0
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.is_bounded() && self.min_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}
