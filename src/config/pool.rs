//! Capacity hierarchy configuration structures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Local (per-job) pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum tasks of one job running at once.
    pub max_units: u32,
}

/// Root configuration: one global ceiling plus named local pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Process-wide ceiling shared by every local pool.
    #[serde(default = "default_global_units")]
    pub global_units: u32,
    /// Map of pool name to configuration.
    #[serde(default)]
    pub pools: HashMap<String, PoolConfig>,
}

/// Default global ceiling: four concurrent tasks per CPU.
pub fn default_global_units() -> u32 {
    u32::try_from(num_cpus::get().saturating_mul(4)).unwrap_or(u32::MAX)
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            global_units: default_global_units(),
            pools: HashMap::new(),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_units == 0 {
            return Err("max_units must be greater than 0".into());
        }
        Ok(())
    }
}

impl CapacityConfig {
    /// Add a named pool.
    #[must_use]
    pub fn with_pool(mut self, name: impl Into<String>, max_units: u32) -> Self {
        self.pools.insert(name.into(), PoolConfig { max_units });
        self
    }

    /// Validate the global ceiling and every pool.
    pub fn validate(&self) -> Result<(), String> {
        if self.global_units == 0 {
            return Err("global_units must be greater than 0".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
            if pool.max_units > self.global_units {
                tracing::debug!(
                    pool = %name,
                    max_units = pool.max_units,
                    global_units = self.global_units,
                    "pool limit exceeds global ceiling; global limit applies"
                );
            }
        }
        Ok(())
    }

    /// Parse capacity configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
