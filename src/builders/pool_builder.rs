//! Builders to construct capacity hierarchies and runners from configuration.

use std::collections::HashMap;

use crate::config::{CapacityConfig, PoolConfig};
use crate::core::{CapacitySource, Spawn, TaskPoolError, TaskPoolRunner, TaskSource};

/// Label of the process-wide capacity source.
pub const GLOBAL_LABEL: &str = "global";

/// Process-wide capacity context.
///
/// Holds the single global ceiling and mints fresh local capacities chained to
/// it. Create one at process start and pass it to whatever starts jobs; tests
/// build their own isolated context instead of sharing one.
#[derive(Debug, Clone)]
pub struct CapacityContext {
    global: CapacitySource,
    pools: HashMap<String, PoolConfig>,
}

impl CapacityContext {
    /// Context with a global ceiling and no named pools.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::InvalidCapacity`] if `global_units` is zero.
    pub fn new(global_units: u32) -> Result<Self, TaskPoolError> {
        Ok(Self {
            global: CapacitySource::new(GLOBAL_LABEL, global_units)?,
            pools: HashMap::new(),
        })
    }

    /// Build a context from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::InvalidConfig`] if the configuration is invalid.
    pub fn from_config(cfg: &CapacityConfig) -> Result<Self, TaskPoolError> {
        cfg.validate().map_err(TaskPoolError::InvalidConfig)?;
        Ok(Self {
            global: CapacitySource::new(GLOBAL_LABEL, cfg.global_units)?,
            pools: cfg.pools.clone(),
        })
    }

    /// The shared global ceiling.
    pub const fn global(&self) -> &CapacitySource {
        &self.global
    }

    /// Names of the configured pools.
    pub fn pool_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Fresh local capacity for one job of the named pool.
    ///
    /// Every call returns a new budget; all of them draw on the same global one.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::UnknownPool`] if no such pool is configured.
    pub fn local(&self, pool: &str) -> Result<CapacitySource, TaskPoolError> {
        let cfg = self
            .pools
            .get(pool)
            .ok_or_else(|| TaskPoolError::UnknownPool(pool.to_string()))?;
        self.child(pool, cfg.max_units)
    }

    /// Fresh ad-hoc local capacity chained to the global ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::InvalidCapacity`] if `units` is zero.
    pub fn child(&self, label: impl Into<String>, units: u32) -> Result<CapacitySource, TaskPoolError> {
        CapacitySource::with_parent(label, units, &self.global)
    }

    /// Runner for one job of the named pool.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::UnknownPool`] if no such pool is configured.
    pub fn runner<T, Src, S>(
        &self,
        label: impl Into<String>,
        pool: &str,
        source: Src,
        spawner: S,
    ) -> Result<TaskPoolRunner<T, Src, S>, TaskPoolError>
    where
        T: Send + 'static,
        Src: TaskSource<T> + 'static,
        S: Spawn + Clone + Send + 'static,
    {
        Ok(TaskPoolRunner::new(label, source, self.local(pool)?, spawner))
    }
}

/// Build a capacity context from configuration.
///
/// # Errors
///
/// Returns [`TaskPoolError::InvalidConfig`] if the configuration is invalid.
pub fn build_context(cfg: &CapacityConfig) -> Result<CapacityContext, TaskPoolError> {
    CapacityContext::from_config(cfg)
}
