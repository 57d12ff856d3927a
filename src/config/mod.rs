//! Configuration models for capacity hierarchies.

pub mod pool;

pub use pool::{CapacityConfig, PoolConfig};
