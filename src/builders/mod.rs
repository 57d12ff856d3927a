//! Builders to construct capacity hierarchies from configuration.

pub mod pool_builder;

pub use pool_builder::{build_context, CapacityContext, GLOBAL_LABEL};
