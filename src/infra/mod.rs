//! Infrastructure adapters for durable identity storage.

pub mod store;
pub use store::FileIdentityStore;
pub use store::InMemoryIdentityStore;
