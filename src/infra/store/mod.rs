//! Identity store backends.

pub mod file;
pub mod memory;

pub use file::FileIdentityStore;
pub use memory::InMemoryIdentityStore;
