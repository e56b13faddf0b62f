//! Infrastructure adapters
//! Concrete implementations of the domain ports.

pub mod memory_bus;
pub mod sqlite_store;
pub mod sysinfo_sampler;

pub use memory_bus::InMemoryBus;
pub use sqlite_store::SqliteStore;
pub use sysinfo_sampler::SysinfoSampler;
