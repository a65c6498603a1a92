//! adaptest-store — Store implementations and engine configuration.
//!
//! In-memory implementations of the boundary traits defined in
//! `adaptest-core`, suitable for tests, simulation, and single-process
//! deployments. Hosting platforms replace them with database-backed
//! implementations of the same traits.

pub mod cache;
pub mod config;
pub mod memory;

pub use cache::MemoryProgressCache;
pub use config::{load_config, load_config_from, EngineConfig};
pub use memory::{
    MemoryActivityLog, MemoryAttemptStore, MemoryParameterStore, MemoryResponseSource,
};
