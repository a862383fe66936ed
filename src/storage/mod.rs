//! Data storage and persistence
//!
//! The sled-backed per-peer performance store and the node's pool of
//! pending transactions.

pub mod memory_pool;
pub mod performance;

pub use memory_pool::MemoryPool;
pub use performance::{Performance, PerformanceStore};
