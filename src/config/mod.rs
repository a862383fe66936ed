//! Configuration management
//!
//! This module handles the node's settings: listening port, data directory,
//! outbound timeouts, mining difficulty and bootstrap peers.

pub mod settings;

pub use settings::{Config, Settings, DEFAULT_PORT, GLOBAL_CONFIG};
