//! Command-line interface
//!
//! Argument parsing for the node and for one-off calls against a peer.

pub mod commands;

pub use commands::{BlockId, Command, Opt};
