//! # Weavelink
//!
//! The peer transport of a weave node: an HTTP interface other nodes push
//! blocks and transactions into, a client for calling them back, and a
//! persistent record of how fast each peer has been.
//!
//! ## Layout
//! - `network/`: inbound server, outbound client, route table, peer addresses
//! - `node/`: the actor contract the server forwards to, plus an in-process node
//! - `storage/`: sled-backed performance records and the transaction pool
//! - `core/`: blocks, transactions, proof-of-work and their JSON wire form
//! - `config/`: settings from defaults, a TOML file and the environment
//! - `utils/`: hashing, timestamps and bincode helpers
//! - `cli/`: command-line arguments for the `weavelink` binary

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;

pub use cli::{Command, Opt};
pub use config::{Config, Settings, GLOBAL_CONFIG};
pub use core::{Block, ProofOfWork, Transaction, WireCodec};
pub use error::{Result, WeaveError};
pub use network::{BlockSubmission, Client, PeerAddr, PeerResponse, Route, Server};
pub use node::{BlockQuery, LocalNode, NodeActor, NodeHandle, SharedNode};
pub use storage::{MemoryPool, Performance, PerformanceStore};
pub use utils::{current_timestamp, sha256_digest};
