//! The peer transport
//!
//! Inbound: an HTTP server that decodes peer requests and forwards them to
//! whichever node is currently bound. Outbound: a client that calls peers and
//! records per-peer transfer performance.

pub mod client;
pub mod peer;
pub mod routes;
pub mod server;

pub use client::{Client, PeerResponse, CONNECT_TIMEOUT, DEFAULT_HEADERS, DEFAULT_TIMEOUT};
pub use peer::PeerAddr;
pub use routes::{BlockSubmission, Route};
pub use server::Server;
