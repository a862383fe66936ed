//! The node actor the peer interface talks to
//!
//! [`NodeActor`] is the contract the HTTP server forwards into. [`NodeHandle`]
//! is the in-process implementation: a single task owning the chain view and
//! the mempool, driven through a channel.

pub mod actor;
pub mod local;

pub use actor::{BlockQuery, NodeActor, SharedNode};
pub use local::{LocalNode, NodeHandle};
