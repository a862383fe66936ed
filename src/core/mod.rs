//! Core weave data
//!
//! Blocks, transactions, proof-of-work and their wire encoding. The peer
//! transport treats these as opaque payloads; they live here so the node
//! actor and the tests have something concrete to move around.

pub mod block;
pub mod codec;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use codec::WireCodec;
pub use proof_of_work::{ProofOfWork, MAX_DIFFICULTY};
pub use transaction::Transaction;
