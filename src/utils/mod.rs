//! Utility functions and helpers
//!
//! Hashing, timestamps and the serialization helpers shared by the
//! performance store and the wire codec.

pub mod crypto;
pub mod serialization;

pub use crypto::{current_timestamp, sha256_digest};
pub use serialization::{deserialize, hex_list, serialize};
