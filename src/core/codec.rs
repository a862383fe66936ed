//! Wire encoding for blocks and transactions
//!
//! Both travel between peers as JSON. Decoding failures are reported as
//! [`WeaveError::Decode`] so the HTTP layer can tell them apart from
//! transport problems.

use crate::core::{Block, Transaction};
use crate::error::{Result, WeaveError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub trait WireCodec: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn to_wire(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| WeaveError::Serialization(format!("Failed to encode {}: {e}", Self::KIND)))
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| WeaveError::Decode(format!("Failed to decode {}: {e}", Self::KIND)))
    }

    fn to_json_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| WeaveError::Serialization(format!("Failed to encode {}: {e}", Self::KIND)))
    }

    fn from_json_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| WeaveError::Decode(format!("Failed to decode {}: {e}", Self::KIND)))
    }
}

impl WireCodec for Block {
    const KIND: &'static str = "block";
}

impl WireCodec for Transaction {
    const KIND: &'static str = "transaction";
}
