// Transactions are opaque to the transport layer; the node only checks that the id
// matches the contents before it accepts one into the mempool.

use crate::error::{Result, WeaveError};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "hex")]
    id: Vec<u8>,
    #[serde(with = "hex")]
    anchor: Vec<u8>, // random bytes so identical transfers still get distinct ids
    target: String,
    quantity: u64,
    reward: u64,
    #[serde(with = "hex")]
    data: Vec<u8>,
}

impl Transaction {
    pub fn new(target: &str, quantity: u64, reward: u64, data: &[u8]) -> Transaction {
        let mut tx = Transaction {
            id: vec![],
            anchor: Uuid::new_v4().as_bytes().to_vec(),
            target: target.to_string(),
            quantity,
            reward,
            data: data.to_vec(),
        };
        tx.id = tx.hash();
        tx
    }

    fn hash(&self) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(&self.anchor);
        bytes.extend(self.target.as_bytes());
        bytes.extend(self.quantity.to_be_bytes());
        bytes.extend(self.reward.to_be_bytes());
        bytes.extend(&self.data);
        sha256_digest(&bytes)
    }

    /// Check that the id is the digest of the transaction's contents
    pub fn verify(&self) -> Result<()> {
        if self.id != self.hash() {
            return Err(WeaveError::InvalidTransaction(format!(
                "id {} does not match contents",
                self.id_hex()
            )));
        }
        Ok(())
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn id_hex(&self) -> String {
        HEXLOWER.encode(&self.id)
    }

    pub fn get_target(&self) -> &str {
        &self.target
    }

    pub fn get_quantity(&self) -> u64 {
        self.quantity
    }

    pub fn get_reward(&self) -> u64 {
        self.reward
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }
}
