use crate::core::{ProofOfWork, Transaction};
use crate::error::{Result, WeaveError};
use crate::utils::{current_timestamp, hex_list};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    height: u64,
    #[serde(with = "hex")]
    indep_hash: Vec<u8>,
    #[serde(with = "hex")]
    previous_block: Vec<u8>,
    // Ancestor hashes, newest first. hash_list[0] is the block at height - 1.
    #[serde(with = "hex_list")]
    hash_list: Vec<Vec<u8>>,
    timestamp: i64,
    nonce: u64,
    diff: u32,
    txs: Vec<Transaction>,
}

impl Block {
    /// Mine the first block of a new weave
    pub fn genesis(diff: u32) -> Result<Block> {
        let block = Block {
            height: 0,
            indep_hash: vec![],
            previous_block: vec![],
            hash_list: vec![],
            timestamp: current_timestamp()?,
            nonce: 0,
            diff,
            txs: vec![],
        };
        block.seal(&AtomicBool::new(false))
    }

    /// Mine a block on top of `previous` carrying `txs`
    pub fn mine(previous: &Block, txs: Vec<Transaction>, diff: u32) -> Result<Block> {
        Self::mine_until(previous, txs, diff, &AtomicBool::new(false))
    }

    /// Like [`Block::mine`], but fails with a mining error once `cancel` is set
    pub fn mine_until(
        previous: &Block,
        txs: Vec<Transaction>,
        diff: u32,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        let mut hash_list = Vec::with_capacity(previous.hash_list.len() + 1);
        hash_list.push(previous.indep_hash.clone());
        hash_list.extend(previous.hash_list.iter().cloned());

        let block = Block {
            height: previous.height + 1,
            indep_hash: vec![],
            previous_block: previous.indep_hash.clone(),
            hash_list,
            timestamp: current_timestamp()?,
            nonce: 0,
            diff,
            txs,
        };
        block.seal(cancel)
    }

    fn seal(mut self, cancel: &AtomicBool) -> Result<Block> {
        info!(
            "Starting proof-of-work for block at height {} with difficulty {}",
            self.height, self.diff
        );
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&self)?
            .run(cancel)
            .ok_or_else(|| {
                WeaveError::Mining(format!(
                    "proof-of-work for height {} was cancelled",
                    self.height
                ))
            })?;
        self.nonce = nonce;
        self.indep_hash = hash;
        info!("Proof-of-work completed for block {}", self.hash_hex());
        Ok(self)
    }

    /// Height of the block a miner must present alongside this one.
    /// Derived from the parent hash so it can't be picked by the miner.
    pub fn recall_height(&self) -> Option<u64> {
        if self.height == 0 {
            return None;
        }
        let mut prefix = [0u8; 8];
        for (dst, src) in prefix.iter_mut().zip(self.previous_block.iter()) {
            *dst = *src;
        }
        Some(u64::from_be_bytes(prefix) % self.height)
    }

    /// Hash of the ancestor at `height`, as recorded in this block's hash list
    pub fn ancestor_hash(&self, height: u64) -> Option<&[u8]> {
        if height >= self.height {
            return None;
        }
        let index = (self.height - 1 - height) as usize;
        self.hash_list.get(index).map(Vec::as_slice)
    }

    /// Check that this block extends `previous`
    pub fn validate_successor(&self, previous: &Block) -> Result<()> {
        if self.height != previous.height + 1 {
            return Err(WeaveError::InvalidBlock(format!(
                "height {} does not follow {}",
                self.height, previous.height
            )));
        }
        if self.previous_block != previous.indep_hash {
            return Err(WeaveError::InvalidBlock(format!(
                "block {} does not build on {}",
                self.hash_hex(),
                previous.hash_hex()
            )));
        }
        let expected_len = previous.hash_list.len() + 1;
        if self.hash_list.len() != expected_len
            || self.hash_list[0] != previous.indep_hash
            || self.hash_list[1..] != previous.hash_list[..]
        {
            return Err(WeaveError::InvalidBlock(format!(
                "hash list of {} does not match its ancestors",
                self.hash_hex()
            )));
        }
        if !ProofOfWork::validate(self) {
            return Err(WeaveError::InvalidBlock(format!(
                "proof-of-work for {} is invalid",
                self.hash_hex()
            )));
        }
        Ok(())
    }

    pub fn get_height(&self) -> u64 {
        self.height
    }

    pub fn get_indep_hash(&self) -> &[u8] {
        self.indep_hash.as_slice()
    }

    pub fn hash_hex(&self) -> String {
        HEXLOWER.encode(&self.indep_hash)
    }

    pub fn get_previous_block(&self) -> &[u8] {
        self.previous_block.as_slice()
    }

    pub fn get_hash_list(&self) -> &[Vec<u8>] {
        self.hash_list.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_diff(&self) -> u32 {
        self.diff
    }

    pub fn get_txs(&self) -> &[Transaction] {
        self.txs.as_slice()
    }
}
