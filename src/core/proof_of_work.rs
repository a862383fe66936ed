use crate::core::Block;
use crate::error::{Result, WeaveError};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::debug;
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

pub const MAX_DIFFICULTY: u32 = 255;

// How many nonces to try between checks of the cancel flag
const CANCEL_CHECK_INTERVAL: u64 = 1024;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigInt,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        let difficulty = block.get_diff();
        if difficulty == 0 || difficulty > MAX_DIFFICULTY {
            return Err(WeaveError::Mining(format!(
                "difficulty {difficulty} outside 1..={MAX_DIFFICULTY}"
            )));
        }
        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty);
        Ok(ProofOfWork { block, target })
    }

    /// Validate proof-of-work for a block: the stored hash must be the digest of
    /// the header at the stored nonce, and must sit under the target.
    pub fn validate(block: &Block) -> bool {
        let Ok(pow) = ProofOfWork::new_proof_of_work(block) else {
            return false;
        };
        let hash = sha256_digest(&pow.prepare_data(block.get_nonce()));
        hash == block.get_indep_hash() && pow.meets_target(&hash)
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_previous_block());
        for hash in self.block.get_hash_list() {
            data_bytes.extend(hash);
        }
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(self.block.get_height().to_be_bytes());
        data_bytes.extend(self.block.get_diff().to_be_bytes());
        for tx in self.block.get_txs() {
            data_bytes.extend(tx.get_id());
        }
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    /// Search for a nonce whose header digest meets the target.
    /// Starts from a random nonce so concurrent miners don't walk the same range.
    /// Returns `None` once `cancel` is set.
    pub fn run(&self, cancel: &AtomicBool) -> Option<(u64, Vec<u8>)> {
        let mut nonce: u64 = rand::random();
        let mut attempts: u64 = 0;
        loop {
            if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                debug!(
                    "Proof-of-work for height {} cancelled after {attempts} attempts",
                    self.block.get_height()
                );
                return None;
            }
            let hash = sha256_digest(&self.prepare_data(nonce));
            if self.meets_target(&hash) {
                debug!(
                    "Found nonce {nonce} for height {}: {}",
                    self.block.get_height(),
                    HEXLOWER.encode(&hash)
                );
                return Some((nonce, hash));
            }
            nonce = nonce.wrapping_add(1);
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    #[test]
    fn test_mined_genesis_validates() {
        let block = Block::genesis(4).unwrap();
        assert!(ProofOfWork::validate(&block));
    }

    #[test]
    fn test_higher_difficulty_has_smaller_target() {
        let easy = Block::genesis(1).unwrap();
        let hard = Block::genesis(6).unwrap();
        let easy_pow = ProofOfWork::new_proof_of_work(&easy).unwrap();
        let hard_pow = ProofOfWork::new_proof_of_work(&hard).unwrap();
        assert!(hard_pow.target < easy_pow.target);
    }

    #[test]
    fn test_prepare_data_depends_on_nonce_and_txs() {
        let genesis = Block::genesis(1).unwrap();
        let tx = Transaction::new("target", 1, 1, b"x");
        let block = Block::mine(&genesis, vec![tx], 1).unwrap();
        let pow = ProofOfWork::new_proof_of_work(&block).unwrap();

        assert_eq!(pow.prepare_data(12345), pow.prepare_data(12345));
        assert_ne!(pow.prepare_data(12345), pow.prepare_data(54321));
    }

    #[test]
    fn test_zero_difficulty_is_rejected() {
        assert!(matches!(Block::genesis(0), Err(WeaveError::Mining(_))));
    }

    #[test]
    fn test_cancelled_search_gives_up() {
        let genesis = Block::genesis(1).unwrap();
        let pow = ProofOfWork::new_proof_of_work(&genesis).unwrap();
        assert_eq!(pow.run(&AtomicBool::new(true)), None);
    }

    #[test]
    fn test_cancelled_mining_is_an_error() {
        let genesis = Block::genesis(1).unwrap();
        let cancel = AtomicBool::new(true);
        let result = Block::mine_until(&genesis, vec![], 64, &cancel);
        assert!(matches!(result, Err(WeaveError::Mining(_))));
    }
}
