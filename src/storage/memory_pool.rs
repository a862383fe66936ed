use crate::core::Transaction;
use std::collections::HashMap;

/// Pending transactions in arrival order, keyed by hex id.
/// Owned by the node actor, so no locking here.
#[derive(Default)]
pub struct MemoryPool {
    txs: HashMap<String, Transaction>,
    order: Vec<String>,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool::default()
    }

    /// Returns false if the transaction was already pending
    pub fn add(&mut self, tx: Transaction) -> bool {
        let txid = tx.id_hex();
        if self.contains(&txid) {
            return false;
        }
        self.order.push(txid.clone());
        self.txs.insert(txid, tx);
        true
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.txs.contains_key(txid)
    }

    pub fn remove(&mut self, txid: &str) {
        if self.txs.remove(txid).is_some() {
            self.order.retain(|id| id != txid);
        }
    }

    /// Remove and return everything pending, oldest first
    pub fn take_all(&mut self) -> Vec<Transaction> {
        let order = std::mem::take(&mut self.order);
        let mut txs = std::mem::take(&mut self.txs);
        order.into_iter().filter_map(|id| txs.remove(&id)).collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}
