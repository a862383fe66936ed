// The in-process node: one tokio task owns the chain and mempool, everything else
// talks to it through a channel. Messages are handled strictly in arrival order,
// so a query sent after a submission always sees that submission's effect.
// Proof-of-work runs on the blocking pool and the actor keeps serving while it
// does. A sealed block whose parent is no longer the tip is discarded.

use crate::core::{Block, Transaction};
use crate::error::{Result, WeaveError};
use crate::network::PeerAddr;
use crate::node::{BlockQuery, NodeActor};
use crate::storage::MemoryPool;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

enum NodeMessage {
    AddBlock {
        peer: PeerAddr,
        new_block: Box<Block>,
        recall_block: Box<Block>,
        height: u64,
    },
    AddTx(Transaction),
    GetBlock {
        query: BlockQuery,
        reply: oneshot::Sender<Option<Block>>,
    },
    CurrentBlock {
        reply: oneshot::Sender<Option<Block>>,
    },
    Blocks {
        reply: oneshot::Sender<Vec<Vec<u8>>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerAddr>>,
    },
    Mine {
        reply: oneshot::Sender<Result<Block>>,
    },
}

/// A block being sealed on the blocking pool. Dropping the job cancels the search.
struct MiningJob {
    handle: JoinHandle<Result<Block>>,
    parent: Vec<u8>,
    txs: Vec<Transaction>,
    reply: Option<oneshot::Sender<Result<Block>>>,
    cancel: Arc<AtomicBool>,
}

impl Drop for MiningJob {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

enum Event {
    Message(Option<NodeMessage>),
    Sealed(std::result::Result<Result<Block>, JoinError>),
}

async fn sealed(mining: &mut Option<MiningJob>) -> std::result::Result<Result<Block>, JoinError> {
    match mining {
        Some(job) => (&mut job.handle).await,
        None => future::pending().await,
    }
}

pub struct LocalNode {
    blocks: Vec<Block>,
    by_hash: HashMap<Vec<u8>, usize>,
    mempool: MemoryPool,
    peers: BTreeSet<PeerAddr>,
    difficulty: u32,
    mining: Option<MiningJob>,
}

impl LocalNode {
    pub fn new(genesis: Block, difficulty: u32) -> Result<LocalNode> {
        if genesis.get_height() != 0 {
            return Err(WeaveError::InvalidBlock(format!(
                "genesis block has height {}",
                genesis.get_height()
            )));
        }
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.get_indep_hash().to_vec(), 0);
        Ok(LocalNode {
            blocks: vec![genesis],
            by_hash,
            mempool: MemoryPool::new(),
            peers: BTreeSet::new(),
            difficulty,
            mining: None,
        })
    }

    fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    fn get_block(&self, query: &BlockQuery) -> Option<Block> {
        let index = match query {
            BlockQuery::Height(height) => usize::try_from(*height).ok()?,
            BlockQuery::Hash(hash) => *self.by_hash.get(hash)?,
        };
        self.blocks.get(index).cloned()
    }

    /// Hashes of every block, newest first
    fn hash_list(&self) -> Vec<Vec<u8>> {
        self.blocks
            .iter()
            .rev()
            .map(|b| b.get_indep_hash().to_vec())
            .collect()
    }

    fn add_transaction(&mut self, tx: Transaction) -> Result<()> {
        tx.verify()?;
        if self.in_chain(&tx) {
            debug!("Transaction {} already mined", tx.id_hex());
            return Ok(());
        }
        let txid = tx.id_hex();
        if self.mempool.add(tx) {
            info!(
                "Added transaction {txid} to mempool ({} pending)",
                self.mempool.len()
            );
        }
        Ok(())
    }

    fn in_chain(&self, tx: &Transaction) -> bool {
        self.blocks
            .iter()
            .any(|b| b.get_txs().iter().any(|t| t.get_id() == tx.get_id()))
    }

    fn add_block(
        &mut self,
        peer: PeerAddr,
        new_block: Block,
        recall_block: Block,
        height: u64,
    ) -> Result<()> {
        if height != new_block.get_height() {
            return Err(WeaveError::InvalidBlock(format!(
                "announced height {height} but block is at {}",
                new_block.get_height()
            )));
        }
        let tip = self
            .tip()
            .ok_or_else(|| WeaveError::InvalidBlock("node has no blocks".to_string()))?;

        if new_block.get_height() <= tip.get_height() {
            if self.by_hash.contains_key(new_block.get_indep_hash()) {
                debug!("Already have block {}", new_block.hash_hex());
            } else {
                warn!(
                    "Ignoring block {} at height {} from {peer}: not ahead of our tip",
                    new_block.hash_hex(),
                    new_block.get_height()
                );
            }
            return Ok(());
        }

        if new_block.get_diff() != self.difficulty {
            return Err(WeaveError::InvalidBlock(format!(
                "block {} declares difficulty {} but the weave runs at {}",
                new_block.hash_hex(),
                new_block.get_diff(),
                self.difficulty
            )));
        }
        new_block.validate_successor(tip)?;

        let recall_height = new_block
            .recall_height()
            .ok_or_else(|| WeaveError::InvalidBlock("block has no recall height".to_string()))?;
        let expected = new_block.ancestor_hash(recall_height).ok_or_else(|| {
            WeaveError::InvalidBlock(format!("no ancestor recorded at height {recall_height}"))
        })?;
        if recall_block.get_height() != recall_height
            || expected != recall_block.get_indep_hash()
        {
            return Err(WeaveError::InvalidBlock(format!(
                "wrong recall block {} for height {recall_height}",
                recall_block.hash_hex()
            )));
        }

        for tx in new_block.get_txs() {
            tx.verify()?;
        }
        for tx in new_block.get_txs() {
            self.mempool.remove(&tx.id_hex());
        }

        info!(
            "Accepted block {} at height {} from {peer}",
            new_block.hash_hex(),
            new_block.get_height()
        );
        self.by_hash
            .insert(new_block.get_indep_hash().to_vec(), self.blocks.len());
        self.blocks.push(new_block);
        self.peers.insert(peer);
        Ok(())
    }

    fn start_mining(&mut self, reply: oneshot::Sender<Result<Block>>) {
        if self.mining.is_some() {
            let _ = reply.send(Err(WeaveError::Mining(
                "a block is already being mined".to_string(),
            )));
            return;
        }
        let Some(tip) = self.tip().cloned() else {
            let _ = reply.send(Err(WeaveError::Mining("node has no blocks".to_string())));
            return;
        };

        if self.mempool.is_empty() {
            debug!("Mining an empty block on top of {}", tip.hash_hex());
        }
        let txs = self.mempool.take_all();
        let parent = tip.get_indep_hash().to_vec();
        let cancel = Arc::new(AtomicBool::new(false));
        let difficulty = self.difficulty;
        let handle = {
            let txs = txs.clone();
            let cancel = Arc::clone(&cancel);
            tokio::task::spawn_blocking(move || Block::mine_until(&tip, txs, difficulty, &cancel))
        };
        self.mining = Some(MiningJob {
            handle,
            parent,
            txs,
            reply: Some(reply),
            cancel,
        });
    }

    fn finish_mining(&mut self, joined: std::result::Result<Result<Block>, JoinError>) {
        let Some(mut job) = self.mining.take() else {
            return;
        };
        let result = joined
            .map_err(|e| WeaveError::Mining(format!("mining task failed: {e}")))
            .and_then(|mined| mined)
            .and_then(|block| self.append_mined(&job.parent, block));

        if let Err(e) = &result {
            warn!("Mining failed: {e}");
            for tx in std::mem::take(&mut job.txs) {
                if !self.in_chain(&tx) {
                    self.mempool.add(tx);
                }
            }
        }
        if let Some(reply) = job.reply.take() {
            let _ = reply.send(result);
        }
    }

    /// Append a freshly sealed block, unless a peer block moved the tip meanwhile
    fn append_mined(&mut self, parent: &[u8], block: Block) -> Result<Block> {
        let tip_hash = self.tip().map(Block::get_indep_hash).unwrap_or_default();
        if tip_hash != parent {
            return Err(WeaveError::Mining(format!(
                "tip moved while mining block {}",
                block.hash_hex()
            )));
        }
        for tx in block.get_txs() {
            self.mempool.remove(&tx.id_hex());
        }
        info!(
            "New block {} mined at height {} with {} transactions",
            block.hash_hex(),
            block.get_height(),
            block.get_txs().len()
        );
        self.by_hash
            .insert(block.get_indep_hash().to_vec(), self.blocks.len());
        self.blocks.push(block.clone());
        Ok(block)
    }

    fn handle(&mut self, msg: NodeMessage) {
        // A dropped reply receiver just means the caller gave up waiting.
        match msg {
            NodeMessage::AddBlock {
                peer,
                new_block,
                recall_block,
                height,
            } => {
                if let Err(e) = self.add_block(peer, *new_block, *recall_block, height) {
                    warn!("Rejected block from {peer}: {e}");
                }
            }
            NodeMessage::AddTx(tx) => {
                if let Err(e) = self.add_transaction(tx) {
                    warn!("Rejected transaction: {e}");
                }
            }
            NodeMessage::GetBlock { query, reply } => {
                let _ = reply.send(self.get_block(&query));
            }
            NodeMessage::CurrentBlock { reply } => {
                let _ = reply.send(self.tip().cloned());
            }
            NodeMessage::Blocks { reply } => {
                let _ = reply.send(self.hash_list());
            }
            NodeMessage::Peers { reply } => {
                let _ = reply.send(self.peers.iter().copied().collect());
            }
            NodeMessage::Mine { reply } => self.start_mining(reply),
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<NodeMessage>) {
        loop {
            let event = tokio::select! {
                msg = inbox.recv() => Event::Message(msg),
                joined = sealed(&mut self.mining) => Event::Sealed(joined),
            };
            match event {
                Event::Message(Some(msg)) => self.handle(msg),
                Event::Message(None) => break,
                Event::Sealed(joined) => self.finish_mining(joined),
            }
        }
        debug!("Node actor stopped");
    }
}

/// Cheap, cloneable handle to a running [`LocalNode`]
#[derive(Clone)]
pub struct NodeHandle {
    sender: mpsc::UnboundedSender<NodeMessage>,
}

impl NodeHandle {
    /// Start a node on the current tokio runtime
    pub fn spawn(genesis: Block, difficulty: u32) -> Result<NodeHandle> {
        let node = LocalNode::new(genesis, difficulty)?;
        let (sender, inbox) = mpsc::unbounded_channel();
        tokio::spawn(node.run(inbox));
        Ok(NodeHandle { sender })
    }

    fn send(&self, msg: NodeMessage) -> Result<()> {
        self.sender
            .send(msg)
            .map_err(|_| WeaveError::NodeUnavailable("node actor has stopped".to_string()))
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> NodeMessage) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply))?;
        response
            .await
            .map_err(|_| WeaveError::NodeUnavailable("node actor dropped the request".to_string()))
    }

    /// Mine whatever is in the mempool into a new block on our tip
    pub async fn mine(&self) -> Result<Block> {
        self.ask(|reply| NodeMessage::Mine { reply }).await?
    }

    /// Every block hash we hold, newest first
    pub async fn blocks(&self) -> Result<Vec<Vec<u8>>> {
        self.ask(|reply| NodeMessage::Blocks { reply }).await
    }

    /// The block a peer must be sent alongside `block`
    pub async fn recall_block_for(&self, block: &Block) -> Result<Option<Block>> {
        match block.recall_height() {
            Some(height) => self.get_block(BlockQuery::Height(height)).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl NodeActor for NodeHandle {
    async fn add_block(
        &self,
        peer: PeerAddr,
        new_block: Block,
        recall_block: Block,
        height: u64,
    ) -> Result<()> {
        self.send(NodeMessage::AddBlock {
            peer,
            new_block: Box::new(new_block),
            recall_block: Box::new(recall_block),
            height,
        })
    }

    async fn add_transaction(&self, tx: Transaction) -> Result<()> {
        self.send(NodeMessage::AddTx(tx))
    }

    async fn get_block(&self, query: BlockQuery) -> Result<Option<Block>> {
        self.ask(|reply| NodeMessage::GetBlock { query, reply }).await
    }

    async fn current_block(&self) -> Result<Option<Block>> {
        self.ask(|reply| NodeMessage::CurrentBlock { reply }).await
    }

    async fn peers(&self) -> Result<Vec<PeerAddr>> {
        self.ask(|reply| NodeMessage::Peers { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: u32 = 4;

    fn peer() -> PeerAddr {
        PeerAddr::localhost(2002)
    }

    #[tokio::test]
    async fn test_mine_includes_pending_transactions() {
        let node = NodeHandle::spawn(Block::genesis(DIFF).unwrap(), DIFF).unwrap();
        let tx = Transaction::new("target", 3, 1, b"data");
        node.add_transaction(tx.clone()).await.unwrap();

        let block = node.mine().await.unwrap();
        assert_eq!(block.get_height(), 1);
        assert_eq!(block.get_txs(), &[tx]);

        let fetched = node.get_block(BlockQuery::Height(1)).await.unwrap();
        assert_eq!(fetched, Some(block.clone()));
        let by_hash = node
            .get_block(BlockQuery::Hash(block.get_indep_hash().to_vec()))
            .await
            .unwrap();
        assert_eq!(by_hash, Some(block));
    }

    #[tokio::test]
    async fn test_unknown_block_is_none() {
        let node = NodeHandle::spawn(Block::genesis(DIFF).unwrap(), DIFF).unwrap();
        assert_eq!(node.get_block(BlockQuery::Height(7)).await.unwrap(), None);
        assert_eq!(node.get_block(BlockQuery::Hash(vec![1, 2, 3])).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_accepts_valid_block_from_peer() {
        let genesis = Block::genesis(DIFF).unwrap();
        let ours = NodeHandle::spawn(genesis.clone(), DIFF).unwrap();
        let theirs = NodeHandle::spawn(genesis.clone(), DIFF).unwrap();

        let b1 = theirs.mine().await.unwrap();
        let recall = theirs.recall_block_for(&b1).await.unwrap().unwrap();
        ours.add_block(peer(), b1.clone(), recall, 1).await.unwrap();

        assert_eq!(
            ours.blocks().await.unwrap(),
            vec![b1.get_indep_hash().to_vec(), genesis.get_indep_hash().to_vec()]
        );
        assert_eq!(ours.peers().await.unwrap(), vec![peer()]);
        assert_eq!(ours.current_block().await.unwrap(), Some(b1));
    }

    #[tokio::test]
    async fn test_rejects_block_with_wrong_recall() {
        let genesis = Block::genesis(DIFF).unwrap();
        let ours = NodeHandle::spawn(genesis.clone(), DIFF).unwrap();
        let b1 = Block::mine(&genesis, vec![], DIFF).unwrap();
        let stranger = Block::genesis(DIFF).unwrap();

        ours.add_block(peer(), b1, stranger, 1).await.unwrap();
        assert_eq!(ours.blocks().await.unwrap().len(), 1);
        assert!(ours.peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_mismatched_height() {
        let genesis = Block::genesis(DIFF).unwrap();
        let ours = NodeHandle::spawn(genesis.clone(), DIFF).unwrap();
        let b1 = Block::mine(&genesis, vec![], DIFF).unwrap();

        ours.add_block(peer(), b1, genesis, 5).await.unwrap();
        assert_eq!(ours.blocks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_block_below_weave_difficulty() {
        let genesis = Block::genesis(DIFF).unwrap();
        let ours = NodeHandle::spawn(genesis.clone(), DIFF).unwrap();
        let cheap = Block::mine(&genesis, vec![], 1).unwrap();

        ours.add_block(peer(), cheap, genesis, 1).await.unwrap();
        assert_eq!(ours.blocks().await.unwrap().len(), 1);
        assert!(ours.peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queries_are_served_while_mining() {
        let genesis = Block::genesis(DIFF).unwrap();
        // Far too hard to finish; the job is cancelled when the node goes away.
        let node = NodeHandle::spawn(genesis.clone(), 64).unwrap();

        let miner = {
            let node = node.clone();
            tokio::spawn(async move { node.mine().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let answered = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            node.get_block(BlockQuery::Height(0)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(answered, Some(genesis));
        assert!(matches!(node.mine().await, Err(WeaveError::Mining(_))));
        assert!(!miner.is_finished());
        miner.abort();
    }

    #[tokio::test]
    async fn test_transactions_mined_once() {
        let node = NodeHandle::spawn(Block::genesis(DIFF).unwrap(), DIFF).unwrap();
        let tx = Transaction::new("target", 3, 1, b"data");
        node.add_transaction(tx.clone()).await.unwrap();

        let first = node.mine().await.unwrap();
        let second = node.mine().await.unwrap();
        assert_eq!(first.get_txs(), &[tx]);
        assert!(second.get_txs().is_empty());
    }

    #[test]
    fn test_genesis_must_be_height_zero() {
        let genesis = Block::genesis(DIFF).unwrap();
        let b1 = Block::mine(&genesis, vec![], DIFF).unwrap();
        assert!(LocalNode::new(b1, DIFF).is_err());
    }
}
