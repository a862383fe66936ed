use crate::core::{Block, Transaction};
use crate::error::Result;
use crate::network::PeerAddr;
use async_trait::async_trait;
use std::sync::Arc;

/// How a caller identifies a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockQuery {
    Height(u64),
    Hash(Vec<u8>),
}

impl From<u64> for BlockQuery {
    fn from(height: u64) -> Self {
        BlockQuery::Height(height)
    }
}

impl From<Vec<u8>> for BlockQuery {
    fn from(hash: Vec<u8>) -> Self {
        BlockQuery::Hash(hash)
    }
}

/// The node the HTTP interface forwards to.
///
/// `add_block` and `add_transaction` are submissions: `Ok(())` means the node
/// received the item, not that it was accepted into the chain. Errors mean the
/// node itself could not be reached.
#[async_trait]
pub trait NodeActor: Send + Sync {
    async fn add_block(
        &self,
        peer: PeerAddr,
        new_block: Block,
        recall_block: Block,
        height: u64,
    ) -> Result<()>;

    async fn add_transaction(&self, tx: Transaction) -> Result<()>;

    async fn get_block(&self, query: BlockQuery) -> Result<Option<Block>>;

    async fn current_block(&self) -> Result<Option<Block>>;

    async fn peers(&self) -> Result<Vec<PeerAddr>>;
}

pub type SharedNode = Arc<dyn NodeActor>;
