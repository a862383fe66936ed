use crate::network::PeerAddr;
use crate::node::BlockQuery;
use clap::{Parser, Subcommand};
use data_encoding::HEXLOWER_PERMISSIVE;
use std::str::FromStr;

/// A block named on the command line: decimal height or hex hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockId {
    Height(u64),
    Hash(Vec<u8>),
}

impl FromStr for BlockId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(height) = s.parse::<u64>() {
            return Ok(BlockId::Height(height));
        }
        HEXLOWER_PERMISSIVE
            .decode(s.as_bytes())
            .map(BlockId::Hash)
            .map_err(|_| format!("Invalid block id: {s}. Use a height or a hex hash"))
    }
}

impl From<BlockId> for BlockQuery {
    fn from(id: BlockId) -> Self {
        match id {
            BlockId::Height(height) => BlockQuery::Height(height),
            BlockId::Hash(hash) => BlockQuery::Hash(hash),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "weavelink", version)]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "start-node", about = "Start a node serving the peer interface")]
    StartNode {
        #[arg(long, help = "Port to listen on (defaults to NODE_PORT or 1984)")]
        port: Option<u16>,
        #[arg(long = "join", help = "Peer to fetch the genesis block from")]
        join: Vec<PeerAddr>,
        #[arg(long, help = "Mining difficulty in leading zero bits")]
        difficulty: Option<u32>,
        #[arg(long, help = "Mine a block every N seconds and push it to peers")]
        mine: Option<u64>,
    },
    #[command(name = "ping", about = "Check whether a peer is answering")]
    Ping {
        #[arg(help = "Peer address, e.g. 127.0.0.1:1984")]
        peer: PeerAddr,
    },
    #[command(name = "get-block", about = "Fetch a block from a peer")]
    GetBlock {
        peer: PeerAddr,
        #[arg(help = "Block height or hex hash")]
        id: BlockId,
    },
    #[command(name = "send-tx", about = "Submit a transaction to a peer")]
    SendTx {
        peer: PeerAddr,
        #[arg(long)]
        target: String,
        #[arg(long)]
        quantity: u64,
        #[arg(long, default_value_t = 0)]
        reward: u64,
        #[arg(long, default_value = "", help = "Payload carried by the transaction")]
        data: String,
    },
    #[command(
        name = "performance",
        about = "Show recorded performance for a peer, or for every tracked peer"
    )]
    Performance { peer: Option<PeerAddr> },
    #[command(name = "reset-peer", about = "Reset recorded performance for a peer")]
    ResetPeer { peer: PeerAddr },
}
