//! The peer HTTP surface: which requests exist and what their bodies look like.

use crate::error::{Result, WeaveError};
use data_encoding::HEXLOWER_PERMISSIVE;
use hyper::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_PATH: &str = "/api";
pub const BLOCK_PATH: &str = "/api/block";
pub const TX_PATH: &str = "/api/tx";
pub const CURRENT_BLOCK_PATH: &str = "/api/block/current";
pub const PEERS_PATH: &str = "/api/peers";

pub fn block_by_hash_path(hash: &[u8]) -> String {
    format!("/api/block/hash/{}", HEXLOWER_PERMISSIVE.encode(hash))
}

pub fn block_by_height_path(height: u64) -> String {
    format!("/api/block/height/{height}")
}

/// Every request shape the server understands. Anything else is `Unsupported`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    SubmitBlock,
    SubmitTx,
    BlockByHash(Vec<u8>),
    BlockByHeight(u64),
    CurrentBlock,
    Peers,
    Unsupported,
}

impl Route {
    /// Match a request line. A known shape with an unparseable parameter
    /// (non-hex hash, non-decimal height) is a decode error, not `Unsupported`.
    pub fn parse(method: &Method, path: &str) -> Result<Route> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let route = match (method, segments.as_slice()) {
            (&Method::GET, ["api"]) => Route::Health,
            (&Method::POST, ["api", "block"]) => Route::SubmitBlock,
            (&Method::POST, ["api", "tx"]) => Route::SubmitTx,
            (&Method::GET, ["api", "block", "current"]) => Route::CurrentBlock,
            (&Method::GET, ["api", "block", "hash", hash]) => {
                let hash = HEXLOWER_PERMISSIVE
                    .decode(hash.as_bytes())
                    .map_err(|e| WeaveError::Decode(format!("Invalid block hash {hash}: {e}")))?;
                Route::BlockByHash(hash)
            }
            (&Method::GET, ["api", "block", "height", height]) => {
                let height = height
                    .parse::<u64>()
                    .map_err(|e| WeaveError::Decode(format!("Invalid block height {height}: {e}")))?;
                Route::BlockByHeight(height)
            }
            (&Method::GET, ["api", "peers"]) => Route::Peers,
            _ => Route::Unsupported,
        };
        Ok(route)
    }
}

/// Body of `POST /api/block`. All three fields are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSubmission {
    pub new_block: Value,
    pub recall_block: Value,
    /// The sender's listening port
    pub port: u16,
}

impl BlockSubmission {
    pub fn decode(body: &[u8]) -> Result<BlockSubmission> {
        serde_json::from_slice(body)
            .map_err(|e| WeaveError::Decode(format!("Invalid block submission: {e}")))
    }
}
