// Per-peer transfer statistics, kept in a sled tree so they survive restarts.
// Every mutation goes through sled's compare-and-swap so concurrent writers
// to the same peer never lose an update.

use crate::error::{Result, WeaveError};
use crate::network::PeerAddr;
use crate::utils::{current_timestamp, deserialize, serialize};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::cmp::Ordering;
use std::path::Path;

const PERFORMANCE_TREE: &str = "performance";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Performance {
    /// Completed requests
    pub transfers: u64,
    /// Cumulative elapsed microseconds
    pub time: u64,
    /// Cumulative request body bytes sent
    pub bytes: u64,
    /// Last touched, unix millis. Only `touch` moves it.
    pub timestamp: i64,
}

impl Performance {
    fn with_sample(mut self, bytes: u64, micros: u64) -> Performance {
        self.transfers = self.transfers.saturating_add(1);
        self.bytes = self.bytes.saturating_add(bytes);
        self.time = self.time.saturating_add(micros);
        self
    }

    /// Bytes per second over all tracked transfers
    pub fn throughput(&self) -> Option<f64> {
        if self.time == 0 {
            return None;
        }
        Some(self.bytes as f64 * 1_000_000.0 / self.time as f64)
    }
}

fn decode_or_default(peer: &PeerAddr, bytes: Option<&[u8]>) -> Performance {
    match bytes.map(deserialize::<Performance>) {
        Some(Ok(perf)) => perf,
        Some(Err(e)) => {
            warn!("Discarding unreadable performance record for {peer}: {e}");
            Performance::default()
        }
        None => Performance::default(),
    }
}

#[derive(Clone)]
pub struct PerformanceStore {
    tree: Tree,
}

impl PerformanceStore {
    pub fn open(path: &Path) -> Result<PerformanceStore> {
        let db = sled::open(path)
            .map_err(|e| WeaveError::Database(format!("Failed to open database: {e}")))?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &Db) -> Result<PerformanceStore> {
        let tree = db.open_tree(PERFORMANCE_TREE).map_err(|e| {
            WeaveError::Database(format!("Failed to open performance tree: {e}"))
        })?;
        Ok(PerformanceStore { tree })
    }

    /// In-memory store that disappears when dropped
    pub fn temporary() -> Result<PerformanceStore> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| WeaveError::Database(format!("Failed to open temporary database: {e}")))?;
        Self::from_db(&db)
    }

    fn key(peer: &PeerAddr) -> Vec<u8> {
        peer.to_string().into_bytes()
    }

    /// The peer's record, or `None` if nothing was ever recorded for it
    pub fn lookup(&self, peer: &PeerAddr) -> Result<Option<Performance>> {
        match self.tree.get(Self::key(peer))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The peer's record, or the zero record if absent
    pub fn get(&self, peer: &PeerAddr) -> Result<Performance> {
        Ok(self.lookup(peer)?.unwrap_or_default())
    }

    /// Add one transfer sample, creating the record if needed
    pub fn record(&self, peer: &PeerAddr, bytes: u64, micros: u64) -> Result<Performance> {
        let mut failure = None;
        let updated = self.tree.update_and_fetch(Self::key(peer), |old| {
            let next = decode_or_default(peer, old).with_sample(bytes, micros);
            match serialize(&next) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    failure = Some(e);
                    old.map(<[u8]>::to_vec)
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(decode_or_default(peer, updated.as_deref()))
    }

    /// Replace the peer's record with a zero record
    pub fn reset(&self, peer: &PeerAddr) -> Result<()> {
        self.tree
            .insert(Self::key(peer), serialize(&Performance::default())?)?;
        Ok(())
    }

    /// Refresh the timestamp of an existing record. Does not create one.
    pub fn touch(&self, peer: &PeerAddr) -> Result<Performance> {
        let now = current_timestamp()?;
        let mut failure = None;
        let updated = self.tree.update_and_fetch(Self::key(peer), |old| {
            let old = old?;
            let mut next = decode_or_default(peer, Some(old));
            next.timestamp = now;
            match serialize(&next) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    failure = Some(e);
                    Some(old.to_vec())
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(decode_or_default(peer, updated.as_deref()))
    }

    /// Every tracked peer and its record
    pub fn peers(&self) -> Result<Vec<(PeerAddr, Performance)>> {
        let mut peers = vec![];
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let addr = match std::str::from_utf8(&key).map(str::parse::<PeerAddr>) {
                Ok(Ok(addr)) => addr,
                _ => {
                    warn!("Skipping performance record with bad key {key:?}");
                    continue;
                }
            };
            peers.push((addr, deserialize(&value)?));
        }
        Ok(peers)
    }

    /// Order `peers` by recorded throughput, fastest first. Peers with no
    /// usable history keep their relative order at the end.
    pub fn rank(&self, peers: &[PeerAddr]) -> Vec<PeerAddr> {
        let mut scored: Vec<(PeerAddr, Option<f64>)> = peers
            .iter()
            .map(|peer| {
                let throughput = match self.get(peer) {
                    Ok(perf) => perf.throughput(),
                    Err(e) => {
                        error!("Failed to read performance for {peer}: {e}");
                        None
                    }
                };
                (*peer, throughput)
            })
            .collect();

        scored.sort_by(|a, b| match (a.1, b.1) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        scored.into_iter().map(|(peer, _)| peer).collect()
    }
}
