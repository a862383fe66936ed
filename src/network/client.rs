// Outbound calls to peers. Each call opens its own connection, sends one request,
// reads the whole response and tears the connection down again. Every call that
// gets a response back (any status) feeds one sample into the performance store.

use crate::config::Config;
use crate::core::{Block, Transaction, WireCodec};
use crate::error::{Result, WeaveError};
use crate::network::routes::{
    block_by_hash_path, block_by_height_path, BlockSubmission, API_PATH, BLOCK_PATH,
    CURRENT_BLOCK_PATH, PEERS_PATH, TX_PATH,
};
use crate::network::PeerAddr;
use crate::node::BlockQuery;
use crate::storage::{Performance, PerformanceStore};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{Body, HeaderMap, Method, Request, StatusCode, Uri};
use log::{debug, error, warn};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Sent on every request unless the caller supplies the same header
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("user-agent", concat!("weavelink/", env!("CARGO_PKG_VERSION"))),
    ("accept", "*/*"),
    ("content-type", "application/json"),
    ("connection", "close"),
];

#[derive(Debug, Clone)]
pub struct PeerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl PeerResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Aborts the connection driver when the call ends, however it ends.
struct ConnectionGuard(JoinHandle<()>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn build_request(
    method: Method,
    peer: PeerAddr,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<Vec<u8>>,
) -> Result<Request<Body>> {
    let mut merged = HeaderMap::new();
    for (name, value) in DEFAULT_HEADERS {
        merged.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    let host = HeaderValue::from_str(&peer.to_string())
        .map_err(|e| WeaveError::Network(format!("Invalid host header for {peer}: {e}")))?;
    merged.insert(HOST, host);
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| WeaveError::Network(format!("Invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| WeaveError::Network(format!("Invalid value for header {name}: {e}")))?;
        merged.insert(name, value);
    }

    let uri = path
        .parse::<Uri>()
        .map_err(|e| WeaveError::Network(format!("Invalid request path {path}: {e}")))?;

    let mut request = Request::new(body.map(Body::from).unwrap_or_else(Body::empty));
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.headers_mut() = merged;
    Ok(request)
}

#[derive(Clone)]
pub struct Client {
    performance: PerformanceStore,
    timeout: Duration,
    connect_timeout: Duration,
}

impl Client {
    pub fn new(performance: PerformanceStore) -> Client {
        Client {
            performance,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn from_config(performance: PerformanceStore, config: &Config) -> Client {
        Client {
            performance,
            timeout: config.request_timeout(),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Timeout used by the helpers, and the upper bound on connection setup
    pub fn with_timeouts(mut self, timeout: Duration, connect_timeout: Duration) -> Client {
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn performance_store(&self) -> &PerformanceStore {
        &self.performance
    }

    /// Issue one request to `peer`. Caller headers override the defaults.
    ///
    /// A response with any status counts as a completed transfer and is
    /// recorded; connection failures and timeouts are not.
    pub async fn request(
        &self,
        method: Method,
        peer: PeerAddr,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<PeerResponse> {
        let bytes_sent = body.as_ref().map_or(0, Vec::len) as u64;
        let request = build_request(method.clone(), peer, path, headers, body)?;

        let started = Instant::now();
        let response = tokio::time::timeout(timeout, self.exchange(peer, request, timeout))
            .await
            .map_err(|_| {
                WeaveError::Timeout(format!("{method} {path} to {peer} exceeded {timeout:?}"))
            })??;
        let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

        debug!(
            "{method} {path} to {peer} -> {} in {micros}us ({bytes_sent} bytes sent)",
            response.status
        );
        if let Err(e) = self.performance.record(&peer, bytes_sent, micros) {
            error!("Failed to record performance for {peer}: {e}");
        }
        Ok(response)
    }

    async fn exchange(
        &self,
        peer: PeerAddr,
        request: Request<Body>,
        timeout: Duration,
    ) -> Result<PeerResponse> {
        let connect_budget = timeout.min(self.connect_timeout);
        let stream = tokio::time::timeout(connect_budget, TcpStream::connect(peer.socket_addr()))
            .await
            .map_err(|_| {
                WeaveError::Timeout(format!("Connecting to {peer} exceeded {connect_budget:?}"))
            })?
            .map_err(|e| WeaveError::Network(format!("Failed to connect to {peer}: {e}")))?;

        let (mut sender, connection) = hyper::client::conn::handshake(stream).await?;
        let _guard = ConnectionGuard(tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection to {peer} ended with error: {e}");
            }
        }));

        let response = sender.send_request(request).await?;
        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body).await?;

        Ok(PeerResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// True if the peer answers its liveness check
    pub async fn is_alive(&self, peer: PeerAddr) -> bool {
        match self
            .request(Method::GET, peer, API_PATH, &[], None, self.timeout)
            .await
        {
            Ok(response) => response.is_success(),
            Err(e) => {
                debug!("Peer {peer} is not answering: {e}");
                false
            }
        }
    }

    pub async fn send_new_tx(&self, peer: PeerAddr, tx: &Transaction) -> Result<PeerResponse> {
        let body = tx.to_wire()?;
        self.request(Method::POST, peer, TX_PATH, &[], Some(body), self.timeout)
            .await
    }

    /// Push a freshly mined block. `local_port` tells the peer where we listen.
    pub async fn send_new_block(
        &self,
        peer: PeerAddr,
        local_port: u16,
        new_block: &Block,
        recall_block: &Block,
    ) -> Result<PeerResponse> {
        let submission = BlockSubmission {
            new_block: new_block.to_json_value()?,
            recall_block: recall_block.to_json_value()?,
            port: local_port,
        };
        let body = serde_json::to_vec(&submission)
            .map_err(|e| WeaveError::Serialization(format!("Failed to encode submission: {e}")))?;
        self.request(Method::POST, peer, BLOCK_PATH, &[], Some(body), self.timeout)
            .await
    }

    /// Fetch a block by height or hash. `Ok(None)` means the peer doesn't have it.
    pub async fn get_block(
        &self,
        peer: PeerAddr,
        id: impl Into<BlockQuery>,
    ) -> Result<Option<Block>> {
        let path = match id.into() {
            BlockQuery::Height(height) => block_by_height_path(height),
            BlockQuery::Hash(hash) => block_by_hash_path(&hash),
        };
        self.fetch_block(peer, &path).await
    }

    pub async fn get_current_block(&self, peer: PeerAddr) -> Result<Option<Block>> {
        self.fetch_block(peer, CURRENT_BLOCK_PATH).await
    }

    async fn fetch_block(&self, peer: PeerAddr, path: &str) -> Result<Option<Block>> {
        let response = self
            .request(Method::GET, peer, path, &[], None, self.timeout)
            .await?;
        match response.status {
            StatusCode::OK => Ok(Some(Block::from_wire(&response.body)?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(WeaveError::Network(format!(
                "Unexpected status {status} from {peer} for {path}"
            ))),
        }
    }

    pub async fn get_peers(&self, peer: PeerAddr) -> Result<Vec<PeerAddr>> {
        let response = self
            .request(Method::GET, peer, PEERS_PATH, &[], None, self.timeout)
            .await?;
        if !response.is_success() {
            return Err(WeaveError::Network(format!(
                "Unexpected status {} from {peer} for {PEERS_PATH}",
                response.status
            )));
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| WeaveError::Decode(format!("Invalid peer list from {peer}: {e}")))
    }

    /// The peer's tracked performance, or the zero record. Never fails.
    pub fn get_performance(&self, peer: PeerAddr) -> Performance {
        self.performance.get(&peer).unwrap_or_else(|e| {
            error!("Failed to read performance for {peer}: {e}");
            Performance::default()
        })
    }

    /// Start tracking `peer` from a zero record
    pub fn reset_peer(&self, peer: PeerAddr) -> Result<()> {
        self.performance.reset(&peer)
    }

    /// Refresh the peer's timestamp. A peer with no record stays untracked.
    pub fn update_timer(&self, peer: PeerAddr) -> Performance {
        self.performance.touch(&peer).unwrap_or_else(|e| {
            warn!("Failed to touch performance for {peer}: {e}");
            Performance::default()
        })
    }

    /// Order peers by recorded throughput, fastest first
    pub fn rank_peers(&self, peers: &[PeerAddr]) -> Vec<PeerAddr> {
        self.performance.rank(peers)
    }
}
