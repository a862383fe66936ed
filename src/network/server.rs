use crate::core::{Block, Transaction, WireCodec};
use crate::error::{Result, WeaveError};
use crate::network::routes::{BlockSubmission, Route};
use crate::network::PeerAddr;
use crate::node::{BlockQuery, SharedNode};
use hyper::body::{Bytes, HttpBody};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const UNSUPPORTED_BODY: &str = "Request type not found.";
const MALFORMED_BODY: &str = "Malformed request.";
const NOT_FOUND_BODY: &str = "Block not found.";
const UNAVAILABLE_BODY: &str = "Node unavailable.";
const INTERNAL_BODY: &str = "Internal error.";

pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// The node the server currently forwards to. Handlers resolve it per request,
/// so a swap takes effect for the next request on every connection.
#[derive(Default)]
struct NodeBinding {
    current: RwLock<Option<SharedNode>>,
}

impl NodeBinding {
    fn swap(&self, node: SharedNode) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|e| WeaveError::NodeUnavailable(format!("Failed to acquire node lock: {e}")))?;
        if current.take().is_some() {
            info!("Unregistered previous node binding");
        }
        *current = Some(node);
        info!("Registered node binding");
        Ok(())
    }

    fn node(&self) -> Result<SharedNode> {
        self.current
            .read()
            .map_err(|e| WeaveError::NodeUnavailable(format!("Failed to acquire node lock: {e}")))?
            .clone()
            .ok_or_else(|| WeaveError::NodeUnavailable("no node bound".to_string()))
    }
}

/// Inbound peer interface
pub struct Server {
    binding: Arc<NodeBinding>,
    shutdown: Arc<Notify>,
    max_body_bytes: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// A server with no node bound yet; requests that need one get 503 until `bind_node`
    pub fn new() -> Server {
        Server {
            binding: Arc::new(NodeBinding::default()),
            shutdown: Arc::new(Notify::new()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Largest request body accepted; bigger bodies are answered as malformed
    pub fn with_max_body_bytes(mut self, limit: usize) -> Server {
        self.max_body_bytes = limit;
        self
    }

    pub fn with_node(node: SharedNode) -> Result<Server> {
        let server = Server::new();
        server.bind_node(node)?;
        Ok(server)
    }

    /// Point the server at a different node. Safe before or after `spawn`.
    pub fn bind_node(&self, node: SharedNode) -> Result<()> {
        self.binding.swap(node)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.node().is_ok()
    }

    /// Bind and serve on a background task. Returns the bound address, which
    /// differs from `addr` when port 0 was requested.
    pub fn spawn(&self, addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>)> {
        let binding = Arc::clone(&self.binding);
        let limit = self.max_body_bytes;
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let remote = conn.remote_addr();
            let binding = Arc::clone(&binding);
            debug!("Accepted connection from {remote}");
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, remote, Arc::clone(&binding), limit)
                }))
            }
        });

        let server = hyper::Server::try_bind(&addr)
            .map_err(|e| WeaveError::Network(format!("Failed to bind to {addr}: {e}")))?
            .serve(make_service);
        let local_addr = server.local_addr();
        info!("Peer interface listening on http://{local_addr}");

        let shutdown = Arc::clone(&self.shutdown);
        let graceful = server.with_graceful_shutdown(async move {
            shutdown.notified().await;
            info!("Peer interface on {local_addr} shutting down");
        });

        let handle = tokio::spawn(async move {
            if let Err(e) = graceful.await {
                error!("Server error: {e}");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop the running listener. In-flight requests are finished first.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn json(body: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

async fn handle_request(
    req: Request<Body>,
    remote: SocketAddr,
    binding: Arc<NodeBinding>,
    limit: usize,
) -> std::result::Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match dispatch(req, remote, &binding, limit).await {
        Ok(response) => response,
        Err(WeaveError::Decode(msg)) => {
            warn!("Malformed {method} {path} from {remote}: {msg}");
            text(StatusCode::INTERNAL_SERVER_ERROR, MALFORMED_BODY)
        }
        Err(WeaveError::NodeUnavailable(msg)) => {
            warn!("Cannot serve {method} {path} from {remote}: {msg}");
            text(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY)
        }
        Err(e) => {
            error!("Failed to handle {method} {path} from {remote}: {e}");
            text(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_BODY)
        }
    };
    debug!("{method} {path} from {remote} -> {}", response.status());
    Ok(response)
}

async fn dispatch(
    req: Request<Body>,
    remote: SocketAddr,
    binding: &NodeBinding,
    limit: usize,
) -> Result<Response<Body>> {
    match Route::parse(req.method(), req.uri().path())? {
        Route::Health => Ok(text(StatusCode::OK, "OK")),
        Route::SubmitBlock => {
            let body = read_body(req.into_body(), limit).await?;
            let submission = BlockSubmission::decode(&body)?;
            let peer = PeerAddr::from_ip(remote.ip(), submission.port)?;
            let new_block = Block::from_json_value(submission.new_block)?;
            let recall_block = Block::from_json_value(submission.recall_block)?;
            let height = new_block.get_height();

            info!(
                "Received block {} at height {height} from {peer}",
                new_block.hash_hex()
            );
            binding
                .node()?
                .add_block(peer, new_block, recall_block, height)
                .await?;
            Ok(empty(StatusCode::OK))
        }
        Route::SubmitTx => {
            let body = read_body(req.into_body(), limit).await?;
            let tx = Transaction::from_wire(&body)?;
            info!("Received transaction {} from {remote}", tx.id_hex());
            binding.node()?.add_transaction(tx).await?;
            Ok(empty(StatusCode::OK))
        }
        Route::BlockByHash(hash) => block_response(binding, BlockQuery::Hash(hash)).await,
        Route::BlockByHeight(height) => block_response(binding, BlockQuery::Height(height)).await,
        Route::CurrentBlock => match binding.node()?.current_block().await? {
            Some(block) => Ok(json(block.to_wire()?)),
            None => Ok(text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)),
        },
        Route::Peers => {
            let peers = binding.node()?.peers().await?;
            let body = serde_json::to_vec(&peers)
                .map_err(|e| WeaveError::Serialization(format!("Failed to encode peers: {e}")))?;
            Ok(json(body))
        }
        Route::Unsupported => Ok(text(StatusCode::INTERNAL_SERVER_ERROR, UNSUPPORTED_BODY)),
    }
}

/// Collect a request body, refusing anything over `limit` bytes
async fn read_body(mut body: Body, limit: usize) -> Result<Bytes> {
    let announced = body.size_hint().lower();
    if announced > limit as u64 {
        return Err(WeaveError::Decode(format!(
            "body of {announced} bytes exceeds limit of {limit}"
        )));
    }
    let mut buf = Vec::with_capacity(announced as usize);
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(WeaveError::Decode(format!(
                "body exceeds limit of {limit} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

async fn block_response(binding: &NodeBinding, query: BlockQuery) -> Result<Response<Body>> {
    match binding.node()?.get_block(query).await? {
        Some(block) => Ok(json(block.to_wire()?)),
        None => Ok(text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeHandle;

    #[tokio::test]
    async fn test_rebinding_replaces_node() {
        let genesis = Block::genesis(2).unwrap();
        let first: SharedNode = Arc::new(NodeHandle::spawn(genesis.clone(), 2).unwrap());
        let second: SharedNode = Arc::new(NodeHandle::spawn(Block::genesis(2).unwrap(), 2).unwrap());

        let server = Server::new();
        assert!(!server.is_bound());
        server.bind_node(first).unwrap();
        server.bind_node(Arc::clone(&second)).unwrap();

        let bound = server.binding.node().unwrap();
        assert!(Arc::ptr_eq(&bound, &second));
        let block = bound.get_block(BlockQuery::Height(0)).await.unwrap().unwrap();
        assert_ne!(block, genesis);
    }

    #[tokio::test]
    async fn test_unbound_server_reports_unavailable() {
        let binding = NodeBinding::default();
        let req = Request::get("/api/block/height/0").body(Body::empty()).unwrap();
        let remote: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let response = handle_request(req, remote, Arc::new(binding), DEFAULT_MAX_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_needs_no_node() {
        let req = Request::get("/api").body(Body::empty()).unwrap();
        let remote: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let response = handle_request(
            req,
            remote,
            Arc::new(NodeBinding::default()),
            DEFAULT_MAX_BODY_BYTES,
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_oversized_body_is_malformed() {
        let binding = NodeBinding::default();
        let node: SharedNode = Arc::new(NodeHandle::spawn(Block::genesis(2).unwrap(), 2).unwrap());
        binding.swap(node).unwrap();
        let remote: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let req = Request::post("/api/tx")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();
        let response = handle_request(req, remote, Arc::new(binding), 16).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], MALFORMED_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit_is_cut_off() {
        let (mut sender, body) = Body::channel();
        tokio::spawn(async move {
            for _ in 0..4 {
                if sender.send_data(Bytes::from(vec![b'y'; 10])).await.is_err() {
                    break;
                }
            }
        });
        assert!(matches!(read_body(body, 25).await, Err(WeaveError::Decode(_))));
        assert_eq!(&read_body(Body::from("small"), 25).await.unwrap()[..], b"small");
    }
}
