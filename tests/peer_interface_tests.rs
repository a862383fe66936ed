//! Peer interface integration tests
//!
//! Real servers on loopback ports, real clients calling them.

use hyper::{Method, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use weavelink::core::WireCodec;
use weavelink::network::routes::{API_PATH, BLOCK_PATH};
use weavelink::{
    Block, BlockQuery, Client, NodeActor, NodeHandle, Performance, PeerAddr, PerformanceStore,
    Server, SharedNode, Transaction,
};

const DIFFICULTY: u32 = 4;

struct TestPeer {
    node: NodeHandle,
    server: Server,
    addr: PeerAddr,
}

impl TestPeer {
    fn start(genesis: Block) -> TestPeer {
        TestPeer::start_mining_at(genesis, DIFFICULTY)
    }

    fn start_mining_at(genesis: Block, difficulty: u32) -> TestPeer {
        let node = NodeHandle::spawn(genesis, difficulty).unwrap();
        let shared: SharedNode = Arc::new(node.clone());
        let server = Server::with_node(shared).unwrap();
        let (local, _) = server
            .spawn(SocketAddr::from(([127, 0, 0, 1], 0)))
            .unwrap();
        TestPeer {
            node,
            server,
            addr: PeerAddr::localhost(local.port()),
        }
    }
}

fn client() -> Client {
    Client::new(PerformanceStore::temporary().unwrap())
        .with_timeouts(Duration::from_secs(5), Duration::from_secs(2))
}

#[tokio::test]
async fn test_pushed_transaction_is_mined() {
    let a = TestPeer::start(Block::genesis(DIFFICULTY).unwrap());
    let client = client();

    let tx = Transaction::new("target-wallet", 25, 1, b"hello weave");
    let response = client.send_new_tx(a.addr, &tx).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());

    let mined = a.node.mine().await.unwrap();
    assert_eq!(mined.get_height(), 1);

    let fetched = client.get_block(a.addr, 1u64).await.unwrap().unwrap();
    assert_eq!(fetched, mined);
    assert_eq!(fetched.get_txs(), &[tx]);
}

#[tokio::test]
async fn test_pushed_block_extends_peer() {
    let genesis = Block::genesis(DIFFICULTY).unwrap();
    let a = TestPeer::start(genesis.clone());
    let b = TestPeer::start(genesis.clone());
    let client = client();

    let b1 = b.node.mine().await.unwrap();
    let recall = b.node.recall_block_for(&b1).await.unwrap().unwrap();
    assert_eq!(recall, genesis);

    let response = client
        .send_new_block(a.addr, b.addr.port(), &b1, &recall)
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let blocks = a.node.blocks().await.unwrap();
    assert_eq!(
        blocks,
        vec![
            b1.get_indep_hash().to_vec(),
            genesis.get_indep_hash().to_vec()
        ]
    );
    assert_eq!(a.node.peers().await.unwrap(), vec![b.addr]);
    assert_eq!(client.get_peers(a.addr).await.unwrap(), vec![b.addr]);
    assert_eq!(
        client.get_block(a.addr, 1u64).await.unwrap().as_ref(),
        Some(&b1)
    );
    assert_eq!(
        client
            .get_block(a.addr, b1.get_indep_hash().to_vec())
            .await
            .unwrap()
            .as_ref(),
        Some(&b1)
    );
    assert_eq!(client.get_current_block(a.addr).await.unwrap(), Some(b1));
}

#[tokio::test]
async fn test_block_lookup_by_height_and_hash() {
    let genesis = Block::genesis(DIFFICULTY).unwrap();
    let a = TestPeer::start(genesis.clone());
    let client = client();

    let by_height = client.get_block(a.addr, 0u64).await.unwrap().unwrap();
    let by_hash = client
        .get_block(a.addr, genesis.get_indep_hash().to_vec())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_height, genesis);
    assert_eq!(by_hash, genesis);
}

#[tokio::test]
async fn test_unknown_blocks_are_not_found() {
    let a = TestPeer::start(Block::genesis(DIFFICULTY).unwrap());
    let client = client();

    assert_eq!(client.get_block(a.addr, 99u64).await.unwrap(), None);
    assert_eq!(
        client
            .get_block(a.addr, BlockQuery::Hash(vec![0xab; 32]))
            .await
            .unwrap(),
        None
    );

    let response = client
        .request(
            Method::GET,
            a.addr,
            "/api/block/height/99",
            &[],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(&response.body[..], b"Block not found.");
}

#[tokio::test]
async fn test_malformed_submission_does_not_stop_server() {
    let a = TestPeer::start(Block::genesis(DIFFICULTY).unwrap());
    let client = client();

    let response = client
        .request(
            Method::POST,
            a.addr,
            BLOCK_PATH,
            &[],
            Some(b"{\"new_block\": ".to_vec()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);

    let response = client
        .request(Method::GET, a.addr, API_PATH, &[], None, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(client.is_alive(a.addr).await);
    assert_eq!(a.node.blocks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unsupported_request() {
    let a = TestPeer::start(Block::genesis(DIFFICULTY).unwrap());
    let client = client();

    let response = client
        .request(
            Method::GET,
            a.addr,
            "/api/wallet",
            &[],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&response.body[..], b"Request type not found.");
}

#[tokio::test]
async fn test_performance_accumulates_per_peer() {
    let a = TestPeer::start(Block::genesis(DIFFICULTY).unwrap());
    let client = client();
    let never_called = PeerAddr::new(10, 1, 2, 3, 1984);

    let mut expected_bytes = 0;
    for i in 0..3u64 {
        let tx = Transaction::new("perf-target", i, 0, &vec![7u8; (i as usize) * 10]);
        expected_bytes += tx.to_wire().unwrap().len() as u64;
        client.send_new_tx(a.addr, &tx).await.unwrap();
    }

    let perf = client.get_performance(a.addr);
    assert_eq!(perf.transfers, 3);
    assert_eq!(perf.bytes, expected_bytes);
    assert!(perf.time > 0);
    assert_eq!(perf.timestamp, 0);
    assert_eq!(client.get_performance(never_called), Performance::default());

    let touched = client.update_timer(a.addr);
    assert!(touched.timestamp > 0);
    assert_eq!(touched.transfers, 3);

    client.reset_peer(a.addr).unwrap();
    assert_eq!(client.get_performance(a.addr), Performance::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_accumulate() {
    let a = TestPeer::start(Block::genesis(DIFFICULTY).unwrap());
    let client = client();

    let txs: Vec<Transaction> = (0..8u64)
        .map(|i| Transaction::new("concurrent", i, 1, &vec![1u8; (i as usize) * 3]))
        .collect();
    let expected_bytes: u64 = txs
        .iter()
        .map(|tx| tx.to_wire().unwrap().len() as u64)
        .sum();

    let calls: Vec<_> = txs
        .into_iter()
        .map(|tx| {
            let client = client.clone();
            let peer = a.addr;
            tokio::spawn(async move { client.send_new_tx(peer, &tx).await })
        })
        .collect();
    for call in calls {
        assert_eq!(call.await.unwrap().unwrap().status, StatusCode::OK);
    }

    let perf = client.get_performance(a.addr);
    assert_eq!(perf.transfers, 8);
    assert_eq!(perf.bytes, expected_bytes);
    assert!(perf.time > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_liveness_while_mining() {
    let genesis = Block::genesis(DIFFICULTY).unwrap();
    // Unreachable difficulty: the search only ends when the node is dropped.
    let a = TestPeer::start_mining_at(genesis.clone(), 64);
    let client = client();

    let miner = {
        let node = a.node.clone();
        tokio::spawn(async move { node.mine().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let alive = tokio::time::timeout(Duration::from_secs(2), client.is_alive(a.addr))
        .await
        .unwrap();
    assert!(alive);
    assert_eq!(
        client.get_block(a.addr, 0u64).await.unwrap(),
        Some(genesis)
    );
    assert!(!miner.is_finished());
    miner.abort();
}

#[tokio::test]
async fn test_rebind_at_runtime() {
    let first_genesis = Block::genesis(DIFFICULTY).unwrap();
    let second_genesis = Block::genesis(DIFFICULTY).unwrap();
    let a = TestPeer::start(first_genesis.clone());
    let client = client();

    assert_eq!(
        client.get_block(a.addr, 0u64).await.unwrap(),
        Some(first_genesis)
    );

    let replacement: SharedNode =
        Arc::new(NodeHandle::spawn(second_genesis.clone(), DIFFICULTY).unwrap());
    a.server.bind_node(replacement).unwrap();

    assert_eq!(
        client.get_block(a.addr, 0u64).await.unwrap(),
        Some(second_genesis)
    );
}

#[tokio::test]
async fn test_unbound_server_is_unavailable() {
    let server = Server::new();
    let (local, _) = server
        .spawn(SocketAddr::from(([127, 0, 0, 1], 0)))
        .unwrap();
    let peer = PeerAddr::localhost(local.port());
    let client = client();

    assert!(client.is_alive(peer).await);
    let response = client
        .request(
            Method::GET,
            peer,
            "/api/block/height/0",
            &[],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(client.get_block(peer, 0u64).await.is_err());
}

#[tokio::test]
async fn test_shutdown_stops_listener() {
    let server = Server::new();
    let (local, serving) = server
        .spawn(SocketAddr::from(([127, 0, 0, 1], 0)))
        .unwrap();
    let peer = PeerAddr::localhost(local.port());
    let client = client();
    assert!(client.is_alive(peer).await);

    server.shutdown();
    serving.await.unwrap();
    assert!(!client.is_alive(peer).await);
}
