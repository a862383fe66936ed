use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, warn, LevelFilter};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use weavelink::{
    Block, Client, Command, NodeActor, NodeHandle, Opt, PeerAddr, Performance, PerformanceStore,
    Result, Server, SharedNode, Transaction, WeaveError, GLOBAL_CONFIG,
};

#[tokio::main]
async fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command).await {
        error!("Error: {e}");
        process::exit(1);
    }
}

/// Store used by one-off commands, separate from any running node's database
fn client_db_path() -> PathBuf {
    GLOBAL_CONFIG.get_data_dir().join("client")
}

fn open_client() -> Result<Client> {
    let store = PerformanceStore::open(&client_db_path())?;
    Ok(Client::from_config(store, &GLOBAL_CONFIG))
}

async fn run_command(command: Command) -> Result<()> {
    match command {
        Command::StartNode {
            port,
            join,
            difficulty,
            mine,
        } => {
            if let Some(port) = port {
                GLOBAL_CONFIG.set_port(port);
            }
            if let Some(difficulty) = difficulty {
                GLOBAL_CONFIG.set_difficulty(difficulty);
            }
            for peer in &join {
                GLOBAL_CONFIG.add_peer(peer.to_string());
            }
            start_node(mine.map(Duration::from_secs)).await?;
        }
        Command::Ping { peer } => {
            let client = open_client()?;
            if client.is_alive(peer).await {
                println!("{peer} is alive");
            } else {
                return Err(WeaveError::Network(format!("{peer} is not answering")));
            }
        }
        Command::GetBlock { peer, id } => {
            let client = open_client()?;
            match client.get_block(peer, id).await? {
                Some(block) => print_block(&block),
                None => println!("Block not found."),
            }
        }
        Command::SendTx {
            peer,
            target,
            quantity,
            reward,
            data,
        } => {
            let client = open_client()?;
            let tx = Transaction::new(&target, quantity, reward, data.as_bytes());
            let response = client.send_new_tx(peer, &tx).await?;
            if !response.is_success() {
                return Err(WeaveError::Network(format!(
                    "{peer} answered {}",
                    response.status
                )));
            }
            println!("Sent transaction {}", tx.id_hex());
        }
        Command::Performance { peer: Some(peer) } => {
            let client = open_client()?;
            print_performance(peer, &client.get_performance(peer));
        }
        Command::Performance { peer: None } => {
            let client = open_client()?;
            let tracked = client.performance_store().peers()?;
            if tracked.is_empty() {
                println!("No peers tracked yet");
            }
            for (peer, perf) in tracked {
                print_performance(peer, &perf);
                println!();
            }
        }
        Command::ResetPeer { peer } => {
            let client = open_client()?;
            client.reset_peer(peer)?;
            println!("Reset performance for {peer}");
        }
    }
    Ok(())
}

fn print_performance(peer: PeerAddr, perf: &Performance) {
    println!("Peer: {peer}");
    println!("Transfers: {}", perf.transfers);
    println!("Bytes: {}", perf.bytes);
    println!("Time (us): {}", perf.time);
    println!("Last seen: {}", perf.timestamp);
    match perf.throughput() {
        Some(rate) => println!("Throughput (bytes/s): {rate:.1}"),
        None => println!("Throughput: n/a"),
    }
}

fn print_block(block: &Block) {
    println!("Height: {}", block.get_height());
    println!("Hash: {}", block.hash_hex());
    println!("Previous: {}", HEXLOWER.encode(block.get_previous_block()));
    println!("Timestamp: {}", block.get_timestamp());
    for tx in block.get_txs() {
        println!(
            "- Transaction {} to {} quantity {} reward {} ({} data bytes)",
            tx.id_hex(),
            tx.get_target(),
            tx.get_quantity(),
            tx.get_reward(),
            tx.get_data().len()
        );
    }
}

fn configured_peers() -> Vec<PeerAddr> {
    GLOBAL_CONFIG
        .get_peers()
        .iter()
        .filter_map(|peer| match peer.parse() {
            Ok(peer) => Some(peer),
            Err(e) => {
                warn!("Ignoring configured peer {peer}: {e}");
                None
            }
        })
        .collect()
}

/// Take the genesis block from the fastest peer that has one, else make our own
async fn fetch_genesis(client: &Client, peers: &[PeerAddr], difficulty: u32) -> Result<Block> {
    for peer in client.rank_peers(peers) {
        match client.get_block(peer, 0u64).await {
            Ok(Some(block)) => {
                info!("Joined weave of {peer} at genesis {}", block.hash_hex());
                return Ok(block);
            }
            Ok(None) => warn!("{peer} has no genesis block"),
            Err(e) => warn!("Failed to fetch genesis from {peer}: {e}"),
        }
    }
    if !peers.is_empty() {
        warn!("No peer provided a genesis block, starting a new weave");
    }
    tokio::task::spawn_blocking(move || Block::genesis(difficulty))
        .await
        .map_err(|e| WeaveError::Mining(format!("Genesis mining task failed: {e}")))?
}

async fn start_node(mine_every: Option<Duration>) -> Result<()> {
    let port = GLOBAL_CONFIG.get_port();
    let difficulty = GLOBAL_CONFIG.get_difficulty();
    let store = PerformanceStore::open(&GLOBAL_CONFIG.node_db_path())?;
    let client = Client::from_config(store, &GLOBAL_CONFIG);

    let peers = configured_peers();
    let genesis = fetch_genesis(&client, &peers, difficulty).await?;
    let node = NodeHandle::spawn(genesis, difficulty)?;

    let shared: SharedNode = Arc::new(node.clone());
    let server = Server::with_node(shared)?.with_max_body_bytes(GLOBAL_CONFIG.max_body_bytes());
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let (local_addr, serving) = server.spawn(addr)?;
    info!("Node started on {local_addr}");

    let miner = mine_every.map(|every| tokio::spawn(mine_loop(node, client, peers, port, every)));

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, stopping node");
    if let Some(miner) = miner {
        miner.abort();
    }
    server.shutdown();
    serving
        .await
        .map_err(|e| WeaveError::Network(format!("Server task failed: {e}")))
}

async fn mine_loop(
    node: NodeHandle,
    client: Client,
    bootstrap: Vec<PeerAddr>,
    port: u16,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = mine_and_push(&node, &client, &bootstrap, port).await {
            error!("Mining round failed: {e}");
        }
    }
}

async fn mine_and_push(
    node: &NodeHandle,
    client: &Client,
    bootstrap: &[PeerAddr],
    port: u16,
) -> Result<()> {
    let block = node.mine().await?;
    let recall = node.recall_block_for(&block).await?.ok_or_else(|| {
        WeaveError::InvalidBlock(format!("No recall block for {}", block.hash_hex()))
    })?;

    let mut peers = node.peers().await?;
    for peer in bootstrap {
        if !peers.contains(peer) {
            peers.push(*peer);
        }
    }
    for peer in client.rank_peers(&peers) {
        match client.send_new_block(peer, port, &block, &recall).await {
            Ok(response) if response.is_success() => {
                info!("Pushed block {} to {peer}", block.get_height())
            }
            Ok(response) => warn!("{peer} answered {} to block push", response.status),
            Err(e) => warn!("Failed to push block to {peer}: {e}"),
        }
    }
    Ok(())
}
