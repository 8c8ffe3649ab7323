use clap::Parser;
use evg_core::config::Config;
use evg_core::consensus::constants::constants_for_network;
use evg_core::errors::ChainError;
use evg_core::protocols::{Message, NodeType, ProtocolMessageTypes};
use evg_logging::EvergreenLogger;
use evg_node::framing::{read_frame, write_frame};
use evg_node::node::{FullNode, OutboundMessage};
use evg_node::simulator::simulator_verifiers;
use evg_node::sync::{PeerPeak, SyncEngine};
use log::{error, info, warn, Level};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};

/// Evergreen full node.
///
/// The authenticated-transport layer (TLS, certificates) belongs to the
/// distribution that embeds this core; this binary speaks the framed
/// protocol over plain TCP and requires the simulator backends, since the
/// native proof-of-space, VDF and evaluator implementations are linked by
/// the distribution as well.
#[derive(Parser)]
#[command(name = "evg_node", version)]
struct Cli {
    /// Path to the YAML configuration tree.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Run with the deterministic simulator backends.
    #[arg(long)]
    simulator: bool,
}

type Connections = Arc<Mutex<HashMap<u64, mpsc::Sender<Message>>>>;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = if cli.config.exists() {
        match Config::load(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e}", cli.config.display());
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };
    let level = match config.logging.log_level.to_ascii_uppercase().as_str() {
        "ERROR" => Level::Error,
        "WARNING" | "WARN" => Level::Warn,
        "DEBUG" => Level::Debug,
        "TRACE" => Level::Trace,
        _ => Level::Info,
    };
    if let Err(e) = EvergreenLogger::build().level(level).init() {
        eprintln!("failed to install logger: {e}");
    }

    if !cli.simulator {
        error!("no external verifier backends are linked into this binary; run with --simulator");
        std::process::exit(1);
    }

    match run(Arc::new(config)).await {
        Ok(()) => {}
        Err(e) => {
            error!("node terminated: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(config: Arc<Config>) -> Result<(), ChainError> {
    let constants = Arc::new(constants_for_network(&config.selected_network).clone());
    info!(
        "starting evergreen node on {} (genesis {})",
        config.selected_network, constants.genesis_challenge
    );

    let chain_db = sled::open(&config.full_node.database_path)
        .map_err(|e| ChainError::Database(e.to_string()))?;
    let peer_db = sled::open(&config.full_node.peer_db_path)
        .map_err(|e| ChainError::Database(e.to_string()))?;
    let (peak_tx, mut peak_rx) = mpsc::channel::<PeerPeak>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let node = Arc::new(FullNode::new(
        &chain_db,
        &peer_db,
        config.clone(),
        constants.clone(),
        simulator_verifiers(),
        peak_tx,
        shutdown_rx.clone(),
    )?);
    let connections: Connections = Arc::new(Mutex::new(HashMap::new()));

    // bootstrap the address book from the DNS seeders when it is empty
    {
        let peers = node.peers.lock().await;
        let known = peers.candidate_addresses(1, Instant::now())?;
        if known.is_empty() {
            for address in peers.resolve_seeders(config.full_node.port).await {
                peers.record_address(&address.ip().to_string(), address.port())?;
            }
        }
    }

    let listener = TcpListener::bind((config.self_hostname.as_str(), config.full_node.port))
        .await
        .map_err(ChainError::Io)?;
    info!("listening on port {}", config.full_node.port);

    // initial sync: wait for peer peaks, then drive toward the heaviest
    let mut sync_engine = SyncEngine::new(
        config.full_node.clone(),
        constants.clone(),
        shutdown_rx.clone(),
    );
    let sync_node = node.clone();
    tokio::spawn(async move {
        match sync_engine.collect_peaks(&mut peak_rx).await {
            Ok(peaks) => {
                let local_weight = sync_node
                    .blockchain
                    .read()
                    .await
                    .peak_record()
                    .map_or(0, |record| record.weight);
                if let Some(target) = sync_engine.choose_target(&peaks, local_weight) {
                    // block fetches flow through the message handlers; the
                    // engine state is reported for observability
                    info!(
                        "sync target: height {} from peer {} ({:?})",
                        target.height,
                        target.peer_id,
                        sync_engine.state()
                    );
                } else {
                    info!("already at the heaviest known peak");
                }
            }
            Err(_) => info!("shutdown before initial sync finished"),
        }
    });

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, address)) => {
                        let node = node.clone();
                        let connections = connections.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                serve_connection(node, connections, stream, address.ip().to_string()).await
                            {
                                warn!("connection from {address} closed: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }
    chain_db.flush_async().await.map_err(|e| ChainError::Database(e.to_string()))?;
    Ok(())
}

/// One connection task: handshake, register, then a frame loop feeding the
/// node's single dispatch entry. The task owns its peer's resources; when
/// it returns, the peer is deregistered everywhere.
async fn serve_connection(
    node: Arc<FullNode>,
    connections: Connections,
    stream: TcpStream,
    host: String,
) -> Result<(), ChainError> {
    let (mut reader, mut writer) = stream.into_split();

    // inbound handshake first
    let first = read_frame(&mut reader)
        .await?
        .ok_or_else(|| ChainError::Peer("closed before handshake".to_string()))?;
    if first.msg_type != ProtocolMessageTypes::Handshake {
        return Err(ChainError::Peer("expected handshake".to_string()));
    }
    let handshake: evg_core::protocols::shared::Handshake = first.parse_as()?;
    if handshake.network_id != node.config.selected_network {
        return Err(ChainError::Peer(format!(
            "wrong network {}",
            handshake.network_id
        )));
    }
    let peer_id = {
        let mut peers = node.peers.lock().await;
        peers.register(
            &host,
            handshake.server_port,
            handshake.node_type,
            false,
            Instant::now(),
        )?
    };
    let ours = evg_core::protocols::shared::Handshake {
        network_id: node.config.selected_network.clone(),
        protocol_version: evg_core::protocols::shared::PROTOCOL_VERSION.to_string(),
        software_version: env!("CARGO_PKG_VERSION").to_string(),
        server_port: node.config.full_node.port,
        node_type: NodeType::FullNode,
        capabilities: evg_core::protocols::shared::default_capabilities(),
    };
    write_frame(
        &mut writer,
        &Message::new(ProtocolMessageTypes::Handshake, 0, &ours),
    )
    .await?;

    // writer task drains this peer's outbox
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(256);
    connections.lock().await.insert(peer_id, outbox_tx);
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if write_frame(&mut writer, &message).await.is_err() {
                break;
            }
        }
    });

    let result = async {
        while let Some(message) = read_frame(&mut reader).await? {
            let responses = node.handle_message(peer_id, message, unix_now()).await?;
            dispatch(&node, &connections, responses).await;
        }
        Ok::<(), ChainError>(())
    }
    .await;

    // release in reverse order of acquisition
    connections.lock().await.remove(&peer_id);
    writer_task.abort();
    node.subscriptions.lock().await.drop_peer(peer_id);
    node.peers.lock().await.disconnect(peer_id);
    result
}

/// Fans outbound messages to the live connections their targets resolve to.
async fn dispatch(node: &Arc<FullNode>, connections: &Connections, messages: Vec<OutboundMessage>) {
    for outbound in messages {
        let targets = node.resolve_target(outbound.target).await;
        let connections = connections.lock().await;
        for peer_id in targets {
            if let Some(sender) = connections.get(&peer_id) {
                if sender.try_send(outbound.message.clone()).is_err() {
                    // backpressure: a slow peer drops gossip rather than
                    // stalling the dispatch loop
                    warn!("peer {peer_id} outbox full, dropping {}", outbound.message.msg_type);
                }
            }
        }
    }
}
