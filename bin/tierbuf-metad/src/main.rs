//! Tierbuf metadata daemon.
//!
//! One instance runs per node. It creates the node's metadata region in
//! shared memory, serves the metadata RPC surface to peer nodes, and
//! periodically flushes this node's capacity deltas to the global system
//! view node.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tierbuf_common::Config;
use tierbuf_metadata::{MemoryBufferPool, MemoryNameStore, MetadataManager, MetadataService};
use tierbuf_rpc::{RpcServer, TcpTransport};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tierbuf-metad")]
#[command(about = "Tierbuf metadata node daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/tierbuf/metad.toml")]
    config: String,

    /// Node id override (1..N)
    #[arg(long)]
    node_id: Option<u32>,

    /// Listen address override for the metadata RPC server
    #[arg(short, long)]
    listen: Option<String>,

    /// Peer RPC addresses ordered by node id (repeat once per node)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match std::fs::read_to_string(&args.config) {
        Ok(text) => toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", args.config))?,
        Err(err) => {
            warn!(path = %args.config, %err, "config file not readable, using defaults");
            Config::default()
        }
    };

    if let Some(node_id) = args.node_id {
        config.cluster.node_id = node_id;
    }
    if !args.peers.is_empty() {
        config.cluster.peers = args.peers.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting tierbuf metadata daemon");

    let config = load_config(&args)?;
    let node_id = config.cluster.node_id;
    info!(
        node_id,
        num_nodes = config.num_nodes(),
        "cluster membership"
    );

    let listen = args
        .listen
        .clone()
        .or_else(|| config.cluster.peers.get(node_id as usize - 1).cloned())
        .unwrap_or_else(|| "0.0.0.0:9710".to_string());

    let mdm = MetadataManager::create_node(&config)
        .with_context(|| "failed to create the metadata shared memory region")?;
    info!(
        segment = %MetadataManager::shmem_name(&config),
        bytes = config.metadata_arena_bytes(),
        "metadata region initialized"
    );

    let pool = Arc::new(MemoryBufferPool::new(node_id, &config.devices));
    let store = Arc::new(MemoryNameStore::default());
    let transport = Arc::new(TcpTransport::new(node_id, config.cluster.peers.clone()));
    let service = Arc::new(MetadataService::new(mdm, store, pool, transport));

    let server = RpcServer::bind(&listen)?;
    info!(addr = %server.local_addr()?, "serving metadata rpc");
    let server_thread = server.spawn(Arc::clone(&service) as Arc<dyn tierbuf_rpc::RpcHandler>);

    // Flush capacity deltas to the global view node on the configured
    // cadence.
    let interval = Duration::from_millis(service.manager().svs_update_interval_ms().max(1));
    let updater = Arc::clone(&service);
    std::thread::spawn(move || loop {
        std::thread::sleep(interval);
        if let Err(err) = updater.update_global_system_view_state() {
            warn!(%err, "failed to flush capacity deltas to the global view");
        }
    });

    server_thread
        .join()
        .map_err(|_| anyhow::anyhow!("rpc server thread panicked"))?;
    Ok(())
}
