mod api;
mod consensus;
mod constants;

use anyhow::Context;
use api::{AppState, NodeMaintainer};
use archive_core::client::InMemoryChainClient;
use archive_core::constants::DEFAULT_SEAL_INTERVAL_SECS;
use archive_core::{
    ChainClient, DrainPolicy, GenesisParams, MaintainerConfig, MemorySnapshotStore,
    SnapshotStore, VerificationPolicy,
};
use archive_storage::SledSnapshotStore;
use clap::Parser;
use consensus::HttpChainClient;
use constants::{DEFAULT_CONSENSUS_URL, DEFAULT_DATA_DIR, DEFAULT_LISTEN, DEFAULT_RPC_TIMEOUT_SECS};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Data directory for the sled snapshot store
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Base URL of the consensus gateway
    #[arg(long, default_value = DEFAULT_CONSENSUS_URL)]
    consensus_url: String,

    /// Use an in-process chain and keep snapshots in memory
    #[arg(long)]
    in_memory: bool,

    #[arg(long, default_value_t = DEFAULT_SEAL_INTERVAL_SECS)]
    seal_interval_secs: u64,

    /// What to do with drained records when a seal fails: restore or discard
    #[arg(long, default_value_t = DrainPolicy::Restore)]
    drain_policy: DrainPolicy,

    #[arg(long, default_value_t = DEFAULT_RPC_TIMEOUT_SECS)]
    rpc_timeout_secs: u64,

    /// Require this many consensus acknowledgements per block
    #[arg(long)]
    consensus_count: Option<u32>,

    /// Block verification asked of the consensus side: none, standard or strict
    #[arg(long, default_value_t = VerificationPolicy::Standard)]
    verification: VerificationPolicy,
}

impl Args {
    fn maintainer_config(&self) -> MaintainerConfig {
        let mut genesis = GenesisParams {
            verification: self.verification,
            ..GenesisParams::default()
        };
        if let Some(n) = self.consensus_count {
            genesis.consensus_count = n;
        }
        MaintainerConfig {
            seal_interval: Duration::from_secs(self.seal_interval_secs.max(1)),
            drain_policy: self.drain_policy,
            genesis,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.maintainer_config();

    let (client, snapshots): (Arc<dyn ChainClient>, Arc<dyn SnapshotStore>) = if args.in_memory {
        warn!("running with in-memory chain and snapshots, nothing is persisted");
        (
            Arc::new(InMemoryChainClient::new()),
            Arc::new(MemorySnapshotStore::new()),
        )
    } else {
        let client = HttpChainClient::new(
            args.consensus_url.as_str(),
            Duration::from_secs(args.rpc_timeout_secs),
        )
        .context("building consensus client")?;
        let store = SledSnapshotStore::open(&args.data_dir)?;
        (Arc::new(client), Arc::new(store))
    };

    let maintainer = NodeMaintainer::new(client, snapshots, config);
    let app = api::router(AppState {
        maintainer: maintainer.clone(),
    })
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = args.listen.parse()?;
    info!("archive-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
        })
        .await?;

    maintainer.shutdown().await;
    Ok(())
}
