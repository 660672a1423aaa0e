//! Node assembly: opens the stores, wires the engines and supervises
//! the long-running tasks until shutdown.

use crate::config::NodeConfig;
use crate::consensus::ConsensusEngine;
use crate::farming::{now_secs, FarmingEngine, ProofTracker};
use crate::network::{InboundHandlers, MempoolMessage, Network, PeerSet};
use crate::plots::{PlotCollection, DEFAULT_PLOT_CELLS};
use crate::sync;
use shadowy_core::{Chain, KvStore, Mempool, SledKv, Wallet};
use shared::{Result, TOPIC_MEMPOOL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Período do log de status do nó, em segundos
const STATUS_LOG_SECS: u64 = 60;

/// Runs a full node until ctrl-c
///
/// # Errors
///
/// `LockHeld` when another live process owns the chain database;
/// any store or network setup failure is fatal here
pub async fn run(config: NodeConfig) -> Result<()> {
    info!("🚀 starting shadowy node");

    // Stores and ledger. A held KV lock is fatal at startup.
    let kv: Arc<dyn KvStore> = Arc::new(SledKv::open(config.chain_path())?);
    let chain = Arc::new(Chain::open(kv)?);
    info!(height = chain.height(), "⛓️ chain ready");

    let wallet = Arc::new(Wallet::load_or_create(
        &config.wallet_path(),
        config.wallet_passphrase.as_deref(),
    )?);
    info!(address = %wallet.address(), "👛 wallet loaded");

    let mut plots = PlotCollection::load(&config.dirs)?;
    if plots.is_empty() && config.dev {
        info!("no plots found, dev mode farms a synthetic plot");
        plots = PlotCollection::synthetic(wallet.keypair().clone(), DEFAULT_PLOT_CELLS);
    }
    let plots = Arc::new(plots);

    let mempool = Arc::new(Mempool::new(config.mempool_config()));
    let proofs = Arc::new(ProofTracker::new());
    let peers = Arc::new(PeerSet::new());

    // Swarm task and its command handle
    let network = Network::new(config.p2p_port, &config.seeds, Arc::clone(&peers))?;
    let handle = network.handle();

    // Locally admitted transactions are announced on the mempool topic
    {
        let announcer_handle = handle.clone();
        mempool.set_announcer(Box::new(move |tx| {
            announcer_handle.publish_json(
                TOPIC_MEMPOOL,
                &MempoolMessage::AddTx {
                    transaction: tx.clone(),
                    timestamp: now_secs(),
                },
            );
        }));
    }

    let consensus = Arc::new(ConsensusEngine::new(
        Arc::clone(&chain),
        Arc::clone(&mempool),
        Arc::clone(&proofs),
        handle.clone(),
        Arc::clone(&peers),
        config.block_interval(),
    ));
    let farming = Arc::new(FarmingEngine::new(
        Arc::clone(&chain),
        Arc::clone(&plots),
        Arc::clone(&wallet),
        Arc::clone(&proofs),
        handle.clone(),
    ));

    let (shutdown_tx, shutdown) = watch::channel(false);

    let network_task = tokio::spawn(network.run(
        InboundHandlers {
            consensus: Arc::clone(&consensus),
            farming: Arc::clone(&farming),
            mempool: Arc::clone(&mempool),
            chain: Arc::clone(&chain),
        },
        shutdown.clone(),
    ));
    let election_task = tokio::spawn(Arc::clone(&consensus).run_leader_election(shutdown.clone()));
    let proposal_task = tokio::spawn(Arc::clone(&consensus).run_proposal_loop(shutdown.clone()));
    let farming_task = tokio::spawn(Arc::clone(&farming).run(shutdown.clone()));
    let status_task = tokio::spawn(run_status_loop(
        Arc::clone(&chain),
        Arc::clone(&peers),
        Arc::clone(&mempool),
        Arc::clone(&proofs),
        shutdown.clone(),
    ));

    // Give discovery a moment, then catch up with the tallest peer
    {
        let sync_handle = handle.clone();
        let sync_peers = Arc::clone(&peers);
        let sync_chain = Arc::clone(&chain);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            if let Err(err) = sync::initial_sync(&sync_handle, &sync_peers, &sync_chain).await {
                warn!(error = %err, "initial sync failed");
            }
        });
    }

    info!(
        p2p_port = config.p2p_port,
        api_port = config.api_port,
        "✅ node running, ctrl-c stops"
    );
    tokio::signal::ctrl_c().await?;

    info!("🛑 shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(
        network_task,
        election_task,
        proposal_task,
        farming_task,
        status_task
    );

    info!("👋 node stopped");
    Ok(())
}

/// Periodic status snapshot: height, connected peers, mempool load
/// and the best proof for the next height, logged together
async fn run_status_loop(
    chain: Arc<Chain>,
    peers: Arc<PeerSet>,
    mempool: Arc<Mempool>,
    proofs: Arc<ProofTracker>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(STATUS_LOG_SECS));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let height = chain.height();
                let best_distance = proofs
                    .best_for(height + 1)
                    .map(|best| best.proof.distance);
                info!(
                    height,
                    peers = peers.len(),
                    mempool = mempool.len(),
                    mempool_bytes = mempool.size_bytes(),
                    best_distance = ?best_distance,
                    "📊 node status"
                );
            }
        }
    }
}
