//! P2P networking layer over rust-libp2p
//!
//! One swarm task owns gossipsub (three protocol topics), mDNS
//! discovery and the `/shadowy/sync/1.0.0` request-response protocol.
//! Engines talk to the swarm through a command channel; inbound gossip
//! is dispatched to the consensus, farming and mempool handlers.

use crate::consensus::ConsensusEngine;
use crate::farming::FarmingEngine;
use futures::StreamExt;
use libp2p::{
    gossipsub, mdns, noise,
    request_response::{self, OutboundRequestId, ProtocolSupport},
    swarm::{NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, StreamProtocol, SwarmBuilder,
};
use serde::{Deserialize, Serialize};
use shadowy_core::{Block, Chain, Mempool, ProofSubmission, Transaction};
use shared::{NodeError, Result as NodeResult, SYNC_PROTOCOL, TOPIC_CONSENSUS, TOPIC_MEMPOOL, TOPIC_PROOFS};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Maximum blocks served per sync exchange
pub const SYNC_BATCH_LIMIT: u64 = 100;

/// Consensus topic envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsensusMessage {
    BlockProposal { proposal: Block, timestamp: u64 },
    BlockVote { vote: BlockVote, timestamp: u64 },
    BlockCommit { block: Block, timestamp: u64 },
}

/// A single vote on a pending proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockVote {
    pub block_hash: String,
    pub voter: String,
    pub approve: bool,
}

/// Proofs topic envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProofMessage {
    ProofSubmission {
        proof_submission: ProofSubmission,
        timestamp: u64,
    },
}

/// Mempool topic envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MempoolMessage {
    AddTx {
        transaction: Transaction,
        timestamp: u64,
    },
}

/// Sync stream request, one exchange per stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncRequest {
    Height,
    Blocks { start: u64, end: u64 },
}

/// Sync stream response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncResponse {
    Height { height: u64 },
    Blocks { blocks: Vec<Block> },
}

/// Connected peer set shared with the consensus engine
#[derive(Default)]
pub struct PeerSet {
    peers: RwLock<BTreeSet<String>>,
}

impl PeerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, peer: &PeerId) {
        self.peers.write().expect("peer lock").insert(peer.to_string());
    }

    pub fn remove(&self, peer: &PeerId) {
        self.peers.write().expect("peer lock").remove(&peer.to_string());
    }

    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.peers.read().expect("peer lock").iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().expect("peer lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Commands accepted by the swarm task
pub enum NetworkCommand {
    Publish {
        topic: &'static str,
        data: Vec<u8>,
    },
    SyncRequest {
        peer: PeerId,
        request: SyncRequest,
        reply: oneshot::Sender<NodeResult<SyncResponse>>,
    },
}

/// Cheap handle engines use to reach the swarm task
#[derive(Clone)]
pub struct NetworkHandle {
    commands: mpsc::UnboundedSender<NetworkCommand>,
    local_peer_id: PeerId,
}

impl NetworkHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<NetworkCommand>,
        local_peer_id: PeerId,
    ) -> Self {
        Self {
            commands,
            local_peer_id,
        }
    }

    /// Local peer identifier (leader-election key)
    #[must_use]
    pub fn local_peer_id(&self) -> String {
        self.local_peer_id.to_string()
    }

    /// Publishes a serialized envelope on a gossip topic
    pub fn publish(&self, topic: &'static str, data: Vec<u8>) {
        let _ = self.commands.send(NetworkCommand::Publish { topic, data });
    }

    /// Serializes and publishes an envelope
    pub fn publish_json<T: Serialize>(&self, topic: &'static str, message: &T) {
        match serde_json::to_vec(message) {
            Ok(data) => self.publish(topic, data),
            Err(err) => warn!(error = %err, topic, "failed to encode gossip message"),
        }
    }

    /// One sync exchange with a peer
    ///
    /// # Errors
    ///
    /// `StreamClosed` when the peer disconnects before answering
    pub async fn sync_request(&self, peer: PeerId, request: SyncRequest) -> NodeResult<SyncResponse> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(NetworkCommand::SyncRequest {
                peer,
                request,
                reply,
            })
            .map_err(|_| NodeError::NetworkError("swarm task stopped".to_string()))?;
        answer
            .await
            .map_err(|_| NodeError::StreamClosed("sync reply dropped".to_string()))?
    }
}

/// Inbound gossip handlers, installed by the node at wiring time
pub struct InboundHandlers {
    pub consensus: Arc<ConsensusEngine>,
    pub farming: Arc<FarmingEngine>,
    pub mempool: Arc<Mempool>,
    pub chain: Arc<Chain>,
}

#[derive(NetworkBehaviour)]
struct ShadowyBehaviour {
    gossipsub: gossipsub::Behaviour,
    mdns: mdns::tokio::Behaviour,
    sync: request_response::json::Behaviour<SyncRequest, SyncResponse>,
}

/// The swarm task plus its command handle
pub struct Network {
    swarm: libp2p::Swarm<ShadowyBehaviour>,
    commands: mpsc::UnboundedReceiver<NetworkCommand>,
    handle: NetworkHandle,
    peers: Arc<PeerSet>,
    pending_sync: HashMap<OutboundRequestId, oneshot::Sender<NodeResult<SyncResponse>>>,
}

impl Network {
    /// Builds the swarm, subscribes the protocol topics and starts
    /// listening
    ///
    /// # Errors
    ///
    /// Returns `NetworkError` on transport or behaviour setup failure
    pub fn new(p2p_port: u16, seeds: &[String], peers: Arc<PeerSet>) -> NodeResult<Self> {
        let mut swarm = SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NodeError::NetworkError(e.to_string()))?
            .with_behaviour(|key| {
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .heartbeat_interval(Duration::from_secs(10))
                    .build()?;
                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )?;

                let mdns = mdns::tokio::Behaviour::new(
                    mdns::Config::default(),
                    key.public().to_peer_id(),
                )?;

                let sync = request_response::json::Behaviour::new(
                    [(StreamProtocol::new(SYNC_PROTOCOL), ProtocolSupport::Full)],
                    request_response::Config::default(),
                );

                Ok(ShadowyBehaviour {
                    gossipsub,
                    mdns,
                    sync,
                })
            })
            .map_err(|e| NodeError::NetworkError(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(120)))
            .build();

        for topic in [TOPIC_CONSENSUS, TOPIC_PROOFS, TOPIC_MEMPOOL] {
            swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&gossipsub::IdentTopic::new(topic))
                .map_err(|e| NodeError::NetworkError(format!("subscribe {topic}: {e}")))?;
        }

        let listen: Multiaddr = format!("/ip4/0.0.0.0/tcp/{p2p_port}")
            .parse()
            .map_err(|_| NodeError::NetworkError("invalid listen address".to_string()))?;
        swarm
            .listen_on(listen)
            .map_err(|e| NodeError::NetworkError(e.to_string()))?;

        for seed in seeds {
            match parse_seed(seed) {
                Ok(addr) => {
                    info!(%addr, "dialing seed");
                    if let Err(err) = swarm.dial(addr) {
                        warn!(seed, error = %err, "seed dial failed");
                    }
                }
                Err(err) => warn!(seed, error = %err, "invalid seed"),
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        info!(%local_peer_id, "p2p host ready");

        let (command_tx, commands) = mpsc::unbounded_channel();
        Ok(Self {
            swarm,
            commands,
            handle: NetworkHandle {
                commands: command_tx,
                local_peer_id,
            },
            peers,
            pending_sync: HashMap::new(),
        })
    }

    /// Command handle for engines
    #[must_use]
    pub fn handle(&self) -> NetworkHandle {
        self.handle.clone()
    }

    /// Runs the swarm event loop until shutdown
    pub async fn run(mut self, handlers: InboundHandlers, mut shutdown: watch::Receiver<bool>) {
        let consensus_topic = gossipsub::IdentTopic::new(TOPIC_CONSENSUS).hash();
        let proofs_topic = gossipsub::IdentTopic::new(TOPIC_PROOFS).hash();
        let mempool_topic = gossipsub::IdentTopic::new(TOPIC_MEMPOOL).hash();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("network task stopping");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_event(
                        event,
                        &handlers,
                        &consensus_topic,
                        &proofs_topic,
                        &mempool_topic,
                    );
                }
            }
        }
    }

    fn handle_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::Publish { topic, data } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(gossipsub::IdentTopic::new(topic), data);
                if let Err(err) = result {
                    // Routine on single-node networks: no subscribers yet
                    debug!(topic, error = %err, "gossip publish skipped");
                }
            }
            NetworkCommand::SyncRequest {
                peer,
                request,
                reply,
            } => {
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .sync
                    .send_request(&peer, request);
                self.pending_sync.insert(request_id, reply);
            }
        }
    }

    fn handle_event(
        &mut self,
        event: SwarmEvent<ShadowyBehaviourEvent>,
        handlers: &InboundHandlers,
        consensus_topic: &gossipsub::TopicHash,
        proofs_topic: &gossipsub::TopicHash,
        mempool_topic: &gossipsub::TopicHash,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "listening");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                info!(%peer_id, "peer connected");
                self.peers.add(&peer_id);
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    info!(%peer_id, "peer disconnected");
                    self.peers.remove(&peer_id);
                }
            }
            SwarmEvent::Behaviour(ShadowyBehaviourEvent::Mdns(mdns::Event::Discovered(
                discovered,
            ))) => {
                for (peer_id, addr) in discovered {
                    debug!(%peer_id, %addr, "mdns discovered peer");
                    if let Err(err) = self.swarm.dial(addr) {
                        debug!(%peer_id, error = %err, "mdns dial failed");
                    }
                }
            }
            SwarmEvent::Behaviour(ShadowyBehaviourEvent::Mdns(mdns::Event::Expired(expired))) => {
                for (peer_id, _) in expired {
                    debug!(%peer_id, "mdns peer expired");
                }
            }
            SwarmEvent::Behaviour(ShadowyBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                if message.topic == *consensus_topic {
                    Self::dispatch_consensus(&message.data, handlers);
                } else if message.topic == *proofs_topic {
                    Self::dispatch_proof(&message.data, handlers);
                } else if message.topic == *mempool_topic {
                    Self::dispatch_mempool(&message.data, handlers);
                } else {
                    debug!(peer = %propagation_source, topic = %message.topic, "unknown topic");
                }
            }
            SwarmEvent::Behaviour(ShadowyBehaviourEvent::Sync(request_response::Event::Message {
                message,
                ..
            })) => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    let response = serve_sync_request(&handlers.chain, &request);
                    if self
                        .swarm
                        .behaviour_mut()
                        .sync
                        .send_response(channel, response)
                        .is_err()
                    {
                        debug!("sync response dropped: stream closed");
                    }
                }
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(reply) = self.pending_sync.remove(&request_id) {
                        let _ = reply.send(Ok(response));
                    }
                }
            },
            SwarmEvent::Behaviour(ShadowyBehaviourEvent::Sync(
                request_response::Event::OutboundFailure {
                    request_id, error, ..
                },
            )) => {
                if let Some(reply) = self.pending_sync.remove(&request_id) {
                    let _ = reply.send(Err(NodeError::StreamClosed(error.to_string())));
                }
            }
            _ => {}
        }
    }

    fn dispatch_consensus(data: &[u8], handlers: &InboundHandlers) {
        match serde_json::from_slice::<ConsensusMessage>(data) {
            Ok(message) => handlers.consensus.handle_message(message),
            Err(err) => warn!(error = %err, "bad consensus message"),
        }
    }

    fn dispatch_proof(data: &[u8], handlers: &InboundHandlers) {
        match serde_json::from_slice::<ProofMessage>(data) {
            Ok(ProofMessage::ProofSubmission {
                proof_submission, ..
            }) => handlers.farming.handle_submission(proof_submission),
            Err(err) => warn!(error = %err, "bad proof message"),
        }
    }

    fn dispatch_mempool(data: &[u8], handlers: &InboundHandlers) {
        match serde_json::from_slice::<MempoolMessage>(data) {
            Ok(MempoolMessage::AddTx { transaction, .. }) => {
                let height = handlers.chain.height();
                match handlers.mempool.add_from_gossip(transaction, height) {
                    Ok(true) => debug!("gossip transaction admitted"),
                    Ok(false) => {}
                    Err(err) => debug!(error = %err, "gossip transaction rejected"),
                }
            }
            Err(err) => warn!(error = %err, "bad mempool message"),
        }
    }
}

/// Serves one sync exchange: height query or a bounded block range
fn serve_sync_request(chain: &Chain, request: &SyncRequest) -> SyncResponse {
    match request {
        SyncRequest::Height => SyncResponse::Height {
            height: chain.height(),
        },
        SyncRequest::Blocks { start, end } => {
            if start > end || *start > chain.height() {
                return SyncResponse::Blocks { blocks: Vec::new() };
            }
            let capped_end = (*end).min(start + SYNC_BATCH_LIMIT - 1);
            SyncResponse::Blocks {
                blocks: chain.get_block_range(*start, capped_end),
            }
        }
    }
}

/// Parses a `nodeid@host[:port]` seed into a dialable multiaddr
fn parse_seed(seed: &str) -> NodeResult<Multiaddr> {
    let (node_id, host_port) = seed
        .split_once('@')
        .ok_or_else(|| NodeError::Validation(format!("seed without node id: {seed}")))?;

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .map_err(|_| NodeError::Validation(format!("invalid seed port: {seed}")))?,
        ),
        None => (host_port, 9000),
    };

    let proto = if host.parse::<std::net::Ipv4Addr>().is_ok() {
        "ip4"
    } else {
        "dns4"
    };
    format!("/{proto}/{host}/tcp/{port}/p2p/{node_id}")
        .parse()
        .map_err(|_| NodeError::Validation(format!("seed does not resolve: {seed}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_forms() {
        let addr =
            parse_seed("12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN@10.0.0.7:9500")
                .unwrap();
        assert!(addr.to_string().contains("/ip4/10.0.0.7/tcp/9500/p2p/"));

        // Default port and hostname seeds
        let addr =
            parse_seed("12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN@seed.example.org")
                .unwrap();
        assert!(addr
            .to_string()
            .contains("/dns4/seed.example.org/tcp/9000/p2p/"));

        assert!(parse_seed("no-node-id.example.org").is_err());
        assert!(
            parse_seed("12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN@host:badport")
                .is_err()
        );
    }

    #[test]
    fn test_sync_messages_wire_format() {
        let request = SyncRequest::Height;
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"type":"height"}"#
        );

        let request = SyncRequest::Blocks { start: 3, end: 9 };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["type"], "blocks");
        assert_eq!(encoded["start"], 3);
        assert_eq!(encoded["end"], 9);
    }

    #[test]
    fn test_consensus_message_tags() {
        let vote = ConsensusMessage::BlockVote {
            vote: BlockVote {
                block_hash: "aa".to_string(),
                voter: "peer-1".to_string(),
                approve: true,
            },
            timestamp: 1,
        };
        let encoded = serde_json::to_value(&vote).unwrap();
        assert_eq!(encoded["type"], "block_vote");
        assert_eq!(encoded["vote"]["approve"], true);
    }
}
