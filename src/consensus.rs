//! Consensus engine: leader election, proposal, voting and commit
//!
//! The lexicographically smallest peer id (self included) is the
//! leader; once per block interval the leader assembles a block from
//! the best proof for the next height plus a slice of the mempool.
//! Validators vote; a block commits when the yes votes are a strict
//! majority of the votes cast and the votes cast reach
//! `floor(active/2) + 1`.
//!
//! Lock order: leader flag, then pending/votes, then the proof
//! tracker. Never the reverse.

use crate::farming::{now_secs, ProofTracker};
use crate::network::{BlockVote, ConsensusMessage, NetworkHandle, PeerSet};
use shadowy_core::{Block, Chain, Mempool, Transaction};
use shared::{block_reward, NodeError, LEADER_ELECTION_SECS, TOPIC_CONSENSUS};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Mempool transactions drained per proposal
pub const MAX_BLOCK_TRANSACTIONS: usize = 100;

/// Consensus state machine shared by the loops and the inbound
/// dispatcher
pub struct ConsensusEngine {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    proofs: Arc<ProofTracker>,
    network: NetworkHandle,
    peers: Arc<PeerSet>,
    self_id: String,
    block_interval: Duration,
    is_leader: Mutex<bool>,
    pending: Mutex<Option<Block>>,
    votes: Mutex<HashMap<String, bool>>,
}

impl ConsensusEngine {
    #[must_use]
    pub fn new(
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        proofs: Arc<ProofTracker>,
        network: NetworkHandle,
        peers: Arc<PeerSet>,
        block_interval: Duration,
    ) -> Self {
        let self_id = network.local_peer_id();
        Self {
            chain,
            mempool,
            proofs,
            network,
            peers,
            self_id,
            block_interval,
            is_leader: Mutex::new(false),
            pending: Mutex::new(None),
            votes: Mutex::new(HashMap::new()),
        }
    }

    /// Leader election loop: smallest peer id wins
    pub async fn run_leader_election(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(LEADER_ELECTION_SECS));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.elect_leader(),
            }
        }
    }

    fn elect_leader(&self) {
        let mut candidates = self.peers.all();
        candidates.push(self.self_id.clone());
        let leader = candidates.into_iter().min().unwrap_or_default();

        let leading = leader == self.self_id;
        let mut is_leader = self.is_leader.lock().expect("leader lock");
        if *is_leader != leading {
            info!(leader = %leader, leading, "leadership changed");
        }
        *is_leader = leading;
    }

    /// Proposal loop: one attempt per block interval, leader only
    pub async fn run_proposal_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.block_interval);
        info!(interval = ?self.block_interval, "proposal loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("proposal loop stopping");
                    break;
                }
                _ = ticker.tick() => self.propose(),
            }
        }
    }

    fn propose(&self) {
        if !*self.is_leader.lock().expect("leader lock") {
            return;
        }

        let height = self.chain.height() + 1;
        let Some(best) = self.proofs.best_for(height) else {
            debug!(height, "no proof for next height, skipping proposal");
            return;
        };

        // Drain a bounded slice of the mempool; entries whose inputs no
        // longer resolve are skipped (they will be purged on commit)
        let mut included = Vec::new();
        let mut total_fees = 0u64;
        for tx in self.mempool.get_transactions() {
            if included.len() >= MAX_BLOCK_TRANSACTIONS {
                break;
            }
            match self.chain.estimate_fee(&tx) {
                Ok(fee) => {
                    total_fees = total_fees.saturating_add(fee);
                    included.push(tx);
                }
                Err(err) => debug!(tx = %tx.id, error = %err, "skipping unresolvable entry"),
            }
        }

        let timestamp = now_secs();
        let reward = block_reward(height) + total_fees;
        let coinbase = Transaction::coinbase(height, reward, best.reward_address, timestamp);

        let mut tx_ids = vec![coinbase.id];
        tx_ids.extend(included.iter().map(|tx| tx.id));

        let mut block =
            self.chain
                .propose_block(tx_ids, &self.self_id, coinbase, included, timestamp);
        block.winning_proof = Some(best.proof.clone());
        block.winner_address = Some(best.reward_address);

        info!(
            height,
            txs = block.transactions.len(),
            distance = best.proof.distance,
            "proposing block"
        );
        self.network.publish_json(
            TOPIC_CONSENSUS,
            &ConsensusMessage::BlockProposal {
                proposal: block.clone(),
                timestamp,
            },
        );

        let hash = block.hash.clone();
        {
            *self.pending.lock().expect("pending lock") = Some(block);
            self.votes.lock().expect("vote lock").clear();
        }
        self.cast_vote(&hash, true);
    }

    /// Broadcasts and records our own vote
    fn cast_vote(&self, block_hash: &str, approve: bool) {
        self.network.publish_json(
            TOPIC_CONSENSUS,
            &ConsensusMessage::BlockVote {
                vote: BlockVote {
                    block_hash: block_hash.to_string(),
                    voter: self.self_id.clone(),
                    approve,
                },
                timestamp: now_secs(),
            },
        );
        self.record_vote(block_hash, self.self_id.clone(), approve);
    }

    /// Inbound dispatcher for the consensus topic
    pub fn handle_message(&self, message: ConsensusMessage) {
        match message {
            ConsensusMessage::BlockProposal { proposal, .. } => self.handle_proposal(proposal),
            ConsensusMessage::BlockVote { vote, .. } => {
                self.record_vote(&vote.block_hash, vote.voter, vote.approve);
            }
            ConsensusMessage::BlockCommit { block, .. } => self.handle_commit(block),
        }
    }

    fn handle_proposal(&self, proposal: Block) {
        {
            let pending = self.pending.lock().expect("pending lock");
            if pending.as_ref().is_some_and(|p| p.hash == proposal.hash) {
                return;
            }
        }

        if let Err(err) = self.chain.validate_block(&proposal) {
            warn!(height = proposal.index, error = %err, "invalid proposal, not voting");
            return;
        }

        info!(height = proposal.index, proposer = %proposal.proposer, "proposal accepted, voting");
        let hash = proposal.hash.clone();
        {
            *self.pending.lock().expect("pending lock") = Some(proposal);
            self.votes.lock().expect("vote lock").clear();
        }
        self.cast_vote(&hash, true);
    }

    fn record_vote(&self, block_hash: &str, voter: String, approve: bool) {
        let ready = {
            let pending = self.pending.lock().expect("pending lock");
            let Some(block) = pending.as_ref() else {
                debug!(voter = %voter, "vote without pending proposal, ignored");
                return;
            };
            if block.hash != block_hash {
                debug!(voter = %voter, "vote for a different proposal, ignored");
                return;
            }

            let mut votes = self.votes.lock().expect("vote lock");
            if votes.contains_key(&voter) {
                // Benign: logged and ignored
                debug!(error = %NodeError::DuplicateVote(voter), "duplicate vote");
                return;
            }
            votes.insert(voter, approve);

            let yes = votes.values().filter(|approved| **approved).count();
            let total = votes.len();
            let active = self.peers.len() + 1;
            let required = active / 2 + 1;
            debug!(yes, total, required, "vote recorded");
            yes * 2 > total && total >= required
        };

        if ready {
            self.commit_pending();
        }
    }

    fn commit_pending(&self) {
        let (block, yes_voters) = {
            let mut pending = self.pending.lock().expect("pending lock");
            let Some(mut block) = pending.take() else {
                return;
            };
            let mut votes = self.votes.lock().expect("vote lock");
            let yes_voters: Vec<String> = votes
                .iter()
                .filter(|(_, approved)| **approved)
                .map(|(voter, _)| voter.clone())
                .collect();
            votes.clear();
            for voter in &yes_voters {
                let _ = block.add_vote(voter);
            }
            (block, yes_voters)
        };

        let height = block.index;
        let hash = block.hash.clone();
        match self.chain.add_block(block.clone()) {
            Ok(()) => {
                info!(height, votes = yes_voters.len(), "block committed");
                self.prune_after_commit(&block);
                self.network.publish_json(
                    TOPIC_CONSENSUS,
                    &ConsensusMessage::BlockCommit {
                        block,
                        timestamp: now_secs(),
                    },
                );
            }
            Err(err) => warn!(height, hash = %hash, error = %err, "commit failed"),
        }
    }

    fn handle_commit(&self, block: Block) {
        if self.chain.has_block(block.index, &block.hash) {
            return;
        }

        // Clear a matching pending proposal before applying
        {
            let mut pending = self.pending.lock().expect("pending lock");
            if pending.as_ref().is_some_and(|p| p.hash == block.hash) {
                *pending = None;
                self.votes.lock().expect("vote lock").clear();
            }
        }

        match self.chain.add_block(block.clone()) {
            Ok(()) => {
                info!(height = block.index, "committed block from network");
                self.prune_after_commit(&block);
            }
            Err(err) => {
                debug!(height = block.index, error = %err, "network commit not applicable");
            }
        }
    }

    /// After a commit: drop included entries, expire by age, purge
    /// entries whose inputs were consumed, prune stale proofs
    fn prune_after_commit(&self, block: &Block) {
        for tx_id in &block.transactions {
            self.mempool.remove(tx_id);
        }
        self.mempool.update_block_height(block.index);
        if let Err(err) = self.mempool.purge_invalid(self.chain.utxo_store()) {
            warn!(error = %err, "mempool purge failed");
        }
        self.proofs.prune_below(block.index + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowy_core::{MemoryKv, MempoolConfig, ProofOfSpace, ProofSubmission, Wallet};
    use shared::Address;
    use tokio::sync::mpsc;

    fn test_engine() -> (Arc<ConsensusEngine>, Arc<ProofTracker>) {
        let chain = Arc::new(Chain::open(Arc::new(MemoryKv::new())).unwrap());
        let mempool = Arc::new(Mempool::new(MempoolConfig::default()));
        let proofs = Arc::new(ProofTracker::new());

        let (commands, _rx) = mpsc::unbounded_channel();
        let handle = NetworkHandle::new(commands, libp2p::PeerId::random());
        let engine = Arc::new(ConsensusEngine::new(
            chain,
            mempool,
            Arc::clone(&proofs),
            handle,
            Arc::new(PeerSet::new()),
            Duration::from_secs(10),
        ));
        (engine, proofs)
    }

    fn submission(height: u64, reward_address: Address) -> ProofSubmission {
        ProofSubmission {
            block_height: height,
            proof: ProofOfSpace {
                challenge_hash: vec![0u8; 32],
                plot_hash: String::new(),
                plot_public_key: String::new(),
                plot_signature: String::new(),
                distance: 11,
                miner_public_key: Vec::new(),
                miner_signature: Vec::new(),
            },
            reward_address,
            submitter_id: "test-peer".to_string(),
        }
    }

    #[test]
    fn test_single_peer_proposal_commits_itself() {
        let winner = Address::from_bytes([1u8; 32]);
        let (engine, proofs) = test_engine();

        engine.elect_leader();
        proofs.observe(submission(1, winner));

        engine.propose();

        // Voto próprio basta num nó único: o bloco já está na cadeia
        assert_eq!(engine.chain.height(), 1);
        let block = engine.chain.get_block(1).unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.coinbase.native_output_sum(), 5_000_000_000);
        assert_eq!(block.winner_address, Some(winner));
        assert!(block.winning_proof.is_some());
        assert!(block.votes.contains(&engine.self_id));

        // Prova consumida foi podada
        assert!(proofs.best_for(1).is_none());
    }

    #[test]
    fn test_no_proof_no_proposal() {
        let (engine, _proofs) = test_engine();
        engine.elect_leader();

        engine.propose();
        assert_eq!(engine.chain.height(), 0);
    }

    #[test]
    fn test_proposal_includes_mempool_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::create(&dir.path().join("w.json"), None).unwrap();
        let (engine, proofs) = test_engine();
        engine.elect_leader();

        // Bloco 1 financia a carteira
        proofs.observe(submission(1, wallet.address()));
        engine.propose();
        assert_eq!(engine.chain.height(), 1);

        // Transferência entra no mempool e no bloco 2
        let dest = Address::from_bytes([9u8; 32]);
        let send = wallet
            .build_send(engine.chain.utxo_store(), dest, 1_000_000, now_secs())
            .unwrap();
        let fee = engine.chain.estimate_fee(&send).unwrap();
        engine.mempool.add(send.clone(), 1).unwrap();

        proofs.observe(submission(2, wallet.address()));
        engine.propose();

        assert_eq!(engine.chain.height(), 2);
        let block = engine.chain.get_block(2).unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[1], send.id);
        assert_eq!(
            block.coinbase.native_output_sum(),
            shared::block_reward(2) + fee
        );

        // Mempool limpo após o commit
        assert!(engine.mempool.is_empty());
        let balance = engine.chain.utxo_store().get_balance(&dest).unwrap();
        assert_eq!(balance[shadowy_core::genesis_token_id()], 1_000_000);
    }

    #[test]
    fn test_votes_for_unknown_proposal_ignored() {
        let (engine, _proofs) = test_engine();

        engine.record_vote("inexistente", "peer-x".to_string(), true);
        assert_eq!(engine.chain.height(), 0);
    }

    #[test]
    fn test_commit_from_network_is_idempotent() {
        let winner = Address::from_bytes([1u8; 32]);
        let (engine, proofs) = test_engine();
        engine.elect_leader();
        proofs.observe(submission(1, winner));
        engine.propose();

        let block = engine.chain.get_block(1).unwrap();
        engine.handle_commit(block);
        assert_eq!(engine.chain.height(), 1);
    }
}
