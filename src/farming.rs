//! Farming engine: per-height proof competition
//!
//! Every tick the engine asks the plot collection for the best
//! solution to the current challenge (the latest block hash), endorses
//! it with the wallet key and publishes it when it beats the best
//! proof seen locally for the target height. Inbound submissions are
//! verified (plot signature, claimed distance, miner signature) before
//! entering the tracker.

use crate::network::{NetworkHandle, ProofMessage};
use crate::plots::{self, PlotCollection};
use shadowy_core::{Chain, ProofOfSpace, ProofSubmission, Wallet};
use shared::{Hash256, Result, FARMING_TICK_SECS, TOPIC_PROOFS};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Proofs ahead of the next height accepted into the tracker
pub const PROOF_HEIGHT_WINDOW: u64 = 2;

/// Seconds since epoch
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Miner-signature preimage:
/// `SHA-256("{challenge_a85}/{plot_pk_a85}/{distance}")`
#[must_use]
pub fn proof_preimage(challenge: &[u8], plot_public_key_a85: &str, distance: u64) -> Hash256 {
    let text = format!(
        "{}/{}/{}",
        ascii85::encode(challenge),
        plot_public_key_a85,
        distance
    );
    Hash256::sha256(text.as_bytes())
}

/// Best proof seen per target height. Shared between the farming
/// engine (writer) and the consensus engine (reader); this is the
/// innermost lock in the consensus ordering (leader, votes, proofs).
#[derive(Default)]
pub struct ProofTracker {
    best: Mutex<HashMap<u64, ProofSubmission>>,
}

impl ProofTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a submission when strictly better (lower distance) than
    /// the current best for its height; ties keep the first seen
    pub fn observe(&self, submission: ProofSubmission) -> bool {
        let mut best = self.best.lock().expect("proof lock");
        match best.get(&submission.block_height) {
            Some(current) if current.proof.distance <= submission.proof.distance => false,
            _ => {
                best.insert(submission.block_height, submission);
                true
            }
        }
    }

    /// Best proof for a height
    #[must_use]
    pub fn best_for(&self, height: u64) -> Option<ProofSubmission> {
        self.best.lock().expect("proof lock").get(&height).cloned()
    }

    /// Drops proofs for heights already committed
    pub fn prune_below(&self, height: u64) {
        self.best
            .lock()
            .expect("proof lock")
            .retain(|h, _| *h >= height);
    }
}

/// Asynchronous proof producer and inbound validator
pub struct FarmingEngine {
    chain: Arc<Chain>,
    plots: Arc<PlotCollection>,
    wallet: Arc<Wallet>,
    proofs: Arc<ProofTracker>,
    network: NetworkHandle,
    submitter_id: String,
}

impl FarmingEngine {
    #[must_use]
    pub fn new(
        chain: Arc<Chain>,
        plots: Arc<PlotCollection>,
        wallet: Arc<Wallet>,
        proofs: Arc<ProofTracker>,
        network: NetworkHandle,
    ) -> Self {
        let submitter_id = network.local_peer_id();
        Self {
            chain,
            plots,
            wallet,
            proofs,
            network,
            submitter_id,
        }
    }

    /// Farming loop: one lookup per tick
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(FARMING_TICK_SECS));
        info!(plots = self.plots.plot_count(), "farming engine started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("farming engine stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick() {
                        warn!(error = %err, "farming tick failed");
                    }
                }
            }
        }
    }

    fn tick(&self) -> Result<()> {
        if self.plots.is_empty() {
            return Ok(());
        }

        let latest = self.chain.latest_block();
        let challenge = latest.challenge_bytes()?;
        let target_height = latest.index + 1;

        let Some(solution) = self.plots.lookup(&challenge)? else {
            return Ok(());
        };

        let digest = proof_preimage(&challenge, &solution.public_key, solution.distance);
        let miner_signature = self.wallet.keypair().sign_hash(&digest)?;

        let submission = ProofSubmission {
            block_height: target_height,
            proof: ProofOfSpace {
                challenge_hash: challenge,
                plot_hash: solution.hash,
                plot_public_key: solution.public_key,
                plot_signature: solution.signature,
                distance: solution.distance,
                miner_public_key: self.wallet.keypair().public_key.as_bytes().to_vec(),
                miner_signature,
            },
            reward_address: self.wallet.address(),
            submitter_id: self.submitter_id.clone(),
        };

        if self.proofs.observe(submission.clone()) {
            debug!(
                height = target_height,
                distance = submission.proof.distance,
                "new best local proof"
            );
            self.network.publish_json(
                TOPIC_PROOFS,
                &ProofMessage::ProofSubmission {
                    proof_submission: submission,
                    timestamp: now_secs(),
                },
            );
        }
        Ok(())
    }

    /// Inbound submission: height window, plot verification and miner
    /// signature, then best-proof comparison
    pub fn handle_submission(&self, submission: ProofSubmission) {
        let target_height = self.chain.height() + 1;
        if submission.block_height < target_height
            || submission.block_height > target_height + PROOF_HEIGHT_WINDOW
        {
            debug!(
                height = submission.block_height,
                target = target_height,
                "proof outside height window, dropped"
            );
            return;
        }

        if !plots::verify_solution(&submission.proof) {
            warn!(
                submitter = %submission.submitter_id,
                "proof with invalid plot solution, dropped"
            );
            return;
        }

        let digest = proof_preimage(
            &submission.proof.challenge_hash,
            &submission.proof.plot_public_key,
            submission.proof.distance,
        );
        if !shared::verify_hash(
            &submission.proof.miner_public_key,
            &digest,
            &submission.proof.miner_signature,
        ) {
            warn!(
                submitter = %submission.submitter_id,
                "proof with invalid miner signature, dropped"
            );
            return;
        }

        let height = submission.block_height;
        let distance = submission.proof.distance;
        if self.proofs.observe(submission) {
            debug!(height, distance, "inbound proof installed as best");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(height: u64, distance: u64) -> ProofSubmission {
        ProofSubmission {
            block_height: height,
            proof: ProofOfSpace {
                challenge_hash: vec![0u8; 32],
                plot_hash: String::new(),
                plot_public_key: String::new(),
                plot_signature: String::new(),
                distance,
                miner_public_key: Vec::new(),
                miner_signature: Vec::new(),
            },
            reward_address: shared::Address::zero(),
            submitter_id: "peer".to_string(),
        }
    }

    #[test]
    fn test_tracker_keeps_lowest_distance() {
        let tracker = ProofTracker::new();

        assert!(tracker.observe(submission(5, 100)));
        // Equal distance keeps the first seen
        assert!(!tracker.observe(submission(5, 100)));
        assert!(!tracker.observe(submission(5, 150)));
        assert!(tracker.observe(submission(5, 80)));

        assert_eq!(tracker.best_for(5).unwrap().proof.distance, 80);
        assert!(tracker.best_for(6).is_none());
    }

    #[test]
    fn test_tracker_prunes_committed_heights() {
        let tracker = ProofTracker::new();
        tracker.observe(submission(5, 10));
        tracker.observe(submission(6, 10));
        tracker.observe(submission(7, 10));

        tracker.prune_below(6);
        assert!(tracker.best_for(5).is_none());
        assert!(tracker.best_for(6).is_some());
        assert!(tracker.best_for(7).is_some());
    }

    #[test]
    fn test_preimage_is_stable() {
        let challenge = [7u8; 32];
        let a = proof_preimage(&challenge, "plotkey", 42);
        let b = proof_preimage(&challenge, "plotkey", 42);
        assert_eq!(a, b);

        // Each component binds the digest
        assert_ne!(a, proof_preimage(&challenge, "plotkey", 43));
        assert_ne!(a, proof_preimage(&challenge, "otherkey", 42));
        assert_ne!(a, proof_preimage(&[8u8; 32], "plotkey", 42));
    }
}
