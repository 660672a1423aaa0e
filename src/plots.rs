//! Plot collection: proof-of-space solution source
//!
//! A plot is a precomputed set of cells derived from a plot keypair;
//! `lookup` returns the cell closest (Hamming distance) to a
//! per-height challenge, signed by the plot key. Wire fields travel
//! ASCII-85 encoded, matching the on-wire proof contract.

use serde::{Deserialize, Serialize};
use shadowy_core::ProofOfSpace;
use shared::{Hash256, KeyPair, NodeError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default number of cells for a generated plot
pub const DEFAULT_PLOT_CELLS: u64 = 4096;

/// A single proof-of-space solution
#[derive(Debug, Clone)]
pub struct Solution {
    /// Winning cell hash (ASCII-85)
    pub hash: String,
    /// Plot public key (ASCII-85)
    pub public_key: String,
    /// Plot signature over cell-hash ‖ challenge (ASCII-85)
    pub signature: String,
    /// Hamming distance between challenge and cell hash
    pub distance: u64,
}

/// On-disk plot file
#[derive(Debug, Serialize, Deserialize)]
struct PlotFile {
    public_key: String,
    secret_key: String,
    cells: u64,
}

/// A loaded plot: keypair plus its derived cell table
struct Plot {
    keypair: KeyPair,
    cells: Vec<[u8; 32]>,
}

impl Plot {
    fn from_keypair(keypair: KeyPair, cell_count: u64) -> Self {
        let public = keypair.public_key.as_bytes().to_vec();
        let cells = (0..cell_count)
            .map(|index| {
                let mut preimage = public.clone();
                preimage.extend_from_slice(&index.to_le_bytes());
                *Hash256::blake2b(&preimage).as_bytes()
            })
            .collect();
        Self { keypair, cells }
    }

    /// Best cell for a challenge: minimum Hamming distance, first seen
    /// wins ties
    fn best_cell(&self, challenge: &[u8; 32]) -> Option<([u8; 32], u64)> {
        self.cells
            .iter()
            .map(|cell| (*cell, hamming(cell, challenge)))
            .min_by_key(|(_, distance)| *distance)
    }
}

fn hamming(a: &[u8; 32], b: &[u8; 32]) -> u64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| u64::from((x ^ y).count_ones()))
        .sum()
}

/// Normalizes an arbitrary-length challenge to 32 bytes
fn challenge32(challenge: &[u8]) -> [u8; 32] {
    match <[u8; 32]>::try_from(challenge) {
        Ok(array) => array,
        Err(_) => *Hash256::sha256(challenge).as_bytes(),
    }
}

/// All plots available to the farming engine
pub struct PlotCollection {
    plots: Vec<Plot>,
}

impl PlotCollection {
    /// Loads every `*.plot` file under the given directories
    ///
    /// Missing directories are skipped with a warning; a readable file
    /// with a bad keypair is an error.
    pub fn load(dirs: &[String]) -> Result<Self> {
        let mut plots = Vec::new();

        for dir in dirs {
            let path = Path::new(dir);
            if !path.is_dir() {
                warn!(dir, "plot directory not found, skipping");
                continue;
            }
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) != Some("plot") {
                    continue;
                }
                let bytes = std::fs::read(entry.path())?;
                let file: PlotFile = serde_json::from_slice(&bytes).map_err(|e| {
                    NodeError::Corruption(format!("plot {:?} unreadable: {e}", entry.path()))
                })?;

                let public = hex::decode(&file.public_key)
                    .map_err(|_| NodeError::Corruption("plot public key malformed".to_string()))?;
                let secret = hex::decode(&file.secret_key)
                    .map_err(|_| NodeError::Corruption("plot secret key malformed".to_string()))?;
                let keypair = KeyPair::from_bytes(public, secret)?;
                plots.push(Plot::from_keypair(keypair, file.cells));
            }
        }

        if !plots.is_empty() {
            info!(
                plots = plots.len(),
                cells = plots.iter().map(|p| p.cells.len()).sum::<usize>(),
                "plot collection loaded"
            );
        }
        Ok(Self { plots })
    }

    /// Generates a fresh plot file in `dir`
    pub fn generate(dir: &Path, cells: u64) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let keypair = KeyPair::generate();
        let file = PlotFile {
            public_key: hex::encode(keypair.public_key.as_bytes()),
            secret_key: hex::encode(keypair.private_key.as_bytes()),
            cells,
        };

        let name = format!(
            "{}.plot",
            &hex::encode(Hash256::blake2b(keypair.public_key.as_bytes()).as_bytes())[..16]
        );
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(&file)?)?;
        info!(path = %path.display(), cells, "plot generated");
        Ok(path)
    }

    /// Builds a deterministic in-memory plot from an existing keypair
    /// (single-node devnets farm without plot files)
    #[must_use]
    pub fn synthetic(keypair: KeyPair, cells: u64) -> Self {
        Self {
            plots: vec![Plot::from_keypair(keypair, cells)],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }

    #[must_use]
    pub fn plot_count(&self) -> usize {
        self.plots.len()
    }

    /// Best solution across all plots for a challenge
    pub fn lookup(&self, challenge: &[u8]) -> Result<Option<Solution>> {
        let target = challenge32(challenge);

        let mut best: Option<(&Plot, [u8; 32], u64)> = None;
        for plot in &self.plots {
            if let Some((cell, distance)) = plot.best_cell(&target) {
                let better = best
                    .as_ref()
                    .map_or(true, |(_, _, best_distance)| distance < *best_distance);
                if better {
                    best = Some((plot, cell, distance));
                }
            }
        }

        let Some((plot, cell, distance)) = best else {
            return Ok(None);
        };

        // The plot key endorses cell ‖ challenge
        let mut signed = cell.to_vec();
        signed.extend_from_slice(&target);
        let signature = plot.keypair.sign(&signed)?;

        Ok(Some(Solution {
            hash: ascii85::encode(&cell),
            public_key: ascii85::encode(plot.keypair.public_key.as_bytes()),
            signature: ascii85::encode(&signature),
            distance,
        }))
    }
}

/// Verifies the plot-side of a proof: signature over cell ‖ challenge
/// and the claimed distance
#[must_use]
pub fn verify_solution(proof: &ProofOfSpace) -> bool {
    let Ok(cell) = ascii85::decode(&proof.plot_hash) else {
        return false;
    };
    let Ok(public_key) = ascii85::decode(&proof.plot_public_key) else {
        return false;
    };
    let Ok(signature) = ascii85::decode(&proof.plot_signature) else {
        return false;
    };
    let Ok(cell) = <[u8; 32]>::try_from(cell) else {
        return false;
    };

    let target = challenge32(&proof.challenge_hash);
    if hamming(&cell, &target) != proof.distance {
        return false;
    }

    let mut signed = cell.to_vec();
    signed.extend_from_slice(&target);
    shared::verify(&public_key, &signed, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_collection() -> PlotCollection {
        PlotCollection::synthetic(KeyPair::generate(), 64)
    }

    #[test]
    fn test_lookup_returns_verifiable_solution() {
        let plots = small_collection();
        let challenge = *Hash256::sha256(b"challenge").as_bytes();

        let solution = plots.lookup(&challenge).unwrap().unwrap();
        let proof = ProofOfSpace {
            challenge_hash: challenge.to_vec(),
            plot_hash: solution.hash.clone(),
            plot_public_key: solution.public_key.clone(),
            plot_signature: solution.signature.clone(),
            distance: solution.distance,
            miner_public_key: Vec::new(),
            miner_signature: Vec::new(),
        };
        assert!(verify_solution(&proof));

        // A forged distance is rejected
        let mut forged = proof.clone();
        forged.distance += 1;
        assert!(!verify_solution(&forged));
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let keypair = KeyPair::generate();
        let a = PlotCollection::synthetic(keypair.clone(), 64);
        let b = PlotCollection::synthetic(keypair, 64);
        let challenge = *Hash256::sha256(b"same challenge").as_bytes();

        let sol_a = a.lookup(&challenge).unwrap().unwrap();
        let sol_b = b.lookup(&challenge).unwrap().unwrap();
        assert_eq!(sol_a.hash, sol_b.hash);
        assert_eq!(sol_a.distance, sol_b.distance);
    }

    #[test]
    fn test_wrong_challenge_rejected() {
        let plots = small_collection();
        let challenge = *Hash256::sha256(b"real").as_bytes();
        let solution = plots.lookup(&challenge).unwrap().unwrap();

        // The same solution presented against a different challenge fails
        let other = *Hash256::sha256(b"other").as_bytes();
        let proof = ProofOfSpace {
            challenge_hash: other.to_vec(),
            plot_hash: solution.hash,
            plot_public_key: solution.public_key,
            plot_signature: solution.signature,
            distance: solution.distance,
            miner_public_key: Vec::new(),
            miner_signature: Vec::new(),
        };
        assert!(!verify_solution(&proof));
    }

    #[test]
    fn test_generate_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        PlotCollection::generate(dir.path(), 32).unwrap();

        let loaded =
            PlotCollection::load(&[dir.path().to_string_lossy().to_string()]).unwrap();
        assert_eq!(loaded.plot_count(), 1);
        assert!(loaded
            .lookup(Hash256::sha256(b"x").as_bytes())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_missing_directory_is_skipped() {
        let loaded = PlotCollection::load(&["./does-not-exist".to_string()]).unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.lookup(b"challenge").unwrap().is_none());
    }
}
