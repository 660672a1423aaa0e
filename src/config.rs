//! Node configuration
//!
//! All public options from the CLI land here; components receive the
//! pieces they need through their constructors, never through globals.

use shadowy_core::MempoolConfig;
use shared::{BLOCK_INTERVAL_SECS, DEV_BLOCK_INTERVAL_SECS};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration of a node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Peer listen port
    pub p2p_port: u16,
    /// Query surface port (reserved for the external API layer)
    pub api_port: u16,
    /// Plot directories
    pub dirs: Vec<String>,
    /// Bootstrap peers as `nodeid@host[:port]`
    pub seeds: Vec<String>,
    /// Mempool entry age before eviction, in blocks
    pub mempool_tx_expiry_blocks: u64,
    /// Mempool byte cap, in MiB
    pub mempool_max_size_mb: usize,
    /// Bearer key for mutating queries (consumed by the API layer)
    pub api_key: Option<String>,
    /// Data directory (chain DB + wallet keystore)
    pub data_dir: PathBuf,
    /// Wallet keystore passphrase
    pub wallet_passphrase: Option<String>,
    /// Development mode: short block interval, synthetic plot fallback
    pub dev: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            p2p_port: 9000,
            api_port: 8080,
            dirs: vec!["./plots".to_string()],
            seeds: Vec::new(),
            mempool_tx_expiry_blocks: 2048,
            mempool_max_size_mb: 300,
            api_key: None,
            data_dir: PathBuf::from("./data"),
            wallet_passphrase: None,
            dev: false,
        }
    }
}

impl NodeConfig {
    /// Block proposal period
    #[must_use]
    pub fn block_interval(&self) -> Duration {
        if self.dev {
            Duration::from_secs(DEV_BLOCK_INTERVAL_SECS)
        } else {
            Duration::from_secs(BLOCK_INTERVAL_SECS)
        }
    }

    /// Mempool limits derived from the public options
    #[must_use]
    pub fn mempool_config(&self) -> MempoolConfig {
        MempoolConfig {
            expiry_blocks: self.mempool_tx_expiry_blocks,
            max_size_bytes: self.mempool_max_size_mb * 1024 * 1024,
        }
    }

    /// Chain database path
    #[must_use]
    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join("chain")
    }

    /// Wallet keystore path
    #[must_use]
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.json")
    }
}
