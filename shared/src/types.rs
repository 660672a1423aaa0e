//! Tipos e constantes de protocolo compartilhados entre os módulos

use crate::Hash256;
use serde::{Deserialize, Serialize};

/// Alias para valor monetário (satoshis de SHADOW)
pub type Amount = u64;

/// Alias para altura do bloco na blockchain
pub type BlockHeight = u64;

/// Alias para índice de saída de transação
pub type OutputIndex = u32;

/// Referência a uma saída de transação (UTXO)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hash da transação que contém a saída
    pub txid: Hash256,
    /// Índice da saída na transação
    pub vout: OutputIndex,
}

impl OutPoint {
    /// Creates a new transaction output reference
    #[must_use]
    pub const fn new(txid: Hash256, vout: OutputIndex) -> Self {
        Self { txid, vout }
    }
}

/// Satoshis por SHADOW
pub const COIN: Amount = 100_000_000;

/// Timestamp fixo do bloco gênese (2024-01-01T00:00:00Z)
pub const GENESIS_TIMESTAMP: u64 = 1_704_067_200;

/// Recompensa inicial por bloco, em satoshis
pub const BLOCK_REWARD: Amount = 5_000_000_000;

/// Intervalo de halving da recompensa, em blocos
pub const HALVING_INTERVAL: u64 = 210_000;

/// Tamanho máximo de uma transação serializada (256 KiB)
pub const MAX_TRANSACTION_SIZE: usize = 256 * 1024;

/// Intervalo entre blocos em produção, em segundos
pub const BLOCK_INTERVAL_SECS: u64 = 60;

/// Intervalo entre blocos em modo de desenvolvimento, em segundos
pub const DEV_BLOCK_INTERVAL_SECS: u64 = 10;

/// Período da eleição de líder, em segundos
pub const LEADER_ELECTION_SECS: u64 = 5;

/// Período do loop de farming, em segundos
pub const FARMING_TICK_SECS: u64 = 2;

/// Idade máxima de uma entrada do mempool, em blocos
pub const MEMPOOL_EXPIRY_BLOCKS: u64 = 2048;

/// Orçamento de bytes do mempool (300 MiB)
pub const MEMPOOL_MAX_BYTES: usize = 300 * 1024 * 1024;

/// Tópico gossip de consenso (propostas, votos, commits)
pub const TOPIC_CONSENSUS: &str = "shadowy-consensus";

/// Tópico gossip de provas de espaço
pub const TOPIC_PROOFS: &str = "shadowy-proofs";

/// Tópico gossip do mempool
pub const TOPIC_MEMPOOL: &str = "shadowy-mempool";

/// Protocolo de stream para sincronização de blocos
pub const SYNC_PROTOCOL: &str = "/shadowy/sync/1.0.0";

/// Recompensa de coinbase para uma altura, com halving a cada
/// [`HALVING_INTERVAL`] blocos
#[must_use]
pub fn block_reward(height: BlockHeight) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 63 {
        return 0;
    }
    BLOCK_REWARD >> halvings
}
