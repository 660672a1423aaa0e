pub mod block;
pub mod block_store;
pub mod chain;
pub mod fee;
pub mod kv;
pub mod mempool;
pub mod payload;
pub mod pool;
pub mod token;
pub mod transaction;
pub mod utxo_store;
pub mod wallet;

// Re-exports principais
pub use block::{Block, ProofOfSpace, ProofSubmission};
pub use block_store::BlockStore;
pub use chain::Chain;
pub use fee::calculate_fee;
pub use kv::{KvStore, MemoryKv, SledKv, WriteBatch};
pub use mempool::{Mempool, MempoolConfig, MempoolEntry};
pub use pool::{LiquidityPool, PoolRegistry};
pub use token::{genesis_token_id, TokenInfo, TokenRegistry};
pub use transaction::{Transaction, TxInput, TxOutput, TxType};
pub use utxo_store::{LedgerBatch, Utxo, UtxoStore};
pub use wallet::Wallet;

// Re-exports de tipos compartilhados
pub use shared::{Address, Hash256, NodeError, Result};
