//! Cadeia de blocos
//!
//! Sequência única, sem reorganização: blocos entram por `add_block`
//! em ordem estrita de altura. A cadeia é dona do armazém de blocos,
//! do conjunto UTXO e dos registros de tokens e pools; os registros
//! são passados por referência para a aplicação de transações.

use crate::block::Block;
use crate::block_store::BlockStore;
use crate::kv::KvStore;
use crate::pool::PoolRegistry;
use crate::token::{genesis_token_id, TokenRegistry};
use crate::transaction::{Transaction, TxType};
use crate::utxo_store::{LedgerBatch, UtxoStore};
use shared::{block_reward, Hash256, NodeError, Result};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Cadeia replicada com estado de ledger
pub struct Chain {
    blocks: RwLock<Vec<Block>>,
    block_store: BlockStore,
    utxo_store: UtxoStore,
    tokens: TokenRegistry,
    pools: PoolRegistry,
}

impl Chain {
    /// Abre a cadeia sobre um KV: cria o gênese se ausente, senão
    /// recarrega todos os blocos em ordem
    ///
    /// # Errors
    ///
    /// Retorna `Corruption` se houver lacuna ou encadeamento inválido
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self> {
        let block_store = BlockStore::new(Arc::clone(&kv));
        let utxo_store = UtxoStore::new(Arc::clone(&kv));
        let tokens = TokenRegistry::open(Arc::clone(&kv))?;
        let pools = PoolRegistry::open(kv)?;

        let mut blocks = Vec::new();
        match block_store.get_latest_height()? {
            None => {
                let genesis = Block::genesis();
                block_store.save_block(&genesis)?;
                info!(hash = %genesis.hash, "bloco gênese criado");
                blocks.push(genesis);
            }
            Some(latest) => {
                for height in 0..=latest {
                    let block = block_store.get_block(height)?.ok_or_else(|| {
                        NodeError::Corruption(format!("lacuna na cadeia na altura {height}"))
                    })?;
                    if let Some(prev) = blocks.last() {
                        if block.prev_hash != prev.hash {
                            return Err(NodeError::Corruption(format!(
                                "encadeamento inválido na altura {height}"
                            )));
                        }
                    }
                    blocks.push(block);
                }
                info!(height = latest, "cadeia recarregada");
            }
        }

        Ok(Self {
            blocks: RwLock::new(blocks),
            block_store,
            utxo_store,
            tokens,
            pools,
        })
    }

    /// Altura do último bloco
    #[must_use]
    pub fn height(&self) -> u64 {
        (self.blocks.read().expect("chain lock").len() - 1) as u64
    }

    /// Último bloco da cadeia
    #[must_use]
    pub fn latest_block(&self) -> Block {
        self.blocks
            .read()
            .expect("chain lock")
            .last()
            .expect("gênese sempre existe")
            .clone()
    }

    /// Bloco numa altura, se presente em memória
    #[must_use]
    pub fn get_block(&self, height: u64) -> Option<Block> {
        self.blocks
            .read()
            .expect("chain lock")
            .get(usize::try_from(height).ok()?)
            .cloned()
    }

    /// Blocos contíguos em `[start, end]`
    #[must_use]
    pub fn get_block_range(&self, start: u64, end: u64) -> Vec<Block> {
        if start > end {
            return Vec::new();
        }
        let blocks = self.blocks.read().expect("chain lock");
        blocks
            .iter()
            .skip(usize::try_from(start).unwrap_or(usize::MAX))
            .take(usize::try_from(end - start + 1).unwrap_or(0))
            .cloned()
            .collect()
    }

    /// Indica se a altura já contém um bloco com o hash dado
    #[must_use]
    pub fn has_block(&self, height: u64, hash: &str) -> bool {
        self.get_block(height).is_some_and(|b| b.hash == hash)
    }

    /// Monta um bloco candidato; não persiste nada
    ///
    /// A lista `tx_ids` já inclui o id do coinbase na posição 0; os
    /// corpos das demais transações seguem no bloco para os
    /// validadores e para sincronização.
    #[must_use]
    pub fn propose_block(
        &self,
        tx_ids: Vec<Hash256>,
        proposer: &str,
        coinbase: Transaction,
        tx_bodies: Vec<Transaction>,
        timestamp: u64,
    ) -> Block {
        let latest = self.latest_block();
        let mut block = Block {
            index: latest.index + 1,
            timestamp,
            prev_hash: latest.hash,
            transactions: tx_ids,
            coinbase,
            proposer: proposer.to_string(),
            winning_proof: None,
            winner_address: None,
            votes: std::collections::BTreeSet::new(),
            hash: String::new(),
            tx_bodies,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Valida um candidato contra o topo atual
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se índice, encadeamento, hash ou corpo não
    /// conferirem
    pub fn validate_block(&self, block: &Block) -> Result<()> {
        let latest = self.latest_block();

        if block.index != latest.index + 1 {
            return Err(NodeError::Validation(format!(
                "altura {} fora de ordem (topo {})",
                block.index, latest.index
            )));
        }
        if block.prev_hash != latest.hash {
            return Err(NodeError::Validation(
                "prev_hash não aponta para o topo".to_string(),
            ));
        }
        if block.hash != block.compute_hash() {
            return Err(NodeError::Validation(
                "hash do bloco não confere".to_string(),
            ));
        }

        let Some(first_id) = block.transactions.first() else {
            return Err(NodeError::Validation(
                "bloco sem lista de transações".to_string(),
            ));
        };
        if *first_id != block.coinbase.id {
            return Err(NodeError::Validation(
                "índice 0 não é o coinbase".to_string(),
            ));
        }
        block.coinbase.validate()?;

        // Corpos devem casar um a um com a lista de ids
        let expected = &block.transactions[1..];
        if expected.len() != block.tx_bodies.len() {
            return Err(NodeError::Validation(
                "corpos de transação ausentes".to_string(),
            ));
        }
        for (id, body) in expected.iter().zip(&block.tx_bodies) {
            if *id != body.id {
                return Err(NodeError::Validation(
                    "corpo não corresponde ao id listado".to_string(),
                ));
            }
            body.validate()?;
        }

        Ok(())
    }

    /// Valida, aplica e persiste um bloco. Ou todos os efeitos do bloco
    /// entram, ou nenhum.
    ///
    /// # Errors
    ///
    /// Propaga falhas de validação e de aplicação; o estado volta ao
    /// anterior em caso de erro
    pub fn add_block(&self, block: Block) -> Result<()> {
        self.validate_block(&block)?;

        // Sob a trava de escrita, o topo não pode ter avançado desde a
        // validação
        let mut blocks = self.blocks.write().expect("chain lock");
        if block.index != (blocks.len() as u64) {
            return Err(NodeError::Validation(format!(
                "altura {} fora de ordem (topo {})",
                block.index,
                blocks.len() - 1
            )));
        }

        let token_snapshot = self.tokens.snapshot();
        let pool_snapshot = self.pools.snapshot();

        let result = self.apply_block(&block);
        match result {
            Ok(()) => {
                self.block_store.save_block(&block)?;
                info!(
                    height = block.index,
                    txs = block.transactions.len(),
                    proposer = %block.proposer,
                    "bloco confirmado"
                );
                blocks.push(block);
                Ok(())
            }
            Err(err) => {
                warn!(height = block.index, error = %err, "bloco rejeitado na aplicação");
                self.tokens.restore(token_snapshot);
                self.pools.restore(pool_snapshot);
                Err(err)
            }
        }
    }

    fn apply_block(&self, block: &Block) -> Result<()> {
        let mut batch = LedgerBatch::new();

        // Taxas calculadas com a visão encenada, antes de cada gasto
        let mut total_fees = 0u64;
        for body in &block.tx_bodies {
            total_fees = total_fees
                .checked_add(self.fee_of(body, &batch)?)
                .ok_or_else(|| NodeError::Validation("overflow nas taxas".to_string()))?;

            self.utxo_store
                .apply_transaction(body, block.index, &self.tokens, &self.pools, &mut batch)?;
        }

        // O coinbase paga exatamente recompensa + taxas
        let expected = block_reward(block.index)
            .checked_add(total_fees)
            .ok_or_else(|| NodeError::Validation("overflow na recompensa".to_string()))?;
        if block.coinbase.native_output_sum() != expected {
            return Err(NodeError::Validation(format!(
                "coinbase paga {} em vez de {expected}",
                block.coinbase.native_output_sum()
            )));
        }

        self.utxo_store.apply_transaction(
            &block.coinbase,
            block.index,
            &self.tokens,
            &self.pools,
            &mut batch,
        )?;

        self.utxo_store.commit(batch)
    }

    /// Taxa implícita de uma transação, resolvendo entradas na visão
    /// encenada do bloco
    fn fee_of(&self, tx: &Transaction, batch: &LedgerBatch) -> Result<u64> {
        match tx.tx_type {
            TxType::Coinbase => Ok(0),
            TxType::Send => {
                let mut native_in = 0u64;
                for input in &tx.inputs {
                    let utxo = self
                        .utxo_store
                        .get_utxo_staged(batch, &input.prev_tx_id, input.output_index)?
                        .ok_or_else(|| {
                            NodeError::UtxoNotFound(format!(
                                "{}:{}",
                                input.prev_tx_id, input.output_index
                            ))
                        })?;
                    if utxo.output.token_id == genesis_token_id() {
                        native_in = native_in.checked_add(utxo.output.amount).ok_or_else(|| {
                            NodeError::Validation("overflow nas entradas".to_string())
                        })?;
                    }
                }
                Ok(native_in.saturating_sub(tx.native_output_sum()))
            }
            // Tipos com saídas derivadas pelo motor cobram a taxa mínima
            _ => Ok(tx.minimum_fee()),
        }
    }

    /// Estimativa de taxas para montagem de bloco, contra o estado
    /// confirmado
    ///
    /// # Errors
    ///
    /// Retorna `UtxoNotFound` se alguma entrada não resolver
    pub fn estimate_fee(&self, tx: &Transaction) -> Result<u64> {
        let batch = LedgerBatch::new();
        self.fee_of(tx, &batch)
    }

    /// Registra um voto num bloco já confirmado
    ///
    /// # Errors
    ///
    /// `DuplicateVote` se o votante já constar; `Validation` se o hash
    /// não estiver na cadeia
    pub fn add_vote(&self, block_hash: &str, voter: &str) -> Result<()> {
        let mut blocks = self.blocks.write().expect("chain lock");
        let block = blocks
            .iter_mut()
            .rev()
            .find(|b| b.hash == block_hash)
            .ok_or_else(|| {
                NodeError::Validation(format!("bloco desconhecido para voto: {block_hash}"))
            })?;

        block.add_vote(voter)?;
        self.block_store.save_block(block)
    }

    /// Conjunto UTXO da cadeia
    #[must_use]
    pub fn utxo_store(&self) -> &UtxoStore {
        &self.utxo_store
    }

    /// Registro de tokens
    #[must_use]
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Registro de pools
    #[must_use]
    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }
}
