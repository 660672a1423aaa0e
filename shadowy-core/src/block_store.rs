//! Persistência de blocos
//!
//! Esquema de chaves: `block:{altura}` guarda o bloco em JSON,
//! `blockhash:{hash}` indexa a altura em decimal ASCII, `meta:height`
//! aponta a última altura e `meta:genesis_hash` o hash do gênese. As
//! quatro chaves de um bloco entram no mesmo lote atômico.

use crate::block::Block;
use crate::kv::{KvStore, WriteBatch};
use dashmap::DashMap;
use shared::{NodeError, Result};
use std::sync::Arc;

fn block_key(height: u64) -> Vec<u8> {
    format!("block:{height}").into_bytes()
}

fn hash_key(hash: &str) -> Vec<u8> {
    format!("blockhash:{hash}").into_bytes()
}

const META_HEIGHT: &[u8] = b"meta:height";
const META_GENESIS_HASH: &[u8] = b"meta:genesis_hash";

/// Armazém de blocos com cache altura -> bloco
pub struct BlockStore {
    kv: Arc<dyn KvStore>,
    cache: DashMap<u64, Block>,
}

impl BlockStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: DashMap::new(),
        }
    }

    /// Persiste um bloco: registro, índice de hash e ponteiro de altura
    /// no mesmo lote; o gênese também grava `meta:genesis_hash`
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na escrita
    pub fn save_block(&self, block: &Block) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set(block_key(block.index), serde_json::to_vec(block)?);
        batch.set(hash_key(&block.hash), block.index.to_string());
        batch.set(META_HEIGHT.to_vec(), block.index.to_string());
        if block.index == 0 {
            batch.set(META_GENESIS_HASH.to_vec(), block.hash.clone());
        }
        self.kv.apply_batch(batch)?;

        self.cache.insert(block.index, block.clone());
        Ok(())
    }

    /// Lê um bloco pela altura (cache, depois KV)
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção do registro
    pub fn get_block(&self, height: u64) -> Result<Option<Block>> {
        if let Some(found) = self.cache.get(&height) {
            return Ok(Some(found.clone()));
        }

        match self.kv.get(&block_key(height))? {
            None => Ok(None),
            Some(bytes) => {
                let block: Block = serde_json::from_slice(&bytes).map_err(|e| {
                    NodeError::Corruption(format!("bloco {height} ilegível: {e}"))
                })?;
                self.cache.insert(height, block.clone());
                Ok(Some(block))
            }
        }
    }

    /// Resolve um bloco pelo hash via índice secundário
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção do índice
    pub fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        match self.kv.get(&hash_key(hash))? {
            None => Ok(None),
            Some(bytes) => {
                let height: u64 = String::from_utf8_lossy(&bytes).parse().map_err(|_| {
                    NodeError::Corruption(format!("índice de hash inválido para {hash}"))
                })?;
                self.get_block(height)
            }
        }
    }

    /// Blocos contíguos em `[start, end]`, parando na primeira lacuna
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O nas leituras
    pub fn get_block_range(&self, start: u64, end: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        if start > end {
            return Ok(blocks);
        }
        for height in start..=end {
            match self.get_block(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Indica se uma altura está persistida
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na leitura
    pub fn has_block(&self, height: u64) -> Result<bool> {
        if self.cache.contains_key(&height) {
            return Ok(true);
        }
        Ok(self.kv.get(&block_key(height))?.is_some())
    }

    /// Última altura persistida, se houver
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção do ponteiro
    pub fn get_latest_height(&self) -> Result<Option<u64>> {
        match self.kv.get(META_HEIGHT)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8_lossy(&bytes)
                .parse()
                .map(Some)
                .map_err(|_| NodeError::Corruption("meta:height inválido".to_string())),
        }
    }

    /// Hash do gênese persistido, se houver
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na leitura
    pub fn get_genesis_hash(&self) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(META_GENESIS_HASH)?
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()))
    }
}
