//! Registro de tokens
//!
//! Mapa token_id -> metadados, persistido a cada mudança sob o prefixo
//! `token:` e recarregado na abertura. O token gênese (moeda nativa) é
//! inserido na construção com parâmetros fixos, de modo que todo nó
//! derive o mesmo identificador.

use crate::kv::{KvStore, WriteBatch};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use shared::{Address, Hash256, NodeError, Result, GENESIS_TIMESTAMP};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Ticker da moeda nativa
pub const GENESIS_TICKER: &str = "SHADOW";

/// Unidades inteiras da moeda nativa
pub const GENESIS_MAX_MINT: u64 = 21_000_000;

/// Casas decimais da moeda nativa
pub const GENESIS_DECIMALS: u32 = 8;

static GENESIS_TOKEN_ID: Lazy<String> = Lazy::new(|| {
    let preimage = format!(
        "{}:{}:{}:{}:{}",
        Address::zero().to_hex(),
        GENESIS_TIMESTAMP,
        GENESIS_TICKER,
        GENESIS_MAX_MINT,
        GENESIS_DECIMALS
    );
    Hash256::blake2b(preimage.as_bytes()).to_hex()
});

/// Identificador canônico da moeda nativa
#[must_use]
pub fn genesis_token_id() -> &'static str {
    &GENESIS_TOKEN_ID
}

/// Metadados e contabilidade de um token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub ticker: String,
    pub desc: String,
    pub max_mint: u64,
    pub max_decimals: u32,
    /// Oferta total em unidades mínimas
    pub total_supply: u64,
    /// Colateral nativo ainda preso ao token
    pub locked_shadow: u64,
    /// Unidades já derretidas (monotônico, até `total_supply`)
    pub total_melted: u64,
    pub creator_address: Address,
    pub creation_time: u64,
}

impl TokenInfo {
    /// Token completamente derretido: o ticker pode ser reutilizado
    #[must_use]
    pub const fn is_fully_melted(&self) -> bool {
        self.total_melted == self.total_supply
    }

    fn genesis() -> Self {
        Self {
            token_id: genesis_token_id().to_string(),
            ticker: GENESIS_TICKER.to_string(),
            desc: "Shadowy native coin".to_string(),
            max_mint: GENESIS_MAX_MINT,
            max_decimals: GENESIS_DECIMALS,
            total_supply: GENESIS_MAX_MINT * 100_000_000,
            locked_shadow: 0,
            total_melted: 0,
            creator_address: Address::zero(),
            creation_time: GENESIS_TIMESTAMP,
        }
    }
}

fn token_key(token_id: &str) -> Vec<u8> {
    format!("token:{token_id}").into_bytes()
}

/// Registro de tokens com persistência sob demanda
pub struct TokenRegistry {
    kv: Arc<dyn KvStore>,
    tokens: RwLock<HashMap<String, TokenInfo>>,
}

impl TokenRegistry {
    /// Abre o registro, recarregando tokens persistidos e garantindo o
    /// token gênese
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção na releitura
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self> {
        let mut tokens = HashMap::new();

        for item in kv.scan_prefix(b"token:") {
            let (key, value) = item?;
            let info: TokenInfo = serde_json::from_slice(&value).map_err(|e| {
                NodeError::Corruption(format!(
                    "token inválido em {}: {e}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            tokens.insert(info.token_id.clone(), info);
        }

        let registry = Self {
            kv,
            tokens: RwLock::new(tokens),
        };

        if registry.get_by_id(genesis_token_id()).is_none() {
            registry.register(TokenInfo::genesis())?;
        }

        Ok(registry)
    }

    /// Registra um token novo, persistindo imediatamente
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se o id já existir, erro de I/O na escrita
    pub fn register(&self, info: TokenInfo) -> Result<()> {
        self.ensure_absent(&info.token_id)?;
        self.persist(&info)?;
        self.tokens
            .write()
            .expect("token lock")
            .insert(info.token_id.clone(), info);
        Ok(())
    }

    /// Registra um token dentro de um bloco: a memória muda agora, a
    /// escrita no KV entra no lote atômico do bloco
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se o id já existir
    pub fn register_staged(&self, info: TokenInfo, batch: &mut WriteBatch) -> Result<()> {
        self.ensure_absent(&info.token_id)?;
        batch.set(token_key(&info.token_id), serde_json::to_vec(&info)?);
        self.tokens
            .write()
            .expect("token lock")
            .insert(info.token_id.clone(), info);
        Ok(())
    }

    /// Atualiza um token existente, persistindo imediatamente
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se o token não existir
    pub fn update(&self, info: TokenInfo) -> Result<()> {
        self.ensure_present(&info.token_id)?;
        self.persist(&info)?;
        self.tokens
            .write()
            .expect("token lock")
            .insert(info.token_id.clone(), info);
        Ok(())
    }

    /// Atualiza um token dentro de um bloco (escrita vai para o lote)
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se o token não existir
    pub fn update_staged(&self, info: TokenInfo, batch: &mut WriteBatch) -> Result<()> {
        self.ensure_present(&info.token_id)?;
        batch.set(token_key(&info.token_id), serde_json::to_vec(&info)?);
        self.tokens
            .write()
            .expect("token lock")
            .insert(info.token_id.clone(), info);
        Ok(())
    }

    fn ensure_absent(&self, token_id: &str) -> Result<()> {
        if self.tokens.read().expect("token lock").contains_key(token_id) {
            return Err(NodeError::Validation(format!(
                "token já registrado: {token_id}"
            )));
        }
        Ok(())
    }

    fn ensure_present(&self, token_id: &str) -> Result<()> {
        if !self.tokens.read().expect("token lock").contains_key(token_id) {
            return Err(NodeError::Validation(format!(
                "token desconhecido: {token_id}"
            )));
        }
        Ok(())
    }

    fn persist(&self, info: &TokenInfo) -> Result<()> {
        let bytes = serde_json::to_vec(info)?;
        self.kv.set(&token_key(&info.token_id), &bytes)
    }

    /// Busca por identificador
    #[must_use]
    pub fn get_by_id(&self, token_id: &str) -> Option<TokenInfo> {
        self.tokens
            .read()
            .expect("token lock")
            .get(token_id)
            .cloned()
    }

    /// Busca por ticker (primeiro token vivo com o ticker)
    #[must_use]
    pub fn get_by_ticker(&self, ticker: &str) -> Option<TokenInfo> {
        self.tokens
            .read()
            .expect("token lock")
            .values()
            .find(|t| t.ticker == ticker && !t.is_fully_melted())
            .cloned()
    }

    /// Um ticker só pode ser reutilizado por um token totalmente
    /// derretido
    #[must_use]
    pub fn check_ticker_available(&self, ticker: &str) -> bool {
        self.tokens
            .read()
            .expect("token lock")
            .values()
            .all(|t| t.ticker != ticker || t.is_fully_melted())
    }

    /// Registra um derretimento: `amount` unidades do token deixam de
    /// existir e `unlocked` satoshis de colateral são liberados
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se o derretimento exceder a contabilidade
    pub fn record_melt(&self, token_id: &str, amount: u64, unlocked: u64) -> Result<()> {
        let info = self.melted_info(token_id, amount, unlocked)?;
        self.update(info)
    }

    /// Variante de [`Self::record_melt`] com escrita no lote do bloco
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se o derretimento exceder a contabilidade
    pub fn record_melt_staged(
        &self,
        token_id: &str,
        amount: u64,
        unlocked: u64,
        batch: &mut WriteBatch,
    ) -> Result<()> {
        let info = self.melted_info(token_id, amount, unlocked)?;
        self.update_staged(info, batch)
    }

    fn melted_info(&self, token_id: &str, amount: u64, unlocked: u64) -> Result<TokenInfo> {
        let mut info = self.get_by_id(token_id).ok_or_else(|| {
            NodeError::Validation(format!("token desconhecido: {token_id}"))
        })?;

        let melted = info.total_melted.checked_add(amount).ok_or_else(|| {
            NodeError::Validation("overflow em total_melted".to_string())
        })?;
        if melted > info.total_supply {
            return Err(NodeError::Validation(format!(
                "derretimento excede a oferta: {} > {}",
                melted, info.total_supply
            )));
        }
        if unlocked > info.locked_shadow {
            return Err(NodeError::Validation(format!(
                "liberação excede o colateral: {} > {}",
                unlocked, info.locked_shadow
            )));
        }

        info.total_melted = melted;
        info.locked_shadow -= unlocked;
        Ok(info)
    }

    /// Todos os tokens registrados
    #[must_use]
    pub fn all(&self) -> Vec<TokenInfo> {
        self.tokens
            .read()
            .expect("token lock")
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot do estado em memória (para reverter um bloco que falhou)
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, TokenInfo> {
        self.tokens.read().expect("token lock").clone()
    }

    /// Restaura um snapshot tirado antes de aplicar um bloco que
    /// falhou. As escritas correspondentes estavam no lote descartado,
    /// então só a memória precisa voltar.
    pub fn restore(&self, snapshot: HashMap<String, TokenInfo>) {
        *self.tokens.write().expect("token lock") = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn registry() -> TokenRegistry {
        TokenRegistry::open(Arc::new(MemoryKv::new())).unwrap()
    }

    fn test_token(id: &str, ticker: &str) -> TokenInfo {
        TokenInfo {
            token_id: id.to_string(),
            ticker: ticker.to_string(),
            desc: String::new(),
            max_mint: 1000,
            max_decimals: 2,
            total_supply: 100_000,
            locked_shadow: 100_000,
            total_melted: 0,
            creator_address: Address::zero(),
            creation_time: GENESIS_TIMESTAMP,
        }
    }

    #[test]
    fn test_genesis_token_present() {
        let registry = registry();
        let genesis = registry.get_by_id(genesis_token_id()).unwrap();

        assert_eq!(genesis.ticker, GENESIS_TICKER);
        assert_eq!(genesis.total_supply, 21_000_000 * 100_000_000);
        assert!(!registry.check_ticker_available(GENESIS_TICKER));
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        registry.register(test_token("t1", "TEST")).unwrap();

        assert_eq!(registry.get_by_ticker("TEST").unwrap().token_id, "t1");
        assert!(!registry.check_ticker_available("TEST"));
        assert!(registry.check_ticker_available("OTHER"));

        // Id duplicado é rejeitado
        assert!(registry.register(test_token("t1", "TEST2")).is_err());
    }

    #[test]
    fn test_melt_accounting() {
        let registry = registry();
        registry.register(test_token("t1", "TEST")).unwrap();

        registry.record_melt("t1", 40_000, 40_000).unwrap();
        let info = registry.get_by_id("t1").unwrap();
        assert_eq!(info.total_melted, 40_000);
        assert_eq!(info.locked_shadow, 60_000);
        assert!(!info.is_fully_melted());

        // Derreter além da oferta falha
        assert!(registry.record_melt("t1", 60_001, 0).is_err());

        registry.record_melt("t1", 60_000, 60_000).unwrap();
        assert!(registry.get_by_id("t1").unwrap().is_fully_melted());

        // Ticker liberado após derretimento total
        assert!(registry.check_ticker_available("TEST"));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        {
            let registry = TokenRegistry::open(Arc::clone(&kv)).unwrap();
            registry.register(test_token("t1", "TEST")).unwrap();
        }

        let reopened = TokenRegistry::open(kv).unwrap();
        assert_eq!(reopened.get_by_id("t1").unwrap().ticker, "TEST");
    }

    #[test]
    fn test_snapshot_restore() {
        let registry = registry();
        let snapshot = registry.snapshot();

        registry.register(test_token("t1", "TEST")).unwrap();
        assert!(registry.get_by_id("t1").is_some());

        registry.restore(snapshot);
        assert!(registry.get_by_id("t1").is_none());
    }
}
