//! Conjunto UTXO persistido e aplicação de transações
//!
//! O estado do ledger vive no KV sob os prefixos `utxo:`, `addr:`,
//! `height:`, `spent:`, `tx:`, `addrtx:`, `val:` e `consumed:`. Toda
//! aplicação é encenada num [`LedgerBatch`]; o bloco inteiro é
//! confirmado de uma vez ou descartado por inteiro.

use crate::kv::{KvStore, WriteBatch};
use crate::payload::{self, AcceptOfferData, CancelOfferData, CreatePoolData, MeltData, OfferData,
    SwapData, TokenMintData};
use crate::pool::{self, LiquidityPool, PoolRegistry};
use crate::token::{genesis_token_id, TokenInfo, TokenRegistry};
use crate::transaction::{Transaction, TxOutput, TxType, TOKEN_TYPE_CUSTOM, TOKEN_TYPE_LP};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::{Address, Hash256, NodeError, OfferFault, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Base da codificação de altura reversa nos índices `addrtx:`
const REVERSE_HEIGHT_BASE: u64 = 1 << 59;

/// Saída de transação não gasta, com sua proveniência
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: Hash256,
    pub output_index: u32,
    pub output: TxOutput,
    pub block_height: u64,
    pub is_spent: bool,
}

impl Utxo {
    fn cache_key(tx_id: &Hash256, index: u32) -> String {
        format!("{tx_id}:{index}")
    }
}

fn utxo_key(tx_id: &Hash256, index: u32) -> Vec<u8> {
    format!("utxo:{tx_id}:{index}").into_bytes()
}

fn addr_key(address: &Address, tx_id: &Hash256, index: u32) -> Vec<u8> {
    format!("addr:{}:{tx_id}:{index}", address.to_hex()).into_bytes()
}

fn height_key(height: u64, tx_id: &Hash256, index: u32) -> Vec<u8> {
    format!("height:{height}:{tx_id}:{index}").into_bytes()
}

fn spent_key(tx_id: &Hash256, index: u32) -> Vec<u8> {
    format!("spent:{tx_id}:{index}").into_bytes()
}

fn tx_key(tx_id: &Hash256) -> Vec<u8> {
    format!("tx:{tx_id}").into_bytes()
}

fn addrtx_key(address: &Address, height: u64, tx_id: &Hash256) -> Vec<u8> {
    let reverse = REVERSE_HEIGHT_BASE - height;
    format!("addrtx:{}:{reverse:020}:{tx_id}", address.to_hex()).into_bytes()
}

fn validator_key(proposer: &[u8]) -> Vec<u8> {
    format!("val:{}", hex::encode(proposer)).into_bytes()
}

fn consumed_key(offer_tx_id: &Hash256) -> Vec<u8> {
    format!("consumed:{offer_tx_id}").into_bytes()
}

/// Escritas encenadas de um bloco: lote de KV mais a visão sobreposta
/// das UTXOs tocadas
#[derive(Default)]
pub struct LedgerBatch {
    writes: WriteBatch,
    overlay: HashMap<String, Utxo>,
    consumed_offers: BTreeSet<Hash256>,
}

impl LedgerBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Soma de valores por token durante a aplicação
#[derive(Debug, Default, Clone, Copy)]
struct TokenSum {
    amount: u64,
    locked: u64,
}

/// Conjunto UTXO persistido com cache concorrente
pub struct UtxoStore {
    kv: Arc<dyn KvStore>,
    cache: DashMap<String, Utxo>,
}

impl UtxoStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: DashMap::new(),
        }
    }

    /// Lê uma UTXO pelo outpoint (cache, depois KV)
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção do registro
    pub fn get_utxo(&self, tx_id: &Hash256, index: u32) -> Result<Option<Utxo>> {
        let key = Utxo::cache_key(tx_id, index);
        if let Some(found) = self.cache.get(&key) {
            return Ok(Some(found.clone()));
        }

        match self.kv.get(&utxo_key(tx_id, index))? {
            None => Ok(None),
            Some(bytes) => {
                let utxo: Utxo = serde_json::from_slice(&bytes).map_err(|e| {
                    NodeError::Corruption(format!("utxo {tx_id}:{index} ilegível: {e}"))
                })?;
                if !utxo.is_spent {
                    self.cache.insert(key, utxo.clone());
                }
                Ok(Some(utxo))
            }
        }
    }

    /// Leitura com a visão encenada de um bloco em aplicação
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção do registro
    pub fn get_utxo_staged(
        &self,
        batch: &LedgerBatch,
        tx_id: &Hash256,
        index: u32,
    ) -> Result<Option<Utxo>> {
        let key = Utxo::cache_key(tx_id, index);
        if let Some(staged) = batch.overlay.get(&key) {
            return Ok(Some(staged.clone()));
        }
        self.get_utxo(tx_id, index)
    }

    /// Encena a criação de uma UTXO e seus índices secundários
    fn add_utxo(&self, utxo: Utxo, batch: &mut LedgerBatch) -> Result<()> {
        let bytes = serde_json::to_vec(&utxo)?;
        batch
            .writes
            .set(utxo_key(&utxo.tx_id, utxo.output_index), bytes);
        batch.writes.set(
            addr_key(&utxo.output.address, &utxo.tx_id, utxo.output_index),
            Vec::new(),
        );
        batch.writes.set(
            height_key(utxo.block_height, &utxo.tx_id, utxo.output_index),
            Vec::new(),
        );
        batch
            .overlay
            .insert(Utxo::cache_key(&utxo.tx_id, utxo.output_index), utxo);
        Ok(())
    }

    /// Encena o gasto de uma UTXO; a trava `is_spent` é de mão única
    ///
    /// # Errors
    ///
    /// `UtxoNotFound` se o outpoint não existir, `AlreadySpent` se já
    /// tiver sido consumido
    fn spend_utxo(&self, tx_id: &Hash256, index: u32, batch: &mut LedgerBatch) -> Result<Utxo> {
        let mut utxo = self
            .get_utxo_staged(batch, tx_id, index)?
            .ok_or_else(|| NodeError::UtxoNotFound(format!("{tx_id}:{index}")))?;

        if utxo.is_spent {
            return Err(NodeError::AlreadySpent(format!("{tx_id}:{index}")));
        }

        utxo.is_spent = true;
        let bytes = serde_json::to_vec(&utxo)?;
        batch.writes.set(utxo_key(tx_id, index), bytes);
        batch.writes.set(spent_key(tx_id, index), Vec::new());
        batch
            .overlay
            .insert(Utxo::cache_key(tx_id, index), utxo.clone());
        Ok(utxo)
    }

    /// UTXOs não gastas de um endereço
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na varredura
    pub fn get_utxos_by_address(&self, address: &Address) -> Result<Vec<Utxo>> {
        let prefix = format!("addr:{}:", address.to_hex()).into_bytes();
        let mut found = Vec::new();

        for item in self.kv.scan_prefix(&prefix) {
            let (key, _) = item?;
            let suffix = &key[prefix.len()..];
            let text = String::from_utf8_lossy(suffix);
            let Some((tx_hex, idx_text)) = text.rsplit_once(':') else {
                continue;
            };
            let tx_id = Hash256::from_hex(tx_hex)
                .map_err(|_| NodeError::Corruption(format!("índice addr inválido: {text}")))?;
            let index: u32 = idx_text
                .parse()
                .map_err(|_| NodeError::Corruption(format!("índice addr inválido: {text}")))?;

            if let Some(utxo) = self.get_utxo(&tx_id, index)? {
                if !utxo.is_spent {
                    found.push(utxo);
                }
            }
        }

        Ok(found)
    }

    /// Saldo de um endereço agrupado por token
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na varredura
    pub fn get_balance(&self, address: &Address) -> Result<HashMap<String, u64>> {
        let mut balances: HashMap<String, u64> = HashMap::new();
        for utxo in self.get_utxos_by_address(address)? {
            *balances.entry(utxo.output.token_id.clone()).or_default() += utxo.output.amount;
        }
        Ok(balances)
    }

    /// Lê uma transação persistida
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção do registro
    pub fn get_transaction(&self, tx_id: &Hash256) -> Result<Option<Transaction>> {
        match self.kv.get(&tx_key(tx_id))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| NodeError::Corruption(format!("tx {tx_id} ilegível: {e}"))),
        }
    }

    /// Persiste a transação e indexa todos os endereços tocados
    /// (saídas emitidas e donos das entradas resolvidas), em ordem de
    /// altura reversa para paginação do mais novo ao mais antigo
    fn store_transaction(
        &self,
        tx: &Transaction,
        emitted: &[TxOutput],
        height: u64,
        batch: &mut LedgerBatch,
    ) -> Result<()> {
        batch.writes.set(tx_key(&tx.id), serde_json::to_vec(tx)?);

        let mut touched: BTreeSet<Address> = emitted.iter().map(|o| o.address).collect();
        for input in &tx.inputs {
            if let Some(utxo) = self.get_utxo_staged(batch, &input.prev_tx_id, input.output_index)? {
                touched.insert(utxo.output.address);
            }
        }

        for address in touched {
            batch
                .writes
                .set(addrtx_key(&address, height, &tx.id), tx.id.to_hex());
        }
        Ok(())
    }

    /// Transações de um endereço, das mais novas para as mais antigas,
    /// com cursor opcional
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na varredura
    pub fn get_transactions_by_address(
        &self,
        address: &Address,
        count: usize,
        after: Option<&Hash256>,
    ) -> Result<Vec<Transaction>> {
        let prefix = format!("addrtx:{}:", address.to_hex()).into_bytes();
        let mut skipping = after.is_some();
        let mut collected = Vec::new();

        for item in self.kv.scan_prefix(&prefix) {
            let (_, value) = item?;
            let tx_id = Hash256::from_hex(&String::from_utf8_lossy(&value))
                .map_err(|_| NodeError::Corruption("índice addrtx inválido".to_string()))?;

            if skipping {
                if Some(&tx_id) == after {
                    skipping = false;
                }
                continue;
            }

            if let Some(tx) = self.get_transaction(&tx_id)? {
                collected.push(tx);
                if collected.len() >= count {
                    break;
                }
            }
        }

        Ok(collected)
    }

    /// Registra o mapeamento proposer -> carteira
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na escrita
    pub fn register_validator(&self, proposer: &[u8], wallet: &Address) -> Result<()> {
        self.kv.set(&validator_key(proposer), wallet.to_hex().as_bytes())
    }

    /// Carteira associada a um proposer registrado
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção do registro
    pub fn get_validator_wallet(&self, proposer: &[u8]) -> Result<Option<Address>> {
        match self.kv.get(&validator_key(proposer))? {
            None => Ok(None),
            Some(bytes) => {
                let hex_text = String::from_utf8_lossy(&bytes).to_string();
                let raw = hex::decode(&hex_text)
                    .map_err(|_| NodeError::Corruption("registro de validador inválido".to_string()))?;
                let arr: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| NodeError::Corruption("registro de validador inválido".to_string()))?;
                Ok(Some(Address::from_bytes(arr)))
            }
        }
    }

    /// Consulta O(1) do índice de ofertas consumidas
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na leitura
    pub fn is_offer_consumed(&self, offer_tx_id: &Hash256) -> Result<bool> {
        Ok(self.kv.get(&consumed_key(offer_tx_id))?.is_some())
    }

    fn is_offer_consumed_staged(&self, batch: &LedgerBatch, offer_tx_id: &Hash256) -> Result<bool> {
        if batch.consumed_offers.contains(offer_tx_id) {
            return Ok(true);
        }
        self.is_offer_consumed(offer_tx_id)
    }

    fn mark_offer_consumed(&self, offer_tx_id: Hash256, batch: &mut LedgerBatch) {
        batch
            .writes
            .set(consumed_key(&offer_tx_id), Vec::new());
        batch.consumed_offers.insert(offer_tx_id);
    }

    /// Confirma o lote de um bloco: escreve tudo atomicamente e então
    /// atualiza o cache (entradas gastas são invalidadas)
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O na confirmação
    pub fn commit(&self, batch: LedgerBatch) -> Result<()> {
        let LedgerBatch {
            writes, overlay, ..
        } = batch;
        self.kv.apply_batch(writes)?;

        for (key, utxo) in overlay {
            if utxo.is_spent {
                self.cache.remove(&key);
            } else {
                self.cache.insert(key, utxo);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Aplicação de transações
    // ------------------------------------------------------------------

    /// Aplica uma transação ao estado encenado do bloco.
    ///
    /// Tipos com saídas derivadas pelo motor (mint, melt, ofertas e
    /// operações de pool) emitem as UTXOs calculadas aqui; send e
    /// coinbase emitem as saídas da própria transação.
    ///
    /// # Errors
    ///
    /// Propaga falhas de validação, gasto duplo, fundos insuficientes e
    /// estados inválidos de oferta/pool
    pub fn apply_transaction(
        &self,
        tx: &Transaction,
        height: u64,
        tokens: &TokenRegistry,
        pools: &PoolRegistry,
        batch: &mut LedgerBatch,
    ) -> Result<()> {
        let emitted = match tx.tx_type {
            TxType::Coinbase => self.apply_coinbase(tx, height, batch)?,
            TxType::Send => self.apply_send(tx, height, batch)?,
            TxType::MintToken => self.apply_mint(tx, height, tokens, batch)?,
            TxType::Melt => self.apply_melt(tx, height, tokens, batch)?,
            TxType::Offer => self.apply_offer(tx, height, batch)?,
            TxType::AcceptOffer => self.apply_accept_offer(tx, height, batch)?,
            TxType::CancelOffer => self.apply_cancel_offer(tx, height, batch)?,
            TxType::CreatePool => self.apply_create_pool(tx, height, tokens, pools, batch)?,
            TxType::AddLiquidity => self.apply_add_liquidity(tx, height, tokens, pools, batch)?,
            TxType::RemoveLiquidity => {
                self.apply_remove_liquidity(tx, height, tokens, pools, batch)?
            }
            TxType::Swap => self.apply_swap(tx, height, pools, batch)?,
            TxType::RegisterValidator => self.apply_register_validator(tx, batch)?,
        };

        self.store_transaction(tx, &emitted, height, batch)
    }

    fn emit_outputs(
        &self,
        tx: &Transaction,
        outputs: Vec<TxOutput>,
        height: u64,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        for (index, output) in outputs.iter().enumerate() {
            self.add_utxo(
                Utxo {
                    tx_id: tx.id,
                    output_index: index as u32,
                    output: output.clone(),
                    block_height: height,
                    is_spent: false,
                },
                batch,
            )?;
        }
        Ok(outputs)
    }

    /// Gasta todas as entradas, exigindo que pertençam ao assinante, e
    /// devolve as somas por token
    fn spend_inputs(
        &self,
        tx: &Transaction,
        batch: &mut LedgerBatch,
    ) -> Result<HashMap<String, TokenSum>> {
        let signer = tx.signer_address()?;
        let mut sums: HashMap<String, TokenSum> = HashMap::new();

        for input in &tx.inputs {
            let utxo = self.spend_utxo(&input.prev_tx_id, input.output_index, batch)?;

            if utxo.output.address != signer {
                return Err(NodeError::Validation(format!(
                    "entrada {}:{} não pertence ao assinante",
                    input.prev_tx_id, input.output_index
                )));
            }

            let sum = sums.entry(utxo.output.token_id.clone()).or_default();
            sum.amount = sum.amount.checked_add(utxo.output.amount).ok_or_else(|| {
                NodeError::Validation("overflow na soma das entradas".to_string())
            })?;
            sum.locked = sum.locked.saturating_add(utxo.output.locked_shadow);
        }

        Ok(sums)
    }

    fn native_available(sums: &HashMap<String, TokenSum>) -> u64 {
        sums.get(genesis_token_id()).map_or(0, |s| s.amount)
    }

    fn require_native(sums: &HashMap<String, TokenSum>, needed: u64) -> Result<()> {
        let available = Self::native_available(sums);
        if available < needed {
            return Err(NodeError::InsufficientFunds { needed, available });
        }
        Ok(())
    }

    fn apply_coinbase(
        &self,
        tx: &Transaction,
        height: u64,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        if !tx.inputs.is_empty() {
            return Err(NodeError::Validation(
                "coinbase não pode ter inputs".to_string(),
            ));
        }
        self.emit_outputs(tx, tx.outputs.clone(), height, batch)
    }

    fn apply_send(
        &self,
        tx: &Transaction,
        height: u64,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let sums = self.spend_inputs(tx, batch)?;

        // Conservação por token, nas duas direções: tokens emitidos
        // precisam bater valor e colateral entre entradas e saídas, e
        // um token gasto como entrada sem saída correspondente seria
        // destruído fora do caminho de melt. A moeda nativa pode
        // sobrar como taxa.
        let mut out_sums: HashMap<String, TokenSum> = HashMap::new();
        for output in &tx.outputs {
            let sum = out_sums.entry(output.token_id.clone()).or_default();
            sum.amount = sum.amount.checked_add(output.amount).ok_or_else(|| {
                NodeError::Validation("overflow na soma das saídas".to_string())
            })?;
            sum.locked = sum.locked.saturating_add(output.locked_shadow);
        }

        let mut token_ids: BTreeSet<&String> = sums.keys().collect();
        token_ids.extend(out_sums.keys());
        for token_id in token_ids {
            if token_id == genesis_token_id() {
                continue;
            }
            let in_sum = sums.get(token_id).copied().unwrap_or_default();
            let out_sum = out_sums.get(token_id).copied().unwrap_or_default();
            if out_sum.amount != in_sum.amount || out_sum.locked != in_sum.locked {
                return Err(NodeError::Validation(format!(
                    "transferência não conserva o token {token_id}"
                )));
            }
        }

        let native_out = out_sums
            .get(genesis_token_id())
            .map_or(0, |s| s.amount);
        let needed = native_out
            .checked_add(tx.minimum_fee())
            .ok_or_else(|| NodeError::Validation("overflow na taxa".to_string()))?;
        Self::require_native(&sums, needed)?;

        self.emit_outputs(tx, tx.outputs.clone(), height, batch)
    }

    fn apply_mint(
        &self,
        tx: &Transaction,
        height: u64,
        tokens: &TokenRegistry,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let mint: TokenMintData = payload::parse(&tx.data)?;
        mint.validate()?;
        let total_supply = mint.total_supply()?;
        let signer = tx.signer_address()?;

        if !tokens.check_ticker_available(&mint.ticker) {
            return Err(NodeError::Validation(format!(
                "ticker em uso: {}",
                mint.ticker
            )));
        }

        let sums = self.spend_inputs(tx, batch)?;
        if sums.keys().any(|token| token != genesis_token_id()) {
            return Err(NodeError::Validation(
                "emissão aceita apenas entradas nativas".to_string(),
            ));
        }

        let fee = tx.minimum_fee();
        let needed = total_supply
            .checked_add(fee)
            .ok_or_else(|| NodeError::Validation("overflow na taxa".to_string()))?;
        Self::require_native(&sums, needed)?;
        let change = Self::native_available(&sums) - needed;

        let token_id = tx.id.to_hex();
        tokens.register_staged(
            TokenInfo {
                token_id: token_id.clone(),
                ticker: mint.ticker.clone(),
                desc: mint.desc.clone(),
                max_mint: mint.max_mint,
                max_decimals: mint.max_decimals,
                total_supply,
                locked_shadow: total_supply,
                total_melted: 0,
                creator_address: signer,
                creation_time: tx.timestamp,
            },
            &mut batch.writes,
        )?;

        let mut outputs = vec![TxOutput::token(
            total_supply,
            signer,
            token_id,
            TOKEN_TYPE_CUSTOM,
            total_supply,
        )];
        if change > 0 {
            outputs.push(TxOutput::native(change, signer));
        }
        self.emit_outputs(tx, outputs, height, batch)
    }

    fn apply_melt(
        &self,
        tx: &Transaction,
        height: u64,
        tokens: &TokenRegistry,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let melt: MeltData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        if melt.token_id == genesis_token_id() {
            return Err(NodeError::Validation(
                "a moeda nativa não derrete".to_string(),
            ));
        }

        let sums = self.spend_inputs(tx, batch)?;
        let token_in = sums.get(&melt.token_id).copied().unwrap_or_default();
        if melt.melt_amount == 0 || melt.melt_amount > token_in.amount {
            return Err(NodeError::InsufficientFunds {
                needed: melt.melt_amount,
                available: token_in.amount,
            });
        }

        let fee = tx.minimum_fee();
        Self::require_native(&sums, fee)?;

        // Liberação proporcional do colateral
        let unlocked = u64::try_from(
            u128::from(melt.melt_amount) * u128::from(token_in.locked)
                / u128::from(token_in.amount),
        )
        .unwrap_or(u64::MAX);

        tokens.record_melt_staged(&melt.token_id, melt.melt_amount, unlocked, &mut batch.writes)?;

        let mut outputs = Vec::new();
        let native_back = unlocked + (Self::native_available(&sums) - fee);
        if native_back > 0 {
            outputs.push(TxOutput::native(native_back, signer));
        }
        let token_change = token_in.amount - melt.melt_amount;
        if token_change > 0 {
            outputs.push(TxOutput::token(
                token_change,
                signer,
                melt.token_id.clone(),
                TOKEN_TYPE_CUSTOM,
                token_in.locked - unlocked,
            ));
        }
        self.emit_outputs(tx, outputs, height, batch)
    }

    fn apply_offer(
        &self,
        tx: &Transaction,
        height: u64,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let offer: OfferData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        if offer.have_amount == 0 || offer.want_amount == 0 {
            return Err(NodeError::Validation(
                "oferta exige quantias positivas".to_string(),
            ));
        }

        let sums = self.spend_inputs(tx, batch)?;
        let have_in = sums.get(&offer.have_token_id).copied().unwrap_or_default();

        let fee = tx.minimum_fee();
        let native_needed = if offer.have_token_id == genesis_token_id() {
            offer.have_amount
                .checked_add(fee)
                .ok_or_else(|| NodeError::Validation("overflow na taxa".to_string()))?
        } else {
            fee
        };
        Self::require_native(&sums, native_needed)?;
        if have_in.amount < offer.have_amount {
            return Err(NodeError::InsufficientFunds {
                needed: offer.have_amount,
                available: have_in.amount,
            });
        }

        // O valor ofertado fica preso: não há saída para ele. Apenas o
        // troco volta ao ofertante.
        let mut outputs = Vec::new();
        if offer.have_token_id == genesis_token_id() {
            let change = have_in.amount - native_needed;
            if change > 0 {
                outputs.push(TxOutput::native(change, signer));
            }
        } else {
            let change = have_in.amount - offer.have_amount;
            if change > 0 {
                let change_locked = proportional(have_in.locked, change, have_in.amount);
                outputs.push(TxOutput::token(
                    change,
                    signer,
                    offer.have_token_id.clone(),
                    TOKEN_TYPE_CUSTOM,
                    change_locked,
                ));
            }
            let native_change = Self::native_available(&sums) - fee;
            if native_change > 0 {
                outputs.push(TxOutput::native(native_change, signer));
            }
        }

        self.emit_outputs(tx, outputs, height, batch)
    }

    /// Resolve os termos e o colateral preso de uma oferta gravada
    fn locked_offer_terms(
        &self,
        batch: &LedgerBatch,
        offer_tx: &Transaction,
    ) -> Result<(OfferData, u64)> {
        let offer: OfferData = payload::parse(&offer_tx.data)?;

        let mut have_in = TokenSum::default();
        for input in &offer_tx.inputs {
            let utxo = self
                .get_utxo_staged(batch, &input.prev_tx_id, input.output_index)?
                .ok_or_else(|| {
                    NodeError::Corruption(format!(
                        "entrada da oferta sumiu: {}:{}",
                        input.prev_tx_id, input.output_index
                    ))
                })?;
            if utxo.output.token_id == offer.have_token_id {
                have_in.amount += utxo.output.amount;
                have_in.locked += utxo.output.locked_shadow;
            }
        }

        if have_in.amount < offer.have_amount {
            return Err(NodeError::Corruption(
                "oferta gravada sem cobertura".to_string(),
            ));
        }

        let change = have_in.amount - offer.have_amount;
        let change_locked = proportional(have_in.locked, change, have_in.amount);
        Ok((offer, have_in.locked - change_locked))
    }

    fn load_offer(
        &self,
        batch: &LedgerBatch,
        offer_tx_id: &Hash256,
        height: u64,
    ) -> Result<Transaction> {
        let offer_tx = self
            .get_transaction(offer_tx_id)?
            .ok_or(NodeError::OfferState(OfferFault::Missing))?;
        if offer_tx.tx_type != TxType::Offer {
            return Err(NodeError::OfferState(OfferFault::Missing));
        }
        if self.is_offer_consumed_staged(batch, offer_tx_id)? {
            return Err(NodeError::OfferState(OfferFault::Consumed));
        }
        let offer: OfferData = payload::parse(&offer_tx.data)?;
        if height >= offer.expires_at_block {
            return Err(NodeError::OfferState(OfferFault::Expired));
        }
        Ok(offer_tx)
    }

    fn apply_accept_offer(
        &self,
        tx: &Transaction,
        height: u64,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let accept: AcceptOfferData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        let offer_tx = self.load_offer(batch, &accept.offer_tx_id, height)?;
        let (offer, have_locked) = self.locked_offer_terms(batch, &offer_tx)?;

        let sums = self.spend_inputs(tx, batch)?;
        let want_in = sums.get(&offer.want_token_id).copied().unwrap_or_default();

        let fee = tx.minimum_fee();
        let native_needed = if offer.want_token_id == genesis_token_id() {
            offer.want_amount
                .checked_add(fee)
                .ok_or_else(|| NodeError::Validation("overflow na taxa".to_string()))?
        } else {
            fee
        };
        Self::require_native(&sums, native_needed)?;
        if want_in.amount < offer.want_amount {
            return Err(NodeError::InsufficientFunds {
                needed: offer.want_amount,
                available: want_in.amount,
            });
        }

        let mut outputs = Vec::new();

        // Lado have: o valor preso da oferta vai para quem aceita
        if offer.have_token_id == genesis_token_id() {
            outputs.push(TxOutput::native(offer.have_amount, signer));
        } else {
            outputs.push(TxOutput::token(
                offer.have_amount,
                signer,
                offer.have_token_id.clone(),
                TOKEN_TYPE_CUSTOM,
                have_locked,
            ));
        }

        // Lado want: vai para o endereço da oferta
        let want_locked_given = proportional(want_in.locked, offer.want_amount, want_in.amount);
        if offer.want_token_id == genesis_token_id() {
            outputs.push(TxOutput::native(offer.want_amount, offer.offer_address));
        } else {
            outputs.push(TxOutput::token(
                offer.want_amount,
                offer.offer_address,
                offer.want_token_id.clone(),
                TOKEN_TYPE_CUSTOM,
                want_locked_given,
            ));
        }

        // Trocos de quem aceita
        if offer.want_token_id == genesis_token_id() {
            let change = want_in.amount - native_needed;
            if change > 0 {
                outputs.push(TxOutput::native(change, signer));
            }
        } else {
            let change = want_in.amount - offer.want_amount;
            if change > 0 {
                outputs.push(TxOutput::token(
                    change,
                    signer,
                    offer.want_token_id.clone(),
                    TOKEN_TYPE_CUSTOM,
                    want_in.locked - want_locked_given,
                ));
            }
            let native_change = Self::native_available(&sums) - fee;
            if native_change > 0 {
                outputs.push(TxOutput::native(native_change, signer));
            }
        }

        self.mark_offer_consumed(accept.offer_tx_id, batch);
        self.emit_outputs(tx, outputs, height, batch)
    }

    fn apply_cancel_offer(
        &self,
        tx: &Transaction,
        height: u64,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let cancel: CancelOfferData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        let offer_tx = self.load_offer(batch, &cancel.offer_tx_id, height)?;
        if offer_tx.signer_address()? != signer {
            return Err(NodeError::OfferState(OfferFault::NotOwner));
        }
        let (offer, have_locked) = self.locked_offer_terms(batch, &offer_tx)?;

        let sums = self.spend_inputs(tx, batch)?;
        let fee = tx.minimum_fee();
        Self::require_native(&sums, fee)?;

        let mut outputs = Vec::new();
        if offer.have_token_id == genesis_token_id() {
            outputs.push(TxOutput::native(offer.have_amount, offer.offer_address));
        } else {
            outputs.push(TxOutput::token(
                offer.have_amount,
                offer.offer_address,
                offer.have_token_id.clone(),
                TOKEN_TYPE_CUSTOM,
                have_locked,
            ));
        }
        let native_change = Self::native_available(&sums) - fee;
        if native_change > 0 {
            outputs.push(TxOutput::native(native_change, signer));
        }

        self.mark_offer_consumed(cancel.offer_tx_id, batch);
        self.emit_outputs(tx, outputs, height, batch)
    }

    /// Verifica a cobertura das entradas para um conjunto de depósitos
    /// mais a taxa, e devolve os trocos por token
    fn settle_deposits(
        &self,
        sums: &HashMap<String, TokenSum>,
        deposits: &[(String, u64)],
        fee: u64,
    ) -> Result<Vec<(String, u64, u64)>> {
        let mut needed: HashMap<String, u64> = HashMap::new();
        for (token, amount) in deposits {
            let entry = needed.entry(token.clone()).or_default();
            *entry = entry
                .checked_add(*amount)
                .ok_or_else(|| NodeError::Validation("overflow no depósito".to_string()))?;
        }
        // Quando a moeda nativa é um dos lados, o mesmo conjunto de
        // entradas cobre depósito e taxa
        let native_entry = needed.entry(genesis_token_id().to_string()).or_default();
        *native_entry = native_entry
            .checked_add(fee)
            .ok_or_else(|| NodeError::Validation("overflow na taxa".to_string()))?;

        let mut changes = Vec::new();
        for (token, amount_needed) in &needed {
            let available = sums.get(token).copied().unwrap_or_default();
            if available.amount < *amount_needed {
                return Err(NodeError::InsufficientFunds {
                    needed: *amount_needed,
                    available: available.amount,
                });
            }
            let change = available.amount - amount_needed;
            if change > 0 {
                // O colateral das entradas fica integralmente no troco
                changes.push((token.clone(), change, available.locked));
            }
        }

        // Entradas de tokens que não participam do depósito voltam inteiras
        for (token, sum) in sums {
            if !needed.contains_key(token) && sum.amount > 0 {
                changes.push((token.clone(), sum.amount, sum.locked));
            }
        }

        changes.sort();
        Ok(changes)
    }

    fn change_outputs(&self, signer: Address, changes: Vec<(String, u64, u64)>) -> Vec<TxOutput> {
        changes
            .into_iter()
            .map(|(token, amount, locked)| {
                if token == genesis_token_id() {
                    TxOutput::native(amount, signer)
                } else {
                    TxOutput::token(amount, signer, token, TOKEN_TYPE_CUSTOM, locked)
                }
            })
            .collect()
    }

    fn apply_create_pool(
        &self,
        tx: &Transaction,
        height: u64,
        tokens: &TokenRegistry,
        pools: &PoolRegistry,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let create: CreatePoolData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        if create.token_a == create.token_b {
            return Err(NodeError::PoolState(
                "pool exige tokens distintos".to_string(),
            ));
        }
        if pools.has_pair(&create.token_a, &create.token_b) {
            return Err(NodeError::PoolState(format!(
                "par já possui pool: {}/{}",
                create.token_a, create.token_b
            )));
        }
        if create.amount_a == 0 || create.amount_b == 0 {
            return Err(NodeError::PoolState(
                "liquidez inicial não pode ser nula".to_string(),
            ));
        }
        if create.fee_percent >= 10_000 {
            return Err(NodeError::PoolState(format!(
                "taxa inválida: {} bp",
                create.fee_percent
            )));
        }

        let ticker_a = self.ticker_of(tokens, &create.token_a)?;
        let ticker_b = self.ticker_of(tokens, &create.token_b)?;

        let sums = self.spend_inputs(tx, batch)?;
        let changes = self.settle_deposits(
            &sums,
            &[
                (create.token_a.clone(), create.amount_a),
                (create.token_b.clone(), create.amount_b),
            ],
            tx.minimum_fee(),
        )?;

        let pool_id = tx.id.to_hex();
        let lp_mint = pool::initial_lp_mint(create.amount_a, create.amount_b);
        if lp_mint == 0 {
            return Err(NodeError::PoolState(
                "liquidez inicial insuficiente".to_string(),
            ));
        }

        let lp_token_id = Hash256::blake2b(format!("lp:{pool_id}").as_bytes()).to_hex();
        let lp_ticker = format!("{ticker_a}{ticker_b}LP{}", &pool_id[..8]);
        tokens.register_staged(
            TokenInfo {
                token_id: lp_token_id.clone(),
                ticker: lp_ticker,
                desc: format!("LP do pool {ticker_a}/{ticker_b}"),
                max_mint: lp_mint,
                max_decimals: 8,
                total_supply: lp_mint,
                locked_shadow: 0,
                total_melted: 0,
                creator_address: signer,
                creation_time: tx.timestamp,
            },
            &mut batch.writes,
        )?;

        pools.register_staged(
            LiquidityPool {
                pool_id,
                token_a: create.token_a,
                token_b: create.token_b,
                reserve_a: create.amount_a,
                reserve_b: create.amount_b,
                lp_token_id: lp_token_id.clone(),
                lp_token_supply: lp_mint,
                fee_percent: create.fee_percent,
                k: u128::from(create.amount_a) * u128::from(create.amount_b),
                created_at: tx.timestamp,
            },
            &mut batch.writes,
        )?;

        let mut outputs = vec![TxOutput::token(
            lp_mint,
            signer,
            lp_token_id,
            TOKEN_TYPE_LP,
            0,
        )];
        outputs.extend(self.change_outputs(signer, changes));
        self.emit_outputs(tx, outputs, height, batch)
    }

    fn ticker_of(&self, tokens: &TokenRegistry, token_id: &str) -> Result<String> {
        tokens
            .get_by_id(token_id)
            .map(|t| t.ticker)
            .ok_or_else(|| NodeError::Validation(format!("token desconhecido: {token_id}")))
    }

    fn apply_add_liquidity(
        &self,
        tx: &Transaction,
        height: u64,
        tokens: &TokenRegistry,
        pools: &PoolRegistry,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let add: payload::AddLiquidityData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        let mut pool = pools
            .get_pool(&add.pool_id)
            .ok_or_else(|| NodeError::PoolState(format!("pool desconhecido: {}", add.pool_id)))?;

        if !pool::ratio_within_tolerance(add.amount_a, add.amount_b, pool.reserve_a, pool.reserve_b)
        {
            return Err(NodeError::PoolState(
                "depósito desvia mais de 1% da razão do pool".to_string(),
            ));
        }

        let lp_out = pool::deposit_lp_mint(
            add.amount_a,
            add.amount_b,
            pool.reserve_a,
            pool.reserve_b,
            pool.lp_token_supply,
        )?;
        if lp_out < add.min_lp_tokens {
            return Err(NodeError::PoolState(format!(
                "slippage: {lp_out} LP < mínimo {}",
                add.min_lp_tokens
            )));
        }

        let sums = self.spend_inputs(tx, batch)?;
        let changes = self.settle_deposits(
            &sums,
            &[
                (pool.token_a.clone(), add.amount_a),
                (pool.token_b.clone(), add.amount_b),
            ],
            tx.minimum_fee(),
        )?;

        pool.reserve_a = pool
            .reserve_a
            .checked_add(add.amount_a)
            .ok_or_else(|| NodeError::PoolState("overflow na reserva".to_string()))?;
        pool.reserve_b = pool
            .reserve_b
            .checked_add(add.amount_b)
            .ok_or_else(|| NodeError::PoolState("overflow na reserva".to_string()))?;
        pool.lp_token_supply = pool
            .lp_token_supply
            .checked_add(lp_out)
            .ok_or_else(|| NodeError::PoolState("overflow na oferta de LP".to_string()))?;
        pool.k = u128::from(pool.reserve_a) * u128::from(pool.reserve_b);

        let lp_token_id = pool.lp_token_id.clone();
        self.adjust_lp_supply(tokens, &lp_token_id, i128::from(lp_out), batch)?;
        pools.update_staged(pool, &mut batch.writes)?;

        let mut outputs = vec![TxOutput::token(lp_out, signer, lp_token_id, TOKEN_TYPE_LP, 0)];
        outputs.extend(self.change_outputs(signer, changes));
        self.emit_outputs(tx, outputs, height, batch)
    }

    fn adjust_lp_supply(
        &self,
        tokens: &TokenRegistry,
        lp_token_id: &str,
        delta: i128,
        batch: &mut LedgerBatch,
    ) -> Result<()> {
        let mut info = tokens.get_by_id(lp_token_id).ok_or_else(|| {
            NodeError::Corruption(format!("token LP sumiu do registro: {lp_token_id}"))
        })?;
        let updated = i128::from(info.total_supply) + delta;
        info.total_supply = u64::try_from(updated)
            .map_err(|_| NodeError::PoolState("oferta de LP inconsistente".to_string()))?;
        info.max_mint = info.total_supply;
        tokens.update_staged(info, &mut batch.writes)
    }

    fn apply_remove_liquidity(
        &self,
        tx: &Transaction,
        height: u64,
        tokens: &TokenRegistry,
        pools: &PoolRegistry,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let remove: payload::RemoveLiquidityData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        let mut pool = pools
            .get_pool(&remove.pool_id)
            .ok_or_else(|| NodeError::PoolState(format!("pool desconhecido: {}", remove.pool_id)))?;

        if remove.lp_amount == 0 || remove.lp_amount > pool.lp_token_supply {
            return Err(NodeError::PoolState(format!(
                "queima de LP inválida: {}",
                remove.lp_amount
            )));
        }

        let a_out = u64::try_from(
            u128::from(remove.lp_amount) * u128::from(pool.reserve_a)
                / u128::from(pool.lp_token_supply),
        )
        .unwrap_or(u64::MAX);
        let b_out = u64::try_from(
            u128::from(remove.lp_amount) * u128::from(pool.reserve_b)
                / u128::from(pool.lp_token_supply),
        )
        .unwrap_or(u64::MAX);

        if a_out < remove.min_a || b_out < remove.min_b {
            return Err(NodeError::PoolState(format!(
                "slippage: retirada {a_out}/{b_out} abaixo do mínimo"
            )));
        }

        let sums = self.spend_inputs(tx, batch)?;
        let changes = self.settle_deposits(
            &sums,
            &[(pool.lp_token_id.clone(), remove.lp_amount)],
            tx.minimum_fee(),
        )?;

        pool.reserve_a -= a_out;
        pool.reserve_b -= b_out;
        pool.lp_token_supply -= remove.lp_amount;
        pool.k = u128::from(pool.reserve_a) * u128::from(pool.reserve_b);

        let lp_token_id = pool.lp_token_id.clone();
        self.adjust_lp_supply(tokens, &lp_token_id, -i128::from(remove.lp_amount), batch)?;

        let token_a = pool.token_a.clone();
        let token_b = pool.token_b.clone();
        pools.update_staged(pool, &mut batch.writes)?;

        let mut outputs = Vec::new();
        for (token, amount) in [(token_a, a_out), (token_b, b_out)] {
            if amount == 0 {
                continue;
            }
            if token == genesis_token_id() {
                outputs.push(TxOutput::native(amount, signer));
            } else {
                outputs.push(TxOutput::token(amount, signer, token, TOKEN_TYPE_CUSTOM, 0));
            }
        }
        outputs.extend(self.change_outputs(signer, changes));
        self.emit_outputs(tx, outputs, height, batch)
    }

    fn apply_swap(
        &self,
        tx: &Transaction,
        height: u64,
        pools: &PoolRegistry,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let swap: SwapData = payload::parse(&tx.data)?;
        let signer = tx.signer_address()?;

        let mut pool = pools
            .get_pool(&swap.pool_id)
            .ok_or_else(|| NodeError::PoolState(format!("pool desconhecido: {}", swap.pool_id)))?;
        if !pool.contains(&swap.token_in) {
            return Err(NodeError::PoolState(format!(
                "token {} não participa do pool",
                swap.token_in
            )));
        }
        if swap.amount_in == 0 {
            return Err(NodeError::PoolState("entrada de swap nula".to_string()));
        }

        let a_to_b = pool.token_a == swap.token_in;
        let (reserve_in, reserve_out) = if a_to_b {
            (pool.reserve_a, pool.reserve_b)
        } else {
            (pool.reserve_b, pool.reserve_a)
        };

        let amount_out = pool::swap_output(swap.amount_in, reserve_in, reserve_out, pool.fee_percent)?;
        if amount_out < swap.min_amount_out {
            return Err(NodeError::PoolState(format!(
                "slippage: saída {amount_out} abaixo do mínimo {}",
                swap.min_amount_out
            )));
        }

        let sums = self.spend_inputs(tx, batch)?;
        let changes = self.settle_deposits(
            &sums,
            &[(swap.token_in.clone(), swap.amount_in)],
            tx.minimum_fee(),
        )?;

        // A entrada inteira (taxa inclusa) engorda a reserva: k nunca cai
        let token_out = if a_to_b {
            pool.reserve_a = pool
                .reserve_a
                .checked_add(swap.amount_in)
                .ok_or_else(|| NodeError::PoolState("overflow na reserva".to_string()))?;
            pool.reserve_b -= amount_out;
            pool.token_b.clone()
        } else {
            pool.reserve_b = pool
                .reserve_b
                .checked_add(swap.amount_in)
                .ok_or_else(|| NodeError::PoolState("overflow na reserva".to_string()))?;
            pool.reserve_a -= amount_out;
            pool.token_a.clone()
        };
        pool.k = u128::from(pool.reserve_a) * u128::from(pool.reserve_b);
        pools.update_staged(pool, &mut batch.writes)?;

        let mut outputs = Vec::new();
        if token_out == genesis_token_id() {
            outputs.push(TxOutput::native(amount_out, signer));
        } else {
            outputs.push(TxOutput::token(
                amount_out,
                signer,
                token_out,
                TOKEN_TYPE_CUSTOM,
                0,
            ));
        }
        outputs.extend(self.change_outputs(signer, changes));
        self.emit_outputs(tx, outputs, height, batch)
    }

    fn apply_register_validator(
        &self,
        tx: &Transaction,
        batch: &mut LedgerBatch,
    ) -> Result<Vec<TxOutput>> {
        let (proposer, wallet) = payload::parse_register_validator(&tx.data)?;
        batch
            .writes
            .set(validator_key(&proposer), wallet.to_hex());
        Ok(Vec::new())
    }
}

/// Quinhão proporcional: `total · part / whole` em 128 bits
fn proportional(total: u64, part: u64, whole: u64) -> u64 {
    if whole == 0 {
        return 0;
    }
    u64::try_from(u128::from(total) * u128::from(part) / u128::from(whole)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use shared::{KeyPair, GENESIS_TIMESTAMP};

    struct Harness {
        store: UtxoStore,
        tokens: TokenRegistry,
        pools: PoolRegistry,
        keypair: KeyPair,
        address: Address,
        height: u64,
    }

    impl Harness {
        fn new() -> Self {
            let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
            let keypair = KeyPair::generate();
            Self {
                store: UtxoStore::new(Arc::clone(&kv)),
                tokens: TokenRegistry::open(Arc::clone(&kv)).unwrap(),
                pools: PoolRegistry::open(kv).unwrap(),
                address: Address::from_public_key(&keypair.public_key),
                keypair,
                height: 0,
            }
        }

        /// Credita moeda nativa via coinbase e devolve a transação
        fn fund(&mut self, amount: u64) -> Transaction {
            let coinbase =
                Transaction::coinbase(self.height, amount, self.address, GENESIS_TIMESTAMP);
            self.apply(&coinbase).unwrap();
            coinbase
        }

        fn apply(&mut self, tx: &Transaction) -> Result<()> {
            let mut batch = LedgerBatch::new();
            self.store
                .apply_transaction(tx, self.height, &self.tokens, &self.pools, &mut batch)?;
            self.store.commit(batch)?;
            self.height += 1;
            Ok(())
        }

        fn signed(
            &self,
            tx_type: TxType,
            inputs: Vec<crate::transaction::TxInput>,
            outputs: Vec<TxOutput>,
            data: Vec<u8>,
        ) -> Transaction {
            let mut tx = Transaction::new(
                tx_type,
                GENESIS_TIMESTAMP + self.height,
                inputs,
                outputs,
                data,
            );
            tx.sign(&self.keypair).unwrap();
            tx
        }

        fn balance(&self, token: &str) -> u64 {
            self.store
                .get_balance(&self.address)
                .unwrap()
                .get(token)
                .copied()
                .unwrap_or(0)
        }

        fn native_balance(&self) -> u64 {
            self.balance(genesis_token_id())
        }

        /// Única UTXO não gasta de um token, para encadear transações
        fn utxo_of(&self, token: &str) -> Utxo {
            self.store
                .get_utxos_by_address(&self.address)
                .unwrap()
                .into_iter()
                .find(|u| u.output.token_id == token)
                .expect("utxo do token")
        }
    }

    use crate::transaction::TxInput;

    #[test]
    fn test_coinbase_creates_spendable_utxo() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        let utxo = h.store.get_utxo(&coinbase.id, 0).unwrap().unwrap();
        assert!(!utxo.is_spent);
        assert_eq!(utxo.output.amount, 5_000_000_000);
        assert_eq!(h.native_balance(), 5_000_000_000);
    }

    #[test]
    fn test_send_with_change() {
        let mut h = Harness::new();
        let coinbase = h.fund(10_000_000_000);

        let dest_key = KeyPair::generate();
        let dest = Address::from_public_key(&dest_key.public_key);

        let amount = 3_000_000_000;
        let fee = crate::fee::calculate_fee(TxType::Send, 1, 2, 0);
        let change = 10_000_000_000 - amount - fee;

        let tx = h.signed(
            TxType::Send,
            vec![TxInput::new(coinbase.id, 0)],
            vec![
                TxOutput::native(amount, dest),
                TxOutput::native(change, h.address),
            ],
            Vec::new(),
        );
        h.apply(&tx).unwrap();

        // Remetente fica só com o troco, destinatário com o valor
        assert_eq!(h.native_balance(), change);
        let dest_balance = h.store.get_balance(&dest).unwrap();
        assert_eq!(dest_balance[genesis_token_id()], amount);

        // A UTXO original está gasta
        let spent = h.store.get_utxo(&coinbase.id, 0).unwrap().unwrap();
        assert!(spent.is_spent);
    }

    #[test]
    fn test_double_spend_rejected() {
        let mut h = Harness::new();
        let coinbase = h.fund(10_000_000_000);

        let tx1 = h.signed(
            TxType::Send,
            vec![TxInput::new(coinbase.id, 0)],
            vec![TxOutput::native(1_000_000, h.address)],
            Vec::new(),
        );
        h.apply(&tx1).unwrap();

        let tx2 = h.signed(
            TxType::Send,
            vec![TxInput::new(coinbase.id, 0)],
            vec![TxOutput::native(2_000_000, h.address)],
            b"retry".to_vec(),
        );
        let result = h.apply(&tx2);
        assert!(matches!(result, Err(NodeError::AlreadySpent(_))));
    }

    #[test]
    fn test_send_cannot_destroy_token_inputs() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        let mint = h.signed(
            TxType::MintToken,
            vec![TxInput::new(coinbase.id, 0)],
            Vec::new(),
            payload::encode(&TokenMintData {
                ticker: "BURN".to_string(),
                desc: String::new(),
                max_mint: 10,
                max_decimals: 0,
            })
            .unwrap(),
        );
        h.apply(&mint).unwrap();
        let token_id = mint.id.to_hex();

        // Gasta a UTXO do token sem emitir saída para ele: o token (e
        // seu colateral) sumiria fora do caminho de melt
        let token_utxo = h.utxo_of(&token_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let burn = h.signed(
            TxType::Send,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            vec![TxOutput::native(1_000, h.address)],
            Vec::new(),
        );
        assert!(matches!(h.apply(&burn), Err(NodeError::Validation(_))));

        // Nada foi gasto: o token continua no saldo
        assert_eq!(h.balance(&token_id), 10);
    }

    #[test]
    fn test_send_requires_ownership() {
        let mut h = Harness::new();
        let coinbase = h.fund(10_000_000_000);

        // Outro assinante tenta gastar a UTXO do harness
        let thief = KeyPair::generate();
        let mut tx = Transaction::new(
            TxType::Send,
            GENESIS_TIMESTAMP,
            vec![TxInput::new(coinbase.id, 0)],
            vec![TxOutput::native(1, Address::from_public_key(&thief.public_key))],
            Vec::new(),
        );
        tx.sign(&thief).unwrap();

        let result = h.apply(&tx);
        assert!(matches!(result, Err(NodeError::Validation(_))));
    }

    #[test]
    fn test_mint_and_melt_roundtrip() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);
        let native_before = h.native_balance();

        // Emite TEST: 1000 unidades com 2 decimais -> oferta 100000
        let mint_data = payload::encode(&TokenMintData {
            ticker: "TEST".to_string(),
            desc: "token de teste".to_string(),
            max_mint: 1000,
            max_decimals: 2,
        })
        .unwrap();
        let mint = h.signed(
            TxType::MintToken,
            vec![TxInput::new(coinbase.id, 0)],
            Vec::new(),
            mint_data,
        );
        let mint_fee = mint.minimum_fee();
        h.apply(&mint).unwrap();

        let token_id = mint.id.to_hex();
        assert_eq!(h.balance(&token_id), 100_000);
        assert_eq!(h.native_balance(), native_before - 100_000 - mint_fee);

        let info = h.tokens.get_by_id(&token_id).unwrap();
        assert_eq!(info.total_supply, 100_000);
        assert_eq!(info.locked_shadow, 100_000);
        assert!(!h.tokens.check_ticker_available("TEST"));

        // Derrete 40000 TEST: devolve 40000 de colateral
        let token_utxo = h.utxo_of(&token_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let melt_data = payload::encode(&MeltData {
            token_id: token_id.clone(),
            melt_amount: 40_000,
        })
        .unwrap();
        let melt = h.signed(
            TxType::Melt,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            melt_data,
        );
        let melt_fee = melt.minimum_fee();
        let native_before_melt = h.native_balance();
        h.apply(&melt).unwrap();

        assert_eq!(h.balance(&token_id), 60_000);
        assert_eq!(h.native_balance(), native_before_melt + 40_000 - melt_fee);

        let info = h.tokens.get_by_id(&token_id).unwrap();
        assert_eq!(info.total_melted, 40_000);
        assert_eq!(info.locked_shadow, 60_000);

        // Derreter mais do que há nas entradas falha
        let token_utxo = h.utxo_of(&token_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let too_much = h.signed(
            TxType::Melt,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&MeltData {
                token_id: token_id.clone(),
                melt_amount: 60_001,
            })
            .unwrap(),
        );
        assert!(matches!(
            h.apply(&too_much),
            Err(NodeError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_mint_rejects_duplicate_ticker() {
        let mut h = Harness::new();
        let c1 = h.fund(5_000_000_000);
        let c2 = h.fund(5_000_000_000);

        let data = payload::encode(&TokenMintData {
            ticker: "TEST".to_string(),
            desc: String::new(),
            max_mint: 10,
            max_decimals: 0,
        })
        .unwrap();

        let first = h.signed(TxType::MintToken, vec![TxInput::new(c1.id, 0)], Vec::new(), data.clone());
        h.apply(&first).unwrap();

        let second = h.signed(TxType::MintToken, vec![TxInput::new(c2.id, 0)], Vec::new(), data);
        assert!(matches!(h.apply(&second), Err(NodeError::Validation(_))));
    }

    #[test]
    fn test_pool_create_and_swap_seeded_scenario() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        // Emite TEST e cria o pool TEST/nativo com 1000/1000, taxa 30 bp
        let mint = h.signed(
            TxType::MintToken,
            vec![TxInput::new(coinbase.id, 0)],
            Vec::new(),
            payload::encode(&TokenMintData {
                ticker: "TEST".to_string(),
                desc: String::new(),
                max_mint: 100_000,
                max_decimals: 0,
            })
            .unwrap(),
        );
        h.apply(&mint).unwrap();
        let test_id = mint.id.to_hex();

        let token_utxo = h.utxo_of(&test_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let create = h.signed(
            TxType::CreatePool,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&CreatePoolData {
                token_a: test_id.clone(),
                token_b: genesis_token_id().to_string(),
                amount_a: 1000,
                amount_b: 1000,
                fee_percent: 30,
            })
            .unwrap(),
        );
        h.apply(&create).unwrap();

        let pool_id = create.id.to_hex();
        let pool = h.pools.get_pool(&pool_id).unwrap();
        assert_eq!(pool.reserve_a, 1000);
        assert_eq!(pool.reserve_b, 1000);
        assert_eq!(pool.lp_token_supply, 1000); // isqrt(1_000_000)
        assert_eq!(pool.k, 1_000_000);
        assert_eq!(h.balance(&pool.lp_token_id), 1000);

        let lp_info = h.tokens.get_by_id(&pool.lp_token_id).unwrap();
        assert!(lp_info.ticker.starts_with("TESTSHADOWLP"));
        assert_eq!(lp_info.total_supply, 1000);

        // Swap de 100 nativos: saída 90 TEST, k cresce
        let native_utxo = h.utxo_of(genesis_token_id());
        let swap = h.signed(
            TxType::Swap,
            vec![TxInput::new(native_utxo.tx_id, native_utxo.output_index)],
            Vec::new(),
            payload::encode(&SwapData {
                pool_id: pool_id.clone(),
                token_in: genesis_token_id().to_string(),
                amount_in: 100,
                min_amount_out: 90,
            })
            .unwrap(),
        );
        let test_before = h.balance(&test_id);
        h.apply(&swap).unwrap();

        assert_eq!(h.balance(&test_id), test_before + 90);
        let pool = h.pools.get_pool(&pool_id).unwrap();
        assert_eq!(pool.reserve_b, 1100); // lado nativo
        assert_eq!(pool.reserve_a, 910); // lado TEST
        assert_eq!(pool.k, 1100 * 910);
        assert!(pool.k > 1_000_000);

        // Slippage além do mínimo falha
        let native_utxo = h.utxo_of(genesis_token_id());
        let greedy = h.signed(
            TxType::Swap,
            vec![TxInput::new(native_utxo.tx_id, native_utxo.output_index)],
            Vec::new(),
            payload::encode(&SwapData {
                pool_id: pool_id.clone(),
                token_in: genesis_token_id().to_string(),
                amount_in: 100,
                min_amount_out: 1_000,
            })
            .unwrap(),
        );
        assert!(matches!(h.apply(&greedy), Err(NodeError::PoolState(_))));

        // Segundo pool para o mesmo par é rejeitado
        let token_utxo = h.utxo_of(&test_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let duplicate = h.signed(
            TxType::CreatePool,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&CreatePoolData {
                token_a: genesis_token_id().to_string(),
                token_b: test_id.clone(),
                amount_a: 10,
                amount_b: 10,
                fee_percent: 30,
            })
            .unwrap(),
        );
        assert!(matches!(h.apply(&duplicate), Err(NodeError::PoolState(_))));
    }

    #[test]
    fn test_add_and_remove_liquidity() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        let mint = h.signed(
            TxType::MintToken,
            vec![TxInput::new(coinbase.id, 0)],
            Vec::new(),
            payload::encode(&TokenMintData {
                ticker: "POOLY".to_string(),
                desc: String::new(),
                max_mint: 1_000_000,
                max_decimals: 0,
            })
            .unwrap(),
        );
        h.apply(&mint).unwrap();
        let token_id = mint.id.to_hex();

        let token_utxo = h.utxo_of(&token_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let create = h.signed(
            TxType::CreatePool,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&CreatePoolData {
                token_a: token_id.clone(),
                token_b: genesis_token_id().to_string(),
                amount_a: 10_000,
                amount_b: 10_000,
                fee_percent: 30,
            })
            .unwrap(),
        );
        h.apply(&create).unwrap();
        let pool_id = create.id.to_hex();

        // Depósito proporcional: +1000/+1000 cunha 1000 LP
        let token_utxo = h.utxo_of(&token_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let add = h.signed(
            TxType::AddLiquidity,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&payload::AddLiquidityData {
                pool_id: pool_id.clone(),
                amount_a: 1000,
                amount_b: 1000,
                min_lp_tokens: 1000,
            })
            .unwrap(),
        );
        h.apply(&add).unwrap();

        let pool = h.pools.get_pool(&pool_id).unwrap();
        assert_eq!(pool.reserve_a, 11_000);
        assert_eq!(pool.reserve_b, 11_000);
        assert_eq!(pool.lp_token_supply, 11_000);
        assert_eq!(pool.k, 11_000 * 11_000);
        assert_eq!(h.balance(&pool.lp_token_id), 11_000);

        // Depósito fora da razão é rejeitado
        let token_utxo = h.utxo_of(&token_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let skewed = h.signed(
            TxType::AddLiquidity,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&payload::AddLiquidityData {
                pool_id: pool_id.clone(),
                amount_a: 1000,
                amount_b: 500,
                min_lp_tokens: 0,
            })
            .unwrap(),
        );
        assert!(matches!(h.apply(&skewed), Err(NodeError::PoolState(_))));

        // Retira 1000 LP: volta 1000 de cada lado
        let lp_token_id = h.pools.get_pool(&pool_id).unwrap().lp_token_id;
        let lp_utxo = h.utxo_of(&lp_token_id);
        let native_utxo = h.utxo_of(genesis_token_id());
        let remove = h.signed(
            TxType::RemoveLiquidity,
            vec![
                TxInput::new(lp_utxo.tx_id, lp_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&payload::RemoveLiquidityData {
                pool_id: pool_id.clone(),
                lp_amount: 1000,
                min_a: 1000,
                min_b: 1000,
            })
            .unwrap(),
        );
        h.apply(&remove).unwrap();

        let pool = h.pools.get_pool(&pool_id).unwrap();
        assert_eq!(pool.reserve_a, 10_000);
        assert_eq!(pool.reserve_b, 10_000);
        assert_eq!(pool.lp_token_supply, 10_000);
        assert_eq!(h.balance(&pool.lp_token_id), 10_000);
        assert_eq!(
            h.tokens.get_by_id(&pool.lp_token_id).unwrap().total_supply,
            10_000
        );
    }

    #[test]
    fn test_offer_accept_and_consumption() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        // Tokens TOKX (do ofertante) e a parte nativa do aceitante
        let mint = h.signed(
            TxType::MintToken,
            vec![TxInput::new(coinbase.id, 0)],
            Vec::new(),
            payload::encode(&TokenMintData {
                ticker: "TOKX".to_string(),
                desc: String::new(),
                max_mint: 10_000,
                max_decimals: 0,
            })
            .unwrap(),
        );
        h.apply(&mint).unwrap();
        let tokx = mint.id.to_hex();

        // Oferta: 50 TOKX por 75 nativos, expira na altura atual + 100
        let token_utxo = h.utxo_of(&tokx);
        let native_utxo = h.utxo_of(genesis_token_id());
        let offer = h.signed(
            TxType::Offer,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&OfferData {
                have_token_id: tokx.clone(),
                want_token_id: genesis_token_id().to_string(),
                have_amount: 50,
                want_amount: 75,
                expires_at_block: h.height + 100,
                offer_address: h.address,
            })
            .unwrap(),
        );
        let tokx_before = h.balance(&tokx);
        h.apply(&offer).unwrap();

        // Os 50 TOKX ficaram presos (sem saída correspondente)
        assert_eq!(h.balance(&tokx), tokx_before - 50);
        assert!(!h.store.is_offer_consumed(&offer.id).unwrap());

        // O aceitante entrega 75 nativos e leva os 50 TOKX
        let acceptor_key = KeyPair::generate();
        let acceptor = Address::from_public_key(&acceptor_key.public_key);
        let acceptor_coinbase =
            Transaction::coinbase(h.height, 1_000_000, acceptor, GENESIS_TIMESTAMP);
        h.apply(&acceptor_coinbase).unwrap();

        let mut accept = Transaction::new(
            TxType::AcceptOffer,
            GENESIS_TIMESTAMP + h.height,
            vec![TxInput::new(acceptor_coinbase.id, 0)],
            Vec::new(),
            payload::encode(&AcceptOfferData {
                offer_tx_id: offer.id,
            })
            .unwrap(),
        );
        accept.sign(&acceptor_key).unwrap();
        let offerer_native_before = h.native_balance();
        h.apply(&accept).unwrap();

        assert!(h.store.is_offer_consumed(&offer.id).unwrap());
        let acceptor_balances = h.store.get_balance(&acceptor).unwrap();
        assert_eq!(acceptor_balances[&tokx], 50);
        assert_eq!(h.native_balance(), offerer_native_before + 75);

        // Segundo aceite da mesma oferta falha como consumida
        let leftover = h
            .store
            .get_utxos_by_address(&acceptor)
            .unwrap()
            .into_iter()
            .find(|u| u.output.is_native())
            .unwrap();
        let mut again = Transaction::new(
            TxType::AcceptOffer,
            GENESIS_TIMESTAMP + h.height,
            vec![TxInput::new(leftover.tx_id, leftover.output_index)],
            Vec::new(),
            payload::encode(&AcceptOfferData {
                offer_tx_id: offer.id,
            })
            .unwrap(),
        );
        again.sign(&acceptor_key).unwrap();
        assert!(matches!(
            h.apply(&again),
            Err(NodeError::OfferState(OfferFault::Consumed))
        ));
    }

    #[test]
    fn test_offer_cancel_rules() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        let mint = h.signed(
            TxType::MintToken,
            vec![TxInput::new(coinbase.id, 0)],
            Vec::new(),
            payload::encode(&TokenMintData {
                ticker: "TOKY".to_string(),
                desc: String::new(),
                max_mint: 10_000,
                max_decimals: 0,
            })
            .unwrap(),
        );
        h.apply(&mint).unwrap();
        let toky = mint.id.to_hex();

        let token_utxo = h.utxo_of(&toky);
        let native_utxo = h.utxo_of(genesis_token_id());
        let offer = h.signed(
            TxType::Offer,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&OfferData {
                have_token_id: toky.clone(),
                want_token_id: genesis_token_id().to_string(),
                have_amount: 50,
                want_amount: 75,
                expires_at_block: h.height + 100,
                offer_address: h.address,
            })
            .unwrap(),
        );
        h.apply(&offer).unwrap();

        // Outro assinante não pode cancelar
        let stranger_key = KeyPair::generate();
        let stranger = Address::from_public_key(&stranger_key.public_key);
        let stranger_coinbase =
            Transaction::coinbase(h.height, 1_000_000, stranger, GENESIS_TIMESTAMP);
        h.apply(&stranger_coinbase).unwrap();

        let mut foreign_cancel = Transaction::new(
            TxType::CancelOffer,
            GENESIS_TIMESTAMP,
            vec![TxInput::new(stranger_coinbase.id, 0)],
            Vec::new(),
            payload::encode(&CancelOfferData {
                offer_tx_id: offer.id,
            })
            .unwrap(),
        );
        foreign_cancel.sign(&stranger_key).unwrap();
        assert!(matches!(
            h.apply(&foreign_cancel),
            Err(NodeError::OfferState(OfferFault::NotOwner))
        ));

        // O criador cancela e recupera os tokens presos
        let toky_before = h.balance(&toky);
        let native_utxo = h.utxo_of(genesis_token_id());
        let cancel = h.signed(
            TxType::CancelOffer,
            vec![TxInput::new(native_utxo.tx_id, native_utxo.output_index)],
            Vec::new(),
            payload::encode(&CancelOfferData {
                offer_tx_id: offer.id,
            })
            .unwrap(),
        );
        h.apply(&cancel).unwrap();
        assert_eq!(h.balance(&toky), toky_before + 50);

        // Cancelar de novo falha como consumida
        let native_utxo = h.utxo_of(genesis_token_id());
        let again = h.signed(
            TxType::CancelOffer,
            vec![TxInput::new(native_utxo.tx_id, native_utxo.output_index)],
            Vec::new(),
            payload::encode(&CancelOfferData {
                offer_tx_id: offer.id,
            })
            .unwrap(),
        );
        assert!(matches!(
            h.apply(&again),
            Err(NodeError::OfferState(OfferFault::Consumed))
        ));
    }

    #[test]
    fn test_expired_offer_cannot_be_accepted_or_cancelled() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        let mint = h.signed(
            TxType::MintToken,
            vec![TxInput::new(coinbase.id, 0)],
            Vec::new(),
            payload::encode(&TokenMintData {
                ticker: "TOKZ".to_string(),
                desc: String::new(),
                max_mint: 10_000,
                max_decimals: 0,
            })
            .unwrap(),
        );
        h.apply(&mint).unwrap();
        let tokz = mint.id.to_hex();

        let token_utxo = h.utxo_of(&tokz);
        let native_utxo = h.utxo_of(genesis_token_id());
        let expires_at = h.height + 2;
        let offer = h.signed(
            TxType::Offer,
            vec![
                TxInput::new(token_utxo.tx_id, token_utxo.output_index),
                TxInput::new(native_utxo.tx_id, native_utxo.output_index),
            ],
            Vec::new(),
            payload::encode(&OfferData {
                have_token_id: tokz,
                want_token_id: genesis_token_id().to_string(),
                have_amount: 50,
                want_amount: 75,
                expires_at_block: expires_at,
                offer_address: h.address,
            })
            .unwrap(),
        );
        h.apply(&offer).unwrap();

        // Avança a altura além da expiração
        while h.height < expires_at {
            h.fund(1_000_000);
        }

        let native_utxo = h.utxo_of(genesis_token_id());
        let cancel = h.signed(
            TxType::CancelOffer,
            vec![TxInput::new(native_utxo.tx_id, native_utxo.output_index)],
            Vec::new(),
            payload::encode(&CancelOfferData {
                offer_tx_id: offer.id,
            })
            .unwrap(),
        );
        assert!(matches!(
            h.apply(&cancel),
            Err(NodeError::OfferState(OfferFault::Expired))
        ));
    }

    #[test]
    fn test_register_validator_mapping() {
        let mut h = Harness::new();
        let proposer = [3u8; 20];
        let data = payload::encode_register_validator(&proposer, &h.address).unwrap();

        let tx = h.signed(TxType::RegisterValidator, Vec::new(), Vec::new(), data);
        h.apply(&tx).unwrap();

        let wallet = h.store.get_validator_wallet(&proposer).unwrap();
        assert_eq!(wallet, Some(h.address));
        assert_eq!(h.store.get_validator_wallet(&[9u8; 20]).unwrap(), None);
    }

    #[test]
    fn test_failed_block_batch_leaves_no_trace() {
        let mut h = Harness::new();
        let coinbase = h.fund(5_000_000_000);

        // Uma transação que falha no meio (fundos insuficientes) não
        // deixa escritas nem sujeira no overlay
        let tx = h.signed(
            TxType::Send,
            vec![TxInput::new(coinbase.id, 0)],
            vec![TxOutput::native(6_000_000_000, h.address)],
            Vec::new(),
        );
        let mut batch = LedgerBatch::new();
        let result = h
            .store
            .apply_transaction(&tx, h.height, &h.tokens, &h.pools, &mut batch);
        assert!(matches!(result, Err(NodeError::InsufficientFunds { .. })));
        drop(batch);

        // A UTXO original continua gastável
        let utxo = h.store.get_utxo(&coinbase.id, 0).unwrap().unwrap();
        assert!(!utxo.is_spent);
        assert_eq!(h.native_balance(), 5_000_000_000);
    }

    #[test]
    fn test_transactions_by_address_pagination() {
        let mut h = Harness::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(h.fund(1_000_000).id);
        }

        // Mais novas primeiro
        let page = h
            .store
            .get_transactions_by_address(&h.address, 3, None)
            .unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].id, ids[4]);
        assert_eq!(page[2].id, ids[2]);

        // Cursor continua de onde parou
        let rest = h
            .store
            .get_transactions_by_address(&h.address, 10, Some(&ids[2]))
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].id, ids[1]);
        assert_eq!(rest[1].id, ids[0]);
    }
}
