//! Mempool: transações assinadas aguardando inclusão
//!
//! Admissão com deduplicação, rejeição de conflito de outpoint, limite
//! de tamanho por transação e orçamento total de bytes com despejo das
//! entradas mais antigas. Entradas expiram por idade em blocos. O
//! anúncio gossip acontece fora da trava, via callback instalado pelo
//! nó.

use crate::transaction::Transaction;
use crate::utxo_store::UtxoStore;
use shared::{Hash256, NodeError, OutPoint, Result, MAX_TRANSACTION_SIZE, MEMPOOL_EXPIRY_BLOCKS,
    MEMPOOL_MAX_BYTES};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, info};

/// Callback de anúncio de transação aceita localmente
pub type TxAnnouncer = Box<dyn Fn(&Transaction) + Send + Sync>;

/// Entrada do mempool
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub added_at_block: u64,
    pub added_at_time: u64,
    pub size_bytes: usize,
}

/// Configuração do mempool
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Idade máxima em blocos antes do despejo
    pub expiry_blocks: u64,
    /// Orçamento total de bytes
    pub max_size_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            expiry_blocks: MEMPOOL_EXPIRY_BLOCKS,
            max_size_bytes: MEMPOOL_MAX_BYTES,
        }
    }
}

struct MempoolInner {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Outpoints reservados por entradas pendentes
    spent_outpoints: HashSet<OutPoint>,
    total_bytes: usize,
    clock: u64,
}

/// Mempool com trava única e anúncio fora da trava
pub struct Mempool {
    config: MempoolConfig,
    inner: RwLock<MempoolInner>,
    announcer: RwLock<Option<TxAnnouncer>>,
}

impl Mempool {
    #[must_use]
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(MempoolInner {
                entries: HashMap::new(),
                spent_outpoints: HashSet::new(),
                total_bytes: 0,
                clock: 0,
            }),
            announcer: RwLock::new(None),
        }
    }

    /// Instala o callback de anúncio gossip
    pub fn set_announcer(&self, announcer: TxAnnouncer) {
        *self.announcer.write().expect("mempool lock") = Some(announcer);
    }

    /// Admissão local: valida, insere e anuncia no tópico do mempool
    ///
    /// # Errors
    ///
    /// `Validation` para duplicatas e excesso de tamanho, `DoubleSpend`
    /// para conflito de outpoint, `InvalidSignature` para assinatura
    /// inválida
    pub fn add(&self, tx: Transaction, current_height: u64) -> Result<Hash256> {
        let id = self.admit(tx.clone(), current_height)?;

        if let Some(announcer) = self.announcer.read().expect("mempool lock").as_ref() {
            announcer(&tx);
        }
        Ok(id)
    }

    /// Admissão vinda do gossip: mesmo caminho, sem reanúncio;
    /// duplicatas são ignoradas em silêncio
    ///
    /// # Errors
    ///
    /// Propaga as demais falhas de admissão
    pub fn add_from_gossip(&self, tx: Transaction, current_height: u64) -> Result<bool> {
        match self.admit(tx, current_height) {
            Ok(_) => Ok(true),
            Err(NodeError::Validation(msg)) if msg == "transação já presente" => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn admit(&self, tx: Transaction, current_height: u64) -> Result<Hash256> {
        let id = tx.id;
        let size = tx.size();

        if size > MAX_TRANSACTION_SIZE {
            return Err(NodeError::Validation(format!(
                "transação excede {MAX_TRANSACTION_SIZE} bytes: {size}"
            )));
        }

        {
            let inner = self.inner.read().expect("mempool lock");
            if inner.entries.contains_key(&id) {
                return Err(NodeError::Validation("transação já presente".to_string()));
            }
            for input in &tx.inputs {
                if inner.spent_outpoints.contains(&input.outpoint()) {
                    return Err(NodeError::DoubleSpend(format!(
                        "outpoint {}:{} já reservado no mempool",
                        input.prev_tx_id, input.output_index
                    )));
                }
            }
        }

        // Validação estrutural e de assinatura fora da trava
        tx.validate()?;

        let mut inner = self.inner.write().expect("mempool lock");
        // Reverifica sob a trava de escrita
        if inner.entries.contains_key(&id) {
            return Err(NodeError::Validation("transação já presente".to_string()));
        }
        for input in &tx.inputs {
            if inner.spent_outpoints.contains(&input.outpoint()) {
                return Err(NodeError::DoubleSpend(format!(
                    "outpoint {}:{} já reservado no mempool",
                    input.prev_tx_id, input.output_index
                )));
            }
        }

        for input in &tx.inputs {
            inner.spent_outpoints.insert(input.outpoint());
        }
        inner.clock += 1;
        let added_at_time = inner.clock;
        inner.total_bytes += size;
        inner.entries.insert(
            id,
            MempoolEntry {
                tx,
                added_at_block: current_height,
                added_at_time,
                size_bytes: size,
            },
        );

        self.enforce_budget(&mut inner);
        debug!(tx = %id, bytes = size, "transação admitida no mempool");
        Ok(id)
    }

    /// Despeja as entradas mais antigas até caber no orçamento
    fn enforce_budget(&self, inner: &mut MempoolInner) {
        while inner.total_bytes > self.config.max_size_bytes {
            let Some(oldest) = inner
                .entries
                .values()
                .min_by_key(|e| e.added_at_time)
                .map(|e| e.tx.id)
            else {
                break;
            };
            Self::drop_entry(inner, &oldest);
            info!(tx = %oldest, "entrada despejada por orçamento");
        }
    }

    fn drop_entry(inner: &mut MempoolInner, id: &Hash256) {
        if let Some(entry) = inner.entries.remove(id) {
            inner.total_bytes -= entry.size_bytes;
            for input in &entry.tx.inputs {
                inner.spent_outpoints.remove(&input.outpoint());
            }
        }
    }

    /// Remove uma transação (incluída em bloco ou inválida)
    pub fn remove(&self, id: &Hash256) {
        let mut inner = self.inner.write().expect("mempool lock");
        Self::drop_entry(&mut inner, id);
    }

    /// Avanço de altura: despeja entradas mais velhas que o limite
    pub fn update_block_height(&self, height: u64) {
        let mut inner = self.inner.write().expect("mempool lock");
        let expired: Vec<Hash256> = inner
            .entries
            .values()
            .filter(|e| height.saturating_sub(e.added_at_block) >= self.config.expiry_blocks)
            .map(|e| e.tx.id)
            .collect();
        for id in expired {
            Self::drop_entry(&mut inner, &id);
            debug!(tx = %id, "entrada expirada por idade");
        }
    }

    /// Após um commit: despeja entradas cujas entradas já não estão
    /// não-gastas
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O das consultas ao conjunto UTXO
    pub fn purge_invalid(&self, utxo_store: &UtxoStore) -> Result<()> {
        let candidates: Vec<(Hash256, Vec<OutPoint>)> = {
            let inner = self.inner.read().expect("mempool lock");
            inner
                .entries
                .values()
                .map(|e| (e.tx.id, e.tx.inputs.iter().map(|i| i.outpoint()).collect()))
                .collect()
        };

        let mut invalid = Vec::new();
        for (id, outpoints) in candidates {
            for outpoint in outpoints {
                match utxo_store.get_utxo(&outpoint.txid, outpoint.vout)? {
                    Some(utxo) if !utxo.is_spent => {}
                    _ => {
                        invalid.push(id);
                        break;
                    }
                }
            }
        }

        if !invalid.is_empty() {
            let mut inner = self.inner.write().expect("mempool lock");
            for id in &invalid {
                Self::drop_entry(&mut inner, id);
            }
            info!(count = invalid.len(), "entradas inválidas descartadas");
        }
        Ok(())
    }

    /// Snapshot para montagem de bloco, em ordem de chegada
    #[must_use]
    pub fn get_transactions(&self) -> Vec<Transaction> {
        let inner = self.inner.read().expect("mempool lock");
        let mut entries: Vec<&MempoolEntry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.added_at_time);
        entries.iter().map(|e| e.tx.clone()).collect()
    }

    /// Indica presença de uma transação
    #[must_use]
    pub fn contains(&self, id: &Hash256) -> bool {
        self.inner
            .read()
            .expect("mempool lock")
            .entries
            .contains_key(id)
    }

    /// Número de entradas
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("mempool lock").entries.len()
    }

    /// Mempool vazio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total de bytes das entradas
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.inner.read().expect("mempool lock").total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput, TxType};
    use shared::{Address, KeyPair, GENESIS_TIMESTAMP};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn signed_tx(keypair: &KeyPair, seed: u8, amount: u64) -> Transaction {
        let mut tx = Transaction::new(
            TxType::Send,
            GENESIS_TIMESTAMP + u64::from(seed),
            vec![TxInput::new(Hash256::blake2b(&[seed]), 0)],
            vec![TxOutput::native(amount, Address::from_bytes([seed; 32]))],
            Vec::new(),
        );
        tx.sign(keypair).unwrap();
        tx
    }

    #[test]
    fn test_admission_and_dedup() {
        let mempool = Mempool::new(MempoolConfig::default());
        let keypair = KeyPair::generate();
        let tx = signed_tx(&keypair, 1, 100);

        let id = mempool.add(tx.clone(), 10).unwrap();
        assert_eq!(id, tx.id);
        assert!(mempool.contains(&id));
        assert_eq!(mempool.len(), 1);

        // Segunda admissão local é rejeitada, via gossip é silenciosa
        assert!(mempool.add(tx.clone(), 10).is_err());
        assert_eq!(mempool.add_from_gossip(tx, 10).unwrap(), false);
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_conflicting_outpoint_rejected() {
        let mempool = Mempool::new(MempoolConfig::default());
        let keypair = KeyPair::generate();

        let first = signed_tx(&keypair, 1, 100);
        mempool.add(first.clone(), 0).unwrap();

        // Mesmo outpoint, transação diferente
        let mut second = Transaction::new(
            TxType::Send,
            GENESIS_TIMESTAMP + 99,
            first.inputs.clone(),
            vec![TxOutput::native(42, Address::zero())],
            Vec::new(),
        );
        second.sign(&keypair).unwrap();

        let result = mempool.add(second.clone(), 0);
        assert!(matches!(result, Err(NodeError::DoubleSpend(_))));

        // Também via gossip: rejeitada sem anúncio
        assert!(matches!(
            mempool.add_from_gossip(second, 0),
            Err(NodeError::DoubleSpend(_))
        ));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let mempool = Mempool::new(MempoolConfig::default());
        let keypair = KeyPair::generate();
        let mut tx = signed_tx(&keypair, 1, 100);
        tx.outputs[0].amount = 999;

        assert!(mempool.add(tx, 0).is_err());
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_expiry_by_block_age() {
        let mempool = Mempool::new(MempoolConfig {
            expiry_blocks: 4,
            ..MempoolConfig::default()
        });
        let keypair = KeyPair::generate();

        mempool.add(signed_tx(&keypair, 1, 100), 10).unwrap();
        mempool.add(signed_tx(&keypair, 2, 200), 12).unwrap();

        mempool.update_block_height(14);
        assert_eq!(mempool.len(), 1);

        mempool.update_block_height(16);
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_byte_budget_evicts_oldest() {
        let keypair = KeyPair::generate();
        let sample = signed_tx(&keypair, 0, 1);
        // Orçamento para ~duas transações
        let mempool = Mempool::new(MempoolConfig {
            max_size_bytes: sample.size() * 2 + sample.size() / 2,
            ..MempoolConfig::default()
        });

        let first = signed_tx(&keypair, 1, 100);
        let first_id = first.id;
        mempool.add(first, 0).unwrap();
        mempool.add(signed_tx(&keypair, 2, 200), 0).unwrap();
        mempool.add(signed_tx(&keypair, 3, 300), 0).unwrap();

        assert_eq!(mempool.len(), 2);
        assert!(!mempool.contains(&first_id));
        assert!(mempool.size_bytes() <= sample.size() * 2 + sample.size() / 2);
    }

    #[test]
    fn test_announcer_fires_only_for_local_add() {
        let mempool = Mempool::new(MempoolConfig::default());
        let announced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&announced);
        mempool.set_announcer(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let keypair = KeyPair::generate();
        mempool.add(signed_tx(&keypair, 1, 100), 0).unwrap();
        assert_eq!(announced.load(Ordering::SeqCst), 1);

        mempool
            .add_from_gossip(signed_tx(&keypair, 2, 200), 0)
            .unwrap();
        assert_eq!(announced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_orders_by_arrival() {
        let mempool = Mempool::new(MempoolConfig::default());
        let keypair = KeyPair::generate();

        let a = signed_tx(&keypair, 1, 100);
        let b = signed_tx(&keypair, 2, 200);
        mempool.add(a.clone(), 0).unwrap();
        mempool.add(b.clone(), 0).unwrap();

        let snapshot = mempool.get_transactions();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, a.id);
        assert_eq!(snapshot[1].id, b.id);

        mempool.remove(&a.id);
        assert_eq!(mempool.len(), 1);
        // Outpoint liberado após a remoção
        let mut retry = Transaction::new(
            TxType::Send,
            GENESIS_TIMESTAMP + 50,
            a.inputs,
            vec![TxOutput::native(1, Address::zero())],
            Vec::new(),
        );
        retry.sign(&keypair).unwrap();
        mempool.add(retry, 0).unwrap();
    }
}
