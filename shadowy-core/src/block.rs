//! Blocos da cadeia
//!
//! O hash canônico cobre índice, timestamp declarado pelo proposer,
//! lista de ids de transações, hash anterior e proposer. Votos, corpo
//! do coinbase, prova vencedora e corpos de transação ficam fora do
//! hash; corpos viajam junto ao bloco para que um peer em sincronização
//! consiga reaplicar o histórico.

use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use shared::{hexbytes, Address, Hash256, NodeError, Result, GENESIS_TIMESTAMP};
use std::collections::BTreeSet;

/// Hash anterior do bloco gênese
pub const GENESIS_PREV_HASH: &str = "0";

/// Identificador do proposer do gênese
pub const GENESIS_PROPOSER: &str = "genesis";

/// Prova de espaço vencedora de um bloco
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfSpace {
    /// Desafio: bytes do hash do bloco anterior
    #[serde(with = "hexbytes")]
    pub challenge_hash: Vec<u8>,
    /// Hash da célula do plot (ASCII-85, opaco para o nó)
    pub plot_hash: String,
    /// Chave pública do plot (ASCII-85)
    pub plot_public_key: String,
    /// Assinatura do plot sobre a solução (ASCII-85)
    pub plot_signature: String,
    /// Distância de Hamming entre desafio e solução (menor é melhor)
    pub distance: u64,
    /// Chave do minerador que referenda a prova
    #[serde(with = "hexbytes")]
    pub miner_public_key: Vec<u8>,
    /// Assinatura do minerador sobre
    /// SHA-256("{challenge_a85}/{plot_pk_a85}/{distance}")
    #[serde(with = "hexbytes")]
    pub miner_signature: Vec<u8>,
}

/// Prova submetida ao tópico de provas para uma altura alvo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSubmission {
    pub block_height: u64,
    pub proof: ProofOfSpace,
    pub reward_address: Address,
    pub submitter_id: String,
}

/// Bloco da cadeia
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Altura, estritamente crescente a partir de 0
    pub index: u64,
    /// Segundos desde a época, declarados pelo proposer e cobertos
    /// pelo hash
    pub timestamp: u64,
    /// Hash hexadecimal do bloco anterior ("0" no gênese)
    pub prev_hash: String,
    /// Ids das transações; o índice 0 é o coinbase
    pub transactions: Vec<Hash256>,
    /// Transação coinbase embutida
    pub coinbase: Transaction,
    /// Identificador do peer proposer
    pub proposer: String,
    /// Prova de espaço vencedora (ausente só no gênese)
    pub winning_proof: Option<ProofOfSpace>,
    /// Endereço premiado
    pub winner_address: Option<Address>,
    /// Votantes que aprovaram o bloco
    pub votes: BTreeSet<String>,
    /// Hash canônico do cabeçalho
    pub hash: String,
    /// Corpos das transações não-coinbase, fora do hash
    #[serde(default)]
    pub tx_bodies: Vec<Transaction>,
}

impl Block {
    /// Cria o bloco gênese com timestamp fixo e lista de transações
    /// vazia
    #[must_use]
    pub fn genesis() -> Self {
        let coinbase = Transaction::coinbase(0, 0, Address::zero(), GENESIS_TIMESTAMP);
        let mut block = Self {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            prev_hash: GENESIS_PREV_HASH.to_string(),
            transactions: Vec::new(),
            coinbase,
            proposer: GENESIS_PROPOSER.to_string(),
            winning_proof: None,
            winner_address: None,
            votes: BTreeSet::new(),
            hash: String::new(),
            tx_bodies: Vec::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Hash canônico:
    /// `SHA-256(decimal(index) ‖ decimal(timestamp) ‖ "[id …]" ‖ prev_hash ‖ proposer)`
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let ids: Vec<String> = self.transactions.iter().map(Hash256::to_hex).collect();
        let preimage = format!(
            "{}{}[{}]{}{}",
            self.index,
            self.timestamp,
            ids.join(" "),
            self.prev_hash,
            self.proposer
        );
        Hash256::sha256(preimage.as_bytes()).to_hex()
    }

    /// Bytes do hash deste bloco, usados como desafio da próxima altura
    ///
    /// # Errors
    ///
    /// Retorna `Corruption` se o hash gravado não for hexadecimal
    pub fn challenge_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.hash)
            .map_err(|_| NodeError::Corruption(format!("hash de bloco inválido: {}", self.hash)))
    }

    /// Registra um voto; votar duas vezes é rejeitado
    ///
    /// # Errors
    ///
    /// Retorna `DuplicateVote` se o votante já estiver registrado
    pub fn add_vote(&mut self, voter: &str) -> Result<()> {
        if !self.votes.insert(voter.to_string()) {
            return Err(NodeError::DuplicateVote(voter.to_string()));
        }
        Ok(())
    }
}
