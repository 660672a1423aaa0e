//! Modelo de transação tipada
//!
//! Toda transação tem um hash canônico (BLAKE2b-256 da serialização com
//! chave pública e assinatura limpas) assinado com ML-DSA-87, e um
//! identificador derivado de (hash, assinatura).

use crate::fee::calculate_fee;
use crate::payload::{self, REGISTER_VALIDATOR_LEN};
use crate::token::genesis_token_id;
use serde::{Deserialize, Serialize};
use shared::{hexbytes, Address, Hash256, KeyPair, NodeError, OutPoint, Result};

/// Versão de transação suportada
pub const TX_VERSION: u32 = 1;

/// Tag de script pay-to-pubkey-hash
pub const SCRIPT_TAG_P2PKH: u8 = 0x76;

/// Rótulo de tipo de token para a moeda nativa
pub const TOKEN_TYPE_NATIVE: &str = "native";

/// Rótulo de tipo de token para tokens emitidos
pub const TOKEN_TYPE_CUSTOM: &str = "token";

/// Rótulo de tipo de token para tokens de liquidez
pub const TOKEN_TYPE_LP: &str = "lp";

/// Tipos de transação do protocolo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Coinbase,
    Send,
    MintToken,
    Melt,
    RegisterValidator,
    Offer,
    AcceptOffer,
    CancelOffer,
    CreatePool,
    AddLiquidity,
    RemoveLiquidity,
    Swap,
}

/// Input de transação: referência a uma UTXO existente
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Transação que criou a saída gasta
    pub prev_tx_id: Hash256,
    /// Índice da saída na transação de origem
    pub output_index: u32,
    /// Número de sequência
    pub sequence: u32,
}

impl TxInput {
    /// Cria um novo input de transação
    #[must_use]
    pub const fn new(prev_tx_id: Hash256, output_index: u32) -> Self {
        Self {
            prev_tx_id,
            output_index,
            sequence: 0,
        }
    }

    /// Outpoint referenciado por este input
    #[must_use]
    pub const fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.prev_tx_id, self.output_index)
    }
}

/// Output de transação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Valor em unidades mínimas do token
    pub amount: u64,
    /// Endereço beneficiário
    pub address: Address,
    /// Token transportado; o id gênese designa a moeda nativa
    pub token_id: String,
    /// Rótulo do tipo de token (native/token/lp)
    pub token_type: String,
    /// Colateral nativo vinculado a esta saída (tokens emitidos)
    pub locked_shadow: u64,
    /// Script de gasto: tag 0x76 seguida dos 32 bytes do endereço
    #[serde(with = "hexbytes")]
    pub script_pub_key: Vec<u8>,
    /// Dados livres da saída
    #[serde(with = "hexbytes")]
    pub data: Vec<u8>,
}

impl TxOutput {
    /// Saída em moeda nativa
    #[must_use]
    pub fn native(amount: u64, address: Address) -> Self {
        Self {
            amount,
            address,
            token_id: genesis_token_id().to_string(),
            token_type: TOKEN_TYPE_NATIVE.to_string(),
            locked_shadow: 0,
            script_pub_key: p2pkh_script(&address),
            data: Vec::new(),
        }
    }

    /// Saída de token emitido ou LP
    #[must_use]
    pub fn token(
        amount: u64,
        address: Address,
        token_id: String,
        token_type: &str,
        locked_shadow: u64,
    ) -> Self {
        Self {
            amount,
            address,
            token_id,
            token_type: token_type.to_string(),
            locked_shadow,
            script_pub_key: p2pkh_script(&address),
            data: Vec::new(),
        }
    }

    /// Verifica se a saída transporta moeda nativa
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.token_id == genesis_token_id()
    }
}

/// Script P2PKH: tag de um byte seguida do endereço
#[must_use]
pub fn p2pkh_script(address: &Address) -> Vec<u8> {
    let mut script = Vec::with_capacity(33);
    script.push(SCRIPT_TAG_P2PKH);
    script.extend_from_slice(address.as_bytes());
    script
}

/// Transação do protocolo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TxType,
    pub version: u32,
    /// Segundos desde a época
    pub timestamp: u64,
    pub lock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Payload específico do tipo (JSON) ou memo livre
    #[serde(with = "hexbytes")]
    pub data: Vec<u8>,
    /// Chave pública do único assinante
    #[serde(with = "hexbytes")]
    pub public_key: Vec<u8>,
    /// Assinatura ML-DSA-87 sobre o hash canônico
    #[serde(with = "hexbytes")]
    pub signature: Vec<u8>,
    /// BLAKE2b-256 de (hash canônico, assinatura)
    pub id: Hash256,
}

impl Transaction {
    /// Cria uma transação não assinada
    #[must_use]
    pub fn new(
        tx_type: TxType,
        timestamp: u64,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            tx_type,
            version: TX_VERSION,
            timestamp,
            lock_time: 0,
            inputs,
            outputs,
            data,
            public_key: Vec::new(),
            signature: Vec::new(),
            id: Hash256::zero(),
        }
    }

    /// Cria a transação coinbase de um bloco
    ///
    /// A altura vai no payload para que coinbases de alturas diferentes
    /// nunca compartilhem hash.
    #[must_use]
    pub fn coinbase(height: u64, reward: u64, winner: Address, timestamp: u64) -> Self {
        let outputs = if reward > 0 {
            vec![TxOutput::native(reward, winner)]
        } else {
            Vec::new()
        };

        let mut tx = Self::new(
            TxType::Coinbase,
            timestamp,
            Vec::new(),
            outputs,
            height.to_le_bytes().to_vec(),
        );
        tx.id = tx.compute_id().unwrap_or(Hash256::zero());
        tx
    }

    /// Hash canônico: BLAKE2b-256 da serialização com `public_key`,
    /// `signature` e `id` limpos
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn canonical_hash(&self) -> Result<Hash256> {
        let mut unsigned = self.clone();
        unsigned.public_key.clear();
        unsigned.signature.clear();
        unsigned.id = Hash256::zero();
        let bytes = serde_json::to_vec(&unsigned)?;
        Ok(Hash256::blake2b(&bytes))
    }

    /// Identificador: BLAKE2b-256 de hash canônico ‖ assinatura
    ///
    /// # Errors
    ///
    /// Retorna erro se o hash canônico falhar
    pub fn compute_id(&self) -> Result<Hash256> {
        let hash = self.canonical_hash()?;
        let mut preimage = Vec::with_capacity(32 + self.signature.len());
        preimage.extend_from_slice(hash.as_bytes());
        preimage.extend_from_slice(&self.signature);
        Ok(Hash256::blake2b(&preimage))
    }

    /// Assina a transação e sela o identificador
    ///
    /// # Errors
    ///
    /// Retorna erro se a assinatura falhar
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<()> {
        let hash = self.canonical_hash()?;
        self.public_key = keypair.public_key.as_bytes().to_vec();
        self.signature = keypair.sign_hash(&hash)?;
        self.id = self.compute_id()?;
        Ok(())
    }

    /// Verifica a transação coinbase
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase
    }

    /// Endereço derivado da chave pública do assinante
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se a transação não tiver assinante
    pub fn signer_address(&self) -> Result<Address> {
        if self.public_key.is_empty() {
            return Err(NodeError::Validation(
                "transação sem chave pública".to_string(),
            ));
        }
        Ok(Address::from_public_key_bytes(&self.public_key))
    }

    /// Verifica a assinatura contra o hash canônico
    #[must_use]
    pub fn verify_signature(&self) -> bool {
        let Ok(hash) = self.canonical_hash() else {
            return false;
        };
        shared::verify_hash(&self.public_key, &hash, &self.signature)
    }

    /// Soma das saídas em moeda nativa
    #[must_use]
    pub fn native_output_sum(&self) -> u64 {
        self.outputs
            .iter()
            .filter(|o| o.is_native())
            .map(|o| o.amount)
            .sum()
    }

    /// Taxa mínima desta transação segundo a política de taxa
    #[must_use]
    pub fn minimum_fee(&self) -> u64 {
        calculate_fee(
            self.tx_type,
            self.inputs.len(),
            self.outputs.len(),
            self.data.len(),
        )
    }

    /// Tamanho serializado em bytes
    #[must_use]
    pub fn size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }

    /// Validação estrutural da transação (sem acesso ao conjunto UTXO)
    ///
    /// # Errors
    ///
    /// Retorna `Validation` ou `InvalidSignature` conforme a falha
    pub fn validate(&self) -> Result<()> {
        if self.version != TX_VERSION {
            return Err(NodeError::Validation(format!(
                "versão não suportada: {}",
                self.version
            )));
        }

        if self.id != self.compute_id()? {
            return Err(NodeError::Validation(
                "identificador não confere com hash e assinatura".to_string(),
            ));
        }

        // Overflow na soma das saídas nativas
        self.outputs
            .iter()
            .filter(|o| o.is_native())
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
            .ok_or_else(|| NodeError::Validation("overflow na soma das saídas".to_string()))?;

        match self.tx_type {
            TxType::Coinbase => {
                if !self.inputs.is_empty() {
                    return Err(NodeError::Validation(
                        "coinbase não pode ter inputs".to_string(),
                    ));
                }
                if self.outputs.is_empty() {
                    return Err(NodeError::Validation(
                        "coinbase precisa de ao menos uma saída".to_string(),
                    ));
                }
                for output in &self.outputs {
                    if !output.is_native() || output.amount == 0 {
                        return Err(NodeError::Validation(
                            "saída de coinbase deve ser nativa e não nula".to_string(),
                        ));
                    }
                }
                return Ok(());
            }
            TxType::RegisterValidator => {
                if !self.inputs.is_empty() || !self.outputs.is_empty() {
                    return Err(NodeError::Validation(
                        "registro de validador não move valor".to_string(),
                    ));
                }
                if self.data.len() != REGISTER_VALIDATOR_LEN {
                    return Err(NodeError::Validation(format!(
                        "payload de validador deve ter {REGISTER_VALIDATOR_LEN} bytes"
                    )));
                }
            }
            _ => {
                if self.inputs.is_empty() {
                    return Err(NodeError::Validation(
                        "transação sem inputs".to_string(),
                    ));
                }
            }
        }

        // Payload específico do tipo
        match self.tx_type {
            TxType::MintToken => payload::parse::<payload::TokenMintData>(&self.data)?
                .validate()?,
            TxType::Melt => {
                payload::parse::<payload::MeltData>(&self.data)?;
            }
            TxType::Offer => {
                payload::parse::<payload::OfferData>(&self.data)?;
            }
            TxType::AcceptOffer => {
                payload::parse::<payload::AcceptOfferData>(&self.data)?;
            }
            TxType::CancelOffer => {
                payload::parse::<payload::CancelOfferData>(&self.data)?;
            }
            TxType::CreatePool => {
                payload::parse::<payload::CreatePoolData>(&self.data)?;
            }
            TxType::AddLiquidity => {
                payload::parse::<payload::AddLiquidityData>(&self.data)?;
            }
            TxType::RemoveLiquidity => {
                payload::parse::<payload::RemoveLiquidityData>(&self.data)?;
            }
            TxType::Swap => {
                payload::parse::<payload::SwapData>(&self.data)?;
            }
            TxType::Coinbase | TxType::Send | TxType::RegisterValidator => {}
        }

        // Assinatura obrigatória para todos os tipos de usuário
        if self.signature.is_empty() || !self.verify_signature() {
            return Err(NodeError::InvalidSignature);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::GENESIS_TIMESTAMP;

    fn signed_send(keypair: &KeyPair) -> Transaction {
        let dest = Address::from_bytes([2u8; 32]);
        let mut tx = Transaction::new(
            TxType::Send,
            GENESIS_TIMESTAMP + 10,
            vec![TxInput::new(Hash256::blake2b(b"prev"), 0)],
            vec![TxOutput::native(1_000, dest)],
            Vec::new(),
        );
        tx.sign(keypair).unwrap();
        tx
    }

    #[test]
    fn test_coinbase_structure() {
        let winner = Address::from_bytes([1u8; 32]);
        let coinbase = Transaction::coinbase(7, 5_000_000_000, winner, GENESIS_TIMESTAMP);

        assert!(coinbase.is_coinbase());
        assert!(coinbase.inputs.is_empty());
        assert_eq!(coinbase.outputs.len(), 1);
        assert_eq!(coinbase.outputs[0].amount, 5_000_000_000);
        assert!(coinbase.outputs[0].is_native());
        coinbase.validate().unwrap();
    }

    #[test]
    fn test_coinbase_heights_have_distinct_ids() {
        let winner = Address::from_bytes([1u8; 32]);
        let a = Transaction::coinbase(1, 5_000_000_000, winner, GENESIS_TIMESTAMP);
        let b = Transaction::coinbase(2, 5_000_000_000, winner, GENESIS_TIMESTAMP);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_canonical_hash_ignores_signature() {
        let keypair = KeyPair::generate();
        let mut tx = signed_send(&keypair);
        let hash_signed = tx.canonical_hash().unwrap();

        tx.signature.clear();
        tx.public_key.clear();
        let hash_unsigned = tx.canonical_hash().unwrap();

        assert_eq!(hash_signed, hash_unsigned);
    }

    #[test]
    fn test_sign_and_validate() {
        let keypair = KeyPair::generate();
        let tx = signed_send(&keypair);

        assert!(tx.verify_signature());
        tx.validate().unwrap();
        assert_eq!(
            tx.signer_address().unwrap(),
            Address::from_public_key(&keypair.public_key)
        );
    }

    #[test]
    fn test_tampered_output_rejected() {
        let keypair = KeyPair::generate();
        let mut tx = signed_send(&keypair);
        tx.outputs[0].amount += 1;

        assert!(!tx.verify_signature());
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_id_is_bound_to_signature() {
        let keypair = KeyPair::generate();
        let mut tx = signed_send(&keypair);
        let original = tx.id;

        // Forjar o id sem reassinar é detectado
        tx.id = Hash256::blake2b(b"forjado");
        assert!(tx.validate().is_err());
        tx.id = original;
        tx.validate().unwrap();
    }

    #[test]
    fn test_register_validator_shape() {
        let keypair = KeyPair::generate();
        let wallet = Address::from_public_key(&keypair.public_key);
        let data = payload::encode_register_validator(&[1u8; 20], &wallet).unwrap();

        let mut tx = Transaction::new(
            TxType::RegisterValidator,
            GENESIS_TIMESTAMP,
            Vec::new(),
            Vec::new(),
            data,
        );
        tx.sign(&keypair).unwrap();
        tx.validate().unwrap();

        // Payload de tamanho errado é rejeitado
        let mut short = Transaction::new(
            TxType::RegisterValidator,
            GENESIS_TIMESTAMP,
            Vec::new(),
            Vec::new(),
            vec![0u8; 51],
        );
        short.sign(&keypair).unwrap();
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let keypair = KeyPair::generate();
        let tx = signed_send(&keypair);

        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
        back.validate().unwrap();
    }
}
