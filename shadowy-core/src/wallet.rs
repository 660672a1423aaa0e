//! Carteira: par de chaves ML-DSA-87 em keystore JSON
//!
//! Com senha, a chave secreta é cifrada com AES-256-GCM (chave derivada
//! por BLAKE2b-256 da senha, nonce aleatório por gravação). Sem senha o
//! keystore guarda a chave em claro, para nós de desenvolvimento.

use crate::fee::calculate_fee;
use crate::token::genesis_token_id;
use crate::transaction::{Transaction, TxInput, TxOutput, TxType};
use crate::utxo_store::{Utxo, UtxoStore};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use shared::{Address, Hash256, KeyPair, NodeError, Result};
use std::path::Path;
use tracing::info;

/// Keystore serializado em disco
#[derive(Debug, Serialize, Deserialize)]
struct Keystore {
    public_key: String,
    /// Chave secreta em hex (claro) ou ciphertext AES-GCM em hex
    secret_key: String,
    /// Nonce do AES-GCM em hex; presença indica keystore cifrado
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
}

/// Carteira carregada em memória
pub struct Wallet {
    keypair: KeyPair,
    address: Address,
}

impl Wallet {
    /// Gera uma carteira nova e grava o keystore
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou criptográfico na gravação
    pub fn create(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        let keypair = KeyPair::generate();
        let wallet = Self {
            address: Address::from_public_key(&keypair.public_key),
            keypair,
        };
        wallet.save(path, passphrase)?;
        info!(address = %wallet.address, "carteira criada");
        Ok(wallet)
    }

    /// Carrega um keystore existente
    ///
    /// # Errors
    ///
    /// `Validation` se a senha faltar ou não decifrar, `Corruption` em
    /// keystore malformado
    pub fn load(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let keystore: Keystore = serde_json::from_slice(&bytes)
            .map_err(|e| NodeError::Corruption(format!("keystore ilegível: {e}")))?;

        let public = hex::decode(&keystore.public_key)
            .map_err(|_| NodeError::Corruption("chave pública malformada".to_string()))?;

        let secret = match &keystore.nonce {
            None => hex::decode(&keystore.secret_key)
                .map_err(|_| NodeError::Corruption("chave secreta malformada".to_string()))?,
            Some(nonce_hex) => {
                let passphrase = passphrase.ok_or_else(|| {
                    NodeError::Validation("keystore cifrado exige senha".to_string())
                })?;
                let ciphertext = hex::decode(&keystore.secret_key)
                    .map_err(|_| NodeError::Corruption("ciphertext malformado".to_string()))?;
                let nonce_bytes = hex::decode(nonce_hex)
                    .map_err(|_| NodeError::Corruption("nonce malformado".to_string()))?;
                if nonce_bytes.len() != 12 {
                    return Err(NodeError::Corruption("nonce com tamanho errado".to_string()));
                }

                let cipher = Aes256Gcm::new(&Self::derive_key(passphrase));
                cipher
                    .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
                    .map_err(|_| NodeError::Validation("senha incorreta".to_string()))?
            }
        };

        let keypair = KeyPair::from_bytes(public, secret)?;
        Ok(Self {
            address: Address::from_public_key(&keypair.public_key),
            keypair,
        })
    }

    /// Carrega o keystore se existir, senão cria um novo
    ///
    /// # Errors
    ///
    /// Propaga falhas de leitura ou gravação
    pub fn load_or_create(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        if path.exists() {
            Self::load(path, passphrase)
        } else {
            Self::create(path, passphrase)
        }
    }

    fn derive_key(passphrase: &str) -> Key<Aes256Gcm> {
        let digest = Hash256::blake2b(passphrase.as_bytes());
        *Key::<Aes256Gcm>::from_slice(digest.as_bytes())
    }

    /// Grava o keystore (cifrado quando há senha)
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou criptográfico na gravação
    pub fn save(&self, path: &Path, passphrase: Option<&str>) -> Result<()> {
        let keystore = match passphrase {
            None => Keystore {
                public_key: hex::encode(self.keypair.public_key.as_bytes()),
                secret_key: hex::encode(self.keypair.private_key.as_bytes()),
                nonce: None,
            },
            Some(passphrase) => {
                let cipher = Aes256Gcm::new(&Self::derive_key(passphrase));
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, self.keypair.private_key.as_bytes())
                    .map_err(|e| NodeError::CryptographicError(e.to_string()))?;
                Keystore {
                    public_key: hex::encode(self.keypair.public_key.as_bytes()),
                    secret_key: hex::encode(ciphertext),
                    nonce: Some(hex::encode(nonce)),
                }
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(&keystore)?)?;
        Ok(())
    }

    /// Endereço da carteira
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Par de chaves da carteira
    #[must_use]
    pub const fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Assina uma transação com a chave da carteira
    ///
    /// # Errors
    ///
    /// Retorna erro se a assinatura falhar
    pub fn sign_transaction(&self, tx: &mut Transaction) -> Result<()> {
        tx.sign(&self.keypair)
    }

    /// Monta e assina uma transferência de moeda nativa com troco.
    ///
    /// A seleção refina a taxa duas vezes: primeiro com um palpite de
    /// limite superior, depois com a contagem real de entradas,
    /// puxando entradas extras apenas se necessário.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` se o saldo não cobrir valor + taxa
    pub fn build_send(
        &self,
        utxo_store: &UtxoStore,
        to: Address,
        amount: u64,
        timestamp: u64,
    ) -> Result<Transaction> {
        let mut candidates: Vec<Utxo> = utxo_store
            .get_utxos_by_address(&self.address)?
            .into_iter()
            .filter(|u| u.output.token_id == genesis_token_id())
            .collect();
        // Maiores primeiro, para poucas entradas
        candidates.sort_by(|a, b| b.output.amount.cmp(&a.output.amount));

        let available: u64 = candidates.iter().map(|u| u.output.amount).sum();
        // Palpite de limite superior: todas as entradas, duas saídas
        let fee_guess = calculate_fee(TxType::Send, candidates.len().max(1), 2, 0);
        let needed_guess = amount
            .checked_add(fee_guess)
            .ok_or_else(|| NodeError::Validation("overflow no valor".to_string()))?;
        if available < needed_guess {
            return Err(NodeError::InsufficientFunds {
                needed: needed_guess,
                available,
            });
        }

        let mut selected: Vec<Utxo> = Vec::new();
        let mut gathered = 0u64;
        for utxo in &candidates {
            selected.push(utxo.clone());
            gathered += utxo.output.amount;
            if gathered >= needed_guess {
                break;
            }
        }

        // Segunda passada: taxa exata para o conjunto final
        loop {
            let fee = calculate_fee(TxType::Send, selected.len(), 2, 0);
            let needed = amount + fee;
            if gathered >= needed {
                let change = gathered - needed;
                let mut outputs = vec![TxOutput::native(amount, to)];
                if change > 0 {
                    outputs.push(TxOutput::native(change, self.address));
                }

                let inputs = selected
                    .iter()
                    .map(|u| TxInput::new(u.tx_id, u.output_index))
                    .collect();
                let mut tx = Transaction::new(TxType::Send, timestamp, inputs, outputs, Vec::new());
                tx.sign(&self.keypair)?;
                return Ok(tx);
            }

            // Puxa mais uma entrada para cobrir a taxa recalculada
            let Some(next) = candidates.get(selected.len()) else {
                return Err(NodeError::InsufficientFunds {
                    needed,
                    available,
                });
            };
            selected.push(next.clone());
            gathered += next.output.amount;
        }
    }
}
