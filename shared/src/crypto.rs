//! Módulo de Criptografia Pós-Quântica do Shadowy
//!
//! Assinaturas ML-DSA-87 (CRYSTALS-Dilithium) em modo destacado: a
//! assinatura viaja separada da mensagem, como exigido pelo modelo de
//! transação (assinatura sobre o hash canônico).

use crate::{Hash256, NodeError, Result};
use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    DetachedSignature as PQCDetachedSignatureTrait, PublicKey as PQCPublicKeyTrait,
    SecretKey as PQCSecretKeyTrait,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Algoritmos de assinatura suportados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    MLDSA87,
}

/// Chave pública ML-DSA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    key_data: Vec<u8>,
    algorithm: SignatureAlgorithm,
}

/// Chave privada ML-DSA
#[derive(Debug, Clone)]
pub struct PrivateKey {
    key_data: Vec<u8>,
    algorithm: SignatureAlgorithm,
}

/// Par de chaves ML-DSA
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl PublicKey {
    /// Cria uma chave pública a partir de bytes
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não representarem uma chave válida
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        dilithium5::PublicKey::from_bytes(&bytes)
            .map_err(|_| NodeError::CryptographicError("chave pública malformada".to_string()))?;
        Ok(Self {
            key_data: bytes,
            algorithm: SignatureAlgorithm::MLDSA87,
        })
    }

    /// Returns the raw bytes of the public key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    /// Returns the signature algorithm used by this key
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    fn to_pqc_public_key(&self) -> Result<dilithium5::PublicKey> {
        dilithium5::PublicKey::from_bytes(&self.key_data)
            .map_err(|_| NodeError::CryptographicError("chave pública malformada".to_string()))
    }
}

impl PrivateKey {
    /// Creates a `PrivateKey` from raw bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are invalid for the algorithm
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        dilithium5::SecretKey::from_bytes(&bytes)
            .map_err(|_| NodeError::CryptographicError("chave privada malformada".to_string()))?;
        Ok(Self {
            key_data: bytes,
            algorithm: SignatureAlgorithm::MLDSA87,
        })
    }

    /// Returns the raw bytes of the private key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    /// Returns the signature algorithm used by this key
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    fn to_pqc_secret_key(&self) -> Result<dilithium5::SecretKey> {
        dilithium5::SecretKey::from_bytes(&self.key_data)
            .map_err(|_| NodeError::CryptographicError("chave privada malformada".to_string()))
    }
}

impl KeyPair {
    /// Generates a new ML-DSA-87 keypair
    #[must_use]
    pub fn generate() -> Self {
        let (public_key_bytes, secret_key_bytes) = dilithium5::keypair();

        Self {
            public_key: PublicKey {
                key_data: public_key_bytes.as_bytes().to_vec(),
                algorithm: SignatureAlgorithm::MLDSA87,
            },
            private_key: PrivateKey {
                key_data: secret_key_bytes.as_bytes().to_vec(),
                algorithm: SignatureAlgorithm::MLDSA87,
            },
        }
    }

    /// Reconstrói um par de chaves a partir de bytes crus
    ///
    /// # Errors
    ///
    /// Retorna erro se qualquer uma das chaves for inválida
    pub fn from_bytes(public: Vec<u8>, secret: Vec<u8>) -> Result<Self> {
        Ok(Self {
            public_key: PublicKey::from_bytes(public)?,
            private_key: PrivateKey::from_bytes(secret)?,
        })
    }

    /// Assina uma mensagem (assinatura destacada)
    ///
    /// # Errors
    ///
    /// Retorna erro se a chave privada for inválida
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let secret_key = self.private_key.to_pqc_secret_key()?;
        let signature = dilithium5::detached_sign(message, &secret_key);
        Ok(signature.as_bytes().to_vec())
    }

    /// Assina um hash (caminho usado pelas transações)
    ///
    /// # Errors
    ///
    /// Retorna erro se a assinatura falhar
    pub fn sign_hash(&self, hash: &Hash256) -> Result<Vec<u8>> {
        self.sign(hash.as_bytes())
    }
}

/// Verifica uma assinatura destacada contra uma mensagem
#[must_use]
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(pk) = dilithium5::PublicKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(sig) = dilithium5::DetachedSignature::from_bytes(signature) else {
        return false;
    };
    dilithium5::verify_detached_signature(&sig, message, &pk).is_ok()
}

/// Verifica uma assinatura contra um hash de transação
#[must_use]
pub fn verify_hash(public_key: &[u8], hash: &Hash256, signature: &[u8]) -> bool {
    verify(public_key, hash.as_bytes(), signature)
}

/// Tamanho em bytes de uma chave pública ML-DSA-87
#[must_use]
pub fn public_key_size() -> usize {
    dilithium5::public_key_bytes()
}

/// Tamanho em bytes de uma assinatura ML-DSA-87
#[must_use]
pub fn signature_size() -> usize {
    dilithium5::signature_bytes()
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.key_data.zeroize();
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}
