//! Endereços do Shadowy
//!
//! Um endereço é BLAKE2b-256 da chave pública do assinante. A forma
//! textual carrega um byte de tipo (`S`, `L`, `X`, `N`), 64 caracteres
//! hexadecimais com caixa mista no estilo EIP-55 (derivada de
//! BLAKE2b-256 do hex minúsculo) e um dígito verificador Luhn mod-10
//! sobre o prefixo+hex minúsculos.

use crate::{Hash256, NodeError, PublicKey, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Byte de tipo da forma textual de um endereço
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Carteira comum
    Standard,
    /// Pool de liquidez
    Liquidity,
    /// Custódia de oferta (troca atômica)
    Exchange,
    /// Identidade de nó/validador
    Node,
}

impl AddressKind {
    /// Caractere do byte de tipo
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Standard => 'S',
            Self::Liquidity => 'L',
            Self::Exchange => 'X',
            Self::Node => 'N',
        }
    }

    /// Interpreta o byte de tipo
    ///
    /// # Errors
    ///
    /// Retorna erro se o caractere não for um dos quatro tipos
    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'S' => Ok(Self::Standard),
            'L' => Ok(Self::Liquidity),
            'X' => Ok(Self::Exchange),
            'N' => Ok(Self::Node),
            other => Err(NodeError::InvalidAddress(format!(
                "byte de tipo desconhecido: {other}"
            ))),
        }
    }
}

/// Identificador opaco de 32 bytes derivado da chave pública
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 32]);

impl Address {
    /// Endereço zerado (criador do token gênese)
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates an address from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deriva o endereço de uma chave pública (BLAKE2b-256 dos bytes)
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::from_public_key_bytes(public_key.as_bytes())
    }

    /// Deriva o endereço de bytes crus de chave pública
    #[must_use]
    pub fn from_public_key_bytes(key_bytes: &[u8]) -> Self {
        Self(*Hash256::blake2b(key_bytes).as_bytes())
    }

    /// Returns the raw bytes of the address
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex minúsculo (forma usada nas chaves do KV)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Codifica a forma textual com o byte de tipo dado
    #[must_use]
    pub fn encode(&self, kind: AddressKind) -> String {
        let lower = hex::encode(self.0);
        let mixed = apply_case_checksum(&lower);
        let luhn_input = format!(
            "{}{}",
            kind.as_char().to_ascii_lowercase(),
            lower
        );
        let check = luhn_digit(&luhn_input);
        format!("{}{}{}", kind.as_char(), mixed, check)
    }

    /// Decodifica e valida a forma textual
    ///
    /// # Errors
    ///
    /// Retorna erro se o tamanho, o byte de tipo, a caixa EIP-55 ou o
    /// dígito Luhn não conferirem
    pub fn decode(text: &str) -> Result<(AddressKind, Self)> {
        if text.len() != 66 || !text.is_ascii() {
            return Err(NodeError::InvalidAddress(format!(
                "tamanho inválido: {}",
                text.len()
            )));
        }

        let mut chars = text.chars();
        let kind = AddressKind::from_char(chars.next().unwrap_or('?'))?;
        let hex_part = &text[1..65];
        let check_char = text.as_bytes()[65] as char;

        let lower = hex_part.to_ascii_lowercase();
        let bytes = hex::decode(&lower)
            .map_err(|_| NodeError::InvalidAddress("hex inválido".to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NodeError::InvalidAddress("hex com tamanho errado".to_string()))?;

        // A caixa precisa bater exatamente com a soma de verificação
        if apply_case_checksum(&lower) != hex_part {
            return Err(NodeError::InvalidAddress(
                "caixa de caracteres não confere".to_string(),
            ));
        }

        let luhn_input = format!("{}{}", kind.as_char().to_ascii_lowercase(), lower);
        let expected = char::from_digit(u32::from(luhn_digit(&luhn_input)), 10).unwrap_or('0');
        if check_char != expected {
            return Err(NodeError::InvalidAddress(
                "dígito verificador não confere".to_string(),
            ));
        }

        Ok((kind, Self(arr)))
    }
}

/// Aplica a caixa mista estilo EIP-55: letra maiúscula quando o nibble
/// correspondente de BLAKE2b-256(hex minúsculo) é >= 8
fn apply_case_checksum(lower_hex: &str) -> String {
    let checksum = Hash256::blake2b(lower_hex.as_bytes());
    let digest = checksum.as_bytes();

    lower_hex
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if c.is_ascii_alphabetic() {
                let nibble = if i % 2 == 0 {
                    digest[i / 2] >> 4
                } else {
                    digest[i / 2] & 0x0f
                };
                if nibble >= 8 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            } else {
                c
            }
        })
        .collect()
}

/// Dígito verificador Luhn mod-10 sobre caracteres alfanuméricos.
/// Cada caractere contribui com seu valor em base 36; posições pares a
/// partir da direita são dobradas e reduzidas à soma dos dígitos.
fn luhn_digit(input: &str) -> u8 {
    let mut sum: u32 = 0;

    for (i, c) in input.chars().rev().enumerate() {
        let value = c.to_digit(36).unwrap_or(0);
        let mut contribution = if i % 2 == 0 { value * 2 } else { value };
        while contribution > 9 {
            contribution = contribution / 10 + contribution % 10;
        }
        sum += contribution;
    }

    ((10 - (sum % 10)) % 10) as u8
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode(AddressKind::Standard))
    }
}

impl FromStr for Address {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s).map(|(_, addr)| addr)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode(AddressKind::Standard))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(D::Error::custom)
    }
}
