//! Payloads tipados do campo `data` das transações
//!
//! Cada tipo de transação com semântica própria carrega um payload JSON
//! no campo `data`; o formato é parte do contrato de fio e é validado
//! na admissão e na aplicação.

use serde::{Deserialize, Serialize};
use shared::{Address, Hash256, NodeError, Result};

/// Parâmetros de emissão de um token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMintData {
    /// Ticker do token (3-32 caracteres alfanuméricos ASCII)
    pub ticker: String,
    /// Descrição livre (até 64 caracteres)
    pub desc: String,
    /// Unidades inteiras emitidas (1 a 21 000 000)
    pub max_mint: u64,
    /// Casas decimais (até 8)
    pub max_decimals: u32,
}

impl TokenMintData {
    /// Valida os limites dos parâmetros de emissão
    ///
    /// # Errors
    ///
    /// Retorna `Validation` se algum campo estiver fora dos limites
    pub fn validate(&self) -> Result<()> {
        let len = self.ticker.len();
        if !(3..=32).contains(&len) {
            return Err(NodeError::Validation(format!(
                "ticker deve ter 3-32 caracteres, tem {len}"
            )));
        }
        if !self.ticker.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(NodeError::Validation(
                "ticker deve ser alfanumérico ASCII".to_string(),
            ));
        }
        if self.desc.len() > 64 {
            return Err(NodeError::Validation(
                "descrição excede 64 caracteres".to_string(),
            ));
        }
        if !(1..=21_000_000).contains(&self.max_mint) {
            return Err(NodeError::Validation(format!(
                "max_mint fora do intervalo [1, 21000000]: {}",
                self.max_mint
            )));
        }
        if self.max_decimals > 8 {
            return Err(NodeError::Validation(format!(
                "max_decimals excede 8: {}",
                self.max_decimals
            )));
        }
        Ok(())
    }

    /// Oferta total em unidades mínimas: `max_mint * 10^max_decimals`
    ///
    /// # Errors
    ///
    /// Retorna `Validation` em overflow
    pub fn total_supply(&self) -> Result<u64> {
        let scale = 10u64
            .checked_pow(self.max_decimals)
            .ok_or_else(|| NodeError::Validation("max_decimals excessivo".to_string()))?;
        self.max_mint
            .checked_mul(scale)
            .ok_or_else(|| NodeError::Validation("overflow em total_supply".to_string()))
    }
}

/// Parâmetros de derretimento (melt) de um token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltData {
    pub token_id: String,
    pub melt_amount: u64,
}

/// Termos de uma oferta de troca atômica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferData {
    pub have_token_id: String,
    pub want_token_id: String,
    pub have_amount: u64,
    pub want_amount: u64,
    /// Altura de bloco a partir da qual a oferta expira
    pub expires_at_block: u64,
    /// Endereço que recebe o lado `want` da troca
    pub offer_address: Address,
}

/// Referência a uma oferta existente (aceite)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptOfferData {
    pub offer_tx_id: Hash256,
}

/// Referência a uma oferta existente (cancelamento)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOfferData {
    pub offer_tx_id: Hash256,
}

/// Parâmetros de criação de um pool de liquidez
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePoolData {
    pub token_a: String,
    pub token_b: String,
    pub amount_a: u64,
    pub amount_b: u64,
    /// Taxa do pool em basis points (30 = 0,30%)
    pub fee_percent: u64,
}

/// Parâmetros de depósito de liquidez
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidityData {
    pub pool_id: String,
    pub amount_a: u64,
    pub amount_b: u64,
    pub min_lp_tokens: u64,
}

/// Parâmetros de retirada de liquidez
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLiquidityData {
    pub pool_id: String,
    pub lp_amount: u64,
    pub min_a: u64,
    pub min_b: u64,
}

/// Parâmetros de um swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapData {
    pub pool_id: String,
    pub token_in: String,
    pub amount_in: u64,
    pub min_amount_out: u64,
}

/// Decodifica um payload JSON tipado do campo `data`
///
/// # Errors
///
/// Retorna `Validation` se o JSON não corresponder ao esquema
pub fn parse<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data)
        .map_err(|e| NodeError::Validation(format!("payload malformado: {e}")))
}

/// Codifica um payload tipado para o campo `data`
///
/// # Errors
///
/// Retorna `SerializationError` em falha de serialização
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(NodeError::from)
}

/// Tamanho exato do payload de registro de validador:
/// 20 bytes de identificador de proposer + 32 bytes de endereço
pub const REGISTER_VALIDATOR_LEN: usize = 52;

/// Decompõe o payload cru de `register_validator`
///
/// # Errors
///
/// Retorna `Validation` se o payload não tiver exatamente 52 bytes
pub fn parse_register_validator(data: &[u8]) -> Result<(Vec<u8>, Address)> {
    if data.len() != REGISTER_VALIDATOR_LEN {
        return Err(NodeError::Validation(format!(
            "payload de validador deve ter {REGISTER_VALIDATOR_LEN} bytes, tem {}",
            data.len()
        )));
    }
    let proposer = data[..20].to_vec();
    let wallet: [u8; 32] = data[20..]
        .try_into()
        .map_err(|_| NodeError::Validation("endereço de carteira malformado".to_string()))?;
    Ok((proposer, Address::from_bytes(wallet)))
}

/// Monta o payload cru de `register_validator`
///
/// # Errors
///
/// Retorna `Validation` se o identificador não tiver 20 bytes
pub fn encode_register_validator(proposer: &[u8], wallet: &Address) -> Result<Vec<u8>> {
    if proposer.len() != 20 {
        return Err(NodeError::Validation(format!(
            "identificador de proposer deve ter 20 bytes, tem {}",
            proposer.len()
        )));
    }
    let mut data = Vec::with_capacity(REGISTER_VALIDATOR_LEN);
    data.extend_from_slice(proposer);
    data.extend_from_slice(wallet.as_bytes());
    Ok(data)
}
