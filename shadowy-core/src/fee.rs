//! Política de taxa mínima
//!
//! A taxa é paga implicitamente: soma das entradas menos soma das
//! saídas em moeda nativa. O proposer coleta o total no coinbase.

use crate::transaction::TxType;

/// Componente fixo da taxa, em satoshis
pub const FEE_BASE: u64 = 1_000;

/// Peso por entrada consumida
pub const FEE_INPUT_WEIGHT: u64 = 200;

/// Peso por saída criada
pub const FEE_OUTPUT_WEIGHT: u64 = 100;

/// Peso por byte do payload `data`
pub const FEE_DATA_WEIGHT: u64 = 2;

/// Taxa mínima em satoshis para uma transação
///
/// Coinbase não paga taxa; emissão de token paga 10x a base mais o peso
/// do payload.
#[must_use]
pub fn calculate_fee(tx_type: TxType, n_inputs: usize, n_outputs: usize, data_len: usize) -> u64 {
    match tx_type {
        TxType::Coinbase => 0,
        TxType::MintToken => 10 * FEE_BASE + data_len as u64 * FEE_DATA_WEIGHT,
        _ => {
            FEE_BASE
                + n_inputs as u64 * FEE_INPUT_WEIGHT
                + n_outputs as u64 * FEE_OUTPUT_WEIGHT
                + data_len as u64 * FEE_DATA_WEIGHT
        }
    }
}
