//! Registro de pools de liquidez e aritmética de produto constante
//!
//! Toda a aritmética intermediária usa 128 bits com multiplicações
//! verificadas; os valores públicos permanecem em 64 bits. Invariantes:
//! `token_a != token_b`, um pool por par não-ordenado, e
//! `reserve_a * reserve_b` nunca decresce sob swaps (a taxa fica no
//! pool).

use crate::kv::{KvStore, WriteBatch};
use serde::{Deserialize, Serialize};
use shared::{NodeError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Estado de um pool de produto constante
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub pool_id: String,
    pub token_a: String,
    pub token_b: String,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub lp_token_id: String,
    pub lp_token_supply: u64,
    /// Taxa em basis points
    pub fee_percent: u64,
    /// Produto das reservas na última mudança de liquidez
    pub k: u128,
    pub created_at: u64,
}

impl LiquidityPool {
    /// Par não-ordenado deste pool
    #[must_use]
    pub fn pair(&self) -> (String, String) {
        ordered_pair(&self.token_a, &self.token_b)
    }

    /// Indica se o token participa do pool
    #[must_use]
    pub fn contains(&self, token_id: &str) -> bool {
        self.token_a == token_id || self.token_b == token_id
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn pool_key(pool_id: &str) -> Vec<u8> {
    format!("pool:{pool_id}").into_bytes()
}

/// Raiz quadrada inteira (método de Newton)
#[must_use]
pub fn isqrt(value: u128) -> u64 {
    if value == 0 {
        return 0;
    }
    let mut x = value;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    u64::try_from(x).unwrap_or(u64::MAX)
}

/// Saída de um swap com a taxa descontada da entrada:
/// `out = in·(10000−fee)/10000 · reserve_out / (reserve_in + in·(10000−fee)/10000)`
///
/// # Errors
///
/// Retorna `PoolState` se a taxa for inválida ou as reservas nulas
pub fn swap_output(
    amount_in: u64,
    reserve_in: u64,
    reserve_out: u64,
    fee_bp: u64,
) -> Result<u64> {
    if fee_bp >= 10_000 {
        return Err(NodeError::PoolState(format!(
            "taxa inválida: {fee_bp} bp"
        )));
    }
    if reserve_in == 0 || reserve_out == 0 {
        return Err(NodeError::PoolState("reservas esgotadas".to_string()));
    }

    let in_effective = u128::from(amount_in) * u128::from(10_000 - fee_bp) / 10_000;
    let numerator = in_effective
        .checked_mul(u128::from(reserve_out))
        .ok_or_else(|| NodeError::PoolState("overflow no cálculo do swap".to_string()))?;
    let denominator = u128::from(reserve_in) + in_effective;

    Ok(u64::try_from(numerator / denominator).unwrap_or(u64::MAX))
}

/// LP cunhado na criação do pool: `isqrt(amount_a · amount_b)`
#[must_use]
pub fn initial_lp_mint(amount_a: u64, amount_b: u64) -> u64 {
    isqrt(u128::from(amount_a) * u128::from(amount_b))
}

/// LP cunhado num depósito proporcional:
/// `min(a·supply/reserve_a, b·supply/reserve_b)`
///
/// # Errors
///
/// Retorna `PoolState` se as reservas ou a oferta forem nulas
pub fn deposit_lp_mint(
    amount_a: u64,
    amount_b: u64,
    reserve_a: u64,
    reserve_b: u64,
    lp_supply: u64,
) -> Result<u64> {
    if reserve_a == 0 || reserve_b == 0 || lp_supply == 0 {
        return Err(NodeError::PoolState("pool sem liquidez".to_string()));
    }
    let by_a = u128::from(amount_a) * u128::from(lp_supply) / u128::from(reserve_a);
    let by_b = u128::from(amount_b) * u128::from(lp_supply) / u128::from(reserve_b);
    Ok(u64::try_from(by_a.min(by_b)).unwrap_or(u64::MAX))
}

/// Verifica o desvio da razão de depósito: `|a/ra − b/rb| ≤ 1 %`,
/// avaliado como `100·|a·rb − b·ra| ≤ ra·rb`
#[must_use]
pub fn ratio_within_tolerance(amount_a: u64, amount_b: u64, reserve_a: u64, reserve_b: u64) -> bool {
    let lhs = u128::from(amount_a) * u128::from(reserve_b);
    let rhs = u128::from(amount_b) * u128::from(reserve_a);
    let diff = lhs.abs_diff(rhs);
    diff.checked_mul(100)
        .is_some_and(|scaled| scaled <= u128::from(reserve_a) * u128::from(reserve_b))
}

/// Registro de pools com índice de par não-ordenado
pub struct PoolRegistry {
    kv: Arc<dyn KvStore>,
    pools: RwLock<HashMap<String, LiquidityPool>>,
    pairs: RwLock<HashMap<(String, String), String>>,
}

impl PoolRegistry {
    /// Abre o registro, recarregando pools persistidos
    ///
    /// # Errors
    ///
    /// Retorna erro de I/O ou corrupção na releitura
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self> {
        let mut pools = HashMap::new();
        let mut pairs = HashMap::new();

        for item in kv.scan_prefix(b"pool:") {
            let (key, value) = item?;
            let pool: LiquidityPool = serde_json::from_slice(&value).map_err(|e| {
                NodeError::Corruption(format!(
                    "pool inválido em {}: {e}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            pairs.insert(pool.pair(), pool.pool_id.clone());
            pools.insert(pool.pool_id.clone(), pool);
        }

        Ok(Self {
            kv,
            pools: RwLock::new(pools),
            pairs: RwLock::new(pairs),
        })
    }

    /// Registra um pool novo dentro de um bloco
    ///
    /// # Errors
    ///
    /// Retorna `PoolState` se o par já existir ou os tokens coincidirem
    pub fn register_staged(&self, pool: LiquidityPool, batch: &mut WriteBatch) -> Result<()> {
        if pool.token_a == pool.token_b {
            return Err(NodeError::PoolState(
                "pool exige tokens distintos".to_string(),
            ));
        }
        if self.has_pair(&pool.token_a, &pool.token_b) {
            return Err(NodeError::PoolState(format!(
                "par já possui pool: {}/{}",
                pool.token_a, pool.token_b
            )));
        }

        batch.set(pool_key(&pool.pool_id), serde_json::to_vec(&pool)?);
        self.pairs
            .write()
            .expect("pool lock")
            .insert(pool.pair(), pool.pool_id.clone());
        self.pools
            .write()
            .expect("pool lock")
            .insert(pool.pool_id.clone(), pool);
        Ok(())
    }

    /// Atualiza um pool existente dentro de um bloco
    ///
    /// # Errors
    ///
    /// Retorna `PoolState` se o pool não existir
    pub fn update_staged(&self, pool: LiquidityPool, batch: &mut WriteBatch) -> Result<()> {
        if !self
            .pools
            .read()
            .expect("pool lock")
            .contains_key(&pool.pool_id)
        {
            return Err(NodeError::PoolState(format!(
                "pool desconhecido: {}",
                pool.pool_id
            )));
        }
        batch.set(pool_key(&pool.pool_id), serde_json::to_vec(&pool)?);
        self.pools
            .write()
            .expect("pool lock")
            .insert(pool.pool_id.clone(), pool);
        Ok(())
    }

    /// Busca por identificador
    #[must_use]
    pub fn get_pool(&self, pool_id: &str) -> Option<LiquidityPool> {
        self.pools.read().expect("pool lock").get(pool_id).cloned()
    }

    /// Todos os pools registrados
    #[must_use]
    pub fn get_all(&self) -> Vec<LiquidityPool> {
        self.pools
            .read()
            .expect("pool lock")
            .values()
            .cloned()
            .collect()
    }

    /// Indica se o par não-ordenado já possui pool
    #[must_use]
    pub fn has_pair(&self, token_a: &str, token_b: &str) -> bool {
        self.pairs
            .read()
            .expect("pool lock")
            .contains_key(&ordered_pair(token_a, token_b))
    }

    /// Snapshot do estado em memória
    #[must_use]
    pub fn snapshot(&self) -> (HashMap<String, LiquidityPool>, HashMap<(String, String), String>) {
        (
            self.pools.read().expect("pool lock").clone(),
            self.pairs.read().expect("pool lock").clone(),
        )
    }

    /// Restaura um snapshot tirado antes de um bloco que falhou
    pub fn restore(
        &self,
        snapshot: (HashMap<String, LiquidityPool>, HashMap<(String, String), String>),
    ) {
        *self.pools.write().expect("pool lock") = snapshot.0;
        *self.pairs.write().expect("pool lock") = snapshot.1;
    }
}
