use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;

/// One row of the pool time series. Append-only; the stats collector writes
/// a row per chain per tick and nothing ever mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolObservation {
    pub timestamp:          DateTime<Utc>,
    pub chain_id:           ChainId,
    pub pool_address:       Address,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub sqrt_price_x96:     U256,
    pub tick:               i32,
    #[serde(with = "crate::serde_utils::u128_dec")]
    pub liquidity:          u128,
    /// Pool fee in ppm.
    pub fee:                u32,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub fee_growth_global0: U256,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub fee_growth_global1: U256
}

/// A simulated 1-ETH swap quote, kept as a sanity price signal alongside
/// the pool rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRateSample {
    pub timestamp:   DateTime<Utc>,
    pub chain_id:    ChainId,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub usdc_output: U256
}
