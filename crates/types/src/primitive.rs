use alloy_primitives::{keccak256, Address, FixedBytes, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// Identifier of a v4 pool, `keccak256(abi.encode(poolKey))`.
pub type PoolId = FixedBytes<32>;

/// The lowest tick a pool can reach, `log_1.0001(2^-128)` rounded.
pub const MIN_TICK: i32 = -887_272;
/// The highest tick a pool can reach.
pub const MAX_TICK: i32 = 887_272;

/// The five fields that identify a v4 pool.
///
/// `fee` is in pips (ppm), `tick_spacing` quantizes all liquidity
/// positions on the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub currency0:    Address,
    pub currency1:    Address,
    pub fee:          u32,
    pub tick_spacing: i32,
    pub hooks:        Address
}

impl PoolKey {
    /// int24/uint24 pad out to the same 32-byte words as int32/uint32, so
    /// encoding through the wider tuple matches the on-chain hash.
    pub fn id(&self) -> PoolId {
        let encoded =
            (self.currency0, self.currency1, self.fee, self.tick_spacing, self.hooks).abi_encode();
        keccak256(encoded)
    }
}

/// A liquidity position held by the manager contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub pool_key:   PoolKey,
    pub tick_lower: i32,
    pub tick_upper: i32,
    #[serde(with = "crate::serde_utils::u128_dec")]
    pub liquidity:  u128
}

impl Position {
    /// Where `current_tick` sits inside the range, 0.0 at the lower bound
    /// and 1.0 at the upper. Values outside [0, 1] mean the position is
    /// entirely one-sided.
    pub fn range_fraction(&self, current_tick: i32) -> f64 {
        let span = (self.tick_upper - self.tick_lower) as f64;
        if span == 0.0 {
            return 0.0
        }
        (current_tick - self.tick_lower) as f64 / span
    }
}

/// Rounds a tick to the nearest multiple of `spacing`, staying inside the
/// usable range.
pub fn nearest_usable_tick(tick: i32, spacing: i32) -> i32 {
    debug_assert!(spacing > 0);
    let mut rounded = ((tick as f64 / spacing as f64).round() as i32) * spacing;
    if rounded < MIN_TICK {
        rounded += spacing
    } else if rounded > MAX_TICK {
        rounded -= spacing
    }
    rounded
}

/// Price of token1 in token0 raw units implied by `sqrt_price_x96`.
pub fn price_from_sqrt_x96(sqrt_price_x96: U256) -> f64 {
    let sqrt_price = u256_to_f64(sqrt_price_x96) / 2f64.powi(96);
    sqrt_price * sqrt_price
}

/// Lossy widening conversion for metrics math. Fine for anything that ends
/// up in an f64 anyway.
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .enumerate()
        .map(|(i, limb)| *limb as f64 * 2f64.powi(64 * i as i32))
        .sum()
}
