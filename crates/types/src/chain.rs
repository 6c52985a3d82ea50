use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, primitive::PoolKey};

pub type ChainId = u64;

/// Chains that never receive allocation regardless of score. Mainnet gas
/// makes small-position rebalancing uneconomical.
pub const EXCLUDED_FROM_ALLOCATION: &[ChainId] = &[1];

/// Static gas-cost factor per chain, 0-10 with higher meaning cheaper.
const GAS_SCORES: &[(ChainId, f64)] = &[(1, 2.0), (10, 8.0), (130, 8.5), (8453, 9.0)];

/// Gas factor for the LOS formula. Unknown chains sit in the middle.
pub fn gas_score(chain: ChainId) -> f64 {
    GAS_SCORES
        .iter()
        .find(|(id, _)| *id == chain)
        .map(|(_, score)| *score)
        .unwrap_or(5.0)
}

/// Everything the agent needs to know about one chain: contract addresses,
/// the RPC endpoint and the pools it watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id:               ChainId,
    pub name:             String,
    pub rpc_url:          String,
    pub pool_manager:     Address,
    pub state_view:       Address,
    pub quoter:           Address,
    pub weth:             Address,
    pub usdc:             Address,
    pub universal_router: Address,
    /// The agent's liquidity-manager contract, when deployed on this chain.
    #[serde(default)]
    pub manager:          Option<Address>,
    /// Vault contract, present on the parent chain only.
    #[serde(default)]
    pub vault:            Option<Address>,
    /// The ETH/USDC pool the agent provides liquidity on.
    #[serde(default)]
    pub default_pool:     Option<PoolKey>,
    /// A sibling pool used as a sanity cross-check on the oracle tick.
    #[serde(default)]
    pub query_pool:       Option<PoolKey>
}

impl ChainConfig {
    pub fn resource(&self, kind: &str) -> String {
        format!("chain:{}:{}", self.id, kind)
    }
}

/// All configured chains, iterated in ascending id order everywhere so
/// downstream behavior stays deterministic.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<ChainId, ChainConfig>
}

impl ChainRegistry {
    pub fn new(chains: impl IntoIterator<Item = ChainConfig>) -> Self {
        Self { chains: chains.into_iter().map(|c| (c.id, c)).collect() }
    }

    pub fn get(&self, chain: ChainId) -> Result<&ChainConfig, ConfigError> {
        self.chains
            .get(&chain)
            .ok_or(ConfigError::UnsupportedChain(chain))
    }

    pub fn contains(&self, chain: ChainId) -> bool {
        self.chains.contains_key(&chain)
    }

    pub fn ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.chains.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// The chain hosting the vault contract.
    pub fn parent(&self) -> Option<&ChainConfig> {
        self.iter().find(|c| c.vault.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: ChainId) -> ChainConfig {
        ChainConfig {
            id,
            name: format!("chain-{id}"),
            rpc_url: "http://localhost:8545".into(),
            pool_manager: Address::ZERO,
            state_view: Address::ZERO,
            quoter: Address::ZERO,
            weth: Address::ZERO,
            usdc: Address::ZERO,
            universal_router: Address::ZERO,
            manager: None,
            vault: None,
            default_pool: None,
            query_pool: None
        }
    }

    #[test]
    fn registry_iterates_in_ascending_id_order() {
        let registry = ChainRegistry::new([config(8453), config(1), config(130)]);
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec![1, 130, 8453]);
    }

    #[test]
    fn unknown_chain_is_an_error() {
        let registry = ChainRegistry::new([config(8453)]);
        assert!(registry.get(10).is_err());
        assert!(registry.get(8453).is_ok());
    }

    #[test]
    fn resource_tags_follow_the_convention() {
        assert_eq!(config(8453).resource("liquidity"), "chain:8453:liquidity");
    }
}
