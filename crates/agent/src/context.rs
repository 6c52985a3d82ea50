use std::{collections::BTreeMap, sync::Arc, time::Duration};

use alloy_primitives::U256;
use chrono::Utc;
use tidepool_chain::{retry_read, ChainAdapter, ChainError, DEFAULT_TX_TIMEOUT};
use tidepool_metrics::{compute_metrics, compute_scores, ChainMetrics, Window};
use tidepool_storage::TimeSeriesStore;
use tidepool_types::{
    chain::{ChainId, ChainRegistry, EXCLUDED_FROM_ALLOCATION},
    config::Settings,
    primitive::{price_from_sqrt_x96, u256_to_f64}
};
use tokio_util::sync::CancellationToken;

use crate::AgentError;

/// The knobs action definitions read. Lifted out of [`Settings`] so tests
/// can construct them without touching the process environment.
#[derive(Debug, Clone)]
pub struct ActionSettings {
    pub intended_vault_reserve:  U256,
    pub range_width_spacings:    i32,
    pub rebalance_threshold_pct: f64,
    pub tx_timeout:              Duration
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            intended_vault_reserve:  U256::ZERO,
            range_width_spacings:    5,
            rebalance_threshold_pct: 10.0,
            tx_timeout:              DEFAULT_TX_TIMEOUT
        }
    }
}

impl From<&Settings> for ActionSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            intended_vault_reserve:  settings.intended_vault_reserve,
            range_width_spacings:    settings.range_width_spacings,
            rebalance_threshold_pct: settings.rebalance_threshold_pct,
            tx_timeout:              DEFAULT_TX_TIMEOUT
        }
    }
}

/// Shared dependencies every action definition holds.
pub struct ActionContext {
    pub adapter:    Arc<dyn ChainAdapter>,
    pub registry:   Arc<ChainRegistry>,
    pub timeseries: Arc<TimeSeriesStore>,
    pub settings:   ActionSettings
}

/// The manager contract's holdings on one chain, valued at the oracle tick
/// price.
#[derive(Debug, Clone, Copy)]
pub struct SideBalances {
    pub eth:      U256,
    pub usdc:     U256,
    pub eth_usd:  f64,
    pub usdc_usd: f64
}

impl SideBalances {
    pub fn total_usd(&self) -> f64 {
        self.eth_usd + self.usdc_usd
    }

    /// One side dominating by more than 2x is the swap trigger; a spread
    /// inside 2x is balanced enough to deposit.
    pub fn is_lopsided(&self) -> bool {
        let (lo, hi) = if self.eth_usd <= self.usdc_usd {
            (self.eth_usd, self.usdc_usd)
        } else {
            (self.usdc_usd, self.eth_usd)
        };
        hi > 2.0 * lo
    }
}

/// Current vs target allocation, percentage points per chain.
#[derive(Debug, Clone)]
pub struct AllocationView {
    pub current:   BTreeMap<ChainId, f64>,
    pub target:    BTreeMap<ChainId, f64>,
    pub total_usd: f64
}

impl AllocationView {
    pub fn drift(&self, chain: ChainId) -> f64 {
        self.current.get(&chain).copied().unwrap_or(0.0) -
            self.target.get(&chain).copied().unwrap_or(0.0)
    }
}

impl ActionContext {
    /// USDC-per-ETH price implied by the default pool's current tick.
    pub async fn eth_price_usd(
        &self,
        chain: ChainId,
        token: &CancellationToken
    ) -> Result<f64, AgentError> {
        let config = self.registry.get(chain)?;
        let pool = config
            .default_pool
            .ok_or(ChainError::MissingPool(chain))?;
        let slot0 = retry_read("oracle slot0", token, || {
            self.adapter.slot0(chain, pool.id())
        })
        .await?;
        Ok(price_from_sqrt_x96(slot0.sqrt_price_x96) * 1e12)
    }

    pub async fn side_balances(
        &self,
        chain: ChainId,
        token: &CancellationToken
    ) -> Result<SideBalances, AgentError> {
        let config = self.registry.get(chain)?;
        let manager = config.manager.ok_or(ChainError::MissingManager(chain))?;

        let eth = retry_read("manager native balance", token, || {
            self.adapter.balance_native(chain, manager)
        })
        .await?;
        let usdc = retry_read("manager usdc balance", token, || {
            self.adapter.balance_erc20(chain, config.usdc, manager)
        })
        .await?;
        let price = self.eth_price_usd(chain, token).await?;

        Ok(SideBalances {
            eth,
            usdc,
            eth_usd: u256_to_f64(eth) / 1e18 * price,
            usdc_usd: u256_to_f64(usdc) / 1e6
        })
    }

    /// Where capital sits now versus where the opportunity scores say it
    /// should. Only chains with a deployed manager participate.
    pub async fn allocation_view(
        &self,
        token: &CancellationToken
    ) -> Result<AllocationView, AgentError> {
        let now = Utc::now();
        let lookback = Window::OneDay.duration();

        let mut metrics: BTreeMap<ChainId, ChainMetrics> = BTreeMap::new();
        let mut balances: BTreeMap<ChainId, f64> = BTreeMap::new();

        for config in self.registry.iter() {
            if config.manager.is_none() {
                continue
            }
            let rows =
                self.timeseries
                    .get_pool_prices_for_chain(config.id, now - lookback, Some(now))?;
            metrics.insert(config.id, compute_metrics(config.id, &rows, now));
            balances.insert(config.id, self.side_balances(config.id, token).await?.total_usd());
        }

        let scores = compute_scores(&metrics, EXCLUDED_FROM_ALLOCATION);
        let total_usd: f64 = balances.values().sum();

        let current = balances
            .iter()
            .map(|(chain, usd)| {
                (*chain, if total_usd > 0.0 { usd / total_usd * 100.0 } else { 0.0 })
            })
            .collect();
        let target = scores
            .iter()
            .map(|(chain, score)| (*chain, score.target_allocation))
            .collect();

        Ok(AllocationView { current, target, total_usd })
    }
}
