use std::sync::Arc;

use alloy_primitives::U256;
use chrono::{Duration, Utc};
use tidepool_chain::{retry_read, ChainAdapter, SwapRequest};
use tidepool_storage::TimeSeriesStore;
use tidepool_types::{
    chain::{ChainConfig, ChainRegistry},
    observation::{ExchangeRateSample, PoolObservation},
    task::SwapDirection
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::AgentError;

/// Rows older than this have aged out of every metrics window.
const RETENTION_HOURS: i64 = 50;

/// The reference swap used as the sanity price signal: one ETH in.
const ONE_ETH_WEI: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Default, Clone, Copy)]
pub struct StatsSummary {
    pub collected: usize,
    pub failed:    usize
}

/// Reads each chain's pool state and appends it to the time series.
/// Sequential across chains in ascending id order; one chain failing never
/// stops the others.
pub struct StatsCollector {
    adapter:  Arc<dyn ChainAdapter>,
    registry: Arc<ChainRegistry>,
    store:    Arc<TimeSeriesStore>
}

impl StatsCollector {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        registry: Arc<ChainRegistry>,
        store: Arc<TimeSeriesStore>
    ) -> Self {
        Self { adapter, registry, store }
    }

    pub async fn collect_once(&self, token: &CancellationToken) -> StatsSummary {
        let mut summary = StatsSummary::default();

        for config in self.registry.iter() {
            if token.is_cancelled() {
                break
            }
            match self.collect_chain(config, token).await {
                Ok(()) => summary.collected += 1,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    summary.failed += 1;
                    warn!(chain = config.id, %e, "observation failed");
                }
            }
        }

        if let Err(e) = self.store.prune_before(Utc::now() - Duration::hours(RETENTION_HOURS)) {
            warn!(%e, "pruning old observations failed");
        }

        summary
    }

    /// One chain's observation pass. Also what `--once` runs against the
    /// default chain.
    pub async fn collect_chain(
        &self,
        config: &ChainConfig,
        token: &CancellationToken
    ) -> Result<(), AgentError> {
        let Some(pool) = config.default_pool else {
            debug!(chain = config.id, "no default pool, skipping");
            return Ok(())
        };
        let chain = config.id;
        let id = pool.id();

        let slot0 = retry_read("slot0", token, || self.adapter.slot0(chain, id)).await?;
        let liquidity = retry_read("liquidity", token, || self.adapter.liquidity(chain, id)).await?;
        let fees =
            retry_read("fee growth", token, || self.adapter.fee_growth_globals(chain, id)).await?;

        self.store.insert_pool_price(&PoolObservation {
            timestamp:          Utc::now(),
            chain_id:           chain,
            pool_address:       config.pool_manager,
            sqrt_price_x96:     slot0.sqrt_price_x96,
            tick:               slot0.tick,
            liquidity,
            fee:                pool.fee,
            fee_growth_global0: fees.g0,
            fee_growth_global1: fees.g1
        })?;

        // the simulated quote is a bonus signal; losing it is not a chain
        // failure
        let request = SwapRequest {
            chain,
            direction: SwapDirection::EthToUsdc,
            amount_in: U256::from(ONE_ETH_WEI)
        };
        match self.adapter.quote_swap(&request).await {
            Ok(quote) => {
                self.store.insert_exchange_rate(&ExchangeRateSample {
                    timestamp:   Utc::now(),
                    chain_id:    chain,
                    usdc_output: quote.amount_out
                })?;
            }
            Err(e) => debug!(chain, %e, "exchange-rate quote failed")
        }

        debug!(chain, tick = slot0.tick, "observation stored");
        Ok(())
    }
}
