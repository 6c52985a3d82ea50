use std::{collections::BTreeSet, sync::Arc};

use alloy_primitives::{utils::format_ether, U256};
use async_trait::async_trait;
use tidepool_chain::{advance_submitted, retry_read};
use tidepool_types::{
    chain::ChainId,
    primitive::{nearest_usable_tick, u256_to_f64, PoolKey, MAX_TICK, MIN_TICK},
    task::{AddLiquidityData, Task, TaskData, TaskStatus, TxTaskData}
};
use tracing::info;

use super::{ActionDefinition, StartOutcome, TickContext};
use crate::{context::ActionContext, AgentError};

/// Both sides must be worth at least this much before a deposit is worth
/// the gas.
const MIN_SIDE_USD: f64 = 10.0;

/// Oracle sanity bound between the default pool tick and the sibling
/// query pool tick.
const MAX_TICK_DIVERGENCE: i32 = 200;

/// USDC in human units, two decimals is plenty for a status line.
fn format_usdc(amount: U256) -> String {
    format!("{:.2}", u256_to_f64(amount) / 1e6)
}

/// Deposits the manager's idle balances into a fresh range around the
/// current tick.
pub struct AddLiquidity {
    ctx:   Arc<ActionContext>,
    chain: ChainId,
    name:  String
}

impl AddLiquidity {
    pub fn new(ctx: Arc<ActionContext>, chain: ChainId) -> Self {
        Self { ctx, chain, name: format!("add-liquidity-{chain}") }
    }

    async fn pool_tick(
        &self,
        cx: &TickContext<'_>,
        label: &'static str,
        pool: &PoolKey
    ) -> Result<Option<i32>, AgentError> {
        let chain = self.chain;
        let id = pool.id();
        Ok(retry_read(label, cx.token, || self.ctx.adapter.current_tick(chain, id)).await?)
    }
}

#[async_trait]
impl ActionDefinition for AddLiquidity {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_resources(&self) -> BTreeSet<String> {
        BTreeSet::from([format!("chain:{}:liquidity", self.chain)])
    }

    async fn should_start(&self, cx: &TickContext<'_>) -> Result<bool, AgentError> {
        let config = self.ctx.registry.get(self.chain)?;
        if config.default_pool.is_none() {
            return Ok(false)
        }

        let balances = self.ctx.side_balances(self.chain, cx.token).await?;
        Ok(balances.eth_usd >= MIN_SIDE_USD &&
            balances.usdc_usd >= MIN_SIDE_USD &&
            !balances.is_lopsided())
    }

    async fn start(&self, cx: &TickContext<'_>, force: bool) -> Result<StartOutcome, AgentError> {
        if !force && !self.should_start(cx).await? {
            return Ok(StartOutcome::Declined("balances not ready for a deposit".into()))
        }

        let config = self.ctx.registry.get(self.chain)?;
        let Some(pool) = config.default_pool else {
            return Ok(StartOutcome::Declined("no default pool configured".into()))
        };

        let Some(current_tick) = self.pool_tick(cx, "pool tick", &pool).await? else {
            return Ok(StartOutcome::Declined("pool has no current tick".into()))
        };

        // cross-check against the sibling pool before trusting the price
        if let Some(query_pool) = config.query_pool {
            if let Some(query_tick) = self.pool_tick(cx, "query pool tick", &query_pool).await? {
                if (current_tick - query_tick).abs() > MAX_TICK_DIVERGENCE {
                    return Ok(StartOutcome::Declined(
                        "Current tick is too far from other tick".into()
                    ))
                }
            }
        }

        let spacing = pool.tick_spacing;
        let width = self.ctx.settings.range_width_spacings * spacing;
        let base = nearest_usable_tick(current_tick, spacing);
        let tick_lower = (base - width).max(nearest_usable_tick(MIN_TICK, spacing));
        let tick_upper = (base + width).min(nearest_usable_tick(MAX_TICK, spacing));

        let balances = self.ctx.side_balances(self.chain, cx.token).await?;
        let task = Task::new(
            &self.name,
            self.lock_resources(),
            TaskData::AddLiquidity(AddLiquidityData {
                chain_id: self.chain,
                pool_key: pool,
                eth_amount: balances.eth,
                usdc_amount: balances.usdc,
                tick_lower,
                tick_upper,
                tx: TxTaskData::default()
            }),
            format!("depositing into [{tick_lower}, {tick_upper}]")
        );
        Ok(StartOutcome::Started(task))
    }

    async fn update(&self, _cx: &TickContext<'_>, mut task: Task) -> Result<Task, AgentError> {
        let TaskData::AddLiquidity(data) = task.task_data.clone() else {
            return Err(AgentError::PayloadMismatch(self.name.clone()))
        };

        match task.status {
            TaskStatus::PreStart => {
                let hash = self
                    .ctx
                    .adapter
                    .submit_deposit(
                        self.chain,
                        &data.pool_key,
                        data.tick_lower,
                        data.tick_upper,
                        data.eth_amount,
                        data.usdc_amount
                    )
                    .await?;
                task.task_data.set_tx_hash(hash);
                task.transition(
                    TaskStatus::Running,
                    format!(
                        "depositing {} ETH + {} USDC into [{}, {}]",
                        format_ether(data.eth_amount),
                        format_usdc(data.usdc_amount),
                        data.tick_lower,
                        data.tick_upper
                    )
                );
                info!(chain = self.chain, %hash, "deposit submitted");
                Ok(task)
            }
            TaskStatus::Running => Ok(advance_submitted(
                &*self.ctx.adapter,
                self.chain,
                task,
                self.ctx.settings.tx_timeout,
                |receipt| match receipt.deposit {
                    Some(deposit) => format!(
                        "Deposited {} ETH + {} USDC for {} liquidity",
                        format_ether(deposit.amount0),
                        format_usdc(deposit.amount1),
                        deposit.liquidity
                    ),
                    None => format!(
                        "Deposited {} ETH + {} USDC",
                        format_ether(data.eth_amount),
                        format_usdc(data.usdc_amount)
                    )
                }
            )
            .await),
            _ => Ok(task)
        }
    }
}
