use std::{collections::BTreeSet, sync::Arc};

use alloy_primitives::U256;
use async_trait::async_trait;
use tidepool_chain::{advance_submitted, SwapRequest};
use tidepool_types::{
    chain::ChainId,
    task::{SwapDirection, SwapForBalanceData, Task, TaskData, TaskStatus, TxTaskData}
};
use tracing::info;

use super::{ActionDefinition, StartOutcome, TickContext};
use crate::{context::ActionContext, AgentError};

/// Below this total there is nothing worth equalizing.
const MIN_TOTAL_USD: f64 = 20.0;

/// Swaps the heavier side toward a 50/50 USD split so the next deposit can
/// use both balances.
pub struct SwapForBalance {
    ctx:   Arc<ActionContext>,
    chain: ChainId,
    name:  String
}

impl SwapForBalance {
    pub fn new(ctx: Arc<ActionContext>, chain: ChainId) -> Self {
        Self { ctx, chain, name: format!("swap-for-balance-{chain}") }
    }
}

#[async_trait]
impl ActionDefinition for SwapForBalance {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_resources(&self) -> BTreeSet<String> {
        BTreeSet::from([format!("chain:{}:liquidity", self.chain)])
    }

    async fn should_start(&self, cx: &TickContext<'_>) -> Result<bool, AgentError> {
        let balances = self.ctx.side_balances(self.chain, cx.token).await?;
        Ok(balances.total_usd() >= MIN_TOTAL_USD && balances.is_lopsided())
    }

    async fn start(&self, cx: &TickContext<'_>, force: bool) -> Result<StartOutcome, AgentError> {
        let balances = self.ctx.side_balances(self.chain, cx.token).await?;
        let eligible = balances.total_usd() >= MIN_TOTAL_USD && balances.is_lopsided();
        if !force && !eligible {
            return Ok(StartOutcome::Declined("sides are already balanced".into()))
        }

        // swap away exactly the excess over an even split
        let excess_usd = (balances.eth_usd.max(balances.usdc_usd)) - balances.total_usd() / 2.0;
        if excess_usd <= 0.0 {
            return Ok(StartOutcome::Declined("nothing to equalize".into()))
        }

        let (direction, amount_in) = if balances.eth_usd > balances.usdc_usd {
            let price = self.ctx.eth_price_usd(self.chain, cx.token).await?;
            if price <= 0.0 {
                return Ok(StartOutcome::Declined("no usable oracle price".into()))
            }
            (SwapDirection::EthToUsdc, U256::from((excess_usd / price * 1e18) as u128))
        } else {
            (SwapDirection::UsdcToEth, U256::from((excess_usd * 1e6) as u128))
        };

        if amount_in.is_zero() {
            return Ok(StartOutcome::Declined("rounded swap amount is zero".into()))
        }

        let task = Task::new(
            &self.name,
            self.lock_resources(),
            TaskData::SwapForBalance(SwapForBalanceData {
                chain_id: self.chain,
                direction,
                amount_in,
                tx: TxTaskData::default()
            }),
            format!("equalizing ${excess_usd:.2} of imbalance")
        );
        Ok(StartOutcome::Started(task))
    }

    async fn update(&self, _cx: &TickContext<'_>, mut task: Task) -> Result<Task, AgentError> {
        let TaskData::SwapForBalance(data) = task.task_data.clone() else {
            return Err(AgentError::PayloadMismatch(self.name.clone()))
        };

        match task.status {
            TaskStatus::PreStart => {
                let quote = self
                    .ctx
                    .adapter
                    .quote_swap(&SwapRequest {
                        chain:     self.chain,
                        direction: data.direction,
                        amount_in: data.amount_in
                    })
                    .await?;
                let hash = self.ctx.adapter.submit_swap(self.chain, &quote).await?;
                task.task_data.set_tx_hash(hash);
                task.transition(TaskStatus::Running, "rebalancing swap submitted");
                info!(chain = self.chain, %hash, direction = ?data.direction, "swap submitted");
                Ok(task)
            }
            TaskStatus::Running => Ok(advance_submitted(
                &*self.ctx.adapter,
                self.chain,
                task,
                self.ctx.settings.tx_timeout,
                |receipt| format!("Swap for balance mined in block {}", receipt.block_number)
            )
            .await),
            _ => Ok(task)
        }
    }
}
