use std::{collections::BTreeSet, sync::Arc};

use alloy_primitives::U256;
use async_trait::async_trait;
use tidepool_chain::{advance_submitted, retry_read, BridgeQuote, BridgeRequest};
use tidepool_types::{
    chain::ChainId,
    task::{CrossChainTransferData, Task, TaskData, TaskStatus, TxTaskData}
};
use tracing::info;

use super::{ActionDefinition, StartOutcome, TickContext};
use crate::{context::ActionContext, AgentError};

/// The quote must promise at least this fraction of the sent amount back
/// on the destination chain.
const MIN_RECEIVE_NUMERATOR: u64 = 99;
const MIN_RECEIVE_DENOMINATOR: u64 = 100;

/// Moves USDC from an over-allocated chain toward an under-allocated one,
/// as directed by the opportunity scores.
pub struct CrossChainTransfer {
    ctx:  Arc<ActionContext>,
    from: ChainId,
    to:   ChainId,
    name: String
}

impl CrossChainTransfer {
    pub fn new(ctx: Arc<ActionContext>, from: ChainId, to: ChainId) -> Self {
        Self { ctx, from, to, name: format!("cross-chain-transfer-{from}-{to}") }
    }

    fn quote_is_safe(quote: &BridgeQuote) -> bool {
        let floor = quote.amount * U256::from(MIN_RECEIVE_NUMERATOR) /
            U256::from(MIN_RECEIVE_DENOMINATOR);
        quote.min_receive >= floor && quote.value <= quote.amount
    }
}

#[async_trait]
impl ActionDefinition for CrossChainTransfer {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_resources(&self) -> BTreeSet<String> {
        BTreeSet::from([
            format!("chain:{}:bridge", self.from),
            format!("chain:{}:bridge", self.to)
        ])
    }

    async fn should_start(&self, cx: &TickContext<'_>) -> Result<bool, AgentError> {
        let view = self.ctx.allocation_view(cx.token).await?;
        // the source must be over target by more than the threshold and the
        // destination must actually want the capital
        Ok(view.drift(self.from) > self.ctx.settings.rebalance_threshold_pct &&
            view.drift(self.to) < 0.0)
    }

    async fn start(&self, cx: &TickContext<'_>, force: bool) -> Result<StartOutcome, AgentError> {
        let view = self.ctx.allocation_view(cx.token).await?;
        let drift = view.drift(self.from);
        if !force &&
            !(drift > self.ctx.settings.rebalance_threshold_pct && view.drift(self.to) < 0.0)
        {
            return Ok(StartOutcome::Declined("allocation within rebalance threshold".into()))
        }

        let balances = self.ctx.side_balances(self.from, cx.token).await?;
        let excess_usd = (drift.max(0.0) / 100.0) * view.total_usd;
        let amount = balances.usdc.min(U256::from((excess_usd * 1e6) as u128));
        if amount.is_zero() {
            return Ok(StartOutcome::Declined("no idle USDC to move".into()))
        }

        let from = self.from;
        let to = self.to;
        let request = BridgeRequest { from_chain: from, to_chain: to, amount };
        let quote =
            retry_read("bridge quote", cx.token, || self.ctx.adapter.quote_cross_chain(&request))
                .await?;
        if !Self::quote_is_safe(&quote) {
            return Ok(StartOutcome::Declined("bridge quote outside safety bounds".into()))
        }

        let task = Task::new(
            &self.name,
            self.lock_resources(),
            TaskData::CrossChainTransfer(CrossChainTransferData {
                from_chain: from,
                to_chain: to,
                amount,
                min_receive: quote.min_receive,
                tx: TxTaskData::default()
            }),
            format!("moving allocation from chain {from} to chain {to}")
        );
        Ok(StartOutcome::Started(task))
    }

    async fn update(&self, _cx: &TickContext<'_>, mut task: Task) -> Result<Task, AgentError> {
        let TaskData::CrossChainTransfer(data) = task.task_data.clone() else {
            return Err(AgentError::PayloadMismatch(self.name.clone()))
        };

        match task.status {
            TaskStatus::PreStart => {
                // routes go stale quickly, fetch fresh calldata at submit
                let quote = self
                    .ctx
                    .adapter
                    .quote_cross_chain(&BridgeRequest {
                        from_chain: data.from_chain,
                        to_chain:   data.to_chain,
                        amount:     data.amount
                    })
                    .await?;
                if !Self::quote_is_safe(&quote) {
                    task.transition(
                        TaskStatus::Failed,
                        "bridge quote moved outside safety bounds"
                    );
                    return Ok(task)
                }

                let hash = self.ctx.adapter.submit_bridge(data.from_chain, &quote).await?;
                task.task_data.set_tx_hash(hash);
                task.transition(
                    TaskStatus::Running,
                    format!("bridging to chain {}", data.to_chain)
                );
                info!(from = data.from_chain, to = data.to_chain, %hash, "bridge submitted");
                Ok(task)
            }
            TaskStatus::Running => {
                let to_chain = data.to_chain;
                Ok(advance_submitted(
                    &*self.ctx.adapter,
                    data.from_chain,
                    task,
                    self.ctx.settings.tx_timeout,
                    |_| format!("Bridged funds to chain {to_chain}")
                )
                .await)
            }
            _ => Ok(task)
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, Bytes};

    use super::*;

    fn quote(amount: u64, min_receive: u64, value: u64) -> BridgeQuote {
        BridgeQuote {
            from_chain:  8453,
            to_chain:    10,
            amount:      U256::from(amount),
            min_receive: U256::from(min_receive),
            value:       U256::from(value),
            tx_to:       Address::repeat_byte(0xbb),
            tx_data:     Bytes::new()
        }
    }

    #[test]
    fn quotes_inside_bounds_pass() {
        assert!(CrossChainTransfer::quote_is_safe(&quote(1_000_000, 990_000, 0)));
        assert!(CrossChainTransfer::quote_is_safe(&quote(1_000_000, 1_000_000, 1_000_000)));
    }

    #[test]
    fn lossy_or_overpriced_quotes_fail() {
        assert!(!CrossChainTransfer::quote_is_safe(&quote(1_000_000, 989_999, 0)));
        assert!(!CrossChainTransfer::quote_is_safe(&quote(1_000_000, 990_000, 1_000_001)));
    }
}
