use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use tidepool_chain::{advance_submitted, retry_read};
use tidepool_types::{
    chain::ChainId,
    primitive::Position,
    task::{RemoveLiquidityData, Task, TaskData, TaskStatus, TxTaskData}
};
use tracing::info;

use super::{ActionDefinition, StartOutcome, TickContext};
use crate::{context::ActionContext, AgentError};

/// The middle band of a range. A position whose current tick drifts
/// outside it has gone one-sided enough to pull.
const CENTER_BAND: (f64, f64) = (0.15, 0.85);

/// Withdraws positions whose range no longer straddles the price.
pub struct RemoveLiquidity {
    ctx:   Arc<ActionContext>,
    chain: ChainId,
    name:  String
}

impl RemoveLiquidity {
    pub fn new(ctx: Arc<ActionContext>, chain: ChainId) -> Self {
        Self { ctx, chain, name: format!("remove-liquidity-{chain}") }
    }

    fn drifted(position: &Position, current_tick: i32) -> bool {
        if position.liquidity == 0 {
            return false
        }
        let fraction = position.range_fraction(current_tick);
        fraction < CENTER_BAND.0 || fraction > CENTER_BAND.1
    }

    /// First tracked position that has drifted out of its center band,
    /// together with the tick that condemned it.
    async fn first_drifted(
        &self,
        cx: &TickContext<'_>
    ) -> Result<Option<(Position, i32)>, AgentError> {
        let chain = self.chain;
        let positions =
            retry_read("manager positions", cx.token, || {
                self.ctx.adapter.positions_of_manager(chain)
            })
            .await?;

        for position in positions {
            let id = position.pool_key.id();
            let tick = retry_read("position pool tick", cx.token, || {
                self.ctx.adapter.current_tick(chain, id)
            })
            .await?;
            let Some(tick) = tick else { continue };
            if Self::drifted(&position, tick) {
                return Ok(Some((position, tick)))
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ActionDefinition for RemoveLiquidity {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_resources(&self) -> BTreeSet<String> {
        BTreeSet::from([format!("chain:{}:liquidity", self.chain)])
    }

    async fn should_start(&self, cx: &TickContext<'_>) -> Result<bool, AgentError> {
        Ok(self.first_drifted(cx).await?.is_some())
    }

    async fn start(&self, cx: &TickContext<'_>, force: bool) -> Result<StartOutcome, AgentError> {
        let drifted = self.first_drifted(cx).await?;
        let Some((position, current_tick)) = drifted else {
            if force {
                return Ok(StartOutcome::Declined("no position to remove".into()))
            }
            return Ok(StartOutcome::Declined("all positions are still centered".into()))
        };

        let task = Task::new(
            &self.name,
            self.lock_resources(),
            TaskData::RemoveLiquidity(RemoveLiquidityData {
                chain_id: self.chain,
                pool_key: position.pool_key,
                tick_lower: position.tick_lower,
                tick_upper: position.tick_upper,
                liquidity: position.liquidity,
                current_tick,
                tx: TxTaskData::default()
            }),
            format!(
                "position [{}, {}] drifted to tick {current_tick}",
                position.tick_lower, position.tick_upper
            )
        );
        Ok(StartOutcome::Started(task))
    }

    async fn update(&self, _cx: &TickContext<'_>, mut task: Task) -> Result<Task, AgentError> {
        let TaskData::RemoveLiquidity(data) = task.task_data.clone() else {
            return Err(AgentError::PayloadMismatch(self.name.clone()))
        };

        match task.status {
            TaskStatus::PreStart => {
                let hash = self
                    .ctx
                    .adapter
                    .submit_withdraw(
                        self.chain,
                        &data.pool_key,
                        data.tick_lower,
                        data.tick_upper,
                        data.liquidity
                    )
                    .await?;
                task.task_data.set_tx_hash(hash);
                task.transition(
                    TaskStatus::Running,
                    format!(
                        "withdrawing {} liquidity from [{}, {}]",
                        data.liquidity, data.tick_lower, data.tick_upper
                    )
                );
                info!(chain = self.chain, %hash, "withdrawal submitted");
                Ok(task)
            }
            TaskStatus::Running => Ok(advance_submitted(
                &*self.ctx.adapter,
                self.chain,
                task,
                self.ctx.settings.tx_timeout,
                |_| {
                    format!(
                        "Removed {} liquidity from [{}, {}]",
                        data.liquidity, data.tick_lower, data.tick_upper
                    )
                }
            )
            .await),
            _ => Ok(task)
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use tidepool_types::primitive::PoolKey;

    use super::*;

    fn position(lower: i32, upper: i32, liquidity: u128) -> Position {
        Position {
            pool_key: PoolKey {
                currency0:    Address::ZERO,
                currency1:    Address::repeat_byte(1),
                fee:          500,
                tick_spacing: 10,
                hooks:        Address::ZERO
            },
            tick_lower: lower,
            tick_upper: upper,
            liquidity
        }
    }

    #[test]
    fn centered_positions_stay() {
        let p = position(-1000, 1000, 5);
        assert!(!RemoveLiquidity::drifted(&p, 0));
        assert!(!RemoveLiquidity::drifted(&p, -690)); // fraction 0.155
        assert!(!RemoveLiquidity::drifted(&p, 690));
    }

    #[test]
    fn edge_positions_drift() {
        let p = position(-1000, 1000, 5);
        assert!(RemoveLiquidity::drifted(&p, -710)); // fraction 0.145
        assert!(RemoveLiquidity::drifted(&p, 710));
        assert!(RemoveLiquidity::drifted(&p, 1500)); // outside entirely
    }

    #[test]
    fn empty_positions_never_drift() {
        let p = position(-1000, 1000, 0);
        assert!(!RemoveLiquidity::drifted(&p, 1500));
    }
}
