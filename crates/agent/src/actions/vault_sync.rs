use std::{collections::BTreeSet, sync::Arc};

use alloy_primitives::utils::format_ether;
use async_trait::async_trait;
use tidepool_chain::{advance_submitted, retry_read};
use tidepool_types::{
    chain::ChainId,
    task::{Task, TaskData, TaskStatus, TxTaskData, VaultSyncData}
};
use tracing::info;

use super::{ActionDefinition, StartOutcome, TickContext};
use crate::{context::ActionContext, AgentError};

/// Pulls accumulated vault deposits down into the manager contract.
/// Instantiated on the parent chain only.
pub struct VaultSync {
    ctx:   Arc<ActionContext>,
    chain: ChainId,
    name:  String
}

impl VaultSync {
    pub fn new(ctx: Arc<ActionContext>, chain: ChainId) -> Self {
        Self { ctx, chain, name: format!("vault-sync-{chain}") }
    }

    async fn vault_balance(
        &self,
        cx: &TickContext<'_>
    ) -> Result<alloy_primitives::U256, AgentError> {
        let chain = self.chain;
        Ok(retry_read("vault balance", cx.token, || self.ctx.adapter.vault_balance(chain)).await?)
    }
}

#[async_trait]
impl ActionDefinition for VaultSync {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_resources(&self) -> BTreeSet<String> {
        BTreeSet::from([format!("chain:{}:manager", self.chain)])
    }

    async fn should_start(&self, cx: &TickContext<'_>) -> Result<bool, AgentError> {
        let balance = self.vault_balance(cx).await?;
        Ok(balance > self.ctx.settings.intended_vault_reserve)
    }

    async fn start(&self, cx: &TickContext<'_>, force: bool) -> Result<StartOutcome, AgentError> {
        let balance = self.vault_balance(cx).await?;
        if !force && balance <= self.ctx.settings.intended_vault_reserve {
            return Ok(StartOutcome::Declined(
                "vault balance at or below the intended reserve".into()
            ))
        }

        let task = Task::new(
            &self.name,
            self.lock_resources(),
            TaskData::VaultSync(VaultSyncData {
                chain_id:      self.chain,
                vault_balance: balance,
                tx:            TxTaskData::default()
            }),
            format!("vault holds {} ETH", format_ether(balance))
        );
        Ok(StartOutcome::Started(task))
    }

    async fn update(&self, _cx: &TickContext<'_>, mut task: Task) -> Result<Task, AgentError> {
        let TaskData::VaultSync(data) = task.task_data.clone() else {
            return Err(AgentError::PayloadMismatch(self.name.clone()))
        };

        match task.status {
            TaskStatus::PreStart => {
                let hash = self
                    .ctx
                    .adapter
                    .submit_vault_withdraw(self.chain, data.vault_balance)
                    .await?;
                task.task_data.set_tx_hash(hash);
                task.transition(
                    TaskStatus::Running,
                    format!("withdrawing {} ETH from vault", format_ether(data.vault_balance))
                );
                info!(chain = self.chain, %hash, "vault withdrawal submitted");
                Ok(task)
            }
            TaskStatus::Running => {
                let amount = data.vault_balance;
                Ok(advance_submitted(
                    &*self.ctx.adapter,
                    self.chain,
                    task,
                    self.ctx.settings.tx_timeout,
                    |_| format!("Withdrew {} ETH from vault", format_ether(amount))
                )
                .await)
            }
            _ => Ok(task)
        }
    }
}
