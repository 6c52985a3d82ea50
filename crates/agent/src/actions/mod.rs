//! Action definitions: one instance per (chain, action kind), each owning
//! its gate, snapshot and per-step update logic. The runner treats them
//! uniformly through [`ActionDefinition`].

mod add_liquidity;
mod cross_chain;
mod remove_liquidity;
mod swap_for_balance;
mod vault_sync;

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use tidepool_types::{
    config::ConfigError,
    task::{Task, TaskStatus}
};
use tokio_util::sync::CancellationToken;

pub use add_liquidity::AddLiquidity;
pub use cross_chain::CrossChainTransfer;
pub use remove_liquidity::RemoveLiquidity;
pub use swap_for_balance::SwapForBalance;
pub use vault_sync::VaultSync;

use crate::{context::ActionContext, AgentError};

/// What a tick hands each definition: the tasks currently active across
/// the whole store and the tick's cancellation token.
pub struct TickContext<'a> {
    pub active: &'a [Task],
    pub token:  &'a CancellationToken
}

/// Outcome of a `start` attempt. Declines are normal control flow, not
/// errors; the reason surfaces in the runner's logs.
#[derive(Debug)]
pub enum StartOutcome {
    Started(Task),
    Declined(String)
}

#[async_trait]
pub trait ActionDefinition: Send + Sync {
    /// Stable identifier, unique per instance, e.g. `add-liquidity-8453`.
    fn name(&self) -> &str;

    /// The resource tags this action holds while one of its tasks is
    /// active. Pure and static.
    fn lock_resources(&self) -> BTreeSet<String>;

    /// Cheap side-effect-free gate. May read chain state.
    async fn should_start(&self, cx: &TickContext<'_>) -> Result<bool, AgentError>;

    /// Snapshots state into a new `pre-start` task when the gate holds (or
    /// `force` is set). Must not submit transactions.
    async fn start(&self, cx: &TickContext<'_>, force: bool) -> Result<StartOutcome, AgentError>;

    /// Advances a task one step: first call submits and moves to
    /// `running`, later calls poll the receipt.
    async fn update(&self, cx: &TickContext<'_>, task: Task) -> Result<Task, AgentError>;

    /// Best-effort teardown.
    async fn stop(&self, mut task: Task) -> Result<Task, AgentError> {
        task.transition(TaskStatus::Stopped, "stopped by operator");
        Ok(task)
    }
}

/// Builds the full registry in deterministic order: per chain ascending,
/// vault sync first on the parent chain, then the liquidity actions;
/// bridge pairs last. An agent without a vault chain is a configuration
/// error, not a quietly smaller registry.
pub fn build_registry(
    ctx: &Arc<ActionContext>
) -> Result<Vec<Arc<dyn ActionDefinition>>, AgentError> {
    let parent = ctx
        .registry
        .parent()
        .ok_or(ConfigError::MissingParentChain)?
        .id;
    let mut definitions: Vec<Arc<dyn ActionDefinition>> = Vec::new();

    for config in ctx.registry.iter() {
        if config.manager.is_none() {
            continue
        }
        if config.id == parent {
            definitions.push(Arc::new(VaultSync::new(ctx.clone(), config.id)));
        }
        if config.default_pool.is_some() {
            definitions.push(Arc::new(AddLiquidity::new(ctx.clone(), config.id)));
            definitions.push(Arc::new(RemoveLiquidity::new(ctx.clone(), config.id)));
            definitions.push(Arc::new(SwapForBalance::new(ctx.clone(), config.id)));
        }
    }

    let managed: Vec<_> = ctx
        .registry
        .iter()
        .filter(|c| c.manager.is_some())
        .map(|c| c.id)
        .collect();
    for &from in &managed {
        for &to in &managed {
            if from != to {
                definitions.push(Arc::new(CrossChainTransfer::new(ctx.clone(), from, to)));
            }
        }
    }

    Ok(definitions)
}
