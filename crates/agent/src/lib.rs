//! The scheduler half of the agent: action definitions, the resource-locked
//! action runner and the stats collector that feeds the time-series store.

pub mod actions;
pub mod context;
pub mod loops;
pub mod runner;
pub mod stats;

use thiserror::Error;
use tidepool_chain::ChainError;
use tidepool_storage::StorageError;
use tidepool_types::config::ConfigError;

pub use actions::{ActionDefinition, StartOutcome, TickContext};
pub use context::{ActionContext, ActionSettings};
pub use runner::{ActionRunner, TickSummary};
pub use stats::StatsCollector;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no action definition named {0}")]
    UnknownDefinition(String),
    #[error("task payload does not belong to {0}")]
    PayloadMismatch(String)
}

impl AgentError {
    /// A cancelled tick must leave in-flight tasks untouched, so callers
    /// need to tell cancellation apart from real failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Chain(e) if e.is_cancelled())
    }
}
