//! Shared types for the tidepool agent: chain registry and configuration,
//! pool primitives, the task model and time-series rows.

pub mod chain;
pub mod config;
pub mod observation;
pub mod primitive;
pub mod serde_utils;
pub mod task;

pub use chain::{ChainConfig, ChainId, ChainRegistry};
pub use config::{Environment, Settings};
pub use observation::{ExchangeRateSample, PoolObservation};
pub use primitive::{PoolId, PoolKey, Position};
pub use task::{Task, TaskData, TaskStatus};
