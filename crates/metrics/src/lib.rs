//! Derived signals: per-chain fee APR and price volatility over rolling
//! windows, and the opportunity score that turns them into a target
//! allocation.

pub mod engine;
pub mod los;

pub use engine::{compute_metrics, ChainMetrics, FeeAprWindow, VolatilityWindow, Window};
pub use los::{allocate, compute_scores, LosComponents, LosScore};
