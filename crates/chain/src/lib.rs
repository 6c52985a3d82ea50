//! Chain access for the agent: the adapter interface the core consumes, a
//! retrying read wrapper, the transaction-lifecycle helper and the
//! alloy-backed adapter implementation.

pub mod adapter;
pub mod contracts;
pub mod lifecycle;
pub mod provider;
pub mod retry;

use thiserror::Error;
use tidepool_types::chain::ChainId;

pub use adapter::{
    BridgeQuote, BridgeRequest, ChainAdapter, DepositInfo, FeeGrowthGlobals, ReceiptLookup,
    ReceiptStatus, Slot0, SwapQuote, SwapRequest, TxReceipt
};
pub use lifecycle::{advance_submitted, DEFAULT_TX_TIMEOUT};
pub use retry::{retry_read, retry_read_with, RetryPolicy};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error on chain {chain}: {message}")]
    Rpc { chain: ChainId, message: String },
    #[error("contract call on chain {chain} failed: {message}")]
    Call { chain: ChainId, message: String },
    #[error("chain {0} is not configured")]
    UnsupportedChain(ChainId),
    #[error("no manager contract on chain {0}")]
    MissingManager(ChainId),
    #[error("no vault contract on chain {0}")]
    MissingVault(ChainId),
    #[error("no default pool on chain {0}")]
    MissingPool(ChainId),
    #[error("no signer configured, writes are disabled")]
    MissingSigner,
    #[error("bridge quote api: {0}")]
    BridgeQuote(String),
    #[error("{label} cancelled")]
    Cancelled { label: String },
    #[error("{label} failed after {attempts} attempts: {message}")]
    RetriesExhausted { label: String, attempts: u32, message: String }
}

impl ChainError {
    /// Cancellation must never be treated as a task failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
