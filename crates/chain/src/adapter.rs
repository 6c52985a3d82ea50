use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use tidepool_types::{
    chain::ChainId,
    primitive::{PoolId, PoolKey, Position},
    task::SwapDirection
};

use crate::ChainError;

/// The pool's packed slot0 state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick:           i32,
    pub protocol_fee:   u32,
    pub lp_fee:         u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeGrowthGlobals {
    pub g0: U256,
    pub g1: U256
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted
}

/// Amounts pulled out of the manager's `Deposit` event, when the receipt
/// carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositInfo {
    pub amount0:   U256,
    pub amount1:   U256,
    pub liquidity: u128
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash:         B256,
    pub status:       ReceiptStatus,
    pub block_number: u64,
    pub gas_used:     u64,
    pub deposit:      Option<DepositInfo>
}

/// Receipts for transactions the chain has not mined yet come back as
/// `Pending`, never as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptLookup {
    Mined(TxReceipt),
    Pending
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRequest {
    pub chain:     ChainId,
    pub direction: SwapDirection,
    pub amount_in: U256
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapQuote {
    pub chain:          ChainId,
    pub direction:      SwapDirection,
    pub amount_in:      U256,
    pub amount_out:     U256,
    pub amount_out_min: U256
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeRequest {
    pub from_chain: ChainId,
    pub to_chain:   ChainId,
    pub amount:     U256
}

/// A routed bridge transfer, ready to submit through the manager's generic
/// call entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeQuote {
    pub from_chain:  ChainId,
    pub to_chain:    ChainId,
    pub amount:      U256,
    pub min_receive: U256,
    pub value:       U256,
    pub tx_to:       Address,
    pub tx_data:     Bytes
}

/// Everything the core needs from a chain. One implementation speaks
/// JSON-RPC through alloy; tests swap in mocks. The core never touches ABI
/// encoding directly.
#[async_trait]
#[auto_impl::auto_impl(&, Arc)]
pub trait ChainAdapter: Send + Sync {
    /// Current tick of an initialized pool, `None` when the pool has no
    /// price yet.
    async fn current_tick(
        &self,
        chain: ChainId,
        pool: PoolId
    ) -> Result<Option<i32>, ChainError>;

    async fn slot0(
        &self,
        chain: ChainId,
        pool: PoolId
    ) -> Result<Slot0, ChainError>;

    async fn liquidity(
        &self,
        chain: ChainId,
        pool: PoolId
    ) -> Result<u128, ChainError>;

    async fn fee_growth_globals(
        &self,
        chain: ChainId,
        pool: PoolId
    ) -> Result<FeeGrowthGlobals, ChainError>;

    async fn balance_native(&self, chain: ChainId, addr: Address) -> Result<U256, ChainError>;

    async fn balance_erc20(
        &self,
        chain: ChainId,
        token: Address,
        addr: Address
    ) -> Result<U256, ChainError>;

    async fn vault_balance(&self, chain: ChainId) -> Result<U256, ChainError>;

    async fn positions_of_manager(&self, chain: ChainId) -> Result<Vec<Position>, ChainError>;

    async fn submit_deposit(
        &self,
        chain: ChainId,
        key: &PoolKey,
        tick_lower: i32,
        tick_upper: i32,
        eth_amount: U256,
        usdc_amount: U256
    ) -> Result<B256, ChainError>;

    async fn submit_withdraw(
        &self,
        chain: ChainId,
        key: &PoolKey,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128
    ) -> Result<B256, ChainError>;

    async fn submit_swap(&self, chain: ChainId, quote: &SwapQuote) -> Result<B256, ChainError>;

    async fn submit_bridge(&self, chain: ChainId, quote: &BridgeQuote)
        -> Result<B256, ChainError>;

    async fn submit_vault_withdraw(
        &self,
        chain: ChainId,
        amount: U256
    ) -> Result<B256, ChainError>;

    async fn get_receipt(&self, chain: ChainId, hash: B256) -> Result<ReceiptLookup, ChainError>;

    async fn quote_swap(&self, request: &SwapRequest) -> Result<SwapQuote, ChainError>;

    async fn quote_cross_chain(
        &self,
        request: &BridgeRequest
    ) -> Result<BridgeQuote, ChainError>;
}
