//! Shared scaffolding for scheduler tests: a scriptable chain adapter and
//! a stub action definition with hand-controlled gates.

use std::{
    collections::{BTreeSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc
    }
};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_agent::{ActionDefinition, AgentError, StartOutcome, TickContext};
use tidepool_chain::{
    BridgeQuote, BridgeRequest, ChainAdapter, ChainError, FeeGrowthGlobals, ReceiptLookup,
    ReceiptStatus, Slot0, SwapQuote, SwapRequest, TxReceipt
};
use tidepool_types::{
    chain::ChainId,
    primitive::{PoolId, PoolKey, Position},
    task::{Task, TaskData, TaskStatus, TxTaskData, VaultSyncData}
};

/// Chain adapter with just enough programmability for scheduler tests:
/// a settable vault balance, counted submissions and a scripted receipt
/// queue (empty queue means every lookup is a success).
#[derive(Default)]
pub struct MockChainAdapter {
    pub vault:       Mutex<U256>,
    pub submissions: AtomicU64,
    pub receipts:    Mutex<VecDeque<Result<ReceiptLookup, ChainError>>>
}

impl MockChainAdapter {
    pub fn with_vault(balance: U256) -> Self {
        Self { vault: Mutex::new(balance), ..Default::default() }
    }

    fn next_hash(&self) -> B256 {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        B256::with_last_byte(n as u8)
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn current_tick(&self, _: ChainId, _: PoolId) -> Result<Option<i32>, ChainError> {
        Ok(Some(0))
    }

    async fn slot0(&self, _: ChainId, _: PoolId) -> Result<Slot0, ChainError> {
        Ok(Slot0 {
            sqrt_price_x96: U256::from(1u128) << 96,
            tick:           0,
            protocol_fee:   0,
            lp_fee:         500
        })
    }

    async fn liquidity(&self, _: ChainId, _: PoolId) -> Result<u128, ChainError> {
        Ok(0)
    }

    async fn fee_growth_globals(
        &self,
        _: ChainId,
        _: PoolId
    ) -> Result<FeeGrowthGlobals, ChainError> {
        Ok(FeeGrowthGlobals { g0: U256::ZERO, g1: U256::ZERO })
    }

    async fn balance_native(&self, _: ChainId, _: Address) -> Result<U256, ChainError> {
        Ok(U256::ZERO)
    }

    async fn balance_erc20(&self, _: ChainId, _: Address, _: Address) -> Result<U256, ChainError> {
        Ok(U256::ZERO)
    }

    async fn vault_balance(&self, _: ChainId) -> Result<U256, ChainError> {
        Ok(*self.vault.lock())
    }

    async fn positions_of_manager(&self, _: ChainId) -> Result<Vec<Position>, ChainError> {
        Ok(Vec::new())
    }

    async fn submit_deposit(
        &self,
        _: ChainId,
        _: &PoolKey,
        _: i32,
        _: i32,
        _: U256,
        _: U256
    ) -> Result<B256, ChainError> {
        Ok(self.next_hash())
    }

    async fn submit_withdraw(
        &self,
        _: ChainId,
        _: &PoolKey,
        _: i32,
        _: i32,
        _: u128
    ) -> Result<B256, ChainError> {
        Ok(self.next_hash())
    }

    async fn submit_swap(&self, _: ChainId, _: &SwapQuote) -> Result<B256, ChainError> {
        Ok(self.next_hash())
    }

    async fn submit_bridge(&self, _: ChainId, _: &BridgeQuote) -> Result<B256, ChainError> {
        Ok(self.next_hash())
    }

    async fn submit_vault_withdraw(&self, _: ChainId, _: U256) -> Result<B256, ChainError> {
        Ok(self.next_hash())
    }

    async fn get_receipt(&self, _: ChainId, hash: B256) -> Result<ReceiptLookup, ChainError> {
        self.receipts.lock().pop_front().unwrap_or_else(|| {
            Ok(ReceiptLookup::Mined(TxReceipt {
                hash,
                status: ReceiptStatus::Success,
                block_number: 1,
                gas_used: 21_000,
                deposit: None
            }))
        })
    }

    async fn quote_swap(&self, request: &SwapRequest) -> Result<SwapQuote, ChainError> {
        Ok(SwapQuote {
            chain:          request.chain,
            direction:      request.direction,
            amount_in:      request.amount_in,
            amount_out:     request.amount_in,
            amount_out_min: request.amount_in
        })
    }

    async fn quote_cross_chain(&self, request: &BridgeRequest) -> Result<BridgeQuote, ChainError> {
        Ok(BridgeQuote {
            from_chain:  request.from_chain,
            to_chain:    request.to_chain,
            amount:      request.amount,
            min_receive: request.amount,
            value:       U256::ZERO,
            tx_to:       Address::repeat_byte(0xbb),
            tx_data:     Default::default()
        })
    }
}

/// A definition with a hand-operated gate. Its tasks submit nothing; the
/// first update moves them to `running` and they stay there until
/// `finish_next` is armed.
pub struct StubDefinition {
    name:        String,
    resources:   BTreeSet<String>,
    pub gate:        Arc<AtomicBool>,
    pub finish_next: Arc<AtomicBool>,
    pub fail_update: Arc<AtomicBool>
}

impl StubDefinition {
    pub fn new(name: &str, resources: impl IntoIterator<Item = String>) -> Self {
        Self {
            name:        name.to_string(),
            resources:   resources.into_iter().collect(),
            gate:        Arc::new(AtomicBool::new(false)),
            finish_next: Arc::new(AtomicBool::new(false)),
            fail_update: Arc::new(AtomicBool::new(false))
        }
    }

    pub fn open_gate(&self) {
        self.gate.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActionDefinition for StubDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_resources(&self) -> BTreeSet<String> {
        self.resources.clone()
    }

    async fn should_start(&self, _cx: &TickContext<'_>) -> Result<bool, AgentError> {
        Ok(self.gate.load(Ordering::SeqCst))
    }

    async fn start(&self, _cx: &TickContext<'_>, force: bool) -> Result<StartOutcome, AgentError> {
        if !force && !self.gate.load(Ordering::SeqCst) {
            return Ok(StartOutcome::Declined("gate closed".into()))
        }
        Ok(StartOutcome::Started(Task::new(
            &self.name,
            self.resources.clone(),
            TaskData::VaultSync(VaultSyncData {
                chain_id:      0,
                vault_balance: U256::ZERO,
                tx:            TxTaskData::default()
            }),
            "stub created"
        )))
    }

    async fn update(&self, _cx: &TickContext<'_>, mut task: Task) -> Result<Task, AgentError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(AgentError::UnknownDefinition("simulated update failure".into()))
        }
        match task.status {
            TaskStatus::PreStart => {
                task.transition(TaskStatus::Running, "stub submitted");
                Ok(task)
            }
            TaskStatus::Running if self.finish_next.load(Ordering::SeqCst) => {
                task.transition(TaskStatus::Completed, "stub finished");
                Ok(task)
            }
            _ => Ok(task)
        }
    }
}
