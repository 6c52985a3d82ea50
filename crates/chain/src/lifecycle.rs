use std::time::Duration;

use tidepool_types::{
    chain::ChainId,
    task::{now_ms, Task, TaskStatus}
};
use tracing::debug;

use crate::{
    adapter::{ChainAdapter, ReceiptLookup, ReceiptStatus, TxReceipt},
    ChainError
};

/// How long a submitted transaction may stay unmined before the task is
/// written off. The chain may still mine it later; we do not reconcile.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(180);

/// Advances a task whose payload already carries a submitted hash by one
/// receipt poll. Never retries RPC failures itself; the runner calls again
/// next tick.
pub async fn advance_submitted<A, F>(
    adapter: &A,
    chain: ChainId,
    mut task: Task,
    timeout: Duration,
    format_success: F
) -> Task
where
    A: ChainAdapter + ?Sized,
    F: FnOnce(&TxReceipt) -> String
{
    let Some(hash) = task.task_data.tx_hash() else {
        task.transition(TaskStatus::Error, "No tx hash");
        return task
    };

    let lookup = adapter.get_receipt(chain, hash).await;
    let elapsed = Duration::from_millis(now_ms().saturating_sub(task.started_at).max(0) as u64);

    match lookup {
        Ok(ReceiptLookup::Mined(receipt)) => match receipt.status {
            ReceiptStatus::Success => {
                let message = format_success(&receipt);
                task.transition(TaskStatus::Completed, message);
            }
            ReceiptStatus::Reverted => {
                task.transition(TaskStatus::Error, format!("Transaction {hash} reverted"));
            }
        },
        Ok(ReceiptLookup::Pending) | Err(_) if elapsed > timeout => {
            task.transition(TaskStatus::Error, "Transaction timed out");
        }
        Ok(ReceiptLookup::Pending) | Err(_) => {
            // still in flight, leave the task running
            debug!(task = %task.id, %hash, "receipt not available yet");
        }
    }

    task
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};

    use alloy_primitives::{Address, B256, U256};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tidepool_types::{
        primitive::{PoolId, PoolKey, Position},
        task::{TaskData, TxTaskData, VaultSyncData}
    };

    use super::*;
    use crate::adapter::{
        BridgeQuote, BridgeRequest, FeeGrowthGlobals, Slot0, SwapQuote, SwapRequest
    };

    /// Replays a scripted sequence of receipt lookups.
    struct ScriptedAdapter {
        receipts: Mutex<VecDeque<Result<ReceiptLookup, ChainError>>>
    }

    impl ScriptedAdapter {
        fn new(receipts: impl IntoIterator<Item = Result<ReceiptLookup, ChainError>>) -> Self {
            Self { receipts: Mutex::new(receipts.into_iter().collect()) }
        }
    }

    #[async_trait]
    impl ChainAdapter for ScriptedAdapter {
        async fn current_tick(&self, _: ChainId, _: PoolId) -> Result<Option<i32>, ChainError> {
            unimplemented!()
        }

        async fn slot0(&self, _: ChainId, _: PoolId) -> Result<Slot0, ChainError> {
            unimplemented!()
        }

        async fn liquidity(&self, _: ChainId, _: PoolId) -> Result<u128, ChainError> {
            unimplemented!()
        }

        async fn fee_growth_globals(
            &self,
            _: ChainId,
            _: PoolId
        ) -> Result<FeeGrowthGlobals, ChainError> {
            unimplemented!()
        }

        async fn balance_native(&self, _: ChainId, _: Address) -> Result<U256, ChainError> {
            unimplemented!()
        }

        async fn balance_erc20(
            &self,
            _: ChainId,
            _: Address,
            _: Address
        ) -> Result<U256, ChainError> {
            unimplemented!()
        }

        async fn vault_balance(&self, _: ChainId) -> Result<U256, ChainError> {
            unimplemented!()
        }

        async fn positions_of_manager(&self, _: ChainId) -> Result<Vec<Position>, ChainError> {
            unimplemented!()
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
            unimplemented!()
        }

        async fn submit_withdraw(
            &self,
            _: ChainId,
            _: &PoolKey,
            _: i32,
            _: i32,
            _: u128
        ) -> Result<B256, ChainError> {
            unimplemented!()
        }

        async fn submit_swap(&self, _: ChainId, _: &SwapQuote) -> Result<B256, ChainError> {
            unimplemented!()
        }

        async fn submit_bridge(&self, _: ChainId, _: &BridgeQuote) -> Result<B256, ChainError> {
            unimplemented!()
        }

        async fn submit_vault_withdraw(&self, _: ChainId, _: U256) -> Result<B256, ChainError> {
            unimplemented!()
        }

        async fn get_receipt(&self, _: ChainId, _: B256) -> Result<ReceiptLookup, ChainError> {
            self.receipts
                .lock()
                .pop_front()
                .unwrap_or(Ok(ReceiptLookup::Pending))
        }

        async fn quote_swap(&self, _: &SwapRequest) -> Result<SwapQuote, ChainError> {
            unimplemented!()
        }

        async fn quote_cross_chain(&self, _: &BridgeRequest) -> Result<BridgeQuote, ChainError> {
            unimplemented!()
        }
    }

    fn running_task(with_hash: bool) -> Task {
        let mut task = Task::new(
            "vault-sync-8453",
            BTreeSet::from(["chain:8453:manager".to_string()]),
            TaskData::VaultSync(VaultSyncData {
                chain_id:      8453,
                vault_balance: U256::from(7u64),
                tx:            TxTaskData::default()
            }),
            "created"
        );
        task.transition(TaskStatus::Running, "submitted");
        if with_hash {
            task.task_data.set_tx_hash(B256::repeat_byte(0x77));
        }
        task
    }

    fn mined(status: ReceiptStatus) -> Result<ReceiptLookup, ChainError> {
        Ok(ReceiptLookup::Mined(TxReceipt {
            hash: B256::repeat_byte(0x77),
            status,
            block_number: 100,
            gas_used: 21_000,
            deposit: None
        }))
    }

    #[tokio::test]
    async fn missing_hash_is_an_error() {
        let adapter = ScriptedAdapter::new([]);
        let task =
            advance_submitted(&adapter, 8453, running_task(false), DEFAULT_TX_TIMEOUT, |_| {
                String::new()
            })
            .await;
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.status_message, "No tx hash");
    }

    #[tokio::test]
    async fn success_receipt_completes_with_formatted_message() {
        let adapter = ScriptedAdapter::new([mined(ReceiptStatus::Success)]);
        let task =
            advance_submitted(&adapter, 8453, running_task(true), DEFAULT_TX_TIMEOUT, |r| {
                format!("mined in block {}", r.block_number)
            })
            .await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.status_message, "mined in block 100");
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn reverted_receipt_names_the_hash() {
        let adapter = ScriptedAdapter::new([mined(ReceiptStatus::Reverted)]);
        let task =
            advance_submitted(&adapter, 8453, running_task(true), DEFAULT_TX_TIMEOUT, |_| {
                String::new()
            })
            .await;
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.status_message.contains(&B256::repeat_byte(0x77).to_string()));
    }

    #[tokio::test]
    async fn pending_within_timeout_leaves_the_task_running() {
        let adapter = ScriptedAdapter::new([Ok(ReceiptLookup::Pending)]);
        let before = running_task(true);
        let task = advance_submitted(&adapter, 8453, before.clone(), DEFAULT_TX_TIMEOUT, |_| {
            String::new()
        })
        .await;
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.status_message, before.status_message);
        assert!(task.finished_at.is_none());
    }

    #[tokio::test]
    async fn pending_past_the_deadline_times_out() {
        let adapter = ScriptedAdapter::new([Ok(ReceiptLookup::Pending)]);
        let mut stale = running_task(true);
        stale.started_at = now_ms() - 4 * 60 * 1000;
        let task =
            advance_submitted(&adapter, 8453, stale, DEFAULT_TX_TIMEOUT, |_| String::new()).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.status_message, "Transaction timed out");
    }

    #[tokio::test]
    async fn rpc_failures_past_the_deadline_also_time_out() {
        let adapter = ScriptedAdapter::new([Err(ChainError::Rpc {
            chain:   8453,
            message: "connection refused".into()
        })]);
        let mut stale = running_task(true);
        stale.started_at = now_ms() - 4 * 60 * 1000;
        let task =
            advance_submitted(&adapter, 8453, stale, DEFAULT_TX_TIMEOUT, |_| String::new()).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.status_message, "Transaction timed out");
    }

    /// Fixed observation sequences always produce the same status walk.
    #[tokio::test]
    async fn observation_sequence_is_deterministic() {
        for _ in 0..2 {
            let adapter = ScriptedAdapter::new([
                Ok(ReceiptLookup::Pending),
                Err(ChainError::Rpc { chain: 8453, message: "flaky".into() }),
                mined(ReceiptStatus::Success)
            ]);

            let mut task = running_task(true);
            let mut walk = Vec::new();
            for _ in 0..3 {
                task = advance_submitted(&adapter, 8453, task, DEFAULT_TX_TIMEOUT, |_| {
                    "done".to_string()
                })
                .await;
                walk.push(task.status);
            }
            assert_eq!(
                walk,
                vec![TaskStatus::Running, TaskStatus::Running, TaskStatus::Completed]
            );
        }
    }
}
