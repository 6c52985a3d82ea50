use std::collections::BTreeSet;

use alloy_primitives::{B256, U256};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{chain::ChainId, primitive::PoolKey};

/// Epoch milliseconds, the clock all task timestamps run on.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    PreStart,
    Running,
    Completed,
    Failed,
    Stopped,
    Error
}

impl TaskStatus {
    /// Active tasks hold their resources and keep getting updates.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::PreStart | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreStart => "pre-start",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Error => "error"
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pre-start" => Some(Self::PreStart),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            _ => None
        }
    }
}

/// Shared tail of every payload that ends up submitting a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTaskData {
    pub hash: Option<B256>
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSyncData {
    pub chain_id:      ChainId,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub vault_balance: U256,
    #[serde(flatten)]
    pub tx:            TxTaskData
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidityData {
    pub chain_id:    ChainId,
    pub pool_key:    PoolKey,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub eth_amount:  U256,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub usdc_amount: U256,
    pub tick_lower:  i32,
    pub tick_upper:  i32,
    #[serde(flatten)]
    pub tx:          TxTaskData
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLiquidityData {
    pub chain_id:     ChainId,
    pub pool_key:     PoolKey,
    pub tick_lower:   i32,
    pub tick_upper:   i32,
    #[serde(with = "crate::serde_utils::u128_dec")]
    pub liquidity:    u128,
    pub current_tick: i32,
    #[serde(flatten)]
    pub tx:           TxTaskData
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwapDirection {
    EthToUsdc,
    UsdcToEth
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapForBalanceData {
    pub chain_id:  ChainId,
    pub direction: SwapDirection,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub amount_in: U256,
    #[serde(flatten)]
    pub tx:        TxTaskData
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainTransferData {
    pub from_chain:  ChainId,
    pub to_chain:    ChainId,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub amount:      U256,
    #[serde(with = "crate::serde_utils::u256_dec")]
    pub min_receive: U256,
    #[serde(flatten)]
    pub tx:          TxTaskData
}

/// Per-definition task payload. The runner never looks inside; each
/// definition decodes its own variant on `update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskData {
    VaultSync(VaultSyncData),
    AddLiquidity(AddLiquidityData),
    RemoveLiquidity(RemoveLiquidityData),
    SwapForBalance(SwapForBalanceData),
    CrossChainTransfer(CrossChainTransferData)
}

impl TaskData {
    /// The submitted transaction hash, if the payload carries one yet.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::VaultSync(data) => data.tx.hash,
            Self::AddLiquidity(data) => data.tx.hash,
            Self::RemoveLiquidity(data) => data.tx.hash,
            Self::SwapForBalance(data) => data.tx.hash,
            Self::CrossChainTransfer(data) => data.tx.hash
        }
    }

    pub fn set_tx_hash(&mut self, hash: B256) {
        let tx = match self {
            Self::VaultSync(data) => &mut data.tx,
            Self::AddLiquidity(data) => &mut data.tx,
            Self::RemoveLiquidity(data) => &mut data.tx,
            Self::SwapForBalance(data) => &mut data.tx,
            Self::CrossChainTransfer(data) => &mut data.tx
        };
        tx.hash = Some(hash);
    }
}

/// One unit of scheduled on-chain work, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id:              String,
    pub definition_name: String,
    pub started_at:      i64,
    pub last_updated_at: i64,
    pub finished_at:     Option<i64>,
    pub status:          TaskStatus,
    pub status_message:  String,
    pub resources_taken: BTreeSet<String>,
    pub task_data:       TaskData
}

impl Task {
    pub fn new(
        definition_name: &str,
        resources_taken: BTreeSet<String>,
        task_data: TaskData,
        status_message: impl Into<String>
    ) -> Self {
        let started_at = now_ms();
        Self {
            id: format!("{definition_name}-{started_at}-{:08x}", rand::random::<u32>()),
            definition_name: definition_name.to_string(),
            started_at,
            last_updated_at: started_at,
            finished_at: None,
            status: TaskStatus::PreStart,
            status_message: status_message.into(),
            resources_taken,
            task_data
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Moves the task to `status`, stamping `last_updated_at` and, for
    /// terminal statuses, `finished_at`. Terminal tasks are immutable.
    pub fn transition(&mut self, status: TaskStatus, message: impl Into<String>) {
        if !self.status.is_active() {
            return
        }
        self.status = status;
        self.status_message = message.into();
        self.last_updated_at = now_ms();
        if !status.is_active() {
            self.finished_at = Some(self.last_updated_at);
        }
    }

    /// True when any of `resources` collides with what this task holds.
    pub fn holds_any(&self, resources: &BTreeSet<String>) -> bool {
        !self.resources_taken.is_disjoint(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::new(
            "vault-sync-8453",
            BTreeSet::from(["chain:8453:manager".to_string()]),
            TaskData::VaultSync(VaultSyncData {
                chain_id:      8453,
                vault_balance: U256::from(10u64).pow(U256::from(18u64)),
                tx:            TxTaskData::default()
            }),
            "snapshotted vault balance"
        )
    }

    #[test]
    fn new_tasks_are_pre_start_and_unfinished() {
        let task = sample_task();
        assert_eq!(task.status, TaskStatus::PreStart);
        assert!(task.finished_at.is_none());
        assert!(task.last_updated_at >= task.started_at);
    }

    #[test]
    fn terminal_transition_is_sticky() {
        let mut task = sample_task();
        task.transition(TaskStatus::Running, "submitted");
        assert!(task.finished_at.is_none());

        task.transition(TaskStatus::Error, "tx reverted");
        let finished = task.finished_at.expect("terminal status sets finished_at");

        task.transition(TaskStatus::Completed, "late completion must not apply");
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.finished_at, Some(finished));
        assert_eq!(task.status_message, "tx reverted");
    }

    #[test]
    fn payload_round_trips_through_json() {
        let mut task = sample_task();
        task.task_data.set_tx_hash(B256::repeat_byte(0xab));

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    proptest::proptest! {
        /// Persistence must not lose resource tags or any digit of the
        /// arbitrary-precision amounts inside the payload.
        #[test]
        fn tasks_round_trip_losslessly(
            limbs in proptest::array::uniform4(proptest::num::u64::ANY),
            tags in proptest::collection::btree_set("[a-z0-9:]{1,24}", 0..5),
            message in ".{0,64}"
        ) {
            let mut task = Task::new(
                "add-liquidity-8453",
                tags,
                TaskData::AddLiquidity(AddLiquidityData {
                    chain_id:    8453,
                    pool_key:    PoolKey {
                        currency0:    alloy_primitives::Address::ZERO,
                        currency1:    alloy_primitives::Address::repeat_byte(7),
                        fee:          500,
                        tick_spacing: 10,
                        hooks:        alloy_primitives::Address::ZERO
                    },
                    eth_amount:  U256::from_limbs(limbs),
                    usdc_amount: U256::from_limbs([limbs[3], limbs[0], limbs[1], limbs[2]]),
                    tick_lower:  -100,
                    tick_upper:  100,
                    tx:          TxTaskData::default()
                }),
                message
            );
            task.transition(TaskStatus::Running, "submitted");

            let json = serde_json::to_string(&task).unwrap();
            let back: Task = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(back, task);
        }
    }

    #[test]
    fn status_strings_match_the_wire_format() {
        for status in [
            TaskStatus::PreStart,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Stopped,
            TaskStatus::Error
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }
}
