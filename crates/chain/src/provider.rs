use std::{collections::BTreeMap, pin::Pin, sync::Arc};

use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http}
};
use alloy_primitives::{
    aliases::{I24, U24},
    Address, Bytes, B256, U256
};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::Deserialize;
use tidepool_types::{
    chain::{ChainId, ChainRegistry},
    primitive::{PoolId, PoolKey, Position},
    task::SwapDirection
};
use tracing::debug;

use crate::{
    adapter::{
        BridgeQuote, BridgeRequest, ChainAdapter, DepositInfo, FeeGrowthGlobals, ReceiptLookup,
        ReceiptStatus, Slot0, SwapQuote, SwapRequest, TxReceipt
    },
    contracts,
    ChainError
};

pub const DEFAULT_BRIDGE_API: &str = "https://li.quest/v1";

type HttpProvider = Pin<Box<dyn Provider<Http<Client>> + Send + Sync>>;

/// JSON-RPC adapter over alloy providers, one per configured chain. Writes
/// go through the wallet filler when a key was supplied; without one, every
/// submit fails fast with [`ChainError::MissingSigner`].
pub struct AlloyChainAdapter {
    registry:   Arc<ChainRegistry>,
    providers:  BTreeMap<ChainId, HttpProvider>,
    has_signer: bool,
    http:       reqwest::Client,
    bridge_api: String
}

impl AlloyChainAdapter {
    pub fn new(
        registry: Arc<ChainRegistry>,
        private_key: Option<&str>,
        bridge_api: Option<String>
    ) -> Result<Self, ChainError> {
        let signer = private_key
            .map(|key| {
                key.parse::<PrivateKeySigner>().map_err(|e| ChainError::Rpc {
                    chain:   0,
                    message: format!("bad signer key: {e}")
                })
            })
            .transpose()?;
        let has_signer = signer.is_some();

        let mut providers: BTreeMap<ChainId, HttpProvider> = BTreeMap::new();
        for chain in registry.iter() {
            let url = chain.rpc_url.parse().map_err(|e| ChainError::Rpc {
                chain:   chain.id,
                message: format!("bad rpc url {}: {e}", chain.rpc_url)
            })?;

            let provider: HttpProvider = match &signer {
                Some(signer) => Box::pin(
                    ProviderBuilder::new()
                        .with_recommended_fillers()
                        .wallet(EthereumWallet::from(signer.clone()))
                        .on_http(url)
                ),
                None => Box::pin(ProviderBuilder::new().on_http(url))
            };
            providers.insert(chain.id, provider);
        }

        Ok(Self {
            registry,
            providers,
            has_signer,
            http: reqwest::Client::new(),
            bridge_api: bridge_api.unwrap_or_else(|| DEFAULT_BRIDGE_API.to_string())
        })
    }

    fn provider(&self, chain: ChainId) -> Result<&HttpProvider, ChainError> {
        self.providers
            .get(&chain)
            .ok_or(ChainError::UnsupportedChain(chain))
    }

    fn manager(&self, chain: ChainId) -> Result<Address, ChainError> {
        self.registry
            .get(chain)
            .map_err(|_| ChainError::UnsupportedChain(chain))?
            .manager
            .ok_or(ChainError::MissingManager(chain))
    }

    async fn call(&self, chain: ChainId, to: Address, data: Vec<u8>) -> Result<Bytes, ChainError> {
        let provider = self.provider(chain)?;
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(Bytes::from(data));
        provider
            .call(&request)
            .await
            .map_err(|e| ChainError::Rpc { chain, message: e.to_string() })
    }

    async fn send(
        &self,
        chain: ChainId,
        to: Address,
        data: Vec<u8>,
        value: U256
    ) -> Result<B256, ChainError> {
        if !self.has_signer {
            return Err(ChainError::MissingSigner)
        }
        let provider = self.provider(chain)?;
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(Bytes::from(data))
            .with_value(value);

        let pending = provider
            .send_transaction(request)
            .await
            .map_err(|e| ChainError::Rpc { chain, message: e.to_string() })?;
        let hash = *pending.tx_hash();
        debug!(chain, %hash, "transaction submitted");
        Ok(hash)
    }

    fn state_view(&self, chain: ChainId) -> Result<Address, ChainError> {
        Ok(self
            .registry
            .get(chain)
            .map_err(|_| ChainError::UnsupportedChain(chain))?
            .state_view)
    }
}

#[async_trait]
impl ChainAdapter for AlloyChainAdapter {
    async fn current_tick(&self, chain: ChainId, pool: PoolId) -> Result<Option<i32>, ChainError> {
        let slot0 = self.slot0(chain, pool).await?;
        // an uninitialized pool reads back all zeroes rather than reverting
        if slot0.sqrt_price_x96.is_zero() {
            return Ok(None)
        }
        Ok(Some(slot0.tick))
    }

    async fn slot0(&self, chain: ChainId, pool: PoolId) -> Result<Slot0, ChainError> {
        let data = contracts::IStateView::getSlot0Call { poolId: pool }.abi_encode();
        let raw = self.call(chain, self.state_view(chain)?, data).await?;
        let ret = contracts::IStateView::getSlot0Call::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Call { chain, message: e.to_string() })?;
        Ok(Slot0 {
            sqrt_price_x96: U256::from(ret.sqrtPriceX96),
            tick:           i24_to_i32(ret.tick),
            protocol_fee:   ret.protocolFee.to::<u32>(),
            lp_fee:         ret.lpFee.to::<u32>()
        })
    }

    async fn liquidity(&self, chain: ChainId, pool: PoolId) -> Result<u128, ChainError> {
        let data = contracts::IStateView::getLiquidityCall { poolId: pool }.abi_encode();
        let raw = self.call(chain, self.state_view(chain)?, data).await?;
        let ret = contracts::IStateView::getLiquidityCall::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Call { chain, message: e.to_string() })?;
        Ok(ret.liquidity)
    }

    async fn fee_growth_globals(
        &self,
        chain: ChainId,
        pool: PoolId
    ) -> Result<FeeGrowthGlobals, ChainError> {
        let data = contracts::IStateView::getFeeGrowthGlobalsCall { poolId: pool }.abi_encode();
        let raw = self.call(chain, self.state_view(chain)?, data).await?;
        let ret = contracts::IStateView::getFeeGrowthGlobalsCall::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Call { chain, message: e.to_string() })?;
        Ok(FeeGrowthGlobals { g0: ret.feeGrowthGlobal0, g1: ret.feeGrowthGlobal1 })
    }

    async fn balance_native(&self, chain: ChainId, addr: Address) -> Result<U256, ChainError> {
        self.provider(chain)?
            .get_balance(addr)
            .await
            .map_err(|e| ChainError::Rpc { chain, message: e.to_string() })
    }

    async fn balance_erc20(
        &self,
        chain: ChainId,
        token: Address,
        addr: Address
    ) -> Result<U256, ChainError> {
        let data = contracts::IERC20::balanceOfCall { owner: addr }.abi_encode();
        let raw = self.call(chain, token, data).await?;
        let ret = contracts::IERC20::balanceOfCall::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Call { chain, message: e.to_string() })?;
        Ok(ret._0)
    }

    async fn vault_balance(&self, chain: ChainId) -> Result<U256, ChainError> {
        let vault = self
            .registry
            .get(chain)
            .map_err(|_| ChainError::UnsupportedChain(chain))?
            .vault
            .ok_or(ChainError::MissingVault(chain))?;
        let data = contracts::IVault::balanceCall {}.abi_encode();
        let raw = self.call(chain, vault, data).await?;
        let ret = contracts::IVault::balanceCall::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Call { chain, message: e.to_string() })?;
        Ok(ret._0)
    }

    async fn positions_of_manager(&self, chain: ChainId) -> Result<Vec<Position>, ChainError> {
        let manager = self.manager(chain)?;
        let data = contracts::ILiquidityManager::getPositionsCall {}.abi_encode();
        let raw = self.call(chain, manager, data).await?;
        let ret = contracts::ILiquidityManager::getPositionsCall::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Call { chain, message: e.to_string() })?;

        Ok(ret
            .positions
            .into_iter()
            .map(|info| Position {
                pool_key:   from_sol_key(&info.key),
                tick_lower: i24_to_i32(info.tickLower),
                tick_upper: i24_to_i32(info.tickUpper),
                liquidity:  info.liquidity
            })
            .collect())
    }

    async fn submit_deposit(
        &self,
        chain: ChainId,
        key: &PoolKey,
        tick_lower: i32,
        tick_upper: i32,
        eth_amount: U256,
        usdc_amount: U256
    ) -> Result<B256, ChainError> {
        let data = contracts::ILiquidityManager::depositCall {
            key:        to_sol_key(key),
            tickLower:  i32_to_i24(tick_lower),
            tickUpper:  i32_to_i24(tick_upper),
            ethAmount:  eth_amount,
            usdcAmount: usdc_amount
        }
        .abi_encode();
        self.send(chain, self.manager(chain)?, data, U256::ZERO).await
    }

    async fn submit_withdraw(
        &self,
        chain: ChainId,
        key: &PoolKey,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128
    ) -> Result<B256, ChainError> {
        let data = contracts::ILiquidityManager::withdrawCall {
            key: to_sol_key(key),
            tickLower: i32_to_i24(tick_lower),
            tickUpper: i32_to_i24(tick_upper),
            liquidity
        }
        .abi_encode();
        self.send(chain, self.manager(chain)?, data, U256::ZERO).await
    }

    async fn submit_swap(&self, chain: ChainId, quote: &SwapQuote) -> Result<B256, ChainError> {
        let data = match quote.direction {
            SwapDirection::EthToUsdc => contracts::ILiquidityManager::swapEthForTokenCall {
                amountIn:     quote.amount_in,
                minAmountOut: quote.amount_out_min
            }
            .abi_encode(),
            SwapDirection::UsdcToEth => contracts::ILiquidityManager::swapTokenForEthCall {
                amountIn:     quote.amount_in,
                minAmountOut: quote.amount_out_min
            }
            .abi_encode()
        };
        self.send(chain, self.manager(chain)?, data, U256::ZERO).await
    }

    async fn submit_bridge(
        &self,
        chain: ChainId,
        quote: &BridgeQuote
    ) -> Result<B256, ChainError> {
        let data = contracts::ILiquidityManager::executeCall {
            target: quote.tx_to,
            value:  quote.value,
            data:   quote.tx_data.clone()
        }
        .abi_encode();
        self.send(chain, self.manager(chain)?, data, U256::ZERO).await
    }

    async fn submit_vault_withdraw(
        &self,
        chain: ChainId,
        amount: U256
    ) -> Result<B256, ChainError> {
        let data = contracts::ILiquidityManager::withdrawFromVaultCall { amount }.abi_encode();
        self.send(chain, self.manager(chain)?, data, U256::ZERO).await
    }

    async fn get_receipt(&self, chain: ChainId, hash: B256) -> Result<ReceiptLookup, ChainError> {
        let receipt = self
            .provider(chain)?
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Rpc { chain, message: e.to_string() })?;

        let Some(receipt) = receipt else { return Ok(ReceiptLookup::Pending) };

        let deposit = receipt.inner.logs().iter().find_map(|log| {
            log.log_decode::<contracts::ILiquidityManager::Deposit>()
                .ok()
                .map(|decoded| {
                    let event = decoded.inner.data;
                    DepositInfo {
                        amount0:   event.amount0,
                        amount1:   event.amount1,
                        liquidity: event.liquidity
                    }
                })
        });

        Ok(ReceiptLookup::Mined(TxReceipt {
            hash,
            status: if receipt.status() { ReceiptStatus::Success } else { ReceiptStatus::Reverted },
            block_number: receipt.block_number.unwrap_or_default(),
            gas_used: receipt.gas_used as u64,
            deposit
        }))
    }

    async fn quote_swap(&self, request: &SwapRequest) -> Result<SwapQuote, ChainError> {
        let chain = request.chain;
        let config = self
            .registry
            .get(chain)
            .map_err(|_| ChainError::UnsupportedChain(chain))?;
        let pool = config.default_pool.ok_or(ChainError::MissingPool(chain))?;

        let data = contracts::IQuoter::quoteExactInputSingleCall {
            params: contracts::IQuoter::QuoteExactSingleParams {
                poolKey:     to_sol_key(&pool),
                // native ETH is currency0 on every configured pool
                zeroForOne:  matches!(request.direction, SwapDirection::EthToUsdc),
                exactAmount: request.amount_in.to::<u128>(),
                hookData:    Bytes::new()
            }
        }
        .abi_encode();
        let raw = self.call(chain, config.quoter, data).await?;
        let ret = contracts::IQuoter::quoteExactInputSingleCall::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Call { chain, message: e.to_string() })?;

        // 1% slippage allowance on the quoted output
        let amount_out_min = ret.amountOut * U256::from(99) / U256::from(100);
        Ok(SwapQuote {
            chain,
            direction: request.direction,
            amount_in: request.amount_in,
            amount_out: ret.amountOut,
            amount_out_min
        })
    }

    async fn quote_cross_chain(
        &self,
        request: &BridgeRequest
    ) -> Result<BridgeQuote, ChainError> {
        let url = format!("{}/quote", self.bridge_api);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("fromChain", request.from_chain.to_string()),
                ("toChain", request.to_chain.to_string()),
                ("amount", request.amount.to_string())
            ])
            .send()
            .await
            .map_err(|e| ChainError::BridgeQuote(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChainError::BridgeQuote(e.to_string()))?
            .json::<BridgeQuoteResponse>()
            .await
            .map_err(|e| ChainError::BridgeQuote(e.to_string()))?;

        Ok(BridgeQuote {
            from_chain:  request.from_chain,
            to_chain:    request.to_chain,
            amount:      request.amount,
            min_receive: response.min_receive,
            value:       response.value,
            tx_to:       response.to,
            tx_data:     response.data
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeQuoteResponse {
    #[serde(with = "tidepool_types::serde_utils::u256_dec")]
    min_receive: U256,
    #[serde(with = "tidepool_types::serde_utils::u256_dec")]
    value:       U256,
    to:          Address,
    data:        Bytes
}

fn to_sol_key(key: &PoolKey) -> contracts::PoolKey {
    contracts::PoolKey {
        currency0:   key.currency0,
        currency1:   key.currency1,
        fee:         U24::from(key.fee),
        tickSpacing: i32_to_i24(key.tick_spacing),
        hooks:       key.hooks
    }
}

fn from_sol_key(key: &contracts::PoolKey) -> PoolKey {
    PoolKey {
        currency0:    key.currency0,
        currency1:    key.currency1,
        fee:          key.fee.to::<u32>(),
        tick_spacing: i24_to_i32(key.tickSpacing),
        hooks:        key.hooks
    }
}

/// int24 comes off the wire as a 24-bit two's complement value.
fn i24_to_i32(value: I24) -> i32 {
    let raw = value.into_raw().as_limbs()[0] as u32;
    ((raw << 8) as i32) >> 8
}

fn i32_to_i24(value: i32) -> I24 {
    I24::from_raw(U24::from((value as u32) & 0x00ff_ffff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i24_round_trips_negative_ticks() {
        for tick in [-887_272, -60, -1, 0, 1, 60, 887_272] {
            assert_eq!(i24_to_i32(i32_to_i24(tick)), tick);
        }
    }

    #[test]
    fn sol_key_conversion_preserves_fields() {
        let key = PoolKey {
            currency0:    Address::ZERO,
            currency1:    Address::repeat_byte(0x01),
            fee:          500,
            tick_spacing: 10,
            hooks:        Address::ZERO
        };
        assert_eq!(from_sol_key(&to_sol_key(&key)), key);
    }
}
