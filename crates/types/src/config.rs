use std::{env, path::PathBuf, str::FromStr, time::Duration};

use alloy_primitives::{address, Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    chain::{ChainConfig, ChainId, ChainRegistry},
    primitive::PoolKey,
    serde_utils::u256_dec::parse_u256
};

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_ACTION_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_ACTION_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("vault private key must be 0x-prefixed 64-char hex")]
    BadPrivateKey,
    #[error("chain {0} is not configured")]
    UnsupportedChain(ChainId),
    #[error("no parent chain with a vault is configured")]
    MissingParentChain,
    #[error("failed to read deployment file {path}: {source}")]
    DeploymentRead { path: String, source: std::io::Error },
    #[error("failed to parse deployment file {path}: {source}")]
    DeploymentParse { path: String, source: serde_json::Error }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Testnet
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Testnet => "testnet"
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            "testnet" => Ok(Self::Testnet),
            other => Err(ConfigError::InvalidEnv { name: "ENVIRONMENT", value: other.to_string() })
        }
    }
}

/// Process-wide settings, parsed once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment:             Environment,
    pub default_chain:           ChainId,
    pub stats_interval:          Duration,
    pub action_interval:         Duration,
    pub action_deadline:         Duration,
    /// Validated but kept as the raw hex string; only the signer inside the
    /// chain adapter ever parses it.
    pub vault_private_key:       Option<String>,
    /// Balance the vault is allowed to keep before `VaultSync` pulls it.
    pub intended_vault_reserve:  U256,
    /// Half-width of a new liquidity range, in tick spacings.
    pub range_width_spacings:    i32,
    /// Percentage-point gap between current and target allocation that
    /// triggers a cross-chain transfer.
    pub rebalance_threshold_pct: f64,
    pub alert_webhook_url:       Option<String>,
    pub data_dir:                PathBuf
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match env::var("ENVIRONMENT") {
            Ok(raw) => raw.parse()?,
            Err(_) => Environment::Development
        };

        let default_chain = parse_env_or("CHAIN_ID", 8453u64)?;
        let stats_interval = match env::var("AGENT_INTERVAL_MS") {
            Ok(raw) => Duration::from_millis(raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name:  "AGENT_INTERVAL_MS",
                value: raw.clone()
            })?),
            Err(_) => DEFAULT_STATS_INTERVAL
        };

        let vault_private_key = match env::var("VAULT_PRIVATE_KEY") {
            Ok(raw) => {
                validate_private_key(&raw)?;
                Some(raw)
            }
            Err(_) => None
        };

        let intended_vault_reserve = match env::var("INTENDED_VAULT_RESERVE") {
            Ok(raw) => parse_u256(&raw).map_err(|_| ConfigError::InvalidEnv {
                name:  "INTENDED_VAULT_RESERVE",
                value: raw.clone()
            })?,
            Err(_) => U256::ZERO
        };

        let data_dir = PathBuf::from(match environment {
            Environment::Development => "./data-dev",
            Environment::Production => "./data",
            Environment::Testnet => "./data-testnet"
        });

        Ok(Self {
            environment,
            default_chain,
            stats_interval,
            action_interval: DEFAULT_ACTION_INTERVAL,
            action_deadline: DEFAULT_ACTION_DEADLINE,
            vault_private_key,
            intended_vault_reserve,
            range_width_spacings: parse_env_or("RANGE_WIDTH_SPACINGS", 5i32)?,
            rebalance_threshold_pct: parse_env_or("REBALANCE_THRESHOLD_PCT", 10.0f64)?,
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
            data_dir
        })
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

fn parse_env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw.clone() }),
        Err(_) => Ok(default)
    }
}

/// `0x` + 64 hex chars, rejected before anything touches the signer.
pub fn validate_private_key(raw: &str) -> Result<(), ConfigError> {
    let hex = raw.strip_prefix("0x").ok_or(ConfigError::BadPrivateKey)?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ConfigError::BadPrivateKey)
    }
    Ok(())
}

/// Loads the chain registry: deployment JSON in development, compiled-in
/// constants otherwise. `RPC_<NAME>` env vars override endpoints either way.
pub fn load_registry(
    environment: Environment,
    deployments_path: Option<&std::path::Path>
) -> Result<ChainRegistry, ConfigError> {
    let mut chains = match environment {
        Environment::Development | Environment::Testnet => {
            let path = deployments_path.ok_or(ConfigError::MissingEnv("DEPLOYMENTS_FILE"))?;
            let raw = std::fs::read_to_string(path).map_err(|source| {
                ConfigError::DeploymentRead { path: path.display().to_string(), source }
            })?;
            serde_json::from_str::<Vec<ChainConfig>>(&raw).map_err(|source| {
                ConfigError::DeploymentParse { path: path.display().to_string(), source }
            })?
        }
        Environment::Production => production_chains()
    };

    for chain in &mut chains {
        let var = format!("RPC_{}", chain.name.to_uppercase());
        if let Ok(url) = env::var(&var) {
            chain.rpc_url = url;
        } else if chain.rpc_url.is_empty() {
            warn!(chain = chain.id, %var, "no rpc endpoint configured, chain will be skipped");
        }
    }
    chains.retain(|c| !c.rpc_url.is_empty());

    Ok(ChainRegistry::new(chains))
}

/// ETH/USDC 0.05% pool, the range the agent provides on.
fn default_pool(usdc: Address) -> PoolKey {
    PoolKey {
        currency0:    Address::ZERO,
        currency1:    usdc,
        fee:          500,
        tick_spacing: 10,
        hooks:        Address::ZERO
    }
}

/// The 0.3% sibling used as the tick sanity cross-check.
fn query_pool(usdc: Address) -> PoolKey {
    PoolKey {
        currency0:    Address::ZERO,
        currency1:    usdc,
        fee:          3000,
        tick_spacing: 60,
        hooks:        Address::ZERO
    }
}

fn production_chains() -> Vec<ChainConfig> {
    let base_usdc = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
    let op_usdc = address!("0b2C639c533813f4Aa9D7837CAf62653d097Ff85");
    let uni_usdc = address!("078D782b760474a361dDA0AF3839290b0EF57AD6");
    let mainnet_usdc = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

    vec![
        ChainConfig {
            id:               1,
            name:             "mainnet".into(),
            rpc_url:          String::new(),
            pool_manager:     address!("000000000004444c5dc75cB358380D2e3dE08A90"),
            state_view:       address!("7fFE42C4a5DEeA5b0feC41C94C136Cf115597227"),
            quoter:           address!("52F0E24D1c21C8A0cB1e5a5dD6198556BD9E1203"),
            weth:             address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            usdc:             mainnet_usdc,
            universal_router: address!("66a9893cC07D91D95644AEDD05D03f95e1dBA8Af"),
            manager:          None,
            vault:            None,
            default_pool:     Some(default_pool(mainnet_usdc)),
            query_pool:       Some(query_pool(mainnet_usdc))
        },
        ChainConfig {
            id:               10,
            name:             "optimism".into(),
            rpc_url:          String::new(),
            pool_manager:     address!("9a13F98Cb987694C9F086b1F5eB990EeA8264Ec3"),
            state_view:       address!("c18a3169788F4F75A170290584ECA6395C75Ecdb"),
            quoter:           address!("1f3131A13296Fb91c90870043742C3cdBfF1a8D7"),
            weth:             address!("4200000000000000000000000000000000000006"),
            usdc:             op_usdc,
            universal_router: address!("851116D9223fabED8E56C0E6b8Ad0c31d98B7Ad0"),
            manager:          Some(address!("71C95911E9a5D330f4D621842EC243EE1343292e")),
            vault:            None,
            default_pool:     Some(default_pool(op_usdc)),
            query_pool:       Some(query_pool(op_usdc))
        },
        ChainConfig {
            id:               130,
            name:             "unichain".into(),
            rpc_url:          String::new(),
            pool_manager:     address!("1F98400000000000000000000000000000000004"),
            state_view:       address!("86e8631A016F9068C3f085fAF484Ee3F5fDee8f2"),
            quoter:           address!("333E3C607B141b18fF6de9f258db6e77fE7491E0"),
            weth:             address!("4200000000000000000000000000000000000006"),
            usdc:             uni_usdc,
            universal_router: address!("Ef740bf23aCaE26f6492B10de645D6B98dC8Eaf3"),
            manager:          Some(address!("948B3c65b89DF0B4894ABE91E6D02FE579834F8F")),
            vault:            None,
            default_pool:     Some(default_pool(uni_usdc)),
            query_pool:       Some(query_pool(uni_usdc))
        },
        ChainConfig {
            id:               8453,
            name:             "base".into(),
            rpc_url:          String::new(),
            pool_manager:     address!("498581fF718922c3f8e6A244956aF099B2652b2b"),
            state_view:       address!("A3c0c9b65baD0b08107Aa264b0f3dB444b867A71"),
            quoter:           address!("0d5e0F971ED27FBfF6c2837bf31316121532048D"),
            weth:             address!("4200000000000000000000000000000000000006"),
            usdc:             base_usdc,
            universal_router: address!("6fF5693b99212Da76ad316178A184AB56D299b43"),
            manager:          Some(address!("8b3192f5eEBD8579568A2Ed41E6FEB402f93f73F")),
            vault:            Some(address!("0C8865bf7FB30c06B20a9d518D5f6C984a300d15")),
            default_pool:     Some(default_pool(base_usdc)),
            query_pool:       Some(query_pool(base_usdc))
        },
    ]
}
