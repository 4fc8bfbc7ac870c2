use std::collections::HashSet;
use std::fs;
use std::path::Path;

use num_bigint::BigUint;
use serde::Deserialize;
use starknet::core::types::Felt;
use url::Url;

use crate::error::ClientError;
use crate::utils::{format_chain_id, max_u256, parse_chain_id, parse_felt, Address};

pub const DEFAULT_SLIPPAGE_BPS: u32 = 100;
pub const DEFAULT_TICK_SPACING: u32 = 60;
pub const MAX_SLIPPAGE_BPS: u32 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_polls: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub dex_address: Address,
    pub pool_index: u64,
    pub tick_spacing: u32,
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_name: String,
    pub chain_id: Felt,
    pub rpc_url: Url,
    pub dex_address: Address,
    pub pool_index: u64,
    pub native: TokenInfo,
    pub tokens: Vec<TokenInfo>,
    /// Tokens configured without `decimals`; read from the contract once a signer exists.
    pub unresolved_decimals: Vec<Address>,
    /// Allowance at or above this value counts as "practically unlimited".
    pub approval_threshold: BigUint,
    pub slippage_bps: u32,
    pub tick_spacing: u32,
    pub retry: RetryConfig,
    pub confirmation: ConfirmationConfig,
}

impl ChainConfig {
    pub fn new(chain_name: impl Into<String>, chain_id: Felt, rpc_url: Url, dex_address: Address) -> Self {
        Self {
            chain_name: chain_name.into(),
            chain_id,
            rpc_url,
            dex_address,
            pool_index: 420,
            native: TokenInfo {
                symbol: "ETH".to_string(),
                address: Felt::ZERO,
                decimals: 18,
            },
            tokens: Vec::new(),
            unresolved_decimals: Vec::new(),
            approval_threshold: default_approval_threshold(),
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            tick_spacing: DEFAULT_TICK_SPACING,
            retry: RetryConfig::default(),
            confirmation: ConfirmationConfig::default(),
        }
    }

    pub fn deployment(&self) -> Deployment {
        Deployment {
            dex_address: self.dex_address,
            pool_index: self.pool_index,
            tick_spacing: self.tick_spacing,
        }
    }

    pub fn is_native(&self, token: Address) -> bool {
        token == self.native.address
    }

    pub fn resolve_token(&self, value: &str) -> Result<TokenInfo, ClientError> {
        let found = std::iter::once(&self.native)
            .chain(self.tokens.iter())
            .find(|token| token.symbol.eq_ignore_ascii_case(value));
        if let Some(token) = found {
            return Ok(token.clone());
        }
        let address = parse_felt(value)
            .map_err(|_| ClientError::InvalidInput(format!("unknown token: {value}")))?;
        std::iter::once(&self.native)
            .chain(self.tokens.iter())
            .find(|token| token.address == address)
            .cloned()
            .ok_or_else(|| ClientError::InvalidInput(format!("token {value} is not configured")))
    }

    pub fn chain_label(&self) -> String {
        format!("{} (chain id {})", self.chain_name, format_chain_id(self.chain_id))
    }
}

pub fn default_approval_threshold() -> BigUint {
    max_u256() / BigUint::from(2u8)
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    rpc_url: String,
    chain_name: String,
    chain_id: String,
    dex_address: String,
    pool_index: Option<u64>,
    native: Option<RawToken>,
    #[serde(default)]
    tokens: Vec<RawToken>,
    approval_threshold: Option<String>,
    slippage_bps: Option<u32>,
    tick_spacing: Option<u32>,
    retry: Option<RetryConfig>,
    confirmation: Option<ConfirmationConfig>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    symbol: String,
    address: String,
    decimals: Option<u8>,
}

pub fn load_config(path: &Path) -> Result<ChainConfig, ClientError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| ClientError::Config(format!("{}: {err}", path.display())))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<ChainConfig, ClientError> {
    let raw: RawConfig = toml::from_str(contents)?;
    finalize_config(raw)
}

fn finalize_config(raw: RawConfig) -> Result<ChainConfig, ClientError> {
    let rpc_url = Url::parse(&raw.rpc_url).map_err(|e| ClientError::Config(format!("rpc_url: {e}")))?;
    let chain_name = raw.chain_name.trim().to_string();
    if chain_name.is_empty() {
        return Err(ClientError::Config("chain_name must not be empty".to_string()));
    }
    let chain_id =
        parse_chain_id(&raw.chain_id).map_err(|e| ClientError::Config(format!("chain_id: {e}")))?;
    let dex_address =
        parse_felt(&raw.dex_address).map_err(|e| ClientError::Config(format!("dex_address: {e}")))?;
    if dex_address == Felt::ZERO {
        return Err(ClientError::Config("dex_address cannot be zero".to_string()));
    }

    let mut config = ChainConfig::new(chain_name, chain_id, rpc_url, dex_address);
    if let Some(pool_index) = raw.pool_index {
        config.pool_index = pool_index;
    }
    if let Some(native) = raw.native {
        let (native, decimals) = finalize_token(native)?;
        config.native = TokenInfo {
            decimals: decimals.ok_or_else(|| {
                ClientError::Config("native decimals must be set".to_string())
            })?,
            ..native
        };
    }

    let mut symbols = HashSet::new();
    symbols.insert(config.native.symbol.to_ascii_uppercase());
    for token in raw.tokens {
        let (token, decimals) = finalize_token(token)?;
        if token.address == config.native.address {
            return Err(ClientError::Config(format!(
                "token {} uses the native asset address",
                token.symbol
            )));
        }
        if !symbols.insert(token.symbol.to_ascii_uppercase()) {
            return Err(ClientError::Config(format!("duplicate token symbol {}", token.symbol)));
        }
        if decimals.is_none() {
            config.unresolved_decimals.push(token.address);
        }
        config.tokens.push(TokenInfo {
            decimals: decimals.unwrap_or_default(),
            ..token
        });
    }

    if let Some(threshold) = raw.approval_threshold {
        let value = parse_felt_or_big(&threshold)
            .ok_or_else(|| ClientError::Config(format!("approval_threshold: invalid value {threshold}")))?;
        if value > max_u256() {
            return Err(ClientError::Config("approval_threshold exceeds u256".to_string()));
        }
        config.approval_threshold = value;
    }
    if let Some(slippage_bps) = raw.slippage_bps {
        if slippage_bps >= MAX_SLIPPAGE_BPS {
            return Err(ClientError::Config("slippage_bps must be below 10000".to_string()));
        }
        config.slippage_bps = slippage_bps;
    }
    if let Some(tick_spacing) = raw.tick_spacing {
        if tick_spacing == 0 {
            return Err(ClientError::Config("tick_spacing must be >= 1".to_string()));
        }
        config.tick_spacing = tick_spacing;
    }
    if let Some(retry) = raw.retry {
        if retry.max_attempts == 0 {
            return Err(ClientError::Config("retry.max_attempts must be >= 1".to_string()));
        }
        config.retry = retry;
    }
    if let Some(confirmation) = raw.confirmation {
        if confirmation.max_polls == 0 {
            return Err(ClientError::Config("confirmation.max_polls must be >= 1".to_string()));
        }
        config.confirmation = confirmation;
    }
    Ok(config)
}

fn finalize_token(raw: RawToken) -> Result<(TokenInfo, Option<u8>), ClientError> {
    let symbol = raw.symbol.trim().to_string();
    if symbol.is_empty() {
        return Err(ClientError::Config("token symbol must not be empty".to_string()));
    }
    let address = parse_felt(&raw.address)
        .map_err(|e| ClientError::Config(format!("token {symbol} address: {e}")))?;
    Ok((
        TokenInfo {
            symbol,
            address,
            decimals: 0,
        },
        raw.decimals,
    ))
}

fn parse_felt_or_big(value: &str) -> Option<BigUint> {
    let value = value.trim();
    match value.strip_prefix("0x") {
        Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
        None => BigUint::parse_bytes(value.as_bytes(), 10),
    }
}
