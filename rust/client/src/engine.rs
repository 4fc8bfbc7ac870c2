use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use starknet::core::types::{Call, Felt, FunctionCall};
use starknet::core::utils::get_selector_from_name;
use tracing::info;

use crate::config::{Deployment, RetryConfig, MAX_SLIPPAGE_BPS};
use crate::error::ClientError;
use crate::tx::{with_retry, TxFailure, TxHash};
use crate::utils::{
    biguint_to_u256_felts, bool_to_felt, felt_to_hex, i32_to_signed_felts, signed_felts_to_i32,
    u256_felts_to_biguint, Address,
};
use crate::wallet::WalletSigner;

pub const MIN_TICK: i32 = -665_454;
pub const MAX_TICK: i32 = 831_818;
pub const MIN_SQRT_PRICE: u128 = 65_538;
pub const MAX_SQRT_PRICE: u128 = 21_267_430_153_580_247_136_652_501_917_186_561_138;

const BPS_DENOM: u64 = 10_000;
/// `sqrt(ratio)` is carried with 8 decimal digits.
const SQRT_SCALE: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolView {
    pub base: Address,
    pub quote: Address,
    pub pool_index: u64,
}

impl PoolView {
    pub fn contains(&self, token: Address) -> bool {
        token == self.base || token == self.quote
    }

    fn calldata(&self) -> Vec<Felt> {
        vec![self.base, self.quote, Felt::from(self.pool_index)]
    }
}

#[derive(Debug, Clone)]
pub struct SwapOrder {
    pub token_in: Address,
    pub token_out: Address,
    pub amount: BigUint,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRange {
    pub lower: i32,
    pub upper: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLimits {
    pub lower: BigUint,
    pub upper: BigUint,
}

pub struct DexEngine<S> {
    chain_name: String,
    signer: Arc<S>,
    deployment: Deployment,
    retry: RetryConfig,
}

impl<S> std::fmt::Debug for DexEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexEngine")
            .field("chain_name", &self.chain_name)
            .field("deployment", &self.deployment)
            .finish_non_exhaustive()
    }
}

impl<S: WalletSigner> DexEngine<S> {
    pub fn new(chain_name: impl Into<String>, signer: Arc<S>, deployment: Deployment) -> Self {
        Self {
            chain_name: chain_name.into(),
            signer,
            deployment,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub fn signer(&self) -> &Arc<S> {
        &self.signer
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn pool(&self, a: Address, b: Address) -> Result<PoolView, ClientError> {
        if a == b {
            return Err(ClientError::InvalidInput("pool tokens must differ".to_string()));
        }
        let (base, quote) = if a < b { (a, b) } else { (b, a) };
        Ok(PoolView {
            base,
            quote,
            pool_index: self.deployment.pool_index,
        })
    }

    pub async fn spot_sqrt_price(&self, pool: &PoolView) -> Result<BigUint, ClientError> {
        let result = self.view("query_price", pool.calldata()).await?;
        if result.len() < 2 {
            return Err(ClientError::Rpc("invalid price response".to_string()));
        }
        u256_felts_to_biguint(&result[0], &result[1])
    }

    pub async fn spot_tick(&self, pool: &PoolView) -> Result<i32, ClientError> {
        let result = self.view("query_curve_tick", pool.calldata()).await?;
        if result.len() < 2 {
            return Err(ClientError::Rpc("invalid tick response".to_string()));
        }
        signed_felts_to_i32(&result[0], &result[1])
    }

    pub async fn swap(&self, order: SwapOrder) -> Result<TxHash, ClientError> {
        ensure_positive(&order.amount)?;
        let pool = self.pool(order.token_in, order.token_out)?;
        let is_buy = order.token_in == pool.base;
        let in_base_qty = is_buy;
        let sqrt_price = self.spot_sqrt_price(&pool).await?;
        let limits = price_limits(&sqrt_price, order.slippage_bps)?;
        let limit = if is_buy { limits.upper } else { limits.lower };

        let (qty_low, qty_high) = biguint_to_u256_felts(&order.amount)?;
        let (limit_low, limit_high) = biguint_to_u256_felts(&limit)?;
        let mut calldata = pool.calldata();
        calldata.extend([
            bool_to_felt(is_buy),
            bool_to_felt(in_base_qty),
            qty_low,
            qty_high,
            limit_low,
            limit_high,
            Felt::ZERO,
            Felt::ZERO,
        ]);
        info!(
            pool_index = pool.pool_index,
            is_buy,
            limit = %limit,
            "submitting swap"
        );
        self.invoke("swap", calldata).await
    }

    pub async fn mint_ambient(
        &self,
        pool: &PoolView,
        token: Address,
        amount: &BigUint,
    ) -> Result<TxHash, ClientError> {
        ensure_positive(amount)?;
        let in_base_qty = self.side_of(pool, token)?;
        let (qty_low, qty_high) = biguint_to_u256_felts(amount)?;
        let (lo_low, lo_high) = biguint_to_u256_felts(&BigUint::from(MIN_SQRT_PRICE))?;
        let (hi_low, hi_high) = biguint_to_u256_felts(&BigUint::from(MAX_SQRT_PRICE))?;
        let mut calldata = pool.calldata();
        calldata.extend([
            bool_to_felt(in_base_qty),
            qty_low,
            qty_high,
            lo_low,
            lo_high,
            hi_low,
            hi_high,
        ]);
        info!(pool_index = pool.pool_index, in_base_qty, "submitting ambient mint");
        self.invoke("mint_ambient", calldata).await
    }

    pub async fn mint_range(
        &self,
        pool: &PoolView,
        token: Address,
        amount: &BigUint,
        slippage_bps: u32,
    ) -> Result<TxHash, ClientError> {
        ensure_positive(amount)?;
        let in_base_qty = self.side_of(pool, token)?;
        let tick = self.spot_tick(pool).await?;
        let range = range_around(tick, self.deployment.tick_spacing)?;
        let sqrt_price = self.spot_sqrt_price(pool).await?;
        let limits = price_limits(&sqrt_price, slippage_bps)?;

        let (qty_low, qty_high) = biguint_to_u256_felts(amount)?;
        let (lo_low, lo_high) = biguint_to_u256_felts(&limits.lower)?;
        let (hi_low, hi_high) = biguint_to_u256_felts(&limits.upper)?;
        let mut calldata = pool.calldata();
        calldata.extend(i32_to_signed_felts(range.lower));
        calldata.extend(i32_to_signed_felts(range.upper));
        calldata.extend([
            bool_to_felt(in_base_qty),
            qty_low,
            qty_high,
            lo_low,
            lo_high,
            hi_low,
            hi_high,
        ]);
        info!(
            pool_index = pool.pool_index,
            tick,
            lower = range.lower,
            upper = range.upper,
            "submitting range mint"
        );
        self.invoke("mint_range", calldata).await
    }

    pub async fn wait(&self, tx_hash: TxHash) -> Result<(), TxFailure> {
        self.signer.wait_for_confirmation(tx_hash).await
    }

    fn side_of(&self, pool: &PoolView, token: Address) -> Result<bool, ClientError> {
        if !pool.contains(token) {
            return Err(ClientError::InvalidInput(format!(
                "token {} is not part of the pool",
                felt_to_hex(token)
            )));
        }
        Ok(token == pool.base)
    }

    async fn view(&self, entrypoint: &str, calldata: Vec<Felt>) -> Result<Vec<Felt>, ClientError> {
        let selector = get_selector_from_name(entrypoint)
            .map_err(|err| ClientError::InvalidInput(err.to_string()))?;
        let call = FunctionCall {
            contract_address: self.deployment.dex_address,
            entry_point_selector: selector,
            calldata,
        };
        with_retry(self.retry.clone(), || async {
            self.signer.call(call.clone()).await
        })
        .await
    }

    async fn invoke(&self, entrypoint: &str, calldata: Vec<Felt>) -> Result<TxHash, ClientError> {
        let selector = get_selector_from_name(entrypoint)
            .map_err(|err| ClientError::InvalidInput(err.to_string()))?;
        let call = Call {
            to: self.deployment.dex_address,
            selector,
            calldata,
        };
        let tx_hash = self.signer.execute(vec![call]).await?;
        info!(tx_hash = %felt_to_hex(tx_hash), entrypoint, "transaction sent");
        Ok(tx_hash)
    }
}

fn ensure_positive(amount: &BigUint) -> Result<(), ClientError> {
    if amount.is_zero() {
        return Err(ClientError::InvalidInput("amount must be greater than zero".to_string()));
    }
    Ok(())
}

pub fn range_around(tick: i32, spacing: u32) -> Result<TickRange, ClientError> {
    let spacing = i32::try_from(spacing)
        .ok()
        .filter(|s| *s > 0 && *s < MAX_TICK)
        .ok_or_else(|| ClientError::InvalidInput(format!("invalid tick spacing {spacing}")))?;
    let mut min_aligned = MIN_TICK.div_euclid(spacing) * spacing;
    if min_aligned < MIN_TICK {
        min_aligned += spacing;
    }
    let max_aligned = MAX_TICK.div_euclid(spacing) * spacing;
    let lower = (tick.div_euclid(spacing) * spacing).clamp(min_aligned, max_aligned - spacing);
    Ok(TickRange {
        lower,
        upper: lower + spacing,
    })
}

pub fn price_limits(sqrt_price: &BigUint, slippage_bps: u32) -> Result<PriceLimits, ClientError> {
    if slippage_bps >= MAX_SLIPPAGE_BPS {
        return Err(ClientError::InvalidInput("slippage must be below 100%".to_string()));
    }
    let bps = u64::from(slippage_bps);
    let lower = scale_by_sqrt_ratio(sqrt_price, BPS_DENOM - bps);
    let upper = scale_by_sqrt_ratio(sqrt_price, BPS_DENOM + bps);
    let min = BigUint::from(MIN_SQRT_PRICE);
    let max = BigUint::from(MAX_SQRT_PRICE);
    Ok(PriceLimits {
        lower: lower.clamp(min.clone(), max.clone()),
        upper: upper.clamp(min, max),
    })
}

fn scale_by_sqrt_ratio(value: &BigUint, numerator_bps: u64) -> BigUint {
    // sqrt(n / 10^4) * 10^8 == sqrt(n * 10^12)
    let factor = (BigUint::from(numerator_bps) * BigUint::from(1_000_000_000_000u64)).sqrt();
    value * factor / BigUint::from(SQRT_SCALE)
}
