use std::future::Future;
use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero;
use tracing::{info, warn};

use crate::config::TokenInfo;
use crate::engine::{DexEngine, SwapOrder};
use crate::error::ClientError;
use crate::status::{ActionGuard, ActionState, StatusLine};
use crate::tx::TxHash;
use crate::utils::{felt_to_hex, parse_units};
use crate::wallet::WalletSigner;

const BUSY: &str = "Another action is already in progress.";

pub struct ActionRunner<S> {
    engine: Arc<DexEngine<S>>,
    state: Arc<ActionState>,
    slippage_bps: u32,
}

impl<S: WalletSigner> ActionRunner<S> {
    pub fn new(engine: Arc<DexEngine<S>>, state: Arc<ActionState>, slippage_bps: u32) -> Self {
        Self {
            engine,
            state,
            slippage_bps,
        }
    }

    pub fn state(&self) -> &Arc<ActionState> {
        &self.state
    }

    pub async fn swap(&self, token_in: &TokenInfo, token_out: &TokenInfo, amount: &str) -> StatusLine {
        let Some(guard) = self.state.begin() else {
            return StatusLine::error(BUSY);
        };
        guard.report(StatusLine::info("Processing swap..."));
        let Some(raw) = parse_amount(&guard, amount, token_in.decimals) else {
            return self.state.status();
        };
        if token_in.address == token_out.address {
            let line = StatusLine::error("Swap failed: Input and output tokens cannot be the same.");
            guard.report(line.clone());
            return line;
        }
        guard.report(StatusLine::info(format!(
            "Swapping {amount} {} for {}...",
            token_in.symbol, token_out.symbol
        )));
        let order = SwapOrder {
            token_in: token_in.address,
            token_out: token_out.address,
            amount: raw,
            slippage_bps: self.slippage_bps,
        };
        self.submit(&guard, "Swap", self.engine.swap(order)).await
    }

    pub async fn add_ambient(
        &self,
        pair: (&TokenInfo, &TokenInfo),
        token: &TokenInfo,
        amount: &str,
    ) -> StatusLine {
        let Some(guard) = self.state.begin() else {
            return StatusLine::error(BUSY);
        };
        guard.report(StatusLine::info(format!(
            "Processing Add Ambient Liquidity ({amount} {} for {}/{})...",
            token.symbol, pair.0.symbol, pair.1.symbol
        )));
        let Some(raw) = parse_amount(&guard, amount, token.decimals) else {
            return self.state.status();
        };
        let pool = match self.engine.pool(pair.0.address, pair.1.address) {
            Ok(pool) => pool,
            Err(err) => return fail(&guard, "Add Ambient Liquidity", &err),
        };
        guard.report(StatusLine::info(format!(
            "Adding {amount} {} as ambient liquidity...",
            token.symbol
        )));
        self.submit(
            &guard,
            "Add Ambient Liquidity",
            self.engine.mint_ambient(&pool, token.address, &raw),
        )
        .await
    }

    pub async fn add_concentrated(
        &self,
        pair: (&TokenInfo, &TokenInfo),
        token: &TokenInfo,
        amount: &str,
    ) -> StatusLine {
        let Some(guard) = self.state.begin() else {
            return StatusLine::error(BUSY);
        };
        guard.report(StatusLine::info(format!(
            "Processing Add Concentrated Liquidity ({amount} {} for {}/{})...",
            token.symbol, pair.0.symbol, pair.1.symbol
        )));
        let Some(raw) = parse_amount(&guard, amount, token.decimals) else {
            return self.state.status();
        };
        let pool = match self.engine.pool(pair.0.address, pair.1.address) {
            Ok(pool) => pool,
            Err(err) => return fail(&guard, "Add Concentrated Liquidity", &err),
        };
        guard.report(StatusLine::info(format!(
            "Adding {amount} {} in a single tick-spacing range with price limits...",
            token.symbol
        )));
        self.submit(
            &guard,
            "Add Concentrated Liquidity",
            self.engine
                .mint_range(&pool, token.address, &raw, self.slippage_bps),
        )
        .await
    }

    async fn submit<Fut>(&self, guard: &ActionGuard<'_>, label: &str, sent: Fut) -> StatusLine
    where
        Fut: Future<Output = Result<TxHash, ClientError>>,
    {
        let tx_hash = match sent.await {
            Ok(tx_hash) => tx_hash,
            Err(err) => return fail(guard, label, &err),
        };
        let hash = felt_to_hex(tx_hash);
        guard.report(StatusLine::info(format!(
            "{label} transaction sent: {hash}. Waiting for confirmation..."
        )));
        let line = match self.engine.wait(tx_hash).await {
            Ok(()) => {
                info!(tx_hash = %hash, action = label, "action confirmed");
                StatusLine::success(format!("{label} successful! Tx: {hash}"))
            }
            Err(failure) => {
                warn!(tx_hash = %hash, action = label, error = %failure, "action failed after submission");
                StatusLine::error(format!("{label} failed: {}", failure.user_message()))
            }
        };
        guard.report(line.clone());
        line
    }
}

fn parse_amount(guard: &ActionGuard<'_>, amount: &str, decimals: u8) -> Option<BigUint> {
    match parse_units(amount, decimals) {
        Ok(raw) if !raw.is_zero() => Some(raw),
        _ => {
            guard.report(StatusLine::error("Error: Invalid amount specified"));
            None
        }
    }
}

fn fail(guard: &ActionGuard<'_>, label: &str, err: &ClientError) -> StatusLine {
    warn!(action = label, error = %err, "action failed");
    let line = StatusLine::error(format!("{label} failed: {}", err.user_message()));
    guard.report(line.clone());
    line
}
