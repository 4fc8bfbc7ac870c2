//! Ambient DEX client: wallet readiness, token approvals and DEX actions.

mod actions;
mod approval;
mod config;
mod engine;
mod erc20;
mod error;
mod session;
mod status;
mod tx;
mod utils;
mod wallet;

pub use actions::ActionRunner;
pub use approval::{
    ApprovalConfig, ApprovalOutcome, ApprovalReconciler, ApprovalRecord, ApprovalStatus,
};
pub use config::{
    default_approval_threshold, load_config, parse_config, ChainConfig, ConfirmationConfig,
    Deployment, RetryConfig, TokenInfo, DEFAULT_SLIPPAGE_BPS, DEFAULT_TICK_SPACING,
};
pub use engine::{
    price_limits, range_around, DexEngine, PoolView, PriceLimits, SwapOrder, TickRange,
    MAX_SQRT_PRICE, MAX_TICK, MIN_SQRT_PRICE, MIN_TICK,
};
pub use erc20::{approve_call, resolve_token_decimals, Erc20};
pub use error::ClientError;
pub use session::{SdkController, SdkPhase, SdkState, WALLET_NOT_CONNECTED};
pub use status::{session_banner, ActionGuard, ActionState, StatusKind, StatusLine};
pub use tx::{RevertReason, TxFailure, TxHash};
pub use utils::{
    biguint_to_u256_felts, felt_to_hex, format_chain_id, format_units, max_u256, parse_chain_id,
    parse_felt, parse_units, u256_felts_to_biguint, Address,
};
pub use wallet::{
    ConnectionKey, LocalKeyTransport, RpcAccount, StarknetSigner, WalletConnection,
    WalletSigner, WalletTransport,
};
