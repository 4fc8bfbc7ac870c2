use std::error::Error as StdError;

use starknet::accounts::AccountError;
use starknet::core::types::{ContractExecutionError, Felt, StarknetError};
use starknet::providers::ProviderError;
use tokio::time::{sleep, Duration};

use crate::config::RetryConfig;
use crate::error::ClientError;

pub type TxHash = Felt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    PriceMoved,
    SlippageExceeded,
    TickBounds,
    Other(String),
    Unspecified,
}

impl RevertReason {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return RevertReason::Unspecified;
        }
        if let Some(reason) = Self::from_code(raw) {
            return reason;
        }
        // Account frames append ENTRYPOINT_FAILED after the DEX code.
        short_codes(raw)
            .find_map(Self::from_code)
            .unwrap_or_else(|| RevertReason::Other(raw.to_string()))
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "D" => Some(RevertReason::PriceMoved),
            "RC" => Some(RevertReason::SlippageExceeded),
            "TL" | "TU" => Some(RevertReason::TickBounds),
            _ => None,
        }
    }
}

/// Decoded short strings, in order, from text like `0x44 ('D')`.
fn short_codes(raw: &str) -> impl Iterator<Item = &str> {
    raw.split("('").skip(1).filter_map(|rest| {
        let end = rest.find("')")?;
        Some(&rest[..end])
    })
}

fn innermost_message(err: &ContractExecutionError) -> &str {
    let mut current = err;
    loop {
        match current {
            ContractExecutionError::Nested(frame) => current = &*frame.error,
            ContractExecutionError::Message(message) => return message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxFailure {
    #[error("transaction rejected by wallet")]
    Rejected,
    #[error("insufficient funds for transaction")]
    InsufficientFunds,
    #[error("transaction reverted: {0:?}")]
    Reverted(RevertReason),
    #[error("{0}")]
    Unknown(String),
}

impl TxFailure {
    pub fn reverted(raw: &str) -> Self {
        TxFailure::Reverted(RevertReason::parse(raw))
    }

    pub fn user_message(&self) -> String {
        match self {
            TxFailure::Rejected => "Transaction rejected by wallet.".to_string(),
            TxFailure::InsufficientFunds => "Insufficient funds for transaction.".to_string(),
            TxFailure::Reverted(RevertReason::PriceMoved) => {
                "Reverted with 'D' error (price check failed, likely movement). Try again.".to_string()
            }
            TxFailure::Reverted(RevertReason::SlippageExceeded) => {
                "Reverted with 'RC' error (slippage check failed). Try again.".to_string()
            }
            TxFailure::Reverted(RevertReason::TickBounds) => {
                "Reverted with 'TL'/'TU' error (tick bounds). Range might be invalid.".to_string()
            }
            TxFailure::Reverted(RevertReason::Other(reason)) => {
                format!("Transaction reverted: {reason}")
            }
            TxFailure::Reverted(RevertReason::Unspecified) => {
                "Transaction reverted by contract.".to_string()
            }
            TxFailure::Unknown(message) => message.clone(),
        }
    }

    pub fn from_provider_error(err: &ProviderError) -> Self {
        match err {
            ProviderError::StarknetError(StarknetError::InsufficientAccountBalance) => {
                TxFailure::InsufficientFunds
            }
            ProviderError::StarknetError(StarknetError::TransactionExecutionError(data)) => {
                TxFailure::reverted(innermost_message(&data.execution_error))
            }
            ProviderError::StarknetError(StarknetError::ContractError(data)) => {
                TxFailure::reverted(innermost_message(&data.revert_error))
            }
            other => TxFailure::Unknown(other.to_string()),
        }
    }

    pub fn from_account_error<S>(err: &AccountError<S>) -> Self
    where
        S: StdError,
    {
        match err {
            AccountError::Signing(_) => TxFailure::Rejected,
            AccountError::Provider(inner) => TxFailure::from_provider_error(inner),
            other => TxFailure::Unknown(other.to_string()),
        }
    }
}

/// Bounded retry for read-only RPC calls. Transactions never go through here.
pub(crate) async fn with_retry<F, Fut, T>(retry: RetryConfig, mut f: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= retry.max_attempts.max(1) {
                    return Err(err);
                }
                sleep(Duration::from_millis(retry.delay_ms)).await;
            }
        }
    }
}
