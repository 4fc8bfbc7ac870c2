use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use num_bigint::BigUint;
use tracing::{debug, info, warn};

use crate::config::{ChainConfig, RetryConfig};
use crate::erc20::Erc20;
use crate::error::ClientError;
use crate::tx::{TxFailure, TxHash};
use crate::utils::{felt_to_hex, format_units, max_u256, Address};
use crate::wallet::WalletSigner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Checking,
    Native,
    Approved,
    NeedsApproval,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub token: Address,
    pub spender: Address,
    /// `None` until the first successful query, and always for the native asset.
    pub allowance: Option<BigUint>,
    pub status: ApprovalStatus,
    pub message: Option<String>,
}

impl ApprovalRecord {
    fn new(token: Address, spender: Address, status: ApprovalStatus) -> Self {
        Self {
            token,
            spender,
            allowance: None,
            status,
            message: None,
        }
    }

    pub fn status_text(&self, symbol: &str, decimals: u8) -> String {
        match self.status {
            ApprovalStatus::Native => format!("({symbol} - No approval needed)"),
            ApprovalStatus::Checking => "(Checking...)".to_string(),
            ApprovalStatus::Approved => match &self.allowance {
                Some(value) if *value == max_u256() => "(Approved: Max)".to_string(),
                Some(value) => {
                    let formatted = format_units(value, decimals);
                    let short: String = formatted.chars().take(8).collect();
                    format!("(Approved: ~{short})")
                }
                None => "(Approved: Yes)".to_string(),
            },
            ApprovalStatus::NeedsApproval => {
                let granted = self
                    .allowance
                    .as_ref()
                    .map(|value| format_units(value, decimals))
                    .unwrap_or_else(|| "0".to_string());
                format!("(Requires Approval: {granted} granted)")
            }
            ApprovalStatus::Error => "(Error checking status)".to_string(),
        }
    }

    pub fn needs_action(&self) -> bool {
        matches!(self.status, ApprovalStatus::NeedsApproval | ApprovalStatus::Error)
    }
}

#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    pub spender: Address,
    pub native_token: Address,
    pub threshold: BigUint,
    pub retry: RetryConfig,
}

impl ApprovalConfig {
    pub fn from_chain(config: &ChainConfig) -> Self {
        Self {
            spender: config.dex_address,
            native_token: config.native.address,
            threshold: config.approval_threshold.clone(),
            retry: config.retry.clone(),
        }
    }
}

#[derive(Debug)]
pub enum ApprovalOutcome {
    Skipped(ApprovalRecord),
    InFlight,
    Confirmed { tx_hash: TxHash, record: ApprovalRecord },
    Failed { error: ClientError, record: ApprovalRecord },
}

type PairKey = (Address, Address);

pub struct ApprovalReconciler<S> {
    signer: Arc<S>,
    config: ApprovalConfig,
    records: Mutex<HashMap<PairKey, ApprovalRecord>>,
    pending: Mutex<HashSet<PairKey>>,
}

impl<S: WalletSigner> ApprovalReconciler<S> {
    pub fn new(signer: Arc<S>, config: ApprovalConfig) -> Self {
        Self {
            signer,
            config,
            records: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    pub fn record(&self, token: Address, spender: Address) -> Option<ApprovalRecord> {
        lock(&self.records).get(&(token, spender)).cloned()
    }

    pub fn is_pending(&self, token: Address, spender: Address) -> bool {
        lock(&self.pending).contains(&(token, spender))
    }

    pub fn permits_action(&self, token: Address, spender: Address) -> bool {
        if self.is_pending(token, spender) {
            return false;
        }
        matches!(
            self.record(token, spender).map(|record| record.status),
            Some(ApprovalStatus::Native | ApprovalStatus::Approved)
        )
    }

    pub async fn check_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ApprovalRecord {
        if token == self.config.native_token {
            let record = ApprovalRecord::new(token, spender, ApprovalStatus::Native);
            self.store(record.clone());
            return record;
        }
        self.store(ApprovalRecord::new(token, spender, ApprovalStatus::Checking));

        let mut erc20 = Erc20::new(self.signer.clone(), token);
        erc20.retry = self.config.retry.clone();
        let record = match erc20.allowance(owner, spender).await {
            Ok(allowance) => {
                let status = if allowance >= self.config.threshold {
                    ApprovalStatus::Approved
                } else {
                    ApprovalStatus::NeedsApproval
                };
                debug!(token = %felt_to_hex(token), allowance = %allowance, ?status, "allowance checked");
                ApprovalRecord {
                    token,
                    spender,
                    allowance: Some(allowance),
                    status,
                    message: None,
                }
            }
            Err(err) => {
                warn!(token = %felt_to_hex(token), error = %err, "allowance check failed");
                ApprovalRecord {
                    token,
                    spender,
                    allowance: None,
                    status: ApprovalStatus::Error,
                    message: Some(format!("Error checking allowance: {}", err.user_message())),
                }
            }
        };
        self.store(record.clone());
        record
    }

    pub async fn approve_max(&self, token: Address, spender: Address) -> ApprovalOutcome {
        let Some(_pending) = PendingGuard::acquire(&self.pending, (token, spender)) else {
            debug!(token = %felt_to_hex(token), "approval already in flight");
            return ApprovalOutcome::InFlight;
        };
        let owner = self.signer.address();
        let current = match self.record(token, spender) {
            Some(record) if record.status != ApprovalStatus::Checking => record,
            _ => self.check_allowance(token, owner, spender).await,
        };
        if matches!(current.status, ApprovalStatus::Native | ApprovalStatus::Approved) {
            return ApprovalOutcome::Skipped(current);
        }

        info!(token = %felt_to_hex(token), spender = %felt_to_hex(spender), "approving max allowance");
        self.store(ApprovalRecord {
            status: ApprovalStatus::Checking,
            message: None,
            ..current.clone()
        });

        let mut erc20 = Erc20::new(self.signer.clone(), token);
        erc20.retry = self.config.retry.clone();
        let tx_hash = match erc20.approve(spender, &max_u256()).await {
            Ok(tx_hash) => tx_hash,
            Err(error) => return self.restore(current, error),
        };
        info!(tx_hash = %felt_to_hex(tx_hash), "approval sent, waiting for confirmation");
        match self.signer.wait_for_confirmation(tx_hash).await {
            Ok(()) => {}
            Err(failure @ TxFailure::Unknown(_)) => {
                // The approval may still land.
                warn!(
                    tx_hash = %felt_to_hex(tx_hash),
                    error = %failure,
                    "approval outcome unknown, re-reading allowance"
                );
                let record = self.check_allowance(token, owner, spender).await;
                if record.status == ApprovalStatus::Approved {
                    return ApprovalOutcome::Confirmed { tx_hash, record };
                }
                let error = ClientError::from(failure);
                let record = ApprovalRecord {
                    message: Some(error.user_message()),
                    ..record
                };
                self.store(record.clone());
                return ApprovalOutcome::Failed { error, record };
            }
            Err(failure) => return self.restore(current, ClientError::from(failure)),
        }

        let record = self.check_allowance(token, owner, spender).await;
        ApprovalOutcome::Confirmed { tx_hash, record }
    }

    fn restore(&self, previous: ApprovalRecord, error: ClientError) -> ApprovalOutcome {
        warn!(token = %felt_to_hex(previous.token), error = %error, "approval failed");
        let record = ApprovalRecord {
            message: Some(error.user_message()),
            ..previous
        };
        self.store(record.clone());
        ApprovalOutcome::Failed { error, record }
    }

    fn store(&self, record: ApprovalRecord) {
        lock(&self.records).insert((record.token, record.spender), record);
    }
}

struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<PairKey>>,
    key: PairKey,
}

impl<'a> PendingGuard<'a> {
    fn acquire(pending: &'a Mutex<HashSet<PairKey>>, key: PairKey) -> Option<Self> {
        if lock(pending).insert(key) {
            Some(Self { pending, key })
        } else {
            None
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
