#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ambient_client::{
    biguint_to_u256_felts, u256_felts_to_biguint, ChainConfig, ClientError, RetryConfig,
    TxFailure, TxHash, WalletSigner, WalletTransport,
};
use async_trait::async_trait;
use num_bigint::BigUint;
use starknet::core::types::{Call, Felt, FunctionCall};
use starknet::core::utils::get_selector_from_name;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use url::Url;

pub const EXPECTED_CHAIN: u64 = 1923;
pub const WRONG_CHAIN: u64 = 1;
pub const DEX: u64 = 0xd3c;
pub const TOKEN: u64 = 0x70c;
pub const OTHER_TOKEN: u64 = 0x70d;

pub fn felt(value: u64) -> Felt {
    Felt::from(value)
}

pub fn chain_config() -> ChainConfig {
    let mut config = ChainConfig::new(
        "swell",
        felt(EXPECTED_CHAIN),
        Url::parse("http://127.0.0.1:5050").expect("url"),
        felt(DEX),
    );
    config.retry = RetryConfig {
        max_attempts: 1,
        delay_ms: 0,
    };
    config
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecMode {
    Succeed,
    Reject,
    Revert(String),
    InsufficientFunds,
    /// Confirmation wait gives up; `lands` decides whether the calls applied.
    Unconfirmed { lands: bool },
}

/// On-chain state shared by every signer a transport hands out.
pub struct Ledger {
    allowances: Mutex<HashMap<(Felt, Felt, Felt), BigUint>>,
    failing_tokens: Mutex<HashSet<Felt>>,
    decimals: Mutex<HashMap<Felt, u8>>,
    submitted: Mutex<HashMap<TxHash, Vec<Call>>>,
    mode: Mutex<ExecMode>,
    next_tx: AtomicU64,
    pub allowance_calls: AtomicUsize,
    pub executions: AtomicUsize,
    pub block_calls: AtomicUsize,
}

impl Ledger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            allowances: Mutex::new(HashMap::new()),
            failing_tokens: Mutex::new(HashSet::new()),
            decimals: Mutex::new(HashMap::new()),
            submitted: Mutex::new(HashMap::new()),
            mode: Mutex::new(ExecMode::Succeed),
            next_tx: AtomicU64::new(0x1000),
            allowance_calls: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_allowance(&self, token: Felt, owner: Felt, spender: Felt, value: BigUint) {
        self.allowances
            .lock()
            .expect("lock")
            .insert((token, owner, spender), value);
    }

    pub fn allowance(&self, token: Felt, owner: Felt, spender: Felt) -> BigUint {
        self.allowances
            .lock()
            .expect("lock")
            .get(&(token, owner, spender))
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_queries_for(&self, token: Felt) {
        self.failing_tokens.lock().expect("lock").insert(token);
    }

    pub fn set_decimals(&self, token: Felt, decimals: u8) {
        self.decimals.lock().expect("lock").insert(token, decimals);
    }

    pub fn set_mode(&self, mode: ExecMode) {
        *self.mode.lock().expect("lock") = mode;
    }

    pub fn allowance_calls(&self) -> usize {
        self.allowance_calls.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

pub struct MockSigner {
    address: Felt,
    chain_id: Felt,
    ledger: Arc<Ledger>,
    block_fails: bool,
}

impl MockSigner {
    pub fn new(address: Felt, chain_id: Felt, ledger: Arc<Ledger>) -> Self {
        Self {
            address,
            chain_id,
            ledger,
            block_fails: false,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

fn selector(name: &str) -> Felt {
    get_selector_from_name(name).expect("selector")
}

#[async_trait]
impl WalletSigner for MockSigner {
    fn address(&self) -> Felt {
        self.address
    }

    fn chain_id(&self) -> Felt {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, ClientError> {
        self.ledger.block_calls.fetch_add(1, Ordering::SeqCst);
        if self.block_fails {
            return Err(ClientError::Rpc("node unreachable".to_string()));
        }
        Ok(42)
    }

    async fn call(&self, call: FunctionCall) -> Result<Vec<Felt>, ClientError> {
        if call.entry_point_selector == selector("allowance") {
            self.ledger.allowance_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .ledger
                .failing_tokens
                .lock()
                .expect("lock")
                .contains(&call.contract_address)
            {
                return Err(ClientError::Rpc("allowance query failed".to_string()));
            }
            let value = self
                .ledger
                .allowance(call.contract_address, call.calldata[0], call.calldata[1]);
            let (low, high) = biguint_to_u256_felts(&value)?;
            return Ok(vec![low, high]);
        }
        if call.entry_point_selector == selector("decimals") {
            let decimals = self
                .ledger
                .decimals
                .lock()
                .expect("lock")
                .get(&call.contract_address)
                .copied()
                .unwrap_or(18);
            return Ok(vec![Felt::from(decimals)]);
        }
        if call.entry_point_selector == selector("query_price") {
            return Ok(vec![Felt::from(1u128 << 64), Felt::ZERO]);
        }
        if call.entry_point_selector == selector("query_curve_tick") {
            return Ok(vec![Felt::from(130u32), Felt::ZERO]);
        }
        Err(ClientError::Rpc("unknown entrypoint".to_string()))
    }

    async fn execute(&self, calls: Vec<Call>) -> Result<TxHash, TxFailure> {
        self.ledger.executions.fetch_add(1, Ordering::SeqCst);
        let mode = self.ledger.mode.lock().expect("lock").clone();
        match mode {
            ExecMode::Reject => return Err(TxFailure::Rejected),
            ExecMode::InsufficientFunds => return Err(TxFailure::InsufficientFunds),
            ExecMode::Succeed | ExecMode::Revert(_) | ExecMode::Unconfirmed { .. } => {}
        }
        let tx_hash = Felt::from(self.ledger.next_tx.fetch_add(1, Ordering::SeqCst));
        self.ledger
            .submitted
            .lock()
            .expect("lock")
            .insert(tx_hash, calls);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: TxHash) -> Result<(), TxFailure> {
        let calls = self
            .ledger
            .submitted
            .lock()
            .expect("lock")
            .remove(&tx_hash)
            .ok_or_else(|| TxFailure::Unknown("unknown transaction".to_string()))?;
        let mode = self.ledger.mode.lock().expect("lock").clone();
        match &mode {
            ExecMode::Revert(reason) => return Err(TxFailure::reverted(reason)),
            ExecMode::Unconfirmed { lands: false } => {
                return Err(TxFailure::Unknown("transaction not confirmed in time".to_string()))
            }
            _ => {}
        }
        for call in calls {
            if call.selector == selector("approve") {
                let amount = u256_felts_to_biguint(&call.calldata[1], &call.calldata[2])
                    .map_err(|err| TxFailure::Unknown(err.to_string()))?;
                self.ledger
                    .set_allowance(call.to, self.address, call.calldata[0], amount);
            }
        }
        if let ExecMode::Unconfirmed { lands: true } = mode {
            return Err(TxFailure::Unknown("transaction not confirmed in time".to_string()));
        }
        Ok(())
    }
}

/// How a transport answers `signer_for`.
#[derive(Debug, Clone, Copy)]
pub enum SignerBehavior {
    /// Signer bound to the requested account and chain.
    Matching,
    /// Signer for a different address.
    WrongAddress(u64),
    /// Signer bound to another chain.
    WrongChain(u64),
    Missing,
}

pub struct MockTransport {
    reported_chain: Felt,
    behavior: SignerBehavior,
    ledger: Arc<Ledger>,
    gate: Option<Arc<Semaphore>>,
    delay_ms: u64,
    block_fails: bool,
    pub chain_calls: AtomicUsize,
    pub signer_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new(reported_chain: u64, ledger: Arc<Ledger>) -> Self {
        Self {
            reported_chain: felt(reported_chain),
            behavior: SignerBehavior::Matching,
            ledger,
            gate: None,
            delay_ms: 0,
            block_fails: false,
            chain_calls: AtomicUsize::new(0),
            signer_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, behavior: SignerBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// `chain_id()` blocks until the returned semaphore gets a permit.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_failing_liveness(mut self) -> Self {
        self.block_fails = true;
        self
    }

    pub fn signer_calls(&self) -> usize {
        self.signer_calls.load(Ordering::SeqCst)
    }

    pub fn chain_calls(&self) -> usize {
        self.chain_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletTransport for MockTransport {
    type Signer = MockSigner;

    async fn chain_id(&self) -> Result<Felt, ClientError> {
        self.chain_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|err| ClientError::Rpc(err.to_string()))?
                .forget();
        }
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(self.reported_chain)
    }

    async fn signer_for(
        &self,
        account: Felt,
        chain_id: Felt,
    ) -> Result<Option<MockSigner>, ClientError> {
        self.signer_calls.fetch_add(1, Ordering::SeqCst);
        let (address, chain) = match self.behavior {
            SignerBehavior::Matching => (account, chain_id),
            SignerBehavior::WrongAddress(other) => (felt(other), chain_id),
            SignerBehavior::WrongChain(other) => (account, felt(other)),
            SignerBehavior::Missing => return Ok(None),
        };
        let mut signer = MockSigner::new(address, chain, self.ledger.clone());
        signer.block_fails = self.block_fails;
        Ok(Some(signer))
    }
}
