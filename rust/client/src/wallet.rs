use std::sync::Arc;

use async_trait::async_trait;
use starknet::accounts::{ConnectedAccount, ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{
    BlockId, BlockTag, Call, ExecutionResult, Felt, FunctionCall, StarknetError,
};
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::{Provider, ProviderError};
use starknet::signers::{LocalWallet, SigningKey};
use tokio::time::{sleep, Duration};
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use crate::config::ConfirmationConfig;
use crate::error::ClientError;
use crate::tx::{TxFailure, TxHash};
use crate::utils::{felt_to_hex, Address};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub account: Address,
    pub chain_id: Felt,
}

/// Connection snapshot supplied by the wallet layer. Usable only when
/// account, chain id and transport are all present.
#[derive(Debug)]
pub struct WalletConnection<W> {
    pub account: Option<Address>,
    pub chain_id: Option<Felt>,
    pub transport: Option<Arc<W>>,
}

impl<W> Clone for WalletConnection<W> {
    fn clone(&self) -> Self {
        Self {
            account: self.account,
            chain_id: self.chain_id,
            transport: self.transport.clone(),
        }
    }
}

impl<W> WalletConnection<W> {
    pub fn connected(account: Address, chain_id: Felt, transport: Arc<W>) -> Self {
        Self {
            account: Some(account),
            chain_id: Some(chain_id),
            transport: Some(transport),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            account: None,
            chain_id: None,
            transport: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.key().is_some()
    }

    pub fn key(&self) -> Option<ConnectionKey> {
        match (self.account, self.chain_id, self.transport.as_ref()) {
            (Some(account), Some(chain_id), Some(_)) => Some(ConnectionKey { account, chain_id }),
            _ => None,
        }
    }
}

#[async_trait]
pub trait WalletSigner: Send + Sync + 'static {
    fn address(&self) -> Address;

    fn chain_id(&self) -> Felt;

    async fn block_number(&self) -> Result<u64, ClientError>;

    async fn call(&self, call: FunctionCall) -> Result<Vec<Felt>, ClientError>;

    /// Signs and submits one transaction. Never retried.
    async fn execute(&self, calls: Vec<Call>) -> Result<TxHash, TxFailure>;

    async fn wait_for_confirmation(&self, tx_hash: TxHash) -> Result<(), TxFailure>;
}

#[async_trait]
pub trait WalletTransport: Send + Sync + 'static {
    type Signer: WalletSigner;

    async fn chain_id(&self) -> Result<Felt, ClientError>;

    /// `Ok(None)` when the wallet cannot sign for `account`.
    async fn signer_for(
        &self,
        account: Address,
        chain_id: Felt,
    ) -> Result<Option<Self::Signer>, ClientError>;
}

pub type RpcAccount = SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>;

pub struct StarknetSigner<A> {
    account: A,
    confirmation: ConfirmationConfig,
}

impl<A> StarknetSigner<A>
where
    A: ConnectedAccount + Send + Sync + 'static,
{
    pub fn new(account: A, confirmation: ConfirmationConfig) -> Self {
        Self {
            account,
            confirmation,
        }
    }

    pub fn account(&self) -> &A {
        &self.account
    }
}

#[async_trait]
impl<A> WalletSigner for StarknetSigner<A>
where
    A: ConnectedAccount + Send + Sync + 'static,
{
    fn address(&self) -> Address {
        self.account.address()
    }

    fn chain_id(&self) -> Felt {
        self.account.chain_id()
    }

    async fn block_number(&self) -> Result<u64, ClientError> {
        self.account
            .provider()
            .block_number()
            .await
            .map_err(|err| ClientError::Rpc(err.to_string()))
    }

    async fn call(&self, call: FunctionCall) -> Result<Vec<Felt>, ClientError> {
        self.account
            .provider()
            .call(call, BlockId::Tag(BlockTag::Latest))
            .await
            .map_err(|err| ClientError::Rpc(err.to_string()))
    }

    async fn execute(&self, calls: Vec<Call>) -> Result<TxHash, TxFailure> {
        let mut exec = self.account.execute_v3(calls);
        if let Some(l1_gas) = gas_override::<u64>("AMBIENT_L1_GAS")? {
            exec = exec.l1_gas(l1_gas);
        }
        if let Some(l1_gas_price) = gas_override::<u128>("AMBIENT_L1_GAS_PRICE")? {
            exec = exec.l1_gas_price(l1_gas_price);
        }
        if let Some(l2_gas) = gas_override::<u64>("AMBIENT_L2_GAS")? {
            exec = exec.l2_gas(l2_gas);
        }
        if let Some(l2_gas_price) = gas_override::<u128>("AMBIENT_L2_GAS_PRICE")? {
            exec = exec.l2_gas_price(l2_gas_price);
        }
        exec.send()
            .await
            .map(|result| result.transaction_hash)
            .map_err(|err| TxFailure::from_account_error(&err))
    }

    async fn wait_for_confirmation(&self, tx_hash: TxHash) -> Result<(), TxFailure> {
        let provider = self.account.provider();
        let interval = Duration::from_millis(self.confirmation.poll_interval_ms);
        for _ in 0..self.confirmation.max_polls.max(1) {
            match provider.get_transaction_receipt(tx_hash).await {
                Ok(receipt) => {
                    return match receipt.receipt.execution_result() {
                        ExecutionResult::Succeeded => Ok(()),
                        ExecutionResult::Reverted { reason } => Err(TxFailure::reverted(reason)),
                    };
                }
                Err(ProviderError::StarknetError(StarknetError::TransactionHashNotFound)) => {
                    debug!(tx_hash = %felt_to_hex(tx_hash), "receipt not available yet");
                }
                Err(err) => return Err(TxFailure::from_provider_error(&err)),
            }
            sleep(interval).await;
        }
        Err(TxFailure::Unknown(format!(
            "transaction {} not confirmed in time",
            felt_to_hex(tx_hash)
        )))
    }
}

fn gas_override<T: std::str::FromStr>(name: &str) -> Result<Option<T>, TxFailure> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| TxFailure::Unknown(format!("invalid {name}"))),
        Err(_) => Ok(None),
    }
}

pub struct LocalKeyTransport {
    rpc_url: Url,
    account: Address,
    private_key: Zeroizing<[u8; 32]>,
    confirmation: ConfirmationConfig,
}

impl LocalKeyTransport {
    pub fn new(
        rpc_url: Url,
        account: Address,
        private_key: Felt,
        confirmation: ConfirmationConfig,
    ) -> Self {
        Self {
            rpc_url,
            account,
            private_key: Zeroizing::new(private_key.to_bytes_be()),
            confirmation,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    fn provider(&self) -> JsonRpcClient<HttpTransport> {
        JsonRpcClient::new(HttpTransport::new(self.rpc_url.clone()))
    }
}

#[async_trait]
impl WalletTransport for LocalKeyTransport {
    type Signer = StarknetSigner<RpcAccount>;

    async fn chain_id(&self) -> Result<Felt, ClientError> {
        self.provider()
            .chain_id()
            .await
            .map_err(|err| ClientError::Rpc(err.to_string()))
    }

    async fn signer_for(
        &self,
        account: Address,
        chain_id: Felt,
    ) -> Result<Option<Self::Signer>, ClientError> {
        if account != self.account {
            return Ok(None);
        }
        let key = SigningKey::from_secret_scalar(Felt::from_bytes_be(&self.private_key));
        let mut rpc_account = SingleOwnerAccount::new(
            self.provider(),
            LocalWallet::from(key),
            account,
            chain_id,
            ExecutionEncoding::New,
        );
        rpc_account.set_block_id(BlockId::Tag(BlockTag::Latest));
        Ok(Some(StarknetSigner::new(rpc_account, self.confirmation.clone())))
    }
}
