use std::sync::Arc;

use num_bigint::BigUint;
use starknet::core::types::{Call, Felt, FunctionCall};
use starknet::core::utils::get_selector_from_name;
use tracing::debug;

use crate::config::{ChainConfig, RetryConfig};
use crate::error::ClientError;
use crate::tx::{with_retry, TxHash};
use crate::utils::{biguint_to_u256_felts, felt_to_u128, u256_felts_to_biguint, Address};
use crate::wallet::WalletSigner;

pub struct Erc20<S> {
    signer: Arc<S>,
    address: Address,
    pub retry: RetryConfig,
}

impl<S: WalletSigner> Erc20<S> {
    pub fn new(signer: Arc<S>, address: Address) -> Self {
        Self {
            signer,
            address,
            retry: RetryConfig::default(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<BigUint, ClientError> {
        let result = self.view("allowance", vec![owner, spender]).await?;
        if result.len() < 2 {
            return Err(ClientError::Rpc("invalid allowance response".to_string()));
        }
        u256_felts_to_biguint(&result[0], &result[1])
    }

    pub async fn decimals(&self) -> Result<u8, ClientError> {
        let result = self.view("decimals", Vec::new()).await?;
        let raw = result
            .first()
            .ok_or_else(|| ClientError::Rpc("invalid decimals response".to_string()))?;
        u8::try_from(felt_to_u128(raw)?)
            .map_err(|_| ClientError::Rpc("decimals out of range".to_string()))
    }

    // Never retried.
    pub async fn approve(&self, spender: Address, amount: &BigUint) -> Result<TxHash, ClientError> {
        let call = approve_call(self.address, spender, amount)?;
        Ok(self.signer.execute(vec![call]).await?)
    }

    async fn view(&self, entrypoint: &str, calldata: Vec<Felt>) -> Result<Vec<Felt>, ClientError> {
        let selector = get_selector_from_name(entrypoint)
            .map_err(|err| ClientError::InvalidInput(err.to_string()))?;
        let call = FunctionCall {
            contract_address: self.address,
            entry_point_selector: selector,
            calldata,
        };
        with_retry(self.retry.clone(), || async {
            self.signer.call(call.clone()).await
        })
        .await
    }
}

pub async fn resolve_token_decimals<S: WalletSigner>(
    config: &mut ChainConfig,
    signer: Arc<S>,
) -> Result<(), ClientError> {
    while let Some(&address) = config.unresolved_decimals.first() {
        let mut erc20 = Erc20::new(signer.clone(), address);
        erc20.retry = config.retry.clone();
        let decimals = erc20.decimals().await?;
        if let Some(token) = config.tokens.iter_mut().find(|token| token.address == address) {
            debug!(symbol = %token.symbol, decimals, "token decimals read from contract");
            token.decimals = decimals;
        }
        config.unresolved_decimals.remove(0);
    }
    Ok(())
}

pub fn approve_call(token: Address, spender: Address, amount: &BigUint) -> Result<Call, ClientError> {
    let selector = get_selector_from_name("approve")
        .map_err(|err| ClientError::InvalidInput(err.to_string()))?;
    let (low, high) = biguint_to_u256_felts(amount)?;
    Ok(Call {
        to: token,
        selector,
        calldata: vec![spender, low, high],
    })
}
