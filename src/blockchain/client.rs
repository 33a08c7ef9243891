// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM JSON-RPC client for Ethereum, Polygon and BNB Smart Chain.

use std::future::Future;
use std::time::Duration;

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, TxHash, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use tracing::debug;

use super::erc20::{transfer_calldata, Erc20Contract};
use super::types::*;
use crate::models::Chain;

/// HTTP provider type (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Errors that can occur during blockchain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("RPC call timed out")]
    Timeout,
}

/// Per-network RPC operations the settlement core needs.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Native gas-token balance in wei.
    async fn native_balance(&self, chain: Chain, owner: Address) -> Result<U256, ChainError>;

    /// ERC-20 balance in the token's smallest unit.
    async fn token_balance(
        &self,
        chain: Chain,
        token: Address,
        owner: Address,
    ) -> Result<U256, ChainError>;

    /// Gas limit and EIP-1559 fees for a transfer.
    async fn estimate_fee(&self, transfer: &TransferRequest) -> Result<FeeEstimate, ChainError>;

    /// Sign and broadcast; returns the transaction hash.
    async fn broadcast(
        &self,
        signer: PrivateKeySigner,
        transfer: &TransferRequest,
        fee: &FeeEstimate,
    ) -> Result<String, ChainError>;

    /// Receipt of an included transaction, `None` while pending.
    async fn receipt(&self, chain: Chain, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError>;
}

/// Optional RPC overrides; unset chains use their public endpoint.
#[derive(Debug, Clone, Default)]
pub struct RpcUrls {
    pub ethereum: Option<String>,
    pub polygon: Option<String>,
    pub bsc: Option<String>,
}

/// [`ChainRpc`] over HTTP JSON-RPC with a bounded timeout per call.
pub struct EvmRpc {
    ethereum: url::Url,
    polygon: url::Url,
    bsc: url::Url,
    timeout: Duration,
}

impl EvmRpc {
    pub fn new(urls: RpcUrls, timeout: Duration) -> Result<Self, ChainError> {
        let parse = |chain: Chain, raw: Option<String>| -> Result<url::Url, ChainError> {
            let raw = raw.unwrap_or_else(|| network(chain).default_rpc_url.to_string());
            raw.parse()
                .map_err(|e: url::ParseError| ChainError::InvalidRpcUrl(format!("{chain}: {e}")))
        };
        Ok(Self {
            ethereum: parse(Chain::Ethereum, urls.ethereum)?,
            polygon: parse(Chain::Polygon, urls.polygon)?,
            bsc: parse(Chain::Bsc, urls.bsc)?,
            timeout,
        })
    }

    fn url(&self, chain: Chain) -> url::Url {
        match chain {
            Chain::Ethereum => self.ethereum.clone(),
            Chain::Polygon => self.polygon.clone(),
            Chain::Bsc => self.bsc.clone(),
        }
    }

    fn provider(&self, chain: Chain) -> HttpProvider {
        ProviderBuilder::new().connect_http(self.url(chain))
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, ChainError>>,
    ) -> Result<T, ChainError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ChainError::Timeout)?
    }

    /// Base fee from the latest block plus the network's standard tip.
    async fn gas_prices(&self, provider: &HttpProvider, chain: Chain) -> Result<(u128, u128), ChainError> {
        let config = network(chain);
        let block = provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
            .await
            .map_err(|e| ChainError::Rpc(format!("Failed to get block: {e}")))?
            .ok_or_else(|| ChainError::Rpc("No latest block".to_string()))?;

        let base_fee: u128 = block
            .header
            .base_fee_per_gas
            .map(|f| f as u128)
            .unwrap_or(config.fallback_base_fee_wei);
        let priority_fee = config.priority_fee_wei;

        // Max fee = 2 * base_fee + priority_fee (allows for base fee increase)
        let max_fee = base_fee.saturating_mul(2).saturating_add(priority_fee);
        Ok((max_fee, priority_fee))
    }
}

/// Unsigned transaction for a transfer.
pub fn transaction_request(transfer: &TransferRequest) -> TransactionRequest {
    let tx = TransactionRequest::default().from(transfer.from);
    match transfer.asset {
        TransferAsset::Native => tx.to(transfer.to).value(transfer.amount),
        TransferAsset::Token { contract } => tx
            .to(contract)
            .input(transfer_calldata(transfer.to, transfer.amount).into()),
    }
}

#[async_trait]
impl ChainRpc for EvmRpc {
    async fn native_balance(&self, chain: Chain, owner: Address) -> Result<U256, ChainError> {
        let provider = self.provider(chain);
        self.bounded(async {
            provider
                .get_balance(owner)
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()))
        })
        .await
    }

    async fn token_balance(
        &self,
        chain: Chain,
        token: Address,
        owner: Address,
    ) -> Result<U256, ChainError> {
        let provider = self.provider(chain);
        let contract = Erc20Contract::new(&provider, token);
        self.bounded(contract.balance_of(owner)).await
    }

    async fn estimate_fee(&self, transfer: &TransferRequest) -> Result<FeeEstimate, ChainError> {
        let provider = self.provider(transfer.chain);
        let tx = transaction_request(transfer);
        self.bounded(async {
            let gas_limit = provider
                .estimate_gas(tx)
                .await
                .map_err(|e| ChainError::Rpc(format!("Gas estimation failed: {e}")))?;
            let (max_fee_per_gas, max_priority_fee_per_gas) =
                self.gas_prices(&provider, transfer.chain).await?;
            Ok(FeeEstimate {
                gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            })
        })
        .await
    }

    async fn broadcast(
        &self,
        signer: PrivateKeySigner,
        transfer: &TransferRequest,
        fee: &FeeEstimate,
    ) -> Result<String, ChainError> {
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(self.url(transfer.chain));

        let tx = transaction_request(transfer)
            .gas_limit(fee.gas_limit)
            .max_fee_per_gas(fee.max_fee_per_gas)
            .max_priority_fee_per_gas(fee.max_priority_fee_per_gas);

        let tx_hash = self
            .bounded(async {
                let pending = provider
                    .send_transaction(tx)
                    .await
                    .map_err(|e| ChainError::Broadcast(e.to_string()))?;
                Ok(format!("{:?}", pending.tx_hash()))
            })
            .await?;

        debug!(
            chain = %transfer.chain,
            tx_hash = %tx_hash,
            explorer = %format!("{}/tx/{}", network(transfer.chain).explorer_url, tx_hash),
            "Transfer broadcast"
        );
        Ok(tx_hash)
    }

    async fn receipt(&self, chain: Chain, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        let hash: TxHash = tx_hash
            .parse()
            .map_err(|e| ChainError::Rpc(format!("Invalid tx hash: {e}")))?;
        let provider = self.provider(chain);

        let receipt = self
            .bounded(async {
                provider
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(|e| ChainError::Rpc(format!("Failed to get receipt: {e}")))
            })
            .await?;

        Ok(receipt.map(|r| TxReceipt {
            tx_hash: tx_hash.to_string(),
            block_number: r.block_number.unwrap_or(0),
            gas_used: r.gas_used as u64,
            success: r.status(),
        }))
    }
}
