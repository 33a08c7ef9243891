// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Network and token constants.

use alloy::primitives::{Address, U256};

use crate::models::{Chain, Currency};

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub chain: Chain,
    /// Network name for display
    pub name: &'static str,
    pub chain_id: u64,
    /// Public RPC endpoint, used when no override is configured
    pub default_rpc_url: &'static str,
    pub explorer_url: &'static str,
    /// Tip added on top of the base fee, in wei
    pub priority_fee_wei: u128,
    /// Base fee assumed when the latest block does not report one
    pub fallback_base_fee_wei: u128,
}

pub const ETHEREUM_MAINNET: NetworkConfig = NetworkConfig {
    chain: Chain::Ethereum,
    name: "Ethereum",
    chain_id: 1,
    default_rpc_url: "https://eth.llamarpc.com",
    explorer_url: "https://etherscan.io",
    priority_fee_wei: 1_500_000_000,
    fallback_base_fee_wei: 30_000_000_000,
};

pub const POLYGON_MAINNET: NetworkConfig = NetworkConfig {
    chain: Chain::Polygon,
    name: "Polygon PoS",
    chain_id: 137,
    default_rpc_url: "https://polygon-rpc.com",
    explorer_url: "https://polygonscan.com",
    priority_fee_wei: 30_000_000_000,
    fallback_base_fee_wei: 50_000_000_000,
};

pub const BSC_MAINNET: NetworkConfig = NetworkConfig {
    chain: Chain::Bsc,
    name: "BNB Smart Chain",
    chain_id: 56,
    default_rpc_url: "https://bsc-dataseed.bnbchain.org",
    explorer_url: "https://bscscan.com",
    priority_fee_wei: 1_000_000_000,
    fallback_base_fee_wei: 3_000_000_000,
};

pub fn network(chain: Chain) -> &'static NetworkConfig {
    match chain {
        Chain::Ethereum => &ETHEREUM_MAINNET,
        Chain::Polygon => &POLYGON_MAINNET,
        Chain::Bsc => &BSC_MAINNET,
    }
}

/// An ERC-20 deployment on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDeployment {
    pub address: &'static str,
    pub decimals: u8,
}

/// Stablecoin contracts per chain. Binance-peg tokens on BSC use 18 decimals.
pub fn token_deployment(chain: Chain, currency: Currency) -> Option<TokenDeployment> {
    let (address, decimals) = match (chain, currency) {
        (Chain::Ethereum, Currency::Usdt) => ("0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
        (Chain::Ethereum, Currency::Usdc) => ("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
        (Chain::Polygon, Currency::Usdt) => ("0xc2132D05D31c914a87C6611C10748AEb04B58e8F", 6),
        (Chain::Polygon, Currency::Usdc) => ("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359", 6),
        (Chain::Bsc, Currency::Usdt) => ("0x55d398326f99059fF775485246999027B3197955", 18),
        (Chain::Bsc, Currency::Usdc) => ("0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d", 18),
        _ => return None,
    };
    Some(TokenDeployment { address, decimals })
}

/// What a withdrawal moves on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAsset {
    /// The chain's gas token.
    Native,
    /// An ERC-20 contract.
    Token { contract: Address },
}

/// A value transfer from a custodial address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub chain: Chain,
    pub from: Address,
    pub to: Address,
    pub asset: TransferAsset,
    /// Amount in the asset's smallest unit.
    pub amount: U256,
}

/// EIP-1559 fee estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEstimate {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeEstimate {
    /// Worst-case cost in wei.
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.max_fee_per_gas)
    }
}

/// Transaction receipt after inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// Whether execution succeeded
    pub success: bool,
}
