// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settlement failures and their stable reason codes.

use tracing::error;

use crate::blockchain::ChainError;
use crate::custody::CryptoError;
use crate::models::Currency;
use crate::providers::{GatewayError, KycError};
use crate::rates::RateError;
use crate::storage::StoreError;

/// Every way a settlement operation can be rejected.
///
/// Messages are safe to show to the caller: they never carry another
/// user's data or a balance figure.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    // Authorization
    #[error("Identity verification is required")]
    KycRequired,

    #[error("Identity verification was rejected")]
    KycRejected,

    #[error("Invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("A two-factor code is required")]
    TwoFactorRequired,

    // Resources
    #[error("{0}")]
    LimitExceeded(String),

    #[error("Insufficient {currency} balance")]
    InsufficientFunds { currency: Currency },

    #[error("Insufficient native balance to pay network fees")]
    InsufficientGas,

    #[error("Insufficient on-chain balance")]
    InsufficientBalance,

    #[error("Cart is out of date: {0}")]
    StaleCart(String),

    #[error("Product {product_id} is out of stock")]
    OutOfStock { product_id: String },

    // Validation
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("{0}")]
    InvalidRequest(String),

    // Upstream
    #[error("Transfer broadcast failed")]
    BroadcastFailed,

    #[error("{0} is unavailable, retry later")]
    UpstreamUnavailable(&'static str),

    // Integrity
    #[error("Integrity check failed")]
    IntegrityFailure,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Internal error")]
    Internal(String),
}

pub type SettlementResult<T> = Result<T, SettlementError>;

impl SettlementError {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::KycRequired => "KYC_REQUIRED",
            SettlementError::KycRejected => "KYC_REJECTED",
            SettlementError::InvalidTwoFactorCode => "INVALID_TWO_FACTOR_CODE",
            SettlementError::TwoFactorRequired => "TWO_FACTOR_REQUIRED",
            SettlementError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            SettlementError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SettlementError::InsufficientGas => "INSUFFICIENT_GAS",
            SettlementError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            SettlementError::StaleCart(_) => "STALE_CART",
            SettlementError::OutOfStock { .. } => "OUT_OF_STOCK",
            SettlementError::InvalidAddress(_) => "INVALID_ADDRESS",
            SettlementError::InvalidAmount(_) => "INVALID_AMOUNT",
            SettlementError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            SettlementError::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
            SettlementError::InvalidRequest(_) => "INVALID_REQUEST",
            SettlementError::BroadcastFailed => "BROADCAST_FAILED",
            SettlementError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            SettlementError::IntegrityFailure => "INTEGRITY_FAILURE",
            SettlementError::NotFound(_) => "NOT_FOUND",
            SettlementError::InvalidState(_) => "INVALID_STATE",
            SettlementError::Internal(_) => "INTERNAL",
        }
    }

    pub(crate) fn invalid_amount(reason: impl Into<String>) -> Self {
        SettlementError::InvalidAmount(reason.into())
    }
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds { currency } => {
                SettlementError::InsufficientFunds { currency }
            }
            StoreError::InvalidAmount => SettlementError::invalid_amount("amount must be positive"),
            StoreError::OutOfStock { product_id } => SettlementError::OutOfStock { product_id },
            StoreError::NotFound(what) => SettlementError::NotFound(what),
            StoreError::InvalidTransition { from, to } => SettlementError::InvalidState(format!(
                "Cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            )),
            StoreError::Conflict(reason) => SettlementError::InvalidState(reason),
            other => SettlementError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for SettlementError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptionFailed | CryptoError::InvalidKeyMaterial(_) => {
                error!(error = %e, "Custodial secret failed integrity check");
                SettlementError::IntegrityFailure
            }
            other => SettlementError::Internal(other.to_string()),
        }
    }
}

impl From<ChainError> for SettlementError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::InvalidAddress(reason) => SettlementError::InvalidAddress(reason),
            ChainError::InvalidAmount(reason) => SettlementError::InvalidAmount(reason),
            ChainError::Broadcast(_) => SettlementError::BroadcastFailed,
            ChainError::Rpc(_) | ChainError::Contract(_) | ChainError::Timeout => {
                SettlementError::UpstreamUnavailable("Blockchain RPC")
            }
            ChainError::InvalidRpcUrl(reason) => SettlementError::Internal(reason),
        }
    }
}

impl From<GatewayError> for SettlementError {
    fn from(_: GatewayError) -> Self {
        SettlementError::UpstreamUnavailable("Payment gateway")
    }
}

impl From<KycError> for SettlementError {
    fn from(_: KycError) -> Self {
        SettlementError::UpstreamUnavailable("Identity provider")
    }
}

impl From<RateError> for SettlementError {
    fn from(e: RateError) -> Self {
        SettlementError::Internal(e.to_string())
    }
}
