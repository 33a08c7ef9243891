// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Engine
//!
//! Orchestrates every flow that moves value: KYC and wallet provisioning,
//! wallet top-ups, checkout, refunds and on-chain withdrawals.
//!
//! The engine is the only component that performs compensating actions.
//! Stores report success or failure; the engine decides whether an earlier
//! step has to be undone.
//!
//! External calls (rates, identity provider, gateway, chain RPC) are always
//! made before or after a ledger write, never inside one. A redb write
//! transaction is the only critical section around a balance.

pub mod checkout;
pub mod error;
pub mod funding;
pub mod identity;
pub mod orders;
pub mod withdrawal;

use std::sync::Arc;
use std::time::Duration;

use ring::rand::SystemRandom;
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::blockchain::ChainRpc;
use crate::config::SettlementConfig;
use crate::custody::WalletCrypto;
use crate::limits::{LimitPolicy, WithdrawalLimiter};
use crate::models::{Currency, KycTier, WalletBalances};
use crate::providers::{IdentityVerifier, PaymentGateway};
use crate::rates::{ExchangeRateOracle, RateSnapshot};
use crate::storage::{CryptoAddress, HistoryCache, Storage, TransactionRecord};

pub use checkout::{generate_tracking_number, CartLine, CheckoutReceipt, CheckoutRequest};
pub use error::{SettlementError, SettlementResult};
pub use funding::{ChargeSettlement, TopupInit};
pub use identity::{KycOutcome, TwoFactorSetup};
pub use orders::{OrderPage, RefundReceipt};
pub use withdrawal::{TransferOutcome, WithdrawalReceipt, WithdrawalRequest};

/// Default and maximum page sizes for history listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

const HISTORY_CACHE_CAPACITY: usize = 10_000;
const HISTORY_CACHE_TTL: Duration = Duration::from_secs(30);

/// External services the engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub rates: Arc<dyn ExchangeRateOracle>,
    pub chain: Arc<dyn ChainRpc>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub kyc: Arc<dyn IdentityVerifier>,
}

/// Balances and custodial addresses of one user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletOverview {
    pub balances: WalletBalances,
    pub addresses: Vec<CryptoAddress>,
    pub kyc_tier: KycTier,
}

/// One page of transaction history, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub next_cursor: Option<String>,
}

#[derive(Clone)]
pub struct SettlementEngine {
    storage: Storage,
    crypto: WalletCrypto,
    limiter: WithdrawalLimiter,
    rates: Arc<dyn ExchangeRateOracle>,
    chain: Arc<dyn ChainRpc>,
    gateway: Arc<dyn PaymentGateway>,
    kyc: Arc<dyn IdentityVerifier>,
    history: Arc<HistoryCache>,
    config: SettlementConfig,
    rng: SystemRandom,
}

impl SettlementEngine {
    pub fn new(
        storage: Storage,
        crypto: WalletCrypto,
        config: SettlementConfig,
        collaborators: Collaborators,
    ) -> Self {
        let limiter = WithdrawalLimiter::new(
            storage.ledger.clone(),
            storage.users.clone(),
            LimitPolicy::default(),
        );
        Self {
            storage,
            crypto,
            limiter,
            rates: collaborators.rates,
            chain: collaborators.chain,
            gateway: collaborators.gateway,
            kyc: collaborators.kyc,
            history: Arc::new(HistoryCache::new(HISTORY_CACHE_CAPACITY, HISTORY_CACHE_TTL)),
            config,
            rng: SystemRandom::new(),
        }
    }

    /// Replace the default withdrawal tiers.
    pub fn with_limit_policy(mut self, policy: LimitPolicy) -> Self {
        self.limiter = WithdrawalLimiter::new(
            self.storage.ledger.clone(),
            self.storage.users.clone(),
            policy,
        );
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn crypto(&self) -> &WalletCrypto {
        &self.crypto
    }

    pub fn chain(&self) -> &Arc<dyn ChainRpc> {
        &self.chain
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    /// Current conversion snapshot; never fails.
    pub async fn rates(&self) -> RateSnapshot {
        self.rates.get_rates().await
    }

    pub fn wallet_overview(&self, user_id: &str) -> SettlementResult<WalletOverview> {
        let tier = self
            .storage
            .users
            .get(user_id)?
            .map(|u| u.tier())
            .unwrap_or(KycTier::Unverified);
        Ok(WalletOverview {
            balances: self.storage.ledger.balances(user_id)?,
            addresses: self.storage.users.addresses(user_id)?,
            kyc_tier: tier,
        })
    }

    pub fn balance(&self, user_id: &str, currency: Currency) -> SettlementResult<Decimal> {
        Ok(self.storage.ledger.get_balance(user_id, currency)?)
    }

    /// The caller's history. The default-sized first page is served from
    /// an in-process cache that every ledger write for the user clears.
    pub fn list_transactions(
        &self,
        user_id: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> SettlementResult<TransactionPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let cacheable = cursor.is_none() && limit == DEFAULT_PAGE_SIZE;

        if cacheable {
            if let Some((transactions, next_cursor)) = self.history.get_first_page(user_id) {
                return Ok(TransactionPage {
                    transactions,
                    next_cursor,
                });
            }
        }

        let (transactions, next_cursor) =
            self.storage.ledger.list_for_user(user_id, cursor, limit)?;
        if cacheable {
            self.history
                .put_first_page(user_id, transactions.clone(), next_cursor.clone());
        }
        Ok(TransactionPage {
            transactions,
            next_cursor,
        })
    }

    pub(crate) fn touched(&self, user_id: &str) {
        self.history.invalidate(user_id);
    }
}

/// Reject non-positive amounts and amounts finer than the currency's scale.
pub(crate) fn validate_amount(amount: Decimal, currency: Currency) -> SettlementResult<()> {
    if amount <= Decimal::ZERO {
        return Err(SettlementError::invalid_amount("amount must be positive"));
    }
    if amount.normalize().scale() > currency.scale() {
        return Err(SettlementError::invalid_amount(format!(
            "{currency} supports at most {} decimal places",
            currency.scale()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TxKind;
    use crate::storage::NewTransaction;
    use crate::testing::Harness;
    use rust_decimal::dec;

    #[test]
    fn amount_validation() {
        assert!(validate_amount(dec!(1.5), Currency::Ngn).is_ok());
        assert!(validate_amount(dec!(1.50000), Currency::Ngn).is_ok());
        assert_eq!(
            validate_amount(Decimal::ZERO, Currency::Eth).unwrap_err().code(),
            "INVALID_AMOUNT"
        );
        assert_eq!(
            validate_amount(dec!(-3), Currency::Usdt).unwrap_err().code(),
            "INVALID_AMOUNT"
        );
        assert!(validate_amount(dec!(0.001), Currency::Ngn).is_err());
        assert!(validate_amount(dec!(0.000001), Currency::Usdc).is_ok());
    }

    #[tokio::test]
    async fn first_history_page_is_cached_until_touched() {
        let h = Harness::new();
        h.fund("u1", Currency::Ngn, dec!(100));

        let page = h.engine.list_transactions("u1", None, None).unwrap();
        assert_eq!(page.transactions.len(), 1);

        // A direct store write bypasses invalidation, so the cache still answers
        h.engine
            .storage()
            .ledger
            .credit(NewTransaction::new("u1", TxKind::Deposit, Currency::Ngn, dec!(1)).completed())
            .unwrap();
        assert_eq!(
            h.engine.list_transactions("u1", None, None).unwrap().transactions.len(),
            1
        );

        h.engine.touched("u1");
        assert_eq!(
            h.engine.list_transactions("u1", None, None).unwrap().transactions.len(),
            2
        );
    }

    #[tokio::test]
    async fn overview_reports_tier_and_balances() {
        let h = Harness::new();
        h.fund("u1", Currency::Usdt, dec!(25));

        let overview = h.engine.wallet_overview("u1").unwrap();
        assert_eq!(overview.kyc_tier, KycTier::Unverified);
        assert_eq!(overview.balances.usdt, dec!(25));
        assert!(overview.addresses.is_empty());
    }
}
