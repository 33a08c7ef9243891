// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rolling withdrawal caps by KYC tier.
//!
//! | Tier | 24 h cap | 30 day cap |
//! |------|----------|------------|
//! | Unverified | no withdrawals | no withdrawals |
//! | Verified | 1,000 USD | 10,000 USD |
//! | Verified + 2FA | 10,000 USD | 100,000 USD |
//!
//! Volume is the USD value recorded on each withdrawal at request time,
//! counting every withdrawal that has not failed. A request is either
//! allowed in full or rejected; it is never trimmed to fit.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::KycTier;
use crate::storage::{LedgerStore, StoreResult, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub daily_usd: Decimal,
    pub monthly_usd: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub verified: TierLimits,
    pub enhanced: TierLimits,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            verified: TierLimits {
                daily_usd: Decimal::from(1_000),
                monthly_usd: Decimal::from(10_000),
            },
            enhanced: TierLimits {
                daily_usd: Decimal::from(10_000),
                monthly_usd: Decimal::from(100_000),
            },
        }
    }
}

impl LimitPolicy {
    pub fn for_tier(&self, tier: KycTier) -> Option<TierLimits> {
        match tier {
            KycTier::Unverified => None,
            KycTier::Verified => Some(self.verified),
            KycTier::Enhanced => Some(self.enhanced),
        }
    }
}

/// Result of a limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LimitDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl LimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct WithdrawalLimiter {
    ledger: LedgerStore,
    users: UserStore,
    policy: LimitPolicy,
}

impl WithdrawalLimiter {
    pub fn new(ledger: LedgerStore, users: UserStore, policy: LimitPolicy) -> Self {
        Self {
            ledger,
            users,
            policy,
        }
    }

    /// Whether a further `amount_usd` would stay within both windows.
    pub fn check_limit(&self, user_id: &str, amount_usd: Decimal) -> StoreResult<LimitDecision> {
        let tier = self
            .users
            .get(user_id)?
            .map(|u| u.tier())
            .unwrap_or(KycTier::Unverified);

        let Some(limits) = self.policy.for_tier(tier) else {
            return Ok(LimitDecision::deny(
                "Identity verification is required before withdrawing",
            ));
        };

        let now = Utc::now();
        let daily = self
            .ledger
            .withdrawal_usd_volume_since(user_id, now - Duration::hours(24))?;
        if daily + amount_usd > limits.daily_usd {
            return Ok(LimitDecision::deny("Daily withdrawal limit exceeded"));
        }

        let monthly = self
            .ledger
            .withdrawal_usd_volume_since(user_id, now - Duration::days(30))?;
        if monthly + amount_usd > limits.monthly_usd {
            return Ok(LimitDecision::deny("Monthly withdrawal limit exceeded"));
        }

        Ok(LimitDecision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, TxKind};
    use crate::storage::{temp_storage, NewTransaction, Resolution, Storage};
    use rust_decimal::dec;

    fn limiter(storage: &Storage) -> WithdrawalLimiter {
        WithdrawalLimiter::new(
            storage.ledger.clone(),
            storage.users.clone(),
            LimitPolicy::default(),
        )
    }

    fn withdraw(storage: &Storage, user: &str, usd: Decimal) -> String {
        storage
            .ledger
            .credit(NewTransaction::new(user, TxKind::Deposit, Currency::Usdt, usd).completed())
            .unwrap();
        storage
            .ledger
            .debit(
                NewTransaction::new(user, TxKind::Withdrawal, Currency::Usdt, usd)
                    .with_usd_value(usd),
            )
            .unwrap()
            .transaction
            .id
    }

    #[test]
    fn unverified_users_cannot_withdraw() {
        let (storage, _dir) = temp_storage();
        let decision = limiter(&storage).check_limit("u1", dec!(1)).unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("verification"));
    }

    #[test]
    fn verified_daily_cap_is_inclusive() {
        let (storage, _dir) = temp_storage();
        storage.users.mark_kyc_verified("u1", "nin").unwrap();
        withdraw(&storage, "u1", dec!(600));

        let limiter = limiter(&storage);
        assert!(limiter.check_limit("u1", dec!(400)).unwrap().allowed);
        let over = limiter.check_limit("u1", dec!(400.01)).unwrap();
        assert!(!over.allowed);
        assert_eq!(over.reason.as_deref(), Some("Daily withdrawal limit exceeded"));
    }

    #[test]
    fn failed_withdrawals_do_not_count() {
        let (storage, _dir) = temp_storage();
        storage.users.mark_kyc_verified("u1", "nin").unwrap();
        let id = withdraw(&storage, "u1", dec!(900));
        storage
            .ledger
            .resolve(&id, Resolution::FailAndReverse { reason: "x".into() })
            .unwrap();
        assert!(limiter(&storage).check_limit("u1", dec!(1000)).unwrap().allowed);
    }

    #[test]
    fn second_factor_raises_caps() {
        let (storage, _dir) = temp_storage();
        storage.users.mark_kyc_verified("u1", "nin").unwrap();
        let limiter = limiter(&storage);
        assert!(!limiter.check_limit("u1", dec!(5000)).unwrap().allowed);

        let secret = crate::custody::EncryptedKeyMaterial {
            ciphertext: vec![1; 20],
            iv: vec![0; 12],
            salt: vec![0; 32],
            tag: vec![0; 16],
            key_version: 1,
        };
        storage.users.set_pending_two_factor("u1", secret).unwrap();
        storage.users.enable_two_factor("u1").unwrap();
        assert!(limiter.check_limit("u1", dec!(5000)).unwrap().allowed);
        assert!(!limiter.check_limit("u1", dec!(10000.01)).unwrap().allowed);
    }
}
