// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Exchange Rates
//!
//! Every conversion pivots through USD:
//!
//! ```text
//! amount(src) -> USD -> amount(dst)
//! ```
//!
//! Fiat currencies are quoted as units per USD (NGN 1550 = 1 USD); crypto
//! as the USD price of one unit (ETH 3000). Stablecoins are fixed at 1 USD
//! for conversion, while USDT and USDC remain separate ledger balances.
//!
//! The oracle never fails: an unreachable feed degrades to the last known
//! snapshot or to [`default_snapshot`].

pub mod live;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::Currency;

pub use live::LiveRateOracle;

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("no usable rate for {0}")]
    Missing(Currency),

    #[error("conversion overflow")]
    Overflow,
}

/// How a currency is quoted against USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Quote {
    /// Units of the currency per 1 USD (fiat).
    PerUsd(Decimal),
    /// USD price of 1 unit (crypto).
    UsdPrice(Decimal),
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Live,
    /// Last live snapshot, served after a failed refresh.
    Stale,
    /// Hardcoded defaults.
    Fallback,
    /// Statically configured.
    Fixed,
}

/// A cached set of quotes with an expiry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSnapshot {
    pub quotes: BTreeMap<Currency, Quote>,
    pub source: RateSource,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RateSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Value of `amount` of `currency` in USD, unrounded.
    pub fn to_usd(&self, amount: Decimal, currency: Currency) -> Result<Decimal, RateError> {
        match self.quote(currency)? {
            Quote::PerUsd(rate) => amount.checked_div(rate),
            Quote::UsdPrice(price) => amount.checked_mul(price),
        }
        .ok_or(RateError::Overflow)
    }

    /// Amount of `currency` worth `usd`, unrounded.
    pub fn from_usd(&self, usd: Decimal, currency: Currency) -> Result<Decimal, RateError> {
        match self.quote(currency)? {
            Quote::PerUsd(rate) => usd.checked_mul(rate),
            Quote::UsdPrice(price) => usd.checked_div(price),
        }
        .ok_or(RateError::Overflow)
    }

    /// Convert and round away from zero to the target currency's scale.
    pub fn convert(
        &self,
        amount: Decimal,
        from: Currency,
        to: Currency,
    ) -> Result<Decimal, RateError> {
        if from == to {
            return Ok(amount);
        }
        let usd = self.to_usd(amount, from)?;
        let out = self.from_usd(usd, to)?;
        Ok(out.round_dp_with_strategy(to.scale(), RoundingStrategy::AwayFromZero))
    }

    fn quote(&self, currency: Currency) -> Result<Quote, RateError> {
        match self.quotes.get(&currency) {
            Some(q @ (Quote::PerUsd(v) | Quote::UsdPrice(v))) if *v > Decimal::ZERO => Ok(*q),
            _ => Err(RateError::Missing(currency)),
        }
    }
}

/// Conservative hardcoded quotes used when no live data is available.
pub fn default_quotes() -> BTreeMap<Currency, Quote> {
    BTreeMap::from([
        (Currency::Usd, Quote::PerUsd(Decimal::ONE)),
        (Currency::Ngn, Quote::PerUsd(Decimal::from(1550))),
        (Currency::Usdt, Quote::UsdPrice(Decimal::ONE)),
        (Currency::Usdc, Quote::UsdPrice(Decimal::ONE)),
        (Currency::Eth, Quote::UsdPrice(Decimal::from(3000))),
        (Currency::Bnb, Quote::UsdPrice(Decimal::from(600))),
        (Currency::Matic, Quote::UsdPrice(Decimal::new(7, 1))),
    ])
}

pub fn default_snapshot(ttl: Duration) -> RateSnapshot {
    let now = Utc::now();
    RateSnapshot {
        quotes: default_quotes(),
        source: RateSource::Fallback,
        fetched_at: now,
        expires_at: now + ttl,
    }
}

// =============================================================================
// Oracle
// =============================================================================

/// Source of conversion rates.
#[async_trait]
pub trait ExchangeRateOracle: Send + Sync {
    /// Current snapshot. Never fails; degrades to fallback quotes.
    async fn get_rates(&self) -> RateSnapshot;
}

/// Oracle returning a fixed snapshot. Used when live feeds are disabled.
pub struct FixedRateOracle {
    quotes: BTreeMap<Currency, Quote>,
}

impl FixedRateOracle {
    pub fn new(quotes: BTreeMap<Currency, Quote>) -> Self {
        Self { quotes }
    }

    pub fn defaults() -> Self {
        Self::new(default_quotes())
    }
}

#[async_trait]
impl ExchangeRateOracle for FixedRateOracle {
    async fn get_rates(&self) -> RateSnapshot {
        let now = Utc::now();
        RateSnapshot {
            quotes: self.quotes.clone(),
            source: RateSource::Fixed,
            fetched_at: now,
            expires_at: now + Duration::days(365),
        }
    }
}
