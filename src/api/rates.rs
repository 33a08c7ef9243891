// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    models::Currency,
    rates::{RateSnapshot, RateSource},
    state::AppState,
};

/// Decimal places shown for USD prices.
const PRICE_DP: u32 = 8;

/// USD value of one unit of a currency.
#[derive(Debug, Serialize, ToSchema)]
pub struct RateQuote {
    pub currency: Currency,
    #[schema(value_type = String, example = "0.00064516")]
    pub usd_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RatesResponse {
    pub source: RateSource,
    /// True when the snapshot is not fresh live data.
    pub degraded: bool,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rates: Vec<RateQuote>,
}

impl From<&RateSnapshot> for RatesResponse {
    fn from(snapshot: &RateSnapshot) -> Self {
        let rates = snapshot
            .quotes
            .keys()
            .filter_map(|&currency| {
                snapshot
                    .to_usd(Decimal::ONE, currency)
                    .ok()
                    .map(|usd| RateQuote {
                        currency,
                        usd_price: usd.round_dp(PRICE_DP),
                    })
            })
            .collect();
        Self {
            source: snapshot.source,
            degraded: matches!(snapshot.source, RateSource::Stale | RateSource::Fallback),
            fetched_at: snapshot.fetched_at,
            expires_at: snapshot.expires_at,
            rates,
        }
    }
}

/// Current conversion rates. Never fails; serves fallback quotes when the
/// feeds are unreachable.
#[utoipa::path(
    get,
    path = "/v1/rates",
    tag = "Rates",
    responses(
        (status = 200, description = "Current rate snapshot", body = RatesResponse)
    )
)]
pub async fn get_rates(State(state): State<AppState>) -> Json<RatesResponse> {
    Json(RatesResponse::from(&state.engine.rates().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::default_snapshot;
    use rust_decimal::dec;

    #[test]
    fn fallback_snapshot_is_flagged_and_priced_in_usd() {
        let response = RatesResponse::from(&default_snapshot(chrono::Duration::minutes(5)));
        assert!(response.degraded);
        assert_eq!(response.source, RateSource::Fallback);

        let price = |c: Currency| {
            response
                .rates
                .iter()
                .find(|q| q.currency == c)
                .map(|q| q.usd_price)
                .unwrap()
        };
        assert_eq!(price(Currency::Eth), dec!(3000));
        assert_eq!(price(Currency::Usdt), dec!(1));
        assert_eq!(price(Currency::Ngn), dec!(0.00064516));
    }
}
