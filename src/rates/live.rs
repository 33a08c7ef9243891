// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Live rate feeds with a TTL cache.
//!
//! Two independent upstreams:
//!
//! - a crypto price feed (CoinGecko `simple/price` shape) for ETH, BNB, MATIC
//! - a fiat feed (`open.er-api.com` shape) for NGN per USD
//!
//! A successful refresh is cached for `ttl`. A failed refresh serves the
//! last known quotes (or the hardcoded defaults) and is retried after the
//! shorter `retry_ttl` so an outage does not turn every request into a
//! slow upstream call.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{default_quotes, ExchangeRateOracle, Quote, RateSnapshot, RateSource};
use crate::models::Currency;

pub const DEFAULT_CRYPTO_RATES_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_FIAT_RATES_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// CoinGecko ids per native token. MATIC has been renamed upstream, so both
/// ids are requested and the first one present wins.
const CRYPTO_IDS: [(Currency, &[&str]); 3] = [
    (Currency::Eth, &["ethereum"]),
    (Currency::Bnb, &["binancecoin"]),
    (Currency::Matic, &["matic-network", "polygon-ecosystem-token"]),
];

#[derive(Debug, thiserror::Error)]
enum FeedError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Oracle backed by HTTP feeds.
pub struct LiveRateOracle {
    http: Client,
    crypto_url: String,
    fiat_url: String,
    ttl: chrono::Duration,
    retry_ttl: chrono::Duration,
    cache: RwLock<Option<RateSnapshot>>,
    refresh: Mutex<()>,
}

impl LiveRateOracle {
    pub fn new(
        crypto_url: impl Into<String>,
        fiat_url: impl Into<String>,
        timeout: Duration,
        ttl: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
        Ok(Self {
            http,
            crypto_url: crypto_url.into().trim_end_matches('/').to_string(),
            fiat_url: fiat_url.into(),
            ttl,
            retry_ttl: std::cmp::min(ttl, chrono::Duration::seconds(60)),
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
        })
    }

    async fn cached(&self) -> Option<RateSnapshot> {
        let guard = self.cache.read().await;
        guard
            .as_ref()
            .filter(|s| !s.is_expired(Utc::now()))
            .cloned()
    }

    async fn refresh(&self) -> RateSnapshot {
        let (crypto, fiat) = tokio::join!(self.fetch_crypto(), self.fetch_fiat());

        let previous = self.cache.read().await.clone();
        let mut quotes = previous
            .as_ref()
            .map(|s| s.quotes.clone())
            .unwrap_or_else(default_quotes);
        // Stablecoins stay pegged whatever the feeds say
        quotes.insert(Currency::Usd, Quote::PerUsd(Decimal::ONE));
        quotes.insert(Currency::Usdt, Quote::UsdPrice(Decimal::ONE));
        quotes.insert(Currency::Usdc, Quote::UsdPrice(Decimal::ONE));

        let mut all_ok = true;
        match crypto {
            Ok(prices) => quotes.extend(prices),
            Err(e) => {
                all_ok = false;
                warn!(error = %e, url = %self.crypto_url, "Crypto rate feed unavailable");
            }
        }
        match fiat {
            Ok(rates) => quotes.extend(rates),
            Err(e) => {
                all_ok = false;
                warn!(error = %e, url = %self.fiat_url, "Fiat rate feed unavailable");
            }
        }

        let now = Utc::now();
        let snapshot = if all_ok {
            debug!("Exchange rates refreshed");
            RateSnapshot {
                quotes,
                source: RateSource::Live,
                fetched_at: now,
                expires_at: now + self.ttl,
            }
        } else {
            let source = match previous {
                Some(_) => RateSource::Stale,
                None => RateSource::Fallback,
            };
            RateSnapshot {
                quotes,
                source,
                fetched_at: now,
                expires_at: now + self.retry_ttl,
            }
        };

        *self.cache.write().await = Some(snapshot.clone());
        snapshot
    }

    async fn fetch_crypto(&self) -> Result<BTreeMap<Currency, Quote>, FeedError> {
        let ids: Vec<&str> = CRYPTO_IDS.iter().flat_map(|(_, ids)| ids.iter().copied()).collect();
        let url = format!("{}/simple/price", self.crypto_url);
        let body: Value = self
            .http
            .get(url)
            .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut out = BTreeMap::new();
        for (currency, ids) in CRYPTO_IDS {
            let price = ids
                .iter()
                .find_map(|id| body.get(id).and_then(|v| v.get("usd")).and_then(positive))
                .ok_or_else(|| FeedError::InvalidResponse(format!("no USD price for {currency}")))?;
            out.insert(currency, Quote::UsdPrice(price));
        }
        Ok(out)
    }

    async fn fetch_fiat(&self) -> Result<BTreeMap<Currency, Quote>, FeedError> {
        let body: Value = self
            .http
            .get(&self.fiat_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let rate = body
            .get("rates")
            .and_then(|r| r.get(Currency::Ngn.code()))
            .and_then(positive)
            .ok_or_else(|| FeedError::InvalidResponse("no NGN rate".to_string()))?;
        Ok(BTreeMap::from([(Currency::Ngn, Quote::PerUsd(rate))]))
    }
}

fn positive(value: &Value) -> Option<Decimal> {
    let decimal = Decimal::from_f64(value.as_f64()?)?.round_dp(8);
    (decimal > Decimal::ZERO).then_some(decimal)
}

#[async_trait]
impl ExchangeRateOracle for LiveRateOracle {
    async fn get_rates(&self) -> RateSnapshot {
        if let Some(snapshot) = self.cached().await {
            return snapshot;
        }

        // One refresh at a time; late arrivals reuse its result
        let _guard = self.refresh.lock().await;
        if let Some(snapshot) = self.cached().await {
            return snapshot;
        }
        self.refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use rust_decimal::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn oracle(crypto: &str, fiat: &str) -> LiveRateOracle {
        LiveRateOracle::new(
            crypto,
            fiat,
            Duration::from_secs(2),
            Duration::from_secs(300),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn live_feeds_are_parsed_and_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new()
            .route(
                "/simple/price",
                get(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        Json(serde_json::json!({
                            "ethereum": {"usd": 2500.5},
                            "binancecoin": {"usd": 550},
                            "polygon-ecosystem-token": {"usd": 0.5}
                        }))
                    }
                }),
            )
            .route(
                "/fiat",
                get(|| async { Json(serde_json::json!({"rates": {"NGN": 1600.25}})) }),
            );
        let base = serve(router).await;
        let oracle = oracle(&base, &format!("{base}/fiat"));

        let rates = oracle.get_rates().await;
        assert_eq!(rates.source, RateSource::Live);
        assert_eq!(rates.quotes[&Currency::Eth], Quote::UsdPrice(dec!(2500.5)));
        assert_eq!(rates.quotes[&Currency::Matic], Quote::UsdPrice(dec!(0.5)));
        assert_eq!(rates.quotes[&Currency::Ngn], Quote::PerUsd(dec!(1600.25)));
        assert_eq!(rates.quotes[&Currency::Usdt], Quote::UsdPrice(Decimal::ONE));

        oracle.get_rates().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_feeds_fall_back_to_defaults() {
        // Port 9 (discard) is not listening on loopback
        let oracle = oracle("http://127.0.0.1:9", "http://127.0.0.1:9/fiat");
        let rates = oracle.get_rates().await;
        assert_eq!(rates.source, RateSource::Fallback);
        assert_eq!(rates.quotes, default_quotes());
        assert!(rates.expires_at <= Utc::now() + chrono::Duration::seconds(61));
    }

    #[tokio::test]
    async fn partial_failure_keeps_good_half() {
        let router = Router::new().route(
            "/fiat",
            get(|| async { Json(serde_json::json!({"rates": {"NGN": 1500}})) }),
        );
        let base = serve(router).await;
        let oracle = oracle("http://127.0.0.1:9", &format!("{base}/fiat"));

        let rates = oracle.get_rates().await;
        assert_eq!(rates.source, RateSource::Fallback);
        assert_eq!(rates.quotes[&Currency::Ngn], Quote::PerUsd(dec!(1500)));
        assert_eq!(rates.quotes[&Currency::Eth], Quote::UsdPrice(dec!(3000)));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let router = Router::new()
            .route("/simple/price", get(|| async { Json(serde_json::json!({})) }))
            .route(
                "/fiat",
                get(|| async { Json(serde_json::json!({"rates": {"NGN": -5}})) }),
            );
        let base = serve(router).await;
        let oracle = oracle(&base, &format!("{base}/fiat"));
        let rates = oracle.get_rates().await;
        assert_eq!(rates.quotes, default_quotes());
    }
}
